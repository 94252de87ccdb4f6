//! Content and item models
//!
//! A [`Content`] places one item inside a module. The item lives in the table
//! for its kind (`texts`, `files`, `images`, `videos`) and is referenced by
//! the `(item_kind, object_id)` pair. Every item embeds the same [`ItemBase`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discriminator stored in `contents.item_kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    File,
    Image,
    Video,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [ItemKind::Text, ItemKind::File, ItemKind::Image, ItemKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::File => "file",
            ItemKind::Image => "image",
            ItemKind::Video => "video",
        }
    }

    /// Table holding items of this kind
    pub fn table(&self) -> &'static str {
        match self {
            ItemKind::Text => "texts",
            ItemKind::File => "files",
            ItemKind::Image => "images",
            ItemKind::Video => "videos",
        }
    }

    /// Column holding the kind-specific payload
    pub fn payload_column(&self) -> &'static str {
        match self {
            ItemKind::Text => "content",
            ItemKind::File => "file",
            ItemKind::Image => "image",
            ItemKind::Video => "url",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ItemKind::Text),
            "file" => Ok(ItemKind::File),
            "image" => Ok(ItemKind::Image),
            "video" => Ok(ItemKind::Video),
            _ => Err(format!("Unknown item kind: {}", s)),
        }
    }
}

/// Fields shared by every item kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemBase {
    pub owner_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Text {
    pub id: i64,
    #[serde(flatten)]
    pub base: ItemBase,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct File {
    pub id: i64,
    #[serde(flatten)]
    pub base: ItemBase,
    /// Relative path of the stored file
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub id: i64,
    #[serde(flatten)]
    pub base: ItemBase,
    /// Relative path of the stored image
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: i64,
    #[serde(flatten)]
    pub base: ItemBase,
    pub url: String,
}

/// An item of any kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Item {
    Text(Text),
    File(File),
    Image(Image),
    Video(Video),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Text(_) => ItemKind::Text,
            Item::File(_) => ItemKind::File,
            Item::Image(_) => ItemKind::Image,
            Item::Video(_) => ItemKind::Video,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Item::Text(t) => t.id,
            Item::File(f) => f.id,
            Item::Image(i) => i.id,
            Item::Video(v) => v.id,
        }
    }

    pub fn base(&self) -> &ItemBase {
        match self {
            Item::Text(t) => &t.base,
            Item::File(f) => &f.base,
            Item::Image(i) => &i.base,
            Item::Video(v) => &v.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut ItemBase {
        match self {
            Item::Text(t) => &mut t.base,
            Item::File(f) => &mut f.base,
            Item::Image(i) => &mut i.base,
            Item::Video(v) => &mut v.base,
        }
    }

    /// The kind-specific payload as a short label
    pub fn label(&self) -> &str {
        match self {
            Item::Text(t) => t.content.as_deref().unwrap_or(""),
            Item::File(f) => &f.file,
            Item::Image(i) => &i.image,
            Item::Video(v) => &v.url,
        }
    }

    pub fn payload(&self) -> ItemPayload {
        match self {
            Item::Text(t) => ItemPayload::Text { content: t.content.clone() },
            Item::File(f) => ItemPayload::File { file: f.file.clone() },
            Item::Image(i) => ItemPayload::Image { image: i.image.clone() },
            Item::Video(v) => ItemPayload::Video { url: v.url.clone() },
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind-specific data for a new or updated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemPayload {
    Text { content: Option<String> },
    File { file: String },
    Image { image: String },
    Video { url: String },
}

impl ItemPayload {
    pub fn text(content: impl Into<String>) -> Self {
        ItemPayload::Text { content: Some(content.into()) }
    }

    pub fn file(file: impl Into<String>) -> Self {
        ItemPayload::File { file: file.into() }
    }

    pub fn image(image: impl Into<String>) -> Self {
        ItemPayload::Image { image: image.into() }
    }

    pub fn video(url: impl Into<String>) -> Self {
        ItemPayload::Video { url: url.into() }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ItemPayload::Text { .. } => ItemKind::Text,
            ItemPayload::File { .. } => ItemKind::File,
            ItemPayload::Image { .. } => ItemKind::Image,
            ItemPayload::Video { .. } => ItemKind::Video,
        }
    }

    /// Value bound to the kind's payload column
    pub fn value(&self) -> Option<&str> {
        match self {
            ItemPayload::Text { content } => content.as_deref(),
            ItemPayload::File { file } => Some(file),
            ItemPayload::Image { image } => Some(image),
            ItemPayload::Video { url } => Some(url),
        }
    }

    /// File and image references must be non-empty; a video url must be
    /// absolute http(s) with a host.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ItemPayload::Text { .. } => Ok(()),
            ItemPayload::File { file } if file.trim().is_empty() => {
                Err("File reference cannot be empty".to_string())
            }
            ItemPayload::Image { image } if image.trim().is_empty() => {
                Err("Image reference cannot be empty".to_string())
            }
            ItemPayload::Video { url } => {
                // The parser silently drops surrounding spaces and inner tabs or newlines
                if url.chars().any(char::is_whitespace) {
                    return Err(format!("Invalid video url: {}", url));
                }
                let parsed = url::Url::parse(url).map_err(|e| format!("Invalid video url {}: {}", url, e))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(format!("Video url must use http or https: {}", url));
                }
                if parsed.host_str().map_or(true, str::is_empty) {
                    return Err(format!("Video url has no host: {}", url));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A placement of one item in a module
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub id: i64,
    pub module_id: i64,
    pub kind: ItemKind,
    /// Id of the row in `kind.table()`
    pub object_id: i64,
    /// Position among the module's contents, starting at 0
    pub order: i32,
    pub created_at: DateTime<Utc>,
}

/// A content resolved together with its item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentWithItem {
    #[serde(flatten)]
    pub content: Content,
    pub item: Item,
}

/// Input for creating an item and placing it in a module
#[derive(Debug, Clone)]
pub struct CreateContentInput {
    pub module_id: i64,
    pub owner_id: i64,
    pub title: Option<String>,
    pub payload: ItemPayload,
    /// Explicit position; next in the module when absent
    pub order: Option<i32>,
}

impl CreateContentInput {
    pub fn new(module_id: i64, owner_id: i64, payload: ItemPayload) -> Self {
        Self {
            module_id,
            owner_id,
            title: None,
            payload,
            order: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }
}

/// Input for editing an item in place. The payload kind must match.
#[derive(Debug, Clone, Default)]
pub struct UpdateItemInput {
    pub title: Option<Option<String>>,
    pub payload: Option<ItemPayload>,
}

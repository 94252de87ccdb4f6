//! Unique slug generation
//!
//! A slug is derived from a title: lowercased, every run of characters that
//! are not ASCII alphanumerics collapsed to one `-`, ends trimmed. Attempt 0
//! is the bare base; later attempts append a random hex token. Titles that
//! produce an empty base get a bare token.
//!
//! The generator only proposes candidates the table does not hold yet. The
//! unique index on the slug column is what actually guarantees uniqueness;
//! services retry from the next attempt when an insert loses the race.

use crate::config::SlugConfig;
use crate::db::repositories::SlugLookup;
use uuid::Uuid;

/// Width of every slug column
pub const MAX_SLUG_LENGTH: usize = 255;

/// Minimum length of the token used when a title yields no base
const UNTITLED_TOKEN_LENGTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SlugError {
    /// Every candidate up to the attempt limit was taken
    #[error("No free slug for {base:?} after {attempts} attempts")]
    Exhausted { base: String, attempts: u32 },

    #[error("Slug lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

/// Normalise a title to its slug base. Non-ASCII characters are dropped as
/// separators, so the result only ever holds `[a-z0-9-]`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Check a caller-supplied slug
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("Slug cannot be empty".to_string());
    }
    if slug.len() > MAX_SLUG_LENGTH {
        return Err(format!("Slug must be at most {} characters", MAX_SLUG_LENGTH));
    }
    if !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(format!(
            "Slug may only contain lowercase letters, digits and hyphens: {}",
            slug
        ));
    }
    Ok(())
}

/// Lowercase hex token of `len` characters
fn random_token(len: usize) -> String {
    let mut token = String::with_capacity(len);
    while token.len() < len {
        token.push_str(&Uuid::new_v4().simple().to_string());
    }
    token.truncate(len);
    token
}

#[derive(Debug, Clone)]
pub struct SlugGenerator {
    max_attempts: u32,
    suffix_length: usize,
}

impl SlugGenerator {
    pub fn new(config: &SlugConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            suffix_length: config.suffix_length.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Slug base for a title, short enough that `base-<token>` fits the column
    pub fn base(&self, title: Option<&str>) -> String {
        let mut base = title.map(slugify).unwrap_or_default();
        let limit = MAX_SLUG_LENGTH.saturating_sub(self.suffix_length + 1);
        if base.len() > limit {
            // ASCII only, any byte index is a char boundary
            base.truncate(limit);
            let trimmed = base.trim_end_matches('-').len();
            base.truncate(trimmed);
        }
        base
    }

    /// Candidate for a given attempt number
    pub fn candidate(&self, base: &str, attempt: u32) -> String {
        if base.is_empty() {
            random_token(self.suffix_length.max(UNTITLED_TOKEN_LENGTH))
        } else if attempt == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, random_token(self.suffix_length))
        }
    }

    /// First candidate from `first_attempt` onwards that `lookup` reports free.
    ///
    /// Returns the slug with the attempt that produced it so a caller whose
    /// insert still collides can resume at `attempt + 1`.
    pub async fn generate<L>(
        &self,
        lookup: &L,
        title: Option<&str>,
        first_attempt: u32,
    ) -> Result<(String, u32), SlugError>
    where
        L: SlugLookup + ?Sized,
    {
        let base = self.base(title);

        for attempt in first_attempt..self.max_attempts {
            let candidate = self.candidate(&base, attempt);
            if !lookup.slug_exists(&candidate).await? {
                return Ok((candidate, attempt));
            }
            tracing::debug!(slug = %candidate, attempt, "Slug taken, trying next candidate");
        }

        Err(SlugError::Exhausted {
            base,
            attempts: self.max_attempts,
        })
    }
}

impl Default for SlugGenerator {
    fn default() -> Self {
        Self::new(&SlugConfig::default())
    }
}

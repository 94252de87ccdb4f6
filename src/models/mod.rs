//! Data models
//!
//! Plain entity structs as stored in the database, plus the input types the
//! services accept.

mod content;
mod course;
mod module;
mod subject;
mod user;

pub use content::{
    Content, ContentWithItem, CreateContentInput, File, Image, Item, ItemBase, ItemKind, ItemPayload, Text,
    UpdateItemInput, Video,
};
pub use course::{Course, CourseEnrollInput, CreateCourseInput, Enrollment, UpdateCourseInput};
pub use module::{CreateModuleInput, Module, UpdateModuleInput};
pub use subject::{CreateSubjectInput, Subject, UpdateSubjectInput};
pub use user::{CreateUserInput, User};

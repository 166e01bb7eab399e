#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    InMemoryRepository, Page, QuestionRepository, SessionStore, Storage, StorageError,
    TemplateRepository,
};

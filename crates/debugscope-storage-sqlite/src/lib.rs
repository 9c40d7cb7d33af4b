//! Embedded single-file storage backend (SQLite)

mod sqlite_storage;

pub use sqlite_storage::SqliteStorage;

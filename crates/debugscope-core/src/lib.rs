//! debugscope Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout debugscope:
//! - The captured `Entry` model and its per-type content shapes
//! - Query-side views (`ListOptions`, `PaginatedResult`, `StorageStats`)
//! - The `StorageAdapter` trait every backend implements
//! - Core error types

pub mod content;
pub mod context;
pub mod entry;
pub mod error;
pub mod query;
pub mod storage;

pub use context::RequestContext;
pub use entry::{Entry, EntryType};
pub use error::{Error, Result};
pub use query::{ListOptions, PaginatedResult, StorageStats};
pub use storage::StorageAdapter;

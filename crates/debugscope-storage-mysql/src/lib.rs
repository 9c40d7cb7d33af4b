//! MySQL-backed entry storage
//!
//! Tags are stored as JSON text and filtered in application code after the SQL
//! filters have narrowed the candidate set; `total` is counted after that filter.

mod mysql_storage;

pub use mysql_storage::{MysqlStorage, MysqlStorageConfig};

mod sqlite;
pub mod tables;

pub use sqlite::Database;
pub(crate) use sqlite::is_unique_violation;

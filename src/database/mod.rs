// Database module
// SQLite holds documents, sessions and messages; LanceDB holds chunk vectors

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;

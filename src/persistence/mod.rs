//! Persistence layer: the runtime vendor's embedded SQLite database.
//!
//! The schema is external surface owned by the runtime vendor — column
//! names in `client_traffics` and the `settings` column of `inbounds` must
//! match exactly what the runtime expects. This layer reads and writes
//! those tables through `sqlx` and maps driver errors onto the crate's
//! error taxonomy.

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{ClientRow, InboundRow, NewClient, StoreStats};
pub use sqlite::{SqliteStore, UnlimitedFilter};

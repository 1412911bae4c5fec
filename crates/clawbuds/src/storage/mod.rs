//! Storage backends.
//!
//! Abstract repository traits plus two interchangeable backends: a
//! lock-per-state in-memory store for tests and development, and a SQLite
//! store for lightweight single-node persistence.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::*;

impl Storage {
    /// All-in-memory storage.
    pub fn in_memory() -> Storage {
        MemoryStore::new().into_storage()
    }
}

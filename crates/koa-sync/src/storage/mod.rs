pub mod memory;
pub mod reader;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use reader::StoreReader;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::{LocalStore, TableRows};

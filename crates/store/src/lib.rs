pub mod chain;
pub mod env;
pub mod memory;
pub mod sqlite;

pub use chain::ConfigStore;
pub use env::{DefaultsProvider, EnvConfigProvider};
pub use memory::MemoryConfigProvider;
pub use sqlite::SqliteConfigProvider;

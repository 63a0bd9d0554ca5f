mod memory;
mod register;
mod sqlite;

pub use memory::MemoryMetadata;
pub use register::MetadataConfigs;
pub use sqlite::SqliteMetadata;

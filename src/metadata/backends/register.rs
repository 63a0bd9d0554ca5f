use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::{MemoryMetadata, SqliteMetadata};
use crate::metadata::MetadataStore;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfigs {
    /// Keep records in process memory.
    Memory,

    Sqlite {
        /// The path of the database file, created if missing.
        path: PathBuf,

        #[serde(default = "default_pool_size")]
        /// The *maximum* amount of pool connections.
        pool_size: u32,
    },
}

impl MetadataConfigs {
    pub async fn connect(&self) -> anyhow::Result<Arc<dyn MetadataStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryMetadata::new())),
            Self::Sqlite { path, pool_size } => {
                let store = SqliteMetadata::connect(path, *pool_size).await?;
                Ok(Arc::new(store))
            },
        }
    }
}

const fn default_pool_size() -> u32 {
    5
}

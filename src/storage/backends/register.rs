use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::{BlobStorageBackend, FileSystemBackend, MemoryBackend};
use crate::storage::ObjectStore;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfigs {
    /// Keep every blob in process memory.
    ///
    /// Nothing survives a restart.
    Memory,

    FileSystem {
        /// The directory blobs are stored under.
        directory: PathBuf,
    },

    BlobStorage {
        name: String,
        region: String,
        endpoint: String,
        access_key: Option<String>,
        secret_key: Option<String>,
        security_token: Option<String>,
        session_token: Option<String>,

        #[serde(default)]
        /// Address the bucket as part of the path instead of the host,
        /// required by most self hosted S3 implementations.
        path_style: bool,
    },
}

impl BackendConfigs {
    pub async fn connect(&self) -> anyhow::Result<Arc<dyn ObjectStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryBackend::new())),
            Self::FileSystem { directory } => {
                tokio::fs::create_dir_all(directory).await?;
                Ok(Arc::new(FileSystemBackend::new(directory.clone())))
            },
            Self::BlobStorage {
                name,
                region,
                endpoint,
                access_key,
                secret_key,
                security_token,
                session_token,
                path_style,
            } => {
                let backend = BlobStorageBackend::new(
                    name.to_string(),
                    region.to_string(),
                    endpoint.to_string(),
                    access_key.as_deref(),
                    secret_key.as_deref(),
                    security_token.as_deref(),
                    session_token.as_deref(),
                    *path_style,
                )?;

                Ok(Arc::new(backend))
            },
        }
    }
}

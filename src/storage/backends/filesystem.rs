use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::storage::ObjectStore;

const TEMP_DIR: &str = ".tmp";

pub struct FileSystemBackend {
    directory: PathBuf,
}

impl FileSystemBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            directory: dir,
        }
    }

    #[inline]
    fn format_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if !is_plain || key.is_empty() {
            return Err(anyhow!("Refusing to access storage key {:?}", key));
        }

        Ok(self.directory.join(relative))
    }

    #[inline]
    fn temp_path(&self) -> PathBuf {
        self.directory
            .join(TEMP_DIR)
            .join(Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl ObjectStore for FileSystemBackend {
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<()> {
        let path = self.format_path(key)?;
        let temp = self.temp_path();

        if let Some(parent) = temp.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Storing blob @ {:?}", &path);

        // Readers must never observe a half written blob.
        tokio::fs::write(&temp, &data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let path = self.format_path(key)?;

        debug!("Retrieving blob @ {:?}", &path);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.format_path(key)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.format_path(key)?;

        debug!("Purging blob @ {:?}", &path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, prefix),
        };

        let search_in = match dir {
            Some(dir) => self.format_path(dir)?,
            None => self.directory.clone(),
        };

        let mut entries = match tokio::fs::read_dir(&search_in).await {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(other) => return Err(other.into()),
        };

        let mut keys = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };

            if name.starts_with(name_prefix) {
                match dir {
                    Some(dir) => keys.push(format!("{}/{}", dir, name)),
                    None => keys.push(name.to_string()),
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

use async_trait::async_trait;
use bytes::Bytes;

/// A flat key addressed blob store.
#[async_trait]
pub trait ObjectStore: Sync + Send + 'static {
    /// Writes the blob, replacing anything already stored under the key.
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Removes the blob, deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Lists every stored key starting with the given prefix.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

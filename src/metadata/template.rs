use async_trait::async_trait;
use uuid::Uuid;

use super::ImageRecord;

#[async_trait]
pub trait MetadataStore: Sync + Send + 'static {
    async fn get(&self, image_id: Uuid) -> anyhow::Result<Option<ImageRecord>>;

    /// Every stored record, most recently uploaded first.
    async fn list(&self) -> anyhow::Result<Vec<ImageRecord>>;

    async fn add(&self, record: &ImageRecord) -> anyhow::Result<()>;

    /// Replaces the stored record, returning `false` if it does not exist.
    async fn update(&self, record: &ImageRecord) -> anyhow::Result<bool>;

    /// Removes the record, returning `false` if it did not exist.
    async fn delete(&self, image_id: Uuid) -> anyhow::Result<bool>;
}

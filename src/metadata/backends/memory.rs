use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::metadata::{ImageRecord, MetadataStore};

#[derive(Default)]
pub struct MemoryMetadata {
    records: RwLock<HashMap<Uuid, ImageRecord>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn get(&self, image_id: Uuid) -> anyhow::Result<Option<ImageRecord>> {
        Ok(self.records.read().await.get(&image_id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<ImageRecord>> {
        let mut records: Vec<ImageRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(records)
    }

    async fn add(&self, record: &ImageRecord) -> anyhow::Result<()> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &ImageRecord) -> anyhow::Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn delete(&self, image_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.records.write().await.remove(&image_id).is_some())
    }
}

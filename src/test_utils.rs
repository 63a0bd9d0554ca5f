use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::background::BackgroundWorker;
use crate::cache::TieredCache;
use crate::config::{BackgroundConfig, ImageKind, ProcessingConfig, ResizingFilter};
use crate::controller::{ControllerSettings, ImageController};
use crate::metadata::backends::MemoryMetadata;
use crate::metadata::ImageRecord;
use crate::storage::backends::MemoryBackend;
use crate::storage::ObjectStore;

/// A gradient PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();

    Bytes::from(buffer.into_inner())
}

pub fn record(width: u32, height: u32) -> ImageRecord {
    let id = Uuid::new_v4();

    ImageRecord {
        id,
        original_blob_key: format!("original/{}.png", id),
        original_file_name: "fixture.png".to_string(),
        content_type: "image/png".to_string(),
        file_extension: "png".to_string(),
        width,
        height,
        size_bytes: 1024,
        uploaded_at: Utc::now(),
        updated_at: None,
        is_compressed: false,
        compression_type: None,
    }
}

/// A controller wired to in-memory stores, handing back the object store
/// so tests can inspect it.
pub struct Harness {
    pub controller: ImageController,
    pub objects: Arc<MemoryBackend>,
    pub metadata: Arc<MemoryMetadata>,
}

impl Harness {
    pub fn new(pregenerate_on_upload: &[&str]) -> Self {
        let objects = Arc::new(MemoryBackend::new());
        Self::build(objects.clone(), objects, pregenerate_on_upload)
    }

    /// A harness whose object store reads can be paused, see [`GatedStore`].
    pub fn gated() -> (Self, Arc<GatedStore>) {
        let objects = Arc::new(MemoryBackend::new());
        let gated = Arc::new(GatedStore::new(objects.clone()));
        (Self::build(objects, gated.clone(), &[]), gated)
    }

    fn build(
        objects: Arc<MemoryBackend>,
        store: Arc<dyn ObjectStore>,
        pregenerate_on_upload: &[&str],
    ) -> Self {
        let metadata = Arc::new(MemoryMetadata::new());

        let processor = crate::processor::Processor::new(&ProcessingConfig {
            output_format: ImageKind::Jpeg,
            quality: 80,
            filter: ResizingFilter::Triangle,
            worker_threads: Some(2),
        })
        .unwrap();

        let settings = ControllerSettings {
            metadata_ttl: Duration::from_secs(60),
            existence_ttl: Duration::from_secs(60),
            max_upload_size: 4 * 1024 * 1024,
            pregenerate_on_upload: pregenerate_on_upload
                .iter()
                .map(|name| crate::catalog::lookup(name).unwrap())
                .collect(),
        };

        let controller = ImageController::new(
            store,
            metadata.clone(),
            Arc::new(TieredCache::new(1000, 1000, 1000)),
            processor,
            BackgroundWorker::new(&BackgroundConfig::default()),
            settings,
        );

        Self {
            controller,
            objects,
            metadata,
        }
    }

    /// Waits for all background generation to settle.
    pub async fn settle(&self) {
        assert!(self.controller.background().drain(Duration::from_secs(10)).await);
    }
}

/// Wraps a memory store and pauses the read of one key until released.
pub struct GatedStore {
    inner: Arc<MemoryBackend>,
    gated_key: Mutex<Option<String>>,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            gated_key: Mutex::new(None),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// The next read of `key` blocks until [`GatedStore::open`] is called.
    pub fn close(&self, key: &str) {
        *self.gated_key.lock().unwrap() = Some(key.to_string());
    }

    /// Waits until a reader is blocked on the gated key.
    pub async fn wait_for_reader(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<()> {
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let gated = {
            let mut gated_key = self.gated_key.lock().unwrap();
            if gated_key.as_deref() == Some(key) {
                gated_key.take()
            } else {
                None
            }
        };

        // Read before blocking so the reader sees the pre-release contents.
        let data = self.inner.get(key).await;
        if gated.is_some() {
            self.entered.notify_one();
            self.release.notified().await;
        }

        data
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.inner.list(prefix).await
    }
}

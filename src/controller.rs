use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use hashbrown::HashSet;
use poem_openapi::Object;
use uuid::Uuid;

use crate::background::BackgroundWorker;
use crate::cache::{self, Cache, CachePriority, CacheValue, EntryOptions};
use crate::catalog::{self, Resolution};
use crate::config::{ImageKind, RuntimeConfig};
use crate::error::{ImageError, Result};
use crate::keys;
use crate::metadata::{ImageRecord, MetadataStore};
use crate::processor::{ProbedImage, Processor, ResizeTarget};
use crate::storage::ObjectStore;

#[derive(Object, Debug)]
#[oai(rename_all = "camelCase")]
pub struct UploadInfo {
    /// The generated ID for the image.
    pub id: Uuid,

    /// The object store key the original was stored under.
    pub stored_path: String,

    /// The width of the stored original in pixels.
    pub width: u32,

    /// The height of the stored original in pixels.
    pub height: u32,

    /// The crc32 checksum of the uploaded image.
    pub checksum: u32,

    /// The time spent processing the image in seconds.
    pub processing_time: f32,
}

#[derive(Object, Debug, Clone, PartialEq)]
pub struct SkippedResolution {
    pub name: String,
    pub reason: String,
}

#[derive(Object, Debug, Default)]
pub struct GenerationReport {
    /// The resolutions that were generated by this call.
    pub generated: Vec<String>,

    /// The resolutions that were not generated and why.
    pub skipped: Vec<SkippedResolution>,
}

impl GenerationReport {
    fn skip(&mut self, name: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedResolution {
            name: name.to_string(),
            reason: reason.into(),
        });
    }
}

/// Image bytes ready to be sent to a client.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Bytes,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// The sliding expiry of cached image records.
    pub metadata_ttl: Duration,

    /// The absolute expiry of cached existence checks.
    pub existence_ttl: Duration,

    /// The largest accepted upload in bytes.
    pub max_upload_size: usize,

    /// Generated in the background after every upload or update.
    pub pregenerate_on_upload: Vec<Resolution>,
}

impl ControllerSettings {
    pub fn from_config(cfg: &RuntimeConfig) -> anyhow::Result<Self> {
        let pregenerate_on_upload = cfg
            .background
            .pregenerate_on_upload
            .iter()
            .map(|name| {
                catalog::lookup(name)
                    .ok_or_else(|| anyhow!("unknown resolution {:?} in pregenerate_on_upload", name))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            metadata_ttl: cfg.cache.metadata_ttl(),
            existence_ttl: cfg.cache.existence_ttl(),
            max_upload_size: cfg.max_upload_size,
            pregenerate_on_upload,
        })
    }
}

/// Coordinates the object store, metadata store and cache for every
/// image operation.
///
/// Cheap to clone, clones share all state.
#[derive(Clone)]
pub struct ImageController {
    inner: Arc<ControllerState>,
}

struct ControllerState {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<dyn Cache>,
    processor: Processor,
    background: BackgroundWorker,
    settings: ControllerSettings,
}

impl ImageController {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn Cache>,
        processor: Processor,
        background: BackgroundWorker,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerState {
                objects,
                metadata,
                cache,
                processor,
                background,
                settings,
            }),
        }
    }

    pub async fn from_config(cfg: &RuntimeConfig) -> anyhow::Result<Self> {
        let objects = cfg.backend.connect().await?;
        let metadata = cfg.metadata.connect().await?;

        Ok(Self::new(
            objects,
            metadata,
            cache::from_config(&cfg.cache),
            Processor::new(&cfg.processing)?,
            BackgroundWorker::new(&cfg.background),
            ControllerSettings::from_config(cfg)?,
        ))
    }

    #[inline]
    pub fn background(&self) -> &BackgroundWorker {
        &self.inner.background
    }

    #[inline]
    fn output_kind(&self) -> ImageKind {
        self.inner.processor.output_kind()
    }

    /// Fetches the record of an image, consulting the cache first.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_record(&self, image_id: Uuid) -> Result<Option<Arc<ImageRecord>>> {
        let cache_key = keys::metadata_cache_key(image_id);
        if let Some(CacheValue::Record(record)) = self.inner.cache.get(&cache_key).await {
            return Ok(Some(record));
        }

        let record = match self.inner.metadata.get(image_id).await? {
            Some(record) => Arc::new(record),
            None => return Ok(None),
        };

        self.cache_record(record.clone(), CachePriority::Normal).await;
        Ok(Some(record))
    }

    pub async fn list(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.inner.metadata.list().await?)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload(&self, file_name: Option<String>, data: Bytes) -> Result<UploadInfo> {
        let start = Instant::now();
        let probed = self.probe_upload(&data).await?;

        let image_id = Uuid::new_v4();
        let stored_path = keys::original_key(image_id, probed.file_extension());
        self.inner.objects.put(&stored_path, data.clone()).await?;

        let record = ImageRecord {
            id: image_id,
            original_blob_key: stored_path.clone(),
            original_file_name: file_name_or_default(file_name, image_id, &probed),
            content_type: probed.content_type().to_string(),
            file_extension: probed.file_extension().to_string(),
            width: probed.width,
            height: probed.height,
            size_bytes: data.len() as u64,
            uploaded_at: Utc::now(),
            updated_at: None,
            is_compressed: false,
            compression_type: None,
        };

        if let Err(e) = self.inner.metadata.add(&record).await {
            if let Err(cleanup) = self.inner.objects.delete(&stored_path).await {
                warn!("Failed to remove orphaned original {}: {:#}", stored_path, cleanup);
            }
            return Err(e.into());
        }

        let record = Arc::new(record);
        self.cache_record(record.clone(), CachePriority::High).await;
        self.schedule(&record, &self.inner.settings.pregenerate_on_upload);

        info!(
            "Stored image {} ({}x{}, {} bytes) @ {}",
            image_id,
            probed.width,
            probed.height,
            data.len(),
            stored_path,
        );

        Ok(UploadInfo {
            id: image_id,
            stored_path,
            width: probed.width,
            height: probed.height,
            checksum: crc32fast::hash(&data),
            processing_time: start.elapsed().as_secs_f32(),
        })
    }

    pub async fn download_original(&self, image_id: Uuid) -> Result<ImagePayload> {
        let mut record = self.require_record(image_id).await?;

        let mut data = self.inner.objects.get(&record.original_blob_key).await?;
        if data.is_none() {
            // The cached record may point at an original that was just replaced.
            self.inner.cache.remove(&keys::metadata_cache_key(image_id)).await;
            record = self.require_record(image_id).await?;
            data = self.inner.objects.get(&record.original_blob_key).await?;
        }

        let data = data.ok_or(ImageError::NotFound(image_id))?;
        Ok(ImagePayload {
            data,
            content_type: record.content_type.clone(),
            file_name: record.original_file_name.clone(),
        })
    }

    /// Serves one of the catalog resolutions, `original` being an alias for
    /// the unmodified upload.
    pub async fn download_resolution(&self, image_id: Uuid, name: &str) -> Result<ImagePayload> {
        if name.eq_ignore_ascii_case(catalog::ORIGINAL) {
            return self.download_original(image_id).await;
        }

        let resolution = catalog::lookup(name)
            .ok_or_else(|| ImageError::UnknownResolution(name.to_string()))?;

        self.resize(image_id, resolution.target()).await
    }

    /// Serves the image resized to the given width and/or height,
    /// generating the artifact if it does not exist yet.
    pub async fn get_resized(
        &self,
        image_id: Uuid,
        width: Option<i64>,
        height: Option<i64>,
    ) -> Result<ImagePayload> {
        let target = ResizeTarget::from_dimensions(width, height)?;
        self.resize(image_id, target).await
    }

    #[instrument(skip(self))]
    async fn resize(&self, image_id: Uuid, target: ResizeTarget) -> Result<ImagePayload> {
        // A second attempt only happens if the image was replaced mid render.
        for _ in 0..2 {
            let record = self.require_record(image_id).await?;
            target.ensure_within(record.width, record.height)?;

            let key = keys::artifact_key(image_id, target, self.output_kind());

            let mut data = if self.artifact_exists(&key).await.map_err(ImageError::Generation)? {
                self.inner
                    .objects
                    .get(&key)
                    .await
                    .map_err(ImageError::Generation)?
            } else {
                None
            };

            if data.is_none() {
                data = self.generate(&record, target, &key).await?;
            }

            let data = match data {
                Some(data) => data,
                None => {
                    debug!("Image {} changed while rendering {}, retrying", image_id, key);
                    self.inner.cache.remove(&keys::metadata_cache_key(image_id)).await;
                    continue;
                },
            };

            if catalog::is_thumbnail_request(target) {
                self.schedule(&record, &catalog::FOLLOW_UPS);
            }

            return Ok(ImagePayload {
                data,
                content_type: self.output_kind().as_content_type().to_string(),
                file_name: artifact_file_name(&record, target, self.output_kind()),
            });
        }

        Err(ImageError::Generation(anyhow!(
            "image {} changed repeatedly while generating",
            image_id,
        )))
    }

    pub async fn available_resolutions(&self, image_id: Uuid) -> Result<Vec<String>> {
        let record = self.require_record(image_id).await?;
        Ok(catalog::available_for(record.width, record.height))
    }

    /// Generates every catalog resolution the image can be served at.
    ///
    /// A failing resolution is reported and does not stop the others.
    #[instrument(skip(self))]
    pub async fn generate_predefined(&self, image_id: Uuid) -> Result<GenerationReport> {
        let record = self.require_record(image_id).await?;
        let mut report = GenerationReport::default();

        for resolution in catalog::CATALOG {
            if !resolution.fits(record.width, record.height) {
                report.skip(resolution.name, "exceeds original dimensions");
                continue;
            }

            let key = keys::artifact_key(image_id, resolution.target(), self.output_kind());
            match self.artifact_exists(&key).await {
                Ok(true) => {
                    report.skip(resolution.name, "already exists");
                    continue;
                },
                Ok(false) => {},
                Err(e) => {
                    report.skip(resolution.name, format!("error: {:#}", e));
                    continue;
                },
            }

            match self.render_and_store(&record, resolution.target(), &key).await {
                Ok(Some(_)) => report.generated.push(resolution.name.to_string()),
                Ok(None) => report.skip(resolution.name, "error: image changed during generation"),
                Err(e) => {
                    warn!("Failed to generate {} for {}: {:#}", resolution.name, image_id, e);
                    report.skip(resolution.name, format!("error: {:#}", e));
                },
            }
        }

        Ok(report)
    }

    /// Replaces the original of an existing image.
    ///
    /// Every previously derived artifact is removed before this returns.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn update(
        &self,
        image_id: Uuid,
        file_name: Option<String>,
        data: Bytes,
    ) -> Result<UploadInfo> {
        let start = Instant::now();
        let current = self
            .inner
            .metadata
            .get(image_id)
            .await?
            .ok_or(ImageError::NotFound(image_id))?;

        let probed = self.probe_upload(&data).await?;

        let now = Utc::now();
        let stored_path = keys::replacement_key(image_id, now.timestamp_millis(), probed.file_extension());
        self.inner.objects.put(&stored_path, data.clone()).await?;

        let record = ImageRecord {
            id: image_id,
            original_blob_key: stored_path.clone(),
            original_file_name: match file_name.filter(|name| !name.trim().is_empty()) {
                Some(name) => name,
                None => current.original_file_name.clone(),
            },
            content_type: probed.content_type().to_string(),
            file_extension: probed.file_extension().to_string(),
            width: probed.width,
            height: probed.height,
            size_bytes: data.len() as u64,
            uploaded_at: current.uploaded_at,
            updated_at: Some(now),
            is_compressed: false,
            compression_type: None,
        };

        if !self.inner.metadata.update(&record).await? {
            // Deleted while the new original was being written.
            if let Err(e) = self.inner.objects.delete(&stored_path).await {
                warn!("Failed to remove orphaned original {}: {:#}", stored_path, e);
            }
            return Err(ImageError::NotFound(image_id));
        }

        let record = Arc::new(record);
        self.cache_record(record.clone(), CachePriority::High).await;
        self.purge_artifacts(image_id).await;

        if current.original_blob_key != stored_path {
            self.delete_blob(&current.original_blob_key).await;
        }

        self.schedule(&record, &self.inner.settings.pregenerate_on_upload);

        info!(
            "Replaced image {} ({}x{} -> {}x{}) @ {}",
            image_id,
            current.width,
            current.height,
            probed.width,
            probed.height,
            stored_path,
        );

        Ok(UploadInfo {
            id: image_id,
            stored_path,
            width: probed.width,
            height: probed.height,
            checksum: crc32fast::hash(&data),
            processing_time: start.elapsed().as_secs_f32(),
        })
    }

    /// Removes the image, its original and every derived artifact.
    ///
    /// Returns `false` if the image did not exist.
    #[instrument(skip(self))]
    pub async fn delete(&self, image_id: Uuid) -> Result<bool> {
        let cache_key = keys::metadata_cache_key(image_id);

        let record = match self.inner.metadata.get(image_id).await? {
            Some(record) => record,
            None => {
                self.inner.cache.remove(&cache_key).await;
                return Ok(false);
            },
        };

        let deleted = self.inner.metadata.delete(image_id).await?;
        self.inner.cache.remove(&cache_key).await;

        self.purge_artifacts(image_id).await;
        self.delete_blob(&record.original_blob_key).await;

        info!("Deleted image {}", image_id);

        Ok(deleted)
    }

    async fn require_record(&self, image_id: Uuid) -> Result<Arc<ImageRecord>> {
        self.get_record(image_id)
            .await?
            .ok_or(ImageError::NotFound(image_id))
    }

    async fn probe_upload(&self, data: &Bytes) -> Result<ProbedImage> {
        if data.is_empty() {
            return Err(ImageError::validation("the uploaded image is empty"));
        }

        let limit = self.inner.settings.max_upload_size;
        if data.len() > limit {
            return Err(ImageError::validation(format!(
                "the uploaded image is {} bytes, the limit is {} bytes",
                data.len(),
                limit,
            )));
        }

        self.inner
            .processor
            .probe(data.clone())
            .await
            .map_err(|e| ImageError::validation(format!("the uploaded data is not a supported image: {:#}", e)))
    }

    async fn cache_record(&self, record: Arc<ImageRecord>, priority: CachePriority) {
        let options = EntryOptions::sliding(self.inner.settings.metadata_ttl, priority);
        self.inner
            .cache
            .set(keys::metadata_cache_key(record.id), CacheValue::Record(record), options)
            .await;
    }

    /// Checks whether a blob exists, consulting the cache first.
    ///
    /// A stale answer only ever costs a redundant generation or a
    /// store round trip.
    async fn artifact_exists(&self, key: &str) -> anyhow::Result<bool> {
        let cache_key = keys::existence_cache_key(key);
        if let Some(CacheValue::Exists(exists)) = self.inner.cache.get(&cache_key).await {
            return Ok(exists);
        }

        let exists = self.inner.objects.exists(key).await?;
        self.set_exists(key, exists).await;
        Ok(exists)
    }

    async fn set_exists(&self, key: &str, exists: bool) {
        let options = EntryOptions::absolute(self.inner.settings.existence_ttl, CachePriority::Low);
        self.inner
            .cache
            .set(keys::existence_cache_key(key), CacheValue::Exists(exists), options)
            .await;
    }

    async fn generate(
        &self,
        record: &ImageRecord,
        target: ResizeTarget,
        key: &str,
    ) -> Result<Option<Bytes>> {
        self.render_and_store(record, target, key)
            .await
            .map_err(ImageError::Generation)
    }

    /// Renders the artifact from the original and writes it to the store.
    ///
    /// Returns `None` if the image was replaced or deleted while rendering,
    /// in which case the written artifact has been removed again.
    /// Concurrent calls for the same key may both render, the last write wins.
    async fn render_and_store(
        &self,
        record: &ImageRecord,
        target: ResizeTarget,
        key: &str,
    ) -> anyhow::Result<Option<Bytes>> {
        let original = self
            .inner
            .objects
            .get(&record.original_blob_key)
            .await?
            .ok_or_else(|| anyhow!("original {} is missing", record.original_blob_key))?;

        let rendered = self.inner.processor.render(original, target).await?;
        self.inner.objects.put(key, rendered.data.clone()).await?;

        // The purge of a concurrent update or delete may already have run.
        if !self.is_current(record).await? {
            warn!("Discarding {}, rendered from a replaced original", key);
            self.delete_blob(key).await;
            return Ok(None);
        }

        self.set_exists(key, true).await;

        debug!(
            "Generated {} ({}x{}, {} bytes)",
            key,
            rendered.width,
            rendered.height,
            rendered.data.len(),
        );

        Ok(Some(rendered.data))
    }

    /// Queues background generation of the given resolutions.
    fn schedule(&self, record: &Arc<ImageRecord>, resolutions: &[Resolution]) {
        let kind = self.output_kind();

        for resolution in resolutions {
            if !resolution.fits(record.width, record.height) {
                continue;
            }

            let target = resolution.target();
            let key = keys::artifact_key(record.id, target, kind);
            let controller = self.clone();
            let record = record.clone();
            let job_key = key.clone();

            self.inner.background.submit(job_key, async move {
                if !controller.is_current(&record).await? {
                    debug!("Skipping {}, image changed since scheduling", key);
                    return Ok(());
                }

                if controller.artifact_exists(&key).await? {
                    return Ok(());
                }

                controller.render_and_store(&record, target, &key).await?;
                Ok(())
            });
        }
    }

    /// Whether the record still describes the stored image.
    async fn is_current(&self, record: &ImageRecord) -> anyhow::Result<bool> {
        let latest = self.inner.metadata.get(record.id).await?;
        Ok(latest.map_or(false, |latest| latest.original_blob_key == record.original_blob_key))
    }

    /// Deletes every artifact derived from the image and forgets their
    /// cached existence.
    ///
    /// Artifacts are discovered by listing the store, the known catalog
    /// and common sizes are invalidated in the cache regardless.
    async fn purge_artifacts(&self, image_id: Uuid) {
        let kind = self.output_kind();
        let known: HashSet<String> = catalog::known_targets()
            .map(|target| keys::artifact_key(image_id, target, kind))
            .collect();

        let stored = match self.inner.objects.list(&keys::artifact_prefix(image_id)).await {
            Ok(listed) => listed.into_iter().collect::<HashSet<String>>(),
            Err(e) => {
                warn!("Failed to list artifacts of {}, falling back to known sizes: {:#}", image_id, e);
                known.clone()
            },
        };

        let deletions = stored.iter().map(|key| self.delete_blob(key));
        futures::future::join_all(deletions).await;

        let invalidations = known
            .difference(&stored)
            .map(|key| async move {
                self.inner.cache.remove(&keys::existence_cache_key(key)).await
            });
        futures::future::join_all(invalidations).await;

        debug!("Purged {} artifacts of {}", stored.len(), image_id);
    }

    /// Deletes a blob and forgets its cached existence, failures are
    /// logged and ignored.
    async fn delete_blob(&self, key: &str) {
        if let Err(e) = self.inner.objects.delete(key).await {
            warn!("Failed to delete blob {}: {:#}", key, e);
        }

        self.inner.cache.remove(&keys::existence_cache_key(key)).await;
    }
}

fn file_name_or_default(file_name: Option<String>, image_id: Uuid, probed: &ProbedImage) -> String {
    match file_name.map(|name| name.trim().to_string()) {
        Some(name) if !name.is_empty() => name,
        _ => format!("{}.{}", image_id, probed.file_extension()),
    }
}

/// The download name of an artifact, e.g. `holiday_160w.jpeg`.
fn artifact_file_name(record: &ImageRecord, target: ResizeTarget, kind: ImageKind) -> String {
    let stem = Path::new(&record.original_file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| stem.to_string())
        .unwrap_or_else(|| record.id.to_string());

    format!(
        "{}_{}.{}",
        stem,
        keys::dimension_suffix(target),
        kind.as_file_extension(),
    )
}

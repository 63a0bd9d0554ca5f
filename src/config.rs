use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use strum::{AsRefStr, EnumString};

use crate::metadata::backends::MetadataConfigs;
use crate::storage::backends::BackendConfigs;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    /// The PNG encoding format.
    Png,

    /// The JPEG encoding format.
    Jpeg,

    /// The WebP encoding format (lossless).
    Webp,

    /// The GIF encoding format.
    Gif,
}

impl ImageKind {
    pub fn as_content_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn as_file_extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
        }
    }
}

impl From<ImageKind> for image::ImageFormat {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Gif => image::ImageFormat::Gif,
            ImageKind::Webp => image::ImageFormat::WebP,
        }
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizingFilter {
    /// Nearest Neighbor
    Nearest,

    /// Linear Filter
    Triangle,

    /// Cubic Filter
    CatmullRom,

    /// Gaussian Filter
    Gaussian,

    /// Lanczos with window 3
    Lanczos3,
}

impl Default for ResizingFilter {
    fn default() -> Self {
        Self::Lanczos3
    }
}

impl From<ResizingFilter> for image::imageops::FilterType {
    fn from(filter: ResizingFilter) -> Self {
        use image::imageops::FilterType;

        match filter {
            ResizingFilter::Nearest => FilterType::Nearest,
            ResizingFilter::Triangle => FilterType::Triangle,
            ResizingFilter::CatmullRom => FilterType::CatmullRom,
            ResizingFilter::Gaussian => FilterType::Gaussian,
            ResizingFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// The object storage backend configuration.
    pub backend: BackendConfigs,

    /// The metadata store configuration.
    pub metadata: MetadataConfigs,

    #[serde(default)]
    /// The existence and metadata cache configuration.
    pub cache: CacheConfig,

    #[serde(default)]
    /// How derived artifacts are produced.
    pub processing: ProcessingConfig,

    #[serde(default)]
    /// Limits and behaviour of background generation.
    pub background: BackgroundConfig,

    #[serde(default = "default_max_upload_size")]
    /// The maximum accepted upload size in bytes.
    ///
    /// Defaults to 20MB.
    pub max_upload_size: usize,
}

impl RuntimeConfig {
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    /// The max number of normal priority entries kept.
    ///
    /// Setting this to `0` disables caching entirely.
    pub capacity: u64,

    #[serde(default = "default_pinned_capacity")]
    /// The max number of high priority entries kept.
    ///
    /// Records of freshly uploaded or updated images are cached at high
    /// priority and only compete with each other for this space.
    pub pinned_capacity: u64,

    #[serde(default = "default_volatile_capacity")]
    /// The max number of low priority entries kept.
    ///
    /// Low priority entries live in their own tier so a flood of
    /// existence checks cannot push image metadata out of the cache.
    pub volatile_capacity: u64,

    #[serde(default = "default_metadata_ttl")]
    /// The sliding expiry of cached image metadata in seconds.
    pub metadata_ttl_secs: u64,

    #[serde(default = "default_existence_ttl")]
    /// The absolute expiry of cached artifact existence checks in seconds.
    pub existence_ttl_secs: u64,
}

impl CacheConfig {
    #[inline]
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    #[inline]
    pub fn existence_ttl(&self) -> Duration {
        Duration::from_secs(self.existence_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            pinned_capacity: default_pinned_capacity(),
            volatile_capacity: default_volatile_capacity(),
            metadata_ttl_secs: default_metadata_ttl(),
            existence_ttl_secs: default_existence_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_output_format")]
    /// The single format every derived artifact is encoded as.
    ///
    /// Defaults to `jpeg`.
    pub output_format: ImageKind,

    #[serde(default = "default_quality")]
    /// The JPEG encoding quality from 1 to 100.
    pub quality: u8,

    #[serde(default)]
    /// The filter used when resampling.
    pub filter: ResizingFilter,

    /// The number of threads used for decoding and encoding.
    ///
    /// Defaults to the number of logical CPUs.
    pub worker_threads: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            quality: default_quality(),
            filter: ResizingFilter::default(),
            worker_threads: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default = "default_max_concurrency")]
    /// The max number of background generation jobs running at once.
    pub max_concurrency: usize,

    #[serde(default = "default_max_pending")]
    /// The max number of jobs queued or running before new ones are dropped.
    pub max_pending: usize,

    #[serde(default = "default_pregenerate")]
    /// The catalog resolutions generated in the background after an upload.
    pub pregenerate_on_upload: Vec<String>,

    #[serde(default = "default_shutdown_grace")]
    /// How long shutdown waits for running jobs in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_pending: default_max_pending(),
            pregenerate_on_upload: default_pregenerate(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

const fn default_max_upload_size() -> usize {
    20 * 1024 * 1024
}

const fn default_cache_capacity() -> u64 {
    10_000
}

const fn default_pinned_capacity() -> u64 {
    1_000
}

const fn default_volatile_capacity() -> u64 {
    50_000
}

const fn default_metadata_ttl() -> u64 {
    30 * 60
}

const fn default_existence_ttl() -> u64 {
    2 * 60
}

const fn default_output_format() -> ImageKind {
    ImageKind::Jpeg
}

const fn default_quality() -> u8 {
    85
}

const fn default_max_concurrency() -> usize {
    2
}

const fn default_max_pending() -> usize {
    64
}

const fn default_shutdown_grace() -> u64 {
    10
}

fn default_pregenerate() -> Vec<String> {
    vec!["thumbnail".to_string()]
}

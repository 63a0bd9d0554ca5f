//! Object store and cache key naming.
//!
//! These functions are the addressing scheme for everything the server
//! persists, a given set of inputs must always produce the same key or
//! previously stored data becomes unreachable.

use uuid::Uuid;

use crate::config::ImageKind;
use crate::processor::ResizeTarget;

pub const ORIGINAL_PREFIX: &str = "original";
pub const RESIZED_PREFIX: &str = "resized";

/// The key an image's original bytes are stored under at upload time.
pub fn original_key(image_id: Uuid, extension: &str) -> String {
    format!("{}/{}.{}", ORIGINAL_PREFIX, image_id, extension)
}

/// The key used when an image's original is replaced.
///
/// The revision keeps the replacement from colliding with the
/// previous original while the swap is in progress.
pub fn replacement_key(image_id: Uuid, revision: i64, extension: &str) -> String {
    format!("{}/{}_{}.{}", ORIGINAL_PREFIX, image_id, revision, extension)
}

/// The key of a derived artifact.
pub fn artifact_key(image_id: Uuid, target: ResizeTarget, kind: ImageKind) -> String {
    format!(
        "{}{}.{}",
        artifact_prefix(image_id),
        dimension_suffix(target),
        kind.as_file_extension(),
    )
}

/// Encodes which dimension(s) were requested, e.g. `160w`, `300h` or `40x30`.
pub fn dimension_suffix(target: ResizeTarget) -> String {
    match target {
        ResizeTarget::Width(width) => format!("{}w", width),
        ResizeTarget::Height(height) => format!("{}h", height),
        ResizeTarget::Exact { width, height } => format!("{}x{}", width, height),
    }
}

/// The shared prefix of every artifact derived from the given image.
pub fn artifact_prefix(image_id: Uuid) -> String {
    format!("{}/{}_", RESIZED_PREFIX, image_id)
}

#[inline]
pub fn metadata_cache_key(image_id: Uuid) -> String {
    format!("image:{}", image_id)
}

#[inline]
pub fn existence_cache_key(blob_key: &str) -> String {
    format!("exists:{}", blob_key)
}

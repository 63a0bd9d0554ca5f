use chrono::{DateTime, Utc};
use poem_openapi::Object;
use uuid::Uuid;

pub mod backends;
mod template;

pub use template::MetadataStore;

/// The stored metadata of an uploaded image.
#[derive(Object, Debug, Clone, PartialEq)]
#[oai(rename_all = "camelCase")]
pub struct ImageRecord {
    /// The unique id of the image.
    pub id: Uuid,

    /// The object store key of the unmodified original.
    pub original_blob_key: String,

    /// The file name the original was uploaded with.
    pub original_file_name: String,

    /// The MIME type of the original.
    pub content_type: String,

    /// The file extension matching the original's format.
    pub file_extension: String,

    /// The width of the original in pixels.
    pub width: u32,

    /// The height of the original in pixels.
    pub height: u32,

    /// The size of the original in bytes.
    pub size_bytes: u64,

    pub uploaded_at: DateTime<Utc>,

    /// When the original was last replaced, if ever.
    pub updated_at: Option<DateTime<Utc>>,

    /// Reserved, originals are always stored uncompressed.
    pub is_compressed: bool,

    /// Reserved, originals are always stored uncompressed.
    pub compression_type: Option<String>,
}

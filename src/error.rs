use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ImageError>;

/// The failure modes surfaced by the image controller.
///
/// Everything except `Backend` is a reportable condition rather than
/// a server fault, the routes translate them into 4xx responses.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image {0} does not exist")]
    NotFound(Uuid),

    #[error("requested {axis} of {requested}px exceeds the original {axis} of {original}px")]
    ExceedsOriginal {
        axis: &'static str,
        requested: u32,
        original: u32,
    },

    #[error("target dimensions must be positive")]
    InvalidTarget,

    #[error("unknown resolution {0:?}")]
    UnknownResolution(String),

    #[error("{0}")]
    Validation(String),

    #[error("failed to generate artifact: {0:#}")]
    Generation(#[source] anyhow::Error),

    #[error("storage backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl ImageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this error should be reported to the caller as a missing
    /// resource rather than a bad request or internal failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ExceedsOriginal { .. }
                | Self::InvalidTarget
                | Self::UnknownResolution(_)
                | Self::Generation(_)
        )
    }
}

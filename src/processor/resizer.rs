use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::ImageError;

/// The dimension(s) a derived artifact is rendered at.
///
/// Single dimension targets preserve the original aspect ratio,
/// `Exact` targets are used verbatim and may distort the image.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResizeTarget {
    Width(u32),
    Height(u32),
    Exact { width: u32, height: u32 },
}

impl ResizeTarget {
    /// Builds a target from the optionally requested dimensions.
    ///
    /// Non-positive dimensions can never be generated and are reported
    /// as `InvalidTarget` rather than a validation failure.
    pub fn from_dimensions(width: Option<i64>, height: Option<i64>) -> Result<Self, ImageError> {
        let width = width.map(positive).transpose()?;
        let height = height.map(positive).transpose()?;

        match (width, height) {
            (Some(width), Some(height)) => Ok(Self::Exact { width, height }),
            (Some(width), None) => Ok(Self::Width(width)),
            (None, Some(height)) => Ok(Self::Height(height)),
            (None, None) => Err(ImageError::validation(
                "at least one of width or height must be provided",
            )),
        }
    }

    pub fn width(&self) -> Option<u32> {
        match self {
            Self::Width(width) | Self::Exact { width, .. } => Some(*width),
            Self::Height(_) => None,
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Self::Height(height) | Self::Exact { height, .. } => Some(*height),
            Self::Width(_) => None,
        }
    }

    /// Rejects any target that would require upscaling the original.
    pub fn ensure_within(&self, original_width: u32, original_height: u32) -> Result<(), ImageError> {
        if let Some(width) = self.width() {
            if width > original_width {
                return Err(ImageError::ExceedsOriginal {
                    axis: "width",
                    requested: width,
                    original: original_width,
                });
            }
        }

        if let Some(height) = self.height() {
            if height > original_height {
                return Err(ImageError::ExceedsOriginal {
                    axis: "height",
                    requested: height,
                    original: original_height,
                });
            }
        }

        Ok(())
    }
}

fn positive(value: i64) -> Result<u32, ImageError> {
    if value <= 0 {
        return Err(ImageError::InvalidTarget);
    }

    u32::try_from(value).map_err(|_| ImageError::InvalidTarget)
}

/// Computes the final `(width, height)` of an artifact.
///
/// The derived side is floored, filenames and keys depend on this
/// so it must not change. A derived side that floors to zero is
/// clamped to a single pixel.
pub fn target_dimensions(original: (u32, u32), target: ResizeTarget) -> (u32, u32) {
    let (original_width, original_height) = original;
    let ratio = original_width as f64 / original_height as f64;

    match target {
        ResizeTarget::Width(width) => {
            let height = (width as f64 / ratio).floor() as u32;
            (width, height.max(1))
        },
        ResizeTarget::Height(height) => {
            let width = (height as f64 * ratio).floor() as u32;
            (width.max(1), height)
        },
        ResizeTarget::Exact { width, height } => (width, height),
    }
}

#[inline]
pub fn resize(img: &DynamicImage, width: u32, height: u32, filter: FilterType) -> DynamicImage {
    img.resize_exact(width, height, filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_targets_derive_the_width() {
        assert_eq!(target_dimensions((800, 600), ResizeTarget::Height(300)), (400, 300));
        assert_eq!(target_dimensions((1920, 1080), ResizeTarget::Height(160)), (284, 160));
    }

    #[test]
    fn width_targets_derive_the_height() {
        assert_eq!(target_dimensions((200, 170), ResizeTarget::Width(160)), (160, 136));
        assert_eq!(target_dimensions((2000, 1500), ResizeTarget::Width(1920)), (1920, 1440));
        assert_eq!(target_dimensions((1000, 333), ResizeTarget::Width(100)), (100, 33));
    }

    #[test]
    fn exact_targets_ignore_the_aspect_ratio() {
        let target = ResizeTarget::Exact { width: 37, height: 512 };
        assert_eq!(target_dimensions((800, 600), target), (37, 512));
    }

    #[test]
    fn degenerate_sides_are_clamped() {
        assert_eq!(target_dimensions((1000, 1), ResizeTarget::Width(10)), (10, 1));
        assert_eq!(target_dimensions((1, 1000), ResizeTarget::Height(10)), (1, 10));
    }

    #[test]
    fn targets_are_built_from_optional_dimensions() {
        assert_eq!(
            ResizeTarget::from_dimensions(Some(10), None).unwrap(),
            ResizeTarget::Width(10),
        );
        assert_eq!(
            ResizeTarget::from_dimensions(None, Some(20)).unwrap(),
            ResizeTarget::Height(20),
        );
        assert_eq!(
            ResizeTarget::from_dimensions(Some(10), Some(20)).unwrap(),
            ResizeTarget::Exact { width: 10, height: 20 },
        );

        assert!(matches!(
            ResizeTarget::from_dimensions(None, None),
            Err(ImageError::Validation(_)),
        ));
        assert!(matches!(
            ResizeTarget::from_dimensions(Some(0), None),
            Err(ImageError::InvalidTarget),
        ));
        assert!(matches!(
            ResizeTarget::from_dimensions(Some(50), Some(-3)),
            Err(ImageError::InvalidTarget),
        ));
    }

    #[test]
    fn upscaling_is_rejected() {
        assert!(ResizeTarget::Height(600).ensure_within(800, 600).is_ok());
        assert!(matches!(
            ResizeTarget::Height(900).ensure_within(800, 600),
            Err(ImageError::ExceedsOriginal { axis: "height", requested: 900, original: 600 }),
        ));
        assert!(matches!(
            ResizeTarget::Exact { width: 801, height: 10 }.ensure_within(800, 600),
            Err(ImageError::ExceedsOriginal { axis: "width", .. }),
        ));
    }

    #[test]
    fn resize_produces_the_requested_canvas() {
        let img = DynamicImage::new_rgb8(80, 60);
        let (width, height) = target_dimensions((80, 60), ResizeTarget::Height(30));
        let out = resize(&img, width, height, FilterType::Triangle);
        assert_eq!((out.width(), out.height()), (40, 30));
    }
}

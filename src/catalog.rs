//! The fixed set of named resolutions every image can be served at.

use crate::processor::ResizeTarget;

/// The name that always refers to the unmodified upload.
pub const ORIGINAL: &str = "original";

/// A named, width targeted size.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Resolution {
    pub name: &'static str,
    pub width: u32,
}

impl Resolution {
    #[inline]
    pub fn target(&self) -> ResizeTarget {
        ResizeTarget::Width(self.width)
    }

    /// Whether the resolution can be produced without upscaling.
    #[inline]
    pub fn fits(&self, original_width: u32, original_height: u32) -> bool {
        self.target()
            .ensure_within(original_width, original_height)
            .is_ok()
    }
}

pub const THUMBNAIL: Resolution = Resolution { name: "thumbnail", width: 160 };
pub const SMALL: Resolution = Resolution { name: "small", width: 320 };
pub const MEDIUM: Resolution = Resolution { name: "medium", width: 640 };
pub const LARGE: Resolution = Resolution { name: "large", width: 1024 };
pub const XLARGE: Resolution = Resolution { name: "xlarge", width: 1920 };

/// Every resolution, smallest first.
pub const CATALOG: [Resolution; 5] = [THUMBNAIL, SMALL, MEDIUM, LARGE, XLARGE];

/// Generated in the background whenever a thumbnail is requested.
pub const FOLLOW_UPS: [Resolution; 2] = [SMALL, MEDIUM];

/// Sizes clients commonly request outside the catalog.
///
/// Only used to widen cache invalidation, this is not a whitelist.
pub const COMMON_SIZES: [u32; 12] = [32, 64, 100, 128, 150, 200, 256, 300, 400, 500, 800, 1200];

pub fn lookup(name: &str) -> Option<Resolution> {
    CATALOG
        .iter()
        .copied()
        .find(|res| res.name.eq_ignore_ascii_case(name))
}

/// The names of everything that can be served for an image of the given size.
pub fn available_for(width: u32, height: u32) -> Vec<String> {
    let mut names = vec![ORIGINAL.to_string()];
    names.extend(
        CATALOG
            .iter()
            .filter(|res| res.fits(width, height))
            .map(|res| res.name.to_string()),
    );
    names
}

/// Whether a request for this target should warm the follow up sizes.
#[inline]
pub fn is_thumbnail_request(target: ResizeTarget) -> bool {
    target == THUMBNAIL.target()
}

/// Every single dimension target an image could plausibly have been
/// rendered at, both width and height variants.
pub fn known_targets() -> impl Iterator<Item = ResizeTarget> {
    CATALOG
        .iter()
        .map(|res| res.width)
        .chain(COMMON_SIZES.iter().copied())
        .flat_map(|size| [ResizeTarget::Width(size), ResizeTarget::Height(size)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_images_only_offer_a_thumbnail() {
        assert_eq!(available_for(200, 170), vec!["original", "thumbnail"]);
    }

    #[test]
    fn large_images_offer_everything() {
        assert_eq!(
            available_for(2000, 1500),
            vec!["original", "thumbnail", "small", "medium", "large", "xlarge"],
        );
    }

    #[test]
    fn tiny_images_still_offer_the_original() {
        assert_eq!(available_for(1, 1), vec!["original"]);
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(lookup("Medium"), Some(MEDIUM));
        assert_eq!(lookup("original"), None);
        assert_eq!(lookup("huge"), None);
    }

    #[test]
    fn catalog_is_ordered_smallest_first() {
        assert!(CATALOG.windows(2).all(|pair| pair[0].width < pair[1].width));
        assert_eq!(CATALOG[0], THUMBNAIL);
    }

    #[test]
    fn known_targets_cover_both_axes_of_the_catalog() {
        let targets: Vec<ResizeTarget> = known_targets().collect();

        for res in CATALOG {
            assert!(targets.contains(&ResizeTarget::Width(res.width)));
            assert!(targets.contains(&ResizeTarget::Height(res.width)));
        }
        assert_eq!(targets.len(), (CATALOG.len() + COMMON_SIZES.len()) * 2);
    }
}

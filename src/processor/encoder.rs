use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::config::ImageKind;

/// Encodes the image in the given format.
///
/// JPEG has no alpha channel and the WebP/GIF encoders only accept 8 bit
/// RGBA, so the pixel layout is normalised before encoding.
pub fn encode_to(img: &DynamicImage, kind: ImageKind, quality: u8) -> anyhow::Result<Bytes> {
    let mut buff = Cursor::new(Vec::new());

    match kind {
        ImageKind::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buff, quality.clamp(1, 100));
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        },
        ImageKind::Webp | ImageKind::Gif => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buff, kind.into())?;
        },
        ImageKind::Png => img.write_to(&mut buff, ImageFormat::Png)?,
    }

    Ok(Bytes::from(buff.into_inner()))
}

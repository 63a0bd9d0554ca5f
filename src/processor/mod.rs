use std::io::Cursor;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use tokio::sync::oneshot;

use crate::config::{ImageKind, ProcessingConfig};

mod encoder;
mod resizer;

pub use resizer::{target_dimensions, ResizeTarget};

/// The information extracted from an uploaded image.
#[derive(Debug, Copy, Clone)]
pub struct ProbedImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl ProbedImage {
    #[inline]
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn file_extension(&self) -> &'static str {
        self.format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("bin")
    }
}

/// A freshly encoded artifact.
pub struct RenderedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Runs all decoding and encoding on a dedicated rayon pool so the
/// tokio workers are never blocked by CPU bound work.
#[derive(Clone)]
pub struct Processor {
    pool: Arc<rayon::ThreadPool>,
    output: ImageKind,
    quality: u8,
    filter: FilterType,
}

impl Processor {
    pub fn new(cfg: &ProcessingConfig) -> anyhow::Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|n| format!("imagehost-processor-{}", n));

        if let Some(threads) = cfg.worker_threads {
            builder = builder.num_threads(threads);
        }

        Ok(Self {
            pool: Arc::new(builder.build()?),
            output: cfg.output_format,
            quality: cfg.quality,
            filter: cfg.filter.into(),
        })
    }

    #[inline]
    pub fn output_kind(&self) -> ImageKind {
        self.output
    }

    /// Fully decodes the given data, returning its dimensions and format.
    pub async fn probe(&self, data: Bytes) -> anyhow::Result<ProbedImage> {
        self.run(move || {
            let reader = ImageReader::new(Cursor::new(data.as_ref())).with_guessed_format()?;
            let format = reader
                .format()
                .ok_or_else(|| anyhow!("unrecognised image format"))?;
            let img = reader.decode()?;

            Ok(ProbedImage {
                width: img.width(),
                height: img.height(),
                format,
            })
        })
        .await
    }

    /// Decodes the original, resizes it to the target and encodes it
    /// in the configured output format.
    pub async fn render(&self, original: Bytes, target: ResizeTarget) -> anyhow::Result<RenderedImage> {
        let output = self.output;
        let quality = self.quality;
        let filter = self.filter;

        self.run(move || {
            let img = image::load_from_memory(original.as_ref())?;
            let (width, height) = target_dimensions((img.width(), img.height()), target);

            debug!(
                "Rendering {}x{} -> {}x{} as {}",
                img.width(),
                img.height(),
                width,
                height,
                output.as_ref(),
            );

            let resized = resizer::resize(&img, width, height, filter);
            let data = encoder::encode_to(&resized, output, quality)?;

            Ok(RenderedImage { data, width, height })
        })
        .await
    }

    async fn run<F, T>(&self, job: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            // The receiver only goes away if the request was cancelled.
            let _ = tx.send(job());
        });

        rx.await
            .map_err(|_| anyhow!("processing worker dropped the job before completing it"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResizingFilter;
    use crate::test_utils::png_bytes;

    fn processor(output_format: ImageKind) -> Processor {
        Processor::new(&ProcessingConfig {
            output_format,
            quality: 80,
            filter: ResizingFilter::Triangle,
            worker_threads: Some(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn probe_reports_dimensions_and_format() {
        let probed = processor(ImageKind::Jpeg).probe(png_bytes(64, 48)).await.unwrap();

        assert_eq!((probed.width, probed.height), (64, 48));
        assert_eq!(probed.format, ImageFormat::Png);
        assert_eq!(probed.content_type(), "image/png");
        assert_eq!(probed.file_extension(), "png");
    }

    #[tokio::test]
    async fn probe_rejects_garbage() {
        let res = processor(ImageKind::Jpeg)
            .probe(Bytes::from_static(b"definitely not an image"))
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn render_converts_to_the_output_format() {
        let rendered = processor(ImageKind::Jpeg)
            .render(png_bytes(80, 60), ResizeTarget::Height(30))
            .await
            .unwrap();

        assert_eq!((rendered.width, rendered.height), (40, 30));
        assert_eq!(image::guess_format(&rendered.data).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&rendered.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }
}

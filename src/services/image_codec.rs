//! Image codec used by the derivative pipeline.
//!
//! [`ImageCodec`] is the narrow seam the generator talks to; [`RasterCodec`]
//! implements it over the `image` crate. All methods are CPU-bound and
//! blocking, callers on an async runtime should move them off the reactor.

use bytes::Bytes;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
    #[error("codec task did not complete: {0}")]
    Task(String),
}

/// Encoded output format of a derivative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy JPEG with the given quality (1-100).
    Jpeg { quality: u8 },
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg { quality: 85 }
    }
}

pub trait ImageCodec: Send + Sync {
    /// Natural (width, height) of an encoded image.
    fn decode_size(&self, source: &[u8]) -> Result<(u32, u32), CodecError>;

    /// Scale `source` so it covers `width`x`height`, center-crop to exactly
    /// that size, and encode it as `format`.
    fn resize_crop_to_buffer(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        format: OutputFormat,
    ) -> Result<Bytes, CodecError>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Clone, Debug)]
pub struct RasterCodec {
    filter: FilterType,
}

impl RasterCodec {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::new(FilterType::Lanczos3)
    }
}

impl ImageCodec for RasterCodec {
    fn decode_size(&self, source: &[u8]) -> Result<(u32, u32), CodecError> {
        ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| CodecError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn resize_crop_to_buffer(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        format: OutputFormat,
    ) -> Result<Bytes, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidTarget { width, height });
        }

        let img =
            image::load_from_memory(source).map_err(|e| CodecError::Decode(e.to_string()))?;
        let (orig_w, orig_h) = img.dimensions();

        // Scales the shorter side to the target, then crops the overflow
        // symmetrically around the center.
        let filled = img.resize_to_fill(width, height, self.filter);

        let data = encode(&filled, format)?;
        debug!(
            original_width = orig_w,
            original_height = orig_h,
            width,
            height,
            size = data.len(),
            "Derivative encoded"
        );
        Ok(data)
    }
}

fn encode(img: &DynamicImage, format: OutputFormat) -> Result<Bytes, CodecError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg { quality } => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }
    }
    Ok(Bytes::from(buf))
}

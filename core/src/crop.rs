//! The crop pipeline: select a pyramid level, read the native pixels, resample
//! to the target long side, and encode for the model.
//!
//! The pipeline never upsamples. When the region is smaller than the target at
//! the read level, the pixels are returned as-is with `scale_factor = 1.0`.

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, imageops};
use giant_wsi::SlideReader;

use crate::geometry::Region;
use crate::selector::select_level;
use crate::transforms::size_at_level;

/// Parameters for one crop request.
#[derive(Debug, Clone, Copy)]
pub struct CropOptions {
    /// Long side, in pixels, of the image handed to the model.
    pub target_size: u32,
    /// Oversampling bias for level selection.
    pub bias: f64,
    /// JPEG encoder quality, 1-100.
    pub jpeg_quality: u8,
    /// Largest allowed read dimension at the selected level; 0 disables the
    /// guard.
    pub max_read_dim: u32,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            target_size: 1000,
            bias: 0.85,
            jpeg_quality: 85,
            max_read_dim: 10_000,
        }
    }
}

/// Result of cropping and resampling a slide region.
#[derive(Debug, Clone)]
pub struct CroppedImage {
    pub image: RgbImage,
    /// Standard base64 of the JPEG encoding, ready for an LMM payload.
    pub base64_jpeg: String,
    /// The Level-0 region that was requested.
    pub region: Region,
    /// Pyramid level the pixels were read from.
    pub read_level: usize,
    /// `final_long_side / read_long_side`, in (0, 1].
    pub scale_factor: f64,
}

/// Extract, resample, and encode a Level-0 region from an open slide.
pub fn crop(reader: &dyn SlideReader, region: Region, options: &CropOptions) -> Result<CroppedImage> {
    if !(1..=100).contains(&options.jpeg_quality) {
        bail!(
            "jpeg_quality must be 1-100, got {}",
            options.jpeg_quality
        );
    }

    let metadata = reader.metadata();
    let selected = select_level(region, metadata, options.target_size, options.bias)?;
    let read_size = size_at_level((region.width, region.height), selected.downsample)?;

    // Memory guard: refuse reads that would allocate unbounded buffers before
    // touching the decoder.
    let max_dim = read_size.0.max(read_size.1);
    if options.max_read_dim > 0 && max_dim > options.max_read_dim {
        bail!(
            "region too large: {}x{} pixels at level {} exceeds maximum dimension {} \
             (region=({}, {}, {}, {}))",
            read_size.0,
            read_size.1,
            selected.level,
            options.max_read_dim,
            region.x,
            region.y,
            region.width,
            region.height
        );
    }

    let raw = reader
        .read_region((region.x, region.y), selected.level, read_size)
        .context("slide read failed")?;

    let (image, scale_factor) = resize_to_target(raw, options.target_size);
    let base64_jpeg = encode_jpeg_base64(&image, options.jpeg_quality)?;

    tracing::debug!(
        x = region.x,
        y = region.y,
        width = region.width,
        height = region.height,
        level = selected.level,
        scale = scale_factor,
        out_w = image.width(),
        out_h = image.height(),
        "cropped region"
    );

    Ok(CroppedImage {
        image,
        base64_jpeg,
        region,
        read_level: selected.level,
        scale_factor,
    })
}

/// Resize so the long side equals `target_size` exactly, aspect preserved.
/// Images already at or below the target pass through untouched.
fn resize_to_target(image: RgbImage, target_size: u32) -> (RgbImage, f64) {
    let (w, h) = image.dimensions();
    let long_side = w.max(h);
    if long_side <= target_size {
        return (image, 1.0);
    }

    let scale = f64::from(target_size) / f64::from(long_side);
    let (new_w, new_h) = if w >= h {
        (
            target_size,
            ((f64::from(h) * scale).round() as u32).max(1),
        )
    } else {
        (
            ((f64::from(w) * scale).round() as u32).max(1),
            target_size,
        )
    };

    let resized = imageops::resize(&image, new_w, new_h, imageops::FilterType::Lanczos3);
    (resized, scale)
}

/// Encode an RGB image as JPEG at the given quality and base64 the bytes with
/// the standard alphabet (no line breaks).
pub fn encode_jpeg_base64(image: &RgbImage, quality: u8) -> Result<String> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(image)
        .context("JPEG encoding failed")?;
    Ok(BASE64.encode(&bytes))
}

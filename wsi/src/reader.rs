use std::path::{Path, PathBuf};

use image::{RgbImage, imageops};
use openslide_rs::{Address, OpenSlide, Region as OsRegion, Size as OsSize};

use crate::error::WsiError;
use crate::types::SlideMetadata;

/// WSI file extensions the OpenSlide backend accepts (case-insensitive).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".svs", ".ndpi", ".tiff", ".tif", ".mrxs", ".vms", ".vmu", ".scn", ".bif",
];

/// Read access to one open slide.
///
/// Implementations must tolerate region reads that extend past the slide
/// edges: out-of-bounds pixels come back black in the returned RGB image.
pub trait SlideReader: Send + Sync {
    fn metadata(&self) -> &SlideMetadata;

    /// Read a region. `location` is the top-left corner in Level-0
    /// coordinates; `size` is the extent in the target level's pixels.
    fn read_region(
        &self,
        location: (u32, u32),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, WsiError>;

    /// Whole-slide thumbnail fitting inside `max_size`, aspect preserved.
    fn thumbnail(&self, max_size: (u32, u32)) -> Result<RgbImage, WsiError>;
}

/// Factory for slide readers, keyed by path.
pub trait SlideSource: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SlideReader>, WsiError>;
}

/// The production [`SlideSource`] backed by OpenSlide.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSlideSource;

impl SlideSource for OpenSlideSource {
    fn open(&self, path: &Path) -> Result<Box<dyn SlideReader>, WsiError> {
        Ok(Box::new(OpenSlideReader::open(path)?))
    }
}

/// One open slide handle. Opened and closed within a single worker; the
/// handle is dropped (and the file released) when the reader goes away.
pub struct OpenSlideReader {
    slide: OpenSlide,
    metadata: SlideMetadata,
}

impl OpenSlideReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WsiError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(WsiError::Open {
                path: path.to_path_buf(),
                message: "file not found".into(),
            });
        }
        check_supported(path)?;

        let slide = OpenSlide::new(path).map_err(|e| WsiError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let metadata = read_metadata(&slide, path)?;

        tracing::debug!(
            path = %path.display(),
            width = metadata.width,
            height = metadata.height,
            levels = metadata.level_count,
            vendor = %metadata.vendor,
            "opened slide"
        );

        Ok(Self { slide, metadata })
    }
}

impl SlideReader for OpenSlideReader {
    fn metadata(&self) -> &SlideMetadata {
        &self.metadata
    }

    fn read_region(
        &self,
        location: (u32, u32),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, WsiError> {
        let (x, y) = location;
        let (width, height) = size;
        let read_err = |message: String| WsiError::Read {
            path: PathBuf::from(&self.metadata.path),
            level,
            x,
            y,
            width,
            height,
            message,
        };

        if level >= self.metadata.level_count {
            return Err(read_err(format!(
                "invalid level, must be in [0, {}]",
                self.metadata.level_count - 1
            )));
        }
        if width == 0 || height == 0 {
            return Err(read_err("region size must be positive".into()));
        }

        let buffer = self
            .slide
            .read_region(&OsRegion {
                address: Address { x, y },
                level: level as u32,
                size: OsSize {
                    w: width,
                    h: height,
                },
            })
            .map_err(|e| read_err(e.to_string()))?;

        rgb_from_openslide(&buffer, width, height).map_err(read_err)
    }

    fn thumbnail(&self, max_size: (u32, u32)) -> Result<RgbImage, WsiError> {
        let thumb_err = |message: String| WsiError::Thumbnail {
            path: PathBuf::from(&self.metadata.path),
            message,
        };
        if max_size.0 == 0 || max_size.1 == 0 {
            return Err(thumb_err("thumbnail size must be positive".into()));
        }

        // Read the coarsest level whole and downscale; OpenSlide exposes raw
        // region reads only, so the thumbnail is synthesized here.
        let level = self.metadata.level_count - 1;
        let (lw, lh) = self.metadata.level_dimensions[level];
        let full = self.read_region((0, 0), level, (lw, lh)).map_err(|e| match e {
            WsiError::Read { message, .. } => thumb_err(message),
            other => other,
        })?;

        Ok(fit_within(&full, max_size))
    }
}

/// Scale an image down so it fits inside `max_size`, preserving aspect ratio.
/// Images already inside the bounds are returned unchanged.
pub fn fit_within(image: &RgbImage, max_size: (u32, u32)) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = f64::min(
        f64::from(max_size.0) / f64::from(w),
        f64::from(max_size.1) / f64::from(h),
    );
    if scale >= 1.0 {
        return image.clone();
    }
    let new_w = ((f64::from(w) * scale).round() as u32).max(1);
    let new_h = ((f64::from(h) * scale).round() as u32).max(1);
    imageops::resize(image, new_w, new_h, imageops::FilterType::Lanczos3)
}

/// Accept known WSI extensions, or the DICOM directory convention: a
/// directory holding `.dcm` files for one series denotes one slide.
fn check_supported(path: &Path) -> Result<(), WsiError> {
    if path.is_dir() {
        let has_dcm = std::fs::read_dir(path)
            .map_err(|e| WsiError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .filter_map(|entry| entry.ok())
            .any(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            });
        if has_dcm {
            return Ok(());
        }
        return Err(WsiError::Open {
            path: path.to_path_buf(),
            message: "directory contains no .dcm files".into(),
        });
    }

    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    if SUPPORTED_EXTENSIONS.contains(&suffix.as_str()) {
        return Ok(());
    }
    Err(WsiError::Open {
        path: path.to_path_buf(),
        message: format!(
            "unsupported extension '{suffix}', supported: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        ),
    })
}

fn read_metadata(slide: &OpenSlide, path: &Path) -> Result<SlideMetadata, WsiError> {
    let open_err = |message: String| WsiError::Open {
        path: path.to_path_buf(),
        message,
    };

    let level_count = slide
        .get_level_count()
        .map_err(|e| open_err(format!("failed to get level count: {e}")))? as usize;
    if level_count == 0 {
        return Err(open_err("slide reports zero pyramid levels".into()));
    }

    let mut level_dimensions = Vec::with_capacity(level_count);
    let mut level_downsamples = Vec::with_capacity(level_count);
    for level in 0..level_count {
        let OsSize { w, h } = slide
            .get_level_dimensions(level as u32)
            .map_err(|e| open_err(format!("failed to get dimensions for level {level}: {e}")))?;
        let ds = slide
            .get_level_downsample(level as u32)
            .map_err(|e| open_err(format!("failed to get downsample for level {level}: {e}")))?;
        level_dimensions.push((w, h));
        level_downsamples.push(ds);
    }

    let (width, height) = level_dimensions[0];
    let vendor = slide
        .get_property_value("openslide.vendor")
        .unwrap_or_else(|_| "unknown".into());
    let mpp_x = property_f64(slide, "openslide.mpp-x");
    let mpp_y = property_f64(slide, "openslide.mpp-y");
    let mpp = match (mpp_x, mpp_y) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };

    Ok(SlideMetadata {
        path: path.display().to_string(),
        width,
        height,
        level_count,
        level_dimensions,
        level_downsamples,
        vendor,
        mpp,
    })
}

fn property_f64(slide: &OpenSlide, key: &str) -> Option<f64> {
    slide
        .get_property_value(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
}

/// Convert the decoder's premultiplied BGRA buffer into RGB. Transparent
/// padding outside the slide carries zeroed color channels, so it lands as
/// black without special handling.
fn rgb_from_openslide(buffer: &[u8], width: u32, height: u32) -> Result<RgbImage, String> {
    let expected = (width as usize) * (height as usize) * 4;
    if buffer.len() < expected {
        return Err(format!(
            "buffer size mismatch: expected {expected} bytes, got {}",
            buffer.len()
        ));
    }

    let mut img = RgbImage::new(width, height);
    for (i, px) in img.pixels_mut().enumerate() {
        let idx = i * 4;
        px.0 = [buffer[idx + 2], buffer[idx + 1], buffer[idx]];
    }
    Ok(img)
}

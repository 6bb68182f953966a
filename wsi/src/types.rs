use serde::{Deserialize, Serialize};

/// Immutable metadata for a whole-slide image.
///
/// `level_dimensions` and `level_downsamples` are parallel sequences indexed
/// by pyramid level; level 0 is the native resolution with downsample 1.0 and
/// downsamples increase monotonically toward coarser levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideMetadata {
    pub path: String,
    /// Level-0 width in pixels.
    pub width: u32,
    /// Level-0 height in pixels.
    pub height: u32,
    pub level_count: usize,
    pub level_dimensions: Vec<(u32, u32)>,
    pub level_downsamples: Vec<f64>,
    pub vendor: String,
    /// Microns per pixel (x, y) when the scanner recorded it.
    pub mpp: Option<(f64, f64)>,
}

impl SlideMetadata {
    /// Level-0 dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Dimensions of a pyramid level, or `None` when the index is out of range.
    pub fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.level_dimensions.get(level).copied()
    }

    /// Downsample factor of a pyramid level, or `None` when out of range.
    pub fn downsample(&self, level: usize) -> Option<f64> {
        self.level_downsamples.get(level).copied()
    }
}

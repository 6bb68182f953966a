//! Navigation core: geometry, coordinate transforms, pyramid level selection,
//! the crop pipeline, and the axis-guide overlay.
//!
//! Everything here works in Level-0 pixel coordinates unless a function name
//! says otherwise. The crop pipeline preserves one invariant end to end: the
//! image handed to the model is never upsampled.

pub mod crop;
pub mod geometry;
pub mod overlay;
pub mod selector;
pub mod transforms;

pub use crop::{CropOptions, CroppedImage, crop, encode_jpeg_base64};
pub use geometry::{Point, Region, Size, clamp_region, validate};
pub use overlay::{AxisGuideGenerator, OverlayStyle, composite_onto, navigable_thumbnail};
pub use selector::{SelectedLevel, select_level};

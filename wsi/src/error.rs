use std::path::PathBuf;

/// Errors from the slide decoder boundary.
///
/// Read errors carry the full operation context so that a failed crop can be
/// reported with the path, level, location, and size that produced it.
#[derive(Debug, thiserror::Error)]
pub enum WsiError {
    #[error("failed to open slide {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error(
        "failed to read slide {path} (level {level}, location ({x}, {y}), size {width}x{height}): {message}"
    )]
    Read {
        path: PathBuf,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        message: String,
    },

    #[error("failed to build thumbnail for {path}: {message}")]
    Thumbnail { path: PathBuf, message: String },
}

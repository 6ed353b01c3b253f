//! Error types for raster handling
//!
//! Rectification itself never fails. These cover the edges around it:
//! building rasters from caller buffers and decoding or encoding image
//! containers.

/// Raster construction and codec errors
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("raster dimensions must be non-zero, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },

    #[error("raster dimensions {width}x{height} exceed the {max}px limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("buffer holds {actual} bytes but {width}x{height} RGBA needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

pub type Result<T> = std::result::Result<T, RasterError>;

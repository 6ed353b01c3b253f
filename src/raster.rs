//! RGBA8 rasters, bilinear sampling and export encoding

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops, DynamicImage, ImageOutputFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{RasterError, Result};
use crate::solver::Uv;

/// Bytes per RGBA pixel
pub const CHANNELS: usize = 4;

/// Largest raster side accepted anywhere, in pixels
pub const MAX_DIMENSION: u32 = 16_384;

/// A row-major RGBA8 pixel grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RasterImage {
    /// Fully transparent raster
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    /// Raster with every pixel set to `rgba`
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let len = byte_len(width, height)?;
        let data = rgba.repeat(len / CHANNELS);
        Ok(Self { width, height, data })
    }

    /// Wrap an existing RGBA8 buffer
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(RasterError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Decode any container the `image` crate is built for (PNG, JPEG)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(RasterError::Decode)?;
        Self::from_image(img.to_rgba8())
    }

    pub fn from_image(img: RgbaImage) -> Result<Self> {
        let (width, height) = img.dimensions();
        Self::from_rgba(width, height, img.into_raw())
    }

    pub fn to_image(&self) -> RgbaImage {
        // Dimensions and length are validated at construction
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    pub(crate) fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride() + x as usize * CHANNELS;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + CHANNELS]);
        px
    }

    #[inline]
    #[allow(dead_code)]
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let offset = y as usize * self.stride() + x as usize * CHANNELS;
        self.data[offset..offset + CHANNELS].copy_from_slice(&rgba);
    }

    /// Rotated copy; `Rotation::None` clones
    pub fn rotated(&self, rotation: Rotation) -> Self {
        let img = self.to_image();
        let out = match rotation {
            Rotation::None => return self.clone(),
            Rotation::Cw90 => imageops::rotate90(&img),
            Rotation::Cw180 => imageops::rotate180(&img),
            Rotation::Cw270 => imageops::rotate270(&img),
        };
        let (width, height) = out.dimensions();
        Self {
            width,
            height,
            data: out.into_raw(),
        }
    }

    /// Encode into an image container
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);

        match encoding {
            Encoding::Png => DynamicImage::ImageRgba8(self.to_image())
                .write_to(&mut cursor, ImageOutputFormat::Png)
                .map_err(RasterError::Encode)?,
            Encoding::Jpeg { quality } => {
                // JPEG has no alpha; transparent pixels are zero and land on black
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(self.to_image()).to_rgb8())
                    .write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))
                    .map_err(RasterError::Encode)?
            }
        }

        Ok(bytes)
    }

    /// Encode and wrap as a `data:` URI
    pub fn to_data_uri(&self, encoding: Encoding) -> Result<String> {
        let bytes = self.encode(encoding)?;
        Ok(format!(
            "data:{};base64,{}",
            encoding.mime_type(),
            STANDARD.encode(bytes)
        ))
    }
}

/// Reject empty shapes and shapes with a side longer than `max`
pub fn check_size(width: u32, height: u32, max: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(RasterError::ZeroSize { width, height });
    }
    if width > max || height > max {
        return Err(RasterError::TooLarge { width, height, max });
    }
    Ok(())
}

/// RGBA buffer length for a `width x height` raster
fn byte_len(width: u32, height: u32) -> Result<usize> {
    check_size(width, height, MAX_DIMENSION)?;
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(CHANNELS))
        .ok_or(RasterError::TooLarge {
            width,
            height,
            max: MAX_DIMENSION,
        })
}

/// 2x2 bilinear sample at normalised source coordinates.
///
/// `(u, v)` scale to `[0, W-1] x [0, H-1]`; neighbours past the last
/// row or column clamp to it.
#[inline]
pub fn sample_bilinear(source: &RasterImage, uv: Uv) -> [u8; 4] {
    let max_x = (source.width - 1) as f64;
    let max_y = (source.height - 1) as f64;

    let sx = (uv.u * max_x).clamp(0.0, max_x);
    let sy = (uv.v * max_y).clamp(0.0, max_y);

    let x1 = sx.floor() as u32;
    let y1 = sy.floor() as u32;
    let x2 = (x1 + 1).min(source.width - 1);
    let y2 = (y1 + 1).min(source.height - 1);

    let fx = sx - x1 as f64;
    let fy = sy - y1 as f64;

    let p11 = source.pixel(x1, y1);
    let p21 = source.pixel(x2, y1);
    let p12 = source.pixel(x1, y2);
    let p22 = source.pixel(x2, y2);

    let mut out = [0u8; 4];
    for c in 0..CHANNELS {
        let value = p11[c] as f64 * (1.0 - fx) * (1.0 - fy)
            + p21[c] as f64 * fx * (1.0 - fy)
            + p12[c] as f64 * (1.0 - fx) * fy
            + p22[c] as f64 * fx * fy;
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Clockwise rotation applied to a source before rectification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Quarter turn when the source and canvas disagree on portrait vs landscape
    pub fn to_match(src_width: u32, src_height: u32, canvas_width: u32, canvas_height: u32) -> Self {
        let src_portrait = src_height > src_width;
        let canvas_portrait = canvas_height > canvas_width;
        if src_width == src_height || canvas_width == canvas_height {
            Rotation::None
        } else if src_portrait != canvas_portrait {
            Rotation::Cw90
        } else {
            Rotation::None
        }
    }
}

/// Export container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Png,
    Jpeg { quality: u8 },
}

impl Encoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Encoding::Png => "image/png",
            Encoding::Jpeg { .. } => "image/jpeg",
        }
    }
}

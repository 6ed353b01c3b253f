//! Quad outline and corner handles drawn over a preview

use image::Rgba;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut};

use crate::error::Result;
use crate::geometry::{Corner, Quad};
use crate::raster::RasterImage;

const OUTLINE: Rgba<u8> = Rgba([0, 200, 255, 255]);
const HANDLE_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);
const HANDLE_RING: Rgba<u8> = Rgba([0, 120, 220, 255]);
const HANDLE_RADIUS: i32 = 5;

/// Copy of `base` with the quad outline and its four handles drawn on top
pub fn draw_quad_overlay(base: &RasterImage, quad: &Quad) -> Result<RasterImage> {
    let mut img = base.to_image();

    let outline = quad.outline();
    for i in 0..outline.len() {
        let a = outline[i];
        let b = outline[(i + 1) % outline.len()];
        draw_line_segment_mut(
            &mut img,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            OUTLINE,
        );
    }

    for corner in Corner::ALL {
        let p = quad.corner(corner);
        let centre = (p.x.round() as i32, p.y.round() as i32);
        draw_filled_circle_mut(&mut img, centre, HANDLE_RADIUS, HANDLE_FILL);
        draw_hollow_circle_mut(&mut img, centre, HANDLE_RADIUS, HANDLE_RING);
    }

    RasterImage::from_image(img)
}

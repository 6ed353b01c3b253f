//! Quad rectification
//!
//! Warps a source raster into the user-placed quad on the destination
//! canvas. Each destination pixel is gated by the half-plane test, its
//! bilinear parameters are recovered by the Newton solver, and the colour
//! is sampled bilinearly from the source. This is a bilinear map, not a
//! homography.

use rayon::prelude::*;
use std::ops::AddAssign;

use crate::error::Result;
use crate::geometry::{is_point_in_quad, Point, Quad};
use crate::raster::{sample_bilinear, RasterImage, CHANNELS};
use crate::solver::{solve_uv_detailed, SolveStatus};

/// Per-pass solver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Pixels classified inside the quad
    pub inside: u64,
    pub converged: u64,
    pub singular: u64,
    pub exhausted: u64,
    /// Newton updates summed over inside pixels
    pub iterations: u64,
}

impl RenderStats {
    fn record(&mut self, status: SolveStatus, iterations: u32) {
        self.inside += 1;
        self.iterations += u64::from(iterations);
        match status {
            SolveStatus::Converged => self.converged += 1,
            SolveStatus::Singular => self.singular += 1,
            SolveStatus::Exhausted => self.exhausted += 1,
        }
    }
}

impl AddAssign for RenderStats {
    fn add_assign(&mut self, rhs: Self) {
        self.inside += rhs.inside;
        self.converged += rhs.converged;
        self.singular += rhs.singular;
        self.exhausted += rhs.exhausted;
        self.iterations += rhs.iterations;
    }
}

/// Output of a completed pass
#[derive(Debug, Clone)]
pub struct Rendered {
    pub image: RasterImage,
    pub stats: RenderStats,
}

/// A quad bound to a destination canvas size
#[derive(Debug, Clone, Copy)]
pub struct Rectifier {
    quad: Quad,
    dst_width: u32,
    dst_height: u32,
}

impl Rectifier {
    pub fn new(quad: Quad, dst_width: u32, dst_height: u32) -> Self {
        Self {
            quad,
            dst_width,
            dst_height,
        }
    }

    /// Run a full pass. Rows are visited in order; `parallel` spreads them
    /// over the rayon pool with byte-identical output.
    ///
    /// `is_stale` is polled before every row. Once it returns true the pass
    /// is abandoned and `Ok(None)` comes back.
    pub fn render<F>(&self, source: &RasterImage, parallel: bool, is_stale: F) -> Result<Option<Rendered>>
    where
        F: Fn() -> bool + Sync,
    {
        let mut image = RasterImage::new(self.dst_width, self.dst_height)?;
        let stats = self.fill(&mut image, source, parallel, is_stale);
        Ok(stats.map(|stats| Rendered { image, stats }))
    }

    fn fill<F>(&self, image: &mut RasterImage, source: &RasterImage, parallel: bool, is_stale: F) -> Option<RenderStats>
    where
        F: Fn() -> bool + Sync,
    {
        let stride = image.stride();

        if parallel {
            let per_row: Option<Vec<RenderStats>> = image
                .as_raw_mut()
                .par_chunks_exact_mut(stride)
                .enumerate()
                .map(|(y, row)| {
                    if is_stale() {
                        None
                    } else {
                        Some(self.rectify_row(source, y as u32, row))
                    }
                })
                .collect();

            per_row.map(|rows| {
                rows.into_iter().fold(RenderStats::default(), |mut acc, s| {
                    acc += s;
                    acc
                })
            })
        } else {
            let mut stats = RenderStats::default();
            for (y, row) in image.as_raw_mut().chunks_exact_mut(stride).enumerate() {
                if is_stale() {
                    return None;
                }
                stats += self.rectify_row(source, y as u32, row);
            }
            Some(stats)
        }
    }

    /// Fill one destination row; pixels outside the quad are left as they are
    fn rectify_row(&self, source: &RasterImage, y: u32, row: &mut [u8]) -> RenderStats {
        let mut stats = RenderStats::default();

        for (x, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
            let point = Point::new(x as f64, y as f64);
            if !is_point_in_quad(point, &self.quad) {
                continue;
            }

            let solution = solve_uv_detailed(point, &self.quad);
            px.copy_from_slice(&sample_bilinear(source, solution.uv));
            stats.record(solution.status, solution.iterations);
        }

        stats
    }
}

/// Rectify `source` into a fresh `dst_width x dst_height` raster.
///
/// Pixels outside the quad stay fully transparent.
pub fn rectify(source: &RasterImage, quad: &Quad, dst_width: u32, dst_height: u32) -> Result<RasterImage> {
    let mut image = RasterImage::new(dst_width, dst_height)?;
    Rectifier::new(*quad, dst_width, dst_height).fill(&mut image, source, false, || false);
    Ok(image)
}

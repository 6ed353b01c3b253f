//! Inverse bilinear coordinate solver
//!
//! Finds the unit-square parameters `(u, v)` whose bilinear blend of the quad
//! corners reproduces a canvas point. The iteration is a damped
//! Newton-Raphson with a fixed budget; its exact constants show up in pixel
//! output, so they are part of the rendering contract.

use crate::geometry::{Point, Quad};

/// Iteration budget per pixel
pub const MAX_ITERATIONS: u32 = 10;

/// Residual below which a solution is accepted, in pixels (per axis)
pub const TOLERANCE: f64 = 0.1;

/// Jacobian determinant magnitude treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-10;

/// Step damping factor
pub const DAMPING: f64 = 0.5;

/// Normalised bilinear parameters, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uv {
    pub u: f64,
    pub v: f64,
}

impl Uv {
    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }
}

/// Why the solver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Residual fell inside the tolerance
    Converged,
    /// Jacobian collapsed; the estimate is whatever was reached
    Singular,
    /// Budget spent without meeting the tolerance
    Exhausted,
}

/// Solver result with diagnostics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    pub uv: Uv,
    /// Number of Newton updates applied
    pub iterations: u32,
    pub status: SolveStatus,
}

/// Solve for `(u, v)`. Never fails; degenerate input yields a clamped estimate.
#[inline]
pub fn solve_uv(point: Point, quad: &Quad) -> Uv {
    solve_uv_detailed(point, quad).uv
}

/// Solve for `(u, v)` and report how the iteration ended
pub fn solve_uv_detailed(point: Point, quad: &Quad) -> Solution {
    let tl = quad.top_left;
    let tr = quad.top_right;
    let bl = quad.bottom_left;
    let br = quad.bottom_right;

    let mut u = 0.5;
    let mut v = 0.5;
    let mut iterations = 0;

    for _ in 0..MAX_ITERATIONS {
        let current = quad.map(u, v);
        let dx = point.x - current.x;
        let dy = point.y - current.y;

        if dx.abs() < TOLERANCE && dy.abs() < TOLERANCE {
            return Solution {
                uv: Uv::new(u, v),
                iterations,
                status: SolveStatus::Converged,
            };
        }

        // Partial derivatives of the forward map
        let du_x = (tr.x - tl.x) * (1.0 - v) + (br.x - bl.x) * v;
        let du_y = (tr.y - tl.y) * (1.0 - v) + (br.y - bl.y) * v;
        let dv_x = (bl.x - tl.x) * (1.0 - u) + (br.x - tr.x) * u;
        let dv_y = (bl.y - tl.y) * (1.0 - u) + (br.y - tr.y) * u;

        let det = du_x * dv_y - dv_x * du_y;
        if det.abs() < SINGULAR_EPSILON {
            return Solution {
                uv: Uv::new(u, v),
                iterations,
                status: SolveStatus::Singular,
            };
        }

        let step_u = (dv_y * dx - dv_x * dy) / det;
        let step_v = (du_x * dy - du_y * dx) / det;

        u = (u + DAMPING * step_u).clamp(0.0, 1.0);
        v = (v + DAMPING * step_v).clamp(0.0, 1.0);
        iterations += 1;
    }

    Solution {
        uv: Uv::new(u, v),
        iterations,
        status: SolveStatus::Exhausted,
    }
}

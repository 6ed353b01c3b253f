//! Quadrilateral geometry
//!
//! Points live in destination-canvas pixel space. A [`Quad`] is the four
//! user-placed corners; nothing here enforces convexity or ordering, so a
//! bowtie or collapsed quad is valid input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp into the `[0,width] x [0,height]` canvas rectangle
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x: self.x.clamp(0.0, width as f64),
            y: self.y.clamp(0.0, height as f64),
        }
    }
}

impl FromStr for Point {
    type Err = String;

    /// Parse `"x,y"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected \"x,y\", got {:?}", s))?;
        let x = x.trim().parse::<f64>().map_err(|e| format!("bad x in {:?}: {}", s, e))?;
        let y = y.trim().parse::<f64>().map_err(|e| format!("bad y in {:?}: {}", s, e))?;
        Ok(Self::new(x, y))
    }
}

/// Semantic role of a quad corner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Corner::TopLeft => "Top Left",
            Corner::TopRight => "Top Right",
            Corner::BottomLeft => "Bottom Left",
            Corner::BottomRight => "Bottom Right",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::TopLeft => "top_left",
            Corner::TopRight => "top_right",
            Corner::BottomLeft => "bottom_left",
            Corner::BottomRight => "bottom_right",
        }
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Corner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_left" | "tl" | "0" => Ok(Corner::TopLeft),
            "top_right" | "tr" | "1" => Ok(Corner::TopRight),
            "bottom_left" | "bl" | "2" => Ok(Corner::BottomLeft),
            "bottom_right" | "br" | "3" => Ok(Corner::BottomRight),
            _ => Err(format!("unknown corner {:?}", s)),
        }
    }
}

/// Four corners with fixed roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_left: Point,
    pub bottom_right: Point,
}

impl Quad {
    pub fn new(top_left: Point, top_right: Point, bottom_left: Point, bottom_right: Point) -> Self {
        Self {
            top_left,
            top_right,
            bottom_left,
            bottom_right,
        }
    }

    /// Axis-aligned rectangle inset by `margin` on every side of a canvas.
    ///
    /// A margin wider than half the canvas collapses onto the centre line
    /// instead of producing an inverted rectangle.
    pub fn inset_rect(width: u32, height: u32, margin: f64) -> Self {
        let (w, h) = (width as f64, height as f64);
        let mx = margin.max(0.0).min(w / 2.0);
        let my = margin.max(0.0).min(h / 2.0);

        Self::new(
            Point::new(mx, my),
            Point::new(w - mx, my),
            Point::new(mx, h - my),
            Point::new(w - mx, h - my),
        )
    }

    pub fn corner(&self, corner: Corner) -> Point {
        match corner {
            Corner::TopLeft => self.top_left,
            Corner::TopRight => self.top_right,
            Corner::BottomLeft => self.bottom_left,
            Corner::BottomRight => self.bottom_right,
        }
    }

    /// Replace one corner, leaving the other three untouched
    pub fn set_corner(&mut self, corner: Corner, point: Point) {
        match corner {
            Corner::TopLeft => self.top_left = point,
            Corner::TopRight => self.top_right = point,
            Corner::BottomLeft => self.bottom_left = point,
            Corner::BottomRight => self.bottom_right = point,
        }
    }

    /// Corners in boundary order: TL, TR, BR, BL
    pub fn outline(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }

    /// Forward bilinear map from unit-square parameters to canvas space
    #[inline]
    pub fn map(&self, u: f64, v: f64) -> Point {
        let w00 = (1.0 - u) * (1.0 - v);
        let w10 = u * (1.0 - v);
        let w01 = (1.0 - u) * v;
        let w11 = u * v;

        Point::new(
            self.top_left.x * w00
                + self.top_right.x * w10
                + self.bottom_left.x * w01
                + self.bottom_right.x * w11,
            self.top_left.y * w00
                + self.top_right.y * w10
                + self.bottom_left.y * w01
                + self.bottom_right.y * w11,
        )
    }
}

/// Signed area of `p` against the directed edge `a -> b`
#[inline]
fn edge_side(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Half-plane point-in-quad test, boundary inclusive.
///
/// The point is inside when it lies on the same side of all four edges
/// TL->TR->BR->BL->TL. Bowtie quads get whatever this rule yields.
pub fn is_point_in_quad(point: Point, quad: &Quad) -> bool {
    let [a, b, c, d] = quad.outline();
    let sides = [
        edge_side(a, b, point),
        edge_side(b, c, point),
        edge_side(c, d, point),
        edge_side(d, a, point),
    ];

    sides.iter().all(|&s| s >= 0.0) || sides.iter().all(|&s| s <= 0.0)
}

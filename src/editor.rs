//! Corner editing state and revision-gated rendering
//!
//! Every mutation (corner drag, reset, resize, new source) bumps a revision
//! number. A render pass snapshots the revision it started from, abandons
//! itself as soon as a newer revision exists, and only commits its raster if
//! nothing newer has been committed in the meantime.

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{check_canvas, Config, Orientation};
use crate::error::Result;
use crate::geometry::{Corner, Point, Quad};
use crate::raster::{RasterImage, Rotation};
use crate::transform::{RenderStats, Rectifier};

/// A labeled corner handle for the UI
#[derive(Debug, Clone, Serialize)]
pub struct CornerHandle {
    pub corner: Corner,
    pub label: &'static str,
    pub x: f64,
    pub y: f64,
}

/// Get all corners as labeled UI handles
pub fn quad_to_handles(quad: &Quad) -> Vec<CornerHandle> {
    Corner::ALL
        .iter()
        .map(|&corner| {
            let p = quad.corner(corner);
            CornerHandle {
                corner,
                label: corner.label(),
                x: p.x,
                y: p.y,
            }
        })
        .collect()
}

/// A rendered raster together with the state it was rendered from
#[derive(Debug)]
pub struct Committed {
    pub revision: u64,
    pub quad: Quad,
    pub image: RasterImage,
    pub stats: RenderStats,
}

struct EditState {
    width: u32,
    height: u32,
    margin: f64,
    quad: Quad,
    source: Option<Arc<RasterImage>>,
    revision: u64,
}

/// Interactive quad editor bound to one canvas
pub struct Editor {
    state: RwLock<EditState>,
    /// Mirror of `state.revision`, polled by in-flight passes
    latest: AtomicU64,
    committed: ArcSwapOption<Committed>,
    parallel: bool,
    orientation: Orientation,
}

impl Editor {
    pub fn new(config: &Config) -> Self {
        let canvas = &config.canvas;
        let quad = config
            .quad
            .unwrap_or_else(|| Quad::inset_rect(canvas.width, canvas.height, canvas.margin));

        Self {
            state: RwLock::new(EditState {
                width: canvas.width,
                height: canvas.height,
                margin: canvas.margin,
                quad,
                source: None,
                revision: 0,
            }),
            latest: AtomicU64::new(0),
            committed: ArcSwapOption::empty(),
            parallel: config.render.parallel,
            orientation: config.render.orientation,
        }
    }

    pub fn quad(&self) -> Quad {
        self.state.read().quad
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.width, state.height)
    }

    pub fn revision(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn has_source(&self) -> bool {
        self.state.read().source.is_some()
    }

    /// Apply `f` under the write lock and publish a new revision
    fn mutate<F: FnOnce(&mut EditState)>(&self, f: F) -> u64 {
        let mut state = self.state.write();
        f(&mut state);
        state.revision += 1;
        self.latest.store(state.revision, Ordering::SeqCst);
        state.revision
    }

    /// Drag one corner. The point is clamped to the canvas; the other three
    /// corners are not touched.
    pub fn move_corner(&self, corner: Corner, point: Point) -> u64 {
        self.mutate(|state| {
            let clamped = point.clamp_to(state.width, state.height);
            state.quad.set_corner(corner, clamped);
        })
    }

    /// Replace all four corners
    pub fn set_quad(&self, quad: Quad) -> u64 {
        self.mutate(|state| {
            state.quad = Quad::new(
                quad.top_left.clamp_to(state.width, state.height),
                quad.top_right.clamp_to(state.width, state.height),
                quad.bottom_left.clamp_to(state.width, state.height),
                quad.bottom_right.clamp_to(state.width, state.height),
            );
        })
    }

    /// Restore the default inset rectangle
    pub fn reset(&self) -> u64 {
        self.mutate(|state| {
            state.quad = Quad::inset_rect(state.width, state.height, state.margin);
        })
    }

    /// Change the canvas size; the quad goes back to the default rectangle
    pub fn resize(&self, width: u32, height: u32) -> Result<u64> {
        check_canvas(width, height)?;
        Ok(self.mutate(|state| {
            state.width = width;
            state.height = height;
            state.quad = Quad::inset_rect(width, height, state.margin);
        }))
    }

    /// Install a new source raster, pre-rotated per the orientation setting.
    /// The rotation runs before the write lock is taken.
    pub fn set_source(&self, source: RasterImage) -> u64 {
        let rotation = match self.orientation {
            Orientation::Keep => Rotation::None,
            Orientation::Auto => {
                let (width, height) = self.canvas_size();
                Rotation::to_match(source.width(), source.height(), width, height)
            }
        };
        info!(
            "Source {}x{} installed (rotation: {:?})",
            source.width(),
            source.height(),
            rotation
        );
        let source = Arc::new(match rotation {
            Rotation::None => source,
            r => source.rotated(r),
        });
        self.mutate(move |state| state.source = Some(source))
    }

    /// Most recently committed render
    pub fn committed(&self) -> Option<Arc<Committed>> {
        self.committed.load_full()
    }

    /// Publish `candidate` unless a newer revision is already committed.
    /// Returns whether it was published.
    fn commit(&self, candidate: Arc<Committed>) -> bool {
        let revision = candidate.revision;
        let previous = self.committed.rcu(|current| match current {
            Some(c) if c.revision > revision => Some(c.clone()),
            _ => Some(candidate.clone()),
        });

        match previous {
            Some(newer) if newer.revision > revision => {
                debug!(
                    "Render of revision {} discarded, {} already committed",
                    revision, newer.revision
                );
                false
            }
            _ => true,
        }
    }

    /// Render the current state.
    ///
    /// Returns the committed result, or `None` when there is no source yet or
    /// the pass was overtaken by a newer revision.
    pub fn render(&self) -> Result<Option<Arc<Committed>>> {
        let (revision, quad, width, height, source) = {
            let state = self.state.read();
            let Some(source) = state.source.clone() else {
                return Ok(None);
            };
            (state.revision, state.quad, state.width, state.height, source)
        };

        let started = Instant::now();
        let rectifier = Rectifier::new(quad, width, height);
        let rendered = rectifier.render(&source, self.parallel, || {
            self.latest.load(Ordering::SeqCst) != revision
        })?;

        let Some(rendered) = rendered else {
            debug!("Render of revision {} abandoned (now {})", revision, self.revision());
            return Ok(None);
        };

        let stats = rendered.stats;
        let candidate = Arc::new(Committed {
            revision,
            quad,
            image: rendered.image,
            stats,
        });

        if !self.commit(candidate.clone()) {
            return Ok(None);
        }

        debug!(
            "Rendered revision {} at {}x{} in {:.1}ms: {} inside, {} converged, {} singular, {} exhausted, {} iterations",
            revision,
            width,
            height,
            started.elapsed().as_secs_f64() * 1000.0,
            stats.inside,
            stats.converged,
            stats.singular,
            stats.exhausted,
            stats.iterations
        );

        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_CANVAS_DIMENSION;
    use crate::error::RasterError;

    fn blank_commit(revision: u64) -> Arc<Committed> {
        Arc::new(Committed {
            revision,
            quad: Quad::inset_rect(40, 30, 0.0),
            image: RasterImage::new(40, 30).unwrap(),
            stats: RenderStats::default(),
        })
    }

    fn small_config() -> Config {
        let mut config = Config::default();
        config.canvas.width = 40;
        config.canvas.height = 30;
        config.canvas.margin = 5.0;
        config
    }

    #[test]
    fn test_default_quad_is_inset() {
        let editor = Editor::new(&small_config());
        assert_eq!(editor.quad(), Quad::inset_rect(40, 30, 5.0));
        assert_eq!(editor.revision(), 0);
        assert_eq!(quad_to_handles(&editor.quad()).len(), 4);
    }

    #[test]
    fn test_saved_quad_is_restored() {
        let mut config = small_config();
        let saved = Quad::new(
            Point::new(1.0, 1.0),
            Point::new(39.0, 2.0),
            Point::new(0.0, 29.0),
            Point::new(38.0, 28.0),
        );
        config.quad = Some(saved);
        assert_eq!(Editor::new(&config).quad(), saved);
    }

    #[test]
    fn test_move_corner_leaves_others_bit_identical() {
        let editor = Editor::new(&small_config());
        let before = editor.quad();

        let rev = editor.move_corner(Corner::TopRight, Point::new(33.3, 7.7));
        assert_eq!(rev, 1);

        let after = editor.quad();
        assert_eq!(after.top_right, Point::new(33.3, 7.7));
        for corner in [Corner::TopLeft, Corner::BottomLeft, Corner::BottomRight] {
            let (a, b) = (before.corner(corner), after.corner(corner));
            assert_eq!(a.x.to_bits(), b.x.to_bits());
            assert_eq!(a.y.to_bits(), b.y.to_bits());
        }
    }

    #[test]
    fn test_move_corner_clamps_to_canvas() {
        let editor = Editor::new(&small_config());
        editor.move_corner(Corner::BottomLeft, Point::new(-12.0, 99.0));
        assert_eq!(editor.quad().bottom_left, Point::new(0.0, 30.0));
    }

    #[test]
    fn test_reset_and_resize() {
        let editor = Editor::new(&small_config());
        editor.move_corner(Corner::TopLeft, Point::new(0.0, 0.0));
        editor.reset();
        assert_eq!(editor.quad(), Quad::inset_rect(40, 30, 5.0));

        editor.resize(100, 80).unwrap();
        assert_eq!(editor.canvas_size(), (100, 80));
        assert_eq!(editor.quad(), Quad::inset_rect(100, 80, 5.0));
        assert_eq!(editor.revision(), 3);

        assert!(editor.resize(0, 80).is_err());
        assert_eq!(editor.revision(), 3);
    }

    #[test]
    fn test_resize_rejects_oversized_canvas() {
        let editor = Editor::new(&small_config());
        editor.set_source(RasterImage::filled(4, 4, [0, 0, 255, 255]).unwrap());
        let before = editor.revision();

        assert!(matches!(
            editor.resize(u32::MAX, u32::MAX),
            Err(RasterError::TooLarge { .. })
        ));
        assert!(editor.resize(MAX_CANVAS_DIMENSION + 1, 10).is_err());
        assert_eq!(editor.canvas_size(), (40, 30));
        assert_eq!(editor.revision(), before);

        // The editor still renders at the old size
        let committed = editor.render().unwrap().unwrap();
        assert_eq!((committed.image.width(), committed.image.height()), (40, 30));
    }

    #[test]
    fn test_render_without_source() {
        let editor = Editor::new(&small_config());
        assert!(editor.render().unwrap().is_none());
        assert!(editor.committed().is_none());
    }

    #[test]
    fn test_render_commits_current_revision() {
        let editor = Editor::new(&small_config());
        editor.set_source(RasterImage::filled(8, 6, [0, 0, 255, 255]).unwrap());
        let rev = editor.move_corner(Corner::BottomRight, Point::new(30.0, 20.0));

        let committed = editor.render().unwrap().unwrap();
        assert_eq!(committed.revision, rev);
        assert_eq!(committed.quad, editor.quad());
        assert_eq!((committed.image.width(), committed.image.height()), (40, 30));
        assert_eq!(committed.image.pixel(10, 10), [0, 0, 255, 255]);
        assert_eq!(committed.image.pixel(0, 0), [0, 0, 0, 0]);
        assert!(committed.stats.inside > 0);

        let latest = editor.committed().unwrap();
        assert_eq!(latest.revision, rev);
    }

    #[test]
    fn test_older_revision_never_replaces_newer() {
        let editor = Editor::new(&small_config());
        editor.set_source(RasterImage::filled(4, 4, [9, 9, 9, 255]).unwrap());
        editor.move_corner(Corner::TopLeft, Point::new(2.0, 2.0));
        let newer = editor.render().unwrap().unwrap();

        // A pass from an earlier revision finishing late loses
        assert!(!editor.commit(blank_commit(newer.revision - 1)));
        assert_eq!(editor.committed().unwrap().revision, newer.revision);

        // Equal or later revisions go through
        assert!(editor.commit(blank_commit(newer.revision)));
        assert!(editor.commit(blank_commit(newer.revision + 1)));
        assert_eq!(editor.committed().unwrap().revision, newer.revision + 1);
    }

    #[test]
    fn test_render_behind_committed_revision_is_discarded() {
        let editor = Editor::new(&small_config());
        editor.set_source(RasterImage::filled(4, 4, [9, 9, 9, 255]).unwrap());
        let current = editor.move_corner(Corner::TopLeft, Point::new(2.0, 2.0));

        // Something newer than the editor's own state is already published
        assert!(editor.commit(blank_commit(current + 5)));

        assert!(editor.render().unwrap().is_none());
        assert_eq!(editor.committed().unwrap().revision, current + 5);
    }

    #[test]
    fn test_auto_orientation_rotates_portrait_source() {
        let mut config = small_config();
        config.render.orientation = Orientation::Auto;
        let editor = Editor::new(&config);

        editor.set_source(RasterImage::new(6, 10).unwrap());
        let committed = editor.render().unwrap().unwrap();
        assert_eq!(committed.revision, 1);

        let state = editor.state.read();
        let source = state.source.as_ref().unwrap();
        assert_eq!((source.width(), source.height()), (10, 6));
    }

    #[test]
    fn test_parallel_editor_matches_sequential() {
        let mut seq_config = small_config();
        seq_config.render.parallel = false;
        let mut par_config = small_config();
        par_config.render.parallel = true;

        let mut source = RasterImage::new(7, 5).unwrap();
        for y in 0..5 {
            for x in 0..7 {
                source.put_pixel(x, y, [(x * 30) as u8, (y * 50) as u8, 0, 255]);
            }
        }

        let seq = Editor::new(&seq_config);
        let par = Editor::new(&par_config);
        for editor in [&seq, &par] {
            editor.set_source(source.clone());
            editor.move_corner(Corner::TopRight, Point::new(36.0, 2.0));
        }

        let a = seq.render().unwrap().unwrap();
        let b = par.render().unwrap().unwrap();
        assert_eq!(a.image, b.image);
    }
}

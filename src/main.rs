//! drawerfit - quad rectification for drawer photos
//!
//! Takes a photo of a drawer and four corner points on a canvas, and warps
//! the photo into that quad with an inverse bilinear mapping. Runs either as
//! a one-shot file converter or as an HTTP service backing an interactive
//! corner editor.

mod config;
mod editor;
mod error;
mod geometry;
mod overlay;
mod raster;
mod server;
mod solver;
mod transform;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{Config, Orientation};
use crate::geometry::{Point, Quad};
use crate::raster::{Encoding, RasterImage, Rotation};
use crate::transform::{rectify, Rectifier};

/// drawerfit - rectify a drawer photo into a user-placed quad
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the corner editor API
    Serve {
        /// Web server host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Web server port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Rectify one image file and write the result
    Rectify {
        /// Source image (PNG or JPEG)
        #[arg(short, long)]
        input: PathBuf,

        /// Output image; the extension picks the container
        #[arg(short, long)]
        output: PathBuf,

        /// Corners as "x,y x,y x,y x,y" in TL TR BL BR order.
        /// Defaults to the saved quad, then the inset rectangle.
        #[arg(long)]
        corners: Option<String>,

        /// Canvas width (overrides config)
        #[arg(long)]
        width: Option<u32>,

        /// Canvas height (overrides config)
        #[arg(long)]
        height: Option<u32>,

        /// Default-rectangle margin (overrides config)
        #[arg(long)]
        margin: Option<f64>,

        /// Render rows in parallel
        #[arg(long)]
        parallel: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("drawerfit v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_create(&args.config)?;

    match args.command {
        Command::Serve { host, port } => serve(config, args.config, host, port),
        Command::Rectify {
            input,
            output,
            corners,
            width,
            height,
            margin,
            parallel,
        } => {
            let mut config = config;
            apply_canvas_overrides(&mut config, width, height, margin)?;
            config.render.parallel |= parallel;
            rectify_file(&config, &input, &output, corners.as_deref())
        }
    }
}

/// Apply CLI canvas overrides. A saved quad belongs to the canvas it was
/// placed on, so it is dropped when the size changes.
fn apply_canvas_overrides(
    config: &mut Config,
    width: Option<u32>,
    height: Option<u32>,
    margin: Option<f64>,
) -> Result<()> {
    let canvas = &mut config.canvas;
    let size = (width.unwrap_or(canvas.width), height.unwrap_or(canvas.height));
    if size != (canvas.width, canvas.height) {
        if config.quad.take().is_some() {
            info!("Canvas resized to {}x{}, ignoring saved quad", size.0, size.1);
        }
        canvas.width = size.0;
        canvas.height = size.1;
    }
    if let Some(m) = margin {
        canvas.margin = m;
    }
    canvas.validate().context("Invalid canvas size")?;
    Ok(())
}

fn serve(config: Config, config_path: PathBuf, host: Option<String>, port: Option<u16>) -> Result<()> {
    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );
    info!(
        "Canvas: {}x{} (margin {}px), parallel: {}",
        config.canvas.width, config.canvas.height, config.canvas.margin, config.render.parallel
    );

    let config = Arc::new(parking_lot::RwLock::new(config));
    let state = Arc::new(server::AppState::new(config, config_path));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    info!("Starting web server at http://{}", addr);
    runtime.block_on(server::run_server(&addr, state))
}

/// Parse `"x,y x,y x,y x,y"` in TL, TR, BL, BR order
fn parse_corners(s: &str) -> Result<Quad> {
    let points = s
        .split_whitespace()
        .map(|p| p.parse::<Point>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    match points.as_slice() {
        [tl, tr, bl, br] => Ok(Quad::new(*tl, *tr, *bl, *br)),
        _ => bail!("Expected 4 corners, got {}", points.len()),
    }
}

/// Pick the output container from the file extension
fn encoding_for(path: &Path, config: &Config) -> Encoding {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => Encoding::Jpeg {
            quality: config.export.jpeg_quality.clamp(1, 100),
        },
        Some("png") => Encoding::Png,
        _ => config.export.encoding(),
    }
}

fn rectify_file(config: &Config, input: &Path, output: &Path, corners: Option<&str>) -> Result<()> {
    let canvas = &config.canvas;
    let quad = match corners {
        Some(s) => parse_corners(s)?,
        None => config
            .quad
            .unwrap_or_else(|| Quad::inset_rect(canvas.width, canvas.height, canvas.margin)),
    };

    let bytes = std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let mut source =
        RasterImage::decode(&bytes).with_context(|| format!("Failed to decode {:?}", input))?;
    info!("Source: {}x{}", source.width(), source.height());

    if config.render.orientation == Orientation::Auto {
        let rotation = Rotation::to_match(source.width(), source.height(), canvas.width, canvas.height);
        if rotation != Rotation::None {
            info!("Rotating source {:?} to match canvas", rotation);
            source = source.rotated(rotation);
        }
    }

    let started = Instant::now();
    let image = if config.render.parallel {
        let rendered = Rectifier::new(quad, canvas.width, canvas.height)
            .render(&source, true, || false)?
            .context("Render was abandoned")?;
        info!(
            "{} pixels inside, {} unconverged",
            rendered.stats.inside,
            rendered.stats.singular + rendered.stats.exhausted
        );
        rendered.image
    } else {
        rectify(&source, &quad, canvas.width, canvas.height)?
    };
    info!(
        "Rectified to {}x{} in {:.1}ms",
        canvas.width,
        canvas.height,
        started.elapsed().as_secs_f64() * 1000.0
    );

    let bytes = image
        .encode(encoding_for(output, config))
        .with_context(|| format!("Failed to encode {:?}", output))?;
    std::fs::write(output, bytes).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Wrote {:?}", output);

    Ok(())
}

//! Configuration management for drawerfit

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error;
use crate::geometry::Quad;
use crate::raster::{check_size, Encoding};

/// Largest canvas side, in pixels
pub const MAX_CANVAS_DIMENSION: u32 = 8192;

/// Check a canvas size before anything is allocated for it
pub fn check_canvas(width: u32, height: u32) -> error::Result<()> {
    check_size(width, height, MAX_CANVAS_DIMENSION)
}

/// Destination canvas the quad is edited on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// Inset of the default rectangle from every canvas edge, in pixels
    pub margin: f64,
}

impl CanvasConfig {
    pub fn validate(&self) -> error::Result<()> {
        check_canvas(self.width, self.height)
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            margin: 50.0,
        }
    }
}

/// How an uploaded source is oriented before rectification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Use the source as decoded
    #[default]
    Keep,
    /// Quarter-turn portrait sources onto landscape canvases and vice versa
    Auto,
}

/// Rendering options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RenderConfig {
    /// Spread rows across the rayon pool
    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub orientation: Orientation,
}

/// Export container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    90
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl ExportConfig {
    pub fn encoding(&self) -> Encoding {
        match self.format {
            ExportFormat::Png => Encoding::Png,
            ExportFormat::Jpeg => Encoding::Jpeg {
                quality: self.jpeg_quality.clamp(1, 100),
            },
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub canvas: CanvasConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Last saved corner set; the default rectangle is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad: Option<Quad>,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            config
                .canvas
                .validate()
                .with_context(|| format!("Invalid canvas in {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

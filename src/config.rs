// SPDX-License-Identifier: MIT
//! Codec settings from the environment or a TOML file

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ShapefileError};
use crate::symbology::DEFAULT_POINT_SIZE;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Parent of scratch directories and spill files; system temp if unset
    pub scratch_dir: Option<PathBuf>,
    /// Write one shapefile per style reference
    pub split_on_style: bool,
    /// Reject sets whose projection is not WGS 84
    pub strict_datum: bool,
    /// Marker size written to `.shm` files at an icon scale of 1
    pub point_size: u32,
    /// Deflate archive entries instead of storing them
    pub compress_archives: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            split_on_style: false,
            strict_datum: false,
            point_size: DEFAULT_POINT_SIZE,
            compress_archives: true,
        }
    }
}

impl CodecConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scratch_dir: std::env::var("SHAPEFILE_SCRATCH_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            split_on_style: env_flag("SHAPEFILE_SPLIT_ON_STYLE").unwrap_or(defaults.split_on_style),
            strict_datum: env_flag("SHAPEFILE_STRICT_DATUM").unwrap_or(defaults.strict_datum),
            point_size: std::env::var("SHAPEFILE_POINT_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.point_size),
            compress_archives: env_flag("SHAPEFILE_COMPRESS_ARCHIVES")
                .unwrap_or(defaults.compress_archives),
        }
    }

    /// Parse TOML; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ShapefileError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ShapefileError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.scratch_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(ShapefileError::Config(format!(
                    "SHAPEFILE_SCRATCH_DIR {} is not a directory",
                    dir.display()
                )));
            }
        }
        if self.point_size == 0 || self.point_size > 255 {
            return Err(ShapefileError::Config(
                "SHAPEFILE_POINT_SIZE must be between 1 and 255".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

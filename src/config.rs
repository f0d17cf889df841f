// SPDX-License-Identifier: GPL-3.0-only

//! Persistent settings, stored as JSON in the user's config directory

use crate::backends::camera::{CameraPosition, CaptureConfig, SourceKind};
use crate::constants::APP_NAME;
use crate::constants::capture::{DEFAULT_FRAMERATE, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::constants::display::DEFAULT_REFRESH_HZ;
use crate::errors::{AppError, AppResult};
use crate::shaders::{FilterChain, FilterKind, FilterStage, KernelLibrary};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One configured filter stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSetting {
    /// Filter name, matched case-insensitively
    pub name: String,
    /// Initial parameter values; empty uses the filter's defaults
    #[serde(default)]
    pub values: Vec<f32>,
}

impl FilterSetting {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            name: kind.name().to_lowercase(),
            values: kind.default_factors().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hardware devices or test patterns
    pub source: SourceKind,
    /// Preferred camera
    pub camera_position: CameraPosition,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Capture and record a microphone track
    pub audio_enabled: bool,
    /// Preview refresh rate
    pub refresh_hz: u32,
    /// Filter chain, in order
    pub filters: Vec<FilterSetting>,
    /// Recordings directory; the data directory when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceKind::Device,
            camera_position: CameraPosition::Front,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
            audio_enabled: false,
            refresh_hz: DEFAULT_REFRESH_HZ,
            filters: vec![
                FilterSetting::new(FilterKind::Contrast),
                FilterSetting::new(FilterKind::Saturation),
                FilterSetting::new(FilterKind::Brightness),
            ],
            output_dir: None,
        }
    }
}

impl Config {
    /// `<config_dir>/filtercam/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`; a missing or invalid file yields the defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No config file, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> AppResult<()> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("no config directory".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Capture settings derived from this config
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            source: self.source,
            position: self.camera_position,
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            audio: self.audio_enabled,
        }
    }

    /// Directory new recordings are written to
    pub fn recordings_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(crate::storage::recordings_dir)
    }

    /// Build the filter chain in configured order.
    ///
    /// Unknown filter names are skipped. Configured values override the
    /// defaults index by index; extra values are ignored.
    pub fn build_filter_chain(&self, library: &KernelLibrary) -> FilterChain {
        let mut chain = FilterChain::new();

        for setting in &self.filters {
            let Some(stage) = FilterStage::by_name(&setting.name, library) else {
                warn!(name = %setting.name, "Unknown filter, skipping");
                continue;
            };

            let parameters = stage.parameters();
            for (index, value) in setting.values.iter().enumerate() {
                if !parameters.set(index, *value) {
                    warn!(filter = stage.name(), index, "Ignoring extra filter value");
                }
            }
            chain.push(stage);
        }

        chain
    }

    /// Set the initial value of the first filter named `name`, adding it if absent
    pub fn set_filter_value(&mut self, name: &str, value: f32) {
        match self
            .filters
            .iter_mut()
            .find(|filter| filter.name.eq_ignore_ascii_case(name))
        {
            Some(filter) if filter.values.is_empty() => filter.values.push(value),
            Some(filter) => filter.values[0] = value,
            None => self.filters.push(FilterSetting {
                name: name.to_lowercase(),
                values: vec![value],
            }),
        }
    }
}

// THEORY:
// `SorterConfig` gathers every tunable of the sorter in one place. It is read
// from a TOML file, every key is optional, and anything missing falls back to
// the values the sorting rig was tuned with.
//
// Geometry is validated here, at load time. A crop or region that could never
// contain a pixel is a configuration mistake and must not surface later as a
// silent stream of skipped frames.

use crate::core_modules::calibration::DEFAULT_SAMPLE_TARGET;
use crate::core_modules::color_classifier::ColorRangeTable;
use crate::core_modules::debounce_window::DEFAULT_WINDOW_SIZE;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Symmetric crop applied before the region is placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Fraction removed from the top and, again, from the bottom.
    pub top_bottom: f64,
    /// Fraction removed from the left and, again, from the right.
    pub left_right: f64,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            top_bottom: 0.2,
            left_right: 0.3,
        }
    }
}

impl CropConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("crop.top_bottom", self.top_bottom), ("crop.left_right", self.left_right)] {
            if !(0.0..0.5).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in [0, 0.5), got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Region of interest as fractions of the cropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            x1: 0.4,
            y1: 0.4,
            x2: 0.6,
            y2: 0.6,
        }
    }
}

impl RoiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("roi.x1", self.x1), ("roi.y1", self.y1), ("roi.x2", self.x2), ("roi.y2", self.y2)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(ConfigError::Invalid(format!(
                "roi is empty: ({}, {}) .. ({}, {})",
                self.x1, self.y1, self.x2, self.y2
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Number of unanimous samples needed to learn a background.
    pub sample_target: usize,
    /// How long a calibration run collects samples.
    pub timeout_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sample_target: DEFAULT_SAMPLE_TARGET,
            timeout_ms: 5_000,
        }
    }
}

impl CalibrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path of the actuator board, e.g. `/dev/ttyUSB0`.
    pub device: Option<PathBuf>,
    pub baud_rate: u32,
    /// Pause after opening the port; the board resets on connect.
    pub settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: 9600,
            settle_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub crop: CropConfig,
    pub roi: RoiConfig,
    /// Number of consecutive agreeing samples before a color settles.
    pub debounce_window: usize,
    pub calibration: CalibrationConfig,
    pub serial: SerialConfig,
    /// Capacity of the controller inbox. Samples arriving while it is full are dropped.
    pub sample_queue: usize,
    pub color_ranges: ColorRangeTable,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            crop: CropConfig::default(),
            roi: RoiConfig::default(),
            debounce_window: DEFAULT_WINDOW_SIZE,
            calibration: CalibrationConfig::default(),
            serial: SerialConfig::default(),
            sample_queue: 64,
            color_ranges: ColorRangeTable::default(),
        }
    }
}

impl SorterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SorterConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.crop.validate()?;
        self.roi.validate()?;
        if self.debounce_window == 0 {
            return Err(ConfigError::Invalid("debounce_window must be at least 1".into()));
        }
        if self.calibration.sample_target == 0 {
            return Err(ConfigError::Invalid("calibration.sample_target must be at least 1".into()));
        }
        if self.calibration.timeout_ms == 0 {
            return Err(ConfigError::Invalid("calibration.timeout_ms must be positive".into()));
        }
        if self.sample_queue == 0 {
            return Err(ConfigError::Invalid("sample_queue must be at least 1".into()));
        }
        self.color_ranges.validate().map_err(ConfigError::Invalid)
    }
}

// THEORY:
// Errors only exist at the I/O edges of the sorter: loading configuration,
// reading and writing the persisted settings, acquiring frames, and talking to
// the controller task. Classification, debouncing and the trigger decision are
// total functions and have no error type at all.
//
// Actuator write failures have no type here. A failed write is logged and
// reported as an event, never returned to the decision path (see
// `core_modules::actuator`).

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a `SorterConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by a `SettingsStore`.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no settings directory available on this platform")]
    NoSettingsDir,
}

/// Errors raised by a frame source. Any of these ends the sampling loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A mode transition that would break the triggering/calibrating exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("cannot calibrate while triggering is enabled")]
    TriggeringActive,
    #[error("cannot start triggering while calibrating")]
    CalibrationActive,
}

/// Errors seen by holders of a `SorterHandle`.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error("sorter controller has shut down")]
    Closed,
}

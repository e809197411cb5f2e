//! # Configuration Error Types
//!
//! All errors that can occur while loading or validating a terrain config.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by [`crate::config::TerrainConfig`] loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML document is malformed or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A size parameter is zero, negative or not finite.
    #[error("invalid dimension: {0}")]
    InvalidDimension(&'static str),

    /// No biome definitions were supplied.
    #[error("biome table is empty")]
    EmptyBiomeTable,

    /// No detail-level presets were supplied.
    #[error("detail-level table is empty")]
    EmptyDetailLevels,

    /// Preset thresholds must be strictly ascending.
    #[error("detail-level preset {index} does not have a larger threshold than its predecessor")]
    NonAscendingThresholds {
        /// Index of the offending preset.
        index: usize,
    },

    /// A farther preset selects a finer display level than a closer one.
    #[error("detail-level preset {index} is finer than a closer preset")]
    NonMonotonicLevels {
        /// Index of the offending preset.
        index: usize,
    },

    /// A preset references a detail level that has no stride.
    #[error("detail level {level} has no stride (table has {available} entries)")]
    UnknownDetailLevel {
        /// Referenced level.
        level: u32,
        /// Size of the stride table.
        available: usize,
    },

    /// A stride does not evenly divide the interior resolution.
    #[error("stride {stride} does not divide interior resolution {resolution}")]
    StrideMismatch {
        /// Offending stride.
        stride: u32,
        /// Interior resolution.
        resolution: u32,
    },

    /// A remap curve is not monotonic or has too few keys.
    #[error("biome '{biome}' has an invalid remap curve")]
    InvalidCurve {
        /// Name of the biome.
        biome: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

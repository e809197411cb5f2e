//! # Tessera Shared
//!
//! Common types used by both the authority and remote viewers.
//!
//! ## Contents
//!
//! - [`math`]: plane and vertex vectors, world rects
//! - [`config`]: the TOML-backed [`TerrainConfig`]
//! - [`constants`]: defaults and wire-format identifiers
//! - [`error`]: [`ConfigError`]

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod math;

pub use config::{
    BiomeDefinition, BiomeLayer, ClassifierSettings, DetailLevelPreset, FractalKind, NoiseKind,
    NoiseSettings, RemapCurve, StreamingSettings, TerrainConfig,
};
pub use constants::{
    MAX_BIOME_COUNT, MAX_DETAIL_LEVELS, MAX_INTERIOR_RESOLUTION, MAX_PAYLOAD_BODY_BYTES,
    PAYLOAD_MAGIC, PAYLOAD_VERSION, TICK_RATE,
};
pub use error::{ConfigError, ConfigResult};
pub use math::{Rect, Vec2, Vec3};

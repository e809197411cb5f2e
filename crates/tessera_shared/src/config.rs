//! # Terrain Configuration
//!
//! Everything the authority needs to generate and stream terrain, loaded
//! once at startup from TOML and read-only afterwards.
//!
//! ```toml
//! seed = 42
//! tile_size = 100.0
//! interior_resolution = 64
//! blend_margin = 2
//! detail_strides = [1, 2, 4, 8]
//!
//! [[biomes]]
//! name = "plains"
//! base_height = 0.0
//! height_multiplier = 6.0
//!
//! [[detail_levels]]
//! view_distance_threshold = 150.0
//! display_level = 0
//! collision_level = 1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BLEND_MARGIN, DEFAULT_DETAIL_STRIDES, DEFAULT_INTERIOR_RESOLUTION,
    DEFAULT_TILE_SIZE, DEFAULT_WORLD_SEED, EVICTION_SLACK_TILES, MAX_BIOME_COUNT,
    MAX_DETAIL_LEVELS, MAX_INTERIOR_RESOLUTION, TICK_RATE, WORKER_IDLE_POLL_MS,
};
use crate::error::{ConfigError, ConfigResult};

/// Base noise algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseKind {
    /// OpenSimplex2 gradient noise.
    #[default]
    OpenSimplex2,
    /// Smoother, slower OpenSimplex2 variant.
    OpenSimplex2S,
    /// Classic Perlin noise.
    Perlin,
    /// Value noise.
    Value,
    /// Cubic-interpolated value noise.
    ValueCubic,
    /// Cellular (Worley) noise.
    Cellular,
}

/// Fractal layering mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FractalKind {
    /// Single octave.
    None,
    /// Fractal Brownian motion.
    #[default]
    Fbm,
    /// Ridged multifractal (mountain ridges).
    Ridged,
    /// Ping-pong fractal (terraces).
    PingPong,
}

/// Fractal noise parameters for one generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    /// Base algorithm.
    pub noise: NoiseKind,
    /// Fractal mode.
    pub fractal: FractalKind,
    /// Base frequency (world units⁻¹).
    pub frequency: f32,
    /// Number of octaves.
    pub octaves: u32,
    /// Amplitude decay per octave.
    pub gain: f32,
    /// Frequency growth per octave.
    pub lacunarity: f32,
    /// Mixed into the world seed so biomes get independent streams.
    pub seed_offset: u64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            noise: NoiseKind::OpenSimplex2,
            fractal: FractalKind::Fbm,
            frequency: 0.005,
            octaves: 4,
            gain: 0.5,
            lacunarity: 2.0,
            seed_offset: 0,
        }
    }
}

/// Monotonic piecewise-linear remap applied to a `[-1, 1]` noise value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemapCurve {
    /// `[input, output]` keys with strictly ascending inputs.
    pub keys: Vec<[f32; 2]>,
}

impl RemapCurve {
    /// Creates a curve from keys.
    #[must_use]
    pub fn new(keys: Vec<[f32; 2]>) -> Self {
        Self { keys }
    }

    /// Returns true if the curve has at least two keys, strictly ascending
    /// inputs and non-decreasing outputs.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.keys.len() >= 2
            && self
                .keys
                .windows(2)
                .all(|w| w[1][0] > w[0][0] && w[1][1] >= w[0][1])
    }

    /// Evaluates the curve, clamping outside the key range.
    #[must_use]
    pub fn evaluate(&self, t: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return t;
        };
        if t <= first[0] {
            return first[1];
        }
        for w in self.keys.windows(2) {
            let (a, b) = (w[0], w[1]);
            if t <= b[0] {
                let span = b[0] - a[0];
                let f = if span > 0.0 { (t - a[0]) / span } else { 0.0 };
                return a[1] + (b[1] - a[1]) * f;
            }
        }
        self.keys.last().map_or(t, |k| k[1])
    }
}

/// A height band used by the material layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiomeLayer {
    /// RGBA tint.
    pub color: [f32; 4],
    /// Optional texture name resolved by the presentation layer.
    #[serde(default)]
    pub texture: Option<String>,
    /// Height where this band starts.
    pub start_height: f32,
    /// Width of the transition into this band.
    #[serde(default)]
    pub blend_width: f32,
}

/// Immutable per-biome generation config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiomeDefinition {
    /// Human readable name.
    pub name: String,
    /// Elevation at noise value 0.
    #[serde(default)]
    pub base_height: f32,
    /// Elevation change per unit of noise.
    #[serde(default)]
    pub height_multiplier: f32,
    /// Optional monotonic remap applied before scaling.
    #[serde(default)]
    pub remap: Option<RemapCurve>,
    /// Height noise.
    #[serde(default)]
    pub noise: NoiseSettings,
    /// Height bands, lowest first.
    #[serde(default)]
    pub layers: Vec<BiomeLayer>,
}

impl BiomeDefinition {
    /// A biome with constant elevation.
    #[must_use]
    pub fn flat(name: &str, height: f32) -> Self {
        Self {
            name: name.to_owned(),
            base_height: height,
            height_multiplier: 0.0,
            remap: None,
            noise: NoiseSettings::default(),
            layers: Vec::new(),
        }
    }

    /// Maps a raw `[-1, 1]` noise value to elevation.
    #[inline]
    #[must_use]
    pub fn shape(&self, value: f32) -> f32 {
        let v = self.remap.as_ref().map_or(value, |c| c.evaluate(value));
        self.base_height + v * self.height_multiplier
    }

    /// Blend strength of every layer at `height`; the weights sum to 1.
    ///
    /// Later layers draw over earlier ones once the height enters their
    /// band. The first layer is the base coat.
    #[must_use]
    pub fn layer_weights(&self, height: f32) -> Vec<f32> {
        let mut weights = vec![0.0; self.layers.len()];
        for (i, layer) in self.layers.iter().enumerate() {
            let strength = if i == 0 {
                1.0
            } else {
                let half = layer.blend_width * 0.5;
                let t = (height - layer.start_height + half) / (layer.blend_width + 1e-4);
                t.clamp(0.0, 1.0)
            };
            for w in &mut weights[..i] {
                *w *= 1.0 - strength;
            }
            weights[i] = strength;
        }
        weights
    }
}

/// Biome classification (cellular noise behind a domain warp).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Mixed into the world seed.
    pub seed_offset: u64,
    /// Cell frequency.
    pub frequency: f32,
    /// Cell point jitter.
    pub jitter: f32,
    /// Domain warp amplitude in world units.
    pub warp_amplitude: f32,
    /// Domain warp frequency.
    pub warp_frequency: f32,
    /// Number of classes; defaults to the biome table size.
    pub biome_count: Option<u32>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            seed_offset: 1,
            frequency: 0.002,
            jitter: 1.0,
            warp_amplitude: 30.0,
            warp_frequency: 0.005,
            biome_count: None,
        }
    }
}

/// One row of the distance → detail-level table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailLevelPreset {
    /// Tiles closer than this use this preset.
    pub view_distance_threshold: f32,
    /// Detail level of the renderable mesh.
    pub display_level: u32,
    /// Detail level of the collision mesh.
    pub collision_level: u32,
}

impl DetailLevelPreset {
    /// Creates a preset.
    #[must_use]
    pub const fn new(view_distance_threshold: f32, display_level: u32, collision_level: u32) -> Self {
        Self {
            view_distance_threshold,
            display_level,
            collision_level,
        }
    }
}

/// Background pipeline and eviction tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Worker idle poll interval.
    pub idle_poll_ms: u64,
    /// Rings kept resident beyond the load radius before eviction.
    pub eviction_slack_tiles: u32,
    /// Upper bound on evictions per call.
    pub max_evictions_per_tick: usize,
    /// Authority update rate.
    pub tick_rate: u32,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            idle_poll_ms: WORKER_IDLE_POLL_MS,
            eviction_slack_tiles: EVICTION_SLACK_TILES,
            max_evictions_per_tick: 8,
            tick_rate: TICK_RATE,
        }
    }
}

/// Complete terrain configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// World seed.
    pub seed: u64,
    /// Tile edge length in world units.
    pub tile_size: f32,
    /// Cells across a tile interior.
    pub interior_resolution: u32,
    /// Border samples used for blending.
    pub blend_margin: u32,
    /// Vertex stride per detail level, finest first.
    pub detail_strides: Vec<u32>,
    /// Biome classifier.
    pub classifier: ClassifierSettings,
    /// Biome table, indexed by classification.
    pub biomes: Vec<BiomeDefinition>,
    /// Distance → detail-level table, ascending.
    pub detail_levels: Vec<DetailLevelPreset>,
    /// Pipeline tuning.
    pub streaming: StreamingSettings,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_WORLD_SEED,
            tile_size: DEFAULT_TILE_SIZE,
            interior_resolution: DEFAULT_INTERIOR_RESOLUTION,
            blend_margin: DEFAULT_BLEND_MARGIN,
            detail_strides: DEFAULT_DETAIL_STRIDES.to_vec(),
            classifier: ClassifierSettings::default(),
            biomes: default_biomes(),
            detail_levels: vec![
                DetailLevelPreset::new(150.0, 0, 1),
                DetailLevelPreset::new(300.0, 1, 2),
                DetailLevelPreset::new(600.0, 3, 3),
            ],
            streaming: StreamingSettings::default(),
        }
    }
}

fn default_biomes() -> Vec<BiomeDefinition> {
    let grass = BiomeLayer {
        color: [0.32, 0.52, 0.22, 1.0],
        texture: Some("grass".to_owned()),
        start_height: 0.0,
        blend_width: 0.0,
    };
    let rock = BiomeLayer {
        color: [0.45, 0.42, 0.40, 1.0],
        texture: Some("rock".to_owned()),
        start_height: 25.0,
        blend_width: 10.0,
    };
    let snow = BiomeLayer {
        color: [0.95, 0.95, 0.97, 1.0],
        texture: Some("snow".to_owned()),
        start_height: 70.0,
        blend_width: 12.0,
    };
    vec![
        BiomeDefinition {
            name: "plains".to_owned(),
            base_height: 2.0,
            height_multiplier: 6.0,
            remap: None,
            noise: NoiseSettings {
                frequency: 0.004,
                octaves: 3,
                seed_offset: 10,
                ..NoiseSettings::default()
            },
            layers: vec![grass.clone()],
        },
        BiomeDefinition {
            name: "hills".to_owned(),
            base_height: 12.0,
            height_multiplier: 22.0,
            remap: None,
            noise: NoiseSettings {
                frequency: 0.006,
                octaves: 4,
                seed_offset: 11,
                ..NoiseSettings::default()
            },
            layers: vec![grass.clone(), rock.clone()],
        },
        BiomeDefinition {
            name: "mountains".to_owned(),
            base_height: 40.0,
            height_multiplier: 60.0,
            remap: Some(RemapCurve::new(vec![[-1.0, -0.4], [0.0, 0.0], [1.0, 1.0]])),
            noise: NoiseSettings {
                fractal: FractalKind::Ridged,
                frequency: 0.005,
                octaves: 5,
                seed_offset: 12,
                ..NoiseSettings::default()
            },
            layers: vec![grass, rock, snow],
        },
    ]
}

impl TerrainConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and a validation
    /// error if the values are inconsistent.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn from_toml_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.tile_size.is_finite() && self.tile_size > 0.0) {
            return Err(ConfigError::InvalidDimension("tile_size must be positive"));
        }
        if self.interior_resolution == 0 {
            return Err(ConfigError::InvalidDimension("interior_resolution must be non-zero"));
        }
        if self.blend_margin == 0 {
            return Err(ConfigError::InvalidDimension("blend_margin must be at least 1"));
        }
        if self.interior_resolution > MAX_INTERIOR_RESOLUTION {
            return Err(ConfigError::InvalidDimension("interior_resolution is too large"));
        }
        if self.blend_margin > self.interior_resolution {
            return Err(ConfigError::InvalidDimension(
                "blend_margin must not exceed interior_resolution",
            ));
        }
        if self.biome_count() > MAX_BIOME_COUNT as usize {
            return Err(ConfigError::InvalidDimension("too many biome classes"));
        }
        if self.detail_strides.is_empty() || self.detail_strides.len() > MAX_DETAIL_LEVELS {
            return Err(ConfigError::InvalidDimension("detail_strides must hold 1 to 8 entries"));
        }
        if self.biomes.is_empty() {
            return Err(ConfigError::EmptyBiomeTable);
        }
        if self.detail_levels.is_empty() {
            return Err(ConfigError::EmptyDetailLevels);
        }
        for biome in &self.biomes {
            if biome.remap.as_ref().is_some_and(|c| !c.is_monotonic()) {
                return Err(ConfigError::InvalidCurve {
                    biome: biome.name.clone(),
                });
            }
        }
        for &stride in &self.detail_strides {
            if stride == 0 || self.interior_resolution % stride != 0 {
                return Err(ConfigError::StrideMismatch {
                    stride,
                    resolution: self.interior_resolution,
                });
            }
        }
        for (index, preset) in self.detail_levels.iter().enumerate() {
            for level in [preset.display_level, preset.collision_level] {
                if level as usize >= self.detail_strides.len() {
                    return Err(ConfigError::UnknownDetailLevel {
                        level,
                        available: self.detail_strides.len(),
                    });
                }
            }
            if index > 0 {
                let prev = &self.detail_levels[index - 1];
                if preset.view_distance_threshold <= prev.view_distance_threshold {
                    return Err(ConfigError::NonAscendingThresholds { index });
                }
                if preset.display_level < prev.display_level {
                    return Err(ConfigError::NonMonotonicLevels { index });
                }
            }
        }
        Ok(())
    }

    /// Sample points across the interior, both shared edges included.
    #[inline]
    #[must_use]
    pub const fn mesh_resolution(&self) -> usize {
        self.interior_resolution as usize + 1
    }

    /// Samples per side of a tile's data buffers.
    #[inline]
    #[must_use]
    pub const fn data_size(&self) -> usize {
        self.mesh_resolution() + 2 * self.blend_margin as usize
    }

    /// World distance between adjacent samples.
    #[inline]
    #[must_use]
    pub fn cell_size(&self) -> f32 {
        self.tile_size / self.interior_resolution as f32
    }

    /// Number of biome classes produced by the classifier.
    #[must_use]
    pub fn biome_count(&self) -> usize {
        self.classifier
            .biome_count
            .map_or(self.biomes.len(), |n| n as usize)
            .max(1)
    }

    /// Vertex stride of a detail level.
    #[must_use]
    pub fn stride_for(&self, level: u32) -> Option<u32> {
        self.detail_strides.get(level as usize).copied()
    }

    /// Every detail level any preset references, ascending and unique.
    #[must_use]
    pub fn referenced_levels(&self) -> Vec<u32> {
        let mut levels: Vec<u32> = self
            .detail_levels
            .iter()
            .flat_map(|p| [p.display_level, p.collision_level])
            .collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// Ring radius in tiles needed to cover the farthest threshold.
    #[must_use]
    pub fn load_radius_tiles(&self) -> i32 {
        let farthest = self
            .detail_levels
            .last()
            .map_or(0.0, |p| p.view_distance_threshold);
        (farthest / self.tile_size).ceil().max(0.0) as i32
    }
}

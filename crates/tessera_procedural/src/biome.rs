//! # Biome Field
//!
//! Deterministic mapping from a world coordinate to `(biome, elevation)`.
//!
//! Classification uses warped cellular noise: every Voronoi cell carries one
//! value in `[-1, 1]`, remapped linearly to `[0, biome_count - 1]` and
//! rounded. Each biome then owns an independent fractal generator whose
//! output is shaped by the biome's remap curve, base height and multiplier.
//!
//! The field has no mutable state after construction and is shared between
//! worker threads behind an `Arc`.

use tessera_shared::{BiomeDefinition, ClassifierSettings, TerrainConfig};

use crate::noise::{FractalNoise, WarpedCellNoise, WorldSeed};

/// Biome index as stored in a tile's biome map.
pub type BiomeId = u16;

/// Result of sampling the field at one coordinate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSample {
    /// Classified biome.
    pub biome: BiomeId,
    /// Elevation, `None` if the biome has no definition.
    pub height: Option<f32>,
}

/// One biome's definition plus its height generator.
#[derive(Debug)]
struct BiomeGenerator {
    definition: BiomeDefinition,
    noise: FractalNoise,
}

/// Pure function world coordinate → biome and elevation.
#[derive(Debug)]
pub struct BiomeField {
    classifier: WarpedCellNoise,
    biome_count: usize,
    generators: Vec<BiomeGenerator>,
    min_height: f32,
    max_height: f32,
}

impl BiomeField {
    /// Builds a field from explicit parts.
    ///
    /// `biome_count` may exceed `biomes.len()`; indices without a definition
    /// then classify but have no height (see [`Self::height_for`]).
    #[must_use]
    pub fn new(
        seed: WorldSeed,
        classifier: &ClassifierSettings,
        biomes: &[BiomeDefinition],
        biome_count: usize,
    ) -> Self {
        let generators: Vec<BiomeGenerator> = biomes
            .iter()
            .map(|definition| BiomeGenerator {
                noise: FractalNoise::new(seed, &definition.noise),
                definition: definition.clone(),
            })
            .collect();

        // Evaluated once from the noise range endpoints.
        let (min_height, max_height) = generators.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), g| {
                let a = g.definition.shape(-1.0);
                let b = g.definition.shape(1.0);
                (lo.min(a.min(b)), hi.max(a.max(b)))
            },
        );

        Self {
            classifier: WarpedCellNoise::new(seed, classifier),
            biome_count: biome_count.max(1),
            generators,
            min_height: if min_height.is_finite() { min_height } else { 0.0 },
            max_height: if max_height.is_finite() { max_height } else { 0.0 },
        }
    }

    /// Builds the field described by a terrain config.
    #[must_use]
    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(
            WorldSeed::new(config.seed),
            &config.classifier,
            &config.biomes,
            config.biome_count(),
        )
    }

    /// Number of classes the classifier produces.
    #[inline]
    #[must_use]
    pub fn biome_count(&self) -> usize {
        self.biome_count
    }

    /// Definition of a biome, if registered.
    #[must_use]
    pub fn definition(&self, biome: BiomeId) -> Option<&BiomeDefinition> {
        self.generators.get(usize::from(biome)).map(|g| &g.definition)
    }

    /// Lowest elevation any biome can produce.
    #[inline]
    #[must_use]
    pub fn min_physical_height(&self) -> f32 {
        self.min_height
    }

    /// Highest elevation any biome can produce.
    #[inline]
    #[must_use]
    pub fn max_physical_height(&self) -> f32 {
        self.max_height
    }

    /// Classifies the biome at world coordinates.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn classify(&self, x: f64, y: f64) -> BiomeId {
        if self.biome_count == 1 {
            return 0;
        }
        let value = self.classifier.sample(x, y);
        let top = (self.biome_count - 1) as f32;
        let index = ((value + 1.0) * 0.5 * top).round().clamp(0.0, top);
        index as BiomeId
    }

    /// Elevation of `biome` at world coordinates, `None` if the biome is
    /// not registered.
    #[inline]
    #[must_use]
    pub fn height_for(&self, biome: BiomeId, x: f64, y: f64) -> Option<f32> {
        self.generators
            .get(usize::from(biome))
            .map(|g| g.definition.shape(g.noise.sample(x, y)))
    }

    /// Classifies and samples in one call.
    #[must_use]
    pub fn sample(&self, x: f64, y: f64) -> FieldSample {
        let biome = self.classify(x, y);
        FieldSample {
            biome,
            height: self.height_for(biome, x, y),
        }
    }
}

//! # Noise Generators
//!
//! Deterministic noise built on `fastnoise-lite`.
//!
//! ## Determinism Guarantee
//!
//! Given the same `WorldSeed` and settings, every generator returns
//! **exactly** the same value for the same coordinate, on any worker thread,
//! in any session. Tiles generated independently rely on this to agree at
//! their shared borders.

use fastnoise_lite::{
    CellularDistanceFunction, CellularReturnType, DomainWarpType, FastNoiseLite, FractalType,
    NoiseType,
};
use tessera_shared::{ClassifierSettings, FractalKind, NoiseKind, NoiseSettings};

/// World seed for deterministic generation.
///
/// All procedural generation derives from this seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorldSeed(u64);

impl WorldSeed {
    /// Creates a new world seed.
    #[inline]
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Returns the raw seed value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Derives a sub-seed for a specific purpose (e.g., one biome's height).
    ///
    /// Uses a hash function to create independent streams from one seed.
    #[inline]
    #[must_use]
    pub const fn derive(self, purpose: u64) -> Self {
        // FNV-1a hash mixing
        let mut hash = self.0;
        hash ^= purpose;
        hash = hash.wrapping_mul(0x517c_c1b7_2722_0a95);
        hash ^= hash >> 32;
        Self(hash)
    }

    /// Folds the seed into the 32-bit seed `fastnoise-lite` expects.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub const fn noise_seed(self) -> i32 {
        (self.0 ^ (self.0 >> 32)) as i32
    }
}

impl Default for WorldSeed {
    fn default() -> Self {
        Self(tessera_shared::constants::DEFAULT_WORLD_SEED)
    }
}

const fn noise_type(kind: NoiseKind) -> NoiseType {
    match kind {
        NoiseKind::OpenSimplex2 => NoiseType::OpenSimplex2,
        NoiseKind::OpenSimplex2S => NoiseType::OpenSimplex2S,
        NoiseKind::Perlin => NoiseType::Perlin,
        NoiseKind::Value => NoiseType::Value,
        NoiseKind::ValueCubic => NoiseType::ValueCubic,
        NoiseKind::Cellular => NoiseType::Cellular,
    }
}

const fn fractal_type(kind: FractalKind) -> FractalType {
    match kind {
        FractalKind::None => FractalType::None,
        FractalKind::Fbm => FractalType::FBm,
        FractalKind::Ridged => FractalType::Ridged,
        FractalKind::PingPong => FractalType::PingPong,
    }
}

/// Fractal height noise for one biome.
///
/// Produces values in `[-1, 1]`.
pub struct FractalNoise {
    inner: FastNoiseLite,
    seed: i32,
    frequency: f32,
}

impl FractalNoise {
    /// Creates a generator from settings; `settings.seed_offset` is mixed
    /// into the world seed.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn new(seed: WorldSeed, settings: &NoiseSettings) -> Self {
        let noise_seed = seed.derive(settings.seed_offset).noise_seed();
        let mut inner = FastNoiseLite::with_seed(noise_seed);
        inner.set_noise_type(Some(noise_type(settings.noise)));
        inner.set_frequency(Some(settings.frequency));
        inner.set_fractal_type(Some(fractal_type(settings.fractal)));
        inner.set_fractal_octaves(Some(settings.octaves.max(1) as i32));
        inner.set_fractal_gain(Some(settings.gain));
        inner.set_fractal_lacunarity(Some(settings.lacunarity));
        Self {
            inner,
            seed: noise_seed,
            frequency: settings.frequency,
        }
    }

    /// Samples the noise at world coordinates.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(&self, x: f64, y: f64) -> f32 {
        self.inner.get_noise_2d(x as f32, y as f32).clamp(-1.0, 1.0)
    }
}

impl std::fmt::Debug for FractalNoise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FractalNoise")
            .field("seed", &self.seed)
            .field("frequency", &self.frequency)
            .finish_non_exhaustive()
    }
}

/// Cellular noise sampled through a domain warp.
///
/// Every Voronoi cell returns one constant value in `[-1, 1]`; the warp
/// bends the cell borders so biomes do not look like polygons.
pub struct WarpedCellNoise {
    warp: FastNoiseLite,
    cells: FastNoiseLite,
    settings: ClassifierSettings,
}

impl WarpedCellNoise {
    /// Creates the classifier noise.
    #[must_use]
    pub fn new(seed: WorldSeed, settings: &ClassifierSettings) -> Self {
        let cell_seed = seed.derive(settings.seed_offset);

        let mut warp = FastNoiseLite::with_seed(cell_seed.derive(0x5741_5250).noise_seed());
        warp.set_domain_warp_type(Some(DomainWarpType::OpenSimplex2));
        warp.set_domain_warp_amp(Some(settings.warp_amplitude));
        warp.set_frequency(Some(settings.warp_frequency));

        let mut cells = FastNoiseLite::with_seed(cell_seed.noise_seed());
        cells.set_noise_type(Some(NoiseType::Cellular));
        cells.set_frequency(Some(settings.frequency));
        cells.set_cellular_distance_function(Some(CellularDistanceFunction::Euclidean));
        cells.set_cellular_return_type(Some(CellularReturnType::CellValue));
        cells.set_cellular_jitter(Some(settings.jitter));

        Self {
            warp,
            cells,
            settings: settings.clone(),
        }
    }

    /// Samples the warped cell value at world coordinates.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(&self, x: f64, y: f64) -> f32 {
        let (wx, wy) = self.warp.domain_warp_2d(x as f32, y as f32);
        self.cells.get_noise_2d(wx, wy).clamp(-1.0, 1.0)
    }
}

impl std::fmt::Debug for WarpedCellNoise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarpedCellNoise")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

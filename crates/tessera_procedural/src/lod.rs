//! # Detail-Level Selection
//!
//! Maps viewer distance to the display and collision detail levels of a
//! tile. Presets are ordered by ascending threshold; the last preset covers
//! everything beyond the table.

use tessera_shared::{DetailLevelPreset, TerrainConfig};

/// Distance → detail-level table plus the stride of every level.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailLevelTable {
    presets: Vec<DetailLevelPreset>,
    strides: Vec<u32>,
}

impl DetailLevelTable {
    /// Creates a table. `presets` must be non-empty and ascending.
    #[must_use]
    pub fn new(presets: Vec<DetailLevelPreset>, strides: Vec<u32>) -> Self {
        Self { presets, strides }
    }

    /// Table described by a terrain config.
    #[must_use]
    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(config.detail_levels.clone(), config.detail_strides.clone())
    }

    /// Presets, ascending by threshold.
    #[inline]
    #[must_use]
    pub fn presets(&self) -> &[DetailLevelPreset] {
        &self.presets
    }

    /// Preset for a viewer at `distance`: the first whose threshold exceeds
    /// the distance, else the last.
    #[must_use]
    pub fn select(&self, distance: f32) -> Option<&DetailLevelPreset> {
        self.presets
            .iter()
            .find(|p| p.view_distance_threshold > distance)
            .or_else(|| self.presets.last())
    }

    /// Display level for a viewer at `distance`.
    #[inline]
    #[must_use]
    pub fn select_level(&self, distance: f32) -> u32 {
        self.select(distance).map_or(0, |p| p.display_level)
    }

    /// Collision level for a viewer at `distance`.
    #[inline]
    #[must_use]
    pub fn select_collision_level(&self, distance: f32) -> u32 {
        self.select(distance).map_or(0, |p| p.collision_level)
    }

    /// Vertex stride of a level.
    #[inline]
    #[must_use]
    pub fn stride(&self, level: u32) -> Option<u32> {
        self.strides.get(level as usize).copied()
    }

    /// Every level a preset references, ascending and unique.
    #[must_use]
    pub fn referenced_levels(&self) -> Vec<u32> {
        let mut levels: Vec<u32> = self
            .presets
            .iter()
            .flat_map(|p| [p.display_level, p.collision_level])
            .collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// Farthest threshold in the table.
    #[must_use]
    pub fn max_threshold(&self) -> f32 {
        self.presets.last().map_or(0.0, |p| p.view_distance_threshold)
    }
}

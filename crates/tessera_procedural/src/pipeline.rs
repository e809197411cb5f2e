//! # Generation Pipeline
//!
//! Moves a [`Tile`] through its data stages and builds its meshes.
//!
//! ```text
//! Empty ─Classify─▶ BiomeClassified ─SampleHeight─▶ HeightSampled
//!       ─Blend─▶ Blended ─BuildMesh(level)…─▶ MeshBuilt ─all levels─▶ SeamAdjusted
//! ```
//!
//! Every stage fully overwrites the buffers it owns, so re-running a stage
//! reproduces the same data.
//!
//! ## Sample Coordinates
//!
//! Data cell `i` of tile `x` is global sample `x · R + (i - margin)`. The
//! world coordinate is that integer times the cell size, computed in `f64`,
//! so two tiles that share a sample compute it from the same integer and get
//! bit-identical inputs to the noise.

use tessera_shared::{ConfigResult, TerrainConfig};

use crate::biome::BiomeField;
use crate::lod::DetailLevelTable;
use crate::mesh::MeshBuilder;
use crate::tile::{Tile, TileCoord, TileLayout, TileState};

/// Outcome of generating a tile's data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Cells whose biome has no definition.
    pub unresolved_cells: usize,
}

/// Stage operations over tiles, shared read-only by all workers.
#[derive(Debug)]
pub struct GenerationPipeline {
    config: TerrainConfig,
    layout: TileLayout,
    field: BiomeField,
    detail: DetailLevelTable,
    referenced_levels: Vec<u32>,
}

impl GenerationPipeline {
    /// Validates `config` and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the config's validation error.
    pub fn new(config: TerrainConfig) -> ConfigResult<Self> {
        config.validate()?;
        let detail = DetailLevelTable::from_config(&config);
        Ok(Self {
            layout: TileLayout::from_config(&config),
            field: BiomeField::from_config(&config),
            referenced_levels: detail.referenced_levels(),
            detail,
            config,
        })
    }

    /// Terrain config.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Tile dimensions.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Biome field.
    #[inline]
    #[must_use]
    pub fn field(&self) -> &BiomeField {
        &self.field
    }

    /// Detail-level table.
    #[inline]
    #[must_use]
    pub fn detail_levels(&self) -> &DetailLevelTable {
        &self.detail
    }

    /// Levels referenced by any preset.
    #[inline]
    #[must_use]
    pub fn referenced_levels(&self) -> &[u32] {
        &self.referenced_levels
    }

    /// Allocates an empty tile.
    #[must_use]
    pub fn new_tile(&self, coord: TileCoord) -> Tile {
        Tile::new(coord, self.layout)
    }

    /// World coordinate of data cell `(i, j)` of tile `coord`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn cell_world_position(&self, coord: TileCoord, i: usize, j: usize) -> (f64, f64) {
        let r = i64::from(self.layout.interior_resolution);
        let m = i64::from(self.layout.blend_margin);
        let cell = f64::from(self.layout.tile_size) / r as f64;
        let gx = i64::from(coord.x) * r + i as i64 - m;
        let gy = i64::from(coord.z) * r + j as i64 - m;
        (gx as f64 * cell, gy as f64 * cell)
    }

    // =========================================================================
    // STAGES
    // =========================================================================

    /// Stage 1: classifies every cell. Returns the number of cells whose
    /// biome has no definition; those are logged and left in place.
    pub fn classify(&self, tile: &mut Tile) -> usize {
        let coord = tile.coord();
        let size = self.layout.data_size();
        let mut unresolved = 0;
        for (k, biome) in tile.biomes_mut().iter_mut().enumerate() {
            let (x, y) = self.cell_world_position(coord, k % size, k / size);
            *biome = self.field.classify(x, y);
            if self.field.definition(*biome).is_none() {
                unresolved += 1;
            }
        }
        if unresolved > 0 {
            tracing::error!(
                tile_x = coord.x,
                tile_z = coord.z,
                unresolved,
                "Classified biomes without a definition"
            );
        }
        tile.mark_data_stage(TileState::BiomeClassified);
        unresolved
    }

    /// Stage 2: samples every cell's raw height from its biome.
    ///
    /// Cells with an undefined biome get height 0.
    pub fn sample_height(&self, tile: &mut Tile) {
        let coord = tile.coord();
        let size = self.layout.data_size();
        let biomes = tile.biomes().to_vec();
        for (k, (h, &biome)) in tile.raw_heights_mut().iter_mut().zip(&biomes).enumerate() {
            let (x, y) = self.cell_world_position(coord, k % size, k / size);
            *h = self.field.height_for(biome, x, y).unwrap_or(0.0);
        }
        tile.mark_data_stage(TileState::HeightSampled);
    }

    /// Stage 3: box-filters raw heights over the blend neighbourhood and
    /// records per-biome neighbourhood fractions.
    ///
    /// Cells closer than the margin to the buffer edge keep their raw height.
    #[allow(clippy::cast_precision_loss)]
    pub fn blend(&self, tile: &mut Tile) {
        let size = self.layout.data_size();
        let res = self.layout.mesh_resolution();
        let m = self.layout.blend_margin as usize;
        let biome_count = self.layout.biome_count as usize;
        let plane = res * res;
        let inv_count = 1.0 / ((2 * m + 1) * (2 * m + 1)) as f32;

        let (raw, biomes, heights, weights) = tile.blend_buffers_mut();
        heights.copy_from_slice(raw);
        weights.fill(0.0);

        for gy in 0..res {
            for gx in 0..res {
                let (ci, cj) = (gx + m, gy + m);
                let mut sum = 0.0f32;
                for j in cj - m..=cj + m {
                    for i in ci - m..=ci + m {
                        let k = j * size + i;
                        sum += raw[k];
                        let b = usize::from(biomes[k]);
                        if b < biome_count {
                            weights[b * plane + gy * res + gx] += inv_count;
                        }
                    }
                }
                heights[cj * size + ci] = sum * inv_count;
            }
        }
        tile.mark_data_stage(TileState::Blended);
    }

    /// Stage 4: builds the mesh of one detail level.
    ///
    /// Returns false if the level has no stride or the tile is not blended
    /// yet. Does not touch the tile's change stamp.
    pub fn build_mesh(&self, tile: &mut Tile, level: u32) -> bool {
        if tile.state() < TileState::Blended {
            return false;
        }
        let Some(stride) = self.detail.stride(level) else {
            tracing::warn!(level, "Detail level has no stride");
            return false;
        };
        let builder = MeshBuilder::new(
            self.layout.interior_resolution,
            stride,
            self.layout.cell_size(),
        );
        let mesh = builder.build(|gx, gy| {
            tile.interior_height(gx as usize, gy as usize)
                .unwrap_or(0.0)
        });
        tile.insert_mesh(level, mesh);
        tile.mark_meshed(&self.referenced_levels);
        true
    }

    // =========================================================================
    // COMPOSITES
    // =========================================================================

    /// Runs stages 1-3 on `tile` in place.
    pub fn run_data_stages(&self, tile: &mut Tile) -> GenerationReport {
        let unresolved_cells = self.classify(tile);
        self.sample_height(tile);
        self.blend(tile);
        GenerationReport { unresolved_cells }
    }

    /// Allocates and runs stages 1-3 for `coord`.
    #[must_use]
    pub fn generate(&self, coord: TileCoord) -> (Tile, GenerationReport) {
        let mut tile = self.new_tile(coord);
        let report = self.run_data_stages(&mut tile);
        tracing::debug!("Generated tile ({}, {})", coord.x, coord.z);
        (tile, report)
    }

    /// Builds every level in `levels`. Returns how many were built.
    pub fn build_meshes(&self, tile: &mut Tile, levels: &[u32]) -> usize {
        levels
            .iter()
            .filter(|&&level| self.build_mesh(tile, level))
            .count()
    }

    /// Builds every level any preset references.
    pub fn build_referenced_meshes(&self, tile: &mut Tile) -> usize {
        let levels = self.referenced_levels.clone();
        self.build_meshes(tile, &levels)
    }

    /// Runs every stage for `coord`.
    #[must_use]
    pub fn generate_complete(&self, coord: TileCoord) -> Tile {
        let (mut tile, _) = self.generate(coord);
        self.build_referenced_meshes(&mut tile);
        tile
    }
}

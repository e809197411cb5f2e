//! # Terrain Tiles
//!
//! A tile is one square region of the world: layered data buffers, a mesh
//! cache per detail level and a generation state.
//!
//! ## Buffer Layout
//!
//! Height and biome buffers are `DataSize × DataSize`, row-major by `y`,
//! where `DataSize = MeshRes + 2 · margin` and `MeshRes = R + 1`. Interior
//! grid sample `(gx, gy)` lives at data index `(gx + margin, gy + margin)`.
//! The margin holds samples that belong to the neighbours; blending reads
//! them but they are never meshed.
//!
//! The biome weight buffer is `biome_count × MeshRes × MeshRes`, one plane
//! per biome.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tessera_shared::{Rect, TerrainConfig, Vec2};

use crate::biome::BiomeId;
use crate::mesh::MeshData;

/// Process-wide change clock.
static CHANGE_CLOCK: AtomicU64 = AtomicU64::new(0);

/// Returns a fresh, strictly increasing change stamp.
#[inline]
fn next_stamp() -> u64 {
    CHANGE_CLOCK.fetch_add(1, Ordering::Relaxed) + 1
}

/// Tile coordinate (identifies a tile in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// X coordinate (in tiles).
    pub x: i32,
    /// Z coordinate (in tiles), the world plane's `y` axis.
    pub z: i32,
}

impl TileCoord {
    /// Creates a new tile coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile containing a world-plane point.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_world(pos: Vec2, tile_size: f32) -> Self {
        Self {
            x: (pos.x / tile_size).floor() as i32,
            z: (pos.y / tile_size).floor() as i32,
        }
    }

    /// Lower corner in world space.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn origin(self, tile_size: f32) -> Vec2 {
        Vec2::new(self.x as f32 * tile_size, self.z as f32 * tile_size)
    }

    /// Centre in world space.
    #[inline]
    #[must_use]
    pub fn center(self, tile_size: f32) -> Vec2 {
        let half = tile_size * 0.5;
        self.origin(tile_size) + Vec2::new(half, half)
    }

    /// World-space extent.
    #[must_use]
    pub fn bounds(self, tile_size: f32) -> Rect {
        let o = self.origin(tile_size);
        Rect::new(o.x, o.y, tile_size, tile_size)
    }

    /// Every coordinate within `radius` tiles (Chebyshev), row by row.
    ///
    /// Rows and columns past the `i32` range collapse onto the edge.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn ring(self, radius: i32) -> Vec<Self> {
        let r = radius.max(0);
        let side = (2 * r + 1) as usize;
        let mut out = Vec::with_capacity(side * side);
        for dz in -r..=r {
            for dx in -r..=r {
                out.push(Self::new(self.x.saturating_add(dx), self.z.saturating_add(dz)));
            }
        }
        out
    }

    /// Chebyshev distance in tiles.
    #[inline]
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }
}

/// Generation state. Advances in declaration order; an edit drops a tile
/// back to `Blended`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TileState {
    /// Freshly allocated.
    #[default]
    Empty = 0,
    /// `biome_map` filled.
    BiomeClassified = 1,
    /// Raw heights filled.
    HeightSampled = 2,
    /// Heights and biome weights blended.
    Blended = 3,
    /// At least one detail level meshed.
    MeshBuilt = 4,
    /// Every referenced detail level meshed.
    SeamAdjusted = 5,
}

impl TileState {
    /// Parses a wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::BiomeClassified),
            2 => Some(Self::HeightSampled),
            3 => Some(Self::Blended),
            4 => Some(Self::MeshBuilt),
            5 => Some(Self::SeamAdjusted),
            _ => None,
        }
    }
}

/// Tile dimensions, derived once from the terrain config.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileLayout {
    /// Edge length in world units.
    pub tile_size: f32,
    /// Cells across the interior.
    pub interior_resolution: u32,
    /// Border samples on each side.
    pub blend_margin: u32,
    /// Planes in the biome weight buffer.
    pub biome_count: u32,
}

impl TileLayout {
    /// Layout of tiles generated from `config`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_config(config: &TerrainConfig) -> Self {
        Self {
            tile_size: config.tile_size,
            interior_resolution: config.interior_resolution,
            blend_margin: config.blend_margin,
            biome_count: config.biome_count() as u32,
        }
    }

    /// Interior samples per side, both shared edges included.
    #[inline]
    #[must_use]
    pub const fn mesh_resolution(&self) -> usize {
        self.interior_resolution as usize + 1
    }

    /// Samples per side of the height and biome buffers.
    #[inline]
    #[must_use]
    pub const fn data_size(&self) -> usize {
        self.mesh_resolution() + 2 * self.blend_margin as usize
    }

    /// World distance between adjacent samples.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_size(&self) -> f32 {
        self.tile_size / self.interior_resolution as f32
    }

    /// Length of the height and biome buffers.
    #[inline]
    #[must_use]
    pub const fn data_len(&self) -> usize {
        self.data_size() * self.data_size()
    }

    /// Length of the biome weight buffer.
    #[inline]
    #[must_use]
    pub const fn weights_len(&self) -> usize {
        self.biome_count as usize * self.mesh_resolution() * self.mesh_resolution()
    }

    /// `(data_len, weights_len)`, or `None` if either overflows `usize`.
    #[must_use]
    pub fn checked_lengths(&self) -> Option<(usize, usize)> {
        let res = (self.interior_resolution as usize).checked_add(1)?;
        let side = res.checked_add((self.blend_margin as usize).checked_mul(2)?)?;
        let data = side.checked_mul(side)?;
        let weights = (self.biome_count as usize)
            .checked_mul(res)?
            .checked_mul(res)?;
        Some((data, weights))
    }
}

/// Replicated data buffers of a tile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileBuffers {
    /// Blended heights, `DataSize²`.
    pub heights: Vec<f32>,
    /// Biome indices, `DataSize²`.
    pub biomes: Vec<BiomeId>,
    /// Biome blend fractions, `biome_count × MeshRes²`.
    pub biome_weights: Vec<f32>,
}

/// One square region of terrain.
#[derive(Clone, Debug)]
pub struct Tile {
    coord: TileCoord,
    layout: TileLayout,
    heights: Vec<f32>,
    raw_heights: Vec<f32>,
    biomes: Vec<BiomeId>,
    biome_weights: Vec<f32>,
    meshes: BTreeMap<u32, MeshData>,
    state: TileState,
    last_changed: u64,
    revision: u32,
}

impl Tile {
    /// Allocates an empty tile.
    #[must_use]
    pub fn new(coord: TileCoord, layout: TileLayout) -> Self {
        Self {
            coord,
            layout,
            heights: vec![0.0; layout.data_len()],
            raw_heights: vec![0.0; layout.data_len()],
            biomes: vec![0; layout.data_len()],
            biome_weights: vec![0.0; layout.weights_len()],
            meshes: BTreeMap::new(),
            state: TileState::Empty,
            last_changed: next_stamp(),
            revision: 0,
        }
    }

    /// Reassembles a tile received from the authority.
    ///
    /// Returns `None` if a buffer does not match `layout`. Raw heights are
    /// not replicated; the replica uses the blended heights for both.
    #[must_use]
    pub fn from_replica(
        coord: TileCoord,
        layout: TileLayout,
        state: TileState,
        revision: u32,
        buffers: TileBuffers,
        meshes: BTreeMap<u32, MeshData>,
    ) -> Option<Self> {
        let TileBuffers {
            heights,
            biomes,
            biome_weights,
        } = buffers;
        let (data_len, weights_len) = layout.checked_lengths()?;
        if heights.len() != data_len || biomes.len() != data_len || biome_weights.len() != weights_len
        {
            return None;
        }
        Some(Self {
            coord,
            layout,
            raw_heights: heights.clone(),
            heights,
            biomes,
            biome_weights,
            meshes,
            state,
            last_changed: next_stamp(),
            revision,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Grid key.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Dimensions.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Generation state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> TileState {
        self.state
    }

    /// Stamp of the last data mutation.
    #[inline]
    #[must_use]
    pub const fn last_changed(&self) -> u64 {
        self.last_changed
    }

    /// Edits applied since generation.
    #[inline]
    #[must_use]
    pub const fn revision(&self) -> u32 {
        self.revision
    }

    /// Returns true once any edit has been applied.
    #[inline]
    #[must_use]
    pub const fn is_edited(&self) -> bool {
        self.revision > 0
    }

    /// Blended heights, `DataSize²`.
    #[inline]
    #[must_use]
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Heights before blending, `DataSize²`.
    #[inline]
    #[must_use]
    pub fn raw_heights(&self) -> &[f32] {
        &self.raw_heights
    }

    /// Biome indices, `DataSize²`.
    #[inline]
    #[must_use]
    pub fn biomes(&self) -> &[BiomeId] {
        &self.biomes
    }

    /// Biome blend fractions, `biome_count × MeshRes²`.
    #[inline]
    #[must_use]
    pub fn biome_weights(&self) -> &[f32] {
        &self.biome_weights
    }

    /// Mesh of a detail level, if built.
    #[inline]
    #[must_use]
    pub fn mesh(&self, level: u32) -> Option<&MeshData> {
        self.meshes.get(&level)
    }

    /// All built meshes keyed by detail level.
    #[inline]
    #[must_use]
    pub fn meshes(&self) -> &BTreeMap<u32, MeshData> {
        &self.meshes
    }

    /// Returns true if the detail level is built.
    #[inline]
    #[must_use]
    pub fn has_level(&self, level: u32) -> bool {
        self.meshes.contains_key(&level)
    }

    /// Flat index of data cell `(i, j)`, `None` outside `[0, DataSize)`.
    #[inline]
    #[must_use]
    pub fn data_index(&self, i: usize, j: usize) -> Option<usize> {
        let size = self.layout.data_size();
        (i < size && j < size).then_some(j * size + i)
    }

    /// Height of data cell `(i, j)`.
    #[inline]
    #[must_use]
    pub fn height_at_cell(&self, i: usize, j: usize) -> Option<f32> {
        self.data_index(i, j).map(|k| self.heights[k])
    }

    /// Biome of data cell `(i, j)`.
    #[inline]
    #[must_use]
    pub fn biome_at_cell(&self, i: usize, j: usize) -> Option<BiomeId> {
        self.data_index(i, j).map(|k| self.biomes[k])
    }

    /// Height of interior grid sample `(gx, gy)`.
    #[inline]
    #[must_use]
    pub fn interior_height(&self, gx: usize, gy: usize) -> Option<f32> {
        let m = self.layout.blend_margin as usize;
        if gx >= self.layout.mesh_resolution() || gy >= self.layout.mesh_resolution() {
            return None;
        }
        self.height_at_cell(gx + m, gy + m)
    }

    /// Weight of `biome` at interior grid sample `(gx, gy)`.
    #[must_use]
    pub fn biome_weight(&self, biome: BiomeId, gx: usize, gy: usize) -> Option<f32> {
        let res = self.layout.mesh_resolution();
        if gx >= res || gy >= res || u32::from(biome) >= self.layout.biome_count {
            return None;
        }
        self.biome_weights
            .get(usize::from(biome) * res * res + gy * res + gx)
            .copied()
    }

    /// Nearest data cell to a world-plane point, `None` outside the buffer.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn nearest_cell(&self, pos: Vec2) -> Option<(usize, usize)> {
        let (u, v) = self.local_cell(pos);
        let (i, j) = (u.round(), v.round());
        let size = self.layout.data_size() as f32;
        if i < 0.0 || j < 0.0 || i >= size || j >= size {
            return None;
        }
        Some((i as usize, j as usize))
    }

    /// Nearest-cell height at a world-plane point.
    #[must_use]
    pub fn height_at_world(&self, pos: Vec2) -> Option<f32> {
        let (i, j) = self.nearest_cell(pos)?;
        self.height_at_cell(i, j)
    }

    /// Fractional data-cell coordinates of a world-plane point.
    #[allow(clippy::cast_precision_loss)]
    fn local_cell(&self, pos: Vec2) -> (f32, f32) {
        let origin = self.coord.origin(self.layout.tile_size);
        let cell = self.layout.cell_size();
        let m = self.layout.blend_margin as f32;
        ((pos.x - origin.x) / cell + m, (pos.y - origin.y) / cell + m)
    }

    // =========================================================================
    // EDITS
    // =========================================================================

    /// Sets every height cell covered by `area`, plus one cell of padding,
    /// to `height`.
    ///
    /// Returns false without touching the tile if the padded bounds leave
    /// the data buffer, or if no cell changed. On change the tile's stamp
    /// and revision advance, all meshes are dropped and the state falls back
    /// to [`TileState::Blended`] if it was past it.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    pub fn flatten(&mut self, area: Rect, height: f32) -> bool {
        let (u0, v0) = self.local_cell(area.min);
        let (u1, v1) = self.local_cell(area.max);
        let (i0, j0) = (u0.floor() as i64 - 1, v0.floor() as i64 - 1);
        let (i1, j1) = (u1.ceil() as i64 + 1, v1.ceil() as i64 + 1);

        let size = self.layout.data_size() as i64;
        if i0 < 0 || j0 < 0 || i1 >= size || j1 >= size {
            return false;
        }

        let mut changed = false;
        let size = size as usize;
        for j in j0 as usize..=j1 as usize {
            for cell in &mut self.heights[j * size + i0 as usize..=j * size + i1 as usize] {
                if cell.to_bits() != height.to_bits() {
                    *cell = height;
                    changed = true;
                }
            }
        }

        if changed {
            self.last_changed = next_stamp();
            self.revision += 1;
            self.meshes.clear();
            self.state = self.state.min(TileState::Blended);
        }
        changed
    }

    // =========================================================================
    // PIPELINE ACCESS
    // =========================================================================

    pub(crate) fn biomes_mut(&mut self) -> &mut [BiomeId] {
        &mut self.biomes
    }

    pub(crate) fn raw_heights_mut(&mut self) -> &mut [f32] {
        &mut self.raw_heights
    }

    pub(crate) fn blend_buffers_mut(&mut self) -> (&[f32], &[BiomeId], &mut [f32], &mut [f32]) {
        (
            &self.raw_heights,
            &self.biomes,
            &mut self.heights,
            &mut self.biome_weights,
        )
    }

    /// Records a data stage: stamps the tile and raises its state.
    pub(crate) fn mark_data_stage(&mut self, state: TileState) {
        self.last_changed = next_stamp();
        self.state = self.state.max(state);
    }

    pub(crate) fn insert_mesh(&mut self, level: u32, mesh: MeshData) {
        self.meshes.insert(level, mesh);
    }

    /// Raises the state after meshing.
    pub(crate) fn mark_meshed(&mut self, referenced: &[u32]) {
        if self.meshes.is_empty() || self.state < TileState::Blended {
            return;
        }
        let complete = referenced.iter().all(|l| self.meshes.contains_key(l));
        let target = if complete {
            TileState::SeamAdjusted
        } else {
            TileState::MeshBuilt
        };
        self.state = self.state.max(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TileLayout {
        TileLayout {
            tile_size: 100.0,
            interior_resolution: 64,
            blend_margin: 2,
            biome_count: 3,
        }
    }

    #[test]
    fn test_coord_from_world() {
        assert_eq!(TileCoord::from_world(Vec2::new(50.0, 50.0), 100.0), TileCoord::new(0, 0));
        assert_eq!(TileCoord::from_world(Vec2::new(-0.1, 250.0), 100.0), TileCoord::new(-1, 2));
        assert_eq!(TileCoord::new(-1, 2).origin(100.0), Vec2::new(-100.0, 200.0));
        assert_eq!(TileCoord::new(0, 0).center(100.0), Vec2::new(50.0, 50.0));
    }

    #[test]
    fn test_ring() {
        let ring = TileCoord::new(3, -2).ring(2);
        assert_eq!(ring.len(), 25);
        assert!(ring.iter().all(|c| c.chebyshev_distance(TileCoord::new(3, -2)) <= 2));
    }

    #[test]
    fn test_ring_at_grid_edge() {
        let far = TileCoord::from_world(Vec2::new(1e12, -1e12), 100.0);
        assert_eq!(far, TileCoord::new(i32::MAX, i32::MIN));
        let ring = far.ring(1);
        assert_eq!(ring.len(), 9);
        assert!(ring.iter().all(|c| c.chebyshev_distance(far) <= 1));
        assert!(ring.contains(&TileCoord::new(i32::MAX - 1, i32::MIN + 1)));
    }

    #[test]
    fn test_buffer_sizes() {
        let tile = Tile::new(TileCoord::new(0, 0), layout());
        assert_eq!(tile.heights().len(), 69 * 69);
        assert_eq!(tile.biome_weights().len(), 3 * 65 * 65);
        assert_eq!(tile.state(), TileState::Empty);
        assert_eq!(tile.height_at_cell(69, 0), None);
        assert_eq!(tile.interior_height(65, 0), None);
    }

    #[test]
    fn test_flatten_inside() {
        let mut tile = Tile::new(TileCoord::new(0, 0), layout());
        let before = tile.last_changed();
        assert!(tile.flatten(Rect::new(25.0, 25.0, 50.0, 50.0), 50.0));
        assert!(tile.last_changed() > before);
        assert_eq!(tile.revision(), 1);
        assert_eq!(tile.height_at_world(Vec2::new(25.0, 25.0)), Some(50.0));
        assert_eq!(tile.height_at_world(Vec2::new(50.0, 50.0)), Some(50.0));
        assert_eq!(tile.height_at_world(Vec2::new(10.0, 10.0)), Some(0.0));
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let mut tile = Tile::new(TileCoord::new(0, 0), layout());
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(tile.flatten(rect, 7.0));
        let heights = tile.heights().to_vec();
        let stamp = tile.last_changed();
        assert!(!tile.flatten(rect, 7.0));
        assert_eq!(tile.heights(), heights.as_slice());
        assert_eq!(tile.last_changed(), stamp);
        assert_eq!(tile.revision(), 1);
    }

    #[test]
    fn test_flatten_rejects_outside() {
        let mut tile = Tile::new(TileCoord::new(0, 0), layout());
        let before = tile.heights().to_vec();
        assert!(!tile.flatten(Rect::new(90.0, 90.0, 30.0, 30.0), 5.0));
        assert!(!tile.flatten(Rect::new(-10.0, 40.0, 20.0, 5.0), 5.0));
        assert_eq!(tile.heights(), before.as_slice());
        assert_eq!(tile.revision(), 0);
    }

    #[test]
    fn test_flatten_up_to_tile_edge() {
        let mut tile = Tile::new(TileCoord::new(1, 1), layout());
        assert!(tile.flatten(Rect::new(150.0, 150.0, 50.0, 50.0), 3.0));
        assert_eq!(tile.height_at_world(Vec2::new(200.0, 200.0)), Some(3.0));
    }

    #[test]
    fn test_edit_clears_meshes_and_regresses_state() {
        let mut tile = Tile::new(TileCoord::new(0, 0), layout());
        tile.mark_data_stage(TileState::Blended);
        tile.insert_mesh(0, MeshData::default());
        tile.mark_meshed(&[0]);
        assert_eq!(tile.state(), TileState::SeamAdjusted);

        assert!(tile.flatten(Rect::new(40.0, 40.0, 10.0, 10.0), 1.0));
        assert_eq!(tile.state(), TileState::Blended);
        assert!(tile.mesh(0).is_none());
    }

    #[test]
    fn test_edit_before_blend_keeps_state() {
        let mut tile = Tile::new(TileCoord::new(0, 0), layout());
        tile.mark_data_stage(TileState::BiomeClassified);
        assert!(tile.flatten(Rect::new(40.0, 40.0, 10.0, 10.0), 1.0));
        assert_eq!(tile.state(), TileState::BiomeClassified);
        assert_eq!(tile.revision(), 1);
    }

    #[test]
    fn test_state_never_regresses_through_stages() {
        let mut tile = Tile::new(TileCoord::new(0, 0), layout());
        tile.mark_data_stage(TileState::Blended);
        tile.mark_data_stage(TileState::BiomeClassified);
        assert_eq!(tile.state(), TileState::Blended);
    }

    #[test]
    fn test_from_replica_rejects_wrong_sizes() {
        let l = layout();
        let ok = Tile::from_replica(
            TileCoord::new(0, 0),
            l,
            TileState::MeshBuilt,
            2,
            TileBuffers {
                heights: vec![1.0; l.data_len()],
                biomes: vec![0; l.data_len()],
                biome_weights: vec![0.0; l.weights_len()],
            },
            BTreeMap::new(),
        );
        assert_eq!(ok.map(|t| t.revision()), Some(2));

        let bad = Tile::from_replica(
            TileCoord::new(0, 0),
            l,
            TileState::MeshBuilt,
            0,
            TileBuffers {
                heights: vec![1.0; 3],
                biomes: vec![0; l.data_len()],
                biome_weights: vec![0.0; l.weights_len()],
            },
            BTreeMap::new(),
        );
        assert!(bad.is_none());

        let huge = TileLayout {
            interior_resolution: u32::MAX,
            ..l
        };
        assert_eq!(huge.checked_lengths(), None);
        let overflowing = Tile::from_replica(
            TileCoord::new(0, 0),
            huge,
            TileState::MeshBuilt,
            0,
            TileBuffers::default(),
            BTreeMap::new(),
        );
        assert!(overflowing.is_none());
    }
}

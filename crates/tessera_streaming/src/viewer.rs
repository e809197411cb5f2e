//! # Terrain Viewer
//!
//! Viewer-relative load and activation policy. Works the same against the
//! authority's registry and against a remote replica, through
//! [`TileSource`].
//!
//! ```text
//! update(position)
//!   │ moved ≤ tile/2 since last activation ──▶ Idle
//!   ▼
//! needed = ring(radius) around viewer tile
//!   │ any tile missing or lacking its levels ──▶ request(needed), Requested
//!   ▼
//! select levels per tile, swap active set ──▶ Activated { entered, left, changed }
//! ```
//!
//! Activation and pending generation never interleave: if one needed tile
//! is not ready, the active set is left exactly as it was.

use std::collections::BTreeMap;

use tessera_procedural::{DetailLevelTable, Tile, TileCoord, TileState};
use tessera_shared::{TerrainConfig, Vec2};

/// Where a viewer reads tiles from and sends generation requests to.
pub trait TileSource {
    /// Tile at `coord`, if present.
    fn tile(&self, coord: TileCoord) -> Option<&Tile>;

    /// Asks for `coords` to be produced. Must tolerate duplicates.
    fn request(&mut self, coords: &[TileCoord], focus: Vec2);

    /// The viewer activated a new ring around `focus`.
    fn report_focus(&mut self, _focus: Vec2) {}
}

/// One tile in a viewer's active set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActiveTile {
    /// Tile key.
    pub coord: TileCoord,
    /// Level shown.
    pub display_level: u32,
    /// Level used for collision.
    pub collision_level: u32,
}

/// Difference between two successive active sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Activation {
    /// Tiles that became active.
    pub entered: Vec<ActiveTile>,
    /// Tiles no longer active.
    pub left: Vec<TileCoord>,
    /// Tiles still active at a different level.
    pub changed: Vec<ActiveTile>,
}

impl Activation {
    /// Returns true if the active set did not change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty() && self.changed.is_empty()
    }
}

/// Outcome of [`TerrainViewer::update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewerUpdate {
    /// Not moved far enough to re-evaluate.
    Idle,
    /// Some needed tile was not ready; the whole ring was requested.
    Requested {
        /// Tiles in the ring.
        needed: usize,
        /// Tiles that were not ready.
        missing: usize,
    },
    /// The active set was swapped.
    Activated(Activation),
}

/// Per-viewer active set and load policy.
#[derive(Clone, Debug)]
pub struct TerrainViewer {
    detail: DetailLevelTable,
    tile_size: f32,
    radius: i32,
    last_activation: Option<Vec2>,
    active: BTreeMap<TileCoord, ActiveTile>,
}

impl TerrainViewer {
    /// Creates a viewer that loads a ring of `radius` tiles.
    #[must_use]
    pub fn new(detail: DetailLevelTable, tile_size: f32, radius: i32) -> Self {
        Self {
            detail,
            tile_size,
            radius: radius.max(0),
            last_activation: None,
            active: BTreeMap::new(),
        }
    }

    /// Viewer whose radius covers the farthest detail-level threshold.
    #[must_use]
    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(
            DetailLevelTable::from_config(config),
            config.tile_size,
            config.load_radius_tiles(),
        )
    }

    /// Ring radius in tiles.
    #[inline]
    #[must_use]
    pub const fn radius(&self) -> i32 {
        self.radius
    }

    /// Position of the last successful activation.
    #[inline]
    #[must_use]
    pub const fn last_activation(&self) -> Option<Vec2> {
        self.last_activation
    }

    /// Current active set.
    #[inline]
    #[must_use]
    pub fn active(&self) -> &BTreeMap<TileCoord, ActiveTile> {
        &self.active
    }

    /// Active entry of `coord`.
    #[inline]
    #[must_use]
    pub fn active_tile(&self, coord: TileCoord) -> Option<&ActiveTile> {
        self.active.get(&coord)
    }

    /// Forces the next update to re-evaluate.
    pub fn invalidate(&mut self) {
        self.last_activation = None;
    }

    /// Tiles needed around `position`.
    #[must_use]
    pub fn needed_tiles(&self, position: Vec2) -> Vec<TileCoord> {
        TileCoord::from_world(position, self.tile_size).ring(self.radius)
    }

    /// Runs the load policy for a viewer at `position`.
    pub fn update<S: TileSource + ?Sized>(&mut self, position: Vec2, source: &mut S) -> ViewerUpdate {
        if let Some(last) = self.last_activation {
            if position.distance(last) <= self.tile_size * 0.5 {
                return ViewerUpdate::Idle;
            }
        }

        let needed = self.needed_tiles(position);
        let mut next = BTreeMap::new();
        let mut missing = 0;
        for &coord in &needed {
            let entry = self.select(coord, position);
            if source.tile(coord).is_some_and(|t| Self::is_ready(t, &entry)) {
                next.insert(coord, entry);
            } else {
                missing += 1;
            }
        }

        if missing > 0 {
            tracing::debug!(missing, needed = needed.len(), "Viewer ring not ready, requesting");
            source.request(&needed, position);
            return ViewerUpdate::Requested {
                needed: needed.len(),
                missing,
            };
        }

        let activation = self.swap(next);
        self.last_activation = Some(position);
        source.report_focus(position);
        ViewerUpdate::Activated(activation)
    }

    /// Levels for `coord` as seen from `position`.
    fn select(&self, coord: TileCoord, position: Vec2) -> ActiveTile {
        let distance = coord.center(self.tile_size).distance(position);
        ActiveTile {
            coord,
            display_level: self.detail.select_level(distance),
            collision_level: self.detail.select_collision_level(distance),
        }
    }

    fn is_ready(tile: &Tile, entry: &ActiveTile) -> bool {
        tile.state() >= TileState::MeshBuilt
            && tile.has_level(entry.display_level)
            && tile.has_level(entry.collision_level)
    }

    fn swap(&mut self, next: BTreeMap<TileCoord, ActiveTile>) -> Activation {
        let mut activation = Activation::default();
        for (coord, entry) in &next {
            match self.active.get(coord) {
                None => activation.entered.push(*entry),
                Some(old) if old != entry => activation.changed.push(*entry),
                Some(_) => {}
            }
        }
        activation.left = self
            .active
            .keys()
            .filter(|c| !next.contains_key(c))
            .copied()
            .collect();
        self.active = next;
        activation
    }
}

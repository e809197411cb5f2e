//! # Tile Presentation
//!
//! The presentation layer owns whatever renderable or collidable resources
//! a tile maps to. The streaming service only tells it when a tile's data
//! is first available, when it changed, when it left the registry, and
//! which tiles a viewer has active.

use tessera_procedural::{Tile, TileCoord};

use crate::viewer::Activation;

/// Receives tile lifecycle events from the streaming service.
pub trait TilePresenter {
    /// A tile reached the registry for the first time.
    fn materialize(&mut self, tile: &Tile);

    /// A tile already presented was rebuilt (for example after an edit).
    fn refresh(&mut self, tile: &Tile);

    /// A tile was evicted from the registry.
    fn release(&mut self, _coord: TileCoord) {}

    /// A viewer's active set changed.
    fn apply_activation(&mut self, _activation: &Activation) {}
}

/// Presenter that ignores every event (headless authority).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPresenter;

impl TilePresenter for NullPresenter {
    fn materialize(&mut self, _tile: &Tile) {}

    fn refresh(&mut self, _tile: &Tile) {}
}

//! # Replication Protocol
//!
//! Messages exchanged between the authority and remote viewers.
//!
//! ```text
//! AUTHORITY                                   REMOTE VIEWER
//!   |                                               |
//!   |<-- RequestTiles { subscriber, focus, coords } |
//!   |                                               |
//!   |--- Payload { coord, revision, bytes } ------->|  (first build, every rebuild)
//!   |                                               |
//!   |<-- Leave { subscriber } ----------------------|
//! ```
//!
//! Both directions are idempotent: a duplicated request re-sends payloads
//! the viewer may already hold, and a duplicated payload is ignored by
//! revision.

mod codec;

pub use codec::{decode_bytes, TilePayload};

use tessera_procedural::TileCoord;
use tessera_shared::Vec2;

/// Identifies one remote viewer on the authority.
pub type SubscriberId = u32;

/// Authority → viewer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileMessage {
    /// A finished tile, full payload.
    Payload(TilePayload),
}

/// Viewer → authority.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewerMessage {
    /// Ask for tiles around `focus`.
    RequestTiles {
        /// Requesting viewer.
        subscriber: SubscriberId,
        /// Viewer position, kept for eviction decisions.
        focus: Vec2,
        /// Tiles wanted.
        coords: Vec<TileCoord>,
    },
    /// The viewer disconnects.
    Leave {
        /// Departing viewer.
        subscriber: SubscriberId,
    },
}

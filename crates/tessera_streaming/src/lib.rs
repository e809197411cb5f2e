//! # Tessera Streaming
//!
//! The authoritative side of the terrain: background generation, the tile
//! registry, viewer-driven loading and replication to remote viewers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SCHEDULER (fixed tick)                   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  StreamingService::tick ──▶ TerrainViewer::update ──▶ eviction   │
//! │         │         ▲                  │                           │
//! │         │         └── request ───────┘                           │
//! │         ▼                                                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ generate     │──▶│ mesh         │──▶│ drain (1 per tick)   │  │
//! │  │ (worker A)   │   │ (worker B)   │   │ presenter, replicate │  │
//! │  └──────────────┘   └──────────────┘   └──────────┬───────────┘  │
//! └───────────────────────────────────────────────────┼──────────────┘
//!                                                     ▼
//!                                   ReplicationHub ─▶ RemoteTerrain
//! ```
//!
//! ## Threading
//!
//! One thread per background stage; the registry, active sets and
//! presenter calls stay on the thread that owns the [`Scheduler`]. Tiles
//! cross threads by value.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod presenter;
pub mod protocol;
pub mod replica;
pub mod replication;
pub mod scheduler;
pub mod service;
pub mod tick;
pub mod viewer;
pub mod workers;

pub use error::{CodecError, CodecResult, StreamingError, StreamingResult};
pub use presenter::{NullPresenter, TilePresenter};
pub use protocol::{SubscriberId, TileMessage, TilePayload, ViewerMessage};
pub use replica::{RemoteTerrain, ReplicaStats};
pub use replication::{ReplicationHub, Subscription};
pub use scheduler::{Scheduler, SchedulerTick, ViewerId};
pub use service::{DrainOutcome, ServiceStats, StreamingService, TickReport};
pub use tick::{PhaseTimer, PhaseTimes, TickClock, TickPhase, TickStats, MAX_CATCH_UP};
pub use viewer::{ActiveTile, Activation, TerrainViewer, TileSource, ViewerUpdate};
pub use workers::WorkerPipeline;

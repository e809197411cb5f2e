//! # Streaming Service
//!
//! The authority: owns the tile registry, feeds the background workers,
//! drains finished tiles one per tick, applies edits and answers height
//! queries.
//!
//! ## Tick
//!
//! ```text
//! tick()
//!   1. viewer requests  ─▶ re-send built tiles, queue the rest
//!   2. finished tile    ─▶ reject if stale ─▶ registry ─▶ presenter ─▶ replicate
//! ```
//!
//! ## Staleness
//!
//! Every edit bumps a tile's revision and re-sends a copy through the mesh
//! stage. A background result is accepted only if its revision is at least
//! the registry copy's, so a tile generated before an edit can never
//! overwrite it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_procedural::{GenerationPipeline, Tile, TileCoord, TileState};
use tessera_shared::{Rect, TerrainConfig, Vec2};

use crate::error::StreamingResult;
use crate::presenter::{NullPresenter, TilePresenter};
use crate::protocol::{SubscriberId, TilePayload, ViewerMessage};
use crate::replication::{ReplicationHub, Subscription};
use crate::viewer::{Activation, TileSource};
use crate::workers::WorkerPipeline;

/// What happened to the tile drained in one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// First time the tile was presented.
    Materialized(TileCoord),
    /// A presented tile was replaced by a rebuild.
    Refreshed(TileCoord),
    /// The result predates an edit and was dropped.
    Stale(TileCoord),
}

/// Summary of one [`StreamingService::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Viewer messages handled.
    pub requests_handled: usize,
    /// Tile drained, if any.
    pub drained: Option<DrainOutcome>,
    /// Viewers the drained tile was sent to.
    pub replicated_to: usize,
}

/// Running counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Coordinates queued for generation.
    pub queued: u64,
    /// Tiles generated synchronously by queries and edits.
    pub generated_sync: u64,
    /// Tiles accepted from the workers.
    pub drained: u64,
    /// Background results dropped as stale.
    pub stale_rejected: u64,
    /// Tiles changed by edits.
    pub edits: u64,
    /// Tiles evicted.
    pub evicted: u64,
    /// Payloads handed to the replication hub.
    pub payloads_sent: u64,
}

/// Authoritative terrain streaming service.
pub struct StreamingService {
    pipeline: Arc<GenerationPipeline>,
    workers: WorkerPipeline,
    registry: HashMap<TileCoord, Tile>,
    in_flight: HashMap<TileCoord, usize>,
    presented: HashSet<TileCoord>,
    payloads: HashMap<TileCoord, TilePayload>,
    remote_foci: HashMap<SubscriberId, Vec2>,
    presenter: Box<dyn TilePresenter>,
    hub: Arc<ReplicationHub>,
    stats: ServiceStats,
}

impl StreamingService {
    /// Builds a headless service.
    ///
    /// # Errors
    ///
    /// Returns a config validation error or a worker spawn error.
    pub fn new(config: TerrainConfig) -> StreamingResult<Self> {
        Self::with_presenter(config, Box::new(NullPresenter))
    }

    /// Builds a service that reports to `presenter`.
    ///
    /// # Errors
    ///
    /// Returns a config validation error or a worker spawn error.
    pub fn with_presenter(
        config: TerrainConfig,
        presenter: Box<dyn TilePresenter>,
    ) -> StreamingResult<Self> {
        let pipeline = Arc::new(GenerationPipeline::new(config)?);
        let workers = WorkerPipeline::for_pipeline(Arc::clone(&pipeline))?;
        Ok(Self::from_parts(pipeline, workers, presenter))
    }

    /// Assembles a service from already running workers.
    #[must_use]
    pub fn from_parts(
        pipeline: Arc<GenerationPipeline>,
        workers: WorkerPipeline,
        presenter: Box<dyn TilePresenter>,
    ) -> Self {
        tracing::info!(
            "Streaming service ready (tile size {}, resolution {}, {} levels)",
            pipeline.layout().tile_size,
            pipeline.layout().interior_resolution,
            pipeline.referenced_levels().len()
        );
        Self {
            pipeline,
            workers,
            registry: HashMap::new(),
            in_flight: HashMap::new(),
            presented: HashSet::new(),
            payloads: HashMap::new(),
            remote_foci: HashMap::new(),
            presenter,
            hub: Arc::new(ReplicationHub::new()),
            stats: ServiceStats::default(),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Shared generation pipeline.
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &Arc<GenerationPipeline> {
        &self.pipeline
    }

    /// Terrain config.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TerrainConfig {
        self.pipeline.config()
    }

    /// Replication hub.
    #[inline]
    #[must_use]
    pub fn hub(&self) -> &Arc<ReplicationHub> {
        &self.hub
    }

    /// Registers a remote viewer.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    /// Tiles in the registry.
    #[inline]
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.registry.len()
    }

    /// Jobs queued or running in the workers.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.in_flight.values().sum()
    }

    /// Tile at `coord`, if present.
    #[inline]
    #[must_use]
    pub fn tile_at(&self, coord: TileCoord) -> Option<&Tile> {
        self.registry.get(&coord)
    }

    /// Returns true while the registry is empty or work is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.registry.is_empty() || !self.in_flight.is_empty()
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    /// Queues every coordinate not already built or in flight. Blended
    /// registry tiles without meshes are sent to the mesh stage. Returns the
    /// number of jobs queued.
    pub fn request_tiles(&mut self, coords: &[TileCoord]) -> usize {
        let mut queued = 0;
        for &coord in coords {
            if self.in_flight.contains_key(&coord) {
                continue;
            }
            let job = match self.registry.get(&coord) {
                Some(tile) if tile.state() >= TileState::MeshBuilt => continue,
                Some(tile) if tile.state() >= TileState::Blended => self.workers.remesh(tile.clone()),
                _ => self.workers.submit(coord),
            };
            match job {
                Ok(()) => {
                    self.mark_in_flight(coord);
                    queued += 1;
                }
                Err(e) => {
                    tracing::error!("Cannot queue tile ({}, {}): {}", coord.x, coord.z, e);
                    break;
                }
            }
        }
        self.stats.queued += queued as u64;
        queued
    }

    fn mark_in_flight(&mut self, coord: TileCoord) {
        *self.in_flight.entry(coord).or_insert(0) += 1;
    }

    fn release_in_flight(&mut self, coord: TileCoord) {
        if let Some(count) = self.in_flight.get_mut(&coord) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&coord);
            }
        }
    }

    fn remesh(&mut self, tile: Tile) {
        let coord = tile.coord();
        match self.workers.remesh(tile) {
            Ok(()) => self.mark_in_flight(coord),
            Err(e) => tracing::error!("Cannot remesh tile ({}, {}): {}", coord.x, coord.z, e),
        }
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// One authoritative update: handles viewer messages, then drains at
    /// most one finished tile.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        while let Some(message) = self.hub.try_recv_request() {
            self.handle_viewer_message(message);
            report.requests_handled += 1;
        }

        if let Some(tile) = self.workers.try_finished() {
            self.release_in_flight(tile.coord());
            let (outcome, replicated_to) = self.accept(tile);
            report.drained = Some(outcome);
            report.replicated_to = replicated_to;
        } else if let Some(worker) = self.workers.stopped_worker() {
            tracing::error!("Worker '{}' stopped unexpectedly", worker);
        }

        report
    }

    fn handle_viewer_message(&mut self, message: ViewerMessage) {
        match message {
            ViewerMessage::RequestTiles {
                subscriber,
                focus,
                coords,
            } => {
                self.remote_foci.insert(subscriber, focus);
                let mut missing = Vec::new();
                for coord in coords {
                    match self.ready_payload(coord) {
                        Some(payload) => {
                            if self.hub.send_to(subscriber, &payload) {
                                self.stats.payloads_sent += 1;
                            }
                        }
                        None => missing.push(coord),
                    }
                }
                self.request_tiles(&missing);
            }
            ViewerMessage::Leave { subscriber } => {
                self.remote_foci.remove(&subscriber);
                self.hub.unsubscribe(subscriber);
            }
        }
    }

    /// Payload of a built tile, encoding it if the cache is behind.
    fn ready_payload(&mut self, coord: TileCoord) -> Option<TilePayload> {
        let tile = self.registry.get(&coord)?;
        if tile.state() < TileState::MeshBuilt {
            return None;
        }
        if let Some(cached) = self.payloads.get(&coord) {
            if cached.revision == tile.revision() {
                return Some(cached.clone());
            }
        }
        let payload = TilePayload::encode(tile);
        self.payloads.insert(coord, payload.clone());
        Some(payload)
    }

    fn accept(&mut self, tile: Tile) -> (DrainOutcome, usize) {
        let coord = tile.coord();
        if let Some(current) = self.registry.get(&coord) {
            if current.revision() > tile.revision() {
                tracing::debug!(
                    "Dropping stale tile ({}, {}) revision {} < {}",
                    coord.x,
                    coord.z,
                    tile.revision(),
                    current.revision()
                );
                self.stats.stale_rejected += 1;
                return (DrainOutcome::Stale(coord), 0);
            }
        }

        let payload = TilePayload::encode(&tile);
        let outcome = if self.presented.insert(coord) {
            self.presenter.materialize(&tile);
            DrainOutcome::Materialized(coord)
        } else {
            self.presenter.refresh(&tile);
            DrainOutcome::Refreshed(coord)
        };
        self.registry.insert(coord, tile);
        self.stats.drained += 1;

        let replicated_to = self.hub.broadcast(&payload);
        self.stats.payloads_sent += replicated_to as u64;
        self.payloads.insert(coord, payload);
        (outcome, replicated_to)
    }

    /// Ticks until no work is outstanding or `timeout` passes. Returns true
    /// if the service went idle.
    pub fn flush(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let idle_poll = Duration::from_millis(self.config().streaming.idle_poll_ms.max(1));
        loop {
            let report = self.tick();
            if self.in_flight.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Flush timed out with {} jobs outstanding", self.outstanding());
                return false;
            }
            if report.drained.is_none() {
                std::thread::sleep(idle_poll);
            }
        }
    }

    // =========================================================================
    // QUERIES AND EDITS
    // =========================================================================

    /// Generates the data stages of `coord` on the calling thread and stores
    /// the tile. Does not queue a mesh build.
    fn generate_sync(&mut self, coord: TileCoord) -> &mut Tile {
        let pipeline = Arc::clone(&self.pipeline);
        self.registry.entry(coord).or_insert_with(|| {
            tracing::debug!("Generating tile ({}, {}) synchronously", coord.x, coord.z);
            self.stats.generated_sync += 1;
            pipeline.generate(coord).0
        })
    }

    /// Nearest-cell height at `position`. Generates the owning tile on the
    /// calling thread if it is absent.
    pub fn height_at(&mut self, position: Vec2) -> f32 {
        let coord = TileCoord::from_world(position, self.pipeline.layout().tile_size);
        if !self.registry.contains_key(&coord) {
            let tile = self.generate_sync(coord).clone();
            self.remesh(tile);
        }
        self.registry
            .get(&coord)
            .and_then(|tile| tile.height_at_world(position))
            .unwrap_or(0.0)
    }

    /// Flattens `area` to `height` on every tile touched by its corners and
    /// centre. Each tile receives the rect clipped to its extent; absent
    /// tiles are generated first. Changed tiles are re-meshed and
    /// replicated once the rebuild drains. Returns true if any tile changed.
    pub fn flatten_area(&mut self, area: Rect, height: f32) -> bool {
        let tile_size = self.pipeline.layout().tile_size;
        let mut coords: Vec<TileCoord> = area
            .sample_points()
            .iter()
            .map(|&p| TileCoord::from_world(p, tile_size))
            .collect();
        coords.sort_unstable();
        coords.dedup();

        let mut any_changed = false;
        for coord in coords {
            let Some(clipped) = area.intersection(&coord.bounds(tile_size)) else {
                continue;
            };
            let existed = self.registry.contains_key(&coord);
            let tile = self.generate_sync(coord);
            let changed = tile.flatten(clipped, height);
            if changed || !existed {
                let copy = tile.clone();
                self.remesh(copy);
            }
            if changed {
                self.stats.edits += 1;
                any_changed = true;
                tracing::debug!("Flattened tile ({}, {}) to {}", coord.x, coord.z, height);
            }
        }
        any_changed
    }

    // =========================================================================
    // EVICTION
    // =========================================================================

    /// Evicts unedited, idle tiles farther than the load radius plus slack
    /// from every focus. `foci` are local viewer positions; remote viewer
    /// positions from their last request are added. Without any focus
    /// nothing is evicted. Returns the evicted coordinates.
    pub fn evict_far_tiles(&mut self, foci: &[Vec2]) -> Vec<TileCoord> {
        let tile_size = self.pipeline.layout().tile_size;
        let focus_tiles: Vec<TileCoord> = foci
            .iter()
            .chain(self.remote_foci.values())
            .map(|&p| TileCoord::from_world(p, tile_size))
            .collect();
        if focus_tiles.is_empty() {
            return Vec::new();
        }

        let settings = &self.pipeline.config().streaming;
        #[allow(clippy::cast_sign_loss)]
        let keep = self.pipeline.config().load_radius_tiles().max(0) as u32 + settings.eviction_slack_tiles;
        let nearest = |coord: TileCoord| {
            focus_tiles
                .iter()
                .map(|&f| coord.chebyshev_distance(f))
                .min()
                .unwrap_or(u32::MAX)
        };

        let mut candidates: Vec<(u32, TileCoord)> = self
            .registry
            .values()
            .filter(|t| !t.is_edited() && !self.in_flight.contains_key(&t.coord()))
            .map(|t| (nearest(t.coord()), t.coord()))
            .filter(|&(d, _)| d > keep)
            .collect();
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.truncate(settings.max_evictions_per_tick);

        let evicted: Vec<TileCoord> = candidates.into_iter().map(|(_, c)| c).collect();
        for &coord in &evicted {
            self.registry.remove(&coord);
            self.payloads.remove(&coord);
            if self.presented.remove(&coord) {
                self.presenter.release(coord);
            }
        }
        if !evicted.is_empty() {
            tracing::debug!("Evicted {} tiles", evicted.len());
            self.stats.evicted += evicted.len() as u64;
        }
        evicted
    }

    /// Forwards a viewer's activation to the presenter.
    pub fn present_activation(&mut self, activation: &Activation) {
        if !activation.is_empty() {
            self.presenter.apply_activation(activation);
        }
    }

    /// Stops and joins the workers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamingError::WorkerPanicked`] if a worker panicked.
    pub fn shutdown(&mut self) -> StreamingResult<()> {
        tracing::info!(
            "Shutting down streaming service ({} tiles, {} outstanding)",
            self.registry.len(),
            self.outstanding()
        );
        self.workers.shutdown()
    }
}

impl TileSource for StreamingService {
    fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tile_at(coord)
    }

    fn request(&mut self, coords: &[TileCoord], _focus: Vec2) {
        self.request_tiles(coords);
    }
}

impl std::fmt::Debug for StreamingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingService")
            .field("tiles", &self.registry.len())
            .field("outstanding", &self.outstanding())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FLUSH: Duration = Duration::from_secs(30);

    fn config() -> TerrainConfig {
        TerrainConfig {
            interior_resolution: 16,
            ..TerrainConfig::default()
        }
    }

    #[test]
    fn test_duplicate_requests_produce_one_tile() {
        let pipeline = Arc::new(GenerationPipeline::new(config()).unwrap());
        let generated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&generated);
        let data = Arc::clone(&pipeline);
        let mesh = Arc::clone(&pipeline);
        let workers = WorkerPipeline::spawn(
            Duration::from_millis(1),
            move |coord| {
                counter.fetch_add(1, Ordering::SeqCst);
                data.generate(coord).0
            },
            move |mut tile| {
                mesh.build_referenced_meshes(&mut tile);
                tile
            },
        )
        .unwrap();
        let mut service = StreamingService::from_parts(pipeline, workers, Box::new(NullPresenter));

        let coord = TileCoord::new(3, 3);
        assert_eq!(service.request_tiles(&[coord, coord]), 1);
        assert_eq!(service.request_tiles(&[coord]), 0);
        assert!(service.flush(FLUSH));
        assert_eq!(service.request_tiles(&[coord]), 0);

        assert_eq!(generated.load(Ordering::SeqCst), 1);
        assert_eq!(service.stats().drained, 1);
        assert_eq!(service.tile_count(), 1);
        service.shutdown().unwrap();
    }

    #[test]
    fn test_is_loading() {
        let mut service = StreamingService::new(config()).unwrap();
        assert!(service.is_loading());
        service.request_tiles(&[TileCoord::new(0, 0)]);
        assert!(service.is_loading());
        assert!(service.flush(FLUSH));
        assert!(!service.is_loading());
        service.shutdown().unwrap();
    }

    #[test]
    fn test_height_query_generates_missing_tile() {
        let mut service = StreamingService::new(config()).unwrap();
        assert!(service.tile_at(TileCoord::new(-1, 0)).is_none());

        let h = service.height_at(Vec2::new(-30.0, 40.0));
        let tile = service.tile_at(TileCoord::new(-1, 0)).unwrap();
        assert_eq!(tile.height_at_world(Vec2::new(-30.0, 40.0)), Some(h));
        assert_eq!(service.stats().generated_sync, 1);

        // The blocking path also queued the mesh build.
        assert!(service.flush(FLUSH));
        assert_eq!(
            service.tile_at(TileCoord::new(-1, 0)).unwrap().state(),
            TileState::SeamAdjusted
        );
        service.shutdown().unwrap();
    }

    #[test]
    fn test_stale_result_is_rejected() {
        let mut service = StreamingService::new(config()).unwrap();
        let coord = TileCoord::new(0, 0);
        service.request_tiles(&[coord]);

        // Edit before the background result drains.
        assert!(service.flatten_area(Rect::new(10.0, 10.0, 20.0, 20.0), 33.0));
        assert!(service.flush(FLUSH));

        let tile = service.tile_at(coord).unwrap();
        assert_eq!(tile.revision(), 1);
        assert_eq!(tile.height_at_world(Vec2::new(20.0, 20.0)), Some(33.0));
        assert!(tile.state() >= TileState::MeshBuilt);
        service.shutdown().unwrap();
    }

    #[test]
    fn test_eviction_needs_a_focus() {
        let mut service = StreamingService::new(config()).unwrap();
        service.height_at(Vec2::new(5000.0, 5000.0));
        assert!(service.flush(FLUSH));
        assert!(service.evict_far_tiles(&[]).is_empty());

        let evicted = service.evict_far_tiles(&[Vec2::new(0.0, 0.0)]);
        assert_eq!(evicted, vec![TileCoord::new(50, 50)]);
        assert_eq!(service.tile_count(), 0);
        service.shutdown().unwrap();
    }
}

//! # Streaming Scenario Tests
//!
//! End-to-end behaviour of the authority: edits through the service,
//! request deduplication, activation safety, eviction, presentation events
//! and worker failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tessera_procedural::{GenerationPipeline, Tile, TileCoord, TileState};
use tessera_shared::{DetailLevelPreset, Rect, TerrainConfig, Vec2};
use tessera_streaming::{
    NullPresenter, Scheduler, StreamingError, StreamingService, TilePresenter, ViewerUpdate,
    WorkerPipeline,
};

const FLUSH: Duration = Duration::from_secs(30);

fn small_config() -> TerrainConfig {
    TerrainConfig {
        interior_resolution: 16,
        detail_levels: vec![
            DetailLevelPreset::new(60.0, 0, 1),
            DetailLevelPreset::new(100.0, 2, 3),
        ],
        ..TerrainConfig::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Materialize(TileCoord),
    Refresh(TileCoord, u32),
    Release(TileCoord),
}

#[derive(Clone, Default)]
struct RecordingPresenter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl TilePresenter for RecordingPresenter {
    fn materialize(&mut self, tile: &Tile) {
        self.events.lock().push(Event::Materialize(tile.coord()));
    }

    fn refresh(&mut self, tile: &Tile) {
        self.events.lock().push(Event::Refresh(tile.coord(), tile.revision()));
    }

    fn release(&mut self, coord: TileCoord) {
        self.events.lock().push(Event::Release(coord));
    }
}

/// Test: Flatten (25,25,50,50) to 50 on a default tile, then query.
#[test]
fn test_flatten_then_height_query() {
    let mut service = StreamingService::new(TerrainConfig::default()).unwrap();

    assert!(service.flatten_area(Rect::new(25.0, 25.0, 50.0, 50.0), 50.0));
    assert_eq!(service.height_at(Vec2::new(25.0, 25.0)), 50.0);
    assert_eq!(service.height_at(Vec2::new(50.0, 50.0)), 50.0);

    // Still true once the rebuild has drained.
    assert!(service.flush(FLUSH));
    assert_eq!(service.height_at(Vec2::new(25.0, 25.0)), 50.0);
    assert_eq!(service.height_at(Vec2::new(50.0, 50.0)), 50.0);
    let tile = service.tile_at(TileCoord::new(0, 0)).unwrap();
    assert_eq!(tile.state(), TileState::SeamAdjusted);
    assert_eq!(tile.revision(), 1);
    service.shutdown().unwrap();
}

/// Test: A rect across a tile corner edits all four tiles.
#[test]
fn test_flatten_across_tile_corner() {
    let mut service = StreamingService::new(small_config()).unwrap();
    let area = Rect::new(80.0, 80.0, 40.0, 40.0);

    assert!(service.flatten_area(area, -3.0));
    for p in [
        Vec2::new(85.0, 85.0),
        Vec2::new(115.0, 85.0),
        Vec2::new(85.0, 115.0),
        Vec2::new(115.0, 115.0),
        Vec2::new(100.0, 100.0),
    ] {
        assert_eq!(service.height_at(p), -3.0, "at {p:?}");
    }
    for coord in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let tile = service.tile_at(TileCoord::new(coord.0, coord.1)).unwrap();
        assert!(tile.is_edited());
    }
    assert_eq!(service.stats().edits, 4);

    // Same edit again changes nothing.
    assert!(!service.flatten_area(area, -3.0));
    service.shutdown().unwrap();
}

/// Test: Requesting a coordinate twice before the workers run yields one
/// tile.
#[test]
fn test_request_deduplication() {
    let pipeline = Arc::new(GenerationPipeline::new(small_config()).unwrap());
    let generated = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&generated);
    let data = Arc::clone(&pipeline);
    let mesh = Arc::clone(&pipeline);
    let workers = WorkerPipeline::spawn(
        Duration::from_millis(1),
        move |coord| {
            // Slow enough that the second request lands while queued.
            std::thread::sleep(Duration::from_millis(20));
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

    let coord = TileCoord::new(-4, 9);
    service.request_tiles(&[coord]);
    service.request_tiles(&[coord]);
    assert_eq!(service.outstanding(), 1);
    assert!(service.flush(FLUSH));

    assert_eq!(generated.load(Ordering::SeqCst), 1);
    assert_eq!(service.stats().drained, 1);
    assert_eq!(service.tile_count(), 1);
    service.shutdown().unwrap();
}

/// Test: Every activation only references built levels, including while
/// edits force rebuilds.
#[test]
fn test_activation_only_uses_built_levels() {
    let mut scheduler = Scheduler::new(StreamingService::new(small_config()).unwrap());
    let id = scheduler.add_viewer(Vec2::new(50.0, 50.0));

    let mut activations = 0;
    let deadline = Instant::now() + FLUSH;
    let mut position = Vec2::new(50.0, 50.0);
    while activations < 4 {
        assert!(Instant::now() < deadline, "viewer stalled");
        let tick = scheduler.run_tick();
        if let ViewerUpdate::Activated(activation) = &tick.viewers[0] {
            activations += 1;
            for entry in activation.entered.iter().chain(&activation.changed) {
                let tile = scheduler.service().tile_at(entry.coord).unwrap();
                assert!(tile.state() >= TileState::MeshBuilt);
                assert!(tile.has_level(entry.display_level));
                assert!(tile.has_level(entry.collision_level));
            }

            // Edit the ring and move on; the next ring must wait for rebuilds.
            let edit = Rect::new(position.x - 10.0, position.y - 10.0, 20.0, 20.0);
            scheduler.service_mut().flatten_area(edit, activations as f32);
            position.x += 100.0;
            scheduler.set_viewer_position(id, position);
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    scheduler.shutdown().unwrap();
}

/// Test: Eviction drops far, unedited tiles and keeps edited ones.
#[test]
fn test_eviction_keeps_edited_tiles() {
    let presenter = RecordingPresenter::default();
    let events = Arc::clone(&presenter.events);
    let mut service = StreamingService::with_presenter(small_config(), Box::new(presenter)).unwrap();

    for x in 0..3 {
        service.height_at(Vec2::new(5000.0 + x as f32 * 100.0, 5000.0));
    }
    assert!(service.flatten_area(Rect::new(5110.0, 5010.0, 10.0, 10.0), 1.0));
    assert!(service.flush(FLUSH));
    assert_eq!(service.tile_count(), 3);

    let mut evicted = service.evict_far_tiles(&[Vec2::ZERO]);
    evicted.sort_unstable();
    assert_eq!(evicted, vec![TileCoord::new(50, 50), TileCoord::new(52, 50)]);
    assert!(service.tile_at(TileCoord::new(51, 50)).is_some());

    let events = events.lock();
    assert!(events.contains(&Event::Release(TileCoord::new(50, 50))));
    assert!(events.contains(&Event::Release(TileCoord::new(52, 50))));
    assert!(!events.contains(&Event::Release(TileCoord::new(51, 50))));
    drop(events);
    service.shutdown().unwrap();
}

/// Test: Eviction is capped per call.
#[test]
fn test_eviction_cap() {
    let mut config = small_config();
    config.streaming.max_evictions_per_tick = 2;
    let mut service = StreamingService::new(config).unwrap();
    for x in 0..5 {
        service.height_at(Vec2::new(-8000.0 - x as f32 * 100.0, 0.0));
    }
    assert!(service.flush(FLUSH));

    assert_eq!(service.evict_far_tiles(&[Vec2::ZERO]).len(), 2);
    assert_eq!(service.evict_far_tiles(&[Vec2::ZERO]).len(), 2);
    assert_eq!(service.evict_far_tiles(&[Vec2::ZERO]).len(), 1);
    assert_eq!(service.tile_count(), 0);
    service.shutdown().unwrap();
}

/// Test: A tile is materialized once and refreshed after each edit.
#[test]
fn test_presenter_sees_materialize_then_refresh() {
    let presenter = RecordingPresenter::default();
    let events = Arc::clone(&presenter.events);
    let mut service = StreamingService::with_presenter(small_config(), Box::new(presenter)).unwrap();
    let coord = TileCoord::new(2, 2);

    service.request_tiles(&[coord]);
    assert!(service.flush(FLUSH));
    assert!(service.flatten_area(Rect::new(210.0, 210.0, 20.0, 20.0), 9.0));
    assert!(service.flush(FLUSH));

    assert_eq!(
        *events.lock(),
        vec![Event::Materialize(coord), Event::Refresh(coord, 1)]
    );
    service.shutdown().unwrap();
}

/// Test: A panicking worker is reported by shutdown.
#[test]
fn test_worker_panic_is_fatal_on_shutdown() {
    let pipeline = Arc::new(GenerationPipeline::new(small_config()).unwrap());
    let workers = WorkerPipeline::spawn(
        Duration::from_millis(1),
        |coord: TileCoord| -> Tile { panic!("cannot generate ({}, {})", coord.x, coord.z) },
        |tile| tile,
    )
    .unwrap();
    let mut service = StreamingService::from_parts(pipeline, workers, Box::new(NullPresenter));

    service.request_tiles(&[TileCoord::new(0, 0)]);
    assert!(!service.flush(Duration::from_millis(200)));
    assert!(service.is_loading());

    let err = service.shutdown().unwrap_err();
    assert!(matches!(err, StreamingError::WorkerPanicked { .. }), "{err}");
}

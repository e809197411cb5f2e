//! # Generation Property Tests
//!
//! Determinism, seam agreement, flatten behaviour and detail-level
//! selection across whole tiles.

use tessera_procedural::{GenerationPipeline, TileCoord, TileState};
use tessera_shared::{BiomeDefinition, Rect, TerrainConfig, Vec2};

fn pipeline() -> GenerationPipeline {
    GenerationPipeline::new(TerrainConfig::default()).unwrap()
}

/// Test: Running the data stages twice gives bit-identical buffers.
#[test]
fn test_data_stages_are_idempotent() {
    let pipeline = pipeline();
    let coord = TileCoord::new(3, -7);

    let (first, _) = pipeline.generate(coord);
    let (mut second, _) = pipeline.generate(coord);
    pipeline.run_data_stages(&mut second);

    let bits = |v: &[f32]| v.iter().map(|h| h.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(first.heights()), bits(second.heights()));
    assert_eq!(bits(first.raw_heights()), bits(second.raw_heights()));
    assert_eq!(first.biomes(), second.biomes());
    assert_eq!(bits(first.biome_weights()), bits(second.biome_weights()));
}

/// Test: Neighbouring tiles agree on every sample they share.
#[test]
fn test_neighbours_agree_in_overlap() {
    let pipeline = pipeline();
    let layout = *pipeline.layout();
    let size = layout.data_size();
    let r = layout.interior_resolution as usize;
    let m = layout.blend_margin as usize;

    for (a, b) in [
        (TileCoord::new(0, 0), TileCoord::new(1, 0)),
        (TileCoord::new(-5, 2), TileCoord::new(-4, 2)),
    ] {
        let (left, _) = pipeline.generate(a);
        let (right, _) = pipeline.generate(b);

        // Right's columns 0..=2m are left's columns r..=r+2m.
        for j in 0..size {
            for i in 0..=2 * m {
                let l = j * size + r + i;
                let k = j * size + i;
                assert_eq!(left.biomes()[l], right.biomes()[k]);
                assert_eq!(left.raw_heights()[l].to_bits(), right.raw_heights()[k].to_bits());
            }
        }

        // The shared edge is blended from identical neighbourhoods.
        for gy in 0..=r {
            assert_eq!(
                left.interior_height(r, gy).map(f32::to_bits),
                right.interior_height(0, gy).map(f32::to_bits),
            );
        }
    }
}

/// Test: Vertical neighbours agree too.
#[test]
fn test_vertical_neighbours_share_edge() {
    let pipeline = pipeline();
    let r = pipeline.layout().interior_resolution as usize;
    let bottom = pipeline.generate_complete(TileCoord::new(2, 4));
    let top = pipeline.generate_complete(TileCoord::new(2, 5));

    for gx in 0..=r {
        assert_eq!(bottom.interior_height(gx, r), top.interior_height(gx, 0));
    }

    // Edge vertices of the coarsest mesh line up with the finest.
    let coarse_b = bottom.mesh(3).unwrap();
    let coarse_t = top.mesh(3).unwrap();
    let edge = |mesh: &tessera_procedural::MeshData, row: u32| {
        let mut v: Vec<(u32, u32)> = mesh
            .grid_indices
            .iter()
            .zip(&mesh.positions)
            .filter(|(g, _)| g[1] == row)
            .map(|(g, p)| (g[0], p[1].to_bits()))
            .collect();
        v.sort_unstable();
        v
    };
    assert_eq!(edge(coarse_b, r as u32), edge(coarse_t, 0));
}

/// Test: A flattened rect reads back its target height everywhere inside.
#[test]
fn test_flatten_containment() {
    let pipeline = pipeline();
    let (mut tile, _) = pipeline.generate(TileCoord::new(0, 0));
    let rect = Rect::new(12.5, 30.0, 41.0, 22.0);

    assert!(tile.flatten(rect, -4.0));
    for i in 1..40 {
        for j in 1..20 {
            let p = Vec2::new(
                rect.min.x + rect.width() * i as f32 / 40.0,
                rect.min.y + rect.height() * j as f32 / 20.0,
            );
            assert_eq!(tile.height_at_world(p), Some(-4.0), "at {p:?}");
        }
    }
}

/// Test: Flatten outside the padded bounds is a no-op.
#[test]
fn test_flatten_outside_is_rejected() {
    let pipeline = pipeline();
    let (mut tile, _) = pipeline.generate(TileCoord::new(0, 0));
    let before = tile.heights().to_vec();
    let stamp = tile.last_changed();

    assert!(!tile.flatten(Rect::new(80.0, 20.0, 40.0, 10.0), 9.0));
    assert_eq!(tile.heights(), before.as_slice());
    assert_eq!(tile.last_changed(), stamp);
    assert_eq!(tile.revision(), 0);
}

/// Test: The second identical flatten reports no change.
#[test]
fn test_flatten_idempotence_and_remesh() {
    let pipeline = pipeline();
    let mut tile = pipeline.generate_complete(TileCoord::new(0, 0));
    assert_eq!(tile.state(), TileState::SeamAdjusted);

    let rect = Rect::new(25.0, 25.0, 50.0, 50.0);
    assert!(tile.flatten(rect, 50.0));
    assert_eq!(tile.state(), TileState::Blended);
    let snapshot = tile.heights().to_vec();
    assert!(!tile.flatten(rect, 50.0));
    assert_eq!(tile.heights(), snapshot.as_slice());

    pipeline.build_referenced_meshes(&mut tile);
    assert_eq!(tile.state(), TileState::SeamAdjusted);
    assert_eq!(tile.height_at_world(Vec2::new(25.0, 25.0)), Some(50.0));
    assert_eq!(tile.height_at_world(Vec2::new(50.0, 50.0)), Some(50.0));
}

/// Test: Farther viewers never get a finer level.
#[test]
fn test_detail_level_monotonicity() {
    let pipeline = pipeline();
    let table = pipeline.detail_levels();
    let distances: Vec<f32> = (0..400).map(|i| i as f32 * 2.5).collect();
    for pair in distances.windows(2) {
        assert!(table.select_level(pair[1]) >= table.select_level(pair[0]));
        assert!(table.select_collision_level(pair[1]) >= table.select_collision_level(pair[0]));
    }
}

/// Test: Flat single-biome world, coarsest level of the centre tile of a
/// 3×3 block of 240-unit tiles.
///
/// The coarse lattice holds `(R/stride + 1)²` vertices; the skirt adds
/// `4 · (R/stride) · (stride - 1)` fine edge vertices after it.
#[test]
fn test_flat_world_coarsest_level_lattice_and_skirt_counts() {
    let config = TerrainConfig {
        tile_size: 240.0,
        biomes: vec![BiomeDefinition::flat("flat", 0.0)],
        ..TerrainConfig::default()
    };
    let pipeline = GenerationPipeline::new(config).unwrap();
    let coarsest = *pipeline.referenced_levels().last().unwrap();
    let stride = pipeline.detail_levels().stride(coarsest).unwrap();
    let r = pipeline.layout().interior_resolution;

    let tiles: Vec<_> = TileCoord::new(0, 0)
        .ring(1)
        .into_iter()
        .map(|c| pipeline.generate_complete(c))
        .collect();
    let center = tiles.iter().find(|t| t.coord() == TileCoord::new(0, 0)).unwrap();
    let mesh = center.mesh(coarsest).unwrap();

    let expected = (r / stride + 1) * (r / stride + 1);
    assert_eq!(mesh.lattice_vertex_count, expected);
    assert_eq!(mesh.lattice_positions().count(), expected as usize);
    let skirt = 4 * (r / stride) * (stride - 1);
    assert_eq!(mesh.vertex_count(), (expected + skirt) as usize);
    assert!(skirt > 0);
    assert!(mesh.positions.iter().all(|p| p[1] == 0.0));
    assert!(mesh.normals.iter().all(|n| (n[1] - 1.0).abs() < 1e-6));
}

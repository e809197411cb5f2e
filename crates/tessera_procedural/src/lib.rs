//! # Tessera Procedural Generation
//!
//! Deterministic terrain generation for an unbounded, biome-blended world.
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: Same seed always produces the same world
//! 2. **Tiled**: The world is generated in fixed-size square tiles
//! 3. **Seamless**: Neighbouring tiles agree bit-for-bit on shared samples
//! 4. **Multi-resolution**: Each tile carries meshes for several detail levels
//!
//! ## Core Components
//!
//! - `BiomeField`: world coordinate → biome and elevation
//! - `Tile`: layered height/biome buffers plus per-level mesh cache
//! - `GenerationPipeline`: Classify → SampleHeight → Blend → BuildMesh
//! - `DetailLevelTable`: viewer distance → detail level
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_procedural::{GenerationPipeline, TileCoord};
//! use tessera_shared::TerrainConfig;
//!
//! let pipeline = GenerationPipeline::new(TerrainConfig::default())?;
//! let tile = pipeline.generate_complete(TileCoord::new(0, 0));
//! assert!(tile.mesh(0).is_some());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod biome;
pub mod lod;
pub mod mesh;
pub mod noise;
pub mod pipeline;
pub mod tile;

pub use biome::{BiomeField, BiomeId, FieldSample};
pub use lod::DetailLevelTable;
pub use mesh::{MeshBuilder, MeshData};
pub use noise::{FractalNoise, WarpedCellNoise, WorldSeed};
pub use pipeline::{GenerationPipeline, GenerationReport};
pub use tile::{Tile, TileBuffers, TileCoord, TileLayout, TileState};

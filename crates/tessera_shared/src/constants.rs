//! # Engine Constants
//!
//! Defaults baked into both the authority and remote viewers.
//!
//! **CRITICAL:** the payload constants are part of the wire format.
//! Changing them breaks replication between mismatched builds.

// =============================================================================
// TILE GEOMETRY
// =============================================================================

/// Default tile edge length in world units.
pub const DEFAULT_TILE_SIZE: f32 = 100.0;

/// Default number of cells across a tile's interior.
pub const DEFAULT_INTERIOR_RESOLUTION: u32 = 64;

/// Default number of extra border samples used for blending.
pub const DEFAULT_BLEND_MARGIN: u32 = 2;

/// Default vertex stride per detail level (index 0 is the finest).
pub const DEFAULT_DETAIL_STRIDES: [u32; 4] = [1, 2, 4, 8];

/// Largest interior resolution a tile may use.
pub const MAX_INTERIOR_RESOLUTION: u32 = 1 << 9;

/// Largest number of biome classes.
pub const MAX_BIOME_COUNT: u32 = 64;

/// Largest number of detail levels (stride table entries).
pub const MAX_DETAIL_LEVELS: usize = 8;

/// Default world seed.
pub const DEFAULT_WORLD_SEED: u64 = 0xDEAD_BEEF_CAFE_BABE;

// =============================================================================
// STREAMING
// =============================================================================

/// Tick rate of the authoritative update loop (updates per second).
pub const TICK_RATE: u32 = 60;

/// Worker idle poll interval in milliseconds.
pub const WORKER_IDLE_POLL_MS: u64 = 2;

/// Extra rings of tiles kept resident beyond the load radius.
pub const EVICTION_SLACK_TILES: u32 = 2;

// =============================================================================
// REPLICATION WIRE FORMAT
// =============================================================================

/// Magic prefix of an encoded tile payload ("TSRA").
pub const PAYLOAD_MAGIC: u32 = 0x4152_5354;

/// Payload format version.
pub const PAYLOAD_VERSION: u16 = 1;

/// Upper bound on a decompressed payload body.
///
/// Heights and biome ids over the largest data buffer, the weight planes,
/// and one mesh per detail level (lattice plus skirt vertices at 40 bytes,
/// two triangles per cell on both).
pub const MAX_PAYLOAD_BODY_BYTES: usize = {
    let res = MAX_INTERIOR_RESOLUTION as usize;
    let data_side = 3 * res + 1;
    let lattice = (res + 1) * (res + 1);
    let data = data_side * data_side * 6;
    let weights = MAX_BIOME_COUNT as usize * lattice * 4;
    let mesh = 2 * lattice * 40 + 2 * 6 * lattice * 4;
    64 + data + weights + MAX_DETAIL_LEVELS * (16 + mesh)
};

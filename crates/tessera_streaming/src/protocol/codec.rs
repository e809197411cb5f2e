//! # Tile Payload Codec
//!
//! Binary encoding of a finished tile for replication.
//!
//! ## Format
//!
//! ```text
//! magic u32 | version u16 | lz4( size-prefixed body )
//!
//! body:
//!   coord.x i32 | coord.z i32 | revision u32 | state u8
//!   tile_size f32 | resolution u32 | margin u32 | biome_count u32
//!   heights  [f32; DataSize²]
//!   biomes   [u16; DataSize²]
//!   weights  [f32; biome_count · MeshRes²]
//!   mesh_count u32
//!   per mesh:
//!     level u32 | lattice u32 | vertices u32 | indices u32
//!     positions [[f32; 3]] | normals [[f32; 3]] | uvs [[f32; 2]]
//!     grid [[u32; 2]] | indices [u32]
//! ```
//!
//! Scalars are little-endian. Arrays are written as raw `Pod` memory, so
//! both ends must share endianness (all supported targets are
//! little-endian).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::Pod;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use tessera_procedural::{MeshData, Tile, TileBuffers, TileCoord, TileLayout, TileState};
use tessera_shared::{
    MAX_BIOME_COUNT, MAX_DETAIL_LEVELS, MAX_INTERIOR_RESOLUTION, MAX_PAYLOAD_BODY_BYTES,
    PAYLOAD_MAGIC, PAYLOAD_VERSION,
};

use crate::error::{CodecError, CodecResult};

/// An encoded tile, cheap to clone and send to many viewers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TilePayload {
    /// Tile the payload describes.
    pub coord: TileCoord,
    /// Edit revision of the encoded tile.
    pub revision: u32,
    /// Header plus compressed body.
    pub bytes: Arc<[u8]>,
}

impl TilePayload {
    /// Encodes a tile with all of its built meshes.
    #[must_use]
    pub fn encode(tile: &Tile) -> Self {
        let layout = tile.layout();
        let mut body = PayloadWriter::with_capacity(
            layout.data_len() * 6 + layout.weights_len() * 4 + 64,
        );

        body.write_i32(tile.coord().x);
        body.write_i32(tile.coord().z);
        body.write_u32(tile.revision());
        body.write_u8(tile.state() as u8);
        body.write_f32(layout.tile_size);
        body.write_u32(layout.interior_resolution);
        body.write_u32(layout.blend_margin);
        body.write_u32(layout.biome_count);

        body.write_pod_slice(tile.heights());
        body.write_pod_slice(tile.biomes());
        body.write_pod_slice(tile.biome_weights());

        body.write_len(tile.meshes().len());
        for (&level, mesh) in tile.meshes() {
            body.write_u32(level);
            body.write_u32(mesh.lattice_vertex_count);
            body.write_len(mesh.positions.len());
            body.write_len(mesh.indices.len());
            body.write_pod_slice(&mesh.positions);
            body.write_pod_slice(&mesh.normals);
            body.write_pod_slice(&mesh.uvs);
            body.write_pod_slice(&mesh.grid_indices);
            body.write_pod_slice(&mesh.indices);
        }

        let compressed = compress_prepend_size(body.as_slice());
        let mut bytes = Vec::with_capacity(6 + compressed.len());
        bytes.extend_from_slice(&PAYLOAD_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&PAYLOAD_VERSION.to_le_bytes());
        bytes.extend_from_slice(&compressed);

        Self {
            coord: tile.coord(),
            revision: tile.revision(),
            bytes: bytes.into(),
        }
    }

    /// Encoded size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the payload back into a tile.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the bytes are not a well-formed payload
    /// or disagree with the `coord`/`revision` carried alongside them.
    pub fn decode(&self) -> CodecResult<Tile> {
        let tile = decode_bytes(&self.bytes)?;
        if tile.coord() != self.coord {
            return Err(CodecError::InvalidField { field: "coord" });
        }
        if tile.revision() != self.revision {
            return Err(CodecError::InvalidField { field: "revision" });
        }
        Ok(tile)
    }
}

/// Decodes a raw payload.
///
/// # Errors
///
/// Returns a [`CodecError`] describing the first malformed field.
pub fn decode_bytes(bytes: &[u8]) -> CodecResult<Tile> {
    let mut header = PayloadReader::new(bytes);
    let magic = header.read_u32()?;
    if magic != PAYLOAD_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let version = header.read_u16()?;
    if version != PAYLOAD_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let declared = u32::from_le_bytes(header.clone().read_array()?) as usize;
    if declared > MAX_PAYLOAD_BODY_BYTES {
        return Err(CodecError::InconsistentDimensions("body size"));
    }
    let body = decompress_size_prepended(header.rest())
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    let mut r = PayloadReader::new(&body);

    let coord = TileCoord::new(r.read_i32()?, r.read_i32()?);
    let revision = r.read_u32()?;
    let state = TileState::from_u8(r.read_u8()?).ok_or(CodecError::InvalidField { field: "state" })?;
    let layout = TileLayout {
        tile_size: r.read_f32()?,
        interior_resolution: r.read_u32()?,
        blend_margin: r.read_u32()?,
        biome_count: r.read_u32()?,
    };
    if !(layout.tile_size.is_finite() && layout.tile_size > 0.0) {
        return Err(CodecError::InvalidField { field: "tile_size" });
    }
    if layout.interior_resolution == 0 || layout.biome_count == 0 {
        return Err(CodecError::InconsistentDimensions("zero resolution or biome count"));
    }
    if layout.interior_resolution > MAX_INTERIOR_RESOLUTION
        || layout.blend_margin > layout.interior_resolution
        || layout.biome_count > MAX_BIOME_COUNT
    {
        return Err(CodecError::InconsistentDimensions("tile layout out of range"));
    }
    let (data_len, weights_len) = layout
        .checked_lengths()
        .ok_or(CodecError::InconsistentDimensions("tile layout overflows"))?;

    let buffers = TileBuffers {
        heights: r.read_pod_vec(data_len)?,
        biomes: r.read_pod_vec(data_len)?,
        biome_weights: r.read_pod_vec(weights_len)?,
    };

    let mesh_count = r.read_u32()?;
    if mesh_count as usize > MAX_DETAIL_LEVELS {
        return Err(CodecError::InconsistentDimensions("mesh count"));
    }
    let mut meshes = BTreeMap::new();
    for _ in 0..mesh_count {
        let level = r.read_u32()?;
        let lattice_vertex_count = r.read_u32()?;
        let vertices = r.read_u32()? as usize;
        let index_count = r.read_u32()? as usize;
        if lattice_vertex_count as usize > vertices || index_count % 3 != 0 {
            return Err(CodecError::InconsistentDimensions("mesh counts"));
        }
        let mesh = MeshData {
            positions: r.read_pod_vec(vertices)?,
            normals: r.read_pod_vec(vertices)?,
            uvs: r.read_pod_vec(vertices)?,
            grid_indices: r.read_pod_vec(vertices)?,
            indices: r.read_pod_vec(index_count)?,
            lattice_vertex_count,
        };
        if mesh.indices.iter().any(|&i| i as usize >= vertices) {
            return Err(CodecError::InvalidField { field: "indices" });
        }
        meshes.insert(level, mesh);
    }

    if r.remaining() > 0 {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }

    Tile::from_replica(coord, layout, state, revision, buffers, meshes)
        .ok_or(CodecError::InconsistentDimensions("buffer length"))
}

/// Growable little-endian writer.
struct PayloadWriter {
    buffer: Vec<u8>,
}

impl PayloadWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_len(&mut self, len: usize) {
        self.write_u32(len as u32);
    }

    fn write_pod_slice<T: Pod>(&mut self, values: &[T]) {
        self.buffer.extend_from_slice(bytemuck::cast_slice(values));
    }
}

/// Bounds-checked reader over a byte slice.
#[derive(Clone)]
struct PayloadReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buffer[self.position.min(self.buffer.len())..]
    }

    fn take(&mut self, needed: usize) -> CodecResult<&'a [u8]> {
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.position,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Reads `count` values; the source need not be aligned.
    fn read_pod_vec<T: Pod>(&mut self, count: usize) -> CodecResult<Vec<T>> {
        let size = std::mem::size_of::<T>();
        let needed = count.checked_mul(size).ok_or(CodecError::Truncated {
            offset: self.position,
            needed: usize::MAX,
            available: self.remaining(),
        })?;
        let bytes = self.take(needed)?;
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_procedural::GenerationPipeline;
    use tessera_shared::{Rect, TerrainConfig};

    fn small_pipeline() -> GenerationPipeline {
        GenerationPipeline::new(TerrainConfig {
            interior_resolution: 16,
            ..TerrainConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_generated_tile_survives_encoding() {
        let pipeline = small_pipeline();
        let tile = pipeline.generate_complete(TileCoord::new(-2, 9));
        let payload = TilePayload::encode(&tile);
        let decoded = payload.decode().unwrap();

        assert_eq!(decoded.coord(), tile.coord());
        assert_eq!(decoded.state(), tile.state());
        assert_eq!(decoded.layout(), tile.layout());
        assert_eq!(decoded.heights(), tile.heights());
        assert_eq!(decoded.biomes(), tile.biomes());
        assert_eq!(decoded.biome_weights(), tile.biome_weights());
        assert_eq!(decoded.meshes(), tile.meshes());
    }

    #[test]
    fn test_revision_travels_with_payload() {
        let pipeline = small_pipeline();
        let mut tile = pipeline.generate_complete(TileCoord::new(0, 0));
        assert!(tile.flatten(Rect::new(10.0, 10.0, 20.0, 20.0), 4.0));
        pipeline.build_referenced_meshes(&mut tile);

        let payload = TilePayload::encode(&tile);
        assert_eq!(payload.revision, 1);
        assert_eq!(payload.decode().unwrap().revision(), 1);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = TilePayload::encode(&small_pipeline().generate_complete(TileCoord::new(0, 0)))
            .bytes
            .to_vec();
        bytes[0] ^= 0xFF;
        assert!(matches!(decode_bytes(&bytes), Err(CodecError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(decode_bytes(&[1, 2, 3]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = PAYLOAD_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(PAYLOAD_VERSION + 1).to_le_bytes());
        assert_eq!(
            decode_bytes(&bytes).unwrap_err(),
            CodecError::UnsupportedVersion(PAYLOAD_VERSION + 1)
        );
    }

    #[test]
    fn test_truncated_body() {
        let tile = small_pipeline().generate_complete(TileCoord::new(1, 1));
        let mut body = PayloadWriter::with_capacity(64);
        body.write_i32(1);
        body.write_i32(1);
        body.write_u32(0);
        body.write_u8(tile.state() as u8);
        body.write_f32(100.0);
        body.write_u32(16);
        body.write_u32(2);
        body.write_u32(3);
        body.write_pod_slice(&tile.heights()[..10]);

        let mut bytes = PAYLOAD_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&PAYLOAD_VERSION.to_le_bytes());
        bytes.extend_from_slice(&compress_prepend_size(body.as_slice()));
        assert!(matches!(decode_bytes(&bytes), Err(CodecError::Truncated { .. })));
    }

    fn frame(body: &PayloadWriter) -> Vec<u8> {
        let mut bytes = PAYLOAD_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&PAYLOAD_VERSION.to_le_bytes());
        bytes.extend_from_slice(&compress_prepend_size(body.as_slice()));
        bytes
    }

    fn header_with_layout(resolution: u32, margin: u32, biome_count: u32) -> PayloadWriter {
        let mut body = PayloadWriter::with_capacity(64);
        body.write_i32(0);
        body.write_i32(0);
        body.write_u32(0);
        body.write_u8(TileState::Blended as u8);
        body.write_f32(100.0);
        body.write_u32(resolution);
        body.write_u32(margin);
        body.write_u32(biome_count);
        body
    }

    #[test]
    fn test_hostile_layout_is_rejected() {
        for (resolution, margin, biomes) in [
            (u32::MAX, 2, 3),
            (16, u32::MAX, 3),
            (16, 2, u32::MAX),
            (MAX_INTERIOR_RESOLUTION + 1, 2, 3),
        ] {
            let bytes = frame(&header_with_layout(resolution, margin, biomes));
            assert!(
                matches!(decode_bytes(&bytes), Err(CodecError::InconsistentDimensions(_))),
                "layout ({resolution}, {margin}, {biomes})"
            );
        }
    }

    #[test]
    fn test_oversized_body_prefix_is_rejected() {
        let mut bytes = PAYLOAD_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&PAYLOAD_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0; 16]);
        assert_eq!(
            decode_bytes(&bytes).unwrap_err(),
            CodecError::InconsistentDimensions("body size")
        );
    }

    #[test]
    fn test_mismatched_envelope_is_rejected() {
        let tile = small_pipeline().generate_complete(TileCoord::new(0, 0));
        let mut payload = TilePayload::encode(&tile);
        payload.coord = TileCoord::new(5, 5);
        assert_eq!(
            payload.decode().unwrap_err(),
            CodecError::InvalidField { field: "coord" }
        );
    }

    #[test]
    fn test_compression_shrinks_flat_tiles() {
        let pipeline = GenerationPipeline::new(TerrainConfig {
            biomes: vec![tessera_shared::BiomeDefinition::flat("flat", 0.0)],
            ..TerrainConfig::default()
        })
        .unwrap();
        let (tile, _) = pipeline.generate(TileCoord::new(0, 0));
        let raw = tile.layout().data_len() * 6 + tile.layout().weights_len() * 4;
        assert!(TilePayload::encode(&tile).len() < raw / 4);
    }
}

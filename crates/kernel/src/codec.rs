//! Chunk blob codec: CBOR record, zstd compressed.

use std::io::{Read, Write};

use chunkstream_common::{ChunkBlob, ChunkCoord};
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, Material};
use crate::engine::EngineError;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    coord: ChunkCoord,
    size: u32,
    revision: u64,
    cells: Vec<u8>,
}

/// Serialize a chunk into an opaque blob.
pub fn encode_chunk(chunk: &Chunk) -> Result<ChunkBlob, EngineError> {
    let size = u32::try_from(chunk.size())
        .map_err(|_| EngineError::Encode(format!("chunk size {} too large", chunk.size())))?;
    let record = ChunkRecord {
        coord: chunk.coord(),
        size,
        revision: chunk.revision(),
        cells: chunk.cells().iter().map(|m| m.to_u8()).collect(),
    };

    let mut cbor = Vec::new();
    ciborium::into_writer(&record, &mut cbor).map_err(|e| EngineError::Encode(e.to_string()))?;

    let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    encoder
        .write_all(&cbor)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    Ok(ChunkBlob::new(compressed))
}

/// Decode a blob produced by [`encode_chunk`], checking it belongs to
/// `expected` and has the expected edge length.
pub fn decode_chunk(
    blob: &ChunkBlob,
    expected: ChunkCoord,
    expected_size: usize,
) -> Result<Chunk, EngineError> {
    let mut decoder =
        zstd::Decoder::new(blob.as_bytes()).map_err(|e| EngineError::Decode(e.to_string()))?;
    let mut cbor = Vec::new();
    decoder
        .read_to_end(&mut cbor)
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let record: ChunkRecord =
        ciborium::from_reader(cbor.as_slice()).map_err(|e| EngineError::Decode(e.to_string()))?;

    if record.coord != expected {
        return Err(EngineError::CoordMismatch {
            expected,
            found: record.coord,
        });
    }
    let size = record.size as usize;
    if size != expected_size {
        return Err(EngineError::SizeMismatch {
            expected: expected_size,
            found: size,
        });
    }
    if record.cells.len() != size * size {
        return Err(EngineError::Decode(format!(
            "expected {} cells, found {}",
            size * size,
            record.cells.len()
        )));
    }

    let cells = record
        .cells
        .iter()
        .map(|b| {
            Material::from_u8(*b)
                .ok_or_else(|| EngineError::Decode(format!("unknown material byte {b}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Chunk::from_parts(record.coord, size, cells, record.revision))
}

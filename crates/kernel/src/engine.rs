use chunkstream_common::{ChunkBlob, ChunkCoord};

/// Result of asking the engine to serialize a resident chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing changed since the last acknowledged save; no write is needed.
    Unchanged,
    /// Serialized state at `revision`.
    Saved { blob: ChunkBlob, revision: u64 },
}

/// Errors reported by an engine when a command cannot be carried out.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("chunk {0} is not resident")]
    NotResident(ChunkCoord),
    #[error("chunk {0} is already resident")]
    AlreadyResident(ChunkCoord),
    #[error("chunk {coord} has unpersisted changes (revision {revision}, persisted {persisted})")]
    UnpersistedChanges {
        coord: ChunkCoord,
        revision: u64,
        persisted: u64,
    },
    #[error("chunk encode error: {0}")]
    Encode(String),
    #[error("chunk decode error: {0}")]
    Decode(String),
    #[error("blob belongs to chunk {found}, expected {expected}")]
    CoordMismatch {
        expected: ChunkCoord,
        found: ChunkCoord,
    },
    #[error("blob has chunk size {found}, expected {expected}")]
    SizeMismatch { expected: usize, found: usize },
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// The operations a streaming coordinator needs from a simulation engine.
///
/// The engine owns the resident set and all liveness policy. Implementations
/// must be internally synchronized: the coordinator calls these from its own
/// task while the simulation keeps running elsewhere.
pub trait ChunkEngine: Send + Sync {
    /// Chunks the engine needs but does not hold resident.
    fn missing_chunks(&self) -> Vec<ChunkCoord>;

    /// Install persisted state for a missing chunk.
    fn load_chunk(&self, coord: ChunkCoord, blob: ChunkBlob) -> Result<(), EngineError>;

    /// Synthesize fresh state for a chunk with no persisted history.
    fn generate_chunk(&self, coord: ChunkCoord) -> Result<(), EngineError>;

    /// Every currently resident chunk.
    fn loaded_chunks(&self) -> Vec<ChunkCoord>;

    /// Serialize a resident chunk, or report that no write is needed.
    fn save_chunk(&self, coord: ChunkCoord) -> Result<SaveOutcome, EngineError>;

    /// Resident chunks eligible for eviction.
    fn droppable_chunks(&self) -> Vec<ChunkCoord>;

    /// Evict a resident chunk from memory.
    fn drop_chunk(&self, coord: ChunkCoord) -> Result<(), EngineError>;

    /// Called after the blob saved at `revision` was durably written.
    ///
    /// Engines that track a dirty signal use this to stop reporting the chunk
    /// as changed. Engines without one can keep the default no-op.
    fn chunk_persisted(&self, _coord: ChunkCoord, _revision: u64) {}
}

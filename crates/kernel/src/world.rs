use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chunkstream_common::{ChunkBlob, ChunkCoord};
use glam::IVec2;

use crate::chunk::{Chunk, Material};
use crate::codec::{decode_chunk, encode_chunk};
use crate::engine::{ChunkEngine, EngineError, SaveOutcome};
use crate::generator::Generator;

/// Shape and liveness policy of a [`ChunkWorld`].
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Edge length of a chunk, in cells.
    pub chunk_size: usize,
    /// Chunks within this Chebyshev distance of the focus chunk are needed.
    pub load_radius: u32,
    /// Resident chunks farther than this from the focus chunk may be dropped.
    pub drop_radius: u32,
    /// Terrain seed.
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            load_radius: 2,
            drop_radius: 3,
            seed: 0,
        }
    }
}

/// A record of every resident-set change and mutation in the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// Chunk synthesized from the generator.
    Generated { coord: ChunkCoord },
    /// Chunk installed from a persisted blob.
    Loaded { coord: ChunkCoord, revision: u64 },
    /// Chunk serialized for writing.
    Saved { coord: ChunkCoord, revision: u64 },
    /// Write of `revision` acknowledged as durable.
    Persisted { coord: ChunkCoord, revision: u64 },
    /// Chunk evicted from memory.
    Dropped { coord: ChunkCoord },
    /// A cell changed.
    CellWritten { pos: IVec2, material: Material },
}

#[derive(Debug, Default)]
struct WorldState {
    chunks: BTreeMap<ChunkCoord, Chunk>,
    focus: IVec2,
    event_log: Vec<ChunkEvent>,
}

/// In-memory chunked world implementing [`ChunkEngine`].
///
/// Liveness is purely distance based: chunks around the focus cell within
/// `load_radius` are needed, resident chunks beyond `drop_radius` may go.
/// All state sits behind one mutex so the simulation side (`write_cell`,
/// `set_focus`) and a streaming coordinator can share the world through an
/// `Arc`.
///
/// Uses BTreeMap so every enumeration comes back in coordinate order.
#[derive(Debug)]
pub struct ChunkWorld {
    config: WorldConfig,
    generator: Generator,
    state: Mutex<WorldState>,
}

impl ChunkWorld {
    /// Create an empty world focused on the origin.
    pub fn new(config: WorldConfig) -> Result<Self, EngineError> {
        if config.chunk_size == 0 {
            return Err(EngineError::InvalidConfig(
                "chunk_size must be positive".into(),
            ));
        }
        if i32::try_from(config.chunk_size).is_err() {
            return Err(EngineError::InvalidConfig(format!(
                "chunk_size {} does not fit in i32",
                config.chunk_size
            )));
        }
        if config.drop_radius < config.load_radius {
            return Err(EngineError::InvalidConfig(format!(
                "drop_radius {} is smaller than load_radius {}",
                config.drop_radius, config.load_radius
            )));
        }
        Ok(Self {
            generator: Generator::new(config.seed),
            config,
            state: Mutex::new(WorldState::default()),
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current focus cell.
    pub fn focus(&self) -> IVec2 {
        self.lock().focus
    }

    /// Move the focus. Takes effect on the next liveness query.
    pub fn set_focus(&self, pos: IVec2) {
        self.lock().focus = pos;
    }

    /// Chunk containing a cell position.
    pub fn chunk_of(&self, pos: IVec2) -> ChunkCoord {
        // Checked in `new`.
        let size = self.config.chunk_size as i32;
        ChunkCoord::new(pos.x.div_euclid(size), pos.y.div_euclid(size))
    }

    /// Read a cell. `None` when its chunk is not resident.
    pub fn read_cell(&self, pos: IVec2) -> Option<Material> {
        let coord = self.chunk_of(pos);
        let (lx, ly) = self.local(pos);
        self.lock().chunks.get(&coord).and_then(|c| c.get(lx, ly))
    }

    /// Write a cell in a resident chunk.
    pub fn write_cell(&self, pos: IVec2, material: Material) -> Result<bool, EngineError> {
        let coord = self.chunk_of(pos);
        let (lx, ly) = self.local(pos);
        let mut state = self.lock();
        let chunk = state
            .chunks
            .get_mut(&coord)
            .ok_or(EngineError::NotResident(coord))?;
        let changed = chunk.set(lx, ly, material);
        if changed {
            state
                .event_log
                .push(ChunkEvent::CellWritten { pos, material });
        }
        Ok(changed)
    }

    /// Number of resident chunks.
    pub fn resident_count(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_resident(&self, coord: ChunkCoord) -> bool {
        self.lock().chunks.contains_key(&coord)
    }

    /// Revision and persisted revision of a resident chunk.
    pub fn chunk_revisions(&self, coord: ChunkCoord) -> Option<(u64, u64)> {
        self.lock()
            .chunks
            .get(&coord)
            .map(|c| (c.revision(), c.persisted_revision()))
    }

    /// Content hash of a resident chunk.
    pub fn chunk_hash(&self, coord: ChunkCoord) -> Option<u64> {
        self.lock().chunks.get(&coord).map(Chunk::content_hash)
    }

    /// Drain and return the event log.
    pub fn drain_events(&self) -> Vec<ChunkEvent> {
        std::mem::take(&mut self.lock().event_log)
    }

    /// Copy of the pending event log.
    pub fn events(&self) -> Vec<ChunkEvent> {
        self.lock().event_log.clone()
    }

    fn local(&self, pos: IVec2) -> (usize, usize) {
        let size = self.config.chunk_size as i32;
        (
            pos.x.rem_euclid(size) as usize,
            pos.y.rem_euclid(size) as usize,
        )
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        // A panic elsewhere cannot leave chunk maps half-written; keep serving.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Chebyshev distance between two chunk coordinates.
fn chunk_distance(a: ChunkCoord, b: ChunkCoord) -> u64 {
    let dx = (a.x as i64 - b.x as i64).unsigned_abs();
    let dy = (a.y as i64 - b.y as i64).unsigned_abs();
    dx.max(dy)
}

impl ChunkEngine for ChunkWorld {
    fn missing_chunks(&self) -> Vec<ChunkCoord> {
        let state = self.lock();
        let center = self.chunk_of(state.focus);
        let r = self.config.load_radius as i32;
        let mut missing = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let (Some(x), Some(y)) = (center.x.checked_add(dx), center.y.checked_add(dy))
                else {
                    continue;
                };
                let coord = ChunkCoord::new(x, y);
                if !state.chunks.contains_key(&coord) {
                    missing.push(coord);
                }
            }
        }
        missing
    }

    fn load_chunk(&self, coord: ChunkCoord, blob: ChunkBlob) -> Result<(), EngineError> {
        let chunk = decode_chunk(&blob, coord, self.config.chunk_size)?;
        let mut state = self.lock();
        if state.chunks.contains_key(&coord) {
            return Err(EngineError::AlreadyResident(coord));
        }
        let revision = chunk.revision();
        state.chunks.insert(coord, chunk);
        state
            .event_log
            .push(ChunkEvent::Loaded { coord, revision });
        tracing::trace!(%coord, revision, "chunk loaded");
        Ok(())
    }

    fn generate_chunk(&self, coord: ChunkCoord) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.chunks.contains_key(&coord) {
            return Err(EngineError::AlreadyResident(coord));
        }
        let chunk = self.generator.generate(coord, self.config.chunk_size);
        state.chunks.insert(coord, chunk);
        state.event_log.push(ChunkEvent::Generated { coord });
        tracing::trace!(%coord, "chunk generated");
        Ok(())
    }

    fn loaded_chunks(&self) -> Vec<ChunkCoord> {
        self.lock().chunks.keys().copied().collect()
    }

    fn save_chunk(&self, coord: ChunkCoord) -> Result<SaveOutcome, EngineError> {
        let mut state = self.lock();
        let chunk = state
            .chunks
            .get(&coord)
            .ok_or(EngineError::NotResident(coord))?;
        if !chunk.is_dirty() {
            return Ok(SaveOutcome::Unchanged);
        }
        let revision = chunk.revision();
        let blob = encode_chunk(chunk)?;
        state
            .event_log
            .push(ChunkEvent::Saved { coord, revision });
        Ok(SaveOutcome::Saved { blob, revision })
    }

    fn droppable_chunks(&self) -> Vec<ChunkCoord> {
        let state = self.lock();
        let center = self.chunk_of(state.focus);
        let limit = u64::from(self.config.drop_radius);
        state
            .chunks
            .keys()
            .filter(|c| chunk_distance(**c, center) > limit)
            .copied()
            .collect()
    }

    fn drop_chunk(&self, coord: ChunkCoord) -> Result<(), EngineError> {
        let mut state = self.lock();
        let chunk = state
            .chunks
            .get(&coord)
            .ok_or(EngineError::NotResident(coord))?;
        if chunk.is_dirty() {
            return Err(EngineError::UnpersistedChanges {
                coord,
                revision: chunk.revision(),
                persisted: chunk.persisted_revision(),
            });
        }
        state.chunks.remove(&coord);
        state.event_log.push(ChunkEvent::Dropped { coord });
        tracing::trace!(%coord, "chunk dropped");
        Ok(())
    }

    fn chunk_persisted(&self, coord: ChunkCoord, revision: u64) {
        let mut state = self.lock();
        let acknowledged = state
            .chunks
            .get_mut(&coord)
            .is_some_and(|c| c.mark_persisted(revision));
        if acknowledged {
            state
                .event_log
                .push(ChunkEvent::Persisted { coord, revision });
        }
    }
}

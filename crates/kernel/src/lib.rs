//! Kernel: the engine port the streaming coordinator drives, and a reference
//! chunk world that implements it.
//!
//! # Invariants
//! - Only the engine decides which chunks are missing, loaded or droppable.
//! - A chunk becomes resident only through `load_chunk` or `generate_chunk`.
//! - A chunk with unacknowledged mutations is never dropped.

mod chunk;
mod codec;
mod engine;
mod generator;
mod world;

pub use chunk::{Chunk, Material};
pub use codec::{decode_chunk, encode_chunk};
pub use engine::{ChunkEngine, EngineError, SaveOutcome};
pub use generator::Generator;
pub use world::{ChunkEvent, ChunkWorld, WorldConfig};

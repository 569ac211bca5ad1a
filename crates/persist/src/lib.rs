//! Persistence: durable key -> blob stores for chunk state.
//!
//! # Invariants
//! - One record per chunk, keyed by the chunk's store key. No manifest.
//! - A key that was never written reads back as `None`, not as an error.
//! - Last writer wins per key.
//! - Records are checksummed; a damaged record is an error, never `None`.

mod memory;
mod port;
mod store;

pub use memory::MemoryStore;
pub use port::{BoxFuture, ChunkStore, StoreError};
pub use store::FileStore;

pub fn crate_info() -> &'static str {
    "chunkstream-persist v0.1.0"
}

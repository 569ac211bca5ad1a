//! Common: chunk coordinates, store keys, opaque chunk blobs.
//!
//! # Invariants
//! - A coordinate has exactly one store key, and the key parser accepts only
//!   that canonical form.
//! - Blob contents are never interpreted outside the engine that produced them.

mod types;

pub use types::{ChunkBlob, ChunkCoord, KeyParseError};

pub fn crate_info() -> &'static str {
    "chunkstream-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}

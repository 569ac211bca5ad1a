use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of a chunk in the unbounded chunk grid.
///
/// Coordinates are in units of whole chunks, not cells. Ordering is
/// lexicographic on `(x, y)` so sets of coordinates iterate deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Stable store key: `"{x}_{y}"` in signed decimal.
    pub fn key(&self) -> String {
        format!("{}_{}", self.x, self.y)
    }

    /// Parse a store key produced by [`ChunkCoord::key`].
    ///
    /// Non-canonical spellings (`"01_2"`, `"+1_2"`, `"-0_0"`) are rejected so
    /// that no two keys name the same chunk.
    pub fn from_key(key: &str) -> Result<Self, KeyParseError> {
        let (xs, ys) = key
            .split_once('_')
            .ok_or_else(|| KeyParseError::MissingSeparator(key.to_owned()))?;
        let x = parse_component(key, xs)?;
        let y = parse_component(key, ys)?;
        let coord = Self { x, y };
        if coord.key() != key {
            return Err(KeyParseError::NonCanonical(key.to_owned()));
        }
        Ok(coord)
    }
}

fn parse_component(key: &str, part: &str) -> Result<i32, KeyParseError> {
    part.parse::<i32>()
        .map_err(|_| KeyParseError::InvalidComponent {
            key: key.to_owned(),
            component: part.to_owned(),
        })
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl FromStr for ChunkCoord {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

impl From<(i32, i32)> for ChunkCoord {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Errors from parsing a store key back into a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("chunk key {0:?} has no '_' separator")]
    MissingSeparator(String),
    #[error("chunk key {key:?} has invalid component {component:?}")]
    InvalidComponent { key: String, component: String },
    #[error("chunk key {0:?} is not in canonical form")]
    NonCanonical(String),
}

/// Serialized chunk state.
///
/// Produced by an engine's save and consumed by its load. Stores and the
/// coordinator move it around without looking inside.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ChunkBlob(Vec<u8>);

impl ChunkBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ChunkBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ChunkBlob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

// Blobs can be large; Debug prints only the length.
impl fmt::Debug for ChunkBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkBlob({} bytes)", self.0.len())
    }
}

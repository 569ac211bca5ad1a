use chunkstream_common::ChunkCoord;
use serde::{Deserialize, Serialize};

/// What occupies a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Material {
    #[default]
    Empty,
    Rock,
    Sand,
    Water,
}

impl Material {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Rock => 1,
            Self::Sand => 2,
            Self::Water => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::Rock),
            2 => Some(Self::Sand),
            3 => Some(Self::Water),
            _ => None,
        }
    }
}

/// A square block of cells plus its dirty-tracking counters.
///
/// `revision` increases on every effective mutation. `persisted_revision` is
/// the newest revision known to be durable; the chunk is dirty while the two
/// differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    coord: ChunkCoord,
    size: usize,
    cells: Vec<Material>,
    revision: u64,
    persisted_revision: u64,
}

impl Chunk {
    /// An all-empty chunk, clean at revision 0.
    pub fn new(coord: ChunkCoord, size: usize) -> Self {
        Self {
            coord,
            size,
            cells: vec![Material::Empty; size * size],
            revision: 0,
            persisted_revision: 0,
        }
    }

    /// Rebuild a chunk from persisted parts. It starts clean at `revision`.
    pub(crate) fn from_parts(
        coord: ChunkCoord,
        size: usize,
        cells: Vec<Material>,
        revision: u64,
    ) -> Self {
        Self {
            coord,
            size,
            cells,
            revision,
            persisted_revision: revision,
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cells(&self) -> &[Material] {
        &self.cells
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn persisted_revision(&self) -> u64 {
        self.persisted_revision
    }

    pub fn is_dirty(&self) -> bool {
        self.revision != self.persisted_revision
    }

    /// Cell at local coordinates, `None` when out of range.
    pub fn get(&self, lx: usize, ly: usize) -> Option<Material> {
        self.index(lx, ly).map(|i| self.cells[i])
    }

    /// Write a cell. Returns true when the cell actually changed.
    pub fn set(&mut self, lx: usize, ly: usize, material: Material) -> bool {
        let Some(i) = self.index(lx, ly) else {
            return false;
        };
        if self.cells[i] == material {
            return false;
        }
        self.cells[i] = material;
        self.revision += 1;
        true
    }

    /// Fill a cell during generation without touching the revision.
    pub(crate) fn fill(&mut self, lx: usize, ly: usize, material: Material) {
        if let Some(i) = self.index(lx, ly) {
            self.cells[i] = material;
        }
    }

    /// Record that `revision` reached durable storage.
    ///
    /// Acknowledgements for revisions older than the current persisted one,
    /// or newer than anything produced, are ignored.
    pub fn mark_persisted(&mut self, revision: u64) -> bool {
        if revision <= self.persisted_revision || revision > self.revision {
            return false;
        }
        self.persisted_revision = revision;
        true
    }

    /// Number of non-empty cells.
    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|m| **m != Material::Empty).count()
    }

    /// FNV-1a over the cell contents, for comparing chunk states.
    pub fn content_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for m in &self.cells {
            h ^= m.to_u8() as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        h
    }

    fn index(&self, lx: usize, ly: usize) -> Option<usize> {
        (lx < self.size && ly < self.size).then(|| ly * self.size + lx)
    }
}

//! File-backed chunk store.
//!
//! Layout inside the store directory:
//! ```text
//! <x>_<y>.chunk            - one record per chunk
//! <x>_<y>.chunk.<rand>.tmp - in-flight write, renamed over the record when done
//! ```
//!
//! Record layout:
//! ```text
//! magic   4 bytes  "CSTK"
//! version 2 bytes  little endian
//! sha256  32 bytes digest of the payload
//! payload rest     opaque chunk blob
//! ```

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chunkstream_common::{ChunkBlob, ChunkCoord};
use sha2::{Digest, Sha256};

use crate::port::{BoxFuture, ChunkStore, StoreError};

const MAGIC: &[u8; 4] = b"CSTK";
/// Current record format version.
const FORMAT_VERSION: u16 = 1;
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 2 + DIGEST_LEN;
const RECORD_EXT: &str = "chunk";
const TMP_SUFFIX: &str = ".tmp";

/// Sequence number of the newest write renamed into place, per key.
type CommitLog = Arc<Mutex<HashMap<String, u64>>>;

/// Durable chunk store keeping one checksummed file per key.
///
/// Each write runs to completion on the blocking pool even when the caller
/// stops waiting for it: the record goes to a temp file which is fsynced and
/// renamed over the old record, or deleted. Writes are ordered by when `put`
/// was called, so a slow older write never replaces a newer record.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    next_seq: AtomicU64,
    committed: CommitLog,
}

impl FileStore {
    /// Open or create a store rooted at `path`.
    ///
    /// Temp files left by a previous process are removed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let mut stale = 0usize;
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
                tokio::fs::remove_file(entry.path()).await?;
                stale += 1;
            }
        }
        tracing::debug!(root = %root.display(), stale, "file store opened");
        Ok(Self {
            root,
            next_seq: AtomicU64::new(0),
            committed: CommitLog::default(),
        })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys of every record on disk, sorted by coordinate.
    ///
    /// Tooling only; the streaming cycle never lists the store.
    pub async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut coords = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(coord) = ChunkCoord::from_key(stem) {
                coords.push(coord);
            }
        }
        coords.sort();
        Ok(coords.iter().map(ChunkCoord::key).collect())
    }

    fn record_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Only canonical chunk keys become file names.
        ChunkCoord::from_key(key).map_err(|_| StoreError::InvalidKey(key.to_owned()))?;
        Ok(self.root.join(format!("{key}.{RECORD_EXT}")))
    }

    async fn read_record(&self, key: &str) -> Result<Option<ChunkBlob>, StoreError> {
        let path = self.record_path(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_record(key, &data).map(Some)
    }

    async fn write_record(&self, key: &str, blob: ChunkBlob) -> Result<(), StoreError> {
        let path = self.record_path(key)?;
        // Taken before anything is spawned so it reflects call order.
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let write = RecordWrite {
            root: self.root.clone(),
            path,
            key: key.to_owned(),
            seq,
            record: encode_record(&blob),
        };
        let committed = self.committed.clone();

        // Dropping the join handle detaches the task; it still finishes.
        let landed = tokio::task::spawn_blocking(move || write.run(&committed))
            .await
            .map_err(|e| StoreError::Backend(format!("record write task failed: {e}")))??;
        if landed {
            tracing::trace!(key, seq, bytes = blob.len(), "chunk record written");
        } else {
            tracing::debug!(key, seq, "chunk record superseded by a newer write");
        }
        Ok(())
    }
}

/// One blocking record write.
struct RecordWrite {
    root: PathBuf,
    path: PathBuf,
    key: String,
    seq: u64,
    record: Vec<u8>,
}

impl RecordWrite {
    /// Returns false when a newer write of the key already landed; the
    /// temp file is discarded and the newer record stays.
    fn run(self, committed: &Mutex<HashMap<String, u64>>) -> Result<bool, StoreError> {
        // Removed on drop unless persisted.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{}.{RECORD_EXT}.", self.key))
            .suffix(TMP_SUFFIX)
            .tempfile_in(&self.root)?;
        tmp.write_all(&self.record)?;
        tmp.as_file().sync_all()?;

        let mut committed = committed.lock().unwrap_or_else(PoisonError::into_inner);
        if committed.get(&self.key).is_some_and(|&last| last > self.seq) {
            return Ok(false);
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;
        committed.insert(self.key, self.seq);
        Ok(true)
    }
}

impl ChunkStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ChunkBlob>, StoreError>> {
        Box::pin(self.read_record(key))
    }

    fn put<'a>(&'a self, key: &'a str, blob: ChunkBlob) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_record(key, blob))
    }
}

fn encode_record(blob: &ChunkBlob) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_LEN + blob.len());
    record.extend_from_slice(MAGIC);
    record.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    record.extend_from_slice(&Sha256::digest(blob.as_bytes()));
    record.extend_from_slice(blob.as_bytes());
    record
}

fn decode_record(key: &str, data: &[u8]) -> Result<ChunkBlob, StoreError> {
    if data.len() < HEADER_LEN {
        return Err(StoreError::Malformed {
            key: key.to_owned(),
            reason: format!("record is {} bytes, header needs {HEADER_LEN}", data.len()),
        });
    }
    let (magic, rest) = data.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(StoreError::Malformed {
            key: key.to_owned(),
            reason: "bad magic".into(),
        });
    }
    let (version, rest) = rest.split_at(2);
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != FORMAT_VERSION {
        return Err(StoreError::SchemaMismatch {
            key: key.to_owned(),
            file_version: version,
            expected_version: FORMAT_VERSION,
        });
    }
    let (expected, payload) = rest.split_at(DIGEST_LEN);
    let actual = Sha256::digest(payload);
    if actual.as_slice() != expected {
        return Err(StoreError::IntegrityMismatch {
            key: key.to_owned(),
            expected: hex(expected),
            actual: hex(&actual),
        });
    }
    Ok(ChunkBlob::from(payload))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

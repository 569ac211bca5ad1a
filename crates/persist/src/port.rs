use chunkstream_common::ChunkBlob;

/// Boxed future returned by store methods, so stores can sit behind `dyn`.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Errors from chunk store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },
    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch in {key}: record has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        key: String,
        file_version: u16,
        expected_version: u16,
    },
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Asynchronous key -> blob persistence.
///
/// `get` distinguishes a clean miss (`Ok(None)`) from a failure (`Err`).
/// Implementations must allow any number of concurrent operations on
/// distinct keys without them affecting one another.
pub trait ChunkStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ChunkBlob>, StoreError>>;

    fn put<'a>(&'a self, key: &'a str, blob: ChunkBlob) -> BoxFuture<'a, Result<(), StoreError>>;
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chunkstream_common::ChunkBlob;
use tokio::sync::RwLock;

use crate::port::{BoxFuture, ChunkStore, StoreError};

/// In-memory chunk store.
///
/// Useful for tests and for worlds that do not need to outlive the process.
/// Counts operations so callers can assert on write traffic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ChunkBlob>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// Stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Insert a record directly, bypassing the operation counters.
    pub async fn insert(&self, key: impl Into<String>, blob: ChunkBlob) {
        self.records.write().await.insert(key.into(), blob);
    }

    /// Total `get` calls served.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Total `put` calls served.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }
}

impl ChunkStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ChunkBlob>, StoreError>> {
        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::Relaxed);
            Ok(self.records.read().await.get(key).cloned())
        })
    }

    fn put<'a>(&'a self, key: &'a str, blob: ChunkBlob) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.puts.fetch_add(1, Ordering::Relaxed);
            self.records.write().await.insert(key.to_owned(), blob);
            Ok(())
        })
    }
}

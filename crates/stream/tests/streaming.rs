//! End-to-end streaming against the reference world and the real stores.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use chunkstream_common::{ChunkBlob, ChunkCoord};
use chunkstream_kernel::{ChunkEngine, ChunkWorld, Material, WorldConfig};
use chunkstream_persist::{BoxFuture, ChunkStore, FileStore, MemoryStore, StoreError};
use chunkstream_stream::{Coordinator, ReadFailurePolicy, StreamConfig};
use glam::IVec2;

const CHUNK: i32 = 8;

fn world() -> Arc<ChunkWorld> {
    Arc::new(
        ChunkWorld::new(WorldConfig {
            chunk_size: CHUNK as usize,
            load_radius: 1,
            drop_radius: 1,
            seed: 7,
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn modified_chunk_survives_eviction_and_reload() {
    let world = world();
    let store = Arc::new(MemoryStore::new());
    let mut coord = Coordinator::new(world.clone(), store.clone(), StreamConfig::default()).unwrap();

    let report = coord.run_cycle().await;
    assert_eq!(report.generated, 9);
    assert_eq!(world.resident_count(), 9);
    // Freshly generated terrain needs no write.
    assert_eq!(store.put_count(), 0);

    let cell = IVec2::new(3, 4);
    let origin = ChunkCoord::new(0, 0);
    world.write_cell(cell, Material::Water).unwrap();
    let hash = world.chunk_hash(origin).unwrap();

    // Walk far away: the modified chunk is saved, then evicted.
    world.set_focus(IVec2::new(CHUNK * 20, 0));
    let report = coord.run_cycle().await;
    assert_eq!(report.saved, 1);
    assert_eq!(report.dropped, 9);
    assert!(!world.is_resident(origin));
    assert!(store.contains(&origin.key()).await);

    // Come back: the chunk is loaded from the store, not regenerated.
    world.set_focus(IVec2::ZERO);
    let report = coord.run_cycle().await;
    assert_eq!(report.loaded, 1);
    assert_eq!(report.generated, 8);
    assert_eq!(world.chunk_hash(origin), Some(hash));
    assert_eq!(world.read_cell(cell), Some(Material::Water));
}

#[tokio::test]
async fn file_store_persists_across_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("chunks");
    let cell = IVec2::new(-3, -5);

    let hash = {
        let world = world();
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let mut coord = Coordinator::new(world.clone(), store, StreamConfig::default()).unwrap();
        coord.run_cycle().await;
        world.write_cell(cell, Material::Sand).unwrap();
        let hash = world.chunk_hash(world.chunk_of(cell)).unwrap();

        let report = coord.flush().await;
        assert_eq!(report.saved, 1);
        hash
    };

    let world = world();
    let store = Arc::new(FileStore::open(&path).await.unwrap());
    assert_eq!(store.list_keys().await.unwrap(), vec!["-1_-1".to_owned()]);
    let mut coord = Coordinator::new(world.clone(), store, StreamConfig::default()).unwrap();

    let report = coord.run_cycle().await;
    assert_eq!(report.loaded, 1);
    assert_eq!(report.failures(), 0);
    assert_eq!(world.chunk_hash(ChunkCoord::new(-1, -1)), Some(hash));
    assert_eq!(world.read_cell(cell), Some(Material::Sand));
}

/// Memory store that fails operations on keys listed as broken.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: Mutex<HashSet<String>>,
}

impl FlakyStore {
    fn set_broken(&self, keys: &[&str]) {
        *self.broken.lock().unwrap() = keys.iter().map(|k| (*k).to_owned()).collect();
    }

    fn is_broken(&self, key: &str) -> bool {
        self.broken.lock().unwrap().contains(key)
    }
}

impl ChunkStore for FlakyStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ChunkBlob>, StoreError>> {
        if self.is_broken(key) {
            return Box::pin(async move { Err(StoreError::Backend(format!("{key} unavailable"))) });
        }
        self.inner.get(key)
    }

    fn put<'a>(&'a self, key: &'a str, blob: ChunkBlob) -> BoxFuture<'a, Result<(), StoreError>> {
        if self.is_broken(key) {
            return Box::pin(async move { Err(StoreError::Backend(format!("{key} unavailable"))) });
        }
        self.inner.put(key, blob)
    }
}

#[tokio::test]
async fn failed_writes_never_lose_edits() {
    let world = world();
    let store = Arc::new(FlakyStore::default());
    let mut coord = Coordinator::new(world.clone(), store.clone(), StreamConfig::default()).unwrap();
    coord.run_cycle().await;

    world.write_cell(IVec2::new(1, 1), Material::Water).unwrap();
    world.write_cell(IVec2::new(9, 1), Material::Water).unwrap();
    store.set_broken(&["0_0"]);
    world.set_focus(IVec2::new(CHUNK * 20, 0));

    let report = coord.run_cycle().await;
    assert_eq!(report.write_failures, 1);
    assert_eq!(report.saved, 1);
    assert!(world.is_resident(ChunkCoord::new(0, 0)));
    assert!(!world.is_resident(ChunkCoord::new(1, 0)));

    // The store recovers; the held chunk is written and released.
    store.set_broken(&[]);
    let report = coord.run_cycle().await;
    assert_eq!(report.saved, 1);
    assert_eq!(report.dropped, 1);
    assert!(!world.is_resident(ChunkCoord::new(0, 0)));
    assert!(store.inner.contains("0_0").await);
}

#[tokio::test]
async fn read_failure_keeps_stored_chunk_until_readable() {
    let world = world();
    let store = Arc::new(FlakyStore::default());
    let mut coord = Coordinator::new(world.clone(), store.clone(), StreamConfig::default()).unwrap();
    coord.run_cycle().await;
    world.write_cell(IVec2::new(2, 2), Material::Rock).unwrap();
    world.set_focus(IVec2::new(CHUNK * 20, 0));
    coord.run_cycle().await;

    store.set_broken(&["0_0"]);
    world.set_focus(IVec2::ZERO);
    let report = coord.run_cycle().await;
    assert_eq!(report.read_failures, 1);
    assert!(!world.is_resident(ChunkCoord::new(0, 0)));
    assert!(world.missing_chunks().contains(&ChunkCoord::new(0, 0)));

    store.set_broken(&[]);
    let report = coord.run_cycle().await;
    assert_eq!(report.loaded, 1);
    assert_eq!(world.read_cell(IVec2::new(2, 2)), Some(Material::Rock));
}

#[tokio::test]
async fn regenerate_policy_overwrites_only_after_modification() {
    let world = world();
    let store = Arc::new(FlakyStore::default());
    store.set_broken(&["0_0"]);
    let config = StreamConfig {
        read_failure_policy: ReadFailurePolicy::Regenerate,
        ..StreamConfig::default()
    };
    store.inner.insert("0_0", ChunkBlob::new(vec![1, 2, 3])).await;
    let mut coord = Coordinator::new(world.clone(), store.clone(), config).unwrap();

    let report = coord.run_cycle().await;
    assert_eq!(report.read_failures, 1);
    assert_eq!(report.generated, 9);
    assert!(world.is_resident(ChunkCoord::new(0, 0)));

    // The regenerated chunk is clean, so the stored record stays put...
    store.set_broken(&[]);
    let report = coord.run_cycle().await;
    assert_eq!(report.saved, 0);
    let stored = store.inner.get("0_0").await.unwrap().unwrap();
    assert_eq!(stored.as_bytes(), &[1, 2, 3]);

    // ...until the chunk is modified.
    world.write_cell(IVec2::new(0, 0), Material::Sand).unwrap();
    let report = coord.run_cycle().await;
    assert_eq!(report.saved, 1);
    let stored = store.inner.get("0_0").await.unwrap().unwrap();
    assert_ne!(stored.as_bytes(), &[1, 2, 3]);
}

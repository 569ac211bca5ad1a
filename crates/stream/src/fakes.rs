//! Scripted engine and store for coordinator tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chunkstream_common::{ChunkBlob, ChunkCoord};
use chunkstream_kernel::{ChunkEngine, EngineError, SaveOutcome};
use chunkstream_persist::{BoxFuture, ChunkStore, StoreError};

/// Ordered log shared by engine and store, for cross-component ordering checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    PutStarted(String),
    PutDone(String),
    Drop(ChunkCoord),
}

type TraceLog = Arc<Mutex<Vec<Trace>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Load(ChunkCoord, ChunkBlob),
    Generate(ChunkCoord),
    Save(ChunkCoord),
    Drop(ChunkCoord),
    Persisted(ChunkCoord, u64),
}

/// How the engine answers `save_chunk` for a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeSave {
    Unchanged,
    Fail,
}

#[derive(Default)]
struct EngineState {
    missing: Vec<ChunkCoord>,
    loaded: Vec<ChunkCoord>,
    droppable: Vec<ChunkCoord>,
    saves: HashMap<ChunkCoord, FakeSave>,
    refused_drops: HashSet<ChunkCoord>,
    reject_loads: bool,
    calls: Vec<EngineCall>,
}

/// Engine whose snapshots are set directly by the test.
///
/// Resolving a chunk moves it from missing to loaded; dropping removes it
/// from loaded and droppable. Saves default to a blob at revision 1.
pub struct ScriptedEngine {
    state: Mutex<EngineState>,
    trace: TraceLog,
}

impl ScriptedEngine {
    /// A fresh engine and store sharing one trace log.
    pub fn with_store() -> (Arc<ScriptedEngine>, Arc<ScriptedStore>) {
        let trace = TraceLog::default();
        let engine = Arc::new(ScriptedEngine {
            state: Mutex::new(EngineState::default()),
            trace: trace.clone(),
        });
        (engine, Arc::new(ScriptedStore::new(trace)))
    }

    pub fn set_missing(&self, coords: &[ChunkCoord]) {
        lock(&self.state).missing = coords.to_vec();
    }

    pub fn set_loaded(&self, coords: &[ChunkCoord]) {
        lock(&self.state).loaded = coords.to_vec();
    }

    pub fn set_droppable(&self, coords: &[ChunkCoord]) {
        lock(&self.state).droppable = coords.to_vec();
    }

    pub fn set_save(&self, coord: ChunkCoord, save: FakeSave) {
        lock(&self.state).saves.insert(coord, save);
    }

    pub fn refuse_drop(&self, coord: ChunkCoord) {
        lock(&self.state).refused_drops.insert(coord);
    }

    pub fn reject_loads(&self) {
        lock(&self.state).reject_loads = true;
    }

    pub fn calls_matching(&self, filter: impl Fn(&EngineCall) -> bool) -> Vec<EngineCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| filter(call))
            .cloned()
            .collect()
    }

    pub fn drops(&self) -> Vec<ChunkCoord> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Drop(coord) => Some(*coord),
                _ => None,
            })
            .collect()
    }

    pub fn persisted(&self) -> Vec<(ChunkCoord, u64)> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Persisted(coord, revision) => Some((*coord, *revision)),
                _ => None,
            })
            .collect()
    }

    fn resolve(state: &mut EngineState, coord: ChunkCoord) {
        state.missing.retain(|c| *c != coord);
        if !state.loaded.contains(&coord) {
            state.loaded.push(coord);
        }
    }
}

impl ChunkEngine for ScriptedEngine {
    fn missing_chunks(&self) -> Vec<ChunkCoord> {
        lock(&self.state).missing.clone()
    }

    fn load_chunk(&self, coord: ChunkCoord, blob: ChunkBlob) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::Load(coord, blob));
        if state.reject_loads {
            return Err(EngineError::Decode("scripted rejection".into()));
        }
        Self::resolve(&mut state, coord);
        Ok(())
    }

    fn generate_chunk(&self, coord: ChunkCoord) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::Generate(coord));
        Self::resolve(&mut state, coord);
        Ok(())
    }

    fn loaded_chunks(&self) -> Vec<ChunkCoord> {
        lock(&self.state).loaded.clone()
    }

    fn save_chunk(&self, coord: ChunkCoord) -> Result<SaveOutcome, EngineError> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::Save(coord));
        match state.saves.get(&coord) {
            Some(FakeSave::Unchanged) => Ok(SaveOutcome::Unchanged),
            Some(FakeSave::Fail) => Err(EngineError::Encode("scripted failure".into())),
            None => Ok(SaveOutcome::Saved {
                blob: ChunkBlob::new(coord.key().into_bytes()),
                revision: 1,
            }),
        }
    }

    fn droppable_chunks(&self) -> Vec<ChunkCoord> {
        lock(&self.state).droppable.clone()
    }

    fn drop_chunk(&self, coord: ChunkCoord) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        if state.refused_drops.contains(&coord) {
            return Err(EngineError::UnpersistedChanges {
                coord,
                revision: 2,
                persisted: 1,
            });
        }
        state.calls.push(EngineCall::Drop(coord));
        state.loaded.retain(|c| *c != coord);
        state.droppable.retain(|c| *c != coord);
        lock(&self.trace).push(Trace::Drop(coord));
        Ok(())
    }

    fn chunk_persisted(&self, coord: ChunkCoord, revision: u64) {
        lock(&self.state)
            .calls
            .push(EngineCall::Persisted(coord, revision));
    }
}

/// Store with per-key failure injection.
pub struct ScriptedStore {
    records: Mutex<HashMap<String, ChunkBlob>>,
    fail_gets: Mutex<HashSet<String>>,
    fail_puts: Mutex<HashSet<String>>,
    hang_gets: Mutex<HashSet<String>>,
    hang_puts: Mutex<HashSet<String>>,
    op_delay: Mutex<Duration>,
    put_delay: Mutex<Duration>,
    gets: Mutex<HashMap<String, usize>>,
    puts: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    trace: TraceLog,
}

/// Counts one outstanding store operation until dropped, cancelled ones too.
struct InFlight<'a> {
    store: &'a ScriptedStore,
}

impl<'a> InFlight<'a> {
    fn enter(store: &'a ScriptedStore) -> Self {
        let now = store.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { store }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn key_set(keys: &[&str]) -> HashSet<String> {
    keys.iter().map(|k| (*k).to_owned()).collect()
}

impl ScriptedStore {
    fn new(trace: TraceLog) -> Self {
        Self {
            records: Mutex::default(),
            fail_gets: Mutex::default(),
            fail_puts: Mutex::default(),
            hang_gets: Mutex::default(),
            hang_puts: Mutex::default(),
            op_delay: Mutex::new(Duration::ZERO),
            put_delay: Mutex::new(Duration::ZERO),
            gets: Mutex::default(),
            puts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            trace,
        }
    }

    pub fn seed(&self, key: &str, blob: ChunkBlob) {
        lock(&self.records).insert(key.to_owned(), blob);
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.records).contains_key(key)
    }

    pub fn fail_gets(&self, keys: &[&str]) {
        *lock(&self.fail_gets) = key_set(keys);
    }

    pub fn fail_puts(&self, keys: &[&str]) {
        *lock(&self.fail_puts) = key_set(keys);
    }

    /// Gets on these keys never complete.
    pub fn hang_gets(&self, keys: &[&str]) {
        *lock(&self.hang_gets) = key_set(keys);
    }

    /// Puts on these keys never complete.
    pub fn hang_puts(&self, keys: &[&str]) {
        *lock(&self.hang_puts) = key_set(keys);
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *lock(&self.put_delay) = delay;
    }

    /// Extra delay on every get and put, so operations overlap.
    pub fn set_op_delay(&self, delay: Duration) {
        *lock(&self.op_delay) = delay;
    }

    /// Most store operations ever outstanding at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn gets_for(&self, key: &str) -> usize {
        lock(&self.gets).get(key).copied().unwrap_or(0)
    }

    /// Put attempts, failed ones included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn trace(&self) -> Vec<Trace> {
        lock(&self.trace).clone()
    }
}

impl ScriptedStore {
    async fn op_pause(&self) {
        let delay = *lock(&self.op_delay);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

impl ChunkStore for ScriptedStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<ChunkBlob>, StoreError>> {
        Box::pin(async move {
            let _op = InFlight::enter(self);
            *lock(&self.gets).entry(key.to_owned()).or_default() += 1;
            let hang = lock(&self.hang_gets).contains(key);
            if hang {
                std::future::pending::<()>().await;
            }
            self.op_pause().await;
            if lock(&self.fail_gets).contains(key) {
                return Err(StoreError::Backend(format!("scripted read failure for {key}")));
            }
            Ok(lock(&self.records).get(key).cloned())
        })
    }

    fn put<'a>(&'a self, key: &'a str, blob: ChunkBlob) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let _op = InFlight::enter(self);
            self.puts.fetch_add(1, Ordering::Relaxed);
            lock(&self.trace).push(Trace::PutStarted(key.to_owned()));

            let hang = lock(&self.hang_puts).contains(key);
            if hang {
                std::future::pending::<()>().await;
            }
            let delay = *lock(&self.put_delay);
            if delay.is_zero() {
                self.op_pause().await;
            } else {
                tokio::time::sleep(delay).await;
            }

            if lock(&self.fail_puts).contains(key) {
                return Err(StoreError::Backend(format!("scripted write failure for {key}")));
            }
            lock(&self.records).insert(key.to_owned(), blob);
            lock(&self.trace).push(Trace::PutDone(key.to_owned()));
            Ok(())
        })
    }
}

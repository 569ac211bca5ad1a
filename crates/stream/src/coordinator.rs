use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chunkstream_common::{ChunkBlob, ChunkCoord};
use chunkstream_kernel::{ChunkEngine, SaveOutcome};
use chunkstream_persist::{ChunkStore, StoreError};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{ReadFailurePolicy, StreamConfig};
use crate::error::StreamError;
use crate::stats::{CycleReport, CycleTimer, StreamTotals};

/// Number of recent cycles kept in the duration window.
const TIMER_WINDOW: usize = 64;

/// A store operation that did not succeed.
#[derive(Debug, thiserror::Error)]
enum StoreFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

async fn with_timeout<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreFailure> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(StoreFailure::from),
        Err(_) => Err(StoreFailure::Timeout(limit)),
    }
}

/// Collapse an engine snapshot into a sorted set, counting repeats.
fn dedup(coords: Vec<ChunkCoord>, duplicates: &mut usize) -> BTreeSet<ChunkCoord> {
    let total = coords.len();
    let set: BTreeSet<ChunkCoord> = coords.into_iter().collect();
    *duplicates += total - set.len();
    set
}

/// Reconciles an engine's resident chunks with a durable store.
///
/// Each cycle resolves missing chunks (load or generate), persists resident
/// chunks, and evicts droppable chunks whose persistence is settled. The
/// coordinator keeps no chunk state between cycles; every decision comes
/// from the engine's snapshots of that cycle.
///
/// Drive it by hand with [`Coordinator::run_cycle`], or hand it to a tokio
/// task with [`Coordinator::start`].
pub struct Coordinator {
    engine: Arc<dyn ChunkEngine>,
    store: Arc<dyn ChunkStore>,
    config: StreamConfig,
    cycle: u64,
    timer: CycleTimer,
    totals: StreamTotals,
    last_report: Option<CycleReport>,
}

impl Coordinator {
    pub fn new(
        engine: Arc<dyn ChunkEngine>,
        store: Arc<dyn ChunkStore>,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            engine,
            store,
            config,
            cycle: 0,
            timer: CycleTimer::new(TIMER_WINDOW),
            totals: StreamTotals::default(),
            last_report: None,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Lifetime totals.
    pub fn totals(&self) -> &StreamTotals {
        &self.totals
    }

    /// Durations of recent cycles.
    pub fn timer(&self) -> &CycleTimer {
        &self.timer
    }

    /// Report of the most recent cycle or flush.
    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    /// Run one full reconciliation cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle_inner(None).await
    }

    /// Persist every resident chunk without loading or evicting anything.
    pub async fn flush(&mut self) -> CycleReport {
        let span = tracing::info_span!("stream_flush", cycle = self.cycle);
        let started = Instant::now();
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };
        self.persist_resident(&mut report).instrument(span).await;
        self.finish(report, started)
    }

    /// Spawn the fixed-delay loop on the current tokio runtime.
    ///
    /// The loop runs until [`CoordinatorHandle::stop`] is called or the handle
    /// is dropped, then hands the coordinator back through the handle.
    pub fn start(self) -> CoordinatorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(stop_rx));
        CoordinatorHandle { stop_tx, join }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) -> Self {
        tracing::info!(
            period_ms = self.config.cycle_period.as_millis() as u64,
            timeout_ms = self.config.store_timeout.as_millis() as u64,
            "streaming coordinator started"
        );

        loop {
            if *stop.borrow() {
                break;
            }
            self.cycle_inner(Some(&stop)).await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_period) => {}
                changed = stop.changed() => {
                    // A dropped handle counts as a stop request.
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        if self.config.flush_on_stop {
            let report = self.flush().await;
            tracing::info!(
                saved = report.saved,
                failures = report.failures(),
                "final flush complete"
            );
        }
        tracing::info!(cycles = self.cycle, "streaming coordinator stopped");
        self
    }

    async fn cycle_inner(&mut self, stop: Option<&watch::Receiver<bool>>) -> CycleReport {
        self.cycle += 1;
        let span = tracing::info_span!("stream_cycle", cycle = self.cycle);
        let started = Instant::now();
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };
        let stop_requested = || stop.is_some_and(|rx| *rx.borrow());

        async {
            // No new chunks once a stop is pending, but whatever is resident
            // still gets persisted.
            if stop_requested() {
                report.interrupted = true;
            } else {
                self.resolve_missing(&mut report).await;
            }

            let settled = self.persist_resident(&mut report).await;

            if stop_requested() {
                report.interrupted = true;
            } else {
                self.evict(&settled, &mut report);
            }
        }
        .instrument(span)
        .await;

        self.finish(report, started)
    }

    fn finish(&mut self, mut report: CycleReport, started: Instant) -> CycleReport {
        report.elapsed = started.elapsed();
        self.timer.record(report.elapsed);
        self.totals.record(&report);
        self.totals.cycles = self.cycle;

        if report.failures() > 0 {
            tracing::warn!(
                cycle = report.cycle,
                read_failures = report.read_failures,
                resolve_failures = report.resolve_failures,
                write_failures = report.write_failures,
                save_failures = report.save_failures,
                retained = report.retained,
                "stream cycle finished with failures"
            );
        } else if !report.is_idle() {
            tracing::debug!(
                cycle = report.cycle,
                loaded = report.loaded,
                generated = report.generated,
                saved = report.saved,
                dropped = report.dropped,
                resident = report.resident,
                "stream cycle complete"
            );
        } else {
            tracing::trace!(cycle = report.cycle, "stream cycle idle");
        }

        self.last_report = Some(report.clone());
        report
    }

    /// Steps 1-2: load or generate every missing chunk.
    async fn resolve_missing(&self, report: &mut CycleReport) {
        let missing = dedup(self.engine.missing_chunks(), &mut report.duplicates);
        report.missing = missing.len();
        if missing.is_empty() {
            return;
        }

        let store = &self.store;
        let limit = self.config.store_timeout;
        let mut reads = futures::stream::iter(missing)
            .map(|coord| async move {
                let key = coord.key();
                let result = with_timeout(limit, store.get(&key)).await;
                (coord, result)
            })
            .buffer_unordered(self.config.max_in_flight);

        while let Some((coord, result)) = reads.next().await {
            match result {
                Ok(Some(blob)) => self.load(coord, blob, report),
                Ok(None) => self.generate(coord, report),
                Err(e) => {
                    report.read_failures += 1;
                    match self.config.read_failure_policy {
                        ReadFailurePolicy::Retry => {
                            tracing::warn!(%coord, error = %e, "chunk read failed; will retry");
                        }
                        ReadFailurePolicy::Regenerate => {
                            tracing::warn!(%coord, error = %e, "chunk read failed; regenerating");
                            self.generate(coord, report);
                        }
                    }
                }
            }
        }
    }

    fn load(&self, coord: ChunkCoord, blob: ChunkBlob, report: &mut CycleReport) {
        let bytes = blob.len();
        match self.engine.load_chunk(coord, blob) {
            Ok(()) => {
                report.loaded += 1;
                tracing::debug!(%coord, bytes, "chunk loaded from store");
            }
            Err(e) => {
                report.resolve_failures += 1;
                tracing::warn!(%coord, error = %e, "engine rejected stored chunk");
            }
        }
    }

    fn generate(&self, coord: ChunkCoord, report: &mut CycleReport) {
        match self.engine.generate_chunk(coord) {
            Ok(()) => {
                report.generated += 1;
                tracing::debug!(%coord, "chunk generated");
            }
            Err(e) => {
                report.resolve_failures += 1;
                tracing::warn!(%coord, error = %e, "chunk generation failed");
            }
        }
    }

    /// Steps 3-5: save every resident chunk and wait for all writes.
    ///
    /// Returns the chunks whose persistence is settled this cycle: either the
    /// engine reported them unchanged or their write succeeded.
    async fn persist_resident(&self, report: &mut CycleReport) -> BTreeSet<ChunkCoord> {
        let loaded = dedup(self.engine.loaded_chunks(), &mut report.duplicates);
        report.resident = loaded.len();

        let mut settled = BTreeSet::new();
        let mut pending = Vec::new();
        for coord in loaded {
            match self.engine.save_chunk(coord) {
                Ok(SaveOutcome::Unchanged) => {
                    report.unchanged += 1;
                    settled.insert(coord);
                }
                Ok(SaveOutcome::Saved { blob, revision }) => pending.push((coord, revision, blob)),
                Err(e) => {
                    report.save_failures += 1;
                    tracing::warn!(%coord, error = %e, "chunk save failed");
                }
            }
        }
        if pending.is_empty() {
            return settled;
        }

        let store = &self.store;
        let limit = self.config.store_timeout;
        // Barrier: every write resolves before anything is dropped.
        let writes: Vec<_> = futures::stream::iter(pending)
            .map(|(coord, revision, blob)| async move {
                let key = coord.key();
                let bytes = blob.len();
                let result = with_timeout(limit, store.put(&key, blob)).await;
                (coord, revision, bytes, result)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        for (coord, revision, bytes, result) in writes {
            match result {
                Ok(()) => {
                    report.saved += 1;
                    self.engine.chunk_persisted(coord, revision);
                    settled.insert(coord);
                    tracing::debug!(%coord, revision, bytes, "chunk persisted");
                }
                Err(e) => {
                    report.write_failures += 1;
                    tracing::warn!(%coord, revision, error = %e, "chunk write failed; will retry");
                }
            }
        }
        settled
    }

    /// Steps 6-7: drop droppable chunks whose persistence is settled.
    fn evict(&self, settled: &BTreeSet<ChunkCoord>, report: &mut CycleReport) {
        let droppable = dedup(self.engine.droppable_chunks(), &mut report.duplicates);
        report.droppable = droppable.len();

        for coord in droppable {
            if !settled.contains(&coord) {
                report.retained += 1;
                tracing::debug!(%coord, "chunk not persisted this cycle; kept resident");
                continue;
            }
            match self.engine.drop_chunk(coord) {
                Ok(()) => {
                    report.dropped += 1;
                    tracing::debug!(%coord, "chunk dropped");
                }
                Err(e) => {
                    report.retained += 1;
                    tracing::debug!(%coord, error = %e, "engine kept chunk resident");
                }
            }
        }
    }
}

/// Control handle for a coordinator running on a tokio task.
pub struct CoordinatorHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<Coordinator>,
}

impl CoordinatorHandle {
    /// Ask the loop to stop and wait for it.
    ///
    /// An in-flight cycle finishes its write barrier first; with
    /// `flush_on_stop` a final flush follows. Returns the coordinator so its
    /// totals can be inspected or it can be started again.
    pub async fn stop(self) -> Result<Coordinator, StreamError> {
        self.stop_tx.send_replace(true);
        Ok(self.join.await?)
    }

    /// True once the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

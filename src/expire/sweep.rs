//! Sweep Coordinator
//!
//! Background jobs that walk a whole collection and physically remove expired
//! bins. Reads already hide expired bins, so a sweep only reclaims space.
//!
//! ## Design
//!
//! ```text
//!   run_sweep(collection)
//!        │
//!        ├──► spawn_blocking ──► scan(collection) ──► reclaim_bins(key) ─┐
//!        │                            ▲                                  │
//!        │                            └──── cancelled? ◄─────────────────┘
//!        ▼
//!   SweepHandle ── cancel() / progress() / status() / wait() / detach()
//! ```
//!
//! Cancellation is checked once per record, so a cancelled job stops before
//! its next record. Per-record failures are logged and counted; the job keeps
//! going.
//!
//! ## Scheduling
//!
//! [`SweepScheduler`] runs sweeps periodically and adapts its interval to the
//! removal rate: many removals speed it up, none slow it down.

use crate::expire::accessor::RecordAccessor;
use crate::expire::error::{ExpireBinError, Result};
use crate::storage::BinFilter;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Final statistics of a sweep job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Job id assigned by the coordinator
    pub job_id: u64,
    /// The collection that was swept
    pub collection: String,
    /// Records the job reached (including failed ones)
    pub records_visited: u64,
    /// Expired bins physically removed
    pub bins_removed: u64,
    /// Records whose reclaim failed
    pub records_failed: u64,
    /// True if the job stopped early because it was cancelled
    pub cancelled: bool,
    /// Wall time spent in the job
    pub elapsed: Duration,
}

/// A snapshot of a running sweep's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepProgress {
    pub records_visited: u64,
    pub bins_removed: u64,
    pub records_failed: u64,
}

/// Where a sweep job is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SweepState {
    Running = 0,
    Finished = 1,
    Cancelled = 2,
    /// The scan itself could not be started
    Failed = 3,
}

impl SweepState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SweepState::Finished,
            2 => SweepState::Cancelled,
            3 => SweepState::Failed,
            _ => SweepState::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SweepState::Running => "running",
            SweepState::Finished => "finished",
            SweepState::Cancelled => "cancelled",
            SweepState::Failed => "failed",
        }
    }
}

/// State and counters of a sweep job, running or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStatus {
    pub state: SweepState,
    pub progress: SweepProgress,
}

#[derive(Debug, Default)]
struct Counters {
    records_visited: AtomicU64,
    bins_removed: AtomicU64,
    records_failed: AtomicU64,
    state: AtomicU8,
}

impl Counters {
    fn snapshot(&self) -> SweepProgress {
        SweepProgress {
            records_visited: self.records_visited.load(Ordering::Relaxed),
            bins_removed: self.bins_removed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
        }
    }

    fn status(&self) -> SweepStatus {
        SweepStatus {
            state: SweepState::from_u8(self.state.load(Ordering::Acquire)),
            progress: self.snapshot(),
        }
    }

    fn finish(&self, state: SweepState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Number of most recent jobs whose status stays queryable.
pub const RETAINED_JOBS: usize = 64;

/// Starts sweep jobs over the collections of one store.
#[derive(Debug)]
pub struct SweepCoordinator {
    accessor: Arc<RecordAccessor>,
    next_job: AtomicU64,
    jobs: Mutex<BTreeMap<u64, Arc<Counters>>>,
}

impl SweepCoordinator {
    /// Creates a coordinator that reclaims through `accessor`.
    pub fn new(accessor: Arc<RecordAccessor>) -> Self {
        Self {
            accessor,
            next_job: AtomicU64::new(1),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Status of one of the last [`RETAINED_JOBS`] jobs.
    pub fn status(&self, job_id: u64) -> Option<SweepStatus> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&job_id).map(|counters| counters.status())
    }

    fn retain(&self, job_id: u64, counters: &Arc<Counters>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job_id, Arc::clone(counters));
        while jobs.len() > RETAINED_JOBS {
            jobs.pop_first();
        }
    }

    /// The accessor used for reclaims.
    pub fn accessor(&self) -> &Arc<RecordAccessor> {
        &self.accessor
    }

    /// Starts a sweep over `collection` on the blocking pool.
    ///
    /// With a filter, only the named bins are considered. Must be called from
    /// within a tokio runtime.
    pub fn run_sweep(&self, collection: &str, filter: Option<BinFilter>) -> SweepHandle {
        let job_id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        self.retain(job_id, &counters);

        let job = SweepJob {
            job_id,
            collection: collection.to_string(),
            filter,
            accessor: Arc::clone(&self.accessor),
            counters: Arc::clone(&counters),
            cancel_rx,
        };

        debug!(job_id, collection, "Sweep started");
        let join = tokio::task::spawn_blocking(move || job.run());

        SweepHandle {
            job_id,
            counters,
            join,
            cancel: CancelGuard {
                tx: cancel_tx,
                armed: true,
            },
        }
    }
}

/// State owned by the blocking worker.
struct SweepJob {
    job_id: u64,
    collection: String,
    filter: Option<BinFilter>,
    accessor: Arc<RecordAccessor>,
    counters: Arc<Counters>,
    cancel_rx: watch::Receiver<bool>,
}

impl SweepJob {
    fn run(self) -> Result<SweepReport> {
        let counters = Arc::clone(&self.counters);
        let result = self.sweep();

        counters.finish(match &result {
            Ok(report) if report.cancelled => SweepState::Cancelled,
            Ok(_) => SweepState::Finished,
            Err(_) => SweepState::Failed,
        });
        result
    }

    fn sweep(self) -> Result<SweepReport> {
        let started = Instant::now();
        let store = Arc::clone(self.accessor.store());
        let keys = store.scan(&self.collection, self.filter.as_ref())?;
        let mut cancelled = false;

        for item in keys {
            if *self.cancel_rx.borrow() {
                cancelled = true;
                break;
            }
            self.counters.records_visited.fetch_add(1, Ordering::Relaxed);

            let key = match item {
                Ok(key) => key,
                Err(e) => {
                    warn!(job_id = self.job_id, error = %e, "Scan failed to produce a record");
                    self.counters.records_failed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            match self.accessor.reclaim_bins(&key, self.filter.as_ref()) {
                Ok(removed) => {
                    self.counters
                        .bins_removed
                        .fetch_add(removed as u64, Ordering::Relaxed);
                }
                Err(ExpireBinError::RecordNotFound(_)) => {
                    trace!(job_id = self.job_id, %key, "Record vanished during sweep");
                }
                Err(e) => {
                    warn!(job_id = self.job_id, %key, error = %e, "Failed to reclaim record");
                    self.counters.records_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let progress = self.counters.snapshot();
        let report = SweepReport {
            job_id: self.job_id,
            collection: self.collection,
            records_visited: progress.records_visited,
            bins_removed: progress.bins_removed,
            records_failed: progress.records_failed,
            cancelled,
            elapsed: started.elapsed(),
        };

        info!(
            job_id = report.job_id,
            collection = %report.collection,
            visited = report.records_visited,
            removed = report.bins_removed,
            failed = report.records_failed,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis(),
            "Sweep finished"
        );
        Ok(report)
    }
}

/// Cancels its job when dropped while armed.
#[derive(Debug)]
struct CancelGuard {
    tx: watch::Sender<bool>,
    armed: bool,
}

impl CancelGuard {
    fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cancel();
        }
    }
}

/// A handle to a running sweep job.
///
/// Dropping the handle cancels the job unless it was detached.
#[derive(Debug)]
pub struct SweepHandle {
    job_id: u64,
    counters: Arc<Counters>,
    join: JoinHandle<Result<SweepReport>>,
    cancel: CancelGuard,
}

impl SweepHandle {
    /// The job id.
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Asks the job to stop before its next record.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The job's counters so far.
    pub fn progress(&self) -> SweepProgress {
        self.counters.snapshot()
    }

    /// The job's state and counters.
    pub fn status(&self) -> SweepStatus {
        self.counters.status()
    }

    /// Waits for the job to finish and returns its report.
    ///
    /// Dropping the returned future before it completes cancels the job.
    pub async fn wait(self) -> Result<SweepReport> {
        let SweepHandle {
            join, mut cancel, ..
        } = self;
        let result = join.await?;
        cancel.armed = false;
        result
    }

    /// Lets the job run to completion without a handle.
    ///
    /// The report is still logged when the job ends, and
    /// [`SweepCoordinator::status`] keeps answering for it.
    pub fn detach(mut self) -> u64 {
        self.cancel.armed = false;
        self.job_id
    }
}

/// Configuration for the sweep scheduler.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval before the first round (default: 1s)
    pub base_interval: Duration,

    /// Fastest allowed interval (default: 100ms)
    pub min_interval: Duration,

    /// Slowest allowed interval (default: 60s)
    pub max_interval: Duration,

    /// Removal rate above which the interval halves
    pub speedup_threshold: f64,

    /// Removal rate below which an idle round doubles the interval
    pub slowdown_threshold: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(60),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

impl SweepConfig {
    /// The interval to use after a round that removed `removed` bins out of
    /// `visited` records.
    pub fn next_interval(&self, current: Duration, visited: u64, removed: u64) -> Duration {
        if visited == 0 {
            return current;
        }

        let rate = removed as f64 / visited as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if rate < self.slowdown_threshold && removed == 0 {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// Periodically sweeps a fixed set of collections.
///
/// Dropping the scheduler stops it; a sweep in flight is cancelled.
#[derive(Debug)]
pub struct SweepScheduler {
    shutdown_tx: watch::Sender<bool>,
}

impl SweepScheduler {
    /// Starts the scheduler as a background task.
    pub fn start(
        coordinator: Arc<SweepCoordinator>,
        collections: Vec<String>,
        config: SweepConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(?collections, "Sweep scheduler started");
        tokio::spawn(scheduler_loop(coordinator, collections, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the scheduler.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Sweep scheduler stopped");
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn scheduler_loop(
    coordinator: Arc<SweepCoordinator>,
    collections: Vec<String>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Sweep scheduler received shutdown signal");
                    return;
                }
            }
        }

        let mut visited = 0;
        let mut removed = 0;

        for collection in &collections {
            let handle = coordinator.run_sweep(collection, None);

            // Dropping the handle on shutdown cancels the sweep
            let outcome = tokio::select! {
                outcome = handle.wait() => outcome,
                _ = shutdown_rx.changed() => {
                    debug!("Sweep scheduler received shutdown signal");
                    return;
                }
            };

            match outcome {
                Ok(report) => {
                    visited += report.records_visited;
                    removed += report.bins_removed;
                }
                Err(e) => warn!(collection = %collection, error = %e, "Scheduled sweep failed"),
            }
        }

        let next = config.next_interval(current_interval, visited, removed);
        if next != current_interval {
            trace!(
                removed,
                visited,
                new_interval_ms = next.as_millis(),
                "Adjusted sweep interval"
            );
        }
        current_interval = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expire::accessor::AccessPolicy;
    use crate::expire::deadline::{DeadlineRequest, ManualClock, Timestamp};
    use crate::expire::testing::{PoisonedRecords, SlowLoads};
    use crate::storage::{MemoryStore, RecordKey, RecordStore, Value};

    const T0: Timestamp = Timestamp::from_secs(3_000_000);

    /// 1000 records, every one with a permanent bin, 30% with a bin that
    /// expires after 10 seconds.
    fn populate(accessor: &RecordAccessor) {
        for i in 0..1000 {
            let key = RecordKey::new("sweep", format!("r{}", i));
            accessor.put(&key, "keep", Value::Int(i), None).unwrap();
            if i % 10 < 3 {
                accessor
                    .put(&key, "temp", Value::Int(i), Some(DeadlineRequest::ExpireAfter(10)))
                    .unwrap();
            }
        }
    }

    fn accessor_over(store: Arc<dyn RecordStore>, clock: Arc<ManualClock>) -> Arc<RecordAccessor> {
        Arc::new(RecordAccessor::new(store, clock, AccessPolicy::default()))
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_bins() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store.clone(), clock.clone());
        populate(&accessor);

        clock.advance(Duration::from_secs(20));
        let coordinator = SweepCoordinator::new(Arc::clone(&accessor));
        let report = coordinator.run_sweep("sweep", None).wait().await.unwrap();

        assert_eq!(report.records_visited, 1000);
        assert_eq!(report.bins_removed, 300);
        assert_eq!(report.records_failed, 0);
        assert!(!report.cancelled);

        for i in 0..1000 {
            let key = RecordKey::new("sweep", format!("r{}", i));
            assert_eq!(accessor.get_one(&key, "temp").unwrap(), None);
            assert_eq!(accessor.get_one(&key, "keep").unwrap(), Some(Value::Int(i)));
        }

        // A second pass finds nothing left
        let again = coordinator.run_sweep("sweep", None).wait().await.unwrap();
        assert_eq!(again.bins_removed, 0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_bins() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store, clock.clone());
        populate(&accessor);

        clock.advance(Duration::from_secs(5));
        let coordinator = SweepCoordinator::new(Arc::clone(&accessor));
        let report = coordinator.run_sweep("sweep", None).wait().await.unwrap();

        assert_eq!(report.bins_removed, 0);
        let key = RecordKey::new("sweep", "r0");
        assert_eq!(accessor.get_one(&key, "temp").unwrap(), Some(Value::Int(0)));
    }

    #[tokio::test]
    async fn test_sweep_with_filter() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store, clock.clone());

        let key = RecordKey::new("sweep", "only");
        for bin in ["a", "b"] {
            accessor
                .put(&key, bin, Value::Int(1), Some(DeadlineRequest::ExpireAfter(1)))
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));

        let coordinator = SweepCoordinator::new(Arc::clone(&accessor));
        let filter = BinFilter::from(["a".to_string()]);
        let report = coordinator
            .run_sweep("sweep", Some(filter))
            .wait()
            .await
            .unwrap();

        assert_eq!(report.records_visited, 1);
        assert_eq!(report.bins_removed, 1);
        assert_eq!(accessor.reclaim(&key).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failures() {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        populate(&accessor_over(inner.clone(), clock.clone()));
        clock.advance(Duration::from_secs(20));

        // r0 and r1 both carry an expiring bin
        let poisoned = PoisonedRecords::new(inner.clone(), ["r0".to_string(), "r1".to_string()]);
        let accessor = accessor_over(Arc::new(poisoned), clock);
        let coordinator = SweepCoordinator::new(accessor);

        let report = coordinator.run_sweep("sweep", None).wait().await.unwrap();
        assert_eq!(report.records_visited, 1000);
        assert_eq!(report.records_failed, 2);
        assert_eq!(report.bins_removed, 298);
    }

    #[tokio::test]
    async fn test_sweep_cancellation() {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        populate(&accessor_over(inner.clone(), clock.clone()));
        clock.advance(Duration::from_secs(20));

        let slow = SlowLoads::new(inner, Duration::from_millis(2));
        let coordinator = SweepCoordinator::new(accessor_over(Arc::new(slow), clock));

        let handle = coordinator.run_sweep("sweep", None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        let seen = handle.progress();

        let report = handle.wait().await.unwrap();
        assert!(report.cancelled);
        assert!(report.records_visited >= seen.records_visited);
        assert!(report.records_visited < 1000);
        assert!(report.bins_removed <= report.records_visited);
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels() {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        populate(&accessor_over(inner.clone(), clock.clone()));
        clock.advance(Duration::from_secs(20));

        let slow = SlowLoads::new(inner.clone(), Duration::from_millis(2));
        let coordinator = SweepCoordinator::new(accessor_over(Arc::new(slow), clock.clone()));

        drop(coordinator.run_sweep("sweep", None));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Whatever the worker reached before noticing, most records are untouched
        let checker = accessor_over(inner, clock);
        let report = SweepCoordinator::new(checker)
            .run_sweep("sweep", None)
            .wait()
            .await
            .unwrap();
        assert!(report.bins_removed > 0);
    }

    #[tokio::test]
    async fn test_detached_sweep_completes() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store.clone(), clock.clone());
        populate(&accessor);
        clock.advance(Duration::from_secs(20));

        let writes_before = store.stats().writes;
        let coordinator = SweepCoordinator::new(Arc::clone(&accessor));
        let first = coordinator.run_sweep("sweep", None).detach();
        let second = coordinator.run_sweep("other", None).detach();
        assert_ne!(first, second);

        // One write per record that held an expired bin
        let mut done = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.stats().writes == writes_before + 300 {
                done = true;
                break;
            }
        }
        assert!(done);
    }

    #[tokio::test]
    async fn test_scheduler_reclaims_periodically() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store.clone(), clock.clone());
        populate(&accessor);
        clock.advance(Duration::from_secs(20));

        let config = SweepConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let coordinator = Arc::new(SweepCoordinator::new(Arc::clone(&accessor)));
        let _scheduler = SweepScheduler::start(coordinator, vec!["sweep".to_string()], config);

        tokio::time::sleep(Duration::from_millis(500)).await;

        // Nothing expired is left for a manual reclaim
        let mut leftovers = 0;
        for i in 0..1000 {
            let key = RecordKey::new("sweep", format!("r{}", i));
            leftovers += accessor.reclaim(&key).unwrap();
        }
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_drop() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store, clock.clone());

        let config = SweepConfig {
            base_interval: Duration::from_millis(10),
            ..Default::default()
        };
        {
            let coordinator = Arc::new(SweepCoordinator::new(Arc::clone(&accessor)));
            let _scheduler = SweepScheduler::start(coordinator, vec!["sweep".to_string()], config);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        populate(&accessor);
        clock.advance(Duration::from_secs(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The expired bins are hidden but still physically present
        let key = RecordKey::new("sweep", "r0");
        assert_eq!(accessor.get_one(&key, "temp").unwrap(), None);
        assert_eq!(accessor.reclaim(&key).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sweep_races_client_writes() {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let policy = AccessPolicy::default()
            .with_reclaim_on_write(false)
            .with_max_retries(64);
        let writer = Arc::new(RecordAccessor::new(inner.clone(), clock.clone(), policy.clone()));

        for i in 0..500 {
            let key = RecordKey::new("race", format!("r{}", i));
            writer.put(&key, "keep", Value::Int(i), None).unwrap();
            writer
                .put(&key, "temp", Value::Int(i), Some(DeadlineRequest::ExpireAfter(1)))
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));

        // The slowed sweep gives the writer time to land on records mid-scan
        let slow = SlowLoads::new(inner.clone(), Duration::from_micros(200));
        let sweeper = Arc::new(RecordAccessor::new(Arc::new(slow), clock.clone(), policy));
        let coordinator = SweepCoordinator::new(sweeper);
        let handle = coordinator.run_sweep("race", None);

        let client = Arc::clone(&writer);
        let writes = tokio::task::spawn_blocking(move || {
            for i in (0..500).rev() {
                let key = RecordKey::new("race", format!("r{}", i));
                client
                    .put(&key, "new", Value::Int(i), Some(DeadlineRequest::ExpireAfter(60)))
                    .unwrap();
            }
        });

        let report = handle.wait().await.unwrap();
        writes.await.unwrap();
        assert_eq!(report.records_failed, 0);

        let mut leftovers = 0;
        for i in 0..500 {
            let key = RecordKey::new("race", format!("r{}", i));
            leftovers += writer.reclaim(&key).unwrap() as u64;

            let values = writer.get(&key, &["keep", "temp", "new"]).unwrap();
            assert_eq!(
                values,
                vec![Ok(Some(Value::Int(i))), Ok(None), Ok(Some(Value::Int(i)))]
            );
        }
        assert_eq!(report.bins_removed + leftovers, 500);
    }

    #[tokio::test]
    async fn test_status_tracks_jobs() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let accessor = accessor_over(store, clock.clone());
        populate(&accessor);
        clock.advance(Duration::from_secs(20));

        let coordinator = SweepCoordinator::new(accessor);
        assert_eq!(coordinator.status(1), None);

        let handle = coordinator.run_sweep("sweep", None);
        let job_id = handle.job_id();
        let report = handle.wait().await.unwrap();

        let status = coordinator.status(job_id).unwrap();
        assert_eq!(status.state, SweepState::Finished);
        assert_eq!(status.progress.bins_removed, report.bins_removed);
        assert_eq!(status.progress.records_visited, 1000);
    }

    #[tokio::test]
    async fn test_status_reports_cancelled() {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        populate(&accessor_over(inner.clone(), clock.clone()));

        let slow = SlowLoads::new(inner, Duration::from_millis(2));
        let coordinator = SweepCoordinator::new(accessor_over(Arc::new(slow), clock));

        let handle = coordinator.run_sweep("sweep", None);
        let job_id = handle.job_id();
        assert_eq!(handle.status().state, SweepState::Running);
        drop(handle);

        let mut state = SweepState::Running;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = coordinator.status(job_id).unwrap().state;
            if state != SweepState::Running {
                break;
            }
        }
        assert_eq!(state, SweepState::Cancelled);
    }

    #[tokio::test]
    async fn test_old_jobs_are_forgotten() {
        let clock = Arc::new(ManualClock::new(T0));
        let coordinator = SweepCoordinator::new(accessor_over(Arc::new(MemoryStore::new()), clock));

        let mut last = 0;
        for _ in 0..=RETAINED_JOBS {
            last = coordinator.run_sweep("empty", None).detach();
        }

        assert_eq!(coordinator.status(1), None);
        assert!(coordinator.status(2).is_some());
        assert!(coordinator.status(last).is_some());
    }

    #[test]
    fn test_next_interval() {
        let config = SweepConfig {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(400),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        };
        let base = config.base_interval;

        assert_eq!(config.next_interval(base, 100, 50), Duration::from_millis(50));
        assert_eq!(config.next_interval(base, 100, 0), Duration::from_millis(200));
        assert_eq!(config.next_interval(base, 100, 10), base);
        assert_eq!(config.next_interval(base, 0, 0), base);

        assert_eq!(
            config.next_interval(Duration::from_millis(15), 10, 10),
            Duration::from_millis(10)
        );
        assert_eq!(
            config.next_interval(Duration::from_millis(300), 10, 0),
            Duration::from_millis(400)
        );
    }
}

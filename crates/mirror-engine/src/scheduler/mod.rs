//! Transfer Scheduler.
//!
//! Downloads a batch of tasks over a fixed pool of N transfer handles.
//!
//! One coordinator owns the [`HandlePool`] and the [`TaskQueue`]. It binds
//! free handles to queued tasks and moves each handle, by value, into its
//! own tokio task; the handle comes back over a channel together with the
//! transfer result. Successful downloads are handed to the
//! [`ArtifactSink`] on the blocking pool. The coordinator never blocks on
//! a single transfer and wakes at least once per poll interval.

pub mod pool;
pub mod queue;

pub use pool::{HandlePool, PoolStats, TransferHandle};
pub use queue::TaskQueue;

use crate::config::SchedulerOptions;
use crate::dispatch::ArtifactSink;
use crate::error::MirrorResult;
use crate::remote::RemoteConnector;
use crate::types::{ArtifactResult, ArtifactStatus, DownloadTask, TaskOutcome, TaskReport, TaskStatus};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Upper bound on concurrent transfer handles.
pub const MAX_HANDLES: usize = 100;

/// Handles to open for `pending` tasks: `configured` clamped to
/// `[1, MAX_HANDLES]`, never more than there are tasks.
pub fn effective_concurrency(configured: usize, pending: usize) -> usize {
    if pending == 0 {
        return 0;
    }
    configured.clamp(1, MAX_HANDLES).min(pending)
}

/// Called with the pool counts at every point the coordinator inspects it.
pub type PoolObserver = Arc<dyn Fn(&PoolStats) + Send + Sync>;

struct Completion {
    handle: TransferHandle,
    task: DownloadTask,
    result: MirrorResult<u64>,
}

pub struct Scheduler {
    connector: Arc<dyn RemoteConnector>,
    options: SchedulerOptions,
    verbose: bool,
    observer: Option<PoolObserver>,
}

impl Scheduler {
    pub fn new(connector: Arc<dyn RemoteConnector>, options: SchedulerOptions) -> Self {
        Self {
            connector,
            options,
            verbose: false,
            observer: None,
        }
    }

    /// Log every transfer at `debug` level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_observer(mut self, observer: PoolObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn observe(&self, pool: &HandlePool) {
        if let Some(observer) = &self.observer {
            observer(&pool.stats());
        }
    }

    /// Download every task and dispatch what arrived. Returns one report
    /// per task, in completion order.
    pub async fn run(&self, tasks: Vec<DownloadTask>, sink: Arc<dyn ArtifactSink>) -> Vec<TaskReport> {
        let total = tasks.len();
        let handles = effective_concurrency(self.options.concurrency, total);
        if handles == 0 {
            return Vec::new();
        }
        info!(tasks = total, handles, "starting transfers");

        let mut queue = TaskQueue::new();
        for task in tasks {
            queue.enqueue(task);
        }
        let mut pool = HandlePool::new(
            (0..handles)
                .map(|id| TransferHandle::new(id, self.connector.clone(), self.options.connect_timeout))
                .collect(),
        );
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut dispatching: JoinSet<TaskReport> = JoinSet::new();
        let mut reports = Vec::with_capacity(total);

        loop {
            while pool.has_free() {
                let Some(task) = queue.next_pending() else {
                    break;
                };
                let Some(handle) = pool.bind(&task) else {
                    queue.requeue(task.id);
                    break;
                };
                self.start_transfer(handle, task, done_tx.clone());
            }
            self.observe(&pool);

            if queue.is_drained() && dispatching.is_empty() {
                break;
            }

            tokio::select! {
                Some(done) = done_rx.recv() => {
                    let Completion { handle, mut task, result } = done;
                    pool.release(handle);
                    self.observe(&pool);
                    match result {
                        Ok(bytes) => {
                            queue.mark_done(task.id);
                            task.status = TaskStatus::Done;
                            if self.verbose {
                                debug!(path = %task.remote_path, bytes, "downloaded");
                            }
                            let sink = sink.clone();
                            dispatching.spawn_blocking(move || dispatch_one(sink.as_ref(), task, bytes));
                        }
                        Err(e) => {
                            queue.mark_failed(task.id);
                            warn!(path = %task.remote_path, error = %e, "download failed");
                            remove_partial(&task).await;
                            reports.push(TaskReport::transfer_failed(task, e.to_string()));
                        }
                    }
                }
                Some(joined) = dispatching.join_next(), if !dispatching.is_empty() => {
                    match joined {
                        Ok(report) => reports.push(report),
                        Err(e) => warn!(error = %e, "dispatch task did not complete"),
                    }
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {
                    debug!(active = queue.active(), "waiting for transfers");
                }
            }
        }

        for mut handle in pool.drain() {
            handle.close().await;
        }
        let ok = reports.iter().filter(|r| r.is_success()).count();
        info!(tasks = total, succeeded = ok, failed = reports.len() - ok, "transfers finished");
        reports
    }

    fn start_transfer(&self, mut handle: TransferHandle, task: DownloadTask, done: mpsc::UnboundedSender<Completion>) {
        let timeout = self.options.transfer_timeout;
        if self.verbose {
            debug!(handle = handle.id, path = %task.remote_path, "transfer bound");
        }
        tokio::spawn(async move {
            let result = handle.fetch(&task, timeout).await;
            if done.send(Completion { handle, task, result }).is_err() {
                warn!("scheduler gone before transfer completed");
            }
        });
    }
}

fn dispatch_one(sink: &dyn ArtifactSink, task: DownloadTask, bytes: u64) -> TaskReport {
    let artifact = catch_unwind(AssertUnwindSafe(|| sink.finish(&task))).unwrap_or_else(|_| {
        ArtifactResult::failed(ArtifactStatus::UnpackError, "artifact handler panicked")
    });
    TaskReport {
        task,
        outcome: TaskOutcome::Dispatched { bytes, artifact },
    }
}

async fn remove_partial(task: &DownloadTask) {
    match tokio::fs::remove_file(&task.local_path).await {
        Ok(()) => debug!(path = %task.local_path.display(), "partial download removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %task.local_path.display(), error = %e, "could not remove partial download"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRemote;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Accepts every artifact and remembers which ones it saw.
    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    impl ArtifactSink for RecordingSink {
        fn finish(&self, task: &DownloadTask) -> ArtifactResult {
            self.seen.lock().unwrap().push(task.remote_path.clone());
            ArtifactResult::ok("/store", vec![task.local_path.clone()], "recorded")
        }
    }

    struct PanickingSink;

    impl ArtifactSink for PanickingSink {
        fn finish(&self, _task: &DownloadTask) -> ArtifactResult {
            panic!("boom");
        }
    }

    fn remote_with(n: usize) -> FakeRemote {
        let mut remote = FakeRemote::new();
        for i in 0..n {
            remote = remote.with_file(&format!("/A/f{}", i), b"data");
        }
        remote
    }

    fn tasks(n: usize, dir: &TempDir) -> Vec<DownloadTask> {
        (0..n)
            .map(|i| DownloadTask::new(i, format!("/A/f{}", i), dir.path().join(format!("f{}", i))))
            .collect()
    }

    fn options(concurrency: usize) -> SchedulerOptions {
        SchedulerOptions {
            concurrency,
            connect_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }

    // ── Concurrency bound ────────────────────────────────────────────

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(effective_concurrency(3, 10), 3);
        assert_eq!(effective_concurrency(10, 3), 3);
        assert_eq!(effective_concurrency(0, 5), 1);
        assert_eq!(effective_concurrency(500, 1000), MAX_HANDLES);
        assert_eq!(effective_concurrency(4, 0), 0);
    }

    // ── Runs ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn every_task_completes_within_the_pool_bound() {
        let dir = TempDir::new().unwrap();
        let remote = remote_with(10).with_delay(Duration::from_millis(20));
        let stats = Arc::new(Mutex::new(Vec::<PoolStats>::new()));
        let recorder = stats.clone();
        let sink = Arc::new(RecordingSink::default());

        let scheduler = Scheduler::new(Arc::new(remote.clone()), options(3))
            .with_observer(Arc::new(move |s: &PoolStats| recorder.lock().unwrap().push(*s)));
        let reports = scheduler.run(tasks(10, &dir), sink.clone()).await;

        assert_eq!(reports.len(), 10);
        assert!(reports.iter().all(|r| r.is_success()));
        assert!(reports.iter().all(|r| r.task.status == TaskStatus::Done));
        let ids: HashSet<usize> = reports.iter().map(|r| r.task.id).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(sink.seen.lock().unwrap().len(), 10);

        assert!(remote.peak_active() <= 3);
        assert_eq!(remote.connects(), 3);
        let stats = stats.lock().unwrap();
        assert!(!stats.is_empty());
        for s in stats.iter() {
            assert_eq!(s.capacity, 3);
            assert_eq!(s.free + s.bound, s.capacity);
            assert_eq!(s.bound_paths, s.bound);
        }
    }

    #[tokio::test]
    async fn configured_concurrency_is_reduced_to_task_count() {
        let dir = TempDir::new().unwrap();
        let remote = remote_with(2);
        let stats = Arc::new(Mutex::new(Vec::<PoolStats>::new()));
        let recorder = stats.clone();
        let scheduler = Scheduler::new(Arc::new(remote.clone()), options(10))
            .with_observer(Arc::new(move |s: &PoolStats| recorder.lock().unwrap().push(*s)));
        let reports = scheduler.run(tasks(2, &dir), Arc::new(RecordingSink::default())).await;

        assert_eq!(reports.len(), 2);
        assert!(stats.lock().unwrap().iter().all(|s| s.capacity == 2));
    }

    #[tokio::test]
    async fn no_tasks_opens_no_connection() {
        let remote = remote_with(0);
        let scheduler = Scheduler::new(Arc::new(remote.clone()), options(4));
        let reports = scheduler.run(Vec::new(), Arc::new(RecordingSink::default())).await;
        assert!(reports.is_empty());
        assert_eq!(remote.connects(), 0);
    }

    #[tokio::test]
    async fn failed_transfer_is_reported_and_others_continue() {
        let dir = TempDir::new().unwrap();
        let remote = remote_with(4).failing_file("/A/f1");
        let sink = Arc::new(RecordingSink::default());
        let reports = Scheduler::new(Arc::new(remote.clone()), options(1))
            .run(tasks(4, &dir), sink.clone())
            .await;

        assert_eq!(reports.len(), 4);
        let failed: Vec<_> = reports.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task.remote_path, "/A/f1");
        assert_eq!(failed[0].task.status, TaskStatus::Failed);
        assert!(matches!(failed[0].outcome, TaskOutcome::TransferFailed { .. }));
        assert!(!dir.path().join("f1").exists());
        assert_eq!(sink.seen.lock().unwrap().len(), 3);
        // The single handle reconnected after the failure.
        assert_eq!(remote.connects(), 2);
    }

    #[tokio::test]
    async fn slow_transfers_time_out() {
        let dir = TempDir::new().unwrap();
        let remote = remote_with(2).with_delay(Duration::from_millis(500));
        let mut opts = options(2);
        opts.transfer_timeout = Duration::from_millis(30);
        let reports = Scheduler::new(Arc::new(remote), opts)
            .run(tasks(2, &dir), Arc::new(RecordingSink::default()))
            .await;

        assert_eq!(reports.len(), 2);
        for report in &reports {
            match &report.outcome {
                TaskOutcome::TransferFailed { error } => assert!(error.contains("timed out")),
                other => panic!("expected a timeout, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn panicking_sink_still_yields_a_report() {
        let dir = TempDir::new().unwrap();
        let remote = remote_with(1);
        let reports = Scheduler::new(Arc::new(remote), options(1))
            .run(tasks(1, &dir), Arc::new(PanickingSink))
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].artifact().unwrap().status, ArtifactStatus::UnpackError);
    }
}

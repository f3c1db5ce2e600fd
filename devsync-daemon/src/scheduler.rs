//! Periodic driver for [`run_cycle`].
//!
//! A [`Scheduler`] is a cheap-to-clone handle around one polling session.
//! Each tick tries to take the `busy` flag; if a cycle is already in flight
//! the tick is dropped, never queued. The cycle itself runs on tokio's
//! blocking pool, and the flag is released when the cycle finishes for any
//! reason.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use devsync_core::{types::DEFAULT_INTERVAL_SECS, ConfigProvider};
use devsync_exec::{NotificationSink, ProcessRunner};

use crate::cycle::{run_cycle, CycleContext, CycleOutcome};
use crate::vcs::VersionControlClient;

/// Everything a cycle talks to.
#[derive(Clone)]
pub struct CycleDeps {
    pub workdir: PathBuf,
    pub config: Arc<dyn ConfigProvider>,
    pub vcs: Arc<dyn VersionControlClient>,
    pub runner: Arc<dyn ProcessRunner>,
    pub sink: Arc<dyn NotificationSink>,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    /// A cycle was already running.
    Dropped,
    Completed(CycleOutcome),
    /// The cycle panicked; polling has been stopped.
    Panicked,
}

/// What drives the timer loop.
#[derive(Debug)]
pub enum TickSource {
    /// Sleep for the configured interval, re-read before every wait.
    Interval,
    /// One tick per message; the loop ends when the sender is dropped.
    Channel(mpsc::Receiver<()>),
}

/// Snapshot served by the control socket's `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub polling: bool,
    pub busy: bool,
    pub started_at: DateTime<Utc>,
    pub cycles: u64,
    pub dropped_ticks: u64,
    pub interval_secs: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
}

#[derive(Debug, Default)]
struct Tally {
    cycles: u64,
    dropped_ticks: u64,
    interval_secs: Option<u64>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_outcome: Option<CycleOutcome>,
}

struct Timer {
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    deps: CycleDeps,
    busy: AtomicBool,
    polling: AtomicBool,
    started_at: DateTime<Utc>,
    tally: Mutex<Tally>,
    timer: Mutex<Option<Timer>>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Holds the `busy` flag; releases it on drop, including during unwinding.
struct BusyGuard(Arc<Inner>);

impl BusyGuard {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(inner.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(deps: CycleDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                busy: AtomicBool::new(false),
                polling: AtomicBool::new(false),
                started_at: Utc::now(),
                tally: Mutex::new(Tally::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn is_polling(&self) -> bool {
        self.inner.polling.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SchedulerStatus {
        let tally = self.tally();
        SchedulerStatus {
            polling: self.is_polling(),
            busy: self.is_busy(),
            started_at: self.inner.started_at,
            cycles: tally.cycles,
            dropped_ticks: tally.dropped_ticks,
            interval_secs: tally.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            last_cycle_at: tally.last_cycle_at,
            last_outcome: tally.last_outcome.clone(),
        }
    }

    /// Run one cycle now unless one is already in flight.
    pub async fn tick(&self) -> TickResult {
        match BusyGuard::acquire(&self.inner) {
            Some(guard) => self.run_guarded(guard).await,
            None => self.drop_tick(),
        }
    }

    fn drop_tick(&self) -> TickResult {
        self.tally().dropped_ticks += 1;
        tracing::debug!("previous cycle still running, tick dropped");
        TickResult::Dropped
    }

    async fn run_guarded(&self, guard: BusyGuard) -> TickResult {
        let inner = self.inner.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let deps = &inner.deps;
            run_cycle(CycleContext {
                workdir: &deps.workdir,
                config: deps.config.as_ref(),
                vcs: deps.vcs.as_ref(),
                runner: deps.runner.as_ref(),
                sink: deps.sink.as_ref(),
            })
        })
        .await;

        match joined {
            Ok(outcome) => {
                tracing::info!(outcome = outcome.label(), "cycle finished");
                let mut tally = self.tally();
                tally.cycles += 1;
                tally.last_cycle_at = Some(Utc::now());
                tally.last_outcome = Some(outcome.clone());
                drop(tally);
                TickResult::Completed(outcome)
            }
            Err(err) => {
                tracing::error!(error = %err, "sync cycle crashed, stopping scheduler");
                self.inner
                    .deps
                    .sink
                    .info(&format!("DevSync stopped: sync cycle crashed ({err})"));
                self.stop().await;
                TickResult::Panicked
            }
        }
    }

    /// Start polling on the configured interval. Returns `false` if a timer
    /// is already running.
    pub fn start(&self) -> bool {
        self.start_with(TickSource::Interval)
    }

    /// Start polling driven by `ticks` instead of a clock.
    pub fn start_with_ticker(&self, ticks: mpsc::Receiver<()>) -> bool {
        self.start_with(TickSource::Channel(ticks))
    }

    fn start_with(&self, source: TickSource) -> bool {
        let mut slot = self.timer_slot();
        if slot.as_ref().is_some_and(|t| !t.task.is_finished()) {
            tracing::debug!("polling already started");
            return false;
        }

        let (stop_tx, stop_rx) = broadcast::channel::<()>(1);
        self.inner.polling.store(true, Ordering::Release);
        let task = tokio::spawn(self.clone().timer_loop(source, stop_rx));
        *slot = Some(Timer {
            stop: stop_tx,
            task,
        });
        true
    }

    /// Stop polling. An in-flight cycle is left to finish; no cycle starts
    /// from the timer after this returns. Returns `false` if polling was not
    /// running.
    pub async fn stop(&self) -> bool {
        self.inner.polling.store(false, Ordering::Release);
        let Some(timer) = self.timer_slot().take() else {
            return false;
        };
        let _ = timer.stop.send(());
        if let Err(err) = timer.task.await {
            tracing::warn!(error = %err, "timer task ended abnormally");
        }
        true
    }

    async fn timer_loop(self, mut source: TickSource, mut stop_rx: broadcast::Receiver<()>) {
        tracing::info!("polling started");
        loop {
            let fired = match &mut source {
                TickSource::Interval => {
                    let every = self.poll_interval().await;
                    tokio::select! {
                        biased;
                        _ = stop_rx.recv() => false,
                        _ = tokio::time::sleep(every) => true,
                    }
                }
                TickSource::Channel(ticks) => tokio::select! {
                    biased;
                    _ = stop_rx.recv() => false,
                    tick = ticks.recv() => tick.is_some(),
                },
            };
            if !fired || !self.is_polling() {
                break;
            }

            // Take `busy` here so a cycle is either in flight before `stop`
            // can join this loop, or never started.
            match BusyGuard::acquire(&self.inner) {
                Some(guard) => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.run_guarded(guard).await;
                    });
                }
                None => {
                    self.drop_tick();
                }
            }
        }
        tracing::info!("polling stopped");
    }

    /// Current interval from config; the last known value if it cannot be read.
    async fn poll_interval(&self) -> Duration {
        let config = self.inner.deps.config.clone();
        let loaded = tokio::task::spawn_blocking(move || config.load()).await;

        let mut tally = self.tally();
        match loaded {
            Ok(Ok(cfg)) => tally.interval_secs = Some(cfg.poll_interval().as_secs()),
            Ok(Err(err)) => tracing::warn!(error = %err, "config unreadable, keeping previous interval"),
            Err(err) => tracing::warn!(error = %err, "config load task failed"),
        }
        Duration::from_secs(tally.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS).max(1))
    }

    fn tally(&self) -> MutexGuard<'_, Tally> {
        self.inner.tally.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<Timer>> {
        self.inner.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use devsync_core::config;
    use devsync_exec::test_support::{RecordingSink, ScriptedRunner};

    use crate::error::VcsError;
    use crate::test_support::ScriptedVcs;

    const YAML: &str = "email: dev@example.com\nrules:\n  \"deploy/*\": [\"echo a\"]\n";

    struct Harness {
        scheduler: Scheduler,
        vcs: Arc<ScriptedVcs>,
        runner: Arc<ScriptedRunner>,
    }

    fn harness_with(
        vcs: Arc<dyn VersionControlClient>,
        config: Arc<dyn ConfigProvider>,
    ) -> (Scheduler, Arc<ScriptedRunner>, Arc<RecordingSink>) {
        let runner = Arc::new(ScriptedRunner::default());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::new(CycleDeps {
            workdir: PathBuf::from("/repo"),
            config,
            vcs,
            runner: runner.clone(),
            sink: sink.clone(),
        });
        (scheduler, runner, sink)
    }

    fn harness(vcs: ScriptedVcs) -> Harness {
        let vcs = Arc::new(vcs);
        let config = Arc::new(config::parse(YAML, Path::new("devsync.yaml")).expect("config"));
        let (scheduler, runner, _sink) = harness_with(vcs.clone(), config);
        Harness {
            scheduler,
            vcs,
            runner,
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn not_behind_tick_pulls_nothing_and_releases_busy() {
        let h = harness(ScriptedVcs::up_to_date());
        let result = h.scheduler.tick().await;
        assert_eq!(result, TickResult::Completed(CycleOutcome::UpToDate));
        assert_eq!(h.vcs.pulls(), 0);
        assert!(h.runner.invocations().is_empty());
        assert!(!h.scheduler.is_busy());
        assert_eq!(h.scheduler.status().cycles, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ticks_while_busy_are_dropped_not_queued() {
        let (vcs, gate) = ScriptedVcs::behind("dev@example.com", &["deploy/x"]).gated();
        let h = harness(vcs);

        let first = {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.tick().await })
        };
        let gate = Arc::new(gate);
        let entered = {
            let gate = gate.clone();
            tokio::task::spawn_blocking(move || gate.wait_entered(Duration::from_secs(5)))
                .await
                .expect("join")
        };
        assert!(entered, "first cycle should reach pull");
        assert!(h.scheduler.is_busy());

        assert_eq!(h.scheduler.tick().await, TickResult::Dropped);
        assert_eq!(h.scheduler.tick().await, TickResult::Dropped);

        gate.release();
        let result = first.await.expect("join");
        assert!(matches!(result, TickResult::Completed(CycleOutcome::Triggered { .. })));

        assert_eq!(h.vcs.pulls(), 1);
        assert_eq!(h.runner.invocations(), ["echo a"]);
        assert_eq!(h.scheduler.status().dropped_ticks, 2);
        assert!(!h.scheduler.is_busy());
    }

    #[tokio::test]
    async fn failed_cycle_releases_busy_and_scheduler_keeps_ticking() {
        let h = harness(ScriptedVcs::behind("dev@example.com", &["deploy/x"]).failing_pull());
        for _ in 0..2 {
            let result = h.scheduler.tick().await;
            assert!(matches!(result, TickResult::Completed(CycleOutcome::Failed { .. })));
            assert!(!h.scheduler.is_busy());
        }
        assert_eq!(h.vcs.pulls(), 2);
        assert!(h.runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_ends_ticking() {
        let h = harness(ScriptedVcs::up_to_date());
        let (tx, rx) = mpsc::channel(4);

        assert!(h.scheduler.start_with_ticker(rx));
        assert!(!h.scheduler.start(), "second start must not add a timer");
        assert!(h.scheduler.is_polling());

        tx.send(()).await.expect("tick");
        wait_for(|| h.scheduler.status().cycles == 1).await;

        assert!(h.scheduler.stop().await);
        assert!(!h.scheduler.stop().await, "stop twice is a no-op");
        assert!(!h.scheduler.is_polling());

        assert!(tx.send(()).await.is_err(), "timer loop is gone");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.vcs.status_checks(), 1);
    }

    #[tokio::test]
    async fn no_timer_cycle_starts_after_stop_returns() {
        for yields in 0..6 {
            let h = harness(ScriptedVcs::up_to_date());
            let (tx, rx) = mpsc::channel(1);
            assert!(h.scheduler.start_with_ticker(rx));

            tx.send(()).await.expect("tick");
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            h.scheduler.stop().await;
            let in_flight = h.scheduler.is_busy();
            let checks_at_stop = h.vcs.status_checks();

            tokio::time::sleep(Duration::from_millis(200)).await;
            if in_flight {
                assert_eq!(h.vcs.status_checks(), 1);
            } else {
                assert_eq!(
                    h.vcs.status_checks(),
                    checks_at_stop,
                    "a cycle began after stop returned (yields = {yields})"
                );
            }
        }
    }

    #[tokio::test]
    async fn polling_can_restart_after_stop() {
        let h = harness(ScriptedVcs::up_to_date());
        let (_tx, rx) = mpsc::channel(1);
        assert!(h.scheduler.start_with_ticker(rx));
        assert!(h.scheduler.stop().await);

        let (tx, rx) = mpsc::channel(1);
        assert!(h.scheduler.start_with_ticker(rx));
        tx.send(()).await.expect("tick");
        wait_for(|| h.scheduler.status().cycles == 1).await;
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timer_reads_interval_from_config() {
        let yaml = format!("{YAML}interval: 2\n");
        let config = Arc::new(config::parse(&yaml, Path::new("devsync.yaml")).expect("config"));
        let (scheduler, _runner, _sink) =
            harness_with(Arc::new(ScriptedVcs::up_to_date()), config);
        assert_eq!(scheduler.status().interval_secs, DEFAULT_INTERVAL_SECS);

        assert!(scheduler.start());
        wait_for(|| scheduler.status().cycles >= 1).await;
        assert_eq!(scheduler.status().interval_secs, 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn config_is_reloaded_every_cycle() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("devsync.yaml");
        let vcs = Arc::new(ScriptedVcs::behind("dev@example.com", &["deploy/x"]));
        let (scheduler, runner, _sink) =
            harness_with(vcs.clone(), Arc::new(devsync_core::FileConfig::new(&path)));

        let first = scheduler.tick().await;
        assert!(matches!(first, TickResult::Completed(CycleOutcome::Failed { .. })));
        assert_eq!(vcs.pulls(), 0);

        std::fs::write(&path, YAML).expect("write config");
        let second = scheduler.tick().await;
        assert!(matches!(second, TickResult::Completed(CycleOutcome::Triggered { .. })));
        assert_eq!(runner.invocations(), ["echo a"]);
    }

    struct PanickingVcs;

    impl VersionControlClient for PanickingVcs {
        fn current_revision(&self) -> Result<String, VcsError> {
            panic!("corrupted revision state");
        }
        fn is_behind_remote(&self) -> Result<bool, VcsError> {
            Ok(false)
        }
        fn pull(&self) -> Result<(), VcsError> {
            Ok(())
        }
        fn diff_names(&self, _: &str, _: &str) -> Result<Vec<String>, VcsError> {
            Ok(Vec::new())
        }
        fn commit_author(&self, _: &str) -> Result<String, VcsError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn panicking_cycle_stops_polling_and_notifies() {
        let config = Arc::new(config::parse(YAML, Path::new("devsync.yaml")).expect("config"));
        let (scheduler, _runner, sink) = harness_with(Arc::new(PanickingVcs), config);
        let (_tx, rx) = mpsc::channel(1);
        assert!(scheduler.start_with_ticker(rx));

        assert_eq!(scheduler.tick().await, TickResult::Panicked);
        assert!(!scheduler.is_polling());
        assert!(!scheduler.is_busy());
        assert!(sink.infos().iter().any(|m| m.contains("crashed")));
    }
}

//! Lifecycle of rotation runs for an embedding application.
//!
//! A [`RotationRunHandle`] owns one scheduler task together with everything
//! needed to observe and stop it. [`Supervisor`] allows at most one run at a
//! time and handles manual one-off texts, which force the running scheduler
//! to resynchronize.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::classify::{classify, Classification};
use crate::client::{broadcast_text, DeviceApi, DisplayReading};
use crate::config::{validate_text, Device, RotationConfig};
use crate::events::{EventSink, Phase, RotationEvent};
use crate::scheduler::{check_devices, Scheduler};
use crate::{Error, MANUAL_TEXT_INTERVAL, RECENT_EVENTS};

/// What the collector task has seen of a run.
#[derive(Debug, Default)]
struct RunLog {
    recent: VecDeque<RotationEvent>,
    sync_ready: bool,
    cycles_completed: u64,
    error: Option<String>,
}

impl RunLog {
    fn record(&mut self, event: RotationEvent) {
        match event.phase {
            Phase::FirstRefreshDetected => self.sync_ready = true,
            Phase::Resyncing => self.sync_ready = false,
            Phase::Fatal => self.error = Some(event.message.clone()),
            _ => {}
        }
        self.cycles_completed = event.cycle;

        if self.recent.len() == RECENT_EVENTS {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot of a run for status pages.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    /// Whether the scheduler task is still running
    pub active: bool,
    /// Whether the first native refresh has been seen since the last sync
    pub sync_ready: bool,
    /// Phase of the latest event
    pub phase: Option<Phase>,
    /// Message of the latest event
    pub message: String,
    /// Time since the latest event
    pub phase_elapsed: Duration,
    /// How long the current phase is expected to last
    pub expected: Option<Duration>,
    /// Cycles finished since the last sync
    pub cycles_completed: u64,
    /// When the run was started
    pub started_at: DateTime<Utc>,
    /// Why the run ended, if it failed
    pub error: Option<String>,
}

/// An active (or finished) rotation run.
///
/// Dropping the handle aborts the run.
#[derive(Debug)]
pub struct RotationRunHandle {
    task: JoinHandle<()>,
    collector: JoinHandle<()>,
    keep_running: Arc<AtomicBool>,
    resync: Arc<Notify>,
    events: EventSink,
    log: Arc<Mutex<RunLog>>,
    active: watch::Receiver<Vec<Device>>,
    config: RotationConfig,
    started_at: DateTime<Utc>,
}

impl RotationRunHandle {
    /// Spawn a scheduler for `config` on the current tokio runtime.
    pub fn start<A>(config: RotationConfig, api: A) -> Result<Self, Error>
    where
        A: DeviceApi + 'static,
    {
        let events = EventSink::default();
        let keep_running = Arc::new(AtomicBool::new(true));
        let resync = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(RunLog::default()));

        let mut scheduler = Scheduler::new(config.clone(), api)?
            .with_events(events.clone())
            .with_resync_signal(resync.clone());
        let active = scheduler.watch_active();

        tracing::info!("Starting BlockClock Custom Text Rotation");
        config.log_summary();

        let collector = tokio::spawn(collect(events.subscribe(), log.clone()));

        let flag = keep_running.clone();
        let task_log = log.clone();
        let task = tokio::spawn(async move {
            let result = scheduler
                .run(move || flag.load(Ordering::SeqCst))
                .await;
            match result {
                Ok(report) => tracing::info!(
                    "Rotation finished after {} cycle(s)",
                    report.cycles_completed
                ),
                Err(e) => {
                    tracing::error!("Rotation stopped: {}", e);
                    lock(&task_log).error.get_or_insert_with(|| e.to_string());
                }
            }
        });

        Ok(Self {
            task,
            collector,
            keep_running,
            resync,
            events,
            log,
            active,
            config,
            started_at: Utc::now(),
        })
    }

    /// Whether the scheduler task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Whether the run ended, either stopped or fatal.
    pub fn finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Whether the run is currently in sync with the device.
    pub fn sync_ready(&self) -> bool {
        lock(&self.log).sync_ready
    }

    /// Ask the scheduler to drop its run state and synchronize again.
    pub fn request_resync(&self) {
        self.resync.notify_one();
    }

    /// Subscribe to events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.events.subscribe()
    }

    /// Most recent events, oldest first.
    pub fn recent_events(&self) -> Vec<RotationEvent> {
        lock(&self.log).recent.iter().cloned().collect()
    }

    /// Latest event, if any.
    pub fn latest_event(&self) -> Option<RotationEvent> {
        lock(&self.log).recent.back().cloned()
    }

    /// Why the run failed, if it did.
    pub fn error(&self) -> Option<String> {
        lock(&self.log).error.clone()
    }

    /// Device driving the run's timing.
    ///
    /// Until the first liveness check finishes this is the first configured
    /// device.
    pub fn primary_device(&self) -> Option<Device> {
        self.active
            .borrow()
            .first()
            .cloned()
            .or_else(|| self.config.devices.first().cloned())
    }

    /// Configuration snapshot the run uses.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Status snapshot.
    pub fn status(&self) -> RunStatus {
        let log = lock(&self.log);
        let latest = log.recent.back();
        let phase_elapsed = latest
            .and_then(|e| (Utc::now() - e.timestamp).to_std().ok())
            .unwrap_or_default();

        RunStatus {
            active: self.is_active(),
            sync_ready: log.sync_ready,
            phase: latest.map(|e| e.phase),
            message: latest.map(|e| e.message.clone()).unwrap_or_default(),
            phase_elapsed,
            expected: latest.and_then(|e| e.phase.expected_wait(self.config.refresh_period())),
            cycles_completed: log.cycles_completed,
            started_at: self.started_at,
            error: log.error.clone(),
        }
    }

    /// Stop the run. The scheduler task is aborted at its next await point.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.events.emit(RotationEvent::new(
            Phase::Stopped,
            lock(&self.log).cycles_completed,
            "Text rotation stopped",
        ));
        // Drop aborts both tasks.
    }
}

impl Drop for RotationRunHandle {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.task.abort();
        self.collector.abort();
    }
}

async fn collect(mut rx: broadcast::Receiver<RotationEvent>, log: Arc<Mutex<RunLog>>) {
    loop {
        match rx.recv().await {
            Ok(event) => lock(&log).record(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!("Event log skipped {} events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ManualSlot {
    previous: Option<Instant>,
    claimed: Instant,
}

fn remaining_wait(last: Option<Instant>) -> Option<Duration> {
    let elapsed = last?.elapsed();
    (elapsed < MANUAL_TEXT_INTERVAL).then(|| MANUAL_TEXT_INTERVAL - elapsed)
}

/// Owns at most one rotation run and the manual-text rate limit.
#[derive(Debug)]
pub struct Supervisor<A> {
    api: A,
    run: Mutex<Option<RotationRunHandle>>,
    last_manual_text: Mutex<Option<Instant>>,
}

impl<A> Supervisor<A>
where
    A: DeviceApi + Clone + 'static,
{
    /// Create a supervisor using `api` for every run.
    pub fn new(api: A) -> Self {
        Self {
            api,
            run: Mutex::new(None),
            last_manual_text: Mutex::new(None),
        }
    }

    /// Device API shared by all runs.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Start a run. Fails with [`Error::AlreadyRunning`] if one is active.
    pub fn start(&self, config: RotationConfig) -> Result<(), Error> {
        let mut run = lock(&self.run);
        if run.as_ref().is_some_and(RotationRunHandle::is_active) {
            return Err(Error::AlreadyRunning);
        }
        *run = Some(RotationRunHandle::start(config, self.api.clone())?);
        Ok(())
    }

    /// Stop the active run. Fails with [`Error::NotRunning`] if there is none.
    pub fn stop(&self) -> Result<(), Error> {
        let handle = lock(&self.run).take().ok_or(Error::NotRunning)?;
        let was_active = handle.is_active();
        handle.stop();
        if was_active {
            tracing::info!("Text rotation stopped");
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    /// Whether a run is active.
    pub fn is_active(&self) -> bool {
        lock(&self.run)
            .as_ref()
            .is_some_and(RotationRunHandle::is_active)
    }

    /// Run `f` against the current run handle, finished or not.
    pub fn with_run<R>(&self, f: impl FnOnce(&RotationRunHandle) -> R) -> Option<R> {
        lock(&self.run).as_ref().map(f)
    }

    /// Time left before another manual text is accepted.
    pub fn manual_text_wait(&self) -> Option<Duration> {
        remaining_wait(*lock(&self.last_manual_text))
    }

    /// Take the manual-text slot, or report how long until it frees up.
    ///
    /// The slot is taken before any device is contacted so concurrent
    /// callers cannot both pass the rate limit.
    fn claim_manual_slot(&self) -> Result<ManualSlot, Error> {
        let mut last = lock(&self.last_manual_text);
        if let Some(wait) = remaining_wait(*last) {
            return Err(Error::RateLimited {
                retry_after_secs: wait.as_secs_f64().ceil() as u64,
            });
        }
        let claimed = Instant::now();
        let previous = last.replace(claimed);
        Ok(ManualSlot { previous, claimed })
    }

    fn release_manual_slot(&self, slot: ManualSlot) {
        let mut last = lock(&self.last_manual_text);
        if *last == Some(slot.claimed) {
            *last = slot.previous;
        }
    }

    /// Push a one-off text to every configured device, then resynchronize
    /// the running rotation. Returns how many devices accepted the text.
    ///
    /// Fails with [`Error::NoReachableDevices`] when no device answers a ping;
    /// that failure does not count against the rate limit.
    pub async fn send_manual_text(&self, text: &str) -> Result<usize, Error> {
        let devices = self
            .with_run(|run| run.is_active().then(|| run.config().devices.clone()))
            .flatten()
            .ok_or(Error::NotRunning)?;
        validate_text(text)?;
        let slot = self.claim_manual_slot()?;

        tracing::info!("Manual one-time text requested: \"{}\"", text);
        let reachable = check_devices(&self.api, &devices, &EventSink::default(), 0).await;
        if reachable.is_empty() {
            self.release_manual_slot(slot);
            return Err(Error::NoReachableDevices);
        }

        let accepted = broadcast_text(&self.api, &devices, text).await;

        tracing::info!("Restarting rotation after manual text to maintain synchronization");
        self.with_run(RotationRunHandle::request_resync);
        Ok(accepted)
    }

    /// Classified display of the run's primary device, if a run is active.
    pub async fn current_display(&self) -> Option<Result<Classification, Error>> {
        let device = self
            .with_run(|run| run.is_active().then(|| run.primary_device()).flatten())
            .flatten()?;

        Some(match self.api.get_display(&device).await {
            DisplayReading::Text(text) => Ok(classify(&text)),
            DisplayReading::Error => Err(Error::Request(format!(
                "could not read display from {}",
                device.name
            ))),
        })
    }
}

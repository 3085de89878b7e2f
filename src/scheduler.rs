//! The rotation loop.
//!
//! A run goes through these states:
//!
//! ```text
//! Init ──► AwaitFirstSync ──► Injected ──► AwaitRefresh (× displays_between_text)
//!   │                            ▲                │
//!   ▼                            │                ▼
//! Fatal                    CycleComplete ◄── final refresh
//! ```
//!
//! `Init` pings every configured device and keeps the reachable ones. The
//! first native refresh is awaited so the device's phase is known; custom
//! text then goes out a few seconds after each refresh boundary, and the
//! scheduler waits out `displays_between_text` native refreshes plus one
//! final refresh before the next text. Every five cycles the active devices
//! are checked again. Losing all of them ends the run with
//! [`Error::NoReachableDevices`].

use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::classify::classify;
use crate::client::{broadcast_text, DeviceApi, DisplayReading};
use crate::config::{Device, RotationConfig};
use crate::detector::{RefreshDetector, RefreshOutcome};
use crate::events::{format_mm_ss, EventSink, Phase, RotationEvent};
use crate::{Error, COUNTDOWN_MARGIN, COUNTDOWN_SEGMENTS, DEVICE_RECHECK_CYCLES, SETTLE_DELAY};

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Checking which devices are reachable
    Init,
    /// Waiting for the first native refresh
    AwaitFirstSync,
    /// Custom text is on the devices
    Injected,
    /// Waiting for a native refresh
    AwaitRefresh,
    /// All refreshes of a cycle seen
    CycleComplete,
    /// Stopped by the continuation predicate
    Stopped,
    /// No device reachable
    Fatal,
}

/// State of one continuous run. Discarded on resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Devices that passed the last liveness check; the first drives timing
    pub active: Vec<Device>,
    /// Last display read from the primary device
    pub baseline: DisplayReading,
    /// Text injected most recently
    pub last_text: Option<String>,
    /// Full cycles finished since the last sync
    pub cycles_completed: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            baseline: DisplayReading::Error,
            last_text: None,
            cycles_completed: 0,
        }
    }
}

/// Summary of a run that stopped cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Cycles finished since the last sync
    pub cycles_completed: u64,
}

/// Ping `devices` and return the reachable ones, in order.
pub async fn check_devices<A: DeviceApi>(
    api: &A,
    devices: &[Device],
    events: &EventSink,
    cycle: u64,
) -> Vec<Device> {
    let mut reachable = Vec::with_capacity(devices.len());
    let mut unreachable = Vec::new();

    for device in devices {
        tracing::info!("Checking connection to {} at {}...", device.name, device.address);
        if api.ping(device).await {
            tracing::info!("{} is reachable", device.name);
            reachable.push(device.clone());
        } else {
            tracing::warn!("{} is not reachable at {}", device.name, device.address);
            unreachable.push(device.name.as_str());
        }
    }

    if !reachable.is_empty() && !unreachable.is_empty() {
        let names: Vec<&str> = reachable.iter().map(|d| d.name.as_str()).collect();
        events.emit(RotationEvent::new(
            Phase::CheckingDevices,
            cycle,
            format!(
                "{} not reachable, continuing with: {}",
                unreachable.join(", "),
                names.join(", ")
            ),
        ));
    }
    reachable
}

/// Drives text rotation over a set of devices.
///
/// # Example
///
/// ```rust,no_run
/// use blockclock_rotate::{HttpDeviceClient, RotationConfig, Scheduler};
///
/// # async fn example() -> Result<(), blockclock_rotate::Error> {
/// let config = RotationConfig::load("config/blockclock.yaml")?;
/// let mut scheduler = Scheduler::new(config, HttpDeviceClient::new())?;
///
/// // Runs until every device disappears.
/// scheduler.run(|| true).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Scheduler<A> {
    config: RotationConfig,
    api: A,
    events: EventSink,
    resync: Option<Arc<Notify>>,
    settle_delay: Duration,
    state: SchedulerState,
    run: RunState,
    active_tx: watch::Sender<Vec<Device>>,
    synced_once: bool,
}

impl<A: DeviceApi> Scheduler<A> {
    /// Create a scheduler. The configuration is validated first.
    pub fn new(config: RotationConfig, api: A) -> Result<Self, Error> {
        config.validate()?;
        let (active_tx, _) = watch::channel(Vec::new());
        Ok(Self {
            config,
            api,
            events: EventSink::default(),
            resync: None,
            settle_delay: SETTLE_DELAY,
            state: SchedulerState::Init,
            run: RunState::default(),
            active_tx,
            synced_once: false,
        })
    }

    /// Publish events on `events` instead of a private sink.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Resynchronize whenever `signal` is notified during [`Scheduler::run`].
    #[must_use]
    pub fn with_resync_signal(mut self, signal: Arc<Notify>) -> Self {
        self.resync = Some(signal);
        self
    }

    /// Event sink of this scheduler.
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Current run state.
    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Follow the active device set. The first entry drives timing.
    pub fn watch_active(&self) -> watch::Receiver<Vec<Device>> {
        self.active_tx.subscribe()
    }

    /// Device API used for reads and sends.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Configuration snapshot this scheduler runs with.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Rotate until `should_continue` returns false or every device is lost.
    ///
    /// The predicate is consulted once per cycle boundary.
    pub async fn run<F>(&mut self, mut should_continue: F) -> Result<RunReport, Error>
    where
        F: FnMut() -> bool,
    {
        let signal = self.resync.clone();
        let mut needs_sync = true;

        loop {
            if !should_continue() {
                self.state = SchedulerState::Stopped;
                self.emit(Phase::Stopped, "Text rotation stopped".to_string());
                return Ok(RunReport {
                    cycles_completed: self.run.cycles_completed,
                });
            }

            let resyncing = needs_sync;
            needs_sync = false;
            let step = self.advance(resyncing);
            match signal.as_deref() {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        result = step => result?,
                        () = signal.notified() => needs_sync = true,
                    }
                }
                None => step.await?,
            }
        }
    }

    async fn advance(&mut self, resync: bool) -> Result<(), Error> {
        if resync {
            self.reset_and_resync().await
        } else {
            self.run_cycle().await
        }
    }

    /// Discard the run state, check devices, wait for the first native
    /// refresh and inject a fresh text.
    pub async fn reset_and_resync(&mut self) -> Result<(), Error> {
        if self.synced_once {
            self.emit(
                Phase::Resyncing,
                "Restarting rotation - resynchronizing with device".to_string(),
            );
        }
        self.synced_once = true;
        self.state = SchedulerState::Init;
        self.run = RunState::default();

        self.emit(
            Phase::CheckingDevices,
            format!("Checking {} configured device(s)", self.config.devices.len()),
        );
        let active = check_devices(&self.api, &self.config.devices, &self.events, 0).await;
        self.set_active(active)?;

        self.state = SchedulerState::AwaitFirstSync;
        self.run.baseline = self.read_primary().await;
        self.emit(
            Phase::AwaitingFirstSync,
            format!(
                "Waiting for first refresh to synchronize... Current Display: \"{}\"",
                label(&self.run.baseline)
            ),
        );

        let outcome = self.wait_for_refresh(None).await;
        if let RefreshOutcome::Changed { elapsed, .. } = outcome {
            self.emit_with_elapsed(
                Phase::FirstRefreshDetected,
                format!(
                    "First refresh detected after {} seconds - Current Display: \"{}\"",
                    elapsed.as_secs(),
                    label(&self.run.baseline)
                ),
                elapsed,
            );
        }

        self.settle().await;
        self.inject().await
    }

    /// One full cycle: native refreshes, final refresh, new text.
    pub async fn run_cycle(&mut self) -> Result<(), Error> {
        let completed = self.run.cycles_completed;
        if completed > 0 && completed % DEVICE_RECHECK_CYCLES == 0 {
            self.emit(
                Phase::CheckingDevices,
                format!(
                    "Performing periodic device check (every {} cycles)",
                    DEVICE_RECHECK_CYCLES
                ),
            );
            let active = check_devices(&self.api, &self.run.active, &self.events, completed).await;
            self.set_active(active)?;
        }

        let total = self.config.displays_between_text;
        for i in 1..=total {
            self.countdown(format!("Sleeping before refresh #{} of {}...", i, total))
                .await;
            self.state = SchedulerState::AwaitRefresh;
            self.emit(
                Phase::AwaitingRefresh,
                format!("Actively monitoring for refresh #{}", i),
            );
            let ignore = self.run.last_text.clone();
            self.wait_for_refresh(ignore.as_deref()).await;
            self.emit(
                Phase::RefreshDetected,
                format!(
                    "BlockClock refresh {}/{} - Displaying: \"{}\"",
                    i,
                    total,
                    label(&self.run.baseline)
                ),
            );
        }

        self.countdown("Sleeping before final refresh check...".to_string())
            .await;
        self.state = SchedulerState::AwaitRefresh;
        self.emit(
            Phase::AwaitingRefresh,
            "Actively monitoring for final refresh".to_string(),
        );
        let ignore = self.run.last_text.clone();
        self.wait_for_refresh(ignore.as_deref()).await;
        self.emit(
            Phase::FinalRefreshDetected,
            format!(
                "Final refresh complete - Displaying: \"{}\"",
                label(&self.run.baseline)
            ),
        );

        self.settle().await;
        self.state = SchedulerState::CycleComplete;
        self.run.cycles_completed += 1;
        self.emit(Phase::CycleComplete, "Full cycle complete!".to_string());
        self.inject().await
    }

    fn set_active(&mut self, active: Vec<Device>) -> Result<(), Error> {
        self.active_tx.send_replace(active.clone());
        if active.is_empty() {
            self.run.active.clear();
            self.state = SchedulerState::Fatal;
            self.emit(
                Phase::Fatal,
                "No devices are reachable. Please check network settings.".to_string(),
            );
            return Err(Error::NoReachableDevices);
        }
        self.run.active = active;
        Ok(())
    }

    fn primary(&self) -> Result<&Device, Error> {
        self.run.active.first().ok_or(Error::NoReachableDevices)
    }

    async fn read_primary(&self) -> DisplayReading {
        match self.primary() {
            Ok(device) => self.api.get_display(device).await,
            Err(_) => DisplayReading::Error,
        }
    }

    /// Wait for a native refresh of the primary device and make the new
    /// display the baseline. On timeout the display is simply read again.
    async fn wait_for_refresh(&mut self, ignore: Option<&str>) -> RefreshOutcome {
        let outcome = match self.primary() {
            Ok(device) => {
                RefreshDetector::new(&self.api, device, &self.events)
                    .with_cycle(self.run.cycles_completed)
                    .wait_for_change(&self.run.baseline, ignore, self.config.refresh_timeout())
                    .await
            }
            Err(_) => RefreshOutcome::TimedOut {
                elapsed: Duration::ZERO,
            },
        };

        self.run.baseline = match outcome.display() {
            Some(display) => DisplayReading::Text(display.to_string()),
            None => self.read_primary().await,
        };
        outcome
    }

    fn pick_text(&self) -> Result<String, Error> {
        self.config
            .texts
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| Error::Config("no text options configured".into()))
    }

    /// Send a random text to every active device.
    async fn inject(&mut self) -> Result<(), Error> {
        let text = self.pick_text()?;
        tracing::info!("Sending new Custom Text: \"{}\"", text);

        let accepted = broadcast_text(&self.api, &self.run.active, &text).await;
        self.state = SchedulerState::Injected;
        self.run.last_text = Some(text.clone());
        self.emit(
            Phase::TextSent,
            format!(
                "Custom Text \"{}\" sent to {}/{} device(s)",
                text,
                accepted,
                self.run.active.len()
            ),
        );

        self.run.baseline = self.read_primary().await;
        tracing::info!(
            "Current display after sending custom text: \"{}\"",
            label(&self.run.baseline)
        );
        Ok(())
    }

    async fn settle(&self) {
        self.emit(
            Phase::Settling,
            format!(
                "Waiting {} seconds for animation to complete...",
                self.settle_delay.as_secs()
            ),
        );
        tokio::time::sleep(self.settle_delay).await;
    }

    /// Sleep most of a refresh period, reporting progress in segments.
    async fn countdown(&self, message: String) {
        let total = self
            .config
            .refresh_period()
            .saturating_sub(COUNTDOWN_MARGIN);
        self.emit_with_elapsed(Phase::Sleeping, message, Duration::ZERO);
        if total.is_zero() {
            return;
        }

        tracing::info!("Countdown started: sleep time: {}", format_mm_ss(total));
        let start = Instant::now();
        let end = start + total;
        let segment = total / COUNTDOWN_SEGMENTS;

        for i in 1..COUNTDOWN_SEGMENTS {
            tokio::time::sleep_until(start + segment * i).await;
            let percent = i * 100 / COUNTDOWN_SEGMENTS;
            let bar: String = (0..COUNTDOWN_SEGMENTS)
                .map(|n| if n < i { '▮' } else { '▯' })
                .collect();
            tracing::info!(
                "Countdown progress: [{}] {}% ({} remaining)",
                bar,
                percent,
                format_mm_ss(end.saturating_duration_since(Instant::now()))
            );
        }
        tokio::time::sleep_until(end).await;
        tracing::info!("Countdown completed after {}", format_mm_ss(start.elapsed()));
    }

    fn emit(&self, phase: Phase, message: String) {
        self.events
            .emit(RotationEvent::new(phase, self.run.cycles_completed, message));
    }

    fn emit_with_elapsed(&self, phase: Phase, message: String, elapsed: Duration) {
        self.events.emit(
            RotationEvent::new(phase, self.run.cycles_completed, message).with_elapsed(elapsed),
        );
    }
}

fn label(reading: &DisplayReading) -> String {
    match reading {
        DisplayReading::Text(text) => classify(text).label,
        DisplayReading::Error => "ERROR".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedDevice, SimulatedClock};
    use tokio::sync::broadcast;

    const PERIOD: Duration = Duration::from_secs(300);

    fn config(devices: &[&str]) -> RotationConfig {
        RotationConfig {
            refresh_period_secs: 300,
            displays_between_text: 3,
            texts: vec!["_HODL_".into(), "SATOSHI".into(), "WENMOON".into()],
            devices: devices
                .iter()
                .enumerate()
                .map(|(i, addr)| Device::new(format!("Clock {}", i + 1), *addr))
                .collect(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<RotationEvent>) -> Vec<RotationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Predicate that allows `n` boundary checks.
    fn allow(n: usize) -> impl FnMut() -> bool {
        let mut calls = 0;
        move || {
            calls += 1;
            calls <= n
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = config(&["10.0.0.1"]);
        bad.displays_between_text = 0;
        assert!(Scheduler::new(bad, ScriptedDevice::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_keeps_reachable_devices() {
        let clock = SimulatedClock::new(PERIOD, Duration::from_secs(100)).unreachable("10.0.0.2");
        let mut scheduler =
            Scheduler::new(config(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]), clock).unwrap();

        scheduler.reset_and_resync().await.unwrap();

        let active: Vec<&str> = scheduler
            .run_state()
            .active
            .iter()
            .map(|d| d.address.as_str())
            .collect();
        assert_eq!(active, vec!["10.0.0.1", "10.0.0.3"]);
        assert_eq!(scheduler.state(), SchedulerState::Injected);

        let watched = scheduler.watch_active();
        assert_eq!(watched.borrow().len(), 2);
        assert_eq!(watched.borrow()[0].address, "10.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reachable_devices_is_fatal() {
        let clock = SimulatedClock::new(PERIOD, Duration::ZERO)
            .unreachable("10.0.0.1")
            .unreachable("10.0.0.2");
        let mut scheduler = Scheduler::new(config(&["10.0.0.1", "10.0.0.2"]), clock).unwrap();
        let mut rx = scheduler.events().subscribe();

        let err = scheduler.run(|| true).await.unwrap_err();

        assert!(matches!(err, Error::NoReachableDevices));
        assert_eq!(scheduler.state(), SchedulerState::Fatal);
        assert!(scheduler.run_state().active.is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.last().map(|e| e.phase), Some(Phase::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_device_list_is_fatal() {
        let mut scheduler = Scheduler::new(config(&[]), ScriptedDevice::new()).unwrap();
        let err = scheduler.reset_and_resync().await.unwrap_err();
        assert!(matches!(err, Error::NoReachableDevices));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle() {
        let started = Instant::now();
        let clock = Arc::new(SimulatedClock::new(PERIOD, Duration::from_secs(100)));
        let mut scheduler =
            Scheduler::new(config(&["10.0.0.1", "10.0.0.2"]), clock.clone()).unwrap();
        let mut rx = scheduler.events().subscribe();

        // Boundary checks: before first sync, before cycle 1, then stop.
        let report = scheduler.run(allow(2)).await.unwrap();
        assert_eq!(report.cycles_completed, 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // First native refresh at t=200s, text lands after the 6s settle.
        let sent = clock.sent();
        assert_eq!(sent[0].2 - started, Duration::from_secs(206));
        assert_eq!(sent[1].2 - started, Duration::from_secs(206));

        // One send per device per injection, two injections.
        assert_eq!(clock.texts_sent_to("10.0.0.1").len(), 2);
        assert_eq!(clock.texts_sent_to("10.0.0.2").len(), 2);

        let events = drain(&mut rx);
        let phases: Vec<Phase> = events.iter().map(|e| e.phase).collect();

        let first_wait = phases
            .iter()
            .position(|p| *p == Phase::AwaitingRefresh)
            .unwrap();
        let sends_before: usize = phases[..first_wait]
            .iter()
            .filter(|p| **p == Phase::TextSent)
            .count();
        assert_eq!(sends_before, 1);
        assert!(phases[..first_wait].contains(&Phase::FirstRefreshDetected));

        let refreshes = phases
            .iter()
            .filter(|p| **p == Phase::RefreshDetected)
            .count();
        assert_eq!(refreshes, 3);
        assert!(!phases.contains(&Phase::RefreshTimedOut));

        let final_at = phases
            .iter()
            .position(|p| *p == Phase::FinalRefreshDetected)
            .unwrap();
        let complete_at = phases
            .iter()
            .position(|p| *p == Phase::CycleComplete)
            .unwrap();
        assert!(final_at < complete_at);
        assert_eq!(events[complete_at].cycle, 1);
        assert_eq!(phases[complete_at + 1], Phase::TextSent);
        assert_eq!(phases.last(), Some(&Phase::Stopped));

        // Final refresh at t=1400s, second text after settle.
        assert_eq!(sent[2].2 - started, Duration::from_secs(1406));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_text_not_counted_as_refresh() {
        // Device keeps showing whatever was injected: no native refresh ever
        // follows, so every wait must time out rather than match the text.
        let api = ScriptedDevice::new()
            .show_for("$67432", Duration::from_secs(10))
            .then_show("_HODL_");
        let mut cfg = config(&["10.0.0.1"]);
        cfg.texts = vec!["_HODL_".into()];
        let mut scheduler = Scheduler::new(cfg, api).unwrap();
        let mut rx = scheduler.events().subscribe();

        scheduler.reset_and_resync().await.unwrap();
        scheduler.run_cycle().await.unwrap();

        let phases: Vec<Phase> = drain(&mut rx).iter().map(|e| e.phase).collect();
        let timeouts = phases
            .iter()
            .filter(|p| **p == Phase::RefreshTimedOut)
            .count();
        // Three refreshes plus the final one all time out; the scheduler moves on.
        assert_eq!(timeouts, 4);
        assert_eq!(scheduler.run_state().cycles_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sync_timeout_still_injects() {
        // The display never changes, so the first sync can only time out.
        let api = ScriptedDevice::new().then_show("$67432");
        let mut cfg = config(&["10.0.0.1"]);
        cfg.texts = vec!["SATOSHI".into()];
        let mut scheduler = Scheduler::new(cfg, api).unwrap();
        let mut rx = scheduler.events().subscribe();

        let started = Instant::now();
        scheduler.reset_and_resync().await.unwrap();

        // refresh_period + grace, then the settle delay.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(606), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(610), "{:?}", elapsed);
        assert_eq!(scheduler.state(), SchedulerState::Injected);
        assert_eq!(scheduler.run_state().last_text.as_deref(), Some("SATOSHI"));
        assert_eq!(scheduler.api().sent_texts(), vec!["SATOSHI"]);

        let phases: Vec<Phase> = drain(&mut rx).iter().map(|e| e.phase).collect();
        assert!(phases.contains(&Phase::RefreshTimedOut));
        assert!(!phases.contains(&Phase::FirstRefreshDetected));
        let timed_out = phases
            .iter()
            .position(|p| *p == Phase::RefreshTimedOut)
            .unwrap();
        assert_eq!(
            &phases[timed_out + 1..],
            &[Phase::Settling, Phase::TextSent]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_isolated() {
        let clock = Arc::new(
            SimulatedClock::new(PERIOD, Duration::from_secs(250)).rejecting_sends("10.0.0.1"),
        );
        let mut scheduler =
            Scheduler::new(config(&["10.0.0.1", "10.0.0.2"]), clock.clone()).unwrap();

        scheduler.reset_and_resync().await.unwrap();

        assert!(clock.texts_sent_to("10.0.0.1").is_empty());
        assert_eq!(clock.texts_sent_to("10.0.0.2").len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Injected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_recheck_drops_to_fatal() {
        let clock = Arc::new(SimulatedClock::new(PERIOD, Duration::from_secs(250)));
        let mut scheduler =
            Scheduler::new(config(&["10.0.0.1", "10.0.0.2"]), clock.clone()).unwrap();

        scheduler.reset_and_resync().await.unwrap();
        clock.set_reachable("10.0.0.1", false);
        clock.set_reachable("10.0.0.2", false);

        // Cycles 1-5 run without a device check.
        for _ in 0..5 {
            scheduler.run_cycle().await.unwrap();
        }
        assert_eq!(scheduler.run_state().cycles_completed, 5);

        let err = scheduler.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::NoReachableDevices));
        assert_eq!(scheduler.state(), SchedulerState::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_recheck_drops_unreachable_device() {
        let clock = Arc::new(SimulatedClock::new(PERIOD, Duration::from_secs(250)));
        let mut scheduler =
            Scheduler::new(config(&["10.0.0.1", "10.0.0.2"]), clock.clone()).unwrap();

        scheduler.reset_and_resync().await.unwrap();
        for _ in 0..5 {
            scheduler.run_cycle().await.unwrap();
        }
        clock.set_reachable("10.0.0.2", false);
        scheduler.run_cycle().await.unwrap();

        assert_eq!(scheduler.run_state().active.len(), 1);
        assert_eq!(scheduler.run_state().cycles_completed, 6);
        assert_eq!(clock.texts_sent_to("10.0.0.2").len(), 6);
        assert_eq!(clock.texts_sent_to("10.0.0.1").len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_resync_clears_run_state() {
        let clock = Arc::new(SimulatedClock::new(PERIOD, Duration::from_secs(250)));
        let mut scheduler = Scheduler::new(config(&["10.0.0.1"]), clock.clone()).unwrap();
        let mut rx = scheduler.events().subscribe();

        scheduler.reset_and_resync().await.unwrap();
        scheduler.run_cycle().await.unwrap();
        assert_eq!(scheduler.run_state().cycles_completed, 1);

        scheduler.reset_and_resync().await.unwrap();
        assert_eq!(scheduler.run_state().cycles_completed, 0);
        assert!(scheduler.run_state().last_text.is_some());
        assert_eq!(clock.texts_sent_to("10.0.0.1").len(), 3);

        let phases: Vec<Phase> = drain(&mut rx).iter().map(|e| e.phase).collect();
        assert_eq!(
            phases.iter().filter(|p| **p == Phase::Resyncing).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_signal_restarts_sync() {
        let clock = Arc::new(SimulatedClock::new(PERIOD, Duration::from_secs(100)));
        let signal = Arc::new(Notify::new());
        let mut scheduler = Scheduler::new(config(&["10.0.0.1"]), clock.clone())
            .unwrap()
            .with_resync_signal(signal.clone());
        let mut rx = scheduler.events().subscribe();

        // Stored permit interrupts the first sync before any text is sent.
        signal.notify_one();
        scheduler.run(allow(2)).await.unwrap();

        assert_eq!(clock.texts_sent_to("10.0.0.1").len(), 1);
        let phases: Vec<Phase> = drain(&mut rx).iter().map(|e| e.phase).collect();
        assert_eq!(
            phases
                .iter()
                .filter(|p| **p == Phase::AwaitingFirstSync)
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_skipped_for_short_periods() {
        let clock = Arc::new(SimulatedClock::new(
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        let mut cfg = config(&["10.0.0.1"]);
        cfg.refresh_period_secs = 30;
        cfg.displays_between_text = 1;
        let mut scheduler = Scheduler::new(cfg, clock.clone()).unwrap();

        let started = Instant::now();
        scheduler.reset_and_resync().await.unwrap();
        scheduler.run_cycle().await.unwrap();

        // Sync at 20s + 6s settle; two refreshes at 30s and 60s later, + 6s settle.
        let sent = clock.sent();
        assert_eq!(sent[0].2 - started, Duration::from_secs(26));
        assert_eq!(sent[1].2 - started, Duration::from_secs(86));
    }
}

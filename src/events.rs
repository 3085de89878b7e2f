//! Typed progress events emitted by the rotation loop.
//!
//! Every phase transition is logged through `tracing` and published as a
//! [`RotationEvent`] on a broadcast channel, so a supervisor can follow the
//! run without parsing log text.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Where the rotation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Liveness check over the configured devices
    CheckingDevices,
    /// Waiting for the first native refresh to learn the device's phase
    AwaitingFirstSync,
    /// First native refresh seen, the run is in sync
    FirstRefreshDetected,
    /// Pausing for the on-device transition animation
    Settling,
    /// Custom text sent to the active devices
    TextSent,
    /// Countdown before polling for the next refresh
    Sleeping,
    /// Polling the device for a native refresh
    AwaitingRefresh,
    /// Still polling, periodic notice
    StillWaiting,
    /// A native refresh between custom texts was seen
    RefreshDetected,
    /// No refresh within the timeout
    RefreshTimedOut,
    /// The last native refresh of the cycle was seen
    FinalRefreshDetected,
    /// A cycle finished and new text is about to be sent
    CycleComplete,
    /// Run state discarded, synchronizing again
    Resyncing,
    /// Continuation predicate returned false
    Stopped,
    /// No device reachable, the run is over
    Fatal,
}

impl Phase {
    /// Expected wait for this phase given the refresh period, for status pages.
    pub fn expected_wait(&self, refresh_period: Duration) -> Option<Duration> {
        match self {
            Phase::Sleeping => Some(refresh_period.saturating_sub(crate::COUNTDOWN_MARGIN)),
            Phase::AwaitingFirstSync | Phase::AwaitingRefresh | Phase::StillWaiting => {
                Some(refresh_period)
            }
            _ => None,
        }
    }
}

/// One observable step of a rotation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationEvent {
    /// Phase entered
    pub phase: Phase,
    /// Completed cycles at the time of the event
    pub cycle: u64,
    /// Elapsed time within the phase, when meaningful
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Option<Duration>,
    /// Human-readable description
    pub message: String,
    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,
}

fn serialize_secs<S: serde::Serializer>(
    elapsed: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match elapsed {
        Some(d) => serializer.serialize_some(&d.as_secs()),
        None => serializer.serialize_none(),
    }
}

impl RotationEvent {
    /// Create an event stamped with the current time.
    pub fn new(phase: Phase, cycle: u64, message: impl Into<String>) -> Self {
        Self {
            phase,
            cycle,
            elapsed: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach an elapsed duration.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Render as a log line, `[2024-05-01 12:00:00] message`.
    pub fn log_line(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

/// Publishes [`RotationEvent`]s and mirrors them into the log.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<RotationEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink {
    /// Create a sink buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.tx.subscribe()
    }

    /// Log and publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: RotationEvent) {
        match event.phase {
            Phase::Fatal => tracing::error!(cycle = event.cycle, "{}", event.message),
            Phase::RefreshTimedOut => tracing::warn!(cycle = event.cycle, "{}", event.message),
            _ => tracing::info!(cycle = event.cycle, "{}", event.message),
        }
        let _ = self.tx.send(event);
    }
}

/// Format a duration as `MM:SS`.
pub fn format_mm_ss(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

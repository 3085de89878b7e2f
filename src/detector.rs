//! Detection of the device's own display refresh.
//!
//! A BlockClock cycles through its built-in screens on a fixed period. The
//! detector polls the display once a second and reports the first reading
//! that differs from the baseline. The text we injected ourselves is passed
//! as `ignore` so it is never mistaken for a native refresh.

use std::time::Duration;

use tokio::time::Instant;

use crate::client::{DeviceApi, DisplayReading};
use crate::config::Device;
use crate::events::{format_mm_ss, EventSink, Phase, RotationEvent};
use crate::POLL_INTERVAL;

/// First progress notice after this long.
const FIRST_NOTICE_AFTER: Duration = Duration::from_secs(10);

/// Stand-in deadline for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Later progress notices this far apart.
const NOTICE_INTERVAL: Duration = Duration::from_secs(30);

const NOTICES: &[&str] = &[
    "Still waiting...",
    "Still waiting...",
    "Hang in there...",
    "Patience is a Virtue...",
    "It will happen, trust me...",
    "Won't be long now...",
];

/// Where a detector is in its current wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Not waiting
    Idle,
    /// Polling the device
    Polling,
    /// A qualifying change was seen
    Changed,
    /// The timeout elapsed first
    TimedOut,
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The display changed to `display` after `elapsed`
    Changed {
        /// New display text
        display: String,
        /// Time from the start of the wait
        elapsed: Duration,
    },
    /// Nothing qualifying was seen within the timeout
    TimedOut {
        /// Time from the start of the wait
        elapsed: Duration,
    },
}

impl RefreshOutcome {
    /// Whether a refresh was observed.
    pub fn changed(&self) -> bool {
        matches!(self, RefreshOutcome::Changed { .. })
    }

    /// The new display, if a refresh was observed.
    pub fn display(&self) -> Option<&str> {
        match self {
            RefreshOutcome::Changed { display, .. } => Some(display),
            RefreshOutcome::TimedOut { .. } => None,
        }
    }
}

/// Whether `current` counts as a native refresh away from `start`.
///
/// Errors, empty readings, the baseline itself and the ignored text never do.
pub fn is_refresh(current: &DisplayReading, start: &DisplayReading, ignore: Option<&str>) -> bool {
    match current {
        DisplayReading::Error => false,
        DisplayReading::Text(text) => {
            !text.is_empty() && current != start && ignore != Some(text.as_str())
        }
    }
}

/// Polls one device until its display refreshes or a timeout passes.
#[derive(Debug)]
pub struct RefreshDetector<'a, A> {
    api: &'a A,
    device: &'a Device,
    events: &'a EventSink,
    cycle: u64,
    poll_interval: Duration,
    state: DetectorState,
}

impl<'a, A: DeviceApi> RefreshDetector<'a, A> {
    /// Create a detector polling `device`.
    pub fn new(api: &'a A, device: &'a Device, events: &'a EventSink) -> Self {
        Self {
            api,
            device,
            events,
            cycle: 0,
            poll_interval: POLL_INTERVAL,
            state: DetectorState::Idle,
        }
    }

    /// Tag emitted events with the scheduler's cycle count.
    #[must_use]
    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    /// Set the time between polls (at most one second is sensible).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Current state.
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Wait for the display to move away from `start` and `ignore`.
    pub async fn wait_for_change(
        &mut self,
        start: &DisplayReading,
        ignore: Option<&str>,
        timeout: Duration,
    ) -> RefreshOutcome {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or(started + FAR_FUTURE);
        let mut next_notice = started + FIRST_NOTICE_AFTER;
        let mut notice = 0;
        self.state = DetectorState::Polling;

        loop {
            let current = self.api.get_display(self.device).await;
            let elapsed = started.elapsed();

            if is_refresh(&current, start, ignore) {
                self.state = DetectorState::Changed;
                tracing::debug!(
                    "Display changed after {} seconds: \"{}\"",
                    elapsed.as_secs(),
                    current
                );
                return RefreshOutcome::Changed {
                    display: current.to_string(),
                    elapsed,
                };
            }

            let now = Instant::now();
            if now >= deadline {
                self.state = DetectorState::TimedOut;
                self.events.emit(
                    RotationEvent::new(
                        Phase::RefreshTimedOut,
                        self.cycle,
                        format!(
                            "Timeout waiting for display change after {} seconds",
                            timeout.as_secs()
                        ),
                    )
                    .with_elapsed(elapsed),
                );
                return RefreshOutcome::TimedOut { elapsed };
            }

            if now >= next_notice {
                self.events.emit(
                    RotationEvent::new(
                        Phase::StillWaiting,
                        self.cycle,
                        format!(
                            "{} (elapsed: {})",
                            NOTICES[notice % NOTICES.len()],
                            format_mm_ss(elapsed)
                        ),
                    )
                    .with_elapsed(elapsed),
                );
                notice += 1;
                next_notice = now + NOTICE_INTERVAL;
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

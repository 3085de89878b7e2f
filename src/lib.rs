//! # blockclock-rotate
//!
//! Rotating custom text for [BlockClock](https://blockclock.com) displays,
//! timed to the clock's own screen cycle.
//!
//! A BlockClock cycles through built-in screens (price, block height,
//! Moscow time) on a fixed period. Text pushed at a random moment gets
//! overwritten almost immediately, so this crate:
//!
//! - polls the display until it sees a native refresh, which fixes the phase
//! - pushes a custom text a few seconds after that boundary
//! - lets a configured number of native screens go by
//! - repeats, re-checking device reachability every few cycles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockclock_rotate::{HttpDeviceClient, RotationConfig, Scheduler};
//!
//! # async fn example() -> Result<(), blockclock_rotate::Error> {
//! let config = RotationConfig::load("config/blockclock.yaml")?;
//! let mut scheduler = Scheduler::new(config, HttpDeviceClient::new())?;
//!
//! let mut events = scheduler.events().subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}: {}", event.phase, event.message);
//!     }
//! });
//!
//! scheduler.run(|| true).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Device API
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/api/status` | GET | Rendered display segments |
//! | `/api/show/text/{text}` | GET | Show custom text (max 7 characters) |
//!
//! Password-protected devices take HTTP Basic auth with an empty user name.
//!
//! ## Feature Flags
//!
//! - `axum` - Web control panel (enabled by default)
//! - `full` - All features

pub mod classify;
pub mod client;
pub mod config;
pub mod detector;
mod error;
pub mod events;
pub mod scheduler;
pub mod supervisor;

#[cfg(test)]
mod testing;

use std::time::Duration;

pub use classify::{classify, Classification, DisplayCategory};
pub use client::{broadcast_text, DeviceApi, DisplayReading, HttpDeviceClient};
pub use config::{Device, RotationConfig};
pub use detector::{DetectorState, RefreshDetector, RefreshOutcome};
pub use error::Error;
pub use events::{EventSink, Phase, RotationEvent};
pub use scheduler::{check_devices, RunReport, RunState, Scheduler, SchedulerState};
pub use supervisor::{RotationRunHandle, RunStatus, Supervisor};

// Control panel
#[cfg(feature = "axum")]
pub mod panel;

/// Timeout for every device request, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Timeout for a liveness check, in seconds
pub const PING_TIMEOUT_SECS: u64 = 2;

/// Time between display polls while waiting for a refresh
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a screen change so the transition animation can finish
pub const SETTLE_DELAY: Duration = Duration::from_secs(6);

/// Added to the refresh period to bound a single refresh wait
pub const REFRESH_TIMEOUT_GRACE: Duration = Duration::from_secs(300);

/// How long before the expected refresh polling starts again
pub const COUNTDOWN_MARGIN: Duration = Duration::from_secs(45);

/// Progress updates per countdown
pub const COUNTDOWN_SEGMENTS: u32 = 10;

/// Completed cycles between device reachability checks
pub const DEVICE_RECHECK_CYCLES: u64 = 5;

/// Longest text a BlockClock can show
pub const MAX_TEXT_LEN: usize = 7;

/// Minimum time between manual texts from the control panel
pub const MANUAL_TEXT_INTERVAL: Duration = Duration::from_secs(70);

/// Events kept for the log view
pub const RECENT_EVENTS: usize = 200;

//! In-memory devices for exercising timing logic under a paused tokio clock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::{DeviceApi, DisplayReading};
use crate::config::Device;

/// Sends, pings and reads seen by a fake device.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    reads: AtomicUsize,
    attempts: Mutex<Vec<(String, String)>>,
    sent: Mutex<Vec<(String, String, Instant)>>,
    unreachable: Mutex<HashSet<String>>,
    rejecting: HashSet<String>,
}

impl Recorder {
    fn record_send(&self, device: &Device, text: &str) -> bool {
        self.attempts
            .lock()
            .unwrap()
            .push((device.address.clone(), text.to_string()));
        if self.rejecting.contains(&device.address) || !self.ping(device) {
            return false;
        }
        self.sent.lock().unwrap().push((
            device.address.clone(),
            text.to_string(),
            Instant::now(),
        ));
        true
    }

    fn ping(&self, device: &Device) -> bool {
        !self.unreachable.lock().unwrap().contains(&device.address)
    }
}

/// Replays a fixed timeline of readings, measured from creation.
#[derive(Debug)]
pub(crate) struct ScriptedDevice {
    created: Instant,
    segments: Vec<(Duration, DisplayReading)>,
    last: DisplayReading,
    recorder: Recorder,
}

impl ScriptedDevice {
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            segments: Vec::new(),
            last: DisplayReading::Error,
            recorder: Recorder::default(),
        }
    }

    fn end(&self) -> Duration {
        self.segments.last().map(|(end, _)| *end).unwrap_or_default()
    }

    pub(crate) fn show_for(mut self, text: &str, duration: Duration) -> Self {
        let end = self.end() + duration;
        self.segments
            .push((end, DisplayReading::Text(text.to_string())));
        self
    }

    pub(crate) fn fail_for(mut self, duration: Duration) -> Self {
        let end = self.end() + duration;
        self.segments.push((end, DisplayReading::Error));
        self
    }

    pub(crate) fn then_show(mut self, text: &str) -> Self {
        self.last = DisplayReading::Text(text.to_string());
        self
    }

    pub(crate) fn display_reads(&self) -> usize {
        self.recorder.reads.load(Ordering::SeqCst)
    }

    /// Texts accepted so far, in order.
    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.recorder
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text, _)| text.clone())
            .collect()
    }
}

impl DeviceApi for ScriptedDevice {
    async fn get_display(&self, _device: &Device) -> DisplayReading {
        self.recorder.reads.fetch_add(1, Ordering::SeqCst);
        let at = self.created.elapsed();
        self.segments
            .iter()
            .find(|(end, _)| at < *end)
            .map(|(_, reading)| reading.clone())
            .unwrap_or_else(|| self.last.clone())
    }

    async fn send_text(&self, device: &Device, text: &str) -> bool {
        self.recorder.record_send(device, text)
    }

    async fn ping(&self, device: &Device) -> bool {
        self.recorder.ping(device)
    }
}

/// A clock cycling through native screens every `period`.
///
/// Injected text stays up until the next native screen change, as on the
/// real hardware. Unreachable addresses fail every request.
#[derive(Debug)]
pub(crate) struct SimulatedClock {
    created: Instant,
    period: Duration,
    offset: Duration,
    screens: Vec<String>,
    injected: Mutex<Option<(String, u64)>>,
    recorder: Recorder,
}

impl SimulatedClock {
    /// `offset` is how far into its current screen the clock is at creation.
    pub(crate) fn new(period: Duration, offset: Duration) -> Self {
        Self {
            created: Instant::now(),
            period,
            offset,
            screens: ["$67432", "840000", "TIME 1483"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            injected: Mutex::new(None),
            recorder: Recorder::default(),
        }
    }

    pub(crate) fn unreachable(self, address: &str) -> Self {
        self.set_reachable(address, false);
        self
    }

    pub(crate) fn rejecting_sends(mut self, address: &str) -> Self {
        self.recorder.rejecting.insert(address.to_string());
        self
    }

    pub(crate) fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self.recorder.unreachable.lock().unwrap();
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }

    fn screen_index(&self) -> u64 {
        let at = self.created.elapsed() + self.offset;
        (at.as_millis() / self.period.as_millis().max(1)) as u64
    }

    /// Every successful send so far: (address, text, when).
    pub(crate) fn sent(&self) -> Vec<(String, String, Instant)> {
        self.recorder.sent.lock().unwrap().clone()
    }

    /// Texts sent to one device, accepted or not.
    pub(crate) fn attempts_to(&self, address: &str) -> Vec<String> {
        self.recorder
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Texts sent to one device, in order.
    pub(crate) fn texts_sent_to(&self, address: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(a, _, _)| a == address)
            .map(|(_, text, _)| text)
            .collect()
    }
}

impl DeviceApi for SimulatedClock {
    async fn get_display(&self, device: &Device) -> DisplayReading {
        self.recorder.reads.fetch_add(1, Ordering::SeqCst);
        if !self.recorder.ping(device) {
            return DisplayReading::Error;
        }
        let index = self.screen_index();
        if let Some((text, at_index)) = self.injected.lock().unwrap().as_ref() {
            if *at_index == index {
                return DisplayReading::Text(text.clone());
            }
        }
        DisplayReading::Text(self.screens[(index % self.screens.len() as u64) as usize].clone())
    }

    async fn send_text(&self, device: &Device, text: &str) -> bool {
        if !self.recorder.record_send(device, text) {
            return false;
        }
        *self.injected.lock().unwrap() = Some((text.to_string(), self.screen_index()));
        true
    }

    async fn ping(&self, device: &Device) -> bool {
        self.recorder.ping(device)
    }
}

/// Wraps an API so every ping and send yields to the scheduler once,
/// letting concurrent callers interleave.
#[derive(Debug, Clone)]
pub(crate) struct Yielding<A>(pub(crate) A);

impl<A: DeviceApi> DeviceApi for Yielding<A> {
    async fn get_display(&self, device: &Device) -> DisplayReading {
        self.0.get_display(device).await
    }

    async fn send_text(&self, device: &Device, text: &str) -> bool {
        tokio::task::yield_now().await;
        self.0.send_text(device, text).await
    }

    async fn ping(&self, device: &Device) -> bool {
        tokio::task::yield_now().await;
        self.0.ping(device).await
    }
}

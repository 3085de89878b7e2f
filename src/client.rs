//! HTTP client for the BlockClock device API.
//!
//! Two endpoints are used:
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /api/status` | Currently rendered segments (`rendered.contents`) |
//! | `GET /api/show/text/{text}` | Show a custom text |
//!
//! Both accept HTTP Basic auth with an empty user name when the device has a
//! password set. Every request carries a timeout; no call blocks forever.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::Device;
use crate::{DEFAULT_TIMEOUT_SECS, PING_TIMEOUT_SECS};

/// What a device reported as its current display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayReading {
    /// Concatenated rendered segments
    Text(String),
    /// Request failed, non-200 status, or unexpected body
    Error,
}

impl DisplayReading {
    /// The displayed text, or `None` on error.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DisplayReading::Text(text) => Some(text),
            DisplayReading::Error => None,
        }
    }

    /// Whether the read failed.
    pub fn is_error(&self) -> bool {
        matches!(self, DisplayReading::Error)
    }
}

impl fmt::Display for DisplayReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayReading::Text(text) => f.write_str(text),
            DisplayReading::Error => f.write_str("ERROR"),
        }
    }
}

/// Operations the rotation needs from a device.
///
/// [`HttpDeviceClient`] talks to real hardware; tests substitute a scripted
/// implementation.
pub trait DeviceApi: Send + Sync {
    /// Read the current display. Failures collapse into [`DisplayReading::Error`].
    fn get_display(&self, device: &Device) -> impl Future<Output = DisplayReading> + Send;

    /// Ask the device to show `text`. Returns whether the device accepted it.
    fn send_text(&self, device: &Device, text: &str) -> impl Future<Output = bool> + Send;

    /// Quick liveness check.
    fn ping(&self, device: &Device) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    rendered: Option<Rendered>,
}

#[derive(Debug, Deserialize)]
struct Rendered {
    contents: Option<Vec<String>>,
}

/// reqwest-backed [`DeviceApi`].
///
/// # Example
///
/// ```rust,no_run
/// use blockclock_rotate::{Device, DeviceApi, HttpDeviceClient};
///
/// # async fn example() {
/// let client = HttpDeviceClient::new();
/// let device = Device::new("Mini", "192.168.0.177");
///
/// println!("showing: {}", client.get_display(&device).await);
/// client.send_text(&device, "_HODL_").await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: reqwest::Client,
    ping_timeout: Duration,
}

impl Default for HttpDeviceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDeviceClient {
    /// Create a client with the default 5 second request timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            ping_timeout: Duration::from_secs(PING_TIMEOUT_SECS).min(timeout),
        }
    }

    /// Set a custom HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn get(&self, device: &Device, url: reqwest::Url) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match device.auth_password() {
            Some(password) => request.basic_auth("", Some(password)),
            None => request,
        }
    }

    fn status_url(device: &Device) -> Option<reqwest::Url> {
        reqwest::Url::parse(&format!("{}/api/status", device.base_url())).ok()
    }

    fn show_text_url(device: &Device, text: &str) -> Option<reqwest::Url> {
        let mut url = reqwest::Url::parse(&device.base_url()).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["api", "show", "text", text]);
        Some(url)
    }

    async fn fetch_display(&self, device: &Device) -> Result<DisplayReading, crate::Error> {
        let url = Self::status_url(device)
            .ok_or_else(|| crate::Error::Config(format!("invalid address '{}'", device.address)))?;
        let response = self.get(device, url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(crate::Error::Api { status, body });
        }

        let status: StatusResponse = response.json().await?;
        Ok(status
            .rendered
            .and_then(|r| r.contents)
            .map(|contents| DisplayReading::Text(contents.concat()))
            .unwrap_or(DisplayReading::Error))
    }
}

impl DeviceApi for HttpDeviceClient {
    async fn get_display(&self, device: &Device) -> DisplayReading {
        match self.fetch_display(device).await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::error!("Error getting display from {}: {}", device.name, e);
                DisplayReading::Error
            }
        }
    }

    async fn send_text(&self, device: &Device, text: &str) -> bool {
        let Some(url) = Self::show_text_url(device, text) else {
            tracing::error!(
                "Error sending text to {}: invalid address '{}'",
                device.name,
                device.address
            );
            return false;
        };

        match self.get(device, url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("[{}] updated with: \"{}\"", device.name, text);
                true
            }
            Ok(response) => {
                tracing::error!(
                    "Error sending text to {}: device returned {}",
                    device.name,
                    response.status()
                );
                false
            }
            Err(e) => {
                tracing::error!("Error sending text to {}: {}", device.name, e);
                false
            }
        }
    }

    async fn ping(&self, device: &Device) -> bool {
        let Some(url) = Self::status_url(device) else {
            return false;
        };
        // Any HTTP answer, even 401, proves the device is up.
        self.get(device, url)
            .timeout(self.ping_timeout)
            .send()
            .await
            .is_ok()
    }
}

impl<T: DeviceApi> DeviceApi for Arc<T> {
    fn get_display(&self, device: &Device) -> impl Future<Output = DisplayReading> + Send {
        (**self).get_display(device)
    }

    fn send_text(&self, device: &Device, text: &str) -> impl Future<Output = bool> + Send {
        (**self).send_text(device, text)
    }

    fn ping(&self, device: &Device) -> impl Future<Output = bool> + Send {
        (**self).ping(device)
    }
}

/// Send `text` to every device in turn.
///
/// One device failing does not stop the others. Returns how many devices
/// accepted the text.
pub async fn broadcast_text<A: DeviceApi>(api: &A, devices: &[Device], text: &str) -> usize {
    let mut accepted = 0;
    for device in devices {
        if api.send_text(device, text).await {
            accepted += 1;
        }
    }

    if devices.len() > 1 {
        tracing::info!("Custom Text displayed on all available devices");
    } else {
        tracing::info!("Custom Text displayed on device");
    }
    accepted
}

//! Rotation configuration: devices, candidate texts and timing.
//!
//! The configuration is a single YAML file that both the rotation loop and
//! the control panel read. It is validated as a whole when loaded, so the
//! scheduler never sees a zero refresh period or an over-long text.
//!
//! # Example Configuration (YAML)
//!
//! ```yaml
//! refresh_period: 300        # seconds between the device's own screen changes
//! displays_between_text: 3   # native screens to show between custom texts
//!
//! texts: ["_HODL_", "SATOSHI", "WENMOON"]
//!
//! devices:
//!   - name: BlockClock Mini
//!     address: 192.168.0.177
//!   - name: BlockClock Office
//!     address: 192.168.0.178
//!     password: hunter2
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use blockclock_rotate::RotationConfig;
//!
//! let config = RotationConfig::load("config/blockclock.yaml")?;
//! println!("custom text every {} minutes", config.text_cadence_minutes());
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, MAX_TEXT_LEN, REFRESH_TIMEOUT_GRACE};

/// Longest accepted refresh period, one day.
pub const MAX_REFRESH_PERIOD_SECS: u64 = 86_400;

/// A BlockClock on the local network.
///
/// Devices are identified by their address; two entries with the same
/// address are rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Friendly name used in log lines
    pub name: String,

    /// Host or `host:port` of the device's HTTP API
    pub address: String,

    /// Device password for HTTP Basic auth (empty or absent = no auth)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Device {
    /// Create a device without a password.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            password: None,
        }
    }

    /// Set the device password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Password to authenticate with, if one is set.
    ///
    /// An empty string in the config file means "no password".
    pub fn auth_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Base URL of the device's HTTP API.
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address.trim_end_matches('/'))
        }
    }
}

/// Everything a rotation run needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Length of the device's own display cycle, in seconds
    #[serde(rename = "refresh_period", default = "default_refresh_period")]
    pub refresh_period_secs: u64,

    /// Native refreshes to let pass between custom text injections
    #[serde(default = "default_displays_between_text")]
    pub displays_between_text: u32,

    /// Candidate texts, one picked at random per injection
    #[serde(default = "default_texts")]
    pub texts: Vec<String>,

    /// Devices to drive, the first one is the timing reference
    #[serde(default = "default_devices")]
    pub devices: Vec<Device>,
}

fn default_refresh_period() -> u64 {
    300
}

fn default_displays_between_text() -> u32 {
    3
}

fn default_texts() -> Vec<String> {
    [
        "__GFY__", "_BTFD_", "_HODL_", "SATOSHI", "_NGMI_", "BITCOIN", "FIATSUX", "WENMOON",
        "BEVSTR",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_devices() -> Vec<Device> {
    vec![Device::new("BlockClock Mini", "192.168.0.177")]
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            refresh_period_secs: default_refresh_period(),
            displays_between_text: default_displays_between_text(),
            texts: default_texts(),
            devices: default_devices(),
        }
    }
}

impl RotationConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Load the config file, writing the defaults first if it does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Creating default configuration at {}", path.display());
            Self::default().save(path)?;
        }
        Self::load(path)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate and write the configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Check the invariants the scheduler relies on.
    ///
    /// An empty device list is accepted here; a run over it fails its
    /// liveness check instead.
    pub fn validate(&self) -> Result<(), Error> {
        if self.refresh_period_secs == 0 {
            return Err(Error::Config("refresh_period must be greater than 0".into()));
        }
        if self.refresh_period_secs > MAX_REFRESH_PERIOD_SECS {
            return Err(Error::Config(format!(
                "refresh_period must be at most {} seconds",
                MAX_REFRESH_PERIOD_SECS
            )));
        }
        if self.displays_between_text == 0 {
            return Err(Error::Config(
                "displays_between_text must be at least 1".into(),
            ));
        }
        if self.texts.is_empty() {
            return Err(Error::Config("at least one text option is required".into()));
        }
        for text in &self.texts {
            validate_text(text)?;
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.address.trim().is_empty() {
                return Err(Error::Config(format!(
                    "device '{}' has no address",
                    device.name
                )));
            }
            if !seen.insert(device.address.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate device address '{}'",
                    device.address
                )));
            }
        }
        Ok(())
    }

    /// Device display cycle length.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }

    /// Upper bound on a single refresh wait: one cycle plus a missed-cycle grace.
    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_period().saturating_add(REFRESH_TIMEOUT_GRACE)
    }

    /// Minutes between two custom texts.
    pub fn text_cadence_minutes(&self) -> u64 {
        u64::from(self.displays_between_text).saturating_mul(self.refresh_period_secs) / 60
    }

    /// Log the effective configuration at startup.
    pub fn log_summary(&self) {
        tracing::info!(
            "Custom Text will Display every {} minutes",
            self.text_cadence_minutes()
        );
        tracing::info!("Current configuration:");
        for (i, device) in self.devices.iter().enumerate() {
            tracing::info!("   - Device {}: {} ({})", i + 1, device.name, device.address);
        }
        tracing::info!(
            "   - Refresh time: {} mins ({} seconds)",
            self.refresh_period_secs / 60,
            self.refresh_period_secs
        );
        tracing::info!(
            "   - Displays between Custom Text: {}",
            self.displays_between_text
        );
    }
}

/// Check a single custom text: non-blank and at most [`MAX_TEXT_LEN`] characters.
pub fn validate_text(text: &str) -> Result<(), Error> {
    if text.trim().is_empty() {
        return Err(Error::Config("text options must not be empty".into()));
    }
    if text.chars().count() > MAX_TEXT_LEN {
        return Err(Error::Config(format!(
            "text '{}' is longer than {} characters",
            text, MAX_TEXT_LEN
        )));
    }
    Ok(())
}

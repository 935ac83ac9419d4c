//! Channel configuration
//!
//! Every field has a default, so an empty or partial TOML file is valid.
//!
//! ```toml
//! [queue]
//! worker_stack_size = 65536
//!
//! [admission]
//! adpcm_in_flight_limit = 16
//! pool_slot_len = 128
//!
//! [flow_control]
//! query_timeout_ms = 5000
//! poll_interval_ms = 50
//! max_chunk_len = 512
//!
//! [device]
//! version = "v4.1.0"
//! net_connected = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChannelConfig {
    pub queue: QueueConfig,
    pub admission: AdmissionConfig,
    pub flow_control: FlowControlConfig,
    pub device: DeviceConfig,
}

/// Worker thread settings shared by the three queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Stack size hint in bytes
    pub worker_stack_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_stack_size: WORKER_STACK_SIZE,
        }
    }
}

/// Inbound admission limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// ADPCM feed packets allowed in the queues at once; also the pool size
    pub adpcm_in_flight_limit: u32,
    /// Bytes per pool slot
    pub pool_slot_len: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            adpcm_in_flight_limit: ADPCM_IN_FLIGHT_LIMIT,
            pool_slot_len: ADPCM_PACKET_LEN,
        }
    }
}

/// PCM streaming flow control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub query_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_chunk_len: usize,
}

impl FlowControlConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: FLOW_CONTROL_TIMEOUT_MS,
            poll_interval_ms: FLOW_CONTROL_POLL_MS,
            max_chunk_len: AUDIO_CHUNK_MAX,
        }
    }
}

/// Identity reported to the HBM in the challenge pack ack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub version: String,
    pub net_connected: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: DEVICE_VERSION.to_string(),
            net_connected: true,
        }
    }
}

impl ChannelConfig {
    /// Parse from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/hbm-channel/channel.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "hbm-channel")
            .map(|dirs| dirs.config_dir().join("channel.toml"))
    }

    /// Reject settings the router cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.admission.adpcm_in_flight_limit == 0 {
            return Err(Error::Config("adpcm_in_flight_limit must be at least 1".into()));
        }
        if self.flow_control.max_chunk_len == 0 {
            return Err(Error::Config("max_chunk_len must be at least 1".into()));
        }
        if self.queue.worker_stack_size == 0 {
            return Err(Error::Config("worker_stack_size must be non-zero".into()));
        }
        if self.device.version.len() >= VERSION_FIELD_LEN {
            tracing::warn!(
                "Device version '{}' will be truncated to {} bytes",
                self.device.version,
                VERSION_FIELD_LEN - 1
            );
        }
        Ok(())
    }
}

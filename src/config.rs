// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{
    FrameCodec, HostConfig, DEFAULT_DEVICE_PREFIX, DEFAULT_MAX_FRAME_BYTES,
    DEFAULT_RFCOMM_CHANNEL, DEFAULT_SERVICE_NAME, HOST_STARTUP_DISCOVERABLE_SECS, SERVICE_UUID,
};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Wire protocol settings.
    pub protocol: ProtocolConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name such as `hci0`. Empty selects the default adapter.
    pub adapter: String,

    /// Name prefix used to pick the device to connect to.
    pub device_name_prefix: String,

    /// Service name published in the SDP record.
    pub service_name: String,

    /// RFCOMM channel requested for the host profile.
    pub rfcomm_channel: u8,

    /// Discoverability window requested at host startup.
    pub host_discoverable_seconds: u32,

    /// Bound on a single connect attempt.
    pub connect_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: String::new(),
            device_name_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            host_discoverable_seconds: HOST_STARTUP_DISCOVERABLE_SECS,
            connect_timeout_secs: 15,
        }
    }
}

impl BluetoothConfig {
    pub fn adapter_name(&self) -> Option<&str> {
        let name = self.adapter.trim();
        (!name.is_empty()).then_some(name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted frame payload.
    pub max_frame_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the `btlink` target; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/btlink/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("btlink")
            .join("config.toml")
    }

    /// Load configuration from the default location or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            return Ok(config);
        }

        let config = Self::default();
        config.save_to(path)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.protocol.max_frame_bytes)
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            service_uuid: SERVICE_UUID,
            service_name: self.bluetooth.service_name.clone(),
            codec: self.codec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.device_name_prefix, "display");
        assert_eq!(config.bluetooth.host_discoverable_seconds, 300);
        assert_eq!(config.protocol.max_frame_bytes, 1024 * 1024);
        assert!(config.bluetooth.adapter_name().is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth]\nadapter = \"hci1\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bluetooth.adapter_name(), Some("hci1"));
        assert_eq!(config.bluetooth.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.service_name = "Kiosk".to_string();
        config.protocol.max_frame_bytes = 4096;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.host_config().service_name, "Kiosk");
        assert_eq!(loaded.codec().max_frame_bytes(), 4096);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}

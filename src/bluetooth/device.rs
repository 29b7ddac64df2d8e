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

//! Remote device identity and the paired-device catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::error::Result;
use super::platform::BluetoothPlatform;
use super::registry::ConnectionRegistry;

/// Bluetooth device address.
///
/// Opaque to the session layer. Surrounding whitespace is dropped and the
/// value is stored upper-cased, so equality and hashing are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

/// A remote Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Display name, may be empty.
    pub name: String,
    pub address: DeviceAddress,
    pub is_paired: bool,
    /// Derived from registry membership at query time.
    pub is_connected: bool,
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<DeviceAddress>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            is_paired: false,
            is_connected: false,
        }
    }

    /// Mark as paired.
    pub fn paired(mut self) -> Self {
        self.is_paired = true;
        self
    }

    /// Name for display; falls back to the address when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.address.as_str()
        } else {
            &self.name
        }
    }
}

/// Enumerates the devices the platform already considers paired.
pub struct DeviceCatalog {
    platform: Arc<dyn BluetoothPlatform>,
    registry: Arc<ConnectionRegistry>,
}

impl DeviceCatalog {
    pub fn new(platform: Arc<dyn BluetoothPlatform>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { platform, registry }
    }

    /// Snapshot of the paired devices with `is_connected` filled in from the
    /// registry. Call again to refresh.
    pub async fn list_paired(&self) -> Result<Vec<Device>> {
        let devices = self
            .platform
            .paired_devices()
            .await?
            .into_iter()
            .map(|mut device| {
                device.is_paired = true;
                device.is_connected = self.registry.is_connected(&device.address);
                device
            })
            .collect::<Vec<_>>();

        debug!("Paired devices: {}", devices.len());
        Ok(devices)
    }

    /// First device, in catalog order, whose name starts with `prefix`
    /// (case-insensitive). Only the first match is ever returned.
    pub fn find_by_name_prefix<'a>(devices: &'a [Device], prefix: &str) -> Option<&'a Device> {
        if prefix.is_empty() {
            return None;
        }

        let prefix = prefix.to_lowercase();
        devices
            .iter()
            .find(|device| device.name.to_lowercase().starts_with(&prefix))
    }
}

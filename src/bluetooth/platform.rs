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

//! Platform Bluetooth stack abstraction.
//!
//! Any stack that can enumerate paired devices, open an RFCOMM client socket
//! to a service UUID, publish a service record and accept on it can host the
//! session layer unchanged.

use async_trait::async_trait;
use uuid::Uuid;

use super::device::{Device, DeviceAddress};
use super::error::Result;
use super::sdp::ServiceRecord;
use super::transport::Transport;

/// Primitives the session layer needs from the local Bluetooth stack.
#[async_trait]
pub trait BluetoothPlatform: Send + Sync {
    /// Devices the platform considers paired (bonded).
    async fn paired_devices(&self) -> Result<Vec<Device>>;

    /// Open an RFCOMM stream to `service` on `address`.
    async fn connect_rfcomm(&self, address: &DeviceAddress, service: Uuid) -> Result<Transport>;

    /// Ask the platform to make the local adapter (non-)discoverable.
    async fn request_discoverable(&self, enabled: bool, timeout_secs: u32) -> Result<()>;

    /// Create an advertising provider for `service`.
    ///
    /// Fails with `RadioUnavailable` when the radio is off or the platform
    /// refuses to publish services.
    async fn create_provider(&self, service: Uuid) -> Result<Box<dyn ServiceProvider>>;
}

/// Advertises one RFCOMM service.
#[async_trait]
pub trait ServiceProvider: Send {
    fn service_uuid(&self) -> Uuid;

    /// Bind a listener for the service, attaching the record's attributes.
    async fn bind_listener(&mut self, record: &ServiceRecord) -> Result<Box<dyn ServiceListener>>;

    async fn start_advertising(&mut self) -> Result<()>;

    /// Stop advertising. Safe to call when not advertising.
    async fn stop_advertising(&mut self) -> Result<()>;
}

/// Accepts inbound RFCOMM connections. Dropping it disposes the listener.
#[async_trait]
pub trait ServiceListener: Send {
    async fn accept(&mut self) -> Result<Transport>;
}

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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::{Device, HostState, SessionEvent};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Whether discoverability was last requested on.
    pub discoverable: RwLock<bool>,

    /// Whether the host is waiting for a peer.
    pub listening: RwLock<bool>,

    /// Paired peer count as last reported.
    pub paired_count: RwLock<usize>,

    /// Connected device name.
    pub connected_device: RwLock<Option<String>>,

    /// Last received message.
    pub last_message: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            discoverable: RwLock::new(false),
            listening: RwLock::new(false),
            paired_count: RwLock::new(0),
            connected_device: RwLock::new(None),
            last_message: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self) {
        *self.connection_status.write() = ConnectionStatus::Connecting;
    }

    pub fn set_connected(&self, device_name: String) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.connected_device.write() = Some(device_name);
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.connected_device.write() = None;
    }

    pub fn set_error(&self) {
        *self.connection_status.write() = ConnectionStatus::Error;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.connected_device.read().clone()
    }

    pub fn set_discoverable(&self, enabled: bool) {
        *self.discoverable.write() = enabled;
    }

    pub fn is_discoverable(&self) -> bool {
        *self.discoverable.read()
    }

    pub fn set_paired_count(&self, count: usize) {
        *self.paired_count.write() = count;
    }

    pub fn get_paired_count(&self) -> usize {
        *self.paired_count.read()
    }

    pub fn is_listening(&self) -> bool {
        *self.listening.read()
    }

    pub fn get_last_message(&self) -> Option<String> {
        self.last_message.read().clone()
    }

    /// Fold a session event into the displayed state.
    pub fn apply(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { device, .. } => {
                self.set_connected(device.display_name().to_string());
            }
            SessionEvent::MessageReceived { text, .. } => {
                *self.last_message.write() = Some(text.clone());
            }
            SessionEvent::Disconnected { .. } => self.set_disconnected(),
            SessionEvent::HostStateChanged(host) => {
                *self.listening.write() = host.is_listening();
                if *host == HostState::Idle && self.get_status() == ConnectionStatus::Connected {
                    self.set_disconnected();
                }
            }
            SessionEvent::Error(_) => self.set_error(),
            SessionEvent::Warning(_) => {}
        }
    }

    /// Connect is offered only for a paired device with no session and no
    /// attempt in flight.
    pub fn can_connect(&self, device: &Device) -> bool {
        device.is_paired && !device.is_connected && self.get_status() != ConnectionStatus::Connecting
    }

    pub fn paired_status_text(&self) -> String {
        paired_status_text(self.get_paired_count())
    }

    pub fn discoverable_text(&self) -> &'static str {
        discoverable_text(self.is_discoverable())
    }

    pub fn listen_button_text(&self) -> &'static str {
        listen_button_text(self.is_listening())
    }
}

pub fn paired_status_text(count: usize) -> String {
    if count == 1 {
        format!("{} Bluetooth device is paired.", count)
    } else {
        format!("{} Bluetooth devices are paired.", count)
    }
}

pub fn discoverable_text(discoverable: bool) -> &'static str {
    if discoverable {
        "Device is discoverable via Bluetooth."
    } else {
        "Device is not discoverable via Bluetooth."
    }
}

pub fn listen_button_text(listening: bool) -> &'static str {
    if listening {
        "Listening..."
    } else {
        "Start listening"
    }
}

/// Multi-line summary of the paired set.
pub fn paired_devices_summary(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "No paired bluetooth devices.".to_string();
    }

    let mut summary = format!("{} paired bluetooth device(s) found:", devices.len());
    for device in devices {
        summary.push_str(&format!("\n - {} - {}", device.name, device.address));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{DeviceAddress, SessionRole};

    #[test]
    fn test_paired_status_text() {
        assert_eq!(paired_status_text(0), "0 Bluetooth devices are paired.");
        assert_eq!(paired_status_text(1), "1 Bluetooth device is paired.");
        assert_eq!(paired_status_text(3), "3 Bluetooth devices are paired.");
    }

    #[test]
    fn test_paired_devices_summary() {
        assert_eq!(paired_devices_summary(&[]), "No paired bluetooth devices.");

        let devices = vec![
            Device::new("display-1", "AA:AA:AA:AA:AA:AA"),
            Device::new("phone", "bb:bb:bb:bb:bb:bb"),
        ];
        assert_eq!(
            paired_devices_summary(&devices),
            "2 paired bluetooth device(s) found:\n - display-1 - AA:AA:AA:AA:AA:AA\n - phone - BB:BB:BB:BB:BB:BB"
        );
    }

    #[test]
    fn test_can_connect_gating() {
        let state = AppState::new();
        let mut device = Device::new("display-1", "AA:AA:AA:AA:AA:AA");
        assert!(!state.can_connect(&device));

        device.is_paired = true;
        assert!(state.can_connect(&device));

        state.set_connecting();
        assert!(!state.can_connect(&device));

        state.set_disconnected();
        device.is_connected = true;
        assert!(!state.can_connect(&device));
    }

    #[test]
    fn test_apply_events() {
        let state = AppState::new();
        let device = Device::new("display-1", "AA:AA:AA:AA:AA:AA");

        state.apply(&SessionEvent::HostStateChanged(HostState::Accepting));
        assert!(state.is_listening());
        assert_eq!(state.listen_button_text(), "Listening...");

        state.apply(&SessionEvent::Connected {
            device: device.clone(),
            role: SessionRole::Host,
        });
        state.apply(&SessionEvent::HostStateChanged(HostState::Established));
        assert_eq!(state.get_status(), ConnectionStatus::Connected);
        assert_eq!(state.get_device_name().as_deref(), Some("display-1"));
        assert_eq!(state.listen_button_text(), "Start listening");

        state.apply(&SessionEvent::MessageReceived {
            from: device.address.clone(),
            text: "hi".to_string(),
        });
        assert_eq!(state.get_last_message().as_deref(), Some("hi"));

        state.apply(&SessionEvent::Disconnected {
            address: DeviceAddress::new("AA:AA:AA:AA:AA:AA"),
            remote: true,
        });
        assert_eq!(state.get_status(), ConnectionStatus::Disconnected);
        assert!(state.get_device_name().is_none());
    }

    #[test]
    fn test_status_text_follows_connection() {
        let state = AppState::new();
        assert_eq!(state.get_status().as_str(), "Disconnected");

        state.set_connecting();
        assert_eq!(state.get_status().as_str(), "Connecting...");

        state.apply(&SessionEvent::Connected {
            device: Device::new("display-1", "AA:AA:AA:AA:AA:AA"),
            role: SessionRole::Client,
        });
        assert_eq!(state.get_status().as_str(), "Connected");

        state.apply(&SessionEvent::Error("link lost".to_string()));
        assert_eq!(state.get_status().as_str(), "Error");
    }

    #[test]
    fn test_discoverable_text() {
        let state = AppState::new();
        assert_eq!(state.discoverable_text(), "Device is not discoverable via Bluetooth.");
        state.set_discoverable(true);
        assert_eq!(state.discoverable_text(), "Device is discoverable via Bluetooth.");
    }
}

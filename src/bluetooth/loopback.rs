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

//! In-memory Bluetooth stack.
//!
//! Several [`LoopbackPlatform`]s share one [`LoopbackAir`]; an RFCOMM connect
//! from one platform reaches whichever platform has a listener bound for the
//! service on the target address. Streams are tokio duplex pipes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::device::{Device, DeviceAddress};
use super::error::{BtError, Result};
use super::platform::{BluetoothPlatform, ServiceListener, ServiceProvider};
use super::sdp::ServiceRecord;
use super::transport::Transport;

const PIPE_CAPACITY: usize = 64 * 1024;

type ServiceKey = (DeviceAddress, Uuid);

/// Shared medium connecting loopback platforms.
#[derive(Clone, Default)]
pub struct LoopbackAir {
    services: Arc<Mutex<HashMap<ServiceKey, mpsc::UnboundedSender<Transport>>>>,
}

impl LoopbackAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&self, key: ServiceKey) -> Result<LoopbackListener> {
        let mut services = self.services.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        // A newer bind takes over the service; the old listener stops
        // receiving connections.
        if services.insert(key.clone(), tx.clone()).is_some() {
            debug!("Rebinding {} on {}", key.1, key.0);
        }
        Ok(LoopbackListener {
            air: self.clone(),
            key,
            tx,
            rx,
        })
    }

    fn route(&self, key: &ServiceKey) -> Option<mpsc::UnboundedSender<Transport>> {
        self.services.lock().get(key).cloned()
    }

    fn unbind(&self, key: &ServiceKey, tx: &mpsc::UnboundedSender<Transport>) {
        let mut services = self.services.lock();
        if services.get(key).is_some_and(|current| current.same_channel(tx)) {
            services.remove(key);
        }
    }
}

#[derive(Default)]
struct PlatformState {
    paired: Vec<Device>,
    radio_off: bool,
    discoverable: Option<(bool, u32)>,
    advertising: HashSet<Uuid>,
    records: HashMap<Uuid, ServiceRecord>,
    opened: HashMap<DeviceAddress, usize>,
}

/// One simulated local adapter.
#[derive(Clone)]
pub struct LoopbackPlatform {
    air: LoopbackAir,
    local: Device,
    state: Arc<Mutex<PlatformState>>,
}

impl LoopbackPlatform {
    pub fn new(air: &LoopbackAir, address: &str, name: &str) -> Self {
        Self {
            air: air.clone(),
            local: Device::new(name, address),
            state: Arc::new(Mutex::new(PlatformState::default())),
        }
    }

    pub fn local(&self) -> &Device {
        &self.local
    }

    pub fn add_paired(&self, device: Device) {
        self.state.lock().paired.push(device.paired());
    }

    /// Simulate the radio being switched on or off.
    pub fn set_radio(&self, on: bool) {
        self.state.lock().radio_off = !on;
    }

    /// Last discoverability request as `(enabled, timeout_secs)`.
    pub fn discoverable(&self) -> Option<(bool, u32)> {
        self.state.lock().discoverable
    }

    pub fn is_advertising(&self, service: Uuid) -> bool {
        self.state.lock().advertising.contains(&service)
    }

    /// The record published for `service` while advertising.
    pub fn published_record(&self, service: Uuid) -> Option<ServiceRecord> {
        let state = self.state.lock();
        if state.advertising.contains(&service) {
            state.records.get(&service).cloned()
        } else {
            None
        }
    }

    /// Number of transports ever opened from here to `address`.
    pub fn transports_opened(&self, address: &DeviceAddress) -> usize {
        self.state.lock().opened.get(address).copied().unwrap_or(0)
    }

    /// Bind a listener directly, without a provider.
    pub fn listen_raw(&self, service: Uuid) -> Result<LoopbackListener> {
        self.air.bind((self.local.address.clone(), service))
    }

    fn check_radio(&self) -> Result<()> {
        if self.state.lock().radio_off {
            return Err(BtError::RadioUnavailable(
                "make sure your Bluetooth radio is on".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BluetoothPlatform for LoopbackPlatform {
    async fn paired_devices(&self) -> Result<Vec<Device>> {
        Ok(self.state.lock().paired.clone())
    }

    async fn connect_rfcomm(&self, address: &DeviceAddress, service: Uuid) -> Result<Transport> {
        self.check_radio()?;

        let key = (address.clone(), service);
        let route = self.air.route(&key).ok_or_else(|| {
            BtError::TransportFailure(format!("connection refused by {}", address))
        })?;

        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        route
            .send(Transport::from_stream(self.local.address.clone(), theirs))
            .map_err(|_| BtError::TransportFailure(format!("connection refused by {}", address)))?;

        *self.state.lock().opened.entry(address.clone()).or_insert(0) += 1;
        debug!("Loopback link {} -> {}", self.local.address, address);
        Ok(Transport::from_stream(address.clone(), ours))
    }

    async fn request_discoverable(&self, enabled: bool, timeout_secs: u32) -> Result<()> {
        self.check_radio()?;
        self.state.lock().discoverable = Some((enabled, timeout_secs));
        Ok(())
    }

    async fn create_provider(&self, service: Uuid) -> Result<Box<dyn ServiceProvider>> {
        self.check_radio()?;
        Ok(Box::new(LoopbackProvider {
            platform: self.clone(),
            service,
            record: None,
        }))
    }
}

struct LoopbackProvider {
    platform: LoopbackPlatform,
    service: Uuid,
    record: Option<ServiceRecord>,
}

#[async_trait]
impl ServiceProvider for LoopbackProvider {
    fn service_uuid(&self) -> Uuid {
        self.service
    }

    async fn bind_listener(&mut self, record: &ServiceRecord) -> Result<Box<dyn ServiceListener>> {
        let listener = self.platform.listen_raw(self.service)?;
        self.record = Some(record.clone());
        Ok(Box::new(listener))
    }

    async fn start_advertising(&mut self) -> Result<()> {
        self.platform.check_radio()?;

        let mut state = self.platform.state.lock();
        if let Some(record) = &self.record {
            state.records.insert(self.service, record.clone());
        }
        state.advertising.insert(self.service);
        info!("Loopback advertising {}", self.service);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        let mut state = self.platform.state.lock();
        state.advertising.remove(&self.service);
        state.records.remove(&self.service);
        Ok(())
    }
}

/// Listener bound on a [`LoopbackAir`]. Unbinds when dropped.
pub struct LoopbackListener {
    air: LoopbackAir,
    key: ServiceKey,
    tx: mpsc::UnboundedSender<Transport>,
    rx: mpsc::UnboundedReceiver<Transport>,
}

#[async_trait]
impl ServiceListener for LoopbackListener {
    async fn accept(&mut self) -> Result<Transport> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| BtError::TransportFailure("listener closed".to_string()))
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.air.unbind(&self.key, &self.tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: Uuid = Uuid::from_u128(0x42);

    #[tokio::test]
    async fn test_connect_reaches_bound_listener() {
        let air = LoopbackAir::new();
        let host = LoopbackPlatform::new(&air, "AA:AA:AA:AA:AA:AA", "host");
        let client = LoopbackPlatform::new(&air, "BB:BB:BB:BB:BB:BB", "client");

        let mut listener = host.listen_raw(SERVICE).unwrap();
        let outbound = client
            .connect_rfcomm(&DeviceAddress::new("aa:aa:aa:aa:aa:aa"), SERVICE)
            .await
            .unwrap();
        let inbound = listener.accept().await.unwrap();

        assert_eq!(outbound.peer().as_str(), "AA:AA:AA:AA:AA:AA");
        assert_eq!(inbound.peer().as_str(), "BB:BB:BB:BB:BB:BB");
        assert_eq!(client.transports_opened(outbound.peer()), 1);
    }

    #[tokio::test]
    async fn test_dropped_listener_refuses() {
        let air = LoopbackAir::new();
        let host = LoopbackPlatform::new(&air, "AA:AA:AA:AA:AA:AA", "host");
        let client = LoopbackPlatform::new(&air, "BB:BB:BB:BB:BB:BB", "client");

        drop(host.listen_raw(SERVICE).unwrap());
        let err = client
            .connect_rfcomm(&DeviceAddress::new("AA:AA:AA:AA:AA:AA"), SERVICE)
            .await
            .unwrap_err();
        assert!(matches!(err, BtError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn test_radio_off() {
        let air = LoopbackAir::new();
        let host = LoopbackPlatform::new(&air, "AA:AA:AA:AA:AA:AA", "host");
        host.set_radio(false);

        assert!(matches!(
            host.create_provider(SERVICE).await,
            Err(BtError::RadioUnavailable(_))
        ));
    }
}

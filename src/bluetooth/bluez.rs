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

//! BlueZ backend.
//!
//! Both roles go through RFCOMM profiles registered with bluetoothd, so the
//! service is found by UUID through SDP rather than by a fixed channel.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Adapter, Address, ErrorKind, Session};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::{Device, DeviceAddress};
use super::error::{BtError, Result};
use super::platform::{BluetoothPlatform, ServiceListener, ServiceProvider};
use super::sdp::ServiceRecord;
use super::transport::Transport;

/// RFCOMM channel requested for the host profile.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

impl From<bluer::Error> for BtError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            ErrorKind::NotReady | ErrorKind::NotAvailable | ErrorKind::NotSupported => {
                BtError::RadioUnavailable(err.to_string())
            }
            _ => BtError::TransportFailure(err.to_string()),
        }
    }
}

/// Local adapter driven through bluetoothd.
pub struct BluezPlatform {
    session: Session,
    adapter: Adapter,
    channel: u8,
    /// Client-role profiles, one registration per service.
    client_profiles: Mutex<HashMap<Uuid, ProfileHandle>>,
}

impl BluezPlatform {
    /// Open a BlueZ session on `adapter_name` (or the default adapter) and
    /// power it on.
    pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self {
            session,
            adapter,
            channel: DEFAULT_RFCOMM_CHANNEL,
            client_profiles: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn ensure_powered(&self) -> Result<()> {
        if !self.adapter.is_powered().await? {
            return Err(BtError::RadioUnavailable(
                "make sure your Bluetooth radio is on".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wait for both the ConnectProfile call and the socket handed to the
/// profile. Whichever fails first aborts the other.
async fn join_profile_connect<T>(
    connect: impl Future<Output = Result<()>>,
    incoming: impl Future<Output = Result<T>>,
) -> Result<T> {
    let ((), stream) = tokio::try_join!(connect, incoming)?;
    Ok(stream)
}

fn parse_address(address: &DeviceAddress) -> Result<Address> {
    address
        .as_str()
        .parse()
        .map_err(|_| BtError::InvalidArgument(format!("malformed address {}", address)))
}

#[async_trait]
impl BluetoothPlatform for BluezPlatform {
    async fn paired_devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_default();
                devices.push(Device::new(name, addr.to_string()).paired());
            }
        }

        debug!("{} paired devices", devices.len());
        Ok(devices)
    }

    async fn connect_rfcomm(&self, address: &DeviceAddress, service: Uuid) -> Result<Transport> {
        self.ensure_powered().await?;
        let addr = parse_address(address)?;
        let device = self.adapter.device(addr)?;

        // Connects are serialized per platform: BlueZ hands the new socket to
        // the profile, not to the ConnectProfile caller.
        let mut profiles = self.client_profiles.lock().await;
        if !profiles.contains_key(&service) {
            let profile = Profile {
                uuid: service,
                role: Some(Role::Client),
                require_authentication: Some(false),
                require_authorization: Some(false),
                auto_connect: Some(false),
                ..Default::default()
            };
            let handle = self.session.register_profile(profile).await?;
            debug!("Client profile registered for {}", service);
            profiles.insert(service, handle);
        }
        let handle = profiles
            .get_mut(&service)
            .ok_or_else(|| BtError::InvalidState("client profile missing".to_string()))?;

        let incoming = async {
            while let Some(req) = handle.next().await {
                if req.device() == addr {
                    return req.accept().map_err(BtError::transport);
                }
                debug!("Ignoring profile connection from {}", req.device());
            }
            Err(BtError::TransportFailure(
                "profile unregistered by bluetoothd".to_string(),
            ))
        };

        let connect = async { device.connect_profile(&service).await.map_err(BtError::from) };
        let stream = join_profile_connect(connect, incoming).await?;

        info!("RFCOMM link to {} open", address);
        Ok(Transport::from_stream(address.clone(), stream))
    }

    async fn request_discoverable(&self, enabled: bool, timeout_secs: u32) -> Result<()> {
        self.ensure_powered().await?;
        self.adapter.set_discoverable_timeout(timeout_secs).await?;
        self.adapter.set_discoverable(enabled).await?;
        if enabled {
            self.adapter.set_pairable(true).await?;
        }
        Ok(())
    }

    async fn create_provider(&self, service: Uuid) -> Result<Box<dyn ServiceProvider>> {
        self.ensure_powered().await?;
        Ok(Box::new(BluezProvider {
            session: self.session.clone(),
            adapter: self.adapter.clone(),
            service,
            channel: self.channel,
        }))
    }
}

struct BluezProvider {
    session: Session,
    adapter: Adapter,
    service: Uuid,
    channel: u8,
}

#[async_trait]
impl ServiceProvider for BluezProvider {
    fn service_uuid(&self) -> Uuid {
        self.service
    }

    async fn bind_listener(&mut self, record: &ServiceRecord) -> Result<Box<dyn ServiceListener>> {
        let profile = Profile {
            uuid: record.service_uuid,
            name: Some(record.service_name.clone()),
            channel: Some(u16::from(self.channel)),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };

        let handle = self.session.register_profile(profile).await?;
        info!(
            "RFCOMM profile {} registered on channel {}",
            record.service_uuid, self.channel
        );
        Ok(Box::new(BluezListener { handle }))
    }

    async fn start_advertising(&mut self) -> Result<()> {
        self.adapter.set_discoverable(true).await?;
        self.adapter.set_pairable(true).await?;
        info!("Adapter is discoverable and pairable");
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        if let Err(e) = self.adapter.set_discoverable(false).await {
            warn!("Could not clear discoverable flag: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Server-role profile; dropping it unregisters the service.
struct BluezListener {
    handle: ProfileHandle,
}

#[async_trait]
impl ServiceListener for BluezListener {
    async fn accept(&mut self) -> Result<Transport> {
        let req = self.handle.next().await.ok_or_else(|| {
            BtError::TransportFailure("profile unregistered by bluetoothd".to_string())
        })?;

        let peer = DeviceAddress::new(req.device().to_string());
        info!("Connection request from {}", peer);
        let stream = req.accept().map_err(BtError::transport)?;
        Ok(Transport::from_stream(peer, stream))
    }
}

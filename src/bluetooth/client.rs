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

//! Client role: connect to a paired device's RFCOMM service.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::{FrameCodec, FrameReader};
use super::device::Device;
use super::error::{BtError, Result};
use super::platform::BluetoothPlatform;
use super::registry::{BeginConnect, CommitOutcome, ConnectPermit, ConnectionRegistry};
use super::session::{run_read_loop, ReadLoopExit, Session, SessionEvent, SessionRole};
use super::SERVICE_UUID;

/// Grace period after the transport reports connected, before the link is
/// trusted.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default bound on the platform connect call.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a successful connect.
pub enum Connected {
    /// This call opened and registered the session.
    Established(ClientLink),
    /// A session already existed (or another caller won the race).
    AlreadyConnected,
}

impl Connected {
    pub fn into_link(self) -> Option<ClientLink> {
        match self {
            Self::Established(link) => Some(link),
            Self::AlreadyConnected => None,
        }
    }
}

impl std::fmt::Debug for Connected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Established(link) => f
                .debug_tuple("Established")
                .field(link.session().address())
                .finish(),
            Self::AlreadyConnected => f.write_str("AlreadyConnected"),
        }
    }
}

/// A freshly registered client session plus its read direction.
///
/// A failed read is terminal: the session is removed from the registry
/// before the error is returned.
pub struct ClientLink {
    session: Arc<Session>,
    reader: FrameReader,
    registry: Arc<ConnectionRegistry>,
}

impl ClientLink {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        self.session.send(text).await
    }

    /// Block for the next message.
    pub async fn next_message(&mut self) -> Result<String> {
        let result = self.reader.next_message().await;
        if let Err(e) = &result {
            debug!("Read from {} ended: {}", self.session.address(), e);
            self.registry.remove_session(&self.session).await;
        }
        result
    }
}

/// Drives the client-side connect handshake.
pub struct ClientSession {
    platform: Arc<dyn BluetoothPlatform>,
    registry: Arc<ConnectionRegistry>,
    codec: FrameCodec,
    connect_timeout: Duration,
}

impl ClientSession {
    pub fn new(platform: Arc<dyn BluetoothPlatform>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            platform,
            registry,
            codec: FrameCodec::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect to `device`.
    ///
    /// Connecting to an already connected device is success. On success the
    /// device is flagged connected and paired; on failure nothing is left in
    /// the registry.
    pub async fn connect(&self, device: &mut Device) -> Result<Connected> {
        let result = match self.registry.try_begin_connect(&device.address) {
            BeginConnect::AlreadyConnected => {
                info!("{} already connected", device.address);
                Ok(Connected::AlreadyConnected)
            }
            BeginConnect::Proceed(permit) => self.establish(device, permit).await,
        };

        match &result {
            Ok(_) => {
                device.is_connected = true;
                device.is_paired = true;
            }
            Err(e) => {
                error!("Connect to {} failed: {}", device.address, e);
                device.is_connected = false;
            }
        }
        result
    }

    async fn establish(&self, device: &Device, permit: ConnectPermit) -> Result<Connected> {
        let paired = self.platform.paired_devices().await?;
        let target = paired
            .into_iter()
            .find(|d| d.address == device.address)
            .ok_or_else(|| BtError::DeviceNotFound(device.address.to_string()))?;

        info!("Connecting to {} ({})", target.display_name(), target.address);
        let transport = tokio::time::timeout(
            self.connect_timeout,
            self.platform.connect_rfcomm(&target.address, SERVICE_UUID),
        )
        .await
        .map_err(|_| {
            BtError::TransportFailure(format!("connection timeout to {}", target.address))
        })??;

        tokio::time::sleep(SETTLE_DELAY).await;
        if !transport.is_open() {
            return Err(BtError::TransportFailure(format!(
                "link to {} dropped while settling",
                target.address
            )));
        }

        let mut session_device = target;
        session_device.is_paired = true;
        session_device.is_connected = true;
        let (session, reader) =
            Session::open(session_device, SessionRole::Client, transport, self.codec);

        match permit.commit(session) {
            CommitOutcome::Accepted(session) => {
                info!("Connected to {}", session.address());
                Ok(Connected::Established(ClientLink {
                    session,
                    reader,
                    registry: Arc::clone(&self.registry),
                }))
            }
            CommitOutcome::Rejected(loser) => {
                warn!(
                    "{} was connected by another caller, closing duplicate link",
                    loser.address()
                );
                loser.close().await;
                Ok(Connected::AlreadyConnected)
            }
        }
    }

    /// Tear down the session for `device`. Always succeeds.
    pub async fn disconnect(&self, device: &mut Device) {
        self.registry.remove(&device.address).await;
        device.is_connected = false;
    }

    /// Run the read loop for `link` on its own task. A remote close removes
    /// the session from the registry and reports `Disconnected`.
    pub fn spawn_reader(
        &self,
        link: ClientLink,
        events: mpsc::Sender<SessionEvent>,
    ) -> JoinHandle<()> {
        let ClientLink {
            session,
            reader,
            registry,
        } = link;

        tokio::spawn(async move {
            let exit = run_read_loop(reader, session.address().clone(), &events).await;
            if let ReadLoopExit::Failed(e) = &exit {
                notify(&events, SessionEvent::Error(e.to_string()));
            }

            // False when a local disconnect already removed the entry.
            let remote = registry.remove_session(&session).await;
            notify(
                &events,
                SessionEvent::Disconnected {
                    address: session.address().clone(),
                    remote,
                },
            );
        })
    }
}

/// Deliver a state notification without waiting on a full channel.
fn notify(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = events.try_send(event) {
        debug!("Session event dropped: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::loopback::{LoopbackAir, LoopbackPlatform};
    use crate::bluetooth::platform::ServiceListener;
    use crate::bluetooth::registry::LinkState;

    const HOST: &str = "AA:AA:AA:AA:AA:AA";

    fn client_platform(air: &LoopbackAir) -> LoopbackPlatform {
        let platform = LoopbackPlatform::new(air, "CC:CC:CC:CC:CC:CC", "phone");
        platform.add_paired(Device::new("display-1", HOST));
        platform
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device_fails_and_leaves_registry_empty() {
        let air = LoopbackAir::new();
        let registry = ConnectionRegistry::new();
        let client = ClientSession::new(Arc::new(client_platform(&air)), registry.clone());

        let mut device = Device::new("", "00:00:00:00:00:00");
        let err = client.connect(&mut device).await.unwrap_err();
        assert!(matches!(err, BtError::DeviceNotFound(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.state(&device.address), LinkState::Absent);
        assert!(!device.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_listener_is_transport_failure() {
        let air = LoopbackAir::new();
        let registry = ConnectionRegistry::new();
        let client = ClientSession::new(Arc::new(client_platform(&air)), registry.clone());

        let mut device = Device::new("display-1", HOST);
        let err = client.connect(&mut device).await.unwrap_err();
        assert!(matches!(err, BtError::TransportFailure(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_marks_paired_and_reconnect_is_noop() {
        let air = LoopbackAir::new();
        let host = LoopbackPlatform::new(&air, HOST, "display-1");
        let _listener = host.listen_raw(SERVICE_UUID).unwrap();

        let platform = client_platform(&air);
        let registry = ConnectionRegistry::new();
        let client = ClientSession::new(Arc::new(platform.clone()), registry.clone());

        let mut device = Device::new("display-1", HOST);
        assert!(!device.is_paired);
        let link = client.connect(&mut device).await.unwrap().into_link();
        assert!(link.is_some());
        assert!(device.is_paired && device.is_connected);

        let again = client.connect(&mut device).await.unwrap();
        assert!(matches!(again, Connected::AlreadyConnected));
        assert_eq!(platform.transports_opened(&device.address), 1);

        client.disconnect(&mut device).await;
        client.disconnect(&mut device).await;
        assert!(registry.is_empty());
        assert!(!device.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_hangup_clears_registry() {
        let air = LoopbackAir::new();
        let host = LoopbackPlatform::new(&air, HOST, "display-1");
        let mut listener = host.listen_raw(SERVICE_UUID).unwrap();

        let platform = client_platform(&air);
        let registry = ConnectionRegistry::new();
        let client = ClientSession::new(Arc::new(platform.clone()), registry.clone());

        let mut device = Device::new("display-1", HOST);
        let mut link = client.connect(&mut device).await.unwrap().into_link().unwrap();

        // Host hangs up.
        drop(listener.accept().await.unwrap());
        assert!(link.next_message().await.unwrap_err().is_remote_closed());
        assert_eq!(registry.state(&device.address), LinkState::Absent);
        assert!(!registry.is_connected(&device.address));

        // The next connect opens a new link instead of reusing the dead one.
        let again = client.connect(&mut device).await.unwrap();
        assert!(matches!(again, Connected::Established(_)));
        assert_eq!(platform.transports_opened(&device.address), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_disconnect_stops_spawned_reader() {
        let air = LoopbackAir::new();
        let host = LoopbackPlatform::new(&air, HOST, "display-1");
        let _listener = host.listen_raw(SERVICE_UUID).unwrap();

        let registry = ConnectionRegistry::new();
        let client = ClientSession::new(Arc::new(client_platform(&air)), registry.clone());

        let mut device = Device::new("display-1", HOST);
        let link = client.connect(&mut device).await.unwrap().into_link().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let reader = client.spawn_reader(link, tx);

        client.disconnect(&mut device).await;
        reader.await.unwrap();

        match rx.recv().await.unwrap() {
            SessionEvent::Disconnected { address, remote } => {
                assert_eq!(address, device.address);
                assert!(!remote);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(registry.is_empty());
    }
}

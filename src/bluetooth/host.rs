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

//! Host role: advertise the service, accept one peer, exchange messages.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::codec::FrameCodec;
use super::device::{Device, DeviceAddress};
use super::error::{BtError, Result};
use super::platform::{BluetoothPlatform, ServiceListener, ServiceProvider};
use super::registry::{CommitOutcome, ConnectionRegistry};
use super::sdp::{ServiceRecord, DEFAULT_SERVICE_NAME};
use super::session::{run_read_loop, ReadLoopExit, Session, SessionEvent, SessionRole};
use super::transport::{CloseHandle, Transport};
use super::SERVICE_UUID;

/// Shown when sending with no peer attached.
pub const NO_CLIENT_WARNING: &str =
    "No clients connected, please wait for a client to connect before attempting to send a message";

/// Host session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    #[default]
    Idle,
    /// Provider created, setting up.
    Advertising,
    /// Listener bound and service advertised.
    Listening,
    /// Waiting for the peer.
    Accepting,
    Established,
    Closing,
}

impl HostState {
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Advertising | Self::Listening | Self::Accepting)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Established)
    }
}

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub service_uuid: Uuid,
    pub service_name: String,
    pub codec: FrameCodec,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            codec: FrameCodec::default(),
        }
    }
}

#[derive(Default)]
struct HostShared {
    state: HostState,
    /// Bumped on every start and teardown; background tasks holding an
    /// older value are stale.
    generation: u64,
    provider: Option<Box<dyn ServiceProvider>>,
    listener_close: Option<CloseHandle>,
    session: Option<Arc<Session>>,
}

struct HostInner {
    platform: Arc<dyn BluetoothPlatform>,
    registry: Arc<ConnectionRegistry>,
    config: HostConfig,
    events: mpsc::Sender<SessionEvent>,
    shared: Mutex<HostShared>,
}

/// Accepts exactly one inbound connection per `start()`.
#[derive(Clone)]
pub struct HostSession {
    inner: Arc<HostInner>,
}

impl HostSession {
    pub fn new(
        platform: Arc<dyn BluetoothPlatform>,
        registry: Arc<ConnectionRegistry>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self::with_config(platform, registry, events, HostConfig::default())
    }

    pub fn with_config(
        platform: Arc<dyn BluetoothPlatform>,
        registry: Arc<ConnectionRegistry>,
        events: mpsc::Sender<SessionEvent>,
        config: HostConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                platform,
                registry,
                config,
                events,
                shared: Mutex::new(HostShared::default()),
            }),
        }
    }

    pub fn state(&self) -> HostState {
        self.inner.shared.lock().state
    }

    pub fn is_listening(&self) -> bool {
        self.state().is_listening()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The attached peer, if any.
    pub fn peer(&self) -> Option<Device> {
        self.inner
            .shared
            .lock()
            .session
            .as_ref()
            .map(|session| session.device().clone())
    }

    /// Publish the service and start waiting for one peer.
    ///
    /// Only allowed while neither listening nor connected. Any failure
    /// returns the host to `Idle`.
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut shared = self.inner.shared.lock();
            if shared.state != HostState::Idle {
                return Err(BtError::InvalidState(format!(
                    "cannot start while {:?}",
                    shared.state
                )));
            }
            shared.generation += 1;
            shared.state = HostState::Advertising;
            shared.generation
        };
        self.emit(SessionEvent::HostStateChanged(HostState::Advertising));

        match self.open_service(generation).await {
            Ok(()) => {
                info!("Listening for incoming connections");
                Ok(())
            }
            Err(e) => {
                error!("Error while initializing RFCOMM server: {}", e);
                if self.reset_if_current(generation) {
                    self.emit(SessionEvent::Error(e.to_string()));
                    self.emit(SessionEvent::HostStateChanged(HostState::Idle));
                }
                Err(e)
            }
        }
    }

    async fn open_service(&self, generation: u64) -> Result<()> {
        let config = &self.inner.config;

        let mut provider = self
            .inner
            .platform
            .create_provider(config.service_uuid)
            .await
            .map_err(as_radio_error)?;

        let record = ServiceRecord::new(config.service_uuid, config.service_name.as_str())?;
        let listener = provider.bind_listener(&record).await?;

        if let Err(e) = provider.start_advertising().await {
            drop(listener);
            return Err(as_radio_error(e));
        }

        if !self.transition(generation, HostState::Listening) {
            Self::abandon(provider, listener).await;
            return Err(BtError::InvalidState("start cancelled".to_string()));
        }
        self.emit(SessionEvent::HostStateChanged(HostState::Listening));

        let close = CloseHandle::new();
        let stale_provider = {
            let mut shared = self.inner.shared.lock();
            if shared.generation == generation {
                shared.provider = Some(provider);
                shared.listener_close = Some(close.clone());
                shared.state = HostState::Accepting;
                None
            } else {
                Some(provider)
            }
        };
        if let Some(provider) = stale_provider {
            Self::abandon(provider, listener).await;
            return Err(BtError::InvalidState("start cancelled".to_string()));
        }
        self.emit(SessionEvent::HostStateChanged(HostState::Accepting));

        let host = self.clone();
        tokio::spawn(async move {
            host.accept_one(listener, close, generation).await;
        });
        Ok(())
    }

    async fn accept_one(
        self,
        mut listener: Box<dyn ServiceListener>,
        close: CloseHandle,
        generation: u64,
    ) {
        let accepted = tokio::select! {
            biased;
            _ = close.closed() => {
                debug!("Listener disposed before a peer attached");
                return;
            }
            result = listener.accept() => result,
        };
        // One peer per session.
        drop(listener);

        match accepted {
            Ok(transport) => self.on_accepted(transport, generation).await,
            Err(e) => {
                error!("Accept failed: {}", e);
                if self.is_current(generation) {
                    self.emit(SessionEvent::Error(format!(
                        "Error while establishing socket: {}",
                        e
                    )));
                    self.teardown(Some(generation), false).await;
                }
            }
        }
    }

    async fn on_accepted(&self, transport: Transport, generation: u64) {
        let provider = {
            let mut shared = self.inner.shared.lock();
            if shared.generation != generation {
                None
            } else {
                if let Some(close) = shared.listener_close.take() {
                    close.close();
                }
                Some(shared.provider.take())
            }
        };
        let Some(provider) = provider else {
            debug!("Dropping connection accepted by a stale listener");
            transport.close_handle().close();
            return;
        };
        if let Some(mut provider) = provider {
            if let Err(e) = provider.stop_advertising().await {
                warn!("Failed to stop advertising: {}", e);
            }
        }

        let peer = transport.peer().clone();
        info!("Connection from {}", peer);
        let device = self.resolve_device(&peer).await;

        let (session, reader) = Session::open(
            device.clone(),
            SessionRole::Host,
            transport,
            self.inner.config.codec,
        );
        let session = match self.inner.registry.commit(session) {
            CommitOutcome::Accepted(session) => session,
            CommitOutcome::Rejected(loser) => {
                warn!("{} already has a session, refusing", peer);
                loser.close().await;
                self.emit(SessionEvent::Error(
                    BtError::AlreadyConnected(peer.to_string()).to_string(),
                ));
                self.teardown(Some(generation), false).await;
                return;
            }
        };

        let attached = {
            let mut shared = self.inner.shared.lock();
            if shared.generation == generation {
                shared.session = Some(Arc::clone(&session));
                shared.state = HostState::Established;
                true
            } else {
                false
            }
        };
        if !attached {
            self.inner.registry.remove_session(&session).await;
            return;
        }

        info!("Connected to client: {}", device.display_name());
        self.emit(SessionEvent::HostStateChanged(HostState::Established));
        self.emit(SessionEvent::Connected {
            device,
            role: SessionRole::Host,
        });

        let exit = run_read_loop(reader, peer, &self.inner.events).await;
        if let ReadLoopExit::Failed(e) = exit {
            self.emit(SessionEvent::Error(e.to_string()));
        }
        self.teardown(Some(generation), true).await;
    }

    /// Send one message to the attached peer.
    ///
    /// Empty or whitespace-only text, or no attached peer, is refused with a
    /// warning event and nothing is written.
    pub async fn send(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            warn!("Refusing to send an empty message");
            self.emit(SessionEvent::Warning("There is no message to send".to_string()));
            return Err(BtError::InvalidArgument("message is empty".to_string()));
        }

        let session = self.inner.shared.lock().session.clone();
        let Some(session) = session else {
            warn!("Send with no client attached");
            self.emit(SessionEvent::Warning(NO_CLIENT_WARNING.to_string()));
            return Err(BtError::NotConnected);
        };

        session.send(text).await
    }

    /// Tear everything down and return to `Idle`. Idempotent.
    pub async fn disconnect(&self) {
        self.teardown(None, false).await;
    }

    /// Release advertising, listener, reader/writer and transport. Each
    /// release is attempted regardless of the others.
    async fn teardown(&self, expected: Option<u64>, remote: bool) {
        let (provider, listener_close, session, was) = {
            let mut shared = self.inner.shared.lock();
            if expected.is_some_and(|generation| generation != shared.generation) {
                return;
            }
            if matches!(shared.state, HostState::Idle | HostState::Closing) {
                return;
            }
            shared.generation += 1;
            let was = shared.state;
            shared.state = HostState::Closing;
            (
                shared.provider.take(),
                shared.listener_close.take(),
                shared.session.take(),
                was,
            )
        };
        debug!("Tearing down host session (was {:?})", was);
        self.emit(SessionEvent::HostStateChanged(HostState::Closing));

        if let Some(mut provider) = provider {
            if let Err(e) = provider.stop_advertising().await {
                warn!("Failed to stop advertising: {}", e);
            }
        }

        if let Some(close) = listener_close {
            close.close();
        }

        if let Some(session) = &session {
            self.inner.registry.remove_session(session).await;
        }

        self.inner.shared.lock().state = HostState::Idle;
        self.emit(SessionEvent::HostStateChanged(HostState::Idle));

        if let Some(session) = session {
            info!(
                "Client {} disconnected{}",
                session.address(),
                if remote { " (remote)" } else { "" }
            );
            self.emit(SessionEvent::Disconnected {
                address: session.address().clone(),
                remote,
            });
        }
    }

    async fn resolve_device(&self, peer: &DeviceAddress) -> Device {
        let name = match self.inner.platform.paired_devices().await {
            Ok(devices) => devices
                .into_iter()
                .find(|d| &d.address == peer)
                .map(|d| d.name)
                .unwrap_or_default(),
            Err(e) => {
                debug!("Could not resolve name for {}: {}", peer, e);
                String::new()
            }
        };

        let mut device = Device::new(name, peer.clone());
        device.is_paired = true;
        device.is_connected = true;
        device
    }

    fn transition(&self, generation: u64, state: HostState) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation {
            return false;
        }
        shared.state = state;
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.shared.lock().generation == generation
    }

    fn reset_if_current(&self, generation: u64) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation {
            return false;
        }
        shared.generation += 1;
        shared.state = HostState::Idle;
        true
    }

    async fn abandon(mut provider: Box<dyn ServiceProvider>, listener: Box<dyn ServiceListener>) {
        drop(listener);
        if let Err(e) = provider.stop_advertising().await {
            warn!("Failed to stop advertising: {}", e);
        }
    }

    /// Notifications never wait on the consumer; a full or closed channel
    /// drops the event.
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.inner.events.try_send(event) {
            debug!("Host event dropped: {}", e);
        }
    }
}

fn as_radio_error(err: BtError) -> BtError {
    match err {
        BtError::RadioUnavailable(_) => err,
        other => BtError::RadioUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::loopback::{LoopbackAir, LoopbackPlatform};
    use crate::bluetooth::sdp::SERVICE_NAME_ATTRIBUTE_ID;
    use std::time::Duration;

    const HOST: &str = "AA:AA:AA:AA:AA:AA";
    const PEER: &str = "BB:BB:BB:BB:BB:BB";

    struct Fixture {
        host_platform: LoopbackPlatform,
        peer_platform: LoopbackPlatform,
        registry: Arc<ConnectionRegistry>,
        host: HostSession,
        events: mpsc::Receiver<SessionEvent>,
    }

    fn fixture() -> Fixture {
        let air = LoopbackAir::new();
        let host_platform = LoopbackPlatform::new(&air, HOST, "display-host");
        let peer_platform = LoopbackPlatform::new(&air, PEER, "phone");
        let registry = ConnectionRegistry::new();
        let (tx, events) = mpsc::channel(64);
        let host = HostSession::new(Arc::new(host_platform.clone()), registry.clone(), tx);
        Fixture {
            host_platform,
            peer_platform,
            registry,
            host,
            events,
        }
    }

    async fn wait_for(
        events: &mut mpsc::Receiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_start_publishes_record_and_listens() {
        let mut f = fixture();
        f.host.start().await.unwrap();

        assert_eq!(f.host.state(), HostState::Accepting);
        assert!(f.host.is_listening());
        assert!(f.host_platform.is_advertising(SERVICE_UUID));

        let record = f.host_platform.published_record(SERVICE_UUID).unwrap();
        let attr = record.attribute(SERVICE_NAME_ATTRIBUTE_ID).unwrap();
        assert_eq!(&attr[2..], DEFAULT_SERVICE_NAME.as_bytes());

        let err = f.host.start().await.unwrap_err();
        assert!(matches!(err, BtError::InvalidState(_)));

        f.host.disconnect().await;
        assert_eq!(f.host.state(), HostState::Idle);
        assert!(!f.host_platform.is_advertising(SERVICE_UUID));
        wait_for(&mut f.events, |e| {
            matches!(e, SessionEvent::HostStateChanged(HostState::Idle))
        })
        .await;
    }

    #[tokio::test]
    async fn test_start_with_radio_off_returns_to_idle() {
        let f = fixture();
        f.host_platform.set_radio(false);

        let err = f.host.start().await.unwrap_err();
        assert!(matches!(err, BtError::RadioUnavailable(_)));
        assert_eq!(f.host.state(), HostState::Idle);
    }

    #[tokio::test]
    async fn test_accept_stops_advertising_and_exchanges() {
        let mut f = fixture();
        f.host.start().await.unwrap();

        let transport = f
            .peer_platform
            .connect_rfcomm(&DeviceAddress::new(HOST), SERVICE_UUID)
            .await
            .unwrap();
        let (peer, mut peer_reader) = Session::open(
            Device::new("display-host", HOST),
            SessionRole::Client,
            transport,
            FrameCodec::default(),
        );

        wait_for(&mut f.events, |e| matches!(e, SessionEvent::Connected { .. })).await;
        assert_eq!(f.host.state(), HostState::Established);
        assert!(!f.host_platform.is_advertising(SERVICE_UUID));
        assert!(f.registry.is_connected(&DeviceAddress::new(PEER)));

        peer.send("hello host").await.unwrap();
        match wait_for(&mut f.events, |e| {
            matches!(e, SessionEvent::MessageReceived { .. })
        })
        .await
        {
            SessionEvent::MessageReceived { from, text } => {
                assert_eq!(from.as_str(), PEER);
                assert_eq!(text, "hello host");
            }
            _ => unreachable!(),
        }

        f.host.send("  hello peer  ").await.unwrap();
        assert_eq!(peer_reader.next_message().await.unwrap(), "hello peer");

        // Peer hangs up; the host notices and returns to idle.
        peer.close().await;
        let event = wait_for(&mut f.events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert!(matches!(event, SessionEvent::Disconnected { remote: true, .. }));
        assert_eq!(f.host.state(), HostState::Idle);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_refusals() {
        let mut f = fixture();

        let err = f.host.send("   ").await.unwrap_err();
        assert!(matches!(err, BtError::InvalidArgument(_)));

        let err = f.host.send("hi").await.unwrap_err();
        assert!(matches!(err, BtError::NotConnected));
        let warning = wait_for(&mut f.events, |e| {
            matches!(e, SessionEvent::Warning(w) if w == NO_CLIENT_WARNING)
        })
        .await;
        assert!(matches!(warning, SessionEvent::Warning(_)));
    }

    #[tokio::test]
    async fn test_local_disconnect_during_session() {
        let mut f = fixture();
        f.host.start().await.unwrap();

        let transport = f
            .peer_platform
            .connect_rfcomm(&DeviceAddress::new(HOST), SERVICE_UUID)
            .await
            .unwrap();
        let (_peer, mut peer_reader) = Session::open(
            Device::new("display-host", HOST),
            SessionRole::Client,
            transport,
            FrameCodec::default(),
        );
        wait_for(&mut f.events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        f.host.disconnect().await;
        f.host.disconnect().await;
        assert_eq!(f.host.state(), HostState::Idle);
        assert!(f.registry.is_empty());

        let event = wait_for(&mut f.events, |e| {
            matches!(e, SessionEvent::Disconnected { .. })
        })
        .await;
        assert!(matches!(event, SessionEvent::Disconnected { remote: false, .. }));
        assert!(peer_reader.next_message().await.unwrap_err().is_remote_closed());

        // The host can listen again afterwards.
        f.host.start().await.unwrap();
        assert!(f.host.is_listening());
    }

    #[tokio::test]
    async fn test_disconnect_completes_with_full_event_channel() {
        let air = LoopbackAir::new();
        let host_platform = LoopbackPlatform::new(&air, HOST, "display-host");
        let peer_platform = LoopbackPlatform::new(&air, PEER, "phone");
        let registry = ConnectionRegistry::new();
        let (tx, mut events) = mpsc::channel(4);
        let host = HostSession::new(Arc::new(host_platform), registry.clone(), tx);
        host.start().await.unwrap();

        let transport = peer_platform
            .connect_rfcomm(&DeviceAddress::new(HOST), SERVICE_UUID)
            .await
            .unwrap();
        let (peer, mut peer_reader) = Session::open(
            Device::new("display-host", HOST),
            SessionRole::Client,
            transport,
            FrameCodec::default(),
        );

        // Nobody drains the channel while the peer keeps talking.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !host.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        for i in 0..10 {
            peer.send(&format!("message {}", i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), host.disconnect())
            .await
            .expect("disconnect blocked on the event channel");
        assert_eq!(host.state(), HostState::Idle);
        assert!(registry.is_empty());
        assert!(peer_reader.next_message().await.unwrap_err().is_remote_closed());

        // Once the backlog is drained the host works normally again.
        while events.try_recv().is_ok() {}
        host.start().await.unwrap();
        assert!(host.is_listening());
        host.disconnect().await;
    }
}

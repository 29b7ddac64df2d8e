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

//! One live data session and its read loop.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::codec::{frame, FrameCodec, FrameReader, FrameWriter};
use super::device::{Device, DeviceAddress};
use super::error::{BtError, Result};
use super::host::HostState;
use super::transport::{CloseHandle, Transport};

/// Which side opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Host,
}

/// Notifications for whoever renders the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session established.
    Connected { device: Device, role: SessionRole },
    /// Message received, in wire order.
    MessageReceived { from: DeviceAddress, text: String },
    /// Session torn down. `remote` is true when the peer went away.
    Disconnected { address: DeviceAddress, remote: bool },
    /// Host state machine moved.
    HostStateChanged(HostState),
    /// User-visible warning, nothing failed.
    Warning(String),
    /// Error occurred.
    Error(String),
}

/// An active transport to exactly one device.
///
/// The read direction is handed out once at creation; the write direction
/// stays here behind an async mutex so there is only ever one writer.
pub struct Session {
    device: Device,
    role: SessionRole,
    opened_at: DateTime<Utc>,
    close: CloseHandle,
    writer: Mutex<FrameWriter>,
}

impl Session {
    /// Bind a codec to `transport` and wrap it as a session.
    pub fn open(
        device: Device,
        role: SessionRole,
        transport: Transport,
        codec: FrameCodec,
    ) -> (Self, FrameReader) {
        let (reader, writer, close) = frame(transport, codec);
        let session = Self {
            device,
            role,
            opened_at: Utc::now(),
            close,
            writer: Mutex::new(writer),
        };
        (session, reader)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.device.address
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    /// Send one message frame.
    pub async fn send(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(text).await
    }

    /// Flip the close flag. Non-blocking; pending reads and writes return.
    pub(crate) fn signal_close(&self) -> bool {
        self.close.close()
    }

    /// Close the session: signal, then shut down the write direction.
    /// Errors are logged, never propagated.
    pub async fn close(&self) {
        self.signal_close();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.device.address, e);
        }

        let elapsed = Utc::now() - self.opened_at;
        info!(
            "Session with {} closed after {}s",
            self.device.address,
            elapsed.num_seconds()
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.device.address)
            .field("role", &self.role)
            .field("opened_at", &self.opened_at)
            .field("closed", &self.close.is_closed())
            .finish()
    }
}

/// Why a read loop stopped.
#[derive(Debug)]
pub enum ReadLoopExit {
    /// Peer disconnected, malformed frame, or transport closed locally.
    RemoteClosed,
    /// I/O fault.
    Failed(BtError),
}

/// Deliver messages from `reader` until the transport goes away.
///
/// Never returns an error; the exit reason tells the owner how to tear down.
pub async fn run_read_loop(
    mut reader: FrameReader,
    from: DeviceAddress,
    events: &mpsc::Sender<SessionEvent>,
) -> ReadLoopExit {
    info!("Read loop started for {}", from);

    loop {
        match reader.next_message().await {
            Ok(text) => {
                debug!("Received from {}: {}", from, text);
                let event = SessionEvent::MessageReceived {
                    from: from.clone(),
                    text,
                };
                // A slow consumer must not keep a closed session alive.
                tokio::select! {
                    result = events.send(event) => {
                        if result.is_err() {
                            warn!("Event receiver dropped, message discarded");
                        }
                    }
                    _ = reader.closed() => {
                        info!("Connection with {} closed while delivering", from);
                        return ReadLoopExit::RemoteClosed;
                    }
                }
            }
            Err(BtError::RemoteClosed) => {
                info!("Connection with {} closed", from);
                return ReadLoopExit::RemoteClosed;
            }
            Err(e) => {
                error!("Read error from {}: {}", from, e);
                return ReadLoopExit::Failed(e);
            }
        }
    }
}

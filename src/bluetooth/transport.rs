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

//! Duplex byte-stream transport with an out-of-band close signal.
//!
//! Closing a transport never blocks: it flips a watch flag that every pending
//! frame read or write is racing against, so a read parked on a silent peer
//! returns `RemoteClosed` as soon as anyone closes the transport.

use std::any::Any;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use super::device::DeviceAddress;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Anything that must stay alive as long as the transport does
/// (e.g. a profile registration backing the socket).
pub type TransportGuard = Box<dyn Any + Send>;

/// Shared close flag for one transport.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Close the transport. Returns `true` for the first caller only.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the transport has been closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// An open duplex stream to one remote device.
pub struct Transport {
    peer: DeviceAddress,
    reader: BoxedReader,
    writer: BoxedWriter,
    close: CloseHandle,
    guard: Option<TransportGuard>,
}

impl Transport {
    /// Build a transport from already split halves.
    pub fn new<R, W>(peer: DeviceAddress, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer,
            reader: Box::new(reader),
            writer: Box::new(writer),
            close: CloseHandle::new(),
            guard: None,
        }
    }

    /// Build a transport from a single duplex stream.
    pub fn from_stream<S>(peer: DeviceAddress, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(peer, reader, writer)
    }

    /// Keep `guard` alive until the writer half is released.
    pub fn with_guard(mut self, guard: TransportGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn peer(&self) -> &DeviceAddress {
        &self.peer
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.close.is_closed()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        DeviceAddress,
        BoxedReader,
        BoxedWriter,
        CloseHandle,
        Option<TransportGuard>,
    ) {
        (self.peer, self.reader, self.writer, self.close, self.guard)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("closed", &self.close.is_closed())
            .finish()
    }
}

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

//! Error kinds reported by the Bluetooth session layer.

use std::io;
use thiserror::Error;

/// Errors surfaced by the connection and session layer.
#[derive(Debug, Error)]
pub enum BtError {
    /// The target address is not in the platform's paired set.
    #[error("device {0} is not paired")]
    DeviceNotFound(String),

    /// A session for the address already exists.
    ///
    /// Connect treats this as success; it only surfaces from lower-level
    /// registry operations.
    #[error("device {0} is already connected")]
    AlreadyConnected(String),

    /// The radio is off, or the service provider could not be created.
    #[error("Bluetooth radio unavailable: {0}")]
    RadioUnavailable(String),

    /// Connect, accept, read or write raised an I/O-level fault.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The peer ended the stream or sent a malformed frame.
    #[error("remote closed the connection")]
    RemoteClosed,

    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No transport is attached.
    #[error("no active connection")]
    NotConnected,

    /// Operation not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl BtError {
    /// Wrap any displayable fault as a transport failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::TransportFailure(err.to_string())
    }

    /// Whether this error means the peer went away.
    pub fn is_remote_closed(&self) -> bool {
        matches!(self, Self::RemoteClosed)
    }
}

impl From<io::Error> for BtError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Self::RemoteClosed,
            _ => Self::TransportFailure(err.to_string()),
        }
    }
}

/// Result alias for the Bluetooth layer.
pub type Result<T, E = BtError> = std::result::Result<T, E>;

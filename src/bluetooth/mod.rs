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

//! Bluetooth communication module.
//!
//! Point-to-point RFCOMM sessions carrying length-prefixed UTF-8 messages,
//! in either the client role (connect to a paired device) or the host role
//! (advertise the service and accept one peer).

mod advertiser;
mod bluez;
mod client;
mod codec;
mod device;
mod error;
mod host;
mod loopback;
mod platform;
mod registry;
mod sdp;
mod session;
mod transport;

use uuid::Uuid;

pub use advertiser::{HostAdvertiser, DEFAULT_DISCOVERABLE_SECS, HOST_STARTUP_DISCOVERABLE_SECS};
pub use bluez::{BluezPlatform, DEFAULT_RFCOMM_CHANNEL};
pub use client::{ClientLink, ClientSession, Connected, DEFAULT_CONNECT_TIMEOUT, SETTLE_DELAY};
pub use codec::{
    frame, FrameCodec, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES, LENGTH_PREFIX_LEN,
};
pub use device::{Device, DeviceAddress, DeviceCatalog};
pub use error::{BtError, Result};
pub use host::{HostConfig, HostSession, HostState, NO_CLIENT_WARNING};
pub use loopback::{LoopbackAir, LoopbackListener, LoopbackPlatform};
pub use platform::{BluetoothPlatform, ServiceListener, ServiceProvider};
pub use registry::{BeginConnect, CommitOutcome, ConnectPermit, ConnectionRegistry, LinkState};
pub use sdp::{
    encode_service_name, ServiceRecord, DEFAULT_SERVICE_NAME, SERVICE_NAME_ATTRIBUTE_ID,
    SERVICE_NAME_ATTRIBUTE_TYPE,
};
pub use session::{run_read_loop, ReadLoopExit, Session, SessionEvent, SessionRole};
pub use transport::{CloseHandle, Transport};

/// RFCOMM service both roles agree on.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x34B1CF4D_1069_4AD6_89B6_E161D79BE4D8);

/// Name prefix the client looks for when picking a device.
pub const DEFAULT_DEVICE_PREFIX: &str = "display";

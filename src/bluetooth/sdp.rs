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

//! Service record attributes published by the host.

use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::error::{BtError, Result};

/// SDP attribute id of the service name.
pub const SERVICE_NAME_ATTRIBUTE_ID: u16 = 0x0100;

/// SDP data element type for a text string with a one-byte length
/// (`(4 << 3) | 5`).
pub const SERVICE_NAME_ATTRIBUTE_TYPE: u8 = 0x25;

/// Default human-readable service name.
pub const DEFAULT_SERVICE_NAME: &str = "Bluetooth Rfcomm Chat Service";

/// Encode a service name attribute: type tag, UTF-8 length, UTF-8 bytes.
pub fn encode_service_name(name: &str) -> Result<Vec<u8>> {
    let bytes = name.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| {
        BtError::InvalidArgument(format!(
            "service name is {} bytes, at most 255 allowed",
            bytes.len()
        ))
    })?;

    let mut attr = Vec::with_capacity(2 + bytes.len());
    attr.push(SERVICE_NAME_ATTRIBUTE_TYPE);
    attr.push(len);
    attr.extend_from_slice(bytes);
    Ok(attr)
}

/// Service description attached to the host listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub service_uuid: Uuid,
    pub service_name: String,
    /// Raw attributes keyed by attribute id.
    pub attributes: BTreeMap<u16, Vec<u8>>,
}

impl ServiceRecord {
    pub fn new(service_uuid: Uuid, service_name: impl Into<String>) -> Result<Self> {
        let service_name = service_name.into();
        let name_attr = encode_service_name(&service_name)?;
        debug!(
            "SDP service name attribute 0x{:04x}: {}",
            SERVICE_NAME_ATTRIBUTE_ID,
            hex::encode(&name_attr)
        );

        let mut attributes = BTreeMap::new();
        attributes.insert(SERVICE_NAME_ATTRIBUTE_ID, name_attr);

        Ok(Self {
            service_uuid,
            service_name,
            attributes,
        })
    }

    pub fn attribute(&self, id: u16) -> Option<&[u8]> {
        self.attributes.get(&id).map(Vec::as_slice)
    }
}

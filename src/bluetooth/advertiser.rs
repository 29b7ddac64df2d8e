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

//! Host discoverability control.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::error::{BtError, Result};
use super::platform::BluetoothPlatform;

/// Discoverability window used when none (or zero) is requested.
pub const DEFAULT_DISCOVERABLE_SECS: u32 = 120;

/// Window the host requests at startup when it has no paired peers.
pub const HOST_STARTUP_DISCOVERABLE_SECS: u32 = 300;

/// Toggles local discoverability and reports paired-peer counts.
pub struct HostAdvertiser {
    platform: Arc<dyn BluetoothPlatform>,
    toggle_lock: Mutex<()>,
}

impl HostAdvertiser {
    pub fn new(platform: Arc<dyn BluetoothPlatform>) -> Self {
        Self {
            platform,
            toggle_lock: Mutex::new(()),
        }
    }

    /// Request discoverability for `window_seconds` (`None` or `0` means
    /// [`DEFAULT_DISCOVERABLE_SECS`]).
    ///
    /// Returns the requested `enabled` value as the new displayed state. The
    /// platform's answer is not verified; a refusal is only logged.
    pub async fn toggle_discoverability(
        &self,
        enabled: bool,
        window_seconds: Option<i64>,
    ) -> Result<bool> {
        let window = match window_seconds {
            Some(secs) if secs < 0 => {
                return Err(BtError::InvalidArgument(format!(
                    "discoverability window must be non-negative, got {}",
                    secs
                )))
            }
            None | Some(0) => DEFAULT_DISCOVERABLE_SECS,
            Some(secs) => u32::try_from(secs).map_err(|_| {
                BtError::InvalidArgument(format!("discoverability window {} is too large", secs))
            })?,
        };

        let _guard = self.toggle_lock.lock().await;
        match self.platform.request_discoverable(enabled, window).await {
            Ok(()) => info!(
                "Discoverability {} requested for {}s",
                if enabled { "on" } else { "off" },
                window
            ),
            Err(e) => warn!("Discoverability request not honored: {}", e),
        }

        Ok(enabled)
    }

    pub async fn paired_device_count(&self) -> Result<usize> {
        Ok(self.platform.paired_devices().await?.len())
    }

    /// The host only advertises while it has no paired peers.
    pub async fn should_advertise(&self) -> Result<bool> {
        Ok(self.paired_device_count().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::device::Device;
    use crate::bluetooth::loopback::{LoopbackAir, LoopbackPlatform};

    fn host() -> LoopbackPlatform {
        LoopbackPlatform::new(&LoopbackAir::new(), "AA:AA:AA:AA:AA:AA", "host")
    }

    #[tokio::test]
    async fn test_negative_window_rejected() {
        let platform = host();
        let advertiser = HostAdvertiser::new(Arc::new(platform.clone()));

        let err = advertiser
            .toggle_discoverability(true, Some(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, BtError::InvalidArgument(_)));
        assert!(platform.discoverable().is_none());
    }

    #[tokio::test]
    async fn test_zero_or_missing_window_uses_default() {
        let platform = host();
        let advertiser = HostAdvertiser::new(Arc::new(platform.clone()));

        assert!(advertiser.toggle_discoverability(true, None).await.unwrap());
        assert_eq!(platform.discoverable(), Some((true, DEFAULT_DISCOVERABLE_SECS)));

        advertiser.toggle_discoverability(true, Some(0)).await.unwrap();
        assert_eq!(platform.discoverable(), Some((true, DEFAULT_DISCOVERABLE_SECS)));

        advertiser.toggle_discoverability(true, Some(300)).await.unwrap();
        assert_eq!(platform.discoverable(), Some((true, 300)));
    }

    #[tokio::test]
    async fn test_optimistic_when_radio_off() {
        let platform = host();
        platform.set_radio(false);
        let advertiser = HostAdvertiser::new(Arc::new(platform));

        assert!(advertiser.toggle_discoverability(true, None).await.unwrap());
        assert!(!advertiser.toggle_discoverability(false, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_should_advertise_only_without_peers() {
        let platform = host();
        let advertiser = HostAdvertiser::new(Arc::new(platform.clone()));
        assert_eq!(advertiser.paired_device_count().await.unwrap(), 0);
        assert!(advertiser.should_advertise().await.unwrap());

        platform.add_paired(Device::new("phone", "BB:BB:BB:BB:BB:BB"));
        assert_eq!(advertiser.paired_device_count().await.unwrap(), 1);
        assert!(!advertiser.should_advertise().await.unwrap());
    }
}

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

//! Registry of active sessions, at most one per device address.
//!
//! Every critical section is a membership check, an insert or a remove.
//! Nothing that can block (connect, accept, read, write, socket shutdown)
//! runs while the lock is held.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::device::DeviceAddress;
use super::session::Session;

/// Per-address connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Absent,
    Connecting,
    Connected,
}

/// Outcome of [`ConnectionRegistry::try_begin_connect`].
pub enum BeginConnect {
    /// A session already exists; nothing else to do.
    AlreadyConnected,
    /// Caller may attempt a physical connect.
    Proceed(ConnectPermit),
}

/// Outcome of [`ConnectionRegistry::commit`].
pub enum CommitOutcome {
    Accepted(Arc<Session>),
    /// Another session won the race. The caller owns the loser and must
    /// close it.
    Rejected(Session),
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<DeviceAddress, Arc<Session>>,
    connecting: HashMap<DeviceAddress, usize>,
}

/// Maps device address to its single live session.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically check for an existing session and, if none, admit the
    /// caller to a connect attempt.
    pub fn try_begin_connect(self: &Arc<Self>, address: &DeviceAddress) -> BeginConnect {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(address) {
            return BeginConnect::AlreadyConnected;
        }

        *inner.connecting.entry(address.clone()).or_insert(0) += 1;
        BeginConnect::Proceed(ConnectPermit {
            registry: Arc::clone(self),
            address: address.clone(),
        })
    }

    /// Insert `session` only if its address is still absent.
    /// First committer wins.
    pub fn commit(&self, session: Session) -> CommitOutcome {
        let mut inner = self.inner.lock();
        let address = session.address().clone();

        if inner.sessions.contains_key(&address) {
            debug!("Commit for {} rejected: already connected", address);
            return CommitOutcome::Rejected(session);
        }

        let session = Arc::new(session);
        inner.sessions.insert(address.clone(), Arc::clone(&session));
        info!("Session registered for {} ({:?})", address, session.role());
        CommitOutcome::Accepted(session)
    }

    /// Remove and close the session for `address`. Idempotent.
    ///
    /// The entry disappears and the transport's close flag flips in the same
    /// critical section; the socket shutdown runs after the lock is released.
    pub async fn remove(&self, address: &DeviceAddress) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.sessions.remove(address);
            if let Some(ref session) = removed {
                session.signal_close();
            }
            removed
        };

        match removed {
            Some(session) => {
                session.close().await;
                info!("Session removed for {}", address);
                true
            }
            None => false,
        }
    }

    /// Remove `session` only if it is still the registered entry for its
    /// address.
    pub async fn remove_session(&self, session: &Arc<Session>) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.sessions.get(session.address()) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    session.signal_close();
                    inner.sessions.remove(session.address())
                }
                _ => None,
            }
        };

        session.close().await;
        match removed {
            Some(_) => {
                info!("Session removed for {}", session.address());
                true
            }
            None => {
                debug!("Session for {} was no longer registered", session.address());
                false
            }
        }
    }

    pub fn is_connected(&self, address: &DeviceAddress) -> bool {
        !address.is_empty() && self.inner.lock().sessions.contains_key(address)
    }

    pub fn state(&self, address: &DeviceAddress) -> LinkState {
        let inner = self.inner.lock();
        if inner.sessions.contains_key(address) {
            LinkState::Connected
        } else if inner.connecting.contains_key(address) {
            LinkState::Connecting
        } else {
            LinkState::Absent
        }
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<Arc<Session>> {
        self.inner.lock().sessions.get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.inner.lock().sessions.keys().cloned().collect()
    }

    fn end_attempt(&self, address: &DeviceAddress) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.connecting.get_mut(address) {
            *count -= 1;
            if *count == 0 {
                inner.connecting.remove(address);
            }
        }
    }
}

/// Admission to one connect attempt. Dropping it ends the attempt.
pub struct ConnectPermit {
    registry: Arc<ConnectionRegistry>,
    address: DeviceAddress,
}

impl ConnectPermit {
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Commit the connected session; see [`ConnectionRegistry::commit`].
    pub fn commit(self, session: Session) -> CommitOutcome {
        self.registry.commit(session)
    }
}

impl Drop for ConnectPermit {
    fn drop(&mut self) {
        self.registry.end_attempt(&self.address);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for established sessions.
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::crypto::x25519::PublicKey;
use crate::identity::{DeviceId, DeviceKey, UserId};
use crate::session::{Session, SessionId};
use crate::traits::SessionStore;

#[derive(Clone, Debug, Default)]
struct InnerMemorySessionStore {
    /// Most recent session per device.
    sessions: HashMap<DeviceKey, Session>,

    /// Most recent session id per remote identity key.
    session_ids: HashMap<PublicKey, SessionId>,
}

impl InnerMemorySessionStore {
    fn insert(&mut self, device: DeviceKey, session: Session) {
        self.session_ids
            .insert(*session.their_identity_key(), session.session_id().clone());
        self.sessions.insert(device, session);
    }
}

/// An in-memory store for established sessions.
///
/// `MemorySessionStore` can be shared between tasks and threads, clones point at the same
/// underlying store.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<InnerMemorySessionStore>>,
}

impl MemorySessionStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices we have a session with.
    pub fn len(&self) -> usize {
        self.read_store().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_store().sessions.is_empty()
    }

    fn read_store(&self) -> RwLockReadGuard<'_, InnerMemorySessionStore> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemorySessionStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }
}

impl SessionStore for MemorySessionStore {
    type Error = Infallible;

    async fn session_id(&self, identity_key: &PublicKey) -> Result<Option<SessionId>, Self::Error> {
        Ok(self.read_store().session_ids.get(identity_key).cloned())
    }

    async fn session(&self, device: &DeviceKey) -> Result<Option<Session>, Self::Error> {
        Ok(self.read_store().sessions.get(device).cloned())
    }

    async fn record_session(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        session: Session,
    ) -> Result<(), Self::Error> {
        let mut store = self.write_store();
        store.insert(DeviceKey::new(user_id.clone(), device_id.clone()), session);
        Ok(())
    }

    async fn record_sessions(
        &self,
        sessions: Vec<(DeviceKey, Session)>,
    ) -> Result<(), Self::Error> {
        // One write lock for the whole batch.
        let mut store = self.write_store();
        for (device, session) in sessions {
            store.insert(device, session);
        }
        Ok(())
    }
}

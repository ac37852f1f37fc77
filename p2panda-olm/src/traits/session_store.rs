// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::crypto::x25519::PublicKey;
use crate::identity::{DeviceId, DeviceKey, UserId};
use crate::session::{Session, SessionId};

/// Interface for persisting established sessions with remote devices.
///
/// Implementations are plain lookup and insert, they do not validate sessions. Access is not
/// assumed to be exclusive: concurrent callers can record sessions for the same device, in which
/// case the last write wins.
pub trait SessionStore {
    type Error: Error;

    /// Returns the id of the most recently recorded session with the device owning the given
    /// identity key.
    ///
    /// Returns `None` if no session was established with that device yet.
    fn session_id(
        &self,
        identity_key: &PublicKey,
    ) -> impl Future<Output = Result<Option<SessionId>, Self::Error>>;

    /// Returns the most recently recorded session with a device.
    fn session(
        &self,
        device: &DeviceKey,
    ) -> impl Future<Output = Result<Option<Session>, Self::Error>>;

    /// Records a newly established session with a device, replacing it as the most recent one.
    fn record_session(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        session: Session,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Records a batch of newly established sessions.
    ///
    /// Implementations must apply the batch as a whole: on error none of the sessions may be
    /// recorded.
    fn record_sessions(
        &self,
        sessions: Vec<(DeviceKey, Session)>,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifiers and public key snapshots of remote devices.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::ed25519::VerifyingKey;
use crate::crypto::x25519::PublicKey;

/// Identifier of a user who can own many devices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a device, unique per user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference under which this device's Ed25519 signatures are published, for example
    /// `ed25519:JLAFKJWSCS`.
    pub fn signing_key_reference(&self) -> String {
        format!("ed25519:{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Composite key addressing exactly one device of one user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

impl DeviceKey {
    pub fn new(user_id: impl Into<UserId>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.user_id, self.device_id)
    }
}

/// Snapshot of a remote device's public keys, as known from the device directory.
///
/// Devices without an identity key can not be addressed and are ignored when establishing
/// sessions. Devices without a fingerprint can never pass one-time key verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    user_id: UserId,
    device_id: DeviceId,
    identity_key: Option<PublicKey>,
    fingerprint: Option<VerifyingKey>,
}

impl DeviceIdentity {
    pub fn new(
        user_id: impl Into<UserId>,
        device_id: impl Into<DeviceId>,
        identity_key: Option<PublicKey>,
        fingerprint: Option<VerifyingKey>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            identity_key,
            fingerprint,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Long-term Curve25519 identity key of this device.
    pub fn identity_key(&self) -> Option<&PublicKey> {
        self.identity_key.as_ref()
    }

    /// Long-term Ed25519 signing key of this device.
    pub fn fingerprint(&self) -> Option<&VerifyingKey> {
        self.fingerprint.as_ref()
    }

    pub fn device_key(&self) -> DeviceKey {
        DeviceKey::new(self.user_id.clone(), self.device_id.clone())
    }
}

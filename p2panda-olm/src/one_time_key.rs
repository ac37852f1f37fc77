// SPDX-License-Identifier: MIT OR Apache-2.0

//! Published one-time keys and their canonical, signable representation.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::x25519::{PublicKey, X25519Error};
use crate::identity::UserId;

/// Algorithm of a one-time key as announced by the key-claim service.
///
/// Only `signed_curve25519` keys are used for establishing sessions, every other algorithm is
/// skipped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OneTimeKeyAlgorithm {
    /// Curve25519 key signed by the device's Ed25519 key.
    SignedCurve25519,

    /// Unsigned Curve25519 key.
    Curve25519,

    /// Any algorithm we don't know about.
    Other(String),
}

impl OneTimeKeyAlgorithm {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SignedCurve25519 => "signed_curve25519",
            Self::Curve25519 => "curve25519",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for OneTimeKeyAlgorithm {
    fn from(value: String) -> Self {
        match value.as_str() {
            "signed_curve25519" => Self::SignedCurve25519,
            "curve25519" => Self::Curve25519,
            _ => Self::Other(value),
        }
    }
}

impl From<OneTimeKeyAlgorithm> for String {
    fn from(value: OneTimeKeyAlgorithm) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for OneTimeKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signatures over a key payload, grouped by the signing user and then by signing key reference
/// (`ed25519:<device id>`).
pub type Signatures = BTreeMap<UserId, BTreeMap<String, String>>;

/// One-time key of a remote device as returned by a claim.
///
/// The key is consumed by establishing exactly one session with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedKey {
    algorithm: OneTimeKeyAlgorithm,
    key_id: String,
    key: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    fallback: bool,
    #[serde(default)]
    signatures: Signatures,
}

/// Key object as it is signed by the owning device.
#[derive(Serialize)]
struct KeyObject<'a> {
    key: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    fallback: bool,
    signatures: &'a Signatures,
}

impl ClaimedKey {
    pub fn new(
        algorithm: OneTimeKeyAlgorithm,
        key_id: impl Into<String>,
        key: impl Into<String>,
        fallback: bool,
        signatures: Signatures,
    ) -> Self {
        Self {
            algorithm,
            key_id: key_id.into(),
            key: key.into(),
            fallback,
            signatures,
        }
    }

    pub fn algorithm(&self) -> &OneTimeKeyAlgorithm {
        &self.algorithm
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Hex-encoded Curve25519 key value.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns `true` if the device published this key as a fallback once its one-time keys ran
    /// out.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    /// Returns the signature `user_id` made with the key `signing_key_reference`, if any.
    pub fn signature(&self, user_id: &UserId, signing_key_reference: &str) -> Option<&str> {
        self.signatures
            .get(user_id)
            .and_then(|signatures| signatures.get(signing_key_reference))
            .map(String::as_str)
    }

    pub fn public_key(&self) -> Result<PublicKey, X25519Error> {
        PublicKey::from_hex(&self.key)
    }

    /// Canonical JSON of the key object with all signatures stripped. This is the exact byte
    /// sequence which was signed by the owning device.
    pub fn signable_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(KeyObject {
            key: &self.key,
            fallback: self.fallback,
            signatures: &self.signatures,
        })?;
        canonical_json(&value)
    }

    pub(crate) fn add_signature(
        &mut self,
        user_id: UserId,
        signing_key_reference: String,
        signature: String,
    ) {
        self.signatures
            .entry(user_id)
            .or_default()
            .insert(signing_key_reference, signature);
    }
}

/// Encodes a JSON value in canonical form: object keys sorted lexicographically, no insignificant
/// whitespace and the top-level `signatures` and `unsigned` fields removed.
pub fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    let value = match value {
        Value::Object(object) => {
            let mut object = object.clone();
            object.remove("signatures");
            object.remove("unsigned");
            sorted(Value::Object(object))
        }
        value => sorted(value.clone()),
    };
    serde_json::to_string(&value)
}

/// Re-inserts all object keys in sorted order, independent of how `serde_json` orders maps.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut object = Map::new();
            for (key, value) in entries {
                object.insert(key, sorted(value));
            }
            Value::Object(object)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(sorted).collect()),
        value => value,
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives used for establishing Olm sessions.
//!
//! Curve25519 (X25519) keys are used for the Diffie-Hellman key agreement, Ed25519 keys for
//! signing published one-time keys. Root and chain keys are derived with HKDF-SHA256.
pub mod ed25519;
pub mod hkdf;
mod rng;
pub mod secret;
pub mod sha2;
pub mod x25519;

pub use rng::{Rng, RngError};

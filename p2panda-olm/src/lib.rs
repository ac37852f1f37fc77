// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-olm` establishes pairwise Olm sessions with remote devices before anything can be
//! encrypted towards them.
//!
//! Given a set of remote devices, the crate figures out which of them we already share a session
//! with, claims one-time keys for all others from a key-claim service in a single batch, verifies
//! that each claimed key was signed by the device owning it and finally derives a new session
//! using Olm's triple Diffie-Hellman handshake.
//!
//! Partial failures are expected in this setting: devices may have run out of one-time keys, the
//! service may hand out keys of an algorithm we don't support, or signatures don't check out.
//! Such devices are logged and left out of the result, all other devices still get their
//! sessions. Only failing to reach the key-claim service at all, after a bounded number of
//! retries, is reported as an error.
//!
//! ## Usage
//!
//! The crate is transport and storage agnostic. Applications provide a [`KeyClaimClient`] which
//! talks to their key-claim service and a [`SessionStore`] persisting established sessions. An
//! in-memory store is available with [`MemorySessionStore`].
//!
//! ```ignore
//! let ensurer = SessionEnsurer::new(account, store, client, EnsureConfig::default(), rng);
//! let outcomes = ensurer.ensure_sessions(&devices_by_user, false).await?;
//!
//! for (device, outcome) in outcomes {
//!     // Encrypt towards `device` using `outcome.session_id()`.
//! }
//! ```
//!
//! ## Security
//!
//! A session is never established with a one-time key which was not verified against the
//! long-term Ed25519 key of the device owning it. Otherwise the key-claim service could
//! substitute keys of its own and read all messages sent through the resulting session.
//!
//! Root and chain keys are kept in zeroising containers and never show up in `Debug` output.
//!
//! Message encryption (the double ratchet), tracking device lists and verifying devices
//! out-of-band are not part of this crate.
mod account;
mod claim;
mod config;
pub mod crypto;
mod ensure;
mod identity;
mod memory;
mod one_time_key;
mod session;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;
mod verify;

pub use account::{Account, AccountError};
pub use claim::{ClaimError, ClaimRequest, ClaimResponse, claim_one_time_keys};
pub use config::{EnsureConfig, ONE_TIME_KEYS_RETRY_COUNT};
pub use crypto::{Rng, RngError};
pub use ensure::{EnsureError, SessionEnsurer, SessionOutcome};
pub use identity::{DeviceId, DeviceIdentity, DeviceKey, UserId};
pub use memory::MemorySessionStore;
pub use one_time_key::{ClaimedKey, OneTimeKeyAlgorithm, Signatures, canonical_json};
pub use session::{Session, SessionError, SessionId, SessionRole};
pub use traits::{KeyClaimClient, SessionStore};
pub use verify::{VerificationError, verify_one_time_key};

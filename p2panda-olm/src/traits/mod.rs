// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to the collaborators of the session ensurer.
mod key_claim;
mod session_store;

pub use key_claim::KeyClaimClient;
pub use session_store::SessionStore;

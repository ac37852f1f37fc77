// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-based Extract-and-Expand Key Derivation Function (HKDF) with SHA2-256.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// Derives `N` bytes of output key material from the input key material.
///
/// An empty salt is treated as a string of zeroes, as defined by the RFC.
pub fn hkdf<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N], HkdfError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidLength(N))?;
    Ok(okm)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("invalid output length {0} for hkdf-sha256")]
    InvalidLength(usize),
}

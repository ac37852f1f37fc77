// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::claim::{ClaimRequest, ClaimResponse};

/// Transport to the remote service where devices publish their one-time keys.
///
/// Every successful claim consumes the returned one-time keys on the service. A device which has
/// no keys left is simply missing from the response, this is not an error.
pub trait KeyClaimClient {
    type Error: Error;

    /// Sends one claim request and returns the service's response.
    fn claim(
        &self,
        request: &ClaimRequest,
    ) -> impl Future<Output = Result<ClaimResponse, Self::Error>>;

    /// Returns `true` if the request failed for a reason which might go away when trying again,
    /// for example a network error or an unavailable service.
    ///
    /// Every error is considered transient by default.
    fn is_transient(_error: &Self::Error) -> bool {
        true
    }
}

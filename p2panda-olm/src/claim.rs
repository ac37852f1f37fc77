// SPDX-License-Identifier: MIT OR Apache-2.0

//! Claiming one-time keys of remote devices with bounded retry.
use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::identity::DeviceKey;
use crate::one_time_key::{ClaimedKey, OneTimeKeyAlgorithm};
use crate::traits::KeyClaimClient;

/// Batch of devices we want to claim one one-time key each for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRequest {
    one_time_keys: BTreeMap<DeviceKey, OneTimeKeyAlgorithm>,
    timeout: Duration,
}

impl ClaimRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            one_time_keys: BTreeMap::new(),
            timeout,
        }
    }

    /// Adds a device to the batch, replacing the algorithm if it was already part of it.
    pub fn insert(&mut self, device: DeviceKey, algorithm: OneTimeKeyAlgorithm) {
        self.one_time_keys.insert(device, algorithm);
    }

    pub fn one_time_keys(&self) -> &BTreeMap<DeviceKey, OneTimeKeyAlgorithm> {
        &self.one_time_keys
    }

    pub fn contains(&self, device: &DeviceKey) -> bool {
        self.one_time_keys.contains_key(device)
    }

    pub fn len(&self) -> usize {
        self.one_time_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.one_time_keys.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// One-time keys returned by the remote service.
///
/// Devices without any published keys left are missing from the response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClaimResponse {
    one_time_keys: BTreeMap<DeviceKey, ClaimedKey>,
    failures: BTreeMap<String, String>,
}

impl ClaimResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: DeviceKey, key: ClaimedKey) {
        self.one_time_keys.insert(device, key);
    }

    /// Remembers that the remote service could not reach `server` to claim keys from it.
    pub fn insert_failure(&mut self, server: impl Into<String>, reason: impl Into<String>) {
        self.failures.insert(server.into(), reason.into());
    }

    pub fn get(&self, device: &DeviceKey) -> Option<&ClaimedKey> {
        self.one_time_keys.get(device)
    }

    pub fn one_time_keys(&self) -> &BTreeMap<DeviceKey, ClaimedKey> {
        &self.one_time_keys
    }

    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }
}

/// Sends the claim request, retrying on transient failures.
///
/// Makes at most `remaining_retry` attempts. Between attempts we wait `retry_interval`, doubling
/// it after every failure. Errors the client does not consider transient are returned right away.
///
/// An empty response is a valid answer and never retried.
pub async fn claim_one_time_keys<C>(
    client: &C,
    request: &ClaimRequest,
    remaining_retry: u8,
    retry_interval: Duration,
) -> Result<ClaimResponse, ClaimError>
where
    C: KeyClaimClient,
{
    let mut remaining_retry = remaining_retry;
    let mut retry_interval = retry_interval;
    let mut attempts: u8 = 0;

    loop {
        if remaining_retry == 0 {
            return Err(ClaimError::NoAttempts);
        }
        remaining_retry -= 1;
        attempts += 1;

        match client.claim(request).await {
            Ok(response) => {
                for (server, reason) in response.failures() {
                    warn!("failed to claim one-time keys from server {server}: {reason}");
                }
                debug!(
                    "claimed {} one-time keys for {} devices after {attempts} attempt(s)",
                    response.one_time_keys().len(),
                    request.len(),
                );
                return Ok(response);
            }
            Err(err) if !C::is_transient(&err) => {
                return Err(ClaimError::Rejected(err.to_string()));
            }
            Err(err) if remaining_retry == 0 => {
                return Err(ClaimError::RetriesExhausted {
                    attempts,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                warn!(
                    "claiming one-time keys failed (attempt {attempts}, {remaining_retry} left), \
                    retry in {retry_interval:?}: {err}"
                );
                sleep(retry_interval).await;
                retry_interval = retry_interval.saturating_mul(2);
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("no attempts left to claim one-time keys")]
    NoAttempts,

    #[error("claiming one-time keys failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u8, reason: String },

    #[error("claiming one-time keys was rejected: {0}")]
    Rejected(String),
}

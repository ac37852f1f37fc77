// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use crate::one_time_key::OneTimeKeyAlgorithm;

/// Number of attempts at claiming one-time keys before giving up.
pub const ONE_TIME_KEYS_RETRY_COUNT: u8 = 3;

const RETRY_INTERVAL: Duration = Duration::from_millis(500);
const CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration parameters for establishing sessions with remote devices.
#[derive(Clone, Debug)]
pub struct EnsureConfig {
    /// Maximum number of attempts at claiming one-time keys from the remote service.
    ///
    /// Default: 3.
    pub(crate) claim_retry_attempts: u8,

    /// Interval to wait after the first failed claim attempt. The interval doubles after every
    /// further failure.
    ///
    /// Default: 500 milliseconds.
    pub(crate) retry_interval: Duration,

    /// Maximum time the remote service should spend on collecting one-time keys from other
    /// servers before answering.
    ///
    /// Default: 10 seconds.
    pub(crate) claim_timeout: Duration,
}

impl EnsureConfig {
    /// Return a default instance of `EnsureConfig`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Define the maximum number of attempts at claiming one-time keys.
    pub fn claim_retry_attempts(mut self, attempts: u8) -> Self {
        self.claim_retry_attempts = attempts;
        self
    }

    /// Define the interval to wait after the first failed claim attempt.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Define the timeout passed on to the remote service with every claim.
    pub fn claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Algorithm of one-time keys we're claiming.
    ///
    /// This is fixed, keys of other algorithms can't be used to establish sessions.
    pub fn one_time_key_algorithm(&self) -> OneTimeKeyAlgorithm {
        OneTimeKeyAlgorithm::SignedCurve25519
    }
}

impl Default for EnsureConfig {
    fn default() -> Self {
        Self {
            claim_retry_attempts: ONE_TIME_KEYS_RETRY_COUNT,
            retry_interval: RETRY_INTERVAL,
            claim_timeout: CLAIM_TIMEOUT,
        }
    }
}

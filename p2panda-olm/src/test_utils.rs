// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities: an in-memory key-claim service and logging setup.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::account::Account;
use crate::claim::{ClaimRequest, ClaimResponse};
use crate::crypto::Rng;
use crate::identity::DeviceKey;
use crate::one_time_key::ClaimedKey;
use crate::traits::KeyClaimClient;

/// Prints logs to stderr when `RUST_LOG` is set, for example `RUST_LOG=p2panda_olm=debug`.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Kinds of failures `TestKeyServer` can be told to answer with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClaimFailure {
    /// Network or service error, worth retrying.
    Transient,

    /// Request was rejected, retrying won't help.
    Permanent,
}

#[derive(Debug, Error)]
pub enum TestClaimError {
    #[error("key server unavailable")]
    Unavailable,

    #[error("key server rejected claim")]
    Rejected,
}

#[derive(Debug, Default)]
struct InnerKeyServer {
    published: HashMap<DeviceKey, VecDeque<ClaimedKey>>,
    failures: VecDeque<ClaimFailure>,
    unreachable_servers: Vec<(String, String)>,
    requests: Vec<ClaimRequest>,
}

/// In-memory key-claim service.
///
/// Hands out published keys in the order they were published, one per device and claim. The
/// requested algorithm is ignored, which allows tests to simulate services returning keys we
/// can't use.
#[derive(Clone, Debug, Default)]
pub struct TestKeyServer {
    inner: Arc<Mutex<InnerKeyServer>>,
}

impl TestKeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, InnerKeyServer> {
        self.inner.lock().expect("acquire lock on key server")
    }

    /// Publishes one-time keys for a device.
    pub fn publish(&self, device: DeviceKey, keys: impl IntoIterator<Item = ClaimedKey>) {
        self.inner()
            .published
            .entry(device)
            .or_default()
            .extend(keys);
    }

    /// Generates `count` one-time keys for the account and publishes them.
    pub fn publish_account_keys(&self, account: &mut Account, count: usize, rng: &Rng) {
        let keys = account
            .generate_one_time_keys(count, rng)
            .expect("generate one-time keys");
        let device = DeviceKey::new(account.user_id().clone(), account.device_id().clone());
        self.publish(device, keys);
    }

    /// Answers the next claim with the given failure. Failures queue up.
    pub fn fail_next(&self, failure: ClaimFailure) {
        self.inner().failures.push_back(failure);
    }

    /// Reports `server` as unreachable in every successful response.
    pub fn unreachable_server(&self, server: &str, reason: &str) {
        self.inner()
            .unreachable_servers
            .push((server.to_string(), reason.to_string()));
    }

    /// Number of claims received, including failed ones.
    pub fn claim_count(&self) -> usize {
        self.inner().requests.len()
    }

    /// All claims received so far.
    pub fn requests(&self) -> Vec<ClaimRequest> {
        self.inner().requests.clone()
    }

    /// Number of keys of a device which have not been claimed yet.
    pub fn remaining_keys(&self, device: &DeviceKey) -> usize {
        self.inner()
            .published
            .get(device)
            .map(VecDeque::len)
            .unwrap_or_default()
    }
}

impl KeyClaimClient for TestKeyServer {
    type Error = TestClaimError;

    async fn claim(&self, request: &ClaimRequest) -> Result<ClaimResponse, Self::Error> {
        let mut inner = self.inner();
        inner.requests.push(request.clone());

        match inner.failures.pop_front() {
            Some(ClaimFailure::Transient) => return Err(TestClaimError::Unavailable),
            Some(ClaimFailure::Permanent) => return Err(TestClaimError::Rejected),
            None => (),
        }

        let mut response = ClaimResponse::new();
        for device in request.one_time_keys().keys() {
            if let Some(key) = inner
                .published
                .get_mut(device)
                .and_then(VecDeque::pop_front)
            {
                response.insert(device.clone(), key);
            }
        }
        for (server, reason) in &inner.unreachable_servers {
            response.insert_failure(server.clone(), reason.clone());
        }

        Ok(response)
    }

    fn is_transient(error: &Self::Error) -> bool {
        matches!(error, TestClaimError::Unavailable)
    }
}

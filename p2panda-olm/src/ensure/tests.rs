// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::account::Account;
use crate::claim::ClaimError;
use crate::config::EnsureConfig;
use crate::crypto::Rng;
use crate::crypto::x25519::PublicKey;
use crate::identity::{DeviceId, DeviceIdentity, DeviceKey, UserId};
use crate::memory::MemorySessionStore;
use crate::one_time_key::{ClaimedKey, OneTimeKeyAlgorithm};
use crate::session::{Session, SessionId};
use crate::test_utils::{ClaimFailure, TestKeyServer, setup_logging};
use crate::traits::SessionStore;

use super::{EnsureError, SessionEnsurer, SessionOutcome};

type TestEnsurer = SessionEnsurer<MemorySessionStore, TestKeyServer>;

fn setup(config: EnsureConfig) -> (TestEnsurer, TestKeyServer, MemorySessionStore) {
    let store = MemorySessionStore::new();
    let (ensurer, server) = setup_with_store(config, store.clone());
    (ensurer, server, store)
}

fn setup_with_store<S: SessionStore>(
    config: EnsureConfig,
    store: S,
) -> (SessionEnsurer<S, TestKeyServer>, TestKeyServer) {
    setup_logging();

    let rng = Rng::from_seed([1; 32]);
    let alice = Account::new("@alice:p2panda.org", "ALICE", &rng).unwrap();
    let server = TestKeyServer::new();

    let ensurer = SessionEnsurer::new(alice, store, server.clone(), config, rng);
    (ensurer, server)
}

#[derive(Debug, Error)]
#[error("session store unavailable")]
struct StoreUnavailable;

/// Writes into a memory store, optionally stalling or failing before doing so.
#[derive(Clone, Debug, Default)]
struct FaultyStore {
    inner: MemorySessionStore,
    fail_writes: bool,
    write_delay: Duration,
}

impl SessionStore for FaultyStore {
    type Error = StoreUnavailable;

    async fn session_id(&self, identity_key: &PublicKey) -> Result<Option<SessionId>, Self::Error> {
        let Ok(session_id) = self.inner.session_id(identity_key).await;
        Ok(session_id)
    }

    async fn session(&self, device: &DeviceKey) -> Result<Option<Session>, Self::Error> {
        let Ok(session) = self.inner.session(device).await;
        Ok(session)
    }

    async fn record_session(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        session: Session,
    ) -> Result<(), Self::Error> {
        self.record_sessions(vec![(
            DeviceKey::new(user_id.clone(), device_id.clone()),
            session,
        )])
        .await
    }

    async fn record_sessions(
        &self,
        sessions: Vec<(DeviceKey, Session)>,
    ) -> Result<(), Self::Error> {
        tokio::time::sleep(self.write_delay).await;
        if self.fail_writes {
            return Err(StoreUnavailable);
        }
        let Ok(()) = self.inner.record_sessions(sessions).await;
        Ok(())
    }
}

fn config() -> EnsureConfig {
    EnsureConfig::new().retry_interval(Duration::ZERO)
}

fn devices_by_user(devices: &[DeviceIdentity]) -> BTreeMap<UserId, Vec<DeviceIdentity>> {
    let mut map: BTreeMap<UserId, Vec<DeviceIdentity>> = BTreeMap::new();
    for device in devices {
        map.entry(device.user_id().clone())
            .or_default()
            .push(device.clone());
    }
    map
}

fn device_key(account: &Account) -> DeviceKey {
    DeviceKey::new(account.user_id().clone(), account.device_id().clone())
}

#[tokio::test]
async fn existing_and_new_sessions() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob_1 = Account::new("@bob:p2panda.org", "BOB_1", &rng).unwrap();
    let mut bob_2 = Account::new("@bob:p2panda.org", "BOB_2", &rng).unwrap();
    server.publish_account_keys(&mut bob_1, 5, &rng);
    server.publish_account_keys(&mut bob_2, 5, &rng);

    // We already share a session with Bob's first device.
    let bob_1_keys = bob_1.generate_one_time_keys(1, &rng).unwrap();
    let existing = ensurer
        .account()
        .create_outbound_session(&bob_1.identity_key(), bob_1_keys[0].key(), &rng)
        .unwrap();
    store
        .record_session(bob_1.user_id(), bob_1.device_id(), existing.clone())
        .await
        .unwrap();

    let devices = devices_by_user(&[bob_1.device_identity(), bob_2.device_identity()]);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes.get(&device_key(&bob_1)),
        Some(&SessionOutcome::Existing {
            device: bob_1.device_identity(),
            session_id: existing.session_id().clone(),
        })
    );
    let new_session = outcomes.get(&device_key(&bob_2)).unwrap();
    assert!(new_session.is_established());
    assert_eq!(new_session.device(), &bob_2.device_identity());

    // Exactly one claim, only for the device without a session.
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].len(), 1);
    assert!(requests[0].contains(&device_key(&bob_2)));
    assert_eq!(
        requests[0].one_time_keys().get(&device_key(&bob_2)),
        Some(&OneTimeKeyAlgorithm::SignedCurve25519)
    );
    assert_eq!(server.remaining_keys(&device_key(&bob_1)), 5);
    assert_eq!(server.remaining_keys(&device_key(&bob_2)), 4);

    // New session got recorded.
    assert_eq!(
        store.session_id(&bob_2.identity_key()).await.unwrap().as_ref(),
        Some(new_session.session_id())
    );
}

#[tokio::test]
async fn bob_completes_the_session() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);

    let outcomes = ensurer
        .ensure_sessions(&devices_by_user(&[bob.device_identity()]), false)
        .await
        .unwrap();
    let session_id = outcomes.get(&device_key(&bob)).unwrap().session_id();

    // Bob receives our identity and base key with the first pre-key message.
    let session = store.session(&device_key(&bob)).await.unwrap().unwrap();
    let bob_session = bob
        .create_inbound_session(
            &ensurer.account().identity_key(),
            session.base_key(),
            session.one_time_key(),
        )
        .unwrap();

    assert_eq!(bob_session.session_id(), session_id);
}

#[tokio::test]
async fn force_new_session() {
    let (ensurer, server, _store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 2, &rng);
    let devices = devices_by_user(&[bob.device_identity()]);

    let first = ensurer.ensure_sessions(&devices, false).await.unwrap();
    let forced = ensurer.ensure_sessions(&devices, true).await.unwrap();

    // Device was claimed again, even though we had a session.
    assert_eq!(server.claim_count(), 2);
    assert!(server.requests()[1].contains(&device_key(&bob)));

    let first = first.get(&device_key(&bob)).unwrap();
    let forced = forced.get(&device_key(&bob)).unwrap();
    assert!(forced.is_established());
    assert_ne!(first.session_id(), forced.session_id());
}

#[tokio::test]
async fn second_call_does_not_claim() {
    let (ensurer, server, _store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();
    server.publish_account_keys(&mut bob, 2, &rng);
    server.publish_account_keys(&mut charlie, 2, &rng);
    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);

    let first = ensurer.ensure_sessions(&devices, false).await.unwrap();
    assert_eq!(server.claim_count(), 1);
    assert!(first.values().all(SessionOutcome::is_established));

    let second = ensurer.ensure_sessions(&devices, false).await.unwrap();
    assert_eq!(server.claim_count(), 1);
    assert_eq!(second.len(), 2);
    for (key, outcome) in &second {
        assert!(!outcome.is_established());
        assert_eq!(outcome.session_id(), first.get(key).unwrap().session_id());
    }
}

#[tokio::test]
async fn device_without_identity_key() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);

    let device = DeviceIdentity::new(
        bob.user_id().clone(),
        bob.device_id().clone(),
        None,
        Some(bob.fingerprint()),
    );
    let outcomes = ensurer
        .ensure_sessions(&devices_by_user(&[device]), false)
        .await
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(server.claim_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn unsupported_algorithm() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();

    // Valid signature, but the service hands out a key of another algorithm.
    let key = bob.generate_one_time_keys(1, &rng).unwrap().remove(0);
    let key = ClaimedKey::new(
        OneTimeKeyAlgorithm::Curve25519,
        key.key_id(),
        key.key(),
        false,
        key.signatures().clone(),
    );
    server.publish(device_key(&bob), [key]);
    server.publish_account_keys(&mut charlie, 1, &rng);

    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.get(&device_key(&charlie)).unwrap().is_established());
    assert!(!outcomes.contains_key(&device_key(&bob)));
    assert_eq!(store.session_id(&bob.identity_key()).await.unwrap(), None);
}

#[tokio::test]
async fn missing_one_time_key() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();
    server.publish_account_keys(&mut charlie, 1, &rng);

    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();

    assert_eq!(server.requests()[0].len(), 2);
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.contains_key(&device_key(&charlie)));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn invalid_signatures_never_create_sessions() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();

    // Key signed by someone pretending to be Bob's device.
    let mut mallory = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut mallory, 1, &rng);

    // Charlie's key without any signature.
    let key = charlie.generate_one_time_keys(1, &rng).unwrap().remove(0);
    let unsigned = ClaimedKey::new(
        OneTimeKeyAlgorithm::SignedCurve25519,
        key.key_id(),
        key.key(),
        false,
        BTreeMap::new(),
    );
    server.publish(device_key(&charlie), [unsigned]);

    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();

    assert!(outcomes.is_empty());
    assert!(store.is_empty());

    // Bob's real keys are fine.
    server.publish_account_keys(&mut bob, 1, &rng);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.contains_key(&device_key(&bob)));
}

#[tokio::test]
async fn malformed_key_material() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();

    // Correctly signed, but a low-order point can't be used for the key agreement.
    let mut key = ClaimedKey::new(
        OneTimeKeyAlgorithm::SignedCurve25519,
        "00000000",
        hex::encode([0u8; 32]),
        false,
        BTreeMap::new(),
    );
    let signature = bob.sign(key.signable_json().unwrap().as_bytes());
    key.add_signature(
        bob.user_id().clone(),
        bob.device_id().signing_key_reference(),
        signature.to_hex(),
    );
    server.publish(device_key(&bob), [key]);

    let outcomes = ensurer
        .ensure_sessions(&devices_by_user(&[bob.device_identity()]), false)
        .await
        .unwrap();

    assert_eq!(server.claim_count(), 1);
    assert!(outcomes.is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn retries_exhausted() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.publish_account_keys(&mut charlie, 1, &rng);

    // We have a session with Bob already.
    let devices = devices_by_user(&[bob.device_identity()]);
    ensurer.ensure_sessions(&devices, false).await.unwrap();
    assert_eq!(store.len(), 1);

    for _ in 0..3 {
        server.fail_next(ClaimFailure::Transient);
    }

    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);
    let result = ensurer.ensure_sessions(&devices, false).await;

    // No partial result, even though we knew about Bob's session.
    assert!(matches!(
        result,
        Err(EnsureError::Claim(ClaimError::RetriesExhausted {
            attempts: 3,
            ..
        }))
    ));
    assert_eq!(server.claim_count(), 4);
    assert_eq!(store.len(), 1);
    assert_eq!(server.remaining_keys(&device_key(&charlie)), 1);
}

#[tokio::test]
async fn recovers_from_transient_failure() {
    let (ensurer, server, _store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.fail_next(ClaimFailure::Transient);
    server.unreachable_server("other.server", "timeout");

    let outcomes = ensurer
        .ensure_sessions(&devices_by_user(&[bob.device_identity()]), false)
        .await
        .unwrap();

    assert_eq!(server.claim_count(), 2);
    assert!(outcomes.get(&device_key(&bob)).unwrap().is_established());
}

#[tokio::test]
async fn permanent_failure() {
    let (ensurer, server, _store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.fail_next(ClaimFailure::Permanent);

    let result = ensurer
        .ensure_sessions(&devices_by_user(&[bob.device_identity()]), false)
        .await;

    assert!(matches!(
        result,
        Err(EnsureError::Claim(ClaimError::Rejected(_)))
    ));
    assert_eq!(server.claim_count(), 1);
}

#[tokio::test]
async fn duplicate_devices() {
    let (ensurer, server, _store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 2, &rng);

    let devices = devices_by_user(&[bob.device_identity(), bob.device_identity()]);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(server.requests()[0].len(), 1);
    assert_eq!(server.remaining_keys(&device_key(&bob)), 1);
}

#[tokio::test]
async fn no_devices() {
    let (ensurer, server, _store) = setup(config());

    let outcomes = ensurer
        .ensure_sessions(&BTreeMap::new(), false)
        .await
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(server.claim_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_waiting_for_retry() {
    let config = EnsureConfig::new().retry_interval(Duration::from_secs(60));
    let (ensurer, server, store) = setup(config);
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.fail_next(ClaimFailure::Transient);

    // Give up while waiting for the retry.
    let devices = devices_by_user(&[bob.device_identity()]);
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        ensurer.ensure_sessions(&devices, false),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(server.claim_count(), 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_recording_sessions() {
    let store = FaultyStore {
        write_delay: Duration::from_secs(60),
        ..Default::default()
    };
    let (ensurer, server) = setup_with_store(config(), store.clone());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.publish_account_keys(&mut charlie, 1, &rng);

    // Keys got claimed and verified, we give up while the store is still busy.
    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        ensurer.ensure_sessions(&devices, false),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(server.claim_count(), 1);
    assert_eq!(server.remaining_keys(&device_key(&bob)), 0);
    assert!(store.inner.is_empty());
}

#[tokio::test]
async fn failing_store_records_nothing() {
    let store = FaultyStore {
        fail_writes: true,
        ..Default::default()
    };
    let (ensurer, server) = setup_with_store(config(), store.clone());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.publish_account_keys(&mut charlie, 1, &rng);

    let devices = devices_by_user(&[bob.device_identity(), charlie.device_identity()]);
    let result = ensurer.ensure_sessions(&devices, false).await;

    assert!(matches!(result, Err(EnsureError::Store(_))));
    assert!(store.inner.is_empty());
    assert_eq!(
        store.inner.session_id(&bob.identity_key()).await.unwrap(),
        None
    );
    assert_eq!(
        store.inner.session_id(&charlie.identity_key()).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn device_listed_under_other_user() {
    let (ensurer, server, store) = setup(config());
    let rng = Rng::from_seed([2; 32]);

    let mut bob = Account::new("@bob:p2panda.org", "BOB", &rng).unwrap();
    let mut charlie = Account::new("@charlie:p2panda.org", "CHARLIE", &rng).unwrap();
    server.publish_account_keys(&mut bob, 1, &rng);
    server.publish_account_keys(&mut charlie, 1, &rng);

    // Charlie's device shows up in Bob's device list.
    let devices = BTreeMap::from([(
        bob.user_id().clone(),
        vec![bob.device_identity(), charlie.device_identity()],
    )]);
    let outcomes = ensurer.ensure_sessions(&devices, false).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.contains_key(&device_key(&bob)));
    assert_eq!(server.requests()[0].len(), 1);
    assert!(!server.requests()[0].contains(&device_key(&charlie)));
    assert_eq!(server.remaining_keys(&device_key(&charlie)), 1);
    assert_eq!(store.len(), 1);
}

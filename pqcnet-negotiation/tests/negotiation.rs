use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pqcnet_negotiation::adapters::Ed25519Backend;
use pqcnet_negotiation::audit::{RecordingSink, ReputationTracker, SecurityEvent, SecurityEventSink};
use pqcnet_negotiation::backend::BackendRegistry;
use pqcnet_negotiation::catalog::AlgorithmCatalog;
use pqcnet_negotiation::error::{NegotiationError, PeerRole, ValidationError};
use pqcnet_negotiation::negotiator::{NegotiationContext, Negotiator};
use pqcnet_negotiation::policy::SecurityRequirements;
use pqcnet_negotiation::preferences::{
    AlgorithmPreferences, PreferenceSigner, SignedAlgorithmPreferences,
};
use pqcnet_negotiation::replay::NonceReplayGuard;
use pqcnet_negotiation::types::{
    AlgorithmCategory, AlgorithmId, AlgorithmMetadata, AlgorithmStatus, EncryptionAlgorithm,
    PreferenceNonce, SecurityLevel, SignatureAlgorithm, TimestampMs,
};
use pqcnet_negotiation::validator::ValidationWindow;
use pretty_assertions::assert_eq;

const NOW: TimestampMs = 1_700_000_000_000;
const ML_DSA_87: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::MlDsa87);
const FALCON_1024: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::Falcon1024);
const ECDSA_P256: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::EcdsaP256);

struct Harness {
    catalog: Arc<AlgorithmCatalog>,
    backends: Arc<BackendRegistry>,
    events: Arc<RecordingSink>,
    initiator: PreferenceSigner,
    responder: PreferenceSigner,
    nonces: AtomicUsize,
}

impl Harness {
    fn new() -> Self {
        Self {
            catalog: Arc::new(AlgorithmCatalog::with_builtins()),
            backends: Arc::new(BackendRegistry::with_reference_backends()),
            events: Arc::new(RecordingSink::new()),
            initiator: signer(0x11),
            responder: signer(0x22),
            nonces: AtomicUsize::new(0),
        }
    }

    fn negotiator(&self) -> Negotiator {
        self.negotiator_with_events(self.events.clone())
    }

    fn negotiator_with_events(&self, events: Arc<dyn SecurityEventSink>) -> Negotiator {
        let ctx = NegotiationContext::new(
            self.catalog.clone(),
            self.backends.clone(),
            Arc::new(NonceReplayGuard::new(1_024, 64)),
        )
        .with_events(events);
        Negotiator::new(
            ctx,
            ValidationWindow::new(Duration::from_secs(300), Duration::from_secs(30)),
        )
    }

    fn prefs(&self) -> AlgorithmPreferences {
        AlgorithmPreferences::from_catalog(&self.catalog.snapshot(), 1, 2)
    }

    fn sign(
        &self,
        signer: &PreferenceSigner,
        prefs: AlgorithmPreferences,
        timestamp: TimestampMs,
    ) -> SignedAlgorithmPreferences {
        let counter = self.nonces.fetch_add(1, Ordering::Relaxed) as u64;
        let mut nonce = [0u8; 32];
        nonce[..8].copy_from_slice(&counter.to_le_bytes());
        signer
            .sign_with_nonce(prefs, timestamp, PreferenceNonce(nonce))
            .unwrap()
    }

    fn pair(
        &self,
        init: AlgorithmPreferences,
        resp: AlgorithmPreferences,
    ) -> (SignedAlgorithmPreferences, SignedAlgorithmPreferences) {
        (
            self.sign(&self.initiator, init, NOW),
            self.sign(&self.responder, resp, NOW),
        )
    }
}

fn signer(seed: u8) -> PreferenceSigner {
    let (sk, pk) = Ed25519Backend::keypair_from_seed([seed; 32]);
    PreferenceSigner::new(Arc::new(Ed25519Backend), sk, pk)
}

#[test]
fn initiator_order_wins_over_responder_order() {
    let h = Harness::new();
    let mut init = h.prefs();
    init.signature = vec![AlgorithmId::ML_DSA_65, ML_DSA_87, AlgorithmId::ED25519];
    let mut resp = h.prefs();
    resp.signature = vec![AlgorithmId::ED25519, ML_DSA_87, AlgorithmId::ML_DSA_65];
    let (init, resp) = h.pair(init, resp);

    let result = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::default(), NOW)
        .unwrap();
    assert_eq!(result.selected.signature, AlgorithmId::ML_DSA_65);
}

#[test]
fn post_quantum_mandate_rejects_classical_only_responder() {
    let h = Harness::new();
    let mut resp = h.prefs();
    resp.signature = vec![AlgorithmId::ED25519, ECDSA_P256];
    let (init, resp) = h.pair(h.prefs(), resp);

    let err = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::post_quantum(), NOW)
        .unwrap_err();
    assert_eq!(
        err,
        NegotiationError::NoCommonAlgorithm {
            category: AlgorithmCategory::Signature
        }
    );
}

#[test]
fn post_quantum_mandate_selects_only_quantum_resistant_winners() {
    let h = Harness::new();
    let (init, resp) = h.pair(h.prefs(), h.prefs());
    let result = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::post_quantum(), NOW)
        .unwrap();
    let snapshot = h.catalog.snapshot();
    for id in result.selected.as_array() {
        assert!(snapshot.lookup(&id).unwrap().quantum_resistant, "{id}");
    }
}

#[test]
fn stale_preferences_are_expired() {
    let h = Harness::new();
    let init = h.sign(&h.initiator, h.prefs(), NOW - 400_000);
    let resp = h.sign(&h.responder, h.prefs(), NOW);

    let err = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::default(), NOW)
        .unwrap_err();
    assert_eq!(
        err,
        NegotiationError::Validation {
            role: PeerRole::Initiator,
            source: ValidationError::ExpiredPreferences {
                timestamp: NOW - 400_000,
                now: NOW,
            },
        }
    );
}

#[test]
fn broken_algorithm_is_never_selected() {
    let h = Harness::new();
    h.catalog.emergency_break(AlgorithmId::ML_DSA_65).unwrap();

    let mut init = h.prefs();
    init.signature = vec![AlgorithmId::ML_DSA_65, ML_DSA_87];
    let mut resp = h.prefs();
    resp.signature = vec![AlgorithmId::ML_DSA_65, FALCON_1024];
    let (init, resp) = h.pair(init, resp);

    let err = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::default(), NOW)
        .unwrap_err();
    assert_eq!(
        err,
        NegotiationError::NoCommonAlgorithm {
            category: AlgorithmCategory::Signature
        }
    );
}

#[test]
fn replayed_preferences_fail_without_blacklisting_the_signer() {
    let h = Harness::new();
    let tracker = Arc::new(ReputationTracker::default());
    let negotiator = h.negotiator_with_events(tracker.clone());
    let (init, resp) = h.pair(h.prefs(), h.prefs());
    let policy = SecurityRequirements::default();

    negotiator.negotiate_at(&init, &resp, &policy, NOW).unwrap();
    for offset in [1_000, 2_000, 3_000] {
        let err = negotiator
            .negotiate_at(&init, &resp, &policy, NOW + offset)
            .unwrap_err();
        assert_eq!(
            err.validation(),
            Some((PeerRole::Initiator, &ValidationError::ReplayedNonce))
        );
    }
    // Anyone on the path can resend a captured declaration.
    assert_eq!(tracker.standing(&init.signer_key).unverified_reports, 3);
    assert!(!tracker.is_blacklisted(&init.signer_key));
}

#[test]
fn forged_declarations_cannot_blacklist_the_named_key() {
    let h = Harness::new();
    let tracker = Arc::new(ReputationTracker::default());
    let negotiator = h.negotiator_with_events(tracker.clone());
    let policy = SecurityRequirements::default();
    let victim = h.responder.public_key().clone();

    for attempt in 0..5u64 {
        let (init, mut forged) = h.pair(h.prefs(), h.prefs());
        forged.signature = vec![0; 64];
        assert_eq!(forged.signer_key, victim);
        let err = negotiator
            .negotiate_at(&init, &forged, &policy, NOW + attempt)
            .unwrap_err();
        assert_eq!(
            err.validation(),
            Some((PeerRole::Responder, &ValidationError::InvalidSignature))
        );
    }
    assert!(!tracker.is_blacklisted(&victim));
    assert!(tracker.blacklisted().is_empty());

    // The victim can still negotiate with its real key.
    let (init, resp) = h.pair(h.prefs(), h.prefs());
    negotiator.negotiate_at(&init, &resp, &policy, NOW).unwrap();
}

#[test]
fn concurrent_replays_succeed_exactly_once() {
    let h = Harness::new();
    let negotiator = h.negotiator();
    let (init, resp) = h.pair(h.prefs(), h.prefs());
    let policy = SecurityRequirements::default();
    let successes = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                if negotiator.negotiate_at(&init, &resp, &policy, NOW).is_ok() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    let replays = h
        .events
        .events()
        .into_iter()
        .filter(|event| matches!(event, SecurityEvent::ReplayedNonce { .. }))
        .count();
    assert_eq!(replays, 7);
}

#[test]
fn both_sides_derive_the_same_transcript() {
    let h = Harness::new();
    let (init, resp) = h.pair(h.prefs(), h.prefs());
    let policy = SecurityRequirements::default();

    let local = h.negotiator().negotiate_at(&init, &resp, &policy, NOW).unwrap();
    let remote = h.negotiator().negotiate_at(&init, &resp, &policy, NOW).unwrap();
    assert_eq!(local, remote);
    local.verify_peer_transcript(&remote.transcript).unwrap();

    // Same preferences pinned to an older version bind differently.
    let (init, resp) = h.pair(h.prefs(), h.prefs());
    let pinned = SecurityRequirements {
        pinned_protocol_version: Some(1),
        ..SecurityRequirements::default()
    };
    let downgraded = h.negotiator().negotiate_at(&init, &resp, &pinned, NOW).unwrap();
    assert_eq!(downgraded.protocol_version, 1);
    let err = local
        .verify_peer_transcript(&downgraded.transcript)
        .unwrap_err();
    assert_eq!(err.expected, local.transcript);
}

#[test]
fn combined_level_is_the_weakest_winner() {
    let h = Harness::new();
    let mut init = h.prefs();
    init.encryption = vec![AlgorithmId::Encryption(EncryptionAlgorithm::Aes128Gcm)];
    let (init_signed, resp_signed) = h.pair(init.clone(), init);

    let result = h
        .negotiator()
        .negotiate_at(&init_signed, &resp_signed, &SecurityRequirements::default(), NOW)
        .unwrap();
    assert_eq!(result.security_level, SecurityLevel::Level128);

    let (init_signed, resp_signed) = {
        let mut strict = h.prefs();
        strict.encryption = vec![AlgorithmId::Encryption(EncryptionAlgorithm::Aes128Gcm)];
        strict.min_security_level = SecurityLevel::Level256;
        h.pair(strict.clone(), strict)
    };
    assert_eq!(
        h.negotiator().negotiate_at(
            &init_signed,
            &resp_signed,
            &SecurityRequirements::default(),
            NOW
        ),
        Err(NegotiationError::PeerSecurityTooLow)
    );
}

#[test]
fn required_algorithm_must_be_offered() {
    let h = Harness::new();
    let mut resp = h.prefs();
    resp.key_exchange = vec![AlgorithmId::X25519];
    let (init, resp) = h.pair(h.prefs(), resp);
    let policy = SecurityRequirements {
        required_algorithms: vec![AlgorithmId::ML_KEM_768],
        ..SecurityRequirements::default()
    };
    assert_eq!(
        h.negotiator().negotiate_at(&init, &resp, &policy, NOW),
        Err(NegotiationError::RequiredAlgorithmMissing {
            category: AlgorithmCategory::KeyExchange
        })
    );
}

#[test]
fn custom_algorithms_negotiate_and_resolve_through_the_registry() {
    let h = Harness::new();
    let custom = AlgorithmId::custom(AlgorithmCategory::Signature, 0x5150);
    h.catalog
        .register(AlgorithmMetadata::new(
            custom,
            SecurityLevel::PQLevel5,
            true,
            AlgorithmStatus::Recommended,
            8,
            2,
        ))
        .unwrap();

    let mut init = h.prefs();
    init.signature.insert(0, custom);
    let (init, resp) = h.pair(init.clone(), init);
    let result = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::default(), NOW)
        .unwrap();
    assert_eq!(result.selected.signature, custom);
    // No backend registered for the custom scheme yet.
    assert!(h.backends.resolve(&result).is_err());
}

#[test]
fn classical_suite_resolves_to_working_backends() {
    let h = Harness::new();
    let mut classical = h.prefs();
    classical.signature = vec![AlgorithmId::ED25519];
    classical.key_exchange = vec![AlgorithmId::X25519];
    let (init, resp) = h.pair(classical.clone(), classical);
    let result = h
        .negotiator()
        .negotiate_at(&init, &resp, &SecurityRequirements::default(), NOW)
        .unwrap();

    let session = h.backends.resolve(&result).unwrap();
    let (sk, pk) = pqcnet_negotiation::adapters::X25519Kem::keypair_from_seed([7u8; 32]);
    let encapsulated = session.key_exchanger.encapsulate(&pk).unwrap();
    let shared = session
        .key_exchanger
        .decapsulate(&sk, &encapsulated.ciphertext)
        .unwrap();
    let key = session.hasher.digest(&shared);
    let nonce = vec![0u8; session.aead.nonce_len()];
    let sealed = session
        .aead
        .seal(&key[..session.aead.key_len()], &nonce, result.transcript.as_bytes(), b"hello")
        .unwrap();
    let opened = session
        .aead
        .open(&key[..session.aead.key_len()], &nonce, result.transcript.as_bytes(), &sealed)
        .unwrap();
    assert_eq!(opened, b"hello".to_vec());
}

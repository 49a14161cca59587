use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pqcnet_negotiation::adapters::Ed25519Backend;
use pqcnet_negotiation::backend::BackendRegistry;
use pqcnet_negotiation::catalog::AlgorithmCatalog;
use pqcnet_negotiation::error::NegotiationError;
use pqcnet_negotiation::negotiator::{NegotiationContext, Negotiator};
use pqcnet_negotiation::policy::SecurityRequirements;
use pqcnet_negotiation::preferences::{AlgorithmPreferences, PreferenceSigner};
use pqcnet_negotiation::replay::NonceReplayGuard;
use pqcnet_negotiation::types::{
    AlgorithmCategory, AlgorithmId, PreferenceNonce, SecurityLevel, TimestampMs,
};
use pqcnet_negotiation::validator::ValidationWindow;
use proptest::prelude::*;
use proptest::sample::subsequence;

const NOW: TimestampMs = 1_700_000_000_000;

static NONCES: AtomicU64 = AtomicU64::new(0);

fn fresh_nonce() -> PreferenceNonce {
    let mut nonce = [0u8; 32];
    nonce[..8].copy_from_slice(&NONCES.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    PreferenceNonce(nonce)
}

fn negotiator() -> Negotiator {
    let ctx = NegotiationContext::new(
        Arc::new(AlgorithmCatalog::with_builtins()),
        Arc::new(BackendRegistry::with_reference_backends()),
        Arc::new(NonceReplayGuard::new(4_096, 256)),
    );
    Negotiator::new(
        ctx,
        ValidationWindow::new(Duration::from_secs(300), Duration::from_secs(30)),
    )
}

fn signer(seed: u8) -> PreferenceSigner {
    let (sk, pk) = Ed25519Backend::keypair_from_seed([seed; 32]);
    PreferenceSigner::new(Arc::new(Ed25519Backend), sk, pk)
}

/// Non-empty, shuffled sub-list of the catalog ids in `category`.
fn ordered_subset(category: AlgorithmCategory) -> impl Strategy<Value = Vec<AlgorithmId>> {
    let pool: Vec<AlgorithmId> = AlgorithmId::builtins()
        .into_iter()
        .filter(|id| id.category() == category)
        .collect();
    let len = pool.len();
    subsequence(pool, 1..=len).prop_shuffle()
}

fn preferences() -> impl Strategy<Value = AlgorithmPreferences> {
    (
        ordered_subset(AlgorithmCategory::Signature),
        ordered_subset(AlgorithmCategory::Hash),
        ordered_subset(AlgorithmCategory::KeyExchange),
        ordered_subset(AlgorithmCategory::Encryption),
    )
        .prop_map(|(signature, hash, key_exchange, encryption)| {
            let mut prefs = AlgorithmPreferences::from_catalog(
                &AlgorithmCatalog::with_builtins().snapshot(),
                1,
                2,
            );
            prefs.signature = signature;
            prefs.hash = hash;
            prefs.key_exchange = key_exchange;
            prefs.encryption = encryption;
            prefs
        })
}

fn forbidden() -> impl Strategy<Value = BTreeSet<AlgorithmId>> {
    let pool = AlgorithmId::builtins();
    let len = pool.len();
    subsequence(pool, 0..=len / 2).prop_map(|ids| ids.into_iter().collect())
}

fn security_floor() -> impl Strategy<Value = SecurityLevel> {
    prop_oneof![
        Just(SecurityLevel::Level128),
        Just(SecurityLevel::Level192),
        Just(SecurityLevel::Level256),
        Just(SecurityLevel::PQLevel3),
        Just(SecurityLevel::PQLevel5),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn winners_respect_both_lists_the_forbidden_set_and_the_floor(
        init in preferences(),
        resp in preferences(),
        forbidden in forbidden(),
        floor in security_floor(),
    ) {
        let negotiator = negotiator();
        let policy = SecurityRequirements {
            forbidden_algorithms: forbidden.clone(),
            min_security_level: floor,
            ..SecurityRequirements::default()
        };
        let init_signed = signer(1).sign_with_nonce(init.clone(), NOW, fresh_nonce()).unwrap();
        let resp_signed = signer(2).sign_with_nonce(resp.clone(), NOW, fresh_nonce()).unwrap();

        match negotiator.negotiate_at(&init_signed, &resp_signed, &policy, NOW) {
            Ok(result) => {
                for category in AlgorithmCategory::ALL {
                    let winner = result.selected.get(category);
                    prop_assert!(!forbidden.contains(&winner));
                    prop_assert!(init.list(category).contains(&winner));
                    prop_assert!(resp.list(category).contains(&winner));
                }
                let snapshot = negotiator.context().catalog.snapshot();
                let weakest = result
                    .selected
                    .as_array()
                    .iter()
                    .map(|id| snapshot.lookup(id).unwrap().security_level)
                    .min()
                    .unwrap();
                prop_assert_eq!(result.security_level, weakest);
                prop_assert!(result.security_level >= floor);
            }
            Err(err) => {
                let allowed = matches!(
                    err,
                    NegotiationError::NoCommonAlgorithm { .. }
                        | NegotiationError::PeerSecurityTooLow
                );
                prop_assert!(allowed, "unexpected failure {err:?}");
            }
        }
    }

    #[test]
    fn first_surviving_initiator_choice_wins(
        init in preferences(),
        resp in preferences(),
    ) {
        let negotiator = negotiator();
        let init_signed = signer(3).sign_with_nonce(init.clone(), NOW, fresh_nonce()).unwrap();
        let resp_signed = signer(4).sign_with_nonce(resp.clone(), NOW, fresh_nonce()).unwrap();
        let policy = SecurityRequirements::default();

        if let Ok(result) = negotiator.negotiate_at(&init_signed, &resp_signed, &policy, NOW) {
            for category in AlgorithmCategory::ALL {
                let winner = result.selected.get(category);
                let rank = init
                    .list(category)
                    .iter()
                    .position(|id| *id == winner)
                    .unwrap();
                // Nothing the initiator ranked higher was both offered back
                // and usable at the negotiated version.
                for earlier in &init.list(category)[..rank] {
                    if !resp.list(category).contains(earlier) {
                        continue;
                    }
                    let meta = negotiator
                        .context()
                        .catalog
                        .snapshot()
                        .lookup(earlier)
                        .cloned()
                        .unwrap();
                    prop_assert!(
                        meta.status.is_deprecated_at(NOW)
                            || meta.introduced_version > result.protocol_version
                            || meta.deprecated_version.is_some_and(|v| result.protocol_version >= v)
                    );
                }
            }
        }
    }
}

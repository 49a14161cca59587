//! Security policy and the per-category candidate filter.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;
use crate::config::ConfigError;
use crate::error::NegotiationError;
use crate::types::{AlgorithmCategory, AlgorithmId, AlgorithmMetadata, SecurityLevel, TimestampMs};

/// Local security policy, immutable for the duration of a negotiation.
///
/// # TOML
/// ```text
/// [negotiation.requirements]
/// min-security-level = "level128"
/// require-post-quantum = true
/// forbidden-algorithms = ["signature/rsa-pkcs1v15-2048"]
/// required-algorithms = ["key-exchange/ml-kem-768"]
/// min-protocol-version = 2
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SecurityRequirements {
    pub min_security_level: SecurityLevel,
    pub require_post_quantum: bool,
    pub forbidden_algorithms: BTreeSet<AlgorithmId>,
    /// For every category that appears here, the winner must be one of these.
    pub required_algorithms: Vec<AlgorithmId>,
    pub min_protocol_version: u16,
    pub pinned_protocol_version: Option<u16>,
    /// Deprecated algorithms stay negotiable only when this and both peers
    /// allow it.
    pub allow_deprecated: bool,
}

impl Default for SecurityRequirements {
    fn default() -> Self {
        Self {
            min_security_level: SecurityLevel::Level128,
            require_post_quantum: false,
            forbidden_algorithms: BTreeSet::new(),
            required_algorithms: Vec::new(),
            min_protocol_version: 1,
            pinned_protocol_version: None,
            allow_deprecated: false,
        }
    }
}

impl SecurityRequirements {
    /// Strict post-quantum profile.
    pub fn post_quantum() -> Self {
        Self {
            min_security_level: SecurityLevel::Level192,
            require_post_quantum: true,
            min_protocol_version: 2,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = self
            .required_algorithms
            .iter()
            .find(|id| self.forbidden_algorithms.contains(id))
        {
            return Err(ConfigError::Validation(format!(
                "{id} is both required and forbidden"
            )));
        }
        if let Some(pinned) = self.pinned_protocol_version {
            if pinned < self.min_protocol_version {
                return Err(ConfigError::Validation(format!(
                    "pinned protocol version {pinned} is below the minimum {}",
                    self.min_protocol_version
                )));
            }
        }
        Ok(())
    }

    pub fn required_in(&self, category: AlgorithmCategory) -> impl Iterator<Item = &AlgorithmId> {
        self.required_algorithms
            .iter()
            .filter(move |id| id.category() == category)
    }
}

/// Applies [`SecurityRequirements`] to candidate lists against one catalog
/// snapshot and one negotiated protocol version.
pub struct PolicyEnforcer<'a> {
    catalog: &'a CatalogSnapshot,
    protocol_version: u16,
    now: TimestampMs,
    peers_allow_deprecated: bool,
}

impl<'a> PolicyEnforcer<'a> {
    pub fn new(catalog: &'a CatalogSnapshot, protocol_version: u16, now: TimestampMs) -> Self {
        Self {
            catalog,
            protocol_version,
            now,
            peers_allow_deprecated: false,
        }
    }

    /// Whether both peers declared `allow_deprecated`.
    pub fn with_peer_consent(mut self, peers_allow_deprecated: bool) -> Self {
        self.peers_allow_deprecated = peers_allow_deprecated;
        self
    }

    /// Filter `candidates`, preserving their order.
    ///
    /// An empty `Ok` means nothing survived; the caller maps that to
    /// [`NegotiationError::NoCommonAlgorithm`].
    pub fn filter(
        &self,
        candidates: &[AlgorithmId],
        category: AlgorithmCategory,
        requirements: &SecurityRequirements,
    ) -> Result<Vec<AlgorithmId>, NegotiationError> {
        let mut allowed: Vec<AlgorithmId> = candidates
            .iter()
            .filter(|id| id.category() == category)
            .filter(|id| match self.catalog.lookup(id) {
                Some(meta) => self.permits(meta, requirements),
                None => false,
            })
            .copied()
            .collect();

        let required: Vec<&AlgorithmId> = requirements.required_in(category).collect();
        if !required.is_empty() {
            allowed.retain(|id| required.contains(&id));
            if allowed.is_empty() {
                return Err(NegotiationError::RequiredAlgorithmMissing { category });
            }
        }
        Ok(allowed)
    }

    fn permits(&self, meta: &AlgorithmMetadata, requirements: &SecurityRequirements) -> bool {
        if meta.status.is_broken() {
            return false;
        }
        if requirements.forbidden_algorithms.contains(&meta.id) {
            return false;
        }
        if meta.security_level < requirements.min_security_level {
            return false;
        }
        if requirements.require_post_quantum && !meta.quantum_resistant {
            return false;
        }
        if meta.introduced_version > self.protocol_version {
            return false;
        }
        if self.is_deprecated(meta) {
            return requirements.allow_deprecated && self.peers_allow_deprecated;
        }
        true
    }

    fn is_deprecated(&self, meta: &AlgorithmMetadata) -> bool {
        meta.status.is_deprecated_at(self.now)
            || meta
                .deprecated_version
                .is_some_and(|version| self.protocol_version >= version)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::AlgorithmCatalog;
    use crate::types::{AlgorithmStatus, HashAlgorithm, SignatureAlgorithm};

    const RSA: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::RsaPkcs1v15_2048);
    const ECDSA_P256: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::EcdsaP256);

    fn signatures() -> Vec<AlgorithmId> {
        vec![AlgorithmId::ML_DSA_65, RSA, AlgorithmId::ED25519, ECDSA_P256]
    }

    #[test]
    fn keeps_input_order_and_drops_deprecated_by_default() {
        let snapshot = AlgorithmCatalog::with_builtins().snapshot();
        let enforcer = PolicyEnforcer::new(&snapshot, 2, 0);
        let filtered = enforcer
            .filter(&signatures(), AlgorithmCategory::Signature, &SecurityRequirements::default())
            .unwrap();
        assert_eq!(filtered, vec![AlgorithmId::ML_DSA_65, AlgorithmId::ED25519, ECDSA_P256]);
    }

    #[test]
    fn deprecated_needs_policy_and_both_peers() {
        let snapshot = AlgorithmCatalog::with_builtins().snapshot();
        let policy = SecurityRequirements {
            allow_deprecated: true,
            ..SecurityRequirements::default()
        };
        let without_peers = PolicyEnforcer::new(&snapshot, 1, 0)
            .filter(&[RSA], AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert!(without_peers.is_empty());

        let with_peers = PolicyEnforcer::new(&snapshot, 1, 0)
            .with_peer_consent(true)
            .filter(&[RSA], AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert_eq!(with_peers, vec![RSA]);
    }

    #[test]
    fn broken_is_excluded_even_when_everything_else_allows_it() {
        let snapshot = AlgorithmCatalog::with_builtins().snapshot();
        let policy = SecurityRequirements {
            allow_deprecated: true,
            ..SecurityRequirements::default()
        };
        let sha1 = AlgorithmId::Hash(HashAlgorithm::Sha1);
        let filtered = PolicyEnforcer::new(&snapshot, 2, 0)
            .with_peer_consent(true)
            .filter(&[sha1, AlgorithmId::SHA256], AlgorithmCategory::Hash, &policy)
            .unwrap();
        assert_eq!(filtered, vec![AlgorithmId::SHA256]);
    }

    #[test]
    fn applies_floor_forbidden_list_and_pq_mandate() {
        let snapshot = AlgorithmCatalog::with_builtins().snapshot();
        let enforcer = PolicyEnforcer::new(&snapshot, 2, 0);

        let mut policy = SecurityRequirements {
            min_security_level: SecurityLevel::Level192,
            ..SecurityRequirements::default()
        };
        let filtered = enforcer
            .filter(&signatures(), AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert_eq!(filtered, vec![AlgorithmId::ML_DSA_65]);

        policy.forbidden_algorithms.insert(AlgorithmId::ML_DSA_65);
        let filtered = enforcer
            .filter(&signatures(), AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert!(filtered.is_empty());

        let pq = SecurityRequirements::post_quantum();
        let filtered = enforcer
            .filter(&signatures(), AlgorithmCategory::Signature, &pq)
            .unwrap();
        assert_eq!(filtered, vec![AlgorithmId::ML_DSA_65]);
    }

    #[test]
    fn newer_algorithms_wait_for_their_protocol_version() {
        let snapshot = AlgorithmCatalog::with_builtins().snapshot();
        let filtered = PolicyEnforcer::new(&snapshot, 1, 0)
            .filter(&signatures(), AlgorithmCategory::Signature, &SecurityRequirements::default())
            .unwrap();
        assert_eq!(filtered, vec![AlgorithmId::ED25519, ECDSA_P256]);
    }

    #[test]
    fn deprecating_algorithms_expire_at_sunset() {
        let catalog = AlgorithmCatalog::with_builtins();
        catalog
            .update_status(ECDSA_P256, AlgorithmStatus::Deprecating { sunset: 1_000 })
            .unwrap();
        let snapshot = catalog.snapshot();
        let policy = SecurityRequirements::default();

        let before = PolicyEnforcer::new(&snapshot, 2, 999)
            .filter(&[ECDSA_P256], AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert_eq!(before, vec![ECDSA_P256]);
        let after = PolicyEnforcer::new(&snapshot, 2, 1_000)
            .filter(&[ECDSA_P256], AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn required_algorithms_narrow_the_list_or_fail() {
        let snapshot = AlgorithmCatalog::with_builtins().snapshot();
        let enforcer = PolicyEnforcer::new(&snapshot, 2, 0);
        let policy = SecurityRequirements {
            required_algorithms: vec![AlgorithmId::ED25519, AlgorithmId::ML_KEM_768],
            ..SecurityRequirements::default()
        };

        let filtered = enforcer
            .filter(&signatures(), AlgorithmCategory::Signature, &policy)
            .unwrap();
        assert_eq!(filtered, vec![AlgorithmId::ED25519]);

        let err = enforcer
            .filter(&[ECDSA_P256], AlgorithmCategory::Signature, &policy)
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::RequiredAlgorithmMissing {
                category: AlgorithmCategory::Signature
            }
        );

        // Categories without required entries are unconstrained.
        let hashes = enforcer
            .filter(&[AlgorithmId::SHA256], AlgorithmCategory::Hash, &policy)
            .unwrap();
        assert_eq!(hashes, vec![AlgorithmId::SHA256]);
    }

    #[test]
    fn contradictory_policies_are_rejected() {
        let mut policy = SecurityRequirements {
            required_algorithms: vec![AlgorithmId::ED25519],
            ..SecurityRequirements::default()
        };
        policy.forbidden_algorithms.insert(AlgorithmId::ED25519);
        assert!(matches!(policy.validate(), Err(ConfigError::Validation(_))));

        let pinned = SecurityRequirements {
            min_protocol_version: 3,
            pinned_protocol_version: Some(2),
            ..SecurityRequirements::default()
        };
        assert!(matches!(pinned.validate(), Err(ConfigError::Validation(_))));
        assert!(SecurityRequirements::post_quantum().validate().is_ok());
    }
}

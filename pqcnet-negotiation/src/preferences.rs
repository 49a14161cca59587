//! Peer preference declarations and their canonical signed form.
//!
//! Canonical preference encoding (all integers little-endian):
//!
//! ```text
//! "PQCNPRF1"                                  8 bytes
//! protocol_version | min | max               3 × u16
//! min_security_level code                    u8
//! allow_deprecated                           u8 (0/1)
//! per category (Signature, Hash, KeyExchange, Encryption):
//!     count                                  u16
//!     ids                                    count × 6 bytes
//! ```
//!
//! The signed message appends `timestamp (u64) || nonce (32 bytes)`.

use std::collections::HashSet;
use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::backend::Signer;
use crate::catalog::CatalogSnapshot;
use crate::error::{BackendResult, MalformedReason};
use crate::types::{
    AlgorithmCategory, AlgorithmId, Bytes, PreferenceNonce, SecurityLevel, SignerKey, TimestampMs,
    ALGORITHM_ID_WIRE_LEN,
};

const PREFERENCES_DOMAIN: &[u8; 8] = b"PQCNPRF1";
const SIGNED_DIGEST_DOMAIN: &[u8; 8] = b"PQCNPREF";

/// Upper bound on entries per category list.
pub const MAX_ALGORITHMS_PER_CATEGORY: usize = 64;

/// Ordered, most-preferred-first algorithm lists plus the peer's own floors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AlgorithmPreferences {
    pub signature: Vec<AlgorithmId>,
    pub hash: Vec<AlgorithmId>,
    pub key_exchange: Vec<AlgorithmId>,
    pub encryption: Vec<AlgorithmId>,
    pub min_security_level: SecurityLevel,
    #[serde(default)]
    pub allow_deprecated: bool,
    pub protocol_version: u16,
    pub min_protocol_version: u16,
    pub max_protocol_version: u16,
}

impl AlgorithmPreferences {
    /// Preferences following the catalog's default ranking for every category.
    pub fn from_catalog(
        catalog: &CatalogSnapshot,
        min_protocol_version: u16,
        max_protocol_version: u16,
    ) -> Self {
        Self {
            signature: catalog.preferred_order(AlgorithmCategory::Signature),
            hash: catalog.preferred_order(AlgorithmCategory::Hash),
            key_exchange: catalog.preferred_order(AlgorithmCategory::KeyExchange),
            encryption: catalog.preferred_order(AlgorithmCategory::Encryption),
            min_security_level: SecurityLevel::Level128,
            allow_deprecated: false,
            protocol_version: max_protocol_version,
            min_protocol_version,
            max_protocol_version,
        }
    }

    pub fn list(&self, category: AlgorithmCategory) -> &[AlgorithmId] {
        match category {
            AlgorithmCategory::Signature => &self.signature,
            AlgorithmCategory::Hash => &self.hash,
            AlgorithmCategory::KeyExchange => &self.key_exchange,
            AlgorithmCategory::Encryption => &self.encryption,
        }
    }

    pub fn list_mut(&mut self, category: AlgorithmCategory) -> &mut Vec<AlgorithmId> {
        match category {
            AlgorithmCategory::Signature => &mut self.signature,
            AlgorithmCategory::Hash => &mut self.hash,
            AlgorithmCategory::KeyExchange => &mut self.key_exchange,
            AlgorithmCategory::Encryption => &mut self.encryption,
        }
    }

    /// Structural checks against `catalog`.
    pub fn check_well_formed(&self, catalog: &CatalogSnapshot) -> Result<(), MalformedReason> {
        if self.min_protocol_version > self.max_protocol_version
            || self.protocol_version < self.min_protocol_version
            || self.protocol_version > self.max_protocol_version
        {
            return Err(MalformedReason::ProtocolRange);
        }

        for category in AlgorithmCategory::ALL {
            let list = self.list(category);
            if list.is_empty() {
                return Err(MalformedReason::EmptyCategory(category));
            }
            if list.len() > MAX_ALGORITHMS_PER_CATEGORY {
                return Err(MalformedReason::TooManyAlgorithms(category));
            }
            let mut seen = HashSet::with_capacity(list.len());
            for id in list {
                if id.category() != category {
                    return Err(MalformedReason::WrongCategory(category));
                }
                if !seen.insert(*id) {
                    return Err(MalformedReason::DuplicateAlgorithm(category));
                }
                if !catalog.contains(id) {
                    return Err(MalformedReason::UnknownAlgorithm(category));
                }
            }
        }
        Ok(())
    }

    /// Canonical, deterministic byte encoding (see module docs).
    pub fn canonical_bytes(&self) -> Bytes {
        let ids: usize = AlgorithmCategory::ALL
            .iter()
            .map(|category| self.list(*category).len())
            .sum();
        let mut out = Vec::with_capacity(8 + 6 + 2 + 8 + ids * ALGORITHM_ID_WIRE_LEN);
        out.extend_from_slice(PREFERENCES_DOMAIN);
        out.extend_from_slice(&self.protocol_version.to_le_bytes());
        out.extend_from_slice(&self.min_protocol_version.to_le_bytes());
        out.extend_from_slice(&self.max_protocol_version.to_le_bytes());
        out.push(self.min_security_level.wire_code());
        out.push(u8::from(self.allow_deprecated));
        for category in AlgorithmCategory::ALL {
            let list = self.list(category);
            let count = u16::try_from(list.len()).unwrap_or(u16::MAX);
            out.extend_from_slice(&count.to_le_bytes());
            for id in list.iter().take(usize::from(count)) {
                out.extend_from_slice(&id.to_wire());
            }
        }
        out
    }
}

/// Preferences as sent on the wire: signed, timestamped and nonce-protected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAlgorithmPreferences {
    pub preferences: AlgorithmPreferences,
    pub signature: Bytes,
    pub signer_key: SignerKey,
    pub timestamp: TimestampMs,
    pub nonce: PreferenceNonce,
}

impl SignedAlgorithmPreferences {
    /// Message covered by the signature.
    pub fn signing_bytes(&self) -> Bytes {
        signing_bytes(&self.preferences, self.timestamp, &self.nonce)
    }

    /// SHA-256 binding of the complete signed structure, used in transcripts.
    pub fn digest(&self) -> [u8; 32] {
        let message = self.signing_bytes();
        let mut hasher = Sha256::new();
        hasher.update(SIGNED_DIGEST_DOMAIN);
        for field in [
            message.as_slice(),
            self.signature.as_slice(),
            self.signer_key.as_bytes(),
        ] {
            let len = u32::try_from(field.len()).unwrap_or(u32::MAX);
            hasher.update(len.to_le_bytes());
            hasher.update(field);
        }
        hasher.finalize().into()
    }
}

fn signing_bytes(
    preferences: &AlgorithmPreferences,
    timestamp: TimestampMs,
    nonce: &PreferenceNonce,
) -> Bytes {
    let mut message = preferences.canonical_bytes();
    message.extend_from_slice(&timestamp.to_le_bytes());
    message.extend_from_slice(&nonce.0);
    message
}

/// Signs preference declarations with the bootstrap signature algorithm.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use pqcnet_negotiation::adapters::Ed25519Backend;
/// use pqcnet_negotiation::catalog::AlgorithmCatalog;
/// use pqcnet_negotiation::preferences::{AlgorithmPreferences, PreferenceSigner};
///
/// let catalog = AlgorithmCatalog::with_builtins();
/// let prefs = AlgorithmPreferences::from_catalog(&catalog.snapshot(), 1, 3);
/// let (sk, pk) = Ed25519Backend::keypair_from_seed([1u8; 32]);
/// let signer = PreferenceSigner::new(Arc::new(Ed25519Backend), sk, pk);
/// let signed = signer.sign(prefs, 1_700_000_000_000).unwrap();
/// assert_eq!(signed.signature.len(), 64);
/// ```
pub struct PreferenceSigner {
    backend: Arc<dyn Signer>,
    secret_key: Bytes,
    public_key: SignerKey,
}

impl PreferenceSigner {
    pub fn new(backend: Arc<dyn Signer>, secret_key: Bytes, public_key: Bytes) -> Self {
        Self {
            backend,
            secret_key,
            public_key: SignerKey(public_key),
        }
    }

    pub fn public_key(&self) -> &SignerKey {
        &self.public_key
    }

    /// Sign with a fresh random nonce.
    pub fn sign(
        &self,
        preferences: AlgorithmPreferences,
        timestamp: TimestampMs,
    ) -> BackendResult<SignedAlgorithmPreferences> {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        self.sign_with_nonce(preferences, timestamp, PreferenceNonce(nonce))
    }

    pub fn sign_with_nonce(
        &self,
        preferences: AlgorithmPreferences,
        timestamp: TimestampMs,
        nonce: PreferenceNonce,
    ) -> BackendResult<SignedAlgorithmPreferences> {
        let message = signing_bytes(&preferences, timestamp, &nonce);
        let signature = self.backend.sign(&self.secret_key, &message)?;
        Ok(SignedAlgorithmPreferences {
            preferences,
            signature,
            signer_key: self.public_key.clone(),
            timestamp,
            nonce,
        })
    }
}

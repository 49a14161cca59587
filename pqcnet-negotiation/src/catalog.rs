//! Versioned registry of known algorithms and their lifecycle metadata.
//!
//! Readers take an [`Arc<CatalogSnapshot>`] and keep it for the duration of a
//! negotiation. Administrative writers rebuild the table off to the side and
//! publish it with a single pointer swap, so a reader never observes a
//! half-applied update and never waits on a writer for longer than the swap.
//!
//! # Example
//! ```
//! use pqcnet_negotiation::catalog::AlgorithmCatalog;
//! use pqcnet_negotiation::types::{AlgorithmId, AlgorithmStatus};
//!
//! let catalog = AlgorithmCatalog::with_builtins();
//! let before = catalog.snapshot();
//! catalog
//!     .update_status(AlgorithmId::ED25519, AlgorithmStatus::Acceptable)
//!     .unwrap();
//! assert_eq!(
//!     before.lookup(&AlgorithmId::ED25519).unwrap().status,
//!     AlgorithmStatus::Recommended
//! );
//! assert_eq!(catalog.version(), before.version() + 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::RegistryError;
use crate::types::{
    AlgorithmCategory, AlgorithmId, AlgorithmMetadata, AlgorithmStatus, EncryptionAlgorithm,
    HashAlgorithm, KeyExchangeAlgorithm, SecurityLevel, SignatureAlgorithm,
};

/// Immutable view of the catalog at one version.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    version: u64,
    entries: BTreeMap<AlgorithmId, AlgorithmMetadata>,
}

impl CatalogSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn lookup(&self, id: &AlgorithmId) -> Option<&AlgorithmMetadata> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &AlgorithmId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn list(&self, category: AlgorithmCategory) -> BTreeSet<AlgorithmId> {
        self.entries
            .keys()
            .filter(|id| id.category() == category)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default local ranking for `category`: healthier lifecycle first, then
    /// quantum-resistant, then faster. Deprecated and broken entries are left
    /// out entirely.
    pub fn preferred_order(&self, category: AlgorithmCategory) -> Vec<AlgorithmId> {
        let mut ranked: Vec<&AlgorithmMetadata> = self
            .entries
            .values()
            .filter(|meta| meta.category == category)
            .filter(|meta| {
                !matches!(
                    meta.status,
                    AlgorithmStatus::Deprecated | AlgorithmStatus::Broken
                )
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.status
                .rank()
                .cmp(&b.status.rank())
                .then(b.quantum_resistant.cmp(&a.quantum_resistant))
                .then(b.performance_rating.cmp(&a.performance_rating))
                .then(a.id.cmp(&b.id))
        });
        ranked.into_iter().map(|meta| meta.id).collect()
    }
}

/// Shared, copy-on-write algorithm catalog.
pub struct AlgorithmCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
    // Serialises writers so concurrent updates cannot lose each other's edits.
    writer: Mutex<()>,
}

impl Default for AlgorithmCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

impl AlgorithmCatalog {
    pub fn empty() -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// Catalog seeded with every built-in algorithm.
    pub fn with_builtins() -> Self {
        let entries = builtin_metadata()
            .into_iter()
            .map(|meta| (meta.id, meta))
            .collect();
        Self {
            current: RwLock::new(Arc::new(CatalogSnapshot {
                version: 1,
                entries,
            })),
            writer: Mutex::new(()),
        }
    }

    /// Consistent view of the whole table.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn lookup(&self, id: &AlgorithmId) -> Option<AlgorithmMetadata> {
        self.snapshot().lookup(id).cloned()
    }

    pub fn list(&self, category: AlgorithmCategory) -> BTreeSet<AlgorithmId> {
        self.snapshot().list(category)
    }

    pub fn register(&self, metadata: AlgorithmMetadata) -> Result<(), RegistryError> {
        if metadata.category != metadata.id.category() {
            return Err(RegistryError::CategoryMismatch {
                id: metadata.id,
                declared: metadata.category,
            });
        }
        let id = metadata.id;
        self.publish(|entries| {
            if entries.contains_key(&id) {
                return Err(RegistryError::DuplicateAlgorithm(id));
            }
            entries.insert(id, metadata);
            Ok(())
        })?;
        tracing::info!(algorithm = %id, "algorithm registered");
        Ok(())
    }

    /// Move `id` strictly forward along its lifecycle.
    pub fn update_status(
        &self,
        id: AlgorithmId,
        new_status: AlgorithmStatus,
    ) -> Result<(), RegistryError> {
        let previous = self.publish(|entries| {
            let entry = entries
                .get_mut(&id)
                .ok_or(RegistryError::UnknownAlgorithm(id))?;
            if new_status.rank() <= entry.status.rank() {
                return Err(RegistryError::InvalidStatusTransition {
                    id,
                    from: entry.status,
                    to: new_status,
                });
            }
            Ok(core::mem::replace(&mut entry.status, new_status))
        })?;
        tracing::info!(
            algorithm = %id,
            from = %previous,
            to = %new_status,
            "algorithm status updated"
        );
        Ok(())
    }

    /// Administrative override: mark `id` broken immediately, whatever its
    /// current status.
    pub fn emergency_break(&self, id: AlgorithmId) -> Result<(), RegistryError> {
        let previous = self.publish(|entries| {
            let entry = entries
                .get_mut(&id)
                .ok_or(RegistryError::UnknownAlgorithm(id))?;
            Ok(core::mem::replace(&mut entry.status, AlgorithmStatus::Broken))
        })?;
        tracing::warn!(
            algorithm = %id,
            from = %previous,
            "algorithm marked broken by emergency override"
        );
        Ok(())
    }

    fn publish<T>(
        &self,
        edit: impl FnOnce(
            &mut BTreeMap<AlgorithmId, AlgorithmMetadata>,
        ) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _writer = self.writer.lock();
        let base = self.snapshot();
        let mut entries = base.entries.clone();
        let outcome = edit(&mut entries)?;
        let next = Arc::new(CatalogSnapshot {
            version: base.version + 1,
            entries,
        });
        *self.current.write() = next;
        Ok(outcome)
    }
}

#[rustfmt::skip]
fn builtin_metadata() -> Vec<AlgorithmMetadata> {
    use AlgorithmStatus::{Acceptable, Broken, Deprecated, Recommended};
    use SecurityLevel::{Level128, Level192, Level256, PQLevel3, PQLevel5};

    let sig = AlgorithmId::Signature;
    let hash = AlgorithmId::Hash;
    let kex = AlgorithmId::KeyExchange;
    let enc = AlgorithmId::Encryption;

    vec![
        AlgorithmMetadata::new(sig(SignatureAlgorithm::Ed25519), Level128, false, Recommended, 9, 1),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::EcdsaP256), Level128, false, Acceptable, 8, 1),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::EcdsaP384), Level192, false, Acceptable, 7, 1),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::RsaPkcs1v15_2048), Level128, false, Deprecated, 3, 1)
            .deprecated_in(2),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::MlDsa65), PQLevel3, true, Recommended, 7, 2),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::MlDsa87), PQLevel5, true, Recommended, 6, 2),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::Falcon1024), PQLevel5, true, Acceptable, 6, 2),
        AlgorithmMetadata::new(sig(SignatureAlgorithm::SlhDsaSha2_256s), PQLevel5, true, Acceptable, 2, 2),
        AlgorithmMetadata::new(hash(HashAlgorithm::Sha1), Level128, false, Broken, 9, 1).deprecated_in(1),
        AlgorithmMetadata::new(hash(HashAlgorithm::Sha256), Level128, false, Recommended, 9, 1),
        AlgorithmMetadata::new(hash(HashAlgorithm::Sha384), Level192, true, Recommended, 8, 1),
        AlgorithmMetadata::new(hash(HashAlgorithm::Sha512), Level256, true, Recommended, 8, 1),
        AlgorithmMetadata::new(hash(HashAlgorithm::Blake2b512), Level256, true, Acceptable, 9, 1),
        AlgorithmMetadata::new(kex(KeyExchangeAlgorithm::X25519), Level128, false, Recommended, 10, 1),
        AlgorithmMetadata::new(kex(KeyExchangeAlgorithm::EcdhP256), Level128, false, Acceptable, 8, 1),
        AlgorithmMetadata::new(kex(KeyExchangeAlgorithm::EcdhP384), Level192, false, Acceptable, 7, 1),
        AlgorithmMetadata::new(kex(KeyExchangeAlgorithm::MlKem768), PQLevel3, true, Recommended, 8, 2),
        AlgorithmMetadata::new(kex(KeyExchangeAlgorithm::MlKem1024), PQLevel5, true, Recommended, 7, 2),
        AlgorithmMetadata::new(kex(KeyExchangeAlgorithm::X25519MlKem768), PQLevel3, true, Recommended, 7, 2),
        AlgorithmMetadata::new(enc(EncryptionAlgorithm::Aes128Gcm), Level128, false, Acceptable, 10, 1),
        AlgorithmMetadata::new(enc(EncryptionAlgorithm::Aes256Gcm), Level256, true, Recommended, 9, 1),
        AlgorithmMetadata::new(enc(EncryptionAlgorithm::ChaCha20Poly1305), Level256, true, Recommended, 9, 1),
    ]
}

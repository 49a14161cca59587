//! Capability interfaces for the crypto backends keyed by [`AlgorithmId`].
//!
//! The negotiator itself only ever verifies preference signatures; everything
//! else is resolved here so the session layer can look up the handles for a
//! negotiated suite. Built-in and `Custom(u32)` identifiers go through the
//! same registry, so plugging in a new primitive never needs a new enum arm.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BackendError, BackendResult};
use crate::negotiator::NegotiationResult;
use crate::types::{
    AlgorithmCategory, AlgorithmId, Bytes, EncryptionAlgorithm, HashAlgorithm,
    KeyExchangeAlgorithm, SignatureAlgorithm,
};

/// Signature scheme capability.
pub trait Signer: Send + Sync {
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> BackendResult<Bytes>;
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> BackendResult<()>;
}

/// Hash function capability.
pub trait Hasher: Send + Sync {
    fn output_len(&self) -> usize;
    fn digest(&self, data: &[u8]) -> Bytes;
}

/// Result of a KEM-style encapsulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encapsulation {
    /// Value sent to the holder of the secret key.
    pub ciphertext: Bytes,
    pub shared_secret: Bytes,
}

/// Key establishment capability, expressed as a KEM.
pub trait KeyExchanger: Send + Sync {
    fn encapsulate(&self, public_key: &[u8]) -> BackendResult<Encapsulation>;
    fn decapsulate(&self, secret_key: &[u8], ciphertext: &[u8]) -> BackendResult<Bytes>;
}

/// Authenticated encryption capability.
pub trait Aead: Send + Sync {
    fn key_len(&self) -> usize;
    fn nonce_len(&self) -> usize;
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> BackendResult<Bytes>;
    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> BackendResult<Bytes>;
}

/// Backend handles for one negotiated suite.
#[derive(Clone)]
pub struct SessionBackends {
    pub signer: Arc<dyn Signer>,
    pub hasher: Arc<dyn Hasher>,
    pub key_exchanger: Arc<dyn KeyExchanger>,
    pub aead: Arc<dyn Aead>,
}

/// Identifier-keyed backend table, built once at start-up.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    signers: HashMap<AlgorithmId, Arc<dyn Signer>>,
    hashers: HashMap<AlgorithmId, Arc<dyn Hasher>>,
    key_exchangers: HashMap<AlgorithmId, Arc<dyn KeyExchanger>>,
    aeads: HashMap<AlgorithmId, Arc<dyn Aead>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the in-tree reference adapters.
    pub fn with_reference_backends() -> Self {
        let mut registry = Self::new();
        crate::adapters::install_reference_backends(&mut registry);
        registry
    }

    pub fn register_signer(
        &mut self,
        id: AlgorithmId,
        backend: Arc<dyn Signer>,
    ) -> BackendResult<()> {
        expect_category(id, AlgorithmCategory::Signature)?;
        self.signers.insert(id, backend);
        Ok(())
    }

    pub fn register_hasher(
        &mut self,
        id: AlgorithmId,
        backend: Arc<dyn Hasher>,
    ) -> BackendResult<()> {
        expect_category(id, AlgorithmCategory::Hash)?;
        self.hashers.insert(id, backend);
        Ok(())
    }

    pub fn register_key_exchanger(
        &mut self,
        id: AlgorithmId,
        backend: Arc<dyn KeyExchanger>,
    ) -> BackendResult<()> {
        expect_category(id, AlgorithmCategory::KeyExchange)?;
        self.key_exchangers.insert(id, backend);
        Ok(())
    }

    pub fn register_aead(&mut self, id: AlgorithmId, backend: Arc<dyn Aead>) -> BackendResult<()> {
        expect_category(id, AlgorithmCategory::Encryption)?;
        self.aeads.insert(id, backend);
        Ok(())
    }

    // Typed variants: the category is fixed by the argument, so these
    // cannot fail.

    pub fn add_signer(&mut self, alg: SignatureAlgorithm, backend: Arc<dyn Signer>) {
        self.signers.insert(AlgorithmId::Signature(alg), backend);
    }

    pub fn add_hasher(&mut self, alg: HashAlgorithm, backend: Arc<dyn Hasher>) {
        self.hashers.insert(AlgorithmId::Hash(alg), backend);
    }

    pub fn add_key_exchanger(&mut self, alg: KeyExchangeAlgorithm, backend: Arc<dyn KeyExchanger>) {
        self.key_exchangers.insert(AlgorithmId::KeyExchange(alg), backend);
    }

    pub fn add_aead(&mut self, alg: EncryptionAlgorithm, backend: Arc<dyn Aead>) {
        self.aeads.insert(AlgorithmId::Encryption(alg), backend);
    }

    pub fn signer(&self, id: &AlgorithmId) -> Option<Arc<dyn Signer>> {
        self.signers.get(id).cloned()
    }

    pub fn hasher(&self, id: &AlgorithmId) -> Option<Arc<dyn Hasher>> {
        self.hashers.get(id).cloned()
    }

    pub fn key_exchanger(&self, id: &AlgorithmId) -> Option<Arc<dyn KeyExchanger>> {
        self.key_exchangers.get(id).cloned()
    }

    pub fn aead(&self, id: &AlgorithmId) -> Option<Arc<dyn Aead>> {
        self.aeads.get(id).cloned()
    }

    /// Whether a backend exists for `id` in its own category.
    pub fn supports(&self, id: &AlgorithmId) -> bool {
        match id.category() {
            AlgorithmCategory::Signature => self.signers.contains_key(id),
            AlgorithmCategory::Hash => self.hashers.contains_key(id),
            AlgorithmCategory::KeyExchange => self.key_exchangers.contains_key(id),
            AlgorithmCategory::Encryption => self.aeads.contains_key(id),
        }
    }

    /// Look up the handles for every algorithm in a negotiated suite.
    pub fn resolve(&self, result: &NegotiationResult) -> BackendResult<SessionBackends> {
        let selected = &result.selected;
        Ok(SessionBackends {
            signer: self
                .signer(&selected.signature)
                .ok_or(BackendError::Unsupported(selected.signature))?,
            hasher: self
                .hasher(&selected.hash)
                .ok_or(BackendError::Unsupported(selected.hash))?,
            key_exchanger: self
                .key_exchanger(&selected.key_exchange)
                .ok_or(BackendError::Unsupported(selected.key_exchange))?,
            aead: self
                .aead(&selected.encryption)
                .ok_or(BackendError::Unsupported(selected.encryption))?,
        })
    }
}

fn expect_category(id: AlgorithmId, expected: AlgorithmCategory) -> BackendResult<()> {
    if id.category() == expected {
        Ok(())
    } else {
        Err(BackendError::CategoryMismatch { id, expected })
    }
}

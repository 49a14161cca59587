//! Reference adapters that plug audited primitive crates into the capability
//! traits. Post-quantum schemes are left to external backends and registered
//! at start-up like any custom algorithm.

use std::sync::Arc;

use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use blake2::Blake2b512;
use digest::Digest;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Sha256, Sha384, Sha512};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::backend::{Aead, BackendRegistry, Encapsulation, Hasher, KeyExchanger, Signer};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    Bytes, EncryptionAlgorithm, HashAlgorithm, KeyExchangeAlgorithm, SignatureAlgorithm,
};

/// Ed25519 via `ed25519-dalek`. Secret keys are 32-byte seeds.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Backend;

impl Ed25519Backend {
    /// Derive `(secret_key, public_key)` from a fixed seed.
    pub fn keypair_from_seed(seed: [u8; 32]) -> (Bytes, Bytes) {
        let signing = SigningKey::from_bytes(&seed);
        (
            signing.to_bytes().to_vec(),
            signing.verifying_key().to_bytes().to_vec(),
        )
    }

    /// Fresh keypair from the OS RNG.
    pub fn generate_keypair() -> (Bytes, Bytes) {
        let signing = SigningKey::generate(&mut OsRng);
        (
            signing.to_bytes().to_vec(),
            signing.verifying_key().to_bytes().to_vec(),
        )
    }
}

impl Signer for Ed25519Backend {
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> BackendResult<Bytes> {
        let seed: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| BackendError::InvalidKey("ed25519 secret key must be 32 bytes"))?;
        let signing = SigningKey::from_bytes(&seed);
        Ok(signing.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> BackendResult<()> {
        let key: [u8; 32] = public_key
            .try_into()
            .map_err(|_| BackendError::InvalidKey("ed25519 public key must be 32 bytes"))?;
        let verifying = VerifyingKey::from_bytes(&key)
            .map_err(|_| BackendError::InvalidKey("ed25519 public key is not a curve point"))?;
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| BackendError::InvalidInput("ed25519 signature must be 64 bytes"))?;
        verifying
            .verify(message, &signature)
            .map_err(|_| BackendError::VerifyFailed)
    }
}

/// Any `digest::Digest` implementation exposed as a [`Hasher`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestHasher<D> {
    _digest: core::marker::PhantomData<D>,
}

impl<D> DigestHasher<D> {
    pub fn new() -> Self {
        Self {
            _digest: core::marker::PhantomData,
        }
    }
}

impl<D> Hasher for DigestHasher<D>
where
    D: Digest + Send + Sync,
{
    fn output_len(&self) -> usize {
        <D as Digest>::output_size()
    }

    fn digest(&self, data: &[u8]) -> Bytes {
        D::digest(data).to_vec()
    }
}

/// AES-GCM with 96-bit nonces, parameterised by key size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AesGcmBackend {
    Aes128,
    Aes256,
}

impl Aead for AesGcmBackend {
    fn key_len(&self) -> usize {
        match self {
            AesGcmBackend::Aes128 => 16,
            AesGcmBackend::Aes256 => 32,
        }
    }

    fn nonce_len(&self) -> usize {
        12
    }

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> BackendResult<Bytes> {
        let nonce = self.nonce(nonce)?;
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match self {
            AesGcmBackend::Aes128 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| BackendError::InvalidKey("aes-128-gcm key must be 16 bytes"))?
                .encrypt(nonce, payload),
            AesGcmBackend::Aes256 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| BackendError::InvalidKey("aes-256-gcm key must be 32 bytes"))?
                .encrypt(nonce, payload),
        }
        .map_err(|_| BackendError::PrimitiveFailure("aes-gcm seal failed"))
    }

    fn open(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> BackendResult<Bytes> {
        let nonce = self.nonce(nonce)?;
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match self {
            AesGcmBackend::Aes128 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| BackendError::InvalidKey("aes-128-gcm key must be 16 bytes"))?
                .decrypt(nonce, payload),
            AesGcmBackend::Aes256 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| BackendError::InvalidKey("aes-256-gcm key must be 32 bytes"))?
                .decrypt(nonce, payload),
        }
        .map_err(|_| BackendError::VerifyFailed)
    }
}

impl AesGcmBackend {
    fn nonce<'a>(&self, nonce: &'a [u8]) -> BackendResult<&'a Nonce<aes_gcm::aead::consts::U12>> {
        if nonce.len() != self.nonce_len() {
            return Err(BackendError::InvalidInput("aes-gcm nonce must be 12 bytes"));
        }
        Ok(Nonce::from_slice(nonce))
    }
}

/// X25519 Diffie-Hellman exposed as a KEM: the ciphertext is the sender's
/// ephemeral public key.
#[derive(Clone, Copy, Debug, Default)]
pub struct X25519Kem;

impl X25519Kem {
    /// Derive `(secret_key, public_key)` from a fixed seed.
    pub fn keypair_from_seed(seed: [u8; 32]) -> (Bytes, Bytes) {
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        (secret.to_bytes().to_vec(), public.as_bytes().to_vec())
    }
}

impl KeyExchanger for X25519Kem {
    fn encapsulate(&self, public_key: &[u8]) -> BackendResult<Encapsulation> {
        let peer: [u8; 32] = public_key
            .try_into()
            .map_err(|_| BackendError::InvalidKey("x25519 public key must be 32 bytes"))?;
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(BackendError::InvalidKey("x25519 public key is low order"));
        }
        Ok(Encapsulation {
            ciphertext: ephemeral_public.as_bytes().to_vec(),
            shared_secret: shared.as_bytes().to_vec(),
        })
    }

    fn decapsulate(&self, secret_key: &[u8], ciphertext: &[u8]) -> BackendResult<Bytes> {
        let secret: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| BackendError::InvalidKey("x25519 secret key must be 32 bytes"))?;
        let sender: [u8; 32] = ciphertext
            .try_into()
            .map_err(|_| BackendError::InvalidInput("x25519 ciphertext must be 32 bytes"))?;
        let shared = StaticSecret::from(secret).diffie_hellman(&PublicKey::from(sender));
        if !shared.was_contributory() {
            return Err(BackendError::InvalidInput("x25519 ciphertext is low order"));
        }
        Ok(shared.as_bytes().to_vec())
    }
}

pub(crate) fn install_reference_backends(registry: &mut BackendRegistry) {
    registry.add_signer(SignatureAlgorithm::Ed25519, Arc::new(Ed25519Backend));
    registry.add_hasher(HashAlgorithm::Sha256, Arc::new(DigestHasher::<Sha256>::new()));
    registry.add_hasher(HashAlgorithm::Sha384, Arc::new(DigestHasher::<Sha384>::new()));
    registry.add_hasher(HashAlgorithm::Sha512, Arc::new(DigestHasher::<Sha512>::new()));
    registry.add_hasher(HashAlgorithm::Blake2b512, Arc::new(DigestHasher::<Blake2b512>::new()));
    registry.add_key_exchanger(KeyExchangeAlgorithm::X25519, Arc::new(X25519Kem));
    registry.add_aead(EncryptionAlgorithm::Aes128Gcm, Arc::new(AesGcmBackend::Aes128));
    registry.add_aead(EncryptionAlgorithm::Aes256Gcm, Arc::new(AesGcmBackend::Aes256));
}

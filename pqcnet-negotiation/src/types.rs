//! Identifier and level types shared by every negotiation component.

use core::fmt;
use core::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the UNIX epoch.
pub type TimestampMs = u64;

/// Wall-clock time as a [`TimestampMs`]. Clocks before the epoch read as 0.
pub fn unix_time_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Owned byte buffer.
pub type Bytes = Vec<u8>;

/// Length of the canonical [`AlgorithmId`] encoding.
pub const ALGORITHM_ID_WIRE_LEN: usize = 6;

/// The four algorithm families agreed during a negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmCategory {
    Signature,
    Hash,
    KeyExchange,
    Encryption,
}

impl AlgorithmCategory {
    /// Fixed category order used by transcripts and canonical encodings.
    pub const ALL: [AlgorithmCategory; 4] = [
        AlgorithmCategory::Signature,
        AlgorithmCategory::Hash,
        AlgorithmCategory::KeyExchange,
        AlgorithmCategory::Encryption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmCategory::Signature => "signature",
            AlgorithmCategory::Hash => "hash",
            AlgorithmCategory::KeyExchange => "key-exchange",
            AlgorithmCategory::Encryption => "encryption",
        }
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            AlgorithmCategory::Signature => 0x01,
            AlgorithmCategory::Hash => 0x02,
            AlgorithmCategory::KeyExchange => 0x03,
            AlgorithmCategory::Encryption => 0x04,
        }
    }

    fn from_str_opt(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == value)
    }
}

impl fmt::Display for AlgorithmCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignatureAlgorithm {
    Ed25519,
    EcdsaP256,
    EcdsaP384,
    RsaPkcs1v15_2048,
    MlDsa65,
    MlDsa87,
    Falcon1024,
    SlhDsaSha2_256s,
    Custom(u32),
}

impl SignatureAlgorithm {
    const BUILTINS: [SignatureAlgorithm; 8] = [
        SignatureAlgorithm::Ed25519,
        SignatureAlgorithm::EcdsaP256,
        SignatureAlgorithm::EcdsaP384,
        SignatureAlgorithm::RsaPkcs1v15_2048,
        SignatureAlgorithm::MlDsa65,
        SignatureAlgorithm::MlDsa87,
        SignatureAlgorithm::Falcon1024,
        SignatureAlgorithm::SlhDsaSha2_256s,
    ];

    fn code(&self) -> u32 {
        match self {
            SignatureAlgorithm::Ed25519 => 0x0001,
            SignatureAlgorithm::EcdsaP256 => 0x0002,
            SignatureAlgorithm::EcdsaP384 => 0x0003,
            SignatureAlgorithm::RsaPkcs1v15_2048 => 0x0004,
            SignatureAlgorithm::MlDsa65 => 0x0101,
            SignatureAlgorithm::MlDsa87 => 0x0102,
            SignatureAlgorithm::Falcon1024 => 0x0103,
            SignatureAlgorithm::SlhDsaSha2_256s => 0x0104,
            SignatureAlgorithm::Custom(code) => *code,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Ed25519 => "ed25519",
            SignatureAlgorithm::EcdsaP256 => "ecdsa-p256",
            SignatureAlgorithm::EcdsaP384 => "ecdsa-p384",
            SignatureAlgorithm::RsaPkcs1v15_2048 => "rsa-pkcs1v15-2048",
            SignatureAlgorithm::MlDsa65 => "ml-dsa-65",
            SignatureAlgorithm::MlDsa87 => "ml-dsa-87",
            SignatureAlgorithm::Falcon1024 => "falcon-1024",
            SignatureAlgorithm::SlhDsaSha2_256s => "slh-dsa-sha2-256s",
            SignatureAlgorithm::Custom(_) => "custom",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Blake2b512,
    Custom(u32),
}

impl HashAlgorithm {
    const BUILTINS: [HashAlgorithm; 5] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake2b512,
    ];

    fn code(&self) -> u32 {
        match self {
            HashAlgorithm::Sha1 => 0x0001,
            HashAlgorithm::Sha256 => 0x0002,
            HashAlgorithm::Sha384 => 0x0003,
            HashAlgorithm::Sha512 => 0x0004,
            HashAlgorithm::Blake2b512 => 0x0010,
            HashAlgorithm::Custom(code) => *code,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake2b512 => "blake2b-512",
            HashAlgorithm::Custom(_) => "custom",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyExchangeAlgorithm {
    X25519,
    EcdhP256,
    EcdhP384,
    MlKem768,
    MlKem1024,
    X25519MlKem768,
    Custom(u32),
}

impl KeyExchangeAlgorithm {
    const BUILTINS: [KeyExchangeAlgorithm; 6] = [
        KeyExchangeAlgorithm::X25519,
        KeyExchangeAlgorithm::EcdhP256,
        KeyExchangeAlgorithm::EcdhP384,
        KeyExchangeAlgorithm::MlKem768,
        KeyExchangeAlgorithm::MlKem1024,
        KeyExchangeAlgorithm::X25519MlKem768,
    ];

    fn code(&self) -> u32 {
        match self {
            KeyExchangeAlgorithm::X25519 => 0x0001,
            KeyExchangeAlgorithm::EcdhP256 => 0x0002,
            KeyExchangeAlgorithm::EcdhP384 => 0x0003,
            KeyExchangeAlgorithm::MlKem768 => 0x0101,
            KeyExchangeAlgorithm::MlKem1024 => 0x0102,
            KeyExchangeAlgorithm::X25519MlKem768 => 0x0201,
            KeyExchangeAlgorithm::Custom(code) => *code,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            KeyExchangeAlgorithm::X25519 => "x25519",
            KeyExchangeAlgorithm::EcdhP256 => "ecdh-p256",
            KeyExchangeAlgorithm::EcdhP384 => "ecdh-p384",
            KeyExchangeAlgorithm::MlKem768 => "ml-kem-768",
            KeyExchangeAlgorithm::MlKem1024 => "ml-kem-1024",
            KeyExchangeAlgorithm::X25519MlKem768 => "x25519-ml-kem-768",
            KeyExchangeAlgorithm::Custom(_) => "custom",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncryptionAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
    Custom(u32),
}

impl EncryptionAlgorithm {
    const BUILTINS: [EncryptionAlgorithm; 3] = [
        EncryptionAlgorithm::Aes128Gcm,
        EncryptionAlgorithm::Aes256Gcm,
        EncryptionAlgorithm::ChaCha20Poly1305,
    ];

    fn code(&self) -> u32 {
        match self {
            EncryptionAlgorithm::Aes128Gcm => 0x0001,
            EncryptionAlgorithm::Aes256Gcm => 0x0002,
            EncryptionAlgorithm::ChaCha20Poly1305 => 0x0003,
            EncryptionAlgorithm::Custom(code) => *code,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes128Gcm => "aes-128-gcm",
            EncryptionAlgorithm::Aes256Gcm => "aes-256-gcm",
            EncryptionAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            EncryptionAlgorithm::Custom(_) => "custom",
        }
    }
}

/// Tagged algorithm identifier.
///
/// Built-ins form a closed set per category; `Custom(u32)` arms are resolved
/// through the [`AlgorithmCatalog`](crate::catalog::AlgorithmCatalog) and the
/// [`BackendRegistry`](crate::backend::BackendRegistry) like any other id.
///
/// The textual form is `"<category>/<name>"`, e.g. `"signature/ml-dsa-65"` or
/// `"hash/custom-42"`; configuration files use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlgorithmId {
    Signature(SignatureAlgorithm),
    Hash(HashAlgorithm),
    KeyExchange(KeyExchangeAlgorithm),
    Encryption(EncryptionAlgorithm),
}

impl AlgorithmId {
    pub const ED25519: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::Ed25519);
    pub const ML_DSA_65: AlgorithmId = AlgorithmId::Signature(SignatureAlgorithm::MlDsa65);
    pub const SHA256: AlgorithmId = AlgorithmId::Hash(HashAlgorithm::Sha256);
    pub const SHA384: AlgorithmId = AlgorithmId::Hash(HashAlgorithm::Sha384);
    pub const X25519: AlgorithmId = AlgorithmId::KeyExchange(KeyExchangeAlgorithm::X25519);
    pub const ML_KEM_768: AlgorithmId = AlgorithmId::KeyExchange(KeyExchangeAlgorithm::MlKem768);
    pub const AES_256_GCM: AlgorithmId = AlgorithmId::Encryption(EncryptionAlgorithm::Aes256Gcm);

    pub fn category(&self) -> AlgorithmCategory {
        match self {
            AlgorithmId::Signature(_) => AlgorithmCategory::Signature,
            AlgorithmId::Hash(_) => AlgorithmCategory::Hash,
            AlgorithmId::KeyExchange(_) => AlgorithmCategory::KeyExchange,
            AlgorithmId::Encryption(_) => AlgorithmCategory::Encryption,
        }
    }

    /// Build a custom identifier inside `category`.
    pub fn custom(category: AlgorithmCategory, code: u32) -> Self {
        match category {
            AlgorithmCategory::Signature => {
                AlgorithmId::Signature(SignatureAlgorithm::Custom(code))
            }
            AlgorithmCategory::Hash => AlgorithmId::Hash(HashAlgorithm::Custom(code)),
            AlgorithmCategory::KeyExchange => {
                AlgorithmId::KeyExchange(KeyExchangeAlgorithm::Custom(code))
            }
            AlgorithmCategory::Encryption => {
                AlgorithmId::Encryption(EncryptionAlgorithm::Custom(code))
            }
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(
            self,
            AlgorithmId::Signature(SignatureAlgorithm::Custom(_))
                | AlgorithmId::Hash(HashAlgorithm::Custom(_))
                | AlgorithmId::KeyExchange(KeyExchangeAlgorithm::Custom(_))
                | AlgorithmId::Encryption(EncryptionAlgorithm::Custom(_))
        )
    }

    /// Every built-in identifier, in category order.
    pub fn builtins() -> Vec<AlgorithmId> {
        let mut ids = Vec::new();
        ids.extend(SignatureAlgorithm::BUILTINS.map(AlgorithmId::Signature));
        ids.extend(HashAlgorithm::BUILTINS.map(AlgorithmId::Hash));
        ids.extend(KeyExchangeAlgorithm::BUILTINS.map(AlgorithmId::KeyExchange));
        ids.extend(EncryptionAlgorithm::BUILTINS.map(AlgorithmId::Encryption));
        ids
    }

    fn code(&self) -> u32 {
        match self {
            AlgorithmId::Signature(alg) => alg.code(),
            AlgorithmId::Hash(alg) => alg.code(),
            AlgorithmId::KeyExchange(alg) => alg.code(),
            AlgorithmId::Encryption(alg) => alg.code(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AlgorithmId::Signature(alg) => alg.name(),
            AlgorithmId::Hash(alg) => alg.name(),
            AlgorithmId::KeyExchange(alg) => alg.name(),
            AlgorithmId::Encryption(alg) => alg.name(),
        }
    }

    /// Canonical encoding: `category tag || kind || code (u32 LE)`.
    pub fn to_wire(&self) -> [u8; ALGORITHM_ID_WIRE_LEN] {
        let mut out = [0u8; ALGORITHM_ID_WIRE_LEN];
        out[0] = self.category().tag();
        out[1] = u8::from(self.is_custom());
        out[2..].copy_from_slice(&self.code().to_le_bytes());
        out
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_custom() {
            write!(f, "{}/custom-{}", self.category(), self.code())
        } else {
            write!(f, "{}/{}", self.category(), self.name())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised algorithm identifier `{0}`")]
pub struct ParseAlgorithmIdError(pub String);

impl FromStr for AlgorithmId {
    type Err = ParseAlgorithmIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let err = || ParseAlgorithmIdError(value.to_owned());
        let (category, name) = value.split_once('/').ok_or_else(err)?;
        let category = AlgorithmCategory::from_str_opt(category).ok_or_else(err)?;

        if let Some(code) = name.strip_prefix("custom-") {
            let code = code.parse::<u32>().map_err(|_| err())?;
            return Ok(AlgorithmId::custom(category, code));
        }

        AlgorithmId::builtins()
            .into_iter()
            .find(|id| id.category() == category && id.name() == name)
            .ok_or_else(err)
    }
}

impl TryFrom<String> for AlgorithmId {
    type Error = ParseAlgorithmIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmId> for String {
    fn from(value: AlgorithmId) -> Self {
        value.to_string()
    }
}

/// Coarse strength classes.
///
/// The declaration order is the comparison order. Post-quantum levels sort
/// above every classical level; policies that care about quantum resistance
/// itself use the `quantum_resistant` flag rather than this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    #[serde(rename = "level128")]
    Level128,
    #[serde(rename = "level192")]
    Level192,
    #[serde(rename = "level256")]
    Level256,
    #[serde(rename = "pq-level3")]
    PQLevel3,
    #[serde(rename = "pq-level5")]
    PQLevel5,
}

impl SecurityLevel {
    pub(crate) fn wire_code(&self) -> u8 {
        match self {
            SecurityLevel::Level128 => 0x01,
            SecurityLevel::Level192 => 0x02,
            SecurityLevel::Level256 => 0x03,
            SecurityLevel::PQLevel3 => 0x13,
            SecurityLevel::PQLevel5 => 0x15,
        }
    }
}

/// Lifecycle stage of a catalogued algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmStatus {
    Recommended,
    Acceptable,
    /// Still negotiable until `sunset`, after which it counts as deprecated.
    Deprecating { sunset: TimestampMs },
    Deprecated,
    /// Never negotiated, whatever the policy says.
    Broken,
}

impl AlgorithmStatus {
    /// Position along the forward-only lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            AlgorithmStatus::Recommended => 0,
            AlgorithmStatus::Acceptable => 1,
            AlgorithmStatus::Deprecating { .. } => 2,
            AlgorithmStatus::Deprecated => 3,
            AlgorithmStatus::Broken => 4,
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, AlgorithmStatus::Broken)
    }

    /// Whether the algorithm is past its deprecation point at `now`.
    pub fn is_deprecated_at(&self, now: TimestampMs) -> bool {
        match self {
            AlgorithmStatus::Deprecating { sunset } => now >= *sunset,
            AlgorithmStatus::Deprecated | AlgorithmStatus::Broken => true,
            AlgorithmStatus::Recommended | AlgorithmStatus::Acceptable => false,
        }
    }
}

impl fmt::Display for AlgorithmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmStatus::Recommended => f.write_str("recommended"),
            AlgorithmStatus::Acceptable => f.write_str("acceptable"),
            AlgorithmStatus::Deprecating { sunset } => write!(f, "deprecating(sunset={sunset})"),
            AlgorithmStatus::Deprecated => f.write_str("deprecated"),
            AlgorithmStatus::Broken => f.write_str("broken"),
        }
    }
}

/// Catalog record for a single algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AlgorithmMetadata {
    pub id: AlgorithmId,
    pub category: AlgorithmCategory,
    pub security_level: SecurityLevel,
    pub quantum_resistant: bool,
    pub status: AlgorithmStatus,
    /// Relative speed hint, 1 (slowest) to 10 (fastest).
    pub performance_rating: u8,
    /// First protocol version allowed to negotiate this algorithm.
    pub introduced_version: u16,
    #[serde(default)]
    pub deprecated_version: Option<u16>,
}

impl AlgorithmMetadata {
    pub fn new(
        id: AlgorithmId,
        security_level: SecurityLevel,
        quantum_resistant: bool,
        status: AlgorithmStatus,
        performance_rating: u8,
        introduced_version: u16,
    ) -> Self {
        Self {
            id,
            category: id.category(),
            security_level,
            quantum_resistant,
            status,
            performance_rating,
            introduced_version,
            deprecated_version: None,
        }
    }

    pub fn deprecated_in(mut self, version: u16) -> Self {
        self.deprecated_version = Some(version);
        self
    }
}

/// Public key a peer signs its preferences with.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignerKey(pub Bytes);

impl SignerKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(&self.0);
        match encoded.get(..16) {
            Some(prefix) if encoded.len() > 16 => write!(f, "{prefix}…"),
            _ => f.write_str(&encoded),
        }
    }
}

/// Per-attempt nonce carried in signed preferences.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreferenceNonce(pub [u8; 32]);

//! Error taxonomy for the negotiation engine.
//!
//! Every failure is deterministic and returned synchronously. Callers must
//! abort the connection attempt on any [`NegotiationError`]; nothing here is
//! recovered into a weaker but successful negotiation.
//!
//! Negotiation errors deliberately carry the failing category at most, never
//! the algorithm sets the peers offered, so a remote prober learns nothing
//! beyond "no agreement" from an error surfaced on the wire.

use thiserror::Error;

use crate::transcript::Transcript;
use crate::types::{AlgorithmCategory, AlgorithmId, AlgorithmStatus, TimestampMs};

/// Which side of the exchange a signed preference set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Initiator,
    Responder,
}

impl core::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PeerRole::Initiator => f.write_str("initiator"),
            PeerRole::Responder => f.write_str("responder"),
        }
    }
}

/// Why a preference declaration was structurally rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MalformedReason {
    EmptyCategory(AlgorithmCategory),
    DuplicateAlgorithm(AlgorithmCategory),
    UnknownAlgorithm(AlgorithmCategory),
    WrongCategory(AlgorithmCategory),
    TooManyAlgorithms(AlgorithmCategory),
    ProtocolRange,
}

impl core::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MalformedReason::EmptyCategory(c) => write!(f, "empty {c} list"),
            MalformedReason::DuplicateAlgorithm(c) => write!(f, "duplicate entry in {c} list"),
            MalformedReason::UnknownAlgorithm(c) => write!(f, "unknown algorithm in {c} list"),
            MalformedReason::WrongCategory(c) => write!(f, "foreign algorithm in {c} list"),
            MalformedReason::TooManyAlgorithms(c) => write!(f, "{c} list exceeds limit"),
            MalformedReason::ProtocolRange => f.write_str("inconsistent protocol version range"),
        }
    }
}

/// Rejections raised by the [`PreferenceValidator`](crate::validator::PreferenceValidator).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("preferences timestamped {timestamp} are ahead of local clock {now}")]
    FuturePreferences { timestamp: TimestampMs, now: TimestampMs },
    #[error("preferences timestamped {timestamp} expired before {now}")]
    ExpiredPreferences { timestamp: TimestampMs, now: TimestampMs },
    #[error("preference nonce already seen for this signer")]
    ReplayedNonce,
    #[error("replay cache is full of unexpired nonces")]
    ReplayCacheSaturated,
    #[error("preference signature does not verify")]
    InvalidSignature,
    #[error("no verifier registered for bootstrap algorithm {0}")]
    BackendUnavailable(AlgorithmId),
    #[error("malformed preferences: {0}")]
    MalformedPreferences(MalformedReason),
}

/// Failures of [`Negotiator::negotiate`](crate::negotiator::Negotiator::negotiate).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("{role} preferences rejected: {source}")]
    Validation {
        role: PeerRole,
        #[source]
        source: ValidationError,
    },
    #[error("no mutually supported protocol version")]
    ProtocolVersionMismatch,
    #[error("no common {category} algorithm")]
    NoCommonAlgorithm { category: AlgorithmCategory },
    #[error("required {category} algorithm not available")]
    RequiredAlgorithmMissing { category: AlgorithmCategory },
    #[error("negotiated suite is below the required security level")]
    PeerSecurityTooLow,
    #[error("negotiated suite is not post-quantum")]
    PostQuantumRequired,
}

impl NegotiationError {
    /// Validation failure reported by either side, if any.
    pub fn validation(&self) -> Option<(PeerRole, &ValidationError)> {
        match self {
            NegotiationError::Validation { role, source } => Some((*role, source)),
            _ => None,
        }
    }
}

/// Failures of catalog administration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown algorithm {0}")]
    UnknownAlgorithm(AlgorithmId),
    #[error("algorithm {0} is already registered")]
    DuplicateAlgorithm(AlgorithmId),
    #[error("cannot move {id} from {from} to {to}")]
    InvalidStatusTransition {
        id: AlgorithmId,
        from: AlgorithmStatus,
        to: AlgorithmStatus,
    },
    #[error("metadata for {id} declares category {declared}")]
    CategoryMismatch {
        id: AlgorithmId,
        declared: AlgorithmCategory,
    },
}

/// Failures raised by capability backends.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{id} cannot serve as a {expected} backend")]
    CategoryMismatch {
        id: AlgorithmId,
        expected: AlgorithmCategory,
    },
    #[error("no backend registered for {0}")]
    Unsupported(AlgorithmId),
    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("verification failed")]
    VerifyFailed,
    #[error("primitive failure: {0}")]
    PrimitiveFailure(&'static str),
}

/// Alias for fallible backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Raised by the handshake layer when the transcript bound by the peer differs
/// from the locally negotiated one. Always fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("downgrade attempt detected: negotiated transcript {expected}, peer bound {observed}")]
pub struct DowngradeAttemptDetected {
    pub expected: Transcript,
    pub observed: Transcript,
}

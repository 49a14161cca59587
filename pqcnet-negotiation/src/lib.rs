//! Downgrade-resistant algorithm negotiation for PQCNet sessions.
//!
//! Two peers exchange signed, timestamped and nonce-protected preference
//! declarations; the [`Negotiator`](negotiator::Negotiator) validates both,
//! intersects them category by category under the local
//! [`SecurityRequirements`](policy::SecurityRequirements), and returns a
//! [`NegotiationResult`](negotiator::NegotiationResult) whose transcript the
//! handshake layer binds into its next authenticated message.
//!
//! Shared state (catalog, backends, replay cache, event sink) lives in an
//! explicit [`NegotiationContext`](negotiator::NegotiationContext) built at
//! start-up.

pub mod adapters;
pub mod audit;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod negotiator;
pub mod policy;
pub mod preferences;
pub mod replay;
pub mod transcript;
pub mod types;
pub mod validator;

pub use catalog::{AlgorithmCatalog, CatalogSnapshot};
pub use config::{ConfigError, NegotiationConfig};
pub use error::{
    BackendError, DowngradeAttemptDetected, NegotiationError, RegistryError, ValidationError,
};
pub use negotiator::{NegotiationContext, NegotiationResult, Negotiator, SelectedAlgorithms};
pub use policy::SecurityRequirements;
pub use preferences::{AlgorithmPreferences, PreferenceSigner, SignedAlgorithmPreferences};
pub use transcript::{Transcript, TranscriptBinder};
pub use types::{AlgorithmCategory, AlgorithmId, AlgorithmStatus, SecurityLevel};

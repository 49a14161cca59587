//! Orchestrates validation, intersection, policy filtering and transcript
//! binding into a single [`NegotiationResult`].
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pqcnet_negotiation::adapters::Ed25519Backend;
//! use pqcnet_negotiation::backend::BackendRegistry;
//! use pqcnet_negotiation::catalog::AlgorithmCatalog;
//! use pqcnet_negotiation::negotiator::{NegotiationContext, Negotiator};
//! use pqcnet_negotiation::policy::SecurityRequirements;
//! use pqcnet_negotiation::preferences::{AlgorithmPreferences, PreferenceSigner};
//! use pqcnet_negotiation::replay::NonceReplayGuard;
//! use pqcnet_negotiation::validator::ValidationWindow;
//!
//! let catalog = Arc::new(AlgorithmCatalog::with_builtins());
//! let ctx = NegotiationContext::new(
//!     catalog.clone(),
//!     Arc::new(BackendRegistry::with_reference_backends()),
//!     Arc::new(NonceReplayGuard::new(1024, 64)),
//! );
//! let window = ValidationWindow::new(Duration::from_secs(300), Duration::from_secs(30));
//! let negotiator = Negotiator::new(ctx, window);
//!
//! let prefs = AlgorithmPreferences::from_catalog(&catalog.snapshot(), 1, 2);
//! let sign = |seed: u8| {
//!     let (sk, pk) = Ed25519Backend::keypair_from_seed([seed; 32]);
//!     PreferenceSigner::new(Arc::new(Ed25519Backend), sk, pk)
//! };
//! let now = 1_700_000_000_000;
//! let initiator = sign(1).sign(prefs.clone(), now).unwrap();
//! let responder = sign(2).sign(prefs, now).unwrap();
//!
//! let result = negotiator
//!     .negotiate_at(&initiator, &responder, &SecurityRequirements::default(), now)
//!     .unwrap();
//! assert_eq!(result.protocol_version, 2);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{NoopSink, SecurityEvent, SecurityEventSink};
use crate::backend::BackendRegistry;
use crate::catalog::{AlgorithmCatalog, CatalogSnapshot};
use crate::error::{DowngradeAttemptDetected, NegotiationError, PeerRole, ValidationError};
use crate::policy::{PolicyEnforcer, SecurityRequirements};
use crate::preferences::{AlgorithmPreferences, SignedAlgorithmPreferences};
use crate::replay::NonceReplayGuard;
use crate::transcript::{Transcript, TranscriptBinder};
use crate::types::{
    unix_time_ms, AlgorithmCategory, AlgorithmId, SecurityLevel, SignerKey, TimestampMs,
};
use crate::validator::{PreferenceValidator, ValidationWindow};

/// Explicit handles to the shared negotiation state, built once at start-up.
#[derive(Clone)]
pub struct NegotiationContext {
    pub catalog: Arc<AlgorithmCatalog>,
    pub backends: Arc<BackendRegistry>,
    pub replay_guard: Arc<NonceReplayGuard>,
    pub events: Arc<dyn SecurityEventSink>,
    /// Algorithm every peer signs its preferences with.
    pub baseline_signature: AlgorithmId,
}

impl NegotiationContext {
    pub fn new(
        catalog: Arc<AlgorithmCatalog>,
        backends: Arc<BackendRegistry>,
        replay_guard: Arc<NonceReplayGuard>,
    ) -> Self {
        Self {
            catalog,
            backends,
            replay_guard,
            events: Arc::new(NoopSink),
            baseline_signature: AlgorithmId::ED25519,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn SecurityEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_baseline_signature(mut self, id: AlgorithmId) -> Self {
        self.baseline_signature = id;
        self
    }
}

/// One winner per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectedAlgorithms {
    pub signature: AlgorithmId,
    pub hash: AlgorithmId,
    pub key_exchange: AlgorithmId,
    pub encryption: AlgorithmId,
}

impl SelectedAlgorithms {
    pub fn get(&self, category: AlgorithmCategory) -> AlgorithmId {
        match category {
            AlgorithmCategory::Signature => self.signature,
            AlgorithmCategory::Hash => self.hash,
            AlgorithmCategory::KeyExchange => self.key_exchange,
            AlgorithmCategory::Encryption => self.encryption,
        }
    }

    /// Winners in [`AlgorithmCategory::ALL`] order.
    pub fn as_array(&self) -> [AlgorithmId; 4] {
        [self.signature, self.hash, self.key_exchange, self.encryption]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NegotiationResult {
    pub selected: SelectedAlgorithms,
    /// Weakest catalog level among the four winners.
    pub security_level: SecurityLevel,
    pub protocol_version: u16,
    pub transcript: Transcript,
}

impl NegotiationResult {
    /// Check the transcript the peer bound into its handshake message.
    pub fn verify_peer_transcript(
        &self,
        observed: &Transcript,
    ) -> Result<(), DowngradeAttemptDetected> {
        TranscriptBinder::verify(&self.transcript, observed)
    }
}

pub struct Negotiator {
    ctx: NegotiationContext,
    window: ValidationWindow,
}

impl Negotiator {
    pub fn new(ctx: NegotiationContext, window: ValidationWindow) -> Self {
        Self { ctx, window }
    }

    pub fn context(&self) -> &NegotiationContext {
        &self.ctx
    }

    pub fn window(&self) -> &ValidationWindow {
        &self.window
    }

    /// Negotiate against the local wall clock.
    pub fn negotiate(
        &self,
        initiator: &SignedAlgorithmPreferences,
        responder: &SignedAlgorithmPreferences,
        requirements: &SecurityRequirements,
    ) -> Result<NegotiationResult, NegotiationError> {
        self.negotiate_at(initiator, responder, requirements, unix_time_ms())
    }

    pub fn negotiate_at(
        &self,
        initiator: &SignedAlgorithmPreferences,
        responder: &SignedAlgorithmPreferences,
        requirements: &SecurityRequirements,
        now: TimestampMs,
    ) -> Result<NegotiationResult, NegotiationError> {
        let snapshot = self.ctx.catalog.snapshot();
        let validator = PreferenceValidator::new(
            &snapshot,
            &self.ctx.backends,
            &self.ctx.replay_guard,
            self.ctx.baseline_signature,
        );
        let init = validator
            .validate(initiator, now, &self.window)
            .map_err(|err| self.rejected(PeerRole::Initiator, &initiator.signer_key, err, now))?;
        let resp = validator
            .validate(responder, now, &self.window)
            .map_err(|err| self.rejected(PeerRole::Responder, &responder.signer_key, err, now))?;

        let protocol_version = select_protocol_version(&init, &resp, requirements)?;
        let selected = select_algorithms(
            &snapshot,
            &init,
            &resp,
            requirements,
            protocol_version,
            now,
        )?;

        let mut security_level = SecurityLevel::PQLevel5;
        let mut all_quantum_resistant = true;
        for id in selected.as_array() {
            let meta = snapshot
                .lookup(&id)
                .ok_or(NegotiationError::NoCommonAlgorithm {
                    category: id.category(),
                })?;
            security_level = security_level.min(meta.security_level);
            all_quantum_resistant &= meta.quantum_resistant;
        }

        let floor = requirements
            .min_security_level
            .max(init.min_security_level)
            .max(resp.min_security_level);
        if security_level < floor {
            return Err(NegotiationError::PeerSecurityTooLow);
        }
        if requirements.require_post_quantum && !all_quantum_resistant {
            return Err(NegotiationError::PostQuantumRequired);
        }

        let transcript = TranscriptBinder::bind(
            protocol_version,
            &selected.as_array(),
            &initiator.digest(),
            &responder.digest(),
        );
        tracing::debug!(
            protocol_version,
            signature = %selected.signature,
            hash = %selected.hash,
            key_exchange = %selected.key_exchange,
            encryption = %selected.encryption,
            catalog_version = snapshot.version(),
            transcript = %transcript,
            "negotiation complete"
        );

        Ok(NegotiationResult {
            selected,
            security_level,
            protocol_version,
            transcript,
        })
    }

    /// Surface a transcript mismatch found by the handshake layer.
    pub fn report_downgrade(
        &self,
        peer: &SignerKey,
        detected: &DowngradeAttemptDetected,
        now: TimestampMs,
    ) {
        tracing::warn!(
            signer = %peer,
            expected = %detected.expected,
            observed = %detected.observed,
            "downgrade attempt detected"
        );
        self.ctx
            .events
            .report(SecurityEvent::downgrade(peer.clone(), detected, now));
    }

    fn rejected(
        &self,
        role: PeerRole,
        signer: &SignerKey,
        source: ValidationError,
        now: TimestampMs,
    ) -> NegotiationError {
        let event = match source {
            ValidationError::InvalidSignature => {
                Some(SecurityEvent::invalid_signature(signer.clone(), now))
            }
            ValidationError::ReplayedNonce => {
                Some(SecurityEvent::replayed_nonce(signer.clone(), now))
            }
            _ => None,
        };
        if let Some(event) = event {
            tracing::warn!(%role, %signer, kind = event.kind(), "rejected peer preferences");
            self.ctx.events.report(event);
        } else {
            tracing::debug!(%role, error = %source, "peer preferences failed validation");
        }
        NegotiationError::Validation { role, source }
    }
}

fn select_protocol_version(
    init: &AlgorithmPreferences,
    resp: &AlgorithmPreferences,
    requirements: &SecurityRequirements,
) -> Result<u16, NegotiationError> {
    let lo = init
        .min_protocol_version
        .max(resp.min_protocol_version)
        .max(requirements.min_protocol_version);
    let hi = init.max_protocol_version.min(resp.max_protocol_version);
    if lo > hi {
        return Err(NegotiationError::ProtocolVersionMismatch);
    }
    match requirements.pinned_protocol_version {
        Some(pinned) if (lo..=hi).contains(&pinned) => Ok(pinned),
        Some(_) => Err(NegotiationError::ProtocolVersionMismatch),
        None => Ok(hi),
    }
}

fn select_algorithms(
    snapshot: &CatalogSnapshot,
    init: &AlgorithmPreferences,
    resp: &AlgorithmPreferences,
    requirements: &SecurityRequirements,
    protocol_version: u16,
    now: TimestampMs,
) -> Result<SelectedAlgorithms, NegotiationError> {
    let enforcer = PolicyEnforcer::new(snapshot, protocol_version, now)
        .with_peer_consent(init.allow_deprecated && resp.allow_deprecated);

    let mut winners = [AlgorithmId::ED25519; 4];
    for (slot, category) in winners.iter_mut().zip(AlgorithmCategory::ALL) {
        let theirs = resp.list(category);
        // Initiator order is authoritative.
        let candidates: Vec<AlgorithmId> = init
            .list(category)
            .iter()
            .filter(|id| theirs.contains(id))
            .copied()
            .collect();
        let filtered = enforcer.filter(&candidates, category, requirements)?;
        *slot = *filtered
            .first()
            .ok_or(NegotiationError::NoCommonAlgorithm { category })?;
    }

    let [signature, hash, key_exchange, encryption] = winners;
    Ok(SelectedAlgorithms {
        signature,
        hash,
        key_exchange,
        encryption,
    })
}

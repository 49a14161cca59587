//! Negotiation rounds between the configured peers.
//!
//! Every peer runs its own [`Negotiator`] (own replay cache, own policy) over
//! the shared catalog and backends. For each ordered pair both sides compute
//! the result independently and cross-check transcripts, the way two hosts
//! would before activating a session.
//!
//! # Example
//! ```
//! use pqcnet_negotiator::config::Config;
//! use pqcnet_negotiator::service::NegotiationService;
//!
//! let cfg = Config::sample();
//! let mut service = NegotiationService::new(&cfg).unwrap();
//! let report = service.run_iteration().unwrap();
//! assert_eq!(report.agreed(), 2);
//! assert_eq!(report.downgrades(), 0);
//! ```

use std::sync::Arc;

use pqcnet_negotiation::adapters::Ed25519Backend;
use pqcnet_negotiation::audit::{
    CompositeSink, RecordingSink, ReputationTracker, SecurityEvent, SecurityEventSink,
};
use pqcnet_negotiation::backend::BackendRegistry;
use pqcnet_negotiation::catalog::AlgorithmCatalog;
use pqcnet_negotiation::error::{BackendError, DowngradeAttemptDetected, NegotiationError};
use pqcnet_negotiation::negotiator::{NegotiationResult, Negotiator};
use pqcnet_negotiation::policy::SecurityRequirements;
use pqcnet_negotiation::preferences::PreferenceSigner;
use pqcnet_negotiation::types::{unix_time_ms, SignerKey, TimestampMs};
use thiserror::Error;

use crate::config::{Config, ConfigError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] pqcnet_negotiation::ConfigError),
    #[error("peer {peer} could not sign its preferences: {source}")]
    Signing {
        peer: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PairStatus {
    Agreed(NegotiationResult),
    Failed(NegotiationError),
    TranscriptMismatch(DowngradeAttemptDetected),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PairOutcome {
    pub initiator: String,
    pub responder: String,
    pub status: PairStatus,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NegotiationReport {
    pub outcomes: Vec<PairOutcome>,
    /// Security events raised during this iteration.
    pub security_events: Vec<SecurityEvent>,
}

impl NegotiationReport {
    pub fn agreed(&self) -> usize {
        self.count(|status| matches!(status, PairStatus::Agreed(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, PairStatus::Failed(_)))
    }

    pub fn downgrades(&self) -> usize {
        self.count(|status| matches!(status, PairStatus::TranscriptMismatch(_)))
    }

    fn count(&self, predicate: impl Fn(&PairStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

struct Peer {
    id: String,
    signer: PreferenceSigner,
    negotiator: Negotiator,
    requirements: SecurityRequirements,
    config: crate::config::PeerConfig,
}

pub struct NegotiationService {
    catalog: Arc<AlgorithmCatalog>,
    peers: Vec<Peer>,
    reputation: Arc<ReputationTracker>,
    recorder: Arc<RecordingSink>,
}

impl NegotiationService {
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let catalog = Arc::new(AlgorithmCatalog::with_builtins());
        config.negotiation.apply_status_overrides(&catalog)?;
        let backends = Arc::new(BackendRegistry::with_reference_backends());
        let reputation = Arc::new(ReputationTracker::new(
            config.negotiator.reputation_capacity,
            config.negotiator.reputation_retention_secs.saturating_mul(1_000),
        ));
        let recorder = Arc::new(RecordingSink::new());
        let sinks: Vec<Arc<dyn SecurityEventSink>> = vec![reputation.clone(), recorder.clone()];
        let events: Arc<dyn SecurityEventSink> = Arc::new(CompositeSink::new(sinks));

        let mut peers = Vec::with_capacity(config.negotiator.peers.len());
        for peer in &config.negotiator.peers {
            let (secret_key, public_key) = Ed25519Backend::keypair_from_seed(peer.seed()?);
            let ctx = config
                .negotiation
                .context(catalog.clone(), backends.clone())
                .with_events(events.clone());
            peers.push(Peer {
                id: peer.id.clone(),
                signer: PreferenceSigner::new(Arc::new(Ed25519Backend), secret_key, public_key),
                negotiator: Negotiator::new(ctx, config.negotiation.window()),
                requirements: peer
                    .requirements
                    .clone()
                    .unwrap_or_else(|| config.negotiation.requirements.clone()),
                config: peer.clone(),
            });
        }
        tracing::info!(
            peers = peers.len(),
            catalog_version = catalog.version(),
            "negotiation service ready"
        );

        Ok(Self {
            catalog,
            peers,
            reputation,
            recorder,
        })
    }

    pub fn reputation(&self) -> &ReputationTracker {
        &self.reputation
    }

    pub fn catalog(&self) -> &AlgorithmCatalog {
        &self.catalog
    }

    pub fn signer_key(&self, peer_id: &str) -> Option<&SignerKey> {
        self.peers
            .iter()
            .find(|peer| peer.id == peer_id)
            .map(|peer| peer.signer.public_key())
    }

    pub fn run_iteration(&mut self) -> Result<NegotiationReport, ServiceError> {
        self.run_iteration_at(unix_time_ms())
    }

    /// Negotiate every ordered peer pair at `now`.
    pub fn run_iteration_at(
        &mut self,
        now: TimestampMs,
    ) -> Result<NegotiationReport, ServiceError> {
        let snapshot = self.catalog.snapshot();
        let mut report = NegotiationReport::default();

        for (i, initiator) in self.peers.iter().enumerate() {
            for (r, responder) in self.peers.iter().enumerate() {
                if i == r {
                    continue;
                }
                let init_signed = initiator
                    .signer
                    .sign(initiator.config.preferences(&snapshot), now)
                    .map_err(|source| ServiceError::Signing {
                        peer: initiator.id.clone(),
                        source,
                    })?;
                let resp_signed = responder
                    .signer
                    .sign(responder.config.preferences(&snapshot), now)
                    .map_err(|source| ServiceError::Signing {
                        peer: responder.id.clone(),
                        source,
                    })?;

                let local = initiator.negotiator.negotiate_at(
                    &init_signed,
                    &resp_signed,
                    &initiator.requirements,
                    now,
                );
                let remote = responder.negotiator.negotiate_at(
                    &init_signed,
                    &resp_signed,
                    &responder.requirements,
                    now,
                );

                let status = match (local, remote) {
                    (Ok(local), Ok(remote)) => {
                        match local.verify_peer_transcript(&remote.transcript) {
                            Ok(()) => PairStatus::Agreed(local),
                            Err(detected) => {
                                initiator.negotiator.report_downgrade(
                                    &resp_signed.signer_key,
                                    &detected,
                                    now,
                                );
                                PairStatus::TranscriptMismatch(detected)
                            }
                        }
                    }
                    (Err(err), _) | (Ok(_), Err(err)) => PairStatus::Failed(err),
                };
                tracing::info!(
                    initiator = %initiator.id,
                    responder = %responder.id,
                    outcome = status_label(&status),
                    "pair negotiated"
                );
                report.outcomes.push(PairOutcome {
                    initiator: initiator.id.clone(),
                    responder: responder.id.clone(),
                    status,
                });
            }
        }

        self.reputation.sweep_expired(now);
        report.security_events = self.recorder.drain();
        Ok(report)
    }
}

fn status_label(status: &PairStatus) -> &'static str {
    match status {
        PairStatus::Agreed(_) => "agreed",
        PairStatus::Failed(_) => "failed",
        PairStatus::TranscriptMismatch(_) => "transcript-mismatch",
    }
}

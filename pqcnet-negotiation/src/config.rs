//! Negotiation settings shared by every binary that embeds the engine.
//!
//! Freshness and replay defaults follow the active `dev`/`test`/`prod`
//! feature profile.
//!
//! # TOML
//! ```text
//! [negotiation]
//! baseline-signature = "signature/ed25519"
//!
//! [negotiation.window]
//! max-age-secs = 300
//! max-future-drift-secs = 30
//!
//! [negotiation.replay]
//! capacity = 65536
//! sweep-every = 256
//!
//! [negotiation.requirements]
//! min-security-level = "level128"
//!
//! [[negotiation.status-overrides]]
//! algorithm = "signature/ecdsa-p256"
//! status = "deprecated"
//!
//! [[negotiation.status-overrides]]
//! algorithm = "key-exchange/ecdh-p256"
//! emergency-break = true
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendRegistry;
use crate::catalog::AlgorithmCatalog;
use crate::error::RegistryError;
use crate::negotiator::NegotiationContext;
use crate::policy::SecurityRequirements;
use crate::replay::NonceReplayGuard;
use crate::types::{AlgorithmId, AlgorithmStatus};
use crate::validator::ValidationWindow;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for pqcnet-negotiation."
);

#[cfg(feature = "dev")]
const MAX_AGE_SECS: u64 = 15 * 60;
#[cfg(feature = "test")]
const MAX_AGE_SECS: u64 = 5 * 60;
#[cfg(feature = "prod")]
const MAX_AGE_SECS: u64 = 5 * 60;

#[cfg(feature = "dev")]
const MAX_FUTURE_DRIFT_SECS: u64 = 120;
#[cfg(any(feature = "test", feature = "prod"))]
const MAX_FUTURE_DRIFT_SECS: u64 = 30;

#[cfg(feature = "dev")]
const REPLAY_CAPACITY: usize = 1_024;
#[cfg(feature = "test")]
const REPLAY_CAPACITY: usize = 4_096;
#[cfg(feature = "prod")]
const REPLAY_CAPACITY: usize = 65_536;

const fn default_max_age_secs() -> u64 {
    MAX_AGE_SECS
}

const fn default_max_future_drift_secs() -> u64 {
    MAX_FUTURE_DRIFT_SECS
}

const fn default_replay_capacity() -> usize {
    REPLAY_CAPACITY
}

const fn default_sweep_every() -> u64 {
    256
}

fn default_baseline_signature() -> AlgorithmId {
    AlgorithmId::ED25519
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Validation(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct WindowConfig {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_max_future_drift_secs")]
    pub max_future_drift_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            max_future_drift_secs: default_max_future_drift_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ReplayConfig {
    #[serde(default = "default_replay_capacity")]
    pub capacity: usize,
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: default_replay_capacity(),
            sweep_every: default_sweep_every(),
        }
    }
}

/// Administrative catalog change applied at start-up.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct StatusOverride {
    pub algorithm: AlgorithmId,
    #[serde(default)]
    pub status: Option<AlgorithmStatus>,
    /// Mark broken immediately, bypassing the forward-only lifecycle.
    #[serde(default)]
    pub emergency_break: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NegotiationConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default = "default_baseline_signature")]
    pub baseline_signature: AlgorithmId,
    #[serde(default)]
    pub requirements: SecurityRequirements,
    #[serde(default)]
    pub status_overrides: Vec<StatusOverride>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            replay: ReplayConfig::default(),
            baseline_signature: default_baseline_signature(),
            requirements: SecurityRequirements::default(),
            status_overrides: Vec::new(),
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.max_age_secs == 0 {
            return Err(ConfigError::Validation(
                "max-age-secs must be greater than zero".into(),
            ));
        }
        if self.replay.capacity == 0 || self.replay.sweep_every == 0 {
            return Err(ConfigError::Validation(
                "replay capacity and sweep interval must be greater than zero".into(),
            ));
        }
        if self.baseline_signature.category() != crate::types::AlgorithmCategory::Signature {
            return Err(ConfigError::Validation(format!(
                "baseline signature {} is not a signature algorithm",
                self.baseline_signature
            )));
        }
        for entry in &self.status_overrides {
            if entry.emergency_break == entry.status.is_some() {
                return Err(ConfigError::Validation(format!(
                    "override for {} must set exactly one of status or emergency-break",
                    entry.algorithm
                )));
            }
        }
        self.requirements.validate()
    }

    pub fn window(&self) -> ValidationWindow {
        ValidationWindow::new(
            Duration::from_secs(self.window.max_age_secs),
            Duration::from_secs(self.window.max_future_drift_secs),
        )
    }

    pub fn replay_guard(&self) -> NonceReplayGuard {
        NonceReplayGuard::new(self.replay.capacity, self.replay.sweep_every)
    }

    /// Apply `status-overrides` in order; stops at the first failure.
    pub fn apply_status_overrides(&self, catalog: &AlgorithmCatalog) -> Result<(), ConfigError> {
        for entry in &self.status_overrides {
            match entry.status {
                Some(status) => catalog.update_status(entry.algorithm, status)?,
                None => catalog.emergency_break(entry.algorithm)?,
            }
        }
        Ok(())
    }

    /// Context with a fresh replay guard over the shared catalog and backends.
    pub fn context(
        &self,
        catalog: Arc<AlgorithmCatalog>,
        backends: Arc<BackendRegistry>,
    ) -> NegotiationContext {
        NegotiationContext::new(catalog, backends, Arc::new(self.replay_guard()))
            .with_baseline_signature(self.baseline_signature)
    }
}

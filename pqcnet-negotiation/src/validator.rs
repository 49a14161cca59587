//! Admission checks for a peer's signed preference declaration.

use std::time::Duration;

use crate::backend::BackendRegistry;
use crate::catalog::CatalogSnapshot;
use crate::error::ValidationError;
use crate::preferences::{AlgorithmPreferences, SignedAlgorithmPreferences};
use crate::replay::{NonceAdmission, NonceReplayGuard};
use crate::types::{AlgorithmId, TimestampMs};

/// Freshness bounds applied to preference timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationWindow {
    pub max_age: Duration,
    pub max_future_drift: Duration,
}

impl ValidationWindow {
    pub fn new(max_age: Duration, max_future_drift: Duration) -> Self {
        Self {
            max_age,
            max_future_drift,
        }
    }

    fn max_age_ms(&self) -> u64 {
        duration_ms(self.max_age)
    }

    fn max_future_drift_ms(&self) -> u64 {
        duration_ms(self.max_future_drift)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Checks run against one catalog snapshot for the whole negotiation.
pub struct PreferenceValidator<'a> {
    catalog: &'a CatalogSnapshot,
    backends: &'a BackendRegistry,
    replay_guard: &'a NonceReplayGuard,
    baseline_signature: AlgorithmId,
}

impl<'a> PreferenceValidator<'a> {
    /// `baseline_signature` is the fixed algorithm every peer signs its
    /// preferences with, since the session's own signature algorithm is not
    /// agreed yet.
    pub fn new(
        catalog: &'a CatalogSnapshot,
        backends: &'a BackendRegistry,
        replay_guard: &'a NonceReplayGuard,
        baseline_signature: AlgorithmId,
    ) -> Self {
        Self {
            catalog,
            backends,
            replay_guard,
            baseline_signature,
        }
    }

    /// Returns the verified preferences. Recording the nonce in the replay
    /// guard is the only side effect.
    pub fn validate(
        &self,
        signed: &SignedAlgorithmPreferences,
        now: TimestampMs,
        window: &ValidationWindow,
    ) -> Result<AlgorithmPreferences, ValidationError> {
        let verifier = self
            .backends
            .signer(&self.baseline_signature)
            .ok_or(ValidationError::BackendUnavailable(self.baseline_signature))?;

        let timestamp = signed.timestamp;
        if timestamp > now.saturating_add(window.max_future_drift_ms()) {
            return Err(ValidationError::FuturePreferences { timestamp, now });
        }
        if now.saturating_sub(timestamp) > window.max_age_ms() {
            return Err(ValidationError::ExpiredPreferences { timestamp, now });
        }

        // Exclusive bound: the entry must still be live at timestamp + max_age.
        let expires_at = timestamp
            .saturating_add(window.max_age_ms())
            .saturating_add(1);
        match self
            .replay_guard
            .admit(&signed.signer_key, &signed.nonce, expires_at, now)
        {
            NonceAdmission::Fresh => {}
            NonceAdmission::Replayed => return Err(ValidationError::ReplayedNonce),
            NonceAdmission::Saturated => return Err(ValidationError::ReplayCacheSaturated),
        }

        let message = signed.signing_bytes();
        if verifier
            .verify(signed.signer_key.as_bytes(), &message, &signed.signature)
            .is_err()
        {
            // A forged message must not burn the legitimate signer's nonce.
            self.replay_guard.release(&signed.signer_key, &signed.nonce);
            return Err(ValidationError::InvalidSignature);
        }

        signed
            .preferences
            .check_well_formed(self.catalog)
            .map_err(ValidationError::MalformedPreferences)?;

        Ok(signed.preferences.clone())
    }
}

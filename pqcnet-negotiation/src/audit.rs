//! Security events and the sinks that consume them.
//!
//! The negotiator reports rejected signatures and replayed nonces; the
//! handshake layer reports transcript mismatches. A [`ReputationTracker`]
//! turns authenticated reports into a per-signer blacklist.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::DowngradeAttemptDetected;
use crate::transcript::Transcript;
use crate::types::{SignerKey, TimestampMs};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum SecurityEvent {
    InvalidSignature {
        signer: SignerKey,
        at: TimestampMs,
    },
    ReplayedNonce {
        signer: SignerKey,
        at: TimestampMs,
    },
    DowngradeAttemptDetected {
        signer: SignerKey,
        expected: Transcript,
        observed: Transcript,
        at: TimestampMs,
    },
}

impl SecurityEvent {
    pub fn invalid_signature(signer: SignerKey, at: TimestampMs) -> Self {
        Self::InvalidSignature { signer, at }
    }

    pub fn replayed_nonce(signer: SignerKey, at: TimestampMs) -> Self {
        Self::ReplayedNonce { signer, at }
    }

    pub fn downgrade(
        signer: SignerKey,
        detected: &DowngradeAttemptDetected,
        at: TimestampMs,
    ) -> Self {
        Self::DowngradeAttemptDetected {
            signer,
            expected: detected.expected,
            observed: detected.observed,
            at,
        }
    }

    pub fn signer(&self) -> &SignerKey {
        match self {
            SecurityEvent::InvalidSignature { signer, .. }
            | SecurityEvent::ReplayedNonce { signer, .. }
            | SecurityEvent::DowngradeAttemptDetected { signer, .. } => signer,
        }
    }

    pub fn at(&self) -> TimestampMs {
        match self {
            SecurityEvent::InvalidSignature { at, .. }
            | SecurityEvent::ReplayedNonce { at, .. }
            | SecurityEvent::DowngradeAttemptDetected { at, .. } => *at,
        }
    }

    /// Whether the named signer proved key possession before the event.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SecurityEvent::DowngradeAttemptDetected { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::InvalidSignature { .. } => "invalid-signature",
            SecurityEvent::ReplayedNonce { .. } => "replayed-nonce",
            SecurityEvent::DowngradeAttemptDetected { .. } => "downgrade-attempt-detected",
        }
    }
}

pub trait SecurityEventSink: Send + Sync {
    fn report(&self, event: SecurityEvent);
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NoopSink;

impl SecurityEventSink for NoopSink {
    fn report(&self, _event: SecurityEvent) {}
}

/// Fan-out sink for reporting to multiple collaborators.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn SecurityEventSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn SecurityEventSink>>) -> Self {
        Self { sinks }
    }
}

impl SecurityEventSink for CompositeSink {
    fn report(&self, event: SecurityEvent) {
        for sink in &self.sinks {
            sink.report(event.clone());
        }
    }
}

/// Keeps every reported event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<SecurityEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl SecurityEventSink for RecordingSink {
    fn report(&self, event: SecurityEvent) {
        self.events.lock().push(event);
    }
}

/// Default number of signers the [`ReputationTracker`] keeps standing for.
pub const DEFAULT_REPUTATION_CAPACITY: usize = 4096;
/// Default time an unverified report is remembered.
pub const DEFAULT_REPUTATION_RETENTION_MS: u64 = 3_600_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerStanding {
    /// Rejected signatures and replays that named this key. The key was not
    /// authenticated by those attempts, so they never blacklist it.
    pub unverified_reports: u32,
    pub blacklisted: bool,
    pub last_seen: TimestampMs,
}

/// Per-signer standing fed by security events.
///
/// Only a downgrade report blacklists: it names a signer whose preferences
/// already verified. Invalid signatures and replays carry a key nobody proved
/// possession of, so they are counted for operators but have no blacklist
/// effect. Unblacklisted entries expire after `retention_ms` and the table
/// holds at most `capacity` of them.
#[derive(Debug)]
pub struct ReputationTracker {
    standings: DashMap<SignerKey, PeerStanding>,
    capacity: usize,
    retention_ms: u64,
}

impl Default for ReputationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_REPUTATION_CAPACITY, DEFAULT_REPUTATION_RETENTION_MS)
    }
}

impl ReputationTracker {
    pub fn new(capacity: usize, retention_ms: u64) -> Self {
        Self {
            standings: DashMap::new(),
            capacity: capacity.max(1),
            retention_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.standings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.standings.is_empty()
    }

    pub fn standing(&self, signer: &SignerKey) -> PeerStanding {
        self.standings
            .get(signer)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    pub fn is_blacklisted(&self, signer: &SignerKey) -> bool {
        self.standing(signer).blacklisted
    }

    pub fn blacklisted(&self) -> Vec<SignerKey> {
        let mut keys: Vec<SignerKey> = self
            .standings
            .iter()
            .filter(|entry| entry.value().blacklisted)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop unblacklisted entries not seen within the retention window.
    pub fn sweep_expired(&self, now: TimestampMs) {
        let retention = self.retention_ms;
        self.standings.retain(|_, standing| {
            standing.blacklisted || now.saturating_sub(standing.last_seen) < retention
        });
    }

    fn blacklist(&self, event: &SecurityEvent) {
        let mut standing = self.standings.entry(event.signer().clone()).or_default();
        standing.last_seen = standing.last_seen.max(event.at());
        if !standing.blacklisted {
            standing.blacklisted = true;
            tracing::warn!(signer = %event.signer(), kind = event.kind(), "signer blacklisted");
        }
    }

    fn record_unverified(&self, event: &SecurityEvent) {
        let signer = event.signer();
        if !self.standings.contains_key(signer) && self.standings.len() >= self.capacity {
            self.sweep_expired(event.at());
            if self.standings.len() >= self.capacity {
                tracing::debug!(capacity = self.capacity, "reputation table full, report dropped");
                return;
            }
        }
        let mut standing = self.standings.entry(signer.clone()).or_default();
        standing.unverified_reports = standing.unverified_reports.saturating_add(1);
        standing.last_seen = standing.last_seen.max(event.at());
    }
}

impl SecurityEventSink for ReputationTracker {
    fn report(&self, event: SecurityEvent) {
        if event.is_authenticated() {
            self.blacklist(&event);
        } else {
            self.record_unverified(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SignerKey {
        SignerKey(vec![byte; 32])
    }

    fn downgrade_of(signer: SignerKey, at: TimestampMs) -> SecurityEvent {
        let detected = DowngradeAttemptDetected {
            expected: Transcript([1; 32]),
            observed: Transcript([2; 32]),
        };
        SecurityEvent::downgrade(signer, &detected, at)
    }

    #[test]
    fn unverified_reports_never_blacklist() {
        let tracker = ReputationTracker::default();
        for at in 0..50 {
            tracker.report(SecurityEvent::invalid_signature(key(1), at));
            tracker.report(SecurityEvent::replayed_nonce(key(1), at));
        }
        assert_eq!(
            tracker.standing(&key(1)),
            PeerStanding {
                unverified_reports: 100,
                blacklisted: false,
                last_seen: 49,
            }
        );
        assert!(tracker.blacklisted().is_empty());
    }

    #[test]
    fn downgrade_blacklists_immediately() {
        let tracker = ReputationTracker::default();
        tracker.report(downgrade_of(key(4), 9));
        assert_eq!(tracker.blacklisted(), vec![key(4)]);
        assert_eq!(tracker.standing(&key(4)).unverified_reports, 0);
    }

    #[test]
    fn unverified_entries_expire_but_blacklist_sticks() {
        let tracker = ReputationTracker::new(16, 1_000);
        tracker.report(SecurityEvent::invalid_signature(key(1), 0));
        tracker.report(downgrade_of(key(2), 0));
        tracker.sweep_expired(999);
        assert_eq!(tracker.len(), 2);
        tracker.sweep_expired(1_000);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_blacklisted(&key(2)));
        assert_eq!(tracker.standing(&key(1)), PeerStanding::default());
    }

    #[test]
    fn table_stays_within_capacity() {
        let tracker = ReputationTracker::new(4, 1_000);
        for byte in 0..32 {
            tracker.report(SecurityEvent::invalid_signature(key(byte), 10));
        }
        assert_eq!(tracker.len(), 4);
        // Reports for a key already tracked still count.
        tracker.report(SecurityEvent::replayed_nonce(key(0), 11));
        assert_eq!(tracker.standing(&key(0)).unverified_reports, 2);

        // Once the window passes, new keys displace stale ones.
        tracker.report(SecurityEvent::invalid_signature(key(200), 5_000));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.standing(&key(200)).unverified_reports, 1);

        // An authenticated downgrade is recorded even when the table is full.
        let full = ReputationTracker::new(1, 1_000);
        full.report(SecurityEvent::invalid_signature(key(1), 0));
        full.report(downgrade_of(key(2), 0));
        assert!(full.is_blacklisted(&key(2)));
    }

    #[test]
    fn composite_fans_out_to_every_sink() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let sinks: Vec<Arc<dyn SecurityEventSink>> =
            vec![first.clone(), second.clone(), Arc::new(NoopSink)];
        let composite = CompositeSink::new(sinks);
        composite.report(SecurityEvent::invalid_signature(key(1), 5));
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.drain(), vec![SecurityEvent::invalid_signature(key(1), 5)]);
        assert!(second.events().is_empty());
    }

    #[test]
    fn json_tag_matches_kind() {
        let detected = DowngradeAttemptDetected {
            expected: Transcript([3; 32]),
            observed: Transcript([4; 32]),
        };
        for event in [
            SecurityEvent::invalid_signature(key(1), 1),
            SecurityEvent::replayed_nonce(key(2), 2),
            SecurityEvent::downgrade(key(3), &detected, 3),
        ] {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["kind"], event.kind());
            let back: SecurityEvent = serde_json::from_value(value).unwrap();
            assert_eq!(back, event);
        }
    }
}

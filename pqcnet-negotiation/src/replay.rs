//! Bounded replay cache for preference nonces.
//!
//! The check and the insert happen under the same shard lock via
//! [`DashMap::entry`], so two concurrent negotiations presenting the same
//! `(signer_key, nonce)` can never both be admitted.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{PreferenceNonce, SignerKey, TimestampMs};

/// Outcome of presenting a nonce to the guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceAdmission {
    Fresh,
    Replayed,
    /// Every slot holds an unexpired nonce; the attempt is refused.
    Saturated,
}

impl NonceAdmission {
    pub fn is_fresh(&self) -> bool {
        matches!(self, NonceAdmission::Fresh)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct NonceKey {
    signer: SignerKey,
    nonce: PreferenceNonce,
}

pub struct NonceReplayGuard {
    entries: DashMap<NonceKey, TimestampMs>,
    capacity: usize,
    sweep_every: u64,
    admissions: AtomicU64,
}

impl NonceReplayGuard {
    /// `capacity` bounds live entries; expired ones are swept every
    /// `sweep_every` admissions and whenever the bound is reached.
    pub fn new(capacity: usize, sweep_every: u64) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            sweep_every: sweep_every.max(1),
            admissions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Boolean view of [`admit`](Self::admit): `true` when the nonce is fresh
    /// and has been recorded.
    pub fn check_and_insert(
        &self,
        signer_key: &SignerKey,
        nonce: &PreferenceNonce,
        expires_at: TimestampMs,
        now: TimestampMs,
    ) -> bool {
        self.admit(signer_key, nonce, expires_at, now).is_fresh()
    }

    /// Atomically check `(signer_key, nonce)` and record it until `expires_at`.
    pub fn admit(
        &self,
        signer_key: &SignerKey,
        nonce: &PreferenceNonce,
        expires_at: TimestampMs,
        now: TimestampMs,
    ) -> NonceAdmission {
        let admissions = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if admissions % self.sweep_every == 0 {
            self.sweep_expired(now);
        }
        // Soft bound: concurrent admissions may overshoot by the number of
        // in-flight callers.
        if self.entries.len() >= self.capacity {
            self.sweep_expired(now);
            if self.entries.len() >= self.capacity {
                tracing::warn!(capacity = self.capacity, "nonce replay cache saturated");
                return NonceAdmission::Saturated;
            }
        }

        let key = NonceKey {
            signer: signer_key.clone(),
            nonce: *nonce,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                if *slot.get() > now {
                    NonceAdmission::Replayed
                } else {
                    slot.insert(expires_at);
                    NonceAdmission::Fresh
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                NonceAdmission::Fresh
            }
        }
    }

    /// Forget a previously admitted nonce.
    pub fn release(&self, signer_key: &SignerKey, nonce: &PreferenceNonce) {
        self.entries.remove(&NonceKey {
            signer: signer_key.clone(),
            nonce: *nonce,
        });
    }

    /// Drop every entry whose expiry is at or before `now`; returns how many.
    pub fn sweep_expired(&self, now: TimestampMs) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn signer(byte: u8) -> SignerKey {
        SignerKey(vec![byte; 32])
    }

    #[test]
    fn second_presentation_is_a_replay() {
        let guard = NonceReplayGuard::new(16, 1_000);
        let nonce = PreferenceNonce([1u8; 32]);
        assert!(guard.check_and_insert(&signer(1), &nonce, 500, 100));
        assert_eq!(
            guard.admit(&signer(1), &nonce, 500, 200),
            NonceAdmission::Replayed
        );
        // Same nonce under another signer is independent.
        assert!(guard.check_and_insert(&signer(2), &nonce, 500, 200));
    }

    #[test]
    fn expired_entries_can_be_reused_and_swept() {
        let guard = NonceReplayGuard::new(16, 1_000);
        let nonce = PreferenceNonce([2u8; 32]);
        assert!(guard.check_and_insert(&signer(1), &nonce, 300, 0));
        assert!(guard.check_and_insert(&signer(1), &nonce, 900, 300));
        assert_eq!(guard.sweep_expired(899), 0);
        assert_eq!(guard.sweep_expired(900), 1);
        assert!(guard.is_empty());
    }

    #[test]
    fn saturation_fails_closed_until_entries_expire() {
        let guard = NonceReplayGuard::new(2, 1_000);
        assert!(guard.check_and_insert(&signer(1), &PreferenceNonce([1u8; 32]), 100, 0));
        assert!(guard.check_and_insert(&signer(1), &PreferenceNonce([2u8; 32]), 100, 0));
        assert_eq!(
            guard.admit(&signer(1), &PreferenceNonce([3u8; 32]), 100, 50),
            NonceAdmission::Saturated
        );
        assert_eq!(
            guard.admit(&signer(1), &PreferenceNonce([3u8; 32]), 200, 100),
            NonceAdmission::Fresh
        );
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn release_forgets_the_nonce() {
        let guard = NonceReplayGuard::new(4, 1_000);
        let nonce = PreferenceNonce([4u8; 32]);
        assert!(guard.check_and_insert(&signer(1), &nonce, 100, 0));
        guard.release(&signer(1), &nonce);
        assert!(guard.check_and_insert(&signer(1), &nonce, 100, 0));
    }

    #[test]
    fn concurrent_replays_admit_exactly_once() {
        let guard = NonceReplayGuard::new(1_024, 64);
        let nonce = PreferenceNonce([9u8; 32]);
        let admitted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    if guard.check_and_insert(&signer(7), &nonce, 10_000, 1) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}

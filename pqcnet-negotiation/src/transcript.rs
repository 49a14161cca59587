//! Canonical negotiation transcript.
//!
//! Layout version 1 (all integers little-endian, 100 bytes total):
//!
//! ```text
//! offset  len  field
//! 0       8    domain tag "PQCNTX01"
//! 8       2    layout version = 1
//! 10      2    negotiated protocol version
//! 12      24   Signature, Hash, KeyExchange, Encryption ids (6 bytes each)
//! 36      32   digest of the initiator's signed preferences
//! 68      32   digest of the responder's signed preferences
//! ```
//!
//! The transcript is SHA-256 over those bytes. The layout version is carried
//! inside the hashed input, so a future layout can never collide with this one.

use core::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DowngradeAttemptDetected;
use crate::types::{AlgorithmId, ALGORITHM_ID_WIRE_LEN};

pub const TRANSCRIPT_LAYOUT_VERSION: u16 = 1;
pub const TRANSCRIPT_INPUT_LEN: usize = 8 + 2 + 2 + 4 * ALGORITHM_ID_WIRE_LEN + 32 + 32;

const TRANSCRIPT_DOMAIN: &[u8; 8] = b"PQCNTX01";

/// 32-byte binding value handed to the handshake layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transcript(pub [u8; 32]);

impl Transcript {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transcript({})", self.to_hex())
    }
}

pub struct TranscriptBinder;

impl TranscriptBinder {
    pub fn canonical_bytes(
        protocol_version: u16,
        selected: &[AlgorithmId; 4],
        initiator_digest: &[u8; 32],
        responder_digest: &[u8; 32],
    ) -> [u8; TRANSCRIPT_INPUT_LEN] {
        let mut out = [0u8; TRANSCRIPT_INPUT_LEN];
        out[..8].copy_from_slice(TRANSCRIPT_DOMAIN);
        out[8..10].copy_from_slice(&TRANSCRIPT_LAYOUT_VERSION.to_le_bytes());
        out[10..12].copy_from_slice(&protocol_version.to_le_bytes());
        let mut offset = 12;
        for id in selected {
            out[offset..offset + ALGORITHM_ID_WIRE_LEN].copy_from_slice(&id.to_wire());
            offset += ALGORITHM_ID_WIRE_LEN;
        }
        out[offset..offset + 32].copy_from_slice(initiator_digest);
        out[offset + 32..].copy_from_slice(responder_digest);
        out
    }

    /// `selected` must be in Signature, Hash, KeyExchange, Encryption order.
    pub fn bind(
        protocol_version: u16,
        selected: &[AlgorithmId; 4],
        initiator_digest: &[u8; 32],
        responder_digest: &[u8; 32],
    ) -> Transcript {
        let bytes =
            Self::canonical_bytes(protocol_version, selected, initiator_digest, responder_digest);
        Transcript(Sha256::digest(bytes).into())
    }

    /// Compare the locally negotiated transcript with the one the peer bound
    /// into its handshake message.
    pub fn verify(
        expected: &Transcript,
        observed: &Transcript,
    ) -> Result<(), DowngradeAttemptDetected> {
        let diff = expected
            .0
            .iter()
            .zip(observed.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff == 0 {
            Ok(())
        } else {
            Err(DowngradeAttemptDetected {
                expected: *expected,
                observed: *observed,
            })
        }
    }
}

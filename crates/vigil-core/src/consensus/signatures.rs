use crate::cell::CellError;
use crate::types::*;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Prefix validators put in front of `root_hash || file_hash` before signing.
pub const SIGNING_PREFIX: [u8; 4] = [0x70, 0x6e, 0x0b, 0xc5];

/// Only the heaviest validators of a set take part in signing a block.
pub const MAX_MAIN_VALIDATORS: usize = 100;

/// Errors raised while attesting a block.
/// Each variant names a specific, actionable failure rather than a generic "invalid".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Proof mismatch on {what}: expected {expected}, got {got}")]
    ProofMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    #[error("Signature from validator {node_id} does not verify: {reason}")]
    SignatureVerification { node_id: String, reason: String },

    #[error("Insufficient signed weight: {accepted} of top weight {top} (need more than two thirds)")]
    InsufficientWeight { accepted: u128, top: u128 },

    #[error("Malformed cell: {0}")]
    Malformed(#[from] CellError),
}

impl VerificationError {
    /// Insufficient weight is answered with a `Reject`; everything else aborts the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VerificationError::InsufficientWeight { .. })
    }
}

/// Tally of one signature check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub accepted_weight: u128,
    pub top_weight: u128,
    pub reached: bool,
}

/// `SIGNING_PREFIX || root_hash || file_hash`.
pub fn signing_message(root_hash: &[u8; 32], file_hash: &[u8; 32]) -> [u8; 68] {
    let mut message = [0u8; 68];
    message[..4].copy_from_slice(&SIGNING_PREFIX);
    message[4..36].copy_from_slice(root_hash);
    message[36..].copy_from_slice(file_hash);
    message
}

/// Sum of the `MAX_MAIN_VALIDATORS` largest weights in `set`.
pub fn top_weight(set: &ValidatorSet) -> u128 {
    let mut weights: Vec<u64> = set.iter().map(|v| v.weight).collect();
    weights.sort_unstable_by(|a, b| b.cmp(a));
    weights
        .into_iter()
        .take(MAX_MAIN_VALIDATORS)
        .map(u128::from)
        .sum()
}

/// Strictly more than two thirds of `top`, and never on zero weight.
pub fn has_quorum(accepted: u128, top: u128) -> bool {
    accepted > 0 && accepted * 3 > top * 2
}

/// Check `signatures` over `message` against `set`.
///
/// Signatures from unknown node ids are ignored, and a validator that signed
/// twice is counted once. A signature that names a known validator but does
/// not verify fails the whole check: that can only be forged or corrupted input.
pub fn verify_signatures(
    set: &ValidatorSet,
    signatures: &[Signature],
    message: &[u8],
) -> Result<QuorumOutcome, VerificationError> {
    let top = top_weight(set);
    let by_node_id: HashMap<[u8; 32], &ValidatorDescr> =
        set.iter().map(|v| (v.node_id_short(), v)).collect();

    let mut counted = HashSet::new();
    let mut accepted: u128 = 0;
    for sig in signatures {
        let Some(validator) = by_node_id.get(&sig.node_id_short) else {
            log::debug!("Skipping signature from unknown node {}", hex::encode(sig.node_id_short));
            continue;
        };
        if !counted.insert(sig.node_id_short) {
            continue;
        }

        let node_id = hex::encode(sig.node_id_short);
        let key = VerifyingKey::from_bytes(&validator.pubkey).map_err(|e| {
            VerificationError::SignatureVerification {
                node_id: node_id.clone(),
                reason: format!("invalid public key: {e}"),
            }
        })?;
        let signature = Ed25519Signature::from_bytes(&sig.signature);
        key.verify(message, &signature)
            .map_err(|e| VerificationError::SignatureVerification {
                node_id,
                reason: e.to_string(),
            })?;

        accepted += u128::from(validator.weight);
    }

    Ok(QuorumOutcome {
        accepted_weight: accepted,
        top_weight: top,
        reached: has_quorum(accepted, top),
    })
}

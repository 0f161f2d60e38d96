use crate::cell::{CellArena, CellError, CellRef, CellType};
use crate::consensus::signatures::{signing_message, verify_signatures, VerificationError};
use crate::consensus::validator_set::{extract_from_block, ExtractedEpoch};
use crate::proof::virtual_root;
use crate::types::*;

/// Result of checking a block against the trusted validator set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Signatures verified but did not reach two thirds of the top weight.
    Rejected { accepted_weight: u128, top_weight: u128 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Key-block light client: holds one trusted epoch and advances it only
/// through key blocks signed by that epoch's current validator set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiteClient {
    state: EpochState,
}

impl LiteClient {
    /// Trust-on-first-use: adopt the validator sets of a genesis key block.
    ///
    /// The genesis block is not signature-checked; the caller vouches for
    /// `block.id`. Its data must still hash to `block.id.root_hash`.
    pub fn deploy(
        arena: &CellArena,
        block: &BlockData,
        partition: ChainPartition,
    ) -> Result<Self, VerificationError> {
        let root = virtual_root(arena, block.data)?;
        check_hash("genesis root hash", &block.id.root_hash, &arena.hash(root, 0)?)?;

        let epoch = extract_from_block(arena, root, partition)?;
        let state = epoch_state(epoch, block.id.seqno, partition)?;
        log::info!(
            "Deployed lite client at key block {} with {} validators",
            block.id,
            state.cur_set.len()
        );
        Ok(Self { state })
    }

    pub fn epoch_state(&self) -> &EpochState {
        &self.state
    }

    pub fn chain_partition(&self) -> ChainPartition {
        self.state.chain_partition
    }

    /// Attest a new key block and, if it is signed by the current set, adopt its epoch.
    ///
    /// The next epoch is computed in full before it replaces the current one,
    /// so any error leaves the state untouched.
    pub fn new_key_block(
        &mut self,
        arena: &CellArena,
        header: &BlockHeader,
        block: &BlockData,
        signatures: &[Signature],
    ) -> Result<Verdict, VerificationError> {
        let root = match self.attest(arena, header, block, signatures) {
            Ok(root) => root,
            Err(e) => return rejection(e, &header.id),
        };

        let epoch = extract_from_block(arena, root, self.state.chain_partition)?;
        let next = epoch_state(epoch, block.id.seqno, self.state.chain_partition)?;
        log::info!(
            "Advanced epoch to key block {} ({} validators, valid {}..{})",
            block.id,
            next.cur_set.len(),
            next.utime_since,
            next.utime_until
        );
        self.state = next;
        Ok(Verdict::Accepted)
    }

    /// Attest any block against the current set. Never changes the state.
    pub fn check_block(
        &self,
        arena: &CellArena,
        header: &BlockHeader,
        block: &BlockData,
        signatures: &[Signature],
    ) -> Result<Verdict, VerificationError> {
        match self.attest(arena, header, block, signatures) {
            Ok(_) => {
                log::debug!("Block {} attested", block.id);
                Ok(Verdict::Accepted)
            }
            Err(e) => rejection(e, &header.id),
        }
    }

    /// Verify the header proof and the signatures; return the block's root cell.
    fn attest(
        &self,
        arena: &CellArena,
        header: &BlockHeader,
        block: &BlockData,
        signatures: &[Signature],
    ) -> Result<CellRef, VerificationError> {
        // 1. The header proof must commit to the header's root hash
        let proof = arena.get(header.header_proof)?;
        if proof.cell_type() != CellType::MerkleProof {
            return Err(CellError::InvalidExotic {
                cell_type: proof.cell_type(),
                reason: "header proof must be a MerkleProof".into(),
            }
            .into());
        }
        let proven_root = arena.hash(proof.refs()[0], 0)?;
        check_hash("header proof", &header.id.root_hash, &proven_root)?;

        // 2. The data must belong to the same block
        if block.id != header.id {
            return Err(VerificationError::ProofMismatch {
                what: "block id",
                expected: header.id.to_string(),
                got: block.id.to_string(),
            });
        }
        let root = virtual_root(arena, block.data)?;
        check_hash("block data", &header.id.root_hash, &arena.hash(root, 0)?)?;

        // 3. Signatures of the current set over root_hash || file_hash
        let message = signing_message(&proven_root, &header.id.file_hash);
        let outcome = verify_signatures(&self.state.cur_set, signatures, &message)?;
        if !outcome.reached {
            return Err(VerificationError::InsufficientWeight {
                accepted: outcome.accepted_weight,
                top: outcome.top_weight,
            });
        }
        Ok(root)
    }
}

// --- Helper functions ---

fn check_hash(
    what: &'static str,
    expected: &[u8; 32],
    got: &[u8; 32],
) -> Result<(), VerificationError> {
    if expected != got {
        return Err(VerificationError::ProofMismatch {
            what,
            expected: hex::encode(expected),
            got: hex::encode(got),
        });
    }
    Ok(())
}

fn rejection(e: VerificationError, id: &BlockId) -> Result<Verdict, VerificationError> {
    match e {
        VerificationError::InsufficientWeight { accepted, top } => {
            log::warn!("Rejecting block {id}: signed weight {accepted} of {top}");
            Ok(Verdict::Rejected {
                accepted_weight: accepted,
                top_weight: top,
            })
        }
        other => Err(other),
    }
}

fn epoch_state(
    epoch: ExtractedEpoch,
    seqno: u32,
    partition: ChainPartition,
) -> Result<EpochState, VerificationError> {
    if epoch.cur_set.is_empty() {
        return Err(CellError::layout(
            "config",
            "key block carries no current validator set",
        )
        .into());
    }
    Ok(EpochState {
        prev_set: epoch.prev_set,
        cur_set: epoch.cur_set,
        next_set: epoch.next_set,
        utime_since: epoch.utime_since,
        utime_until: epoch.utime_until,
        seqno,
        chain_partition: partition,
    })
}

use super::InclusionError;
use crate::cell::dict::{self, DictKey};
use crate::cell::{CellArena, CellError, CellRef, CellType};
use crate::types::{BLOCK_EXTRA_MAGIC, BLOCK_MAGIC};

/// Tag of `transaction$0111`.
const TRANSACTION_TAG: u64 = 0b0111;

/// Tag of `acc_trans#5`.
const ACCOUNT_BLOCK_TAG: u64 = 0x5;

/// Confirm that `transaction` sits in the block proven by `proof`.
///
/// `proof` must be a MerkleProof over the block whose level-0 hash is
/// `root_hash`. The walk follows `extra → account_blocks[account] →
/// transactions[lt]` and compares the cell found there with `transaction`.
pub fn verify_transaction_in_block(
    arena: &CellArena,
    proof: CellRef,
    transaction: CellRef,
    root_hash: &[u8; 32],
) -> Result<(), InclusionError> {
    // 1. The proof must be rooted at the attested block
    let proof_cell = arena.get(proof)?;
    if proof_cell.cell_type() != CellType::MerkleProof {
        return Err(CellError::InvalidExotic {
            cell_type: proof_cell.cell_type(),
            reason: "transaction proof must be a MerkleProof".into(),
        }
        .into());
    }
    let block = proof_cell.refs()[0];
    let proven = arena.hash(block, 0)?;
    if &proven != root_hash {
        return Err(InclusionError::ProofMismatch {
            expected: hex::encode(root_hash),
            got: hex::encode(proven),
        });
    }

    // 2. Which account and logical time the transaction claims
    let (account, lt) = transaction_key(arena, transaction).map_err(|e| {
        InclusionError::TransactionNotInBlock {
            reason: format!("not a transaction cell: {e}"),
        }
    })?;

    // 3. Walk the proof down to the transaction
    let found = find_transaction(arena, block, &account, lt).map_err(|e| match e {
        CellError::PrunedBranch { .. } => InclusionError::TransactionNotInBlock {
            reason: format!("proof does not cover the path: {e}"),
        },
        other => InclusionError::Malformed(other),
    })?;
    let Some(found) = found else {
        return Err(InclusionError::TransactionNotInBlock {
            reason: format!(
                "no transaction at lt {lt} for account {}",
                hex::encode(account)
            ),
        });
    };

    let expected = arena.hash(transaction, 0)?;
    let got = arena.hash(found, 0)?;
    if expected != got {
        return Err(InclusionError::TransactionNotInBlock {
            reason: format!(
                "block holds transaction {} at lt {lt}, not {}",
                hex::encode(got),
                hex::encode(expected)
            ),
        });
    }
    Ok(())
}

// --- Helper functions ---

fn transaction_key(arena: &CellArena, transaction: CellRef) -> Result<([u8; 32], u64), CellError> {
    let mut s = arena.slice(transaction)?;
    s.expect_magic(TRANSACTION_TAG, 4)?;
    let account = s.load_u256()?;
    let lt = s.load_u64()?;
    Ok((account, lt))
}

fn find_transaction(
    arena: &CellArena,
    block: CellRef,
    account: &[u8; 32],
    lt: u64,
) -> Result<Option<CellRef>, CellError> {
    let mut block = arena.slice(block)?;
    block.expect_magic(BLOCK_MAGIC as u64, 32)?;

    let mut extra = arena.slice(block.ref_at(3)?)?;
    extra.expect_magic(BLOCK_EXTRA_MAGIC as u64, 32)?;
    let mut account_blocks = arena.slice(extra.ref_at(2)?)?;

    let key = DictKey::from_bytes(account);
    let Some(mut account_block) = dict::get_optional(
        &mut account_blocks,
        256,
        &key,
        Some(dict::skip_currency_collection),
    )?
    else {
        return Ok(None);
    };

    account_block.expect_magic(ACCOUNT_BLOCK_TAG, 4)?;
    if &account_block.load_u256()? != account {
        return Err(CellError::layout(
            "AccountBlock",
            "account address differs from its dictionary key",
        ));
    }

    let key = DictKey::from_uint(lt, 64);
    match dict::get(account_block, 64, &key, Some(dict::skip_currency_collection))? {
        Some(mut leaf) => Ok(Some(leaf.load_ref()?)),
        None => Ok(None),
    }
}

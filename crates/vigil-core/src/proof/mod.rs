//! Pruned proofs over block data.
//!
//! A pruned proof is a MerkleProof cell whose child is the original block
//! with every subtree the verifier does not need replaced by a pruned branch.
//! The child's level-0 hash is unchanged, so the proof still commits to the
//! block's `root_hash`.

pub mod layout;

pub use layout::{BasechainLayout, MasterchainLayout, McBlockExtraLayout, McBlockExtraParts};

use crate::cell::{CellArena, CellBuilder, CellError, CellRef, CellType};
use crate::types::{ChainPartition, BLOCK_EXTRA_MAGIC, BLOCK_MAGIC};

const PRUNED_BRANCH_TAG: u64 = 1;
const MERKLE_PROOF_TAG: u64 = 3;

/// Replace `cell` with a pruned branch carrying its level-0 hash and depth.
///
/// Only level-0 cells can be pruned here; pruning a subtree that already
/// contains pruned branches would need the higher stored hashes as well.
pub fn create_pruned_branch(arena: &mut CellArena, cell: CellRef) -> Result<CellRef, CellError> {
    let (level, hash, depth) = {
        let c = arena.get(cell)?;
        (c.level(), c.hash(0), c.depth(0))
    };
    if level != 0 {
        return Err(CellError::InvalidExotic {
            cell_type: CellType::PrunedBranch,
            reason: format!("cannot prune a level {level} subtree"),
        });
    }

    let mut b = CellBuilder::new();
    b.store_uint(PRUNED_BRANCH_TAG, 8)?
        .store_uint(1, 8)?
        .store_u256(&hash)?
        .store_uint(depth as u64, 16)?;
    b.build_exotic(arena)
}

/// Wrap `root` in a MerkleProof cell committing to its level-0 hash and depth.
pub fn create_merkle_proof(arena: &mut CellArena, root: CellRef) -> Result<CellRef, CellError> {
    let (hash, depth) = (arena.hash(root, 0)?, arena.depth(root, 0)?);
    let mut b = CellBuilder::new();
    b.store_uint(MERKLE_PROOF_TAG, 8)?
        .store_u256(&hash)?
        .store_uint(depth as u64, 16)?
        .store_ref(root)?;
    b.build_exotic(arena)
}

/// The block cell a `BlockData.data` stands for: the child of a MerkleProof,
/// or the cell itself when the full block was supplied.
pub fn virtual_root(arena: &CellArena, cell: CellRef) -> Result<CellRef, CellError> {
    let c = arena.get(cell)?;
    match c.cell_type() {
        CellType::Ordinary => Ok(cell),
        CellType::MerkleProof => Ok(c.refs()[0]),
        other => Err(CellError::InvalidExotic {
            cell_type: other,
            reason: "block data must be an ordinary cell or a MerkleProof".into(),
        }),
    }
}

/// Prove only the block's `info`: `value_flow`, `state_update` and `extra`
/// become pruned branches.
pub fn prune_except_block_info(arena: &mut CellArena, block: CellRef) -> Result<CellRef, CellError> {
    let (global_id, refs) = read_block(arena, block)?;
    let [info, value_flow, state_update, extra] = refs;

    let value_flow = create_pruned_branch(arena, value_flow)?;
    let state_update = create_pruned_branch(arena, state_update)?;
    let extra = create_pruned_branch(arena, extra)?;

    let root = store_block(arena, global_id, [info, value_flow, state_update, extra])?;
    log::debug!("Pruned block down to its info ({} cells in arena)", arena.len());
    create_merkle_proof(arena, root)
}

/// Prove the block's `info` and the config dictionary of its `McBlockExtra`.
///
/// Message queues, account blocks and the partition's leading references are
/// pruned; `rand_seed`, `created_by` and the McBlockExtra payload are kept
/// verbatim since they are plain bits of cells on the path.
pub fn prune_except_block_info_and_config(
    arena: &mut CellArena,
    block: CellRef,
    partition: ChainPartition,
) -> Result<CellRef, CellError> {
    let (global_id, refs) = read_block(arena, block)?;
    let [info, value_flow, state_update, extra] = refs;

    // 1. Split block_extra into its message/account refs, its bits and McBlockExtra
    let (extra_bits, extra_bit_len, extra_refs, mc_extra) = {
        let mut s = arena.slice(extra)?;
        s.expect_magic(BLOCK_EXTRA_MAGIC as u64, 32)?;
        let in_msgs = s.load_ref()?;
        let out_msgs = s.load_ref()?;
        let account_blocks = s.load_ref()?;
        let bit_len = s.remaining_bits();
        // rand_seed, created_by and the custom maybe-bit
        let bits = s.load_bits(bit_len)?;
        let mc_extra = s.load_ref().map_err(|_| {
            CellError::layout("block_extra", "block carries no McBlockExtra")
        })?;
        (bits, bit_len, [in_msgs, out_msgs, account_blocks], mc_extra)
    };

    // 2. Keep the config, prune everything in front of it
    let layout = partition.layout();
    let mut parts = layout.split(arena.slice(mc_extra)?)?;
    for cell in parts.leading.iter_mut() {
        *cell = create_pruned_branch(arena, *cell)?;
    }
    let mc_extra = layout.assemble(arena, &parts)?;

    // 3. Rebuild block_extra with pruned message queues and account blocks
    let mut b = CellBuilder::new();
    b.store_uint(BLOCK_EXTRA_MAGIC as u64, 32)?;
    for cell in extra_refs {
        let pruned = create_pruned_branch(arena, cell)?;
        b.store_ref(pruned)?;
    }
    b.store_bits(&extra_bits, extra_bit_len)?.store_ref(mc_extra)?;
    let extra = b.build(arena)?;

    // 4. Rebuild the block around the kept info and the rebuilt extra
    let value_flow = create_pruned_branch(arena, value_flow)?;
    let state_update = create_pruned_branch(arena, state_update)?;
    let root = store_block(arena, global_id, [info, value_flow, state_update, extra])?;
    log::debug!(
        "Pruned {:?} block down to info and config (key block: {})",
        partition,
        parts.key_block
    );
    create_merkle_proof(arena, root)
}

// --- Helper functions ---

/// Read `block#11ef55aa global_id:int32` and its four references.
fn read_block(arena: &CellArena, block: CellRef) -> Result<(i32, [CellRef; 4]), CellError> {
    let mut s = arena.slice(block)?;
    s.expect_magic(BLOCK_MAGIC as u64, 32)?;
    let global_id = s.load_int(32)? as i32;
    if s.remaining_bits() != 0 || s.remaining_refs() != 4 {
        return Err(CellError::layout(
            "block",
            format!(
                "expected 4 references and no trailing bits, got {} refs and {} bits",
                s.remaining_refs(),
                s.remaining_bits()
            ),
        ));
    }
    let refs = [s.load_ref()?, s.load_ref()?, s.load_ref()?, s.load_ref()?];
    Ok((global_id, refs))
}

fn store_block(
    arena: &mut CellArena,
    global_id: i32,
    refs: [CellRef; 4],
) -> Result<CellRef, CellError> {
    let mut b = CellBuilder::new();
    b.store_uint(BLOCK_MAGIC as u64, 32)?
        .store_int(global_id as i64, 32)?;
    for cell in refs {
        b.store_ref(cell)?;
    }
    b.build(arena)
}

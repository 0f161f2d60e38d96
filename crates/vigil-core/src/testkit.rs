//! Deterministic fixtures: validator keys, key blocks, configs and
//! transaction proofs, built cell by cell.

use crate::cell::dict::{self, DictKey};
use crate::cell::{CellArena, CellBuilder, CellRef};
use crate::consensus::signatures::{signing_message, MAX_MAIN_VALIDATORS};
use crate::consensus::validator_set::{
    CONFIG_CUR_VALIDATORS, CONFIG_NEXT_VALIDATORS, CONFIG_PREV_VALIDATORS, SIG_PUB_KEY_MAGIC,
};
use crate::proof::layout::MC_BLOCK_EXTRA_MAGIC;
use crate::proof::{
    create_merkle_proof, create_pruned_branch, prune_except_block_info, virtual_root,
};
use crate::types::*;
use ed25519_dalek::{Signer, SigningKey};
use std::collections::BTreeMap;

pub const UTIME_SINCE: u32 = 1_700_000_000;
pub const UTIME_UNTIL: u32 = 1_700_065_536;
pub const DEFAULT_WEIGHT: u64 = 1_000;
pub const GLOBAL_ID: i32 = -239;

/// Validator signing keys with their weights.
pub struct Keys {
    keys: Vec<SigningKey>,
    weights: Vec<u64>,
}

impl Keys {
    pub fn new(n: usize) -> Self {
        Self::with_seed(n, 1)
    }

    pub fn with_seed(n: usize, seed: u64) -> Self {
        Self::generate(&vec![DEFAULT_WEIGHT; n], seed)
    }

    pub fn with_weights(weights: &[u64]) -> Self {
        Self::generate(weights, 1)
    }

    fn generate(weights: &[u64], seed: u64) -> Self {
        let keys = (0..weights.len() as u64)
            .map(|i| {
                let mut preimage = [0u8; 16];
                preimage[..8].copy_from_slice(&seed.to_be_bytes());
                preimage[8..].copy_from_slice(&i.to_be_bytes());
                SigningKey::from_bytes(&crate::cell::sha256(&preimage))
            })
            .collect();
        Self {
            keys,
            weights: weights.to_vec(),
        }
    }

    pub fn validator_set(&self) -> ValidatorSet {
        let validators: BTreeMap<u16, ValidatorDescr> = self
            .keys
            .iter()
            .zip(&self.weights)
            .enumerate()
            .map(|(i, (key, weight))| {
                let descr = ValidatorDescr {
                    kind: ValidatorKind::SigPubKey,
                    pubkey: key.verifying_key().to_bytes(),
                    weight: *weight,
                    adnl_addr: None,
                };
                (i as u16, descr)
            })
            .collect();
        let total = validators.len() as u16;
        ValidatorSet {
            utime_since: UTIME_SINCE,
            utime_until: UTIME_UNTIL,
            total,
            main: total.min(MAX_MAIN_VALIDATORS as u16),
            total_weight: None,
            validators,
        }
    }

    /// Signatures over `message` from the validators at `indices`.
    pub fn sign_with(&self, indices: &[usize], message: &[u8]) -> Vec<Signature> {
        let set = self.validator_set();
        indices
            .iter()
            .map(|i| Signature {
                node_id_short: set.validators[&(*i as u16)].node_id_short(),
                signature: self.keys[*i].sign(message).to_bytes(),
            })
            .collect()
    }
}

/// A block holding two transactions of one account, and a proof for the second.
pub struct TxFixture {
    pub block: CellRef,
    pub tx: TxWithProof,
    pub account: [u8; 32],
    pub lt: u64,
}

pub fn store_validator_set(arena: &mut CellArena, set: &ValidatorSet, extended: bool) -> CellRef {
    let mut values = BTreeMap::new();
    for (index, v) in &set.validators {
        let mut b = CellBuilder::new();
        b.store_uint(v.kind.tag() as u64, 8).unwrap()
            .store_uint(SIG_PUB_KEY_MAGIC as u64, 32).unwrap()
            .store_u256(&v.pubkey).unwrap()
            .store_uint(v.weight, 64).unwrap();
        if let Some(adnl) = &v.adnl_addr {
            b.store_u256(adnl).unwrap();
        }
        values.insert(DictKey::from_uint(*index as u64, 16), b);
    }
    let list = dict::build(arena, 16, &values, None).unwrap();

    let mut b = CellBuilder::new();
    b.store_uint(if extended { 0x12 } else { 0x11 }, 8).unwrap()
        .store_uint(set.utime_since as u64, 32).unwrap()
        .store_uint(set.utime_until as u64, 32).unwrap()
        .store_uint(set.total as u64, 16).unwrap()
        .store_uint(set.main as u64, 16).unwrap();
    if extended {
        let total_weight: u64 = set.iter().map(|v| v.weight).sum();
        b.store_uint(total_weight, 64).unwrap().store_maybe_ref(list).unwrap();
    } else {
        // inline Hashmap 16: splice the root edge
        let root = list.expect("a 0x11 set needs at least one validator");
        b.store_slice(&arena.slice(root).unwrap()).unwrap();
    }
    b.build(arena).unwrap()
}

/// A key block whose config carries `keys` as current set and a one-validator previous set.
pub fn key_block(arena: &mut CellArena, keys: &Keys, partition: ChainPartition) -> CellRef {
    key_block_with(arena, keys, partition, GLOBAL_ID)
}

pub fn key_block_with(
    arena: &mut CellArena,
    keys: &Keys,
    partition: ChainPartition,
    global_id: i32,
) -> CellRef {
    build_key_block(arena, keys, None, partition, global_id)
}

/// A key block that also announces `next` as the upcoming set (parameter 36).
pub fn key_block_with_next(
    arena: &mut CellArena,
    keys: &Keys,
    next: &Keys,
    partition: ChainPartition,
) -> CellRef {
    build_key_block(arena, keys, Some(next), partition, GLOBAL_ID)
}

fn build_key_block(
    arena: &mut CellArena,
    keys: &Keys,
    next: Option<&Keys>,
    partition: ChainPartition,
    global_id: i32,
) -> CellRef {
    let cur = store_validator_set(arena, &keys.validator_set(), false);
    let prev = store_validator_set(arena, &Keys::with_seed(1, 999).validator_set(), true);
    let mut params = vec![(CONFIG_PREV_VALIDATORS, prev), (CONFIG_CUR_VALIDATORS, cur)];
    if let Some(next) = next {
        let next = store_validator_set(arena, &next.validator_set(), true);
        params.push((CONFIG_NEXT_VALIDATORS, next));
    }
    let config = config_dict(arena, &params);
    let mc_extra = mc_block_extra(arena, partition, Some(config));
    let account_blocks = empty_account_blocks(arena);
    let parts = BlockParts::new(arena, account_blocks, mc_extra);
    parts.assemble(arena, global_id)
}

/// A key block whose config lacks parameter 34.
pub fn key_block_without_current_set(arena: &mut CellArena, partition: ChainPartition) -> CellRef {
    let prev = store_validator_set(arena, &Keys::with_seed(1, 999).validator_set(), true);
    let config = config_dict(arena, &[(CONFIG_PREV_VALIDATORS, prev)]);
    let mc_extra = mc_block_extra(arena, partition, Some(config));
    let account_blocks = empty_account_blocks(arena);
    let parts = BlockParts::new(arena, account_blocks, mc_extra);
    parts.assemble(arena, GLOBAL_ID)
}

/// An ordinary (non-key) block.
pub fn plain_block(arena: &mut CellArena, partition: ChainPartition) -> CellRef {
    let mc_extra = mc_block_extra(arena, partition, None);
    let account_blocks = empty_account_blocks(arena);
    let parts = BlockParts::new(arena, account_blocks, mc_extra);
    parts.assemble(arena, GLOBAL_ID)
}

/// `BlockData` for `data`, with an id derived from its root hash.
pub fn block_data(arena: &CellArena, data: CellRef, seqno: u32) -> BlockData {
    let root = virtual_root(arena, data).unwrap();
    let root_hash = arena.hash(root, 0).unwrap();
    BlockData {
        id: BlockId {
            workchain: -1,
            shard: i64::MIN,
            seqno,
            root_hash,
            file_hash: crate::cell::sha256(&root_hash),
        },
        data,
    }
}

/// Header, data and signatures from `signers` for the block `block`.
pub fn attest(
    arena: &mut CellArena,
    keys: &Keys,
    signers: &[usize],
    block: CellRef,
    data: CellRef,
    seqno: u32,
) -> BlockAttestation {
    let block_data = block_data(arena, data, seqno);
    let header_proof = prune_except_block_info(arena, block).unwrap();
    let message = signing_message(&block_data.id.root_hash, &block_data.id.file_hash);
    BlockAttestation {
        header: BlockHeader {
            id: block_data.id.clone(),
            mode: 0,
            header_proof,
        },
        block: block_data,
        signatures: keys.sign_with(signers, &message),
    }
}

pub fn transaction(arena: &mut CellArena, account: [u8; 32], lt: u64, salt: u32) -> CellRef {
    let mut b = CellBuilder::new();
    b.store_uint(0b0111, 4).unwrap()
        .store_u256(&account).unwrap()
        .store_uint(lt, 64).unwrap()
        .store_uint(salt as u64, 32).unwrap();
    b.build(arena).unwrap()
}

pub fn tx_fixture(arena: &mut CellArena) -> TxFixture {
    let account = [0xa1; 32];
    let (lt_a, lt_b) = (1_000, 1_001);
    let tx_a = transaction(arena, account, lt_a, 1);
    let tx_b = transaction(arena, account, lt_b, 2);

    // transactions: HashmapAug 64 ^Transaction CurrencyCollection
    let mut txs = BTreeMap::new();
    for (lt, tx) in [(lt_a, tx_a), (lt_b, tx_b)] {
        let mut leaf = CellBuilder::new();
        leaf.store_ref(tx).unwrap();
        txs.insert(DictKey::from_uint(lt, 64), leaf);
    }
    let txs = dict::build(arena, 64, &txs, Some(&currency(7))).unwrap().unwrap();
    let state_update = leaf(arena, 0x72);

    // acc_trans#5 account_addr:bits256 transactions:(HashmapAug 64 ...) state_update:^
    let mut account_block = CellBuilder::new();
    account_block.store_uint(0x5, 4).unwrap()
        .store_u256(&account).unwrap()
        .store_slice(&arena.slice(txs).unwrap()).unwrap()
        .store_ref(state_update).unwrap();
    let mut accounts = BTreeMap::new();
    accounts.insert(DictKey::from_bytes(&account), account_block);
    let accounts = dict::build(arena, 256, &accounts, Some(&currency(7))).unwrap();

    let mut account_blocks = CellBuilder::new();
    account_blocks.store_maybe_ref(accounts).unwrap()
        .store_builder(&currency(7)).unwrap();
    let account_blocks = account_blocks.build(arena).unwrap();

    let mc_extra = mc_block_extra(arena, ChainPartition::Masterchain, None);
    let parts = BlockParts::new(arena, account_blocks, mc_extra);
    let block = parts.assemble(arena, GLOBAL_ID);

    // Only the account_blocks path stays visible in the proof
    let pruned = BlockParts {
        info: create_pruned_branch(arena, parts.info).unwrap(),
        value_flow: create_pruned_branch(arena, parts.value_flow).unwrap(),
        state_update: create_pruned_branch(arena, parts.state_update).unwrap(),
        in_msgs: create_pruned_branch(arena, parts.in_msgs).unwrap(),
        out_msgs: create_pruned_branch(arena, parts.out_msgs).unwrap(),
        account_blocks: parts.account_blocks,
        mc_extra: create_pruned_branch(arena, parts.mc_extra).unwrap(),
    };
    let pruned_root = pruned.assemble(arena, GLOBAL_ID);
    let proof = create_merkle_proof(arena, pruned_root).unwrap();

    TxFixture {
        block,
        tx: TxWithProof {
            transaction: tx_b,
            proof,
        },
        account,
        lt: lt_b,
    }
}

// --- Helper functions ---

struct BlockParts {
    info: CellRef,
    value_flow: CellRef,
    state_update: CellRef,
    in_msgs: CellRef,
    out_msgs: CellRef,
    account_blocks: CellRef,
    mc_extra: CellRef,
}

impl BlockParts {
    fn new(arena: &mut CellArena, account_blocks: CellRef, mc_extra: CellRef) -> Self {
        let mut info = CellBuilder::new();
        info.store_uint(0x9bc7_a987, 32).unwrap()
            .store_uint(UTIME_SINCE as u64, 32).unwrap();
        Self {
            info: info.build(arena).unwrap(),
            value_flow: leaf(arena, 0xb8),
            state_update: leaf(arena, 0x4a),
            in_msgs: leaf(arena, 0x01),
            out_msgs: leaf(arena, 0x02),
            account_blocks,
            mc_extra,
        }
    }

    fn assemble(&self, arena: &mut CellArena, global_id: i32) -> CellRef {
        let mut extra = CellBuilder::new();
        extra.store_uint(BLOCK_EXTRA_MAGIC as u64, 32).unwrap()
            .store_ref(self.in_msgs).unwrap()
            .store_ref(self.out_msgs).unwrap()
            .store_ref(self.account_blocks).unwrap()
            .store_u256(&[0x5e; 32]).unwrap()
            .store_u256(&[0xcb; 32]).unwrap()
            .store_maybe_ref(Some(self.mc_extra)).unwrap();
        let extra = extra.build(arena).unwrap();

        let mut block = CellBuilder::new();
        block.store_uint(BLOCK_MAGIC as u64, 32).unwrap()
            .store_int(global_id as i64, 32).unwrap()
            .store_ref(self.info).unwrap()
            .store_ref(self.value_flow).unwrap()
            .store_ref(self.state_update).unwrap()
            .store_ref(extra).unwrap();
        block.build(arena).unwrap()
    }
}

fn leaf(arena: &mut CellArena, tag: u8) -> CellRef {
    let mut b = CellBuilder::new();
    b.store_uint(tag as u64, 8).unwrap();
    b.build(arena).unwrap()
}

fn currency(grams: u8) -> CellBuilder {
    let mut b = CellBuilder::new();
    b.store_uint(1, 4).unwrap()
        .store_uint(grams as u64, 8).unwrap()
        .store_bit(false).unwrap();
    b
}

fn empty_account_blocks(arena: &mut CellArena) -> CellRef {
    let mut b = CellBuilder::new();
    b.store_bit(false).unwrap().store_builder(&currency(0)).unwrap();
    b.build(arena).unwrap()
}

fn config_dict(arena: &mut CellArena, params: &[(u32, CellRef)]) -> CellRef {
    let mut values = BTreeMap::new();
    for (index, cell) in params {
        let mut b = CellBuilder::new();
        b.store_ref(*cell).unwrap();
        values.insert(DictKey::from_uint(*index as u64, 32), b);
    }
    dict::build(arena, 32, &values, None).unwrap().unwrap()
}

fn mc_block_extra(arena: &mut CellArena, partition: ChainPartition, config: Option<CellRef>) -> CellRef {
    let mut b = CellBuilder::new();
    b.store_uint(MC_BLOCK_EXTRA_MAGIC as u64, 16).unwrap()
        .store_bit(config.is_some()).unwrap();
    for (i, _) in partition.layout().leading_refs().iter().enumerate() {
        let cell = leaf(arena, 0xe0 + i as u8);
        b.store_ref(cell).unwrap();
    }
    if let Some(config) = config {
        b.store_ref(config).unwrap();
    }
    // recover_create_msg and mint_msg absent, then the config address
    b.store_uint(0, 2).unwrap().store_u256(&[0x55; 32]).unwrap();
    b.build(arena).unwrap()
}

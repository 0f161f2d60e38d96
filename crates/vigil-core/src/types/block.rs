use crate::cell::{CellArena, CellBuilder, CellError, CellRef, CellSlice};
use crate::types::hex_array;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag of `tonNode.blockIdExt` at the start of every block id cell.
pub const BLOCK_ID_EXT_TAG: u32 = 0x6752_eb78;

/// Tag of `liteServer.blockHeader` at the start of a header cell.
pub const BLOCK_HEADER_TAG: u32 = 0x752d_8219;

/// Tag of `liteServer.getBlock` at the start of a block data cell.
pub const BLOCK_DATA_TAG: u32 = 0x6377_cf0d;

/// Magic of the `block` record (`block#11ef55aa`).
pub const BLOCK_MAGIC: u32 = 0x11ef_55aa;

/// Magic of the `block_extra` record.
pub const BLOCK_EXTRA_MAGIC: u32 = 0x4a33_f6fd;

/// Identifies one block. `root_hash` is the level-0 hash of the block's root cell.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
    #[serde(with = "hex_array")]
    pub root_hash: [u8; 32],
    #[serde(with = "hex_array")]
    pub file_hash: [u8; 32],
}

impl BlockId {
    /// Write the id cell: `tag:u32 workchain:i32 shard:i64 seqno:u32 root_hash:bits256 file_hash:bits256`.
    pub fn store(&self, arena: &mut CellArena) -> Result<CellRef, CellError> {
        let mut b = CellBuilder::new();
        b.store_uint(BLOCK_ID_EXT_TAG as u64, 32)?
            .store_int(self.workchain as i64, 32)?
            .store_int(self.shard, 64)?
            .store_uint(self.seqno as u64, 32)?
            .store_u256(&self.root_hash)?
            .store_u256(&self.file_hash)?;
        b.build(arena)
    }

    pub fn load(slice: &mut CellSlice<'_>) -> Result<Self, CellError> {
        slice.expect_magic(BLOCK_ID_EXT_TAG as u64, 32)?;
        Ok(Self {
            workchain: slice.load_int(32)? as i32,
            shard: slice.load_int(64)?,
            seqno: slice.load_u32()?,
            root_hash: slice.load_u256()?,
            file_hash: slice.load_u256()?,
        })
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{:016x},{}):{}",
            self.workchain,
            self.shard as u64,
            self.seqno,
            hex::encode(self.root_hash)
        )
    }
}

/// A block header as served by a lite server. `header_proof` must be a
/// MerkleProof cell whose child hashes to `id.root_hash`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub id: BlockId,
    pub mode: u32,
    pub header_proof: CellRef,
}

/// Raw block data: either the full block cell or a MerkleProof over a pruned one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockData {
    pub id: BlockId,
    pub data: CellRef,
}

/// One validator signature over a block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "hex_array")]
    pub node_id_short: [u8; 32],
    /// Ed25519 `R || S`.
    #[serde(with = "hex_array")]
    pub signature: [u8; 64],
}

/// A transaction cell together with a MerkleProof rooted at its block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxWithProof {
    pub transaction: CellRef,
    pub proof: CellRef,
}

/// Everything needed to attest one block: header, data and signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockAttestation {
    pub header: BlockHeader,
    pub block: BlockData,
    pub signatures: Vec<Signature>,
}

impl BlockAttestation {
    /// The cells this attestation keeps alive in its arena.
    pub fn cells_mut(&mut self) -> [&mut CellRef; 2] {
        [&mut self.header.header_proof, &mut self.block.data]
    }
}

impl TxWithProof {
    pub fn cells_mut(&mut self) -> [&mut CellRef; 2] {
        [&mut self.transaction, &mut self.proof]
    }
}

/// Identity of a message endpoint (an actor or an external caller).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub workchain: i32,
    #[serde(with = "hex_array")]
    pub account: [u8; 32],
}

impl Address {
    pub const fn new(workchain: i32, account: [u8; 32]) -> Self {
        Self { workchain, account }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.account))
    }
}

impl FromStr for Address {
    type Err = String;

    /// Parse the raw `workchain:hex` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (workchain, account) = s
            .split_once(':')
            .ok_or_else(|| format!("address {s:?} is not in workchain:hex form"))?;
        let workchain = workchain
            .parse::<i32>()
            .map_err(|e| format!("invalid workchain in {s:?}: {e}"))?;
        let account = hex_array::decode::<32>(account)?;
        Ok(Self { workchain, account })
    }
}

//! Lite-server JSON format adapter.
//!
//! A lite server hands out block headers, blocks and transactions as bag-of-cells
//! blobs, while `vigil-core` works on cells interned in a [`CellArena`]. This
//! module defines serde types matching the JSON the JavaScript side sends and
//! converts them into core types, loading every BOC into the host's arena.
//!
//! Key differences:
//! - BOCs arrive as hex strings (optionally `0x`-prefixed), core uses `CellRef`
//! - Addresses arrive in raw `workchain:hex` form
//! - Block ids and signatures already use the core's hex JSON shape

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use vigil_core::cell::boc;
use vigil_core::{
    Address, BlockAttestation, BlockData, BlockHeader, BlockId, CellArena, CellRef, Envelope,
    Message, Signature, TxWithProof,
};

// ---------------------------------------------------------------------------
// Hex conversion helpers
// ---------------------------------------------------------------------------

pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("hex decode")
}

/// Parse a single-root BOC into `arena`.
pub fn load_boc(arena: &mut CellArena, s: &str) -> Result<CellRef> {
    let bytes = hex_to_bytes(s)?;
    boc::deserialize(arena, &bytes).map_err(|e| anyhow!("bad BOC: {e}"))
}

pub fn parse_address(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!(e))
}

// ---------------------------------------------------------------------------
// Lite server: blocks and signatures
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ApiBlockHeader {
    pub id: BlockId,
    #[serde(default)]
    pub mode: u32,
    /// Hex BOC of the MerkleProof over the block's info.
    pub header_proof: String,
}

impl ApiBlockHeader {
    pub fn to_core(&self, arena: &mut CellArena) -> Result<BlockHeader> {
        Ok(BlockHeader {
            id: self.id.clone(),
            mode: self.mode,
            header_proof: load_boc(arena, &self.header_proof).context("header_proof")?,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiBlockData {
    pub id: BlockId,
    /// Hex BOC of the block, full or as a MerkleProof.
    pub data: String,
}

impl ApiBlockData {
    pub fn to_core(&self, arena: &mut CellArena) -> Result<BlockData> {
        Ok(BlockData {
            id: self.id.clone(),
            data: load_boc(arena, &self.data).context("block data")?,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiAttestation {
    pub header: ApiBlockHeader,
    pub block: ApiBlockData,
    pub signatures: Vec<Signature>,
}

impl ApiAttestation {
    pub fn to_core(&self, arena: &mut CellArena) -> Result<BlockAttestation> {
        Ok(BlockAttestation {
            header: self.header.to_core(arena)?,
            block: self.block.to_core(arena)?,
            signatures: self.signatures.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Requests from the JavaScript side
// ---------------------------------------------------------------------------

/// Body of `new_key_block` and `check_block`.
#[derive(Deserialize)]
pub struct ApiBlockRequest {
    /// Caller address in `workchain:hex` form.
    pub sender: String,
    pub query_id: u64,
    pub attestation: ApiAttestation,
}

impl ApiBlockRequest {
    pub fn sender(&self) -> Result<Address> {
        parse_address(&self.sender).context("sender")
    }
}

#[derive(Deserialize)]
pub struct ApiTxWithProof {
    pub transaction: String,
    pub proof: String,
}

impl ApiTxWithProof {
    pub fn to_core(&self, arena: &mut CellArena) -> Result<TxWithProof> {
        Ok(TxWithProof {
            transaction: load_boc(arena, &self.transaction).context("transaction")?,
            proof: load_boc(arena, &self.proof).context("transaction proof")?,
        })
    }
}

/// Body of `check_transaction`.
#[derive(Deserialize)]
pub struct ApiCheckTransaction {
    pub sender: String,
    pub query_id: u64,
    pub transaction: ApiTxWithProof,
    pub attestation: ApiAttestation,
}

impl ApiCheckTransaction {
    pub fn to_message(&self, arena: &mut CellArena) -> Result<(Address, Message)> {
        let sender = parse_address(&self.sender).context("sender")?;
        let message = Message::CheckTransaction {
            query_id: self.query_id,
            tx: self.transaction.to_core(arena)?,
            attestation: self.attestation.to_core(arena)?,
        };
        Ok((sender, message))
    }
}

// ---------------------------------------------------------------------------
// Replies back to the JavaScript side
// ---------------------------------------------------------------------------

/// A delivered or outgoing envelope, flattened for JavaScript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiEnvelope {
    pub from: String,
    pub to: String,
    pub op: u32,
    pub op_name: &'static str,
    pub query_id: u64,
}

impl From<&Envelope> for ApiEnvelope {
    fn from(envelope: &Envelope) -> Self {
        Self {
            from: envelope.from.to_string(),
            to: envelope.to.to_string(),
            op: envelope.body.op(),
            op_name: op_name(&envelope.body),
            query_id: envelope.body.query_id(),
        }
    }
}

fn op_name(message: &Message) -> &'static str {
    match message {
        Message::NewKeyBlock { .. } => "new_key_block",
        Message::CheckBlock { .. } => "check_block",
        Message::CheckTransaction { .. } => "check_transaction",
        Message::Ok { .. } => "ok",
        Message::Correct { .. } => "correct",
        Message::Reject { .. } => "reject",
        Message::TransactionChecked { .. } => "transaction_checked",
    }
}

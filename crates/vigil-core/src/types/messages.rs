//! Boundary messages exchanged between the lite client, the transaction
//! checker and their callers, and their cell encoding.
//!
//! Every body starts with `op:uint32 query_id:uint64`. Block attestations are
//! carried as `^[^header ^data] signatures:(HashmapE 256 ^Cell)`, where each
//! signature value is a 512-bit cell keyed by the signer's short node id.

use crate::cell::dict::{self, DictKey};
use crate::cell::{CellArena, CellBuilder, CellError, CellRef, CellSlice};
use crate::host::DispatchError;
use crate::types::block::*;
use std::collections::BTreeMap;

/// Operation codes.
pub mod op {
    pub const NEW_KEY_BLOCK: u32 = 0x11a7_8ffe;
    pub const CHECK_BLOCK: u32 = 0x8eaa_9d76;
    pub const OK: u32 = 0xff8f_f4e1;
    pub const CORRECT: u32 = 0xce02_b807;
    pub const CHECK_TRANSACTION: u32 = 0x91d5_55f7;
    pub const TRANSACTION_CHECKED: u32 = 0x756a_dff1;
    pub const REJECT: u32 = 0x3a4e_2f91;
}

/// Exit code reported for a body with an unrecognised op.
pub const UNKNOWN_OPCODE_EXIT_CODE: u32 = 0xffff;

/// A typed message body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    NewKeyBlock {
        query_id: u64,
        attestation: BlockAttestation,
    },
    CheckBlock {
        query_id: u64,
        attestation: BlockAttestation,
    },
    CheckTransaction {
        query_id: u64,
        tx: TxWithProof,
        attestation: BlockAttestation,
    },
    Ok {
        query_id: u64,
    },
    Correct {
        query_id: u64,
    },
    Reject {
        query_id: u64,
    },
    TransactionChecked {
        query_id: u64,
    },
}

impl Message {
    pub fn op(&self) -> u32 {
        match self {
            Message::NewKeyBlock { .. } => op::NEW_KEY_BLOCK,
            Message::CheckBlock { .. } => op::CHECK_BLOCK,
            Message::CheckTransaction { .. } => op::CHECK_TRANSACTION,
            Message::Ok { .. } => op::OK,
            Message::Correct { .. } => op::CORRECT,
            Message::Reject { .. } => op::REJECT,
            Message::TransactionChecked { .. } => op::TRANSACTION_CHECKED,
        }
    }

    /// Cells referenced by the body, for arena compaction.
    pub fn cells_mut(&mut self) -> Vec<&mut CellRef> {
        match self {
            Message::NewKeyBlock { attestation, .. } | Message::CheckBlock { attestation, .. } => {
                attestation.cells_mut().into_iter().collect()
            }
            Message::CheckTransaction {
                tx, attestation, ..
            } => tx.cells_mut().into_iter().chain(attestation.cells_mut()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn query_id(&self) -> u64 {
        match self {
            Message::NewKeyBlock { query_id, .. }
            | Message::CheckBlock { query_id, .. }
            | Message::CheckTransaction { query_id, .. }
            | Message::Ok { query_id }
            | Message::Correct { query_id }
            | Message::Reject { query_id }
            | Message::TransactionChecked { query_id } => *query_id,
        }
    }

    /// Encode the body as a cell.
    pub fn encode(&self, arena: &mut CellArena) -> Result<CellRef, CellError> {
        let mut b = CellBuilder::new();
        b.store_uint(self.op() as u64, 32)?
            .store_uint(self.query_id(), 64)?;

        match self {
            Message::NewKeyBlock { attestation, .. } | Message::CheckBlock { attestation, .. } => {
                store_attestation(arena, &mut b, attestation)?;
            }
            Message::CheckTransaction {
                tx, attestation, ..
            } => {
                let mut current = CellBuilder::new();
                store_attestation(arena, &mut current, attestation)?;
                let current = current.build(arena)?;
                b.store_ref(tx.transaction)?
                    .store_ref(tx.proof)?
                    .store_ref(current)?;
            }
            Message::Ok { .. }
            | Message::Correct { .. }
            | Message::Reject { .. }
            | Message::TransactionChecked { .. } => {}
        }
        b.build(arena)
    }

    /// Decode a body cell; an unknown op is reported as such, not as a layout error.
    pub fn decode(arena: &CellArena, body: CellRef) -> Result<Self, DispatchError> {
        let mut s = arena.slice(body)?;
        let op = s.load_u32()?;
        let query_id = s.load_u64()?;

        let message = match op {
            op::NEW_KEY_BLOCK => Message::NewKeyBlock {
                query_id,
                attestation: load_attestation(&mut s)?,
            },
            op::CHECK_BLOCK => Message::CheckBlock {
                query_id,
                attestation: load_attestation(&mut s)?,
            },
            op::CHECK_TRANSACTION => {
                let transaction = s.load_ref()?;
                let proof = s.load_ref()?;
                let mut current = s.load_ref_slice()?;
                Message::CheckTransaction {
                    query_id,
                    tx: TxWithProof { transaction, proof },
                    attestation: load_attestation(&mut current)?,
                }
            }
            op::OK => Message::Ok { query_id },
            op::CORRECT => Message::Correct { query_id },
            op::REJECT => Message::Reject { query_id },
            op::TRANSACTION_CHECKED => Message::TransactionChecked { query_id },
            other => return Err(DispatchError::UnknownOpcode { op: other }),
        };
        Ok(message)
    }
}

/// A message addressed to an endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub to: Address,
    pub body: Message,
}

// --- Helper functions ---

fn store_attestation(
    arena: &mut CellArena,
    b: &mut CellBuilder,
    attestation: &BlockAttestation,
) -> Result<(), CellError> {
    let header_id = attestation.header.id.store(arena)?;
    let mut header = CellBuilder::new();
    header
        .store_uint(BLOCK_HEADER_TAG as u64, 32)?
        .store_ref(header_id)?
        .store_uint(attestation.header.mode as u64, 32)?
        .store_ref(attestation.header.header_proof)?;
    let header = header.build(arena)?;

    let data_id = attestation.block.id.store(arena)?;
    let mut data = CellBuilder::new();
    data.store_uint(BLOCK_DATA_TAG as u64, 32)?
        .store_ref(data_id)?
        .store_ref(attestation.block.data)?;
    let data = data.build(arena)?;

    let mut block = CellBuilder::new();
    block.store_ref(header)?.store_ref(data)?;
    let block = block.build(arena)?;

    let signatures = signatures_dict(arena, &attestation.signatures)?;
    b.store_ref(block)?.store_maybe_ref(signatures)?;
    Ok(())
}

fn load_attestation(s: &mut CellSlice<'_>) -> Result<BlockAttestation, CellError> {
    let mut block = s.load_ref_slice()?;

    let mut header = block.load_ref_slice()?;
    header.expect_magic(BLOCK_HEADER_TAG as u64, 32)?;
    let header_id = BlockId::load(&mut header.load_ref_slice()?)?;
    let mode = header.load_u32()?;
    let header_proof = header.load_ref()?;

    let mut data = block.load_ref_slice()?;
    data.expect_magic(BLOCK_DATA_TAG as u64, 32)?;
    let data_id = BlockId::load(&mut data.load_ref_slice()?)?;
    let data_cell = data.load_ref()?;

    let mut signatures = Vec::new();
    for (key, mut leaf) in dict::entries_optional(s, 256, None)? {
        let mut value = leaf.load_ref_slice()?;
        let mut node_id_short = [0u8; 32];
        node_id_short.copy_from_slice(&key.to_bytes());
        let bytes = value.load_bits(512)?;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes);
        signatures.push(Signature {
            node_id_short,
            signature,
        });
    }

    Ok(BlockAttestation {
        header: BlockHeader {
            id: header_id,
            mode,
            header_proof,
        },
        block: BlockData {
            id: data_id,
            data: data_cell,
        },
        signatures,
    })
}

/// `HashmapE 256 ^Cell` of signatures keyed by short node id.
pub fn signatures_dict(
    arena: &mut CellArena,
    signatures: &[Signature],
) -> Result<Option<CellRef>, CellError> {
    let mut values = BTreeMap::new();
    for sig in signatures {
        let mut value = CellBuilder::new();
        value.store_bits(&sig.signature, 512)?;
        let value = value.build(arena)?;
        let mut leaf = CellBuilder::new();
        leaf.store_ref(value)?;
        values.insert(DictKey::from_bytes(&sig.node_id_short), leaf);
    }
    dict::build(arena, 256, &values, None)
}

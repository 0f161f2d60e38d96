//! In-process message router for the lite client and the transaction checker.
//!
//! Each delivered message runs to completion before the next one is taken
//! from the queue, and replies are queued rather than delivered inline. The
//! host never reorders on its own; callers that want to exercise out-of-order
//! delivery pick envelopes with [`LocalHost::deliver_at`].

use crate::cell::{boc, CellArena, CellError, CellRef};
use crate::consensus::{LiteClient, Verdict, VerificationError};
use crate::inclusion::{InclusionError, PendingCheckRequest, TransactionChecker};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Default address of the lite client actor.
pub const LITE_CLIENT_ADDRESS: Address = Address::new(-1, [0x4c; 32]);
/// Default address of the transaction checker actor.
pub const TRANSACTION_CHECKER_ADDRESS: Address = Address::new(-1, [0x54; 32]);

/// Errors raised while routing or handling a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown opcode {op:#010x} (exit code {:#x})", UNKNOWN_OPCODE_EXIT_CODE)]
    UnknownOpcode { op: u32 },

    #[error("{to} does not handle op {op:#010x}")]
    UnsupportedMessage { to: Address, op: u32 },

    #[error("No queued envelope at position {index}")]
    NoSuchEnvelope { index: usize },

    #[error("Invalid deploy config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Malformed message: {0}")]
    Cell(#[from] CellError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Inclusion(#[from] InclusionError),
}

/// A message in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: Address,
    pub to: Address,
    pub body: Message,
}

/// Deployment input: the genesis key block the lite client trusts on first use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Hex-encoded BOC of the genesis block data (full block or MerkleProof).
    pub genesis_boc: String,
    pub genesis_id: BlockId,
    pub chain_partition: ChainPartition,
    #[serde(default = "default_lite_client")]
    pub lite_client_address: Address,
    #[serde(default = "default_checker")]
    pub checker_address: Address,
}

impl DeployConfig {
    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(json).map_err(|e| DispatchError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}

fn default_lite_client() -> Address {
    LITE_CLIENT_ADDRESS
}

fn default_checker() -> Address {
    TRANSACTION_CHECKER_ADDRESS
}

/// Hosts one lite client and one transaction checker over a shared cell arena.
#[derive(Debug)]
pub struct LocalHost {
    arena: CellArena,
    lite_client_address: Address,
    checker_address: Address,
    lite_client: LiteClient,
    checker: TransactionChecker,
    queue: VecDeque<Envelope>,
    /// Messages addressed to anyone other than the two actors.
    outbox: Vec<Envelope>,
}

impl LocalHost {
    /// Deploy both actors from a genesis block already loaded into `arena`.
    pub fn new(
        arena: CellArena,
        genesis: &BlockData,
        partition: ChainPartition,
        lite_client_address: Address,
        checker_address: Address,
    ) -> Result<Self, DispatchError> {
        if lite_client_address == checker_address {
            return Err(DispatchError::InvalidConfig {
                reason: format!("both actors are deployed at {lite_client_address}"),
            });
        }
        let lite_client = LiteClient::deploy(&arena, genesis, partition)?;
        Ok(Self {
            arena,
            lite_client_address,
            checker_address,
            lite_client,
            checker: TransactionChecker::new(lite_client_address),
            queue: VecDeque::new(),
            outbox: Vec::new(),
        })
    }

    /// Deploy from a [`DeployConfig`], parsing the genesis BOC into a fresh arena.
    pub fn deploy(config: &DeployConfig) -> Result<Self, DispatchError> {
        let bytes = hex::decode(config.genesis_boc.trim_start_matches("0x")).map_err(|e| {
            DispatchError::InvalidConfig {
                reason: format!("genesis_boc is not hex: {e}"),
            }
        })?;
        let mut arena = CellArena::new();
        let data = boc::deserialize(&mut arena, &bytes)?;
        let genesis = BlockData {
            id: config.genesis_id.clone(),
            data,
        };
        Self::new(
            arena,
            &genesis,
            config.chain_partition,
            config.lite_client_address,
            config.checker_address,
        )
    }

    pub fn arena(&self) -> &CellArena {
        &self.arena
    }

    /// Cells referenced by submitted messages must be inserted here first.
    pub fn arena_mut(&mut self) -> &mut CellArena {
        &mut self.arena
    }

    pub fn lite_client_address(&self) -> Address {
        self.lite_client_address
    }

    pub fn checker_address(&self) -> Address {
        self.checker_address
    }

    pub fn lite_client(&self) -> &LiteClient {
        &self.lite_client
    }

    pub fn checker(&self) -> &TransactionChecker {
        &self.checker
    }

    pub fn epoch_state(&self) -> &EpochState {
        self.lite_client.epoch_state()
    }

    pub fn pending_request(&self, query_id: u64) -> Option<&PendingCheckRequest> {
        self.checker.pending(query_id)
    }

    /// Queue a message from an external caller.
    pub fn submit(&mut self, from: Address, to: Address, body: Message) {
        self.queue.push_back(Envelope { from, to, body });
    }

    /// Queue a message whose body is an encoded cell.
    pub fn submit_cell(&mut self, from: Address, to: Address, body: CellRef) -> Result<(), DispatchError> {
        let body = Message::decode(&self.arena, body)?;
        self.submit(from, to, body);
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn peek(&self, index: usize) -> Option<&Envelope> {
        self.queue.get(index)
    }

    /// Deliver the oldest queued envelope. Returns `None` when the queue is empty.
    pub fn deliver_next(&mut self) -> Result<Option<Envelope>, DispatchError> {
        match self.queue.pop_front() {
            Some(envelope) => self.dispatch(envelope.clone()).map(|()| Some(envelope)),
            None => Ok(None),
        }
    }

    /// Deliver the envelope at `index` in the queue, ahead of older ones.
    pub fn deliver_at(&mut self, index: usize) -> Result<Envelope, DispatchError> {
        let envelope = self
            .queue
            .remove(index)
            .ok_or(DispatchError::NoSuchEnvelope { index })?;
        self.dispatch(envelope.clone())?;
        Ok(envelope)
    }

    /// Deliver until the queue is empty, stopping at the first failed message.
    ///
    /// A failed message is dropped; messages behind it stay queued.
    pub fn run_until_idle(&mut self) -> Result<usize, DispatchError> {
        let mut delivered = 0;
        while self.deliver_next()?.is_some() {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Release every cell no queued envelope or pending request still needs.
    ///
    /// Cell refs the caller obtained from [`LocalHost::arena_mut`] are invalid
    /// afterwards; insert fresh cells for the next request. Returns how many
    /// cells were dropped.
    pub fn compact(&mut self) -> usize {
        let mut live: Vec<&mut CellRef> = Vec::new();
        for envelope in self.queue.iter_mut().chain(self.outbox.iter_mut()) {
            live.extend(envelope.body.cells_mut());
        }
        for request in self.checker.pending_mut() {
            live.extend(request.tx.cells_mut());
        }
        self.arena.compact(&mut live)
    }

    /// Take the messages addressed to external callers.
    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<(), DispatchError> {
        let Envelope { from, to, body } = envelope;
        if to == self.lite_client_address {
            self.handle_lite_client(from, body)
        } else if to == self.checker_address {
            self.handle_checker(from, body)
        } else {
            log::debug!("Message op {:#010x} from {from} leaves the host for {to}", body.op());
            self.outbox.push(Envelope { from, to, body });
            Ok(())
        }
    }

    fn handle_lite_client(&mut self, from: Address, body: Message) -> Result<(), DispatchError> {
        let reply = match body {
            Message::NewKeyBlock {
                query_id,
                attestation,
            } => {
                let verdict = self.lite_client.new_key_block(
                    &self.arena,
                    &attestation.header,
                    &attestation.block,
                    &attestation.signatures,
                )?;
                match verdict {
                    Verdict::Accepted => Message::Ok { query_id },
                    Verdict::Rejected { .. } => Message::Reject { query_id },
                }
            }
            Message::CheckBlock {
                query_id,
                attestation,
            } => {
                let verdict = self.lite_client.check_block(
                    &self.arena,
                    &attestation.header,
                    &attestation.block,
                    &attestation.signatures,
                )?;
                match verdict {
                    Verdict::Accepted => Message::Correct { query_id },
                    Verdict::Rejected { .. } => Message::Reject { query_id },
                }
            }
            other => {
                return Err(DispatchError::UnsupportedMessage {
                    to: self.lite_client_address,
                    op: other.op(),
                })
            }
        };
        self.reply(self.lite_client_address, from, reply);
        Ok(())
    }

    fn handle_checker(&mut self, from: Address, body: Message) -> Result<(), DispatchError> {
        match body {
            Message::CheckTransaction {
                tx, attestation, ..
            } => {
                let out = self.checker.check_transaction(from, tx, attestation);
                self.reply(self.checker_address, out.to, out.body);
            }
            Message::Correct { query_id } => {
                let out = self.checker.on_correct(&self.arena, from, query_id)?;
                self.reply(self.checker_address, out.to, out.body);
            }
            Message::Reject { query_id } => self.checker.on_reject(from, query_id)?,
            other => {
                return Err(DispatchError::UnsupportedMessage {
                    to: self.checker_address,
                    op: other.op(),
                })
            }
        }
        Ok(())
    }

    fn reply(&mut self, from: Address, to: Address, body: Message) {
        self.queue.push_back(Envelope { from, to, body });
    }
}

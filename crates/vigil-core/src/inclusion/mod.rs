//! Transaction inclusion checks.
//!
//! Checking a transaction takes two messages. The checker first asks the lite
//! client to attest the block the transaction claims to be in (`CheckBlock`),
//! parks the request under a fresh `query_id`, and finishes when the lite
//! client answers `Correct` (walk the proof, reply `TransactionChecked`) or
//! `Reject` (drop the request, no reply). Answers may arrive in any order.

pub mod walk;

pub use walk::verify_transaction_in_block;

use crate::cell::{CellArena, CellError};
use crate::types::*;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by the transaction checker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InclusionError {
    #[error("Transaction not in block: {reason}")]
    TransactionNotInBlock { reason: String },

    #[error("Unauthorized sender {sender}: only the lite client {expected} may answer block checks")]
    UnauthorizedSender { sender: Address, expected: Address },

    #[error("No pending check for query {query_id}")]
    UnknownQuery { query_id: u64 },

    #[error("Transaction proof is rooted at {got}, attested block is {expected}")]
    ProofMismatch { expected: String, got: String },

    #[error("Malformed cell: {0}")]
    Malformed(#[from] CellError),
}

/// A transaction waiting for its block to be attested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCheckRequest {
    pub query_id: u64,
    /// Who receives `TransactionChecked`.
    pub reply_to: Address,
    pub tx: TxWithProof,
    /// The block the transaction proof must be rooted at.
    pub block_id: BlockId,
}

/// Checks transaction inclusion on top of a lite client it trusts.
#[derive(Clone, Debug)]
pub struct TransactionChecker {
    lite_client: Address,
    next_query_id: u64,
    pending: HashMap<u64, PendingCheckRequest>,
}

impl TransactionChecker {
    pub fn new(lite_client: Address) -> Self {
        Self {
            lite_client,
            next_query_id: 1,
            pending: HashMap::new(),
        }
    }

    pub fn lite_client(&self) -> Address {
        self.lite_client
    }

    /// Park the request and ask the lite client to attest its block.
    pub fn check_transaction(
        &mut self,
        reply_to: Address,
        tx: TxWithProof,
        attestation: BlockAttestation,
    ) -> Outbound {
        let query_id = self.allocate_query_id();
        self.pending.insert(
            query_id,
            PendingCheckRequest {
                query_id,
                reply_to,
                tx,
                block_id: attestation.header.id.clone(),
            },
        );
        log::debug!(
            "Query {query_id}: checking transaction in block {} ({} pending)",
            attestation.header.id,
            self.pending.len()
        );

        Outbound {
            to: self.lite_client,
            body: Message::CheckBlock {
                query_id,
                attestation,
            },
        }
    }

    /// The lite client attested the block: prove the transaction is in it.
    ///
    /// The pending entry is consumed whether or not the walk succeeds.
    pub fn on_correct(
        &mut self,
        arena: &CellArena,
        from: Address,
        query_id: u64,
    ) -> Result<Outbound, InclusionError> {
        self.authorize(from)?;
        let request = self
            .pending
            .remove(&query_id)
            .ok_or(InclusionError::UnknownQuery { query_id })?;

        verify_transaction_in_block(
            arena,
            request.tx.proof,
            request.tx.transaction,
            &request.block_id.root_hash,
        )?;
        log::info!(
            "Query {query_id}: transaction {} is in block {}",
            hex::encode(arena.hash(request.tx.transaction, 0)?),
            request.block_id
        );

        Ok(Outbound {
            to: request.reply_to,
            body: Message::TransactionChecked { query_id },
        })
    }

    /// The lite client refused the block: drop the request without replying.
    pub fn on_reject(&mut self, from: Address, query_id: u64) -> Result<(), InclusionError> {
        self.authorize(from)?;
        let request = self
            .pending
            .remove(&query_id)
            .ok_or(InclusionError::UnknownQuery { query_id })?;
        log::warn!(
            "Query {query_id}: block {} was rejected, dropping the request",
            request.block_id
        );
        Ok(())
    }

    pub fn pending(&self, query_id: u64) -> Option<&PendingCheckRequest> {
        self.pending.get(&query_id)
    }

    pub(crate) fn pending_mut(&mut self) -> impl Iterator<Item = &mut PendingCheckRequest> {
        self.pending.values_mut()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn authorize(&self, from: Address) -> Result<(), InclusionError> {
        if from != self.lite_client {
            return Err(InclusionError::UnauthorizedSender {
                sender: from,
                expected: self.lite_client,
            });
        }
        Ok(())
    }

    fn allocate_query_id(&mut self) -> u64 {
        // Skip ids still parked, so a wrapped counter never overwrites a request
        while self.pending.contains_key(&self.next_query_id) {
            self.next_query_id = self.next_query_id.wrapping_add(1);
        }
        let query_id = self.next_query_id;
        self.next_query_id = self.next_query_id.wrapping_add(1);
        query_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    const LITE_CLIENT: Address = Address::new(-1, [0x11; 32]);
    const CALLER: Address = Address::new(0, [0x22; 32]);

    fn setup(arena: &mut CellArena) -> (testkit::TxFixture, BlockAttestation) {
        let keys = testkit::Keys::new(3);
        let fixture = testkit::tx_fixture(arena);
        let attestation = testkit::attest(arena, &keys, &[0, 1, 2], fixture.block, fixture.block, 5);
        (fixture, attestation)
    }

    #[test]
    fn test_check_transaction_parks_request() {
        let mut arena = CellArena::new();
        let (fixture, attestation) = setup(&mut arena);
        let mut checker = TransactionChecker::new(LITE_CLIENT);

        let out = checker.check_transaction(CALLER, fixture.tx.clone(), attestation.clone());
        assert_eq!(out.to, LITE_CLIENT);
        let Message::CheckBlock { query_id, .. } = out.body else {
            panic!("expected CheckBlock, got {:?}", out.body);
        };
        let pending = checker.pending(query_id).unwrap();
        assert_eq!(pending.reply_to, CALLER);
        assert_eq!(pending.block_id, attestation.header.id);
    }

    #[test]
    fn test_correct_confirms_transaction() {
        let mut arena = CellArena::new();
        let (fixture, attestation) = setup(&mut arena);
        let mut checker = TransactionChecker::new(LITE_CLIENT);
        let out = checker.check_transaction(CALLER, fixture.tx.clone(), attestation);
        let query_id = out.body.query_id();

        let reply = checker.on_correct(&arena, LITE_CLIENT, query_id).unwrap();
        assert_eq!(reply.to, CALLER);
        assert_eq!(reply.body, Message::TransactionChecked { query_id });
        assert_eq!(checker.pending_count(), 0);
    }

    #[test]
    fn test_mutated_transaction_is_not_in_block() {
        let mut arena = CellArena::new();
        let (mut fixture, attestation) = setup(&mut arena);
        fixture.tx.transaction = testkit::transaction(&mut arena, fixture.account, fixture.lt, 0xbad);
        let mut checker = TransactionChecker::new(LITE_CLIENT);
        let query_id = checker
            .check_transaction(CALLER, fixture.tx, attestation)
            .body
            .query_id();

        assert!(matches!(
            checker.on_correct(&arena, LITE_CLIENT, query_id),
            Err(InclusionError::TransactionNotInBlock { .. })
        ));
        assert_eq!(checker.pending_count(), 0);
    }

    #[test]
    fn test_unknown_lt_is_not_in_block() {
        let mut arena = CellArena::new();
        let (fixture, _) = setup(&mut arena);
        let stray = testkit::transaction(&mut arena, fixture.account, fixture.lt + 1, 1);
        let proof = crate::proof::create_merkle_proof(&mut arena, fixture.block).unwrap();
        let root = arena.hash(fixture.block, 0).unwrap();
        assert!(matches!(
            verify_transaction_in_block(&arena, proof, stray, &root),
            Err(InclusionError::TransactionNotInBlock { .. })
        ));
    }

    #[test]
    fn test_pruned_path_is_not_in_block() {
        let mut arena = CellArena::new();
        let (fixture, _) = setup(&mut arena);
        let info_only = crate::proof::prune_except_block_info(&mut arena, fixture.block).unwrap();
        let root = arena.hash(fixture.block, 0).unwrap();
        assert!(matches!(
            verify_transaction_in_block(&arena, info_only, fixture.tx.transaction, &root),
            Err(InclusionError::TransactionNotInBlock { .. })
        ));
    }

    #[test]
    fn test_proof_for_other_block_is_mismatch() {
        let mut arena = CellArena::new();
        let (fixture, _) = setup(&mut arena);
        assert!(matches!(
            verify_transaction_in_block(&arena, fixture.tx.proof, fixture.tx.transaction, &[0; 32]),
            Err(InclusionError::ProofMismatch { .. })
        ));
    }

    #[test]
    fn test_reject_drops_request_silently() {
        let mut arena = CellArena::new();
        let (fixture, attestation) = setup(&mut arena);
        let mut checker = TransactionChecker::new(LITE_CLIENT);
        let query_id = checker
            .check_transaction(CALLER, fixture.tx, attestation)
            .body
            .query_id();

        checker.on_reject(LITE_CLIENT, query_id).unwrap();
        assert!(checker.pending(query_id).is_none());
        assert_eq!(
            checker.on_reject(LITE_CLIENT, query_id),
            Err(InclusionError::UnknownQuery { query_id })
        );
    }

    #[test]
    fn test_callbacks_from_others_are_refused() {
        let mut arena = CellArena::new();
        let (fixture, attestation) = setup(&mut arena);
        let mut checker = TransactionChecker::new(LITE_CLIENT);
        let query_id = checker
            .check_transaction(CALLER, fixture.tx, attestation)
            .body
            .query_id();

        assert!(matches!(
            checker.on_correct(&arena, CALLER, query_id),
            Err(InclusionError::UnauthorizedSender { .. })
        ));
        // the request survives an unauthorized answer
        assert!(checker.pending(query_id).is_some());
    }

    #[test]
    fn test_callbacks_resolve_in_any_order() {
        let mut arena = CellArena::new();
        let (fixture, attestation) = setup(&mut arena);
        let mut checker = TransactionChecker::new(LITE_CLIENT);
        let ids: Vec<u64> = (0..3)
            .map(|_| {
                checker
                    .check_transaction(CALLER, fixture.tx.clone(), attestation.clone())
                    .body
                    .query_id()
            })
            .collect();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);

        for query_id in ids.iter().rev() {
            let reply = checker.on_correct(&arena, LITE_CLIENT, *query_id).unwrap();
            assert_eq!(reply.body.query_id(), *query_id);
        }
        assert_eq!(checker.pending_count(), 0);
    }
}

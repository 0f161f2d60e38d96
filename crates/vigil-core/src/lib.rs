//! # Vigil Core
//!
//! Pure Rust key-block light client verification logic for a cell-tree ledger.
//!
//! This crate contains **no networking code** and **no WASM dependencies**.
//! Callers hand it block headers, block data, validator signatures and
//! transaction proofs as cells; it never fetches anything.
//!
//! ## Trust Model
//!
//! - **Key-block light client** (`consensus` module): trusts the validator sets
//!   of one genesis key block on first use, then adopts a new epoch only from a
//!   key block signed by more than two thirds of the current set's top-100
//!   weight (Ed25519). Same honesty assumption as the chain's own BFT consensus.
//!
//! - **Transaction inclusion** (`inclusion` module): asks the light client to
//!   attest a block, then walks a Merkle proof rooted at that block's hash down
//!   to the transaction. Zero trust assumptions beyond the attested root hash.
//!
//! - **Pruned proofs** (`proof` module): shrink a block to the parts a verifier
//!   needs while keeping its root hash, so the result is checked by the same
//!   signatures as the full block.
//!
//! ## Usage
//!
//! ```ignore
//! use vigil_core::{DeployConfig, LocalHost, Message};
//!
//! let mut host = LocalHost::deploy(&DeployConfig::from_json(json)?)?;
//! host.submit(caller, host.lite_client_address(), Message::NewKeyBlock { query_id, attestation });
//! host.run_until_idle()?;
//! ```

pub mod cell;
pub mod consensus;
pub mod host;
pub mod inclusion;
pub mod proof;
pub mod types;

#[cfg(test)]
mod testkit;

// Re-export commonly used types for convenience
pub use cell::{boc, CellArena, CellBuilder, CellError, CellRef, CellSlice, CellType};
pub use consensus::{
    key_block::{LiteClient, Verdict},
    signatures::{verify_signatures, QuorumOutcome, VerificationError},
    validator_set::{extract, extract_from_block, ExtractedEpoch},
};
pub use host::{DeployConfig, DispatchError, Envelope, LocalHost};
pub use inclusion::{
    verify_transaction_in_block, InclusionError, PendingCheckRequest, TransactionChecker,
};
pub use proof::{
    create_merkle_proof, create_pruned_branch, prune_except_block_info,
    prune_except_block_info_and_config,
};
pub use types::*;

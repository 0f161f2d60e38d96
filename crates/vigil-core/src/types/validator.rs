use crate::cell::CellError;
use crate::types::hex_array;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix hashed with a validator public key to derive its short node id.
pub const NODE_ID_PREFIX: [u8; 4] = [0xc6, 0xb4, 0x13, 0x48];

/// Encoding of a validator descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorKind {
    /// `validator#53`: public key and weight.
    SigPubKey,
    /// `validator_addr#73`: public key, weight and ADNL address.
    SigPubKeyWithAdnl,
}

impl ValidatorKind {
    pub fn tag(self) -> u8 {
        match self {
            ValidatorKind::SigPubKey => 0x53,
            ValidatorKind::SigPubKeyWithAdnl => 0x73,
        }
    }
}

/// A validator as listed in a validator set config parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDescr {
    pub kind: ValidatorKind,
    /// Ed25519 public key.
    #[serde(with = "hex_array")]
    pub pubkey: [u8; 32],
    pub weight: u64,
    #[serde(default, with = "hex_array::option")]
    pub adnl_addr: Option<[u8; 32]>,
}

impl ValidatorDescr {
    /// `sha256(c6 b4 13 48 || pubkey)`: the id validators sign under.
    pub fn node_id_short(&self) -> [u8; 32] {
        let mut preimage = [0u8; 36];
        preimage[..4].copy_from_slice(&NODE_ID_PREFIX);
        preimage[4..].copy_from_slice(&self.pubkey);
        crate::cell::sha256(&preimage)
    }
}

/// A validator committee and its validity window.
///
/// `Default` is the empty set, used when a config parameter is absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub utime_since: u32,
    pub utime_until: u32,
    pub total: u16,
    pub main: u16,
    /// Only present in the extended (`0x12`) encoding.
    pub total_weight: Option<u64>,
    pub validators: BTreeMap<u16, ValidatorDescr>,
}

impl ValidatorSet {
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorDescr> {
        self.validators.values()
    }
}

/// Chain partition whose block layout the engine follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ChainPartition {
    /// Workchain -1.
    Masterchain,
    /// Workchain 0.
    Basechain,
}

impl TryFrom<i32> for ChainPartition {
    type Error = CellError;

    fn try_from(workchain: i32) -> Result<Self, Self::Error> {
        match workchain {
            -1 => Ok(ChainPartition::Masterchain),
            0 => Ok(ChainPartition::Basechain),
            other => Err(CellError::UnsupportedPartition { partition: other }),
        }
    }
}

impl From<ChainPartition> for i32 {
    fn from(partition: ChainPartition) -> Self {
        match partition {
            ChainPartition::Masterchain => -1,
            ChainPartition::Basechain => 0,
        }
    }
}

/// The trusted epoch held by a lite client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochState {
    pub prev_set: ValidatorSet,
    pub cur_set: ValidatorSet,
    pub next_set: ValidatorSet,
    pub utime_since: u32,
    pub utime_until: u32,
    /// Seqno of the key block the epoch was taken from.
    pub seqno: u32,
    pub chain_partition: ChainPartition,
}

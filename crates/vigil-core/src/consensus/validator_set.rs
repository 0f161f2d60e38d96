use crate::cell::dict::{self, DictKey};
use crate::cell::{CellArena, CellError, CellRef, CellSlice};
use crate::types::*;
use std::collections::BTreeMap;

/// Config parameter holding the previous validator set.
pub const CONFIG_PREV_VALIDATORS: u32 = 32;
/// Config parameter holding the current validator set.
pub const CONFIG_CUR_VALIDATORS: u32 = 34;
/// Config parameter holding the next validator set, present only during handover.
pub const CONFIG_NEXT_VALIDATORS: u32 = 36;

/// Magic of `ed25519_pubkey`.
pub const SIG_PUB_KEY_MAGIC: u32 = 0x8e81_278a;

const VALIDATOR_SET_TAG: u8 = 0x11;
const VALIDATOR_SET_EXT_TAG: u8 = 0x12;

/// Validator sets read from a key block's config, with the current set's window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedEpoch {
    pub cur_set: ValidatorSet,
    pub prev_set: ValidatorSet,
    pub next_set: ValidatorSet,
    pub utime_since: u32,
    pub utime_until: u32,
}

/// Read the validator sets from a `McBlockExtra` cell.
///
/// The block must be a key block, since only key blocks carry the config
/// dictionary. A config without parameter 34 yields empty sets and a warning;
/// deciding whether that is usable is left to the caller.
pub fn extract(
    mc_block_extra: CellSlice<'_>,
    partition: ChainPartition,
) -> Result<ExtractedEpoch, CellError> {
    let arena = mc_block_extra.arena();
    let parts = partition.layout().split(mc_block_extra)?;
    let config = match (parts.key_block, parts.config) {
        (true, Some(config)) => config,
        _ => {
            return Err(CellError::layout(
                "McBlockExtra",
                "not a key block, no config dictionary to read",
            ))
        }
    };
    let config = arena.slice(config)?;

    let Some(cur_set) = config_param(&config, CONFIG_CUR_VALIDATORS)? else {
        log::warn!("Key block config has no current validator set (param 34)");
        return Ok(ExtractedEpoch::default());
    };
    let cur_set = load_validator_set(cur_set)?;
    let prev_set = config_param(&config, CONFIG_PREV_VALIDATORS)?
        .map(load_validator_set)
        .transpose()?
        .unwrap_or_default();
    let next_set = config_param(&config, CONFIG_NEXT_VALIDATORS)?
        .map(load_validator_set)
        .transpose()?
        .unwrap_or_default();

    log::debug!(
        "Extracted validator sets: cur={} prev={} next={}",
        cur_set.len(),
        prev_set.len(),
        next_set.len()
    );
    Ok(ExtractedEpoch {
        utime_since: cur_set.utime_since,
        utime_until: cur_set.utime_until,
        cur_set,
        prev_set,
        next_set,
    })
}

/// Walk `block → extra → McBlockExtra` and extract from there.
pub fn extract_from_block(
    arena: &CellArena,
    block_root: CellRef,
    partition: ChainPartition,
) -> Result<ExtractedEpoch, CellError> {
    let mut block = arena.slice(block_root)?;
    block.expect_magic(BLOCK_MAGIC as u64, 32)?;
    let extra = block.ref_at(3)?;

    let mut extra = arena.slice(extra)?;
    extra.expect_magic(BLOCK_EXTRA_MAGIC as u64, 32)?;
    let mc_block_extra = extra.ref_at(3).map_err(|_| {
        CellError::layout("block_extra", "block carries no McBlockExtra")
    })?;
    extract(arena.slice(mc_block_extra)?, partition)
}

/// Parse a `ValidatorSet` config value.
pub fn load_validator_set(mut s: CellSlice<'_>) -> Result<ValidatorSet, CellError> {
    let tag = s.load_u8()?;
    if tag != VALIDATOR_SET_TAG && tag != VALIDATOR_SET_EXT_TAG {
        return Err(CellError::MagicMismatch {
            expected: VALIDATOR_SET_EXT_TAG as u64,
            got: tag as u64,
            bits: 8,
        });
    }

    let utime_since = s.load_u32()?;
    let utime_until = s.load_u32()?;
    let total = s.load_u16()?;
    let main = s.load_u16()?;
    if main > total || main < 1 {
        return Err(CellError::layout(
            "ValidatorSet",
            format!("main={main} must satisfy 1 <= main <= total={total}"),
        ));
    }

    let (total_weight, entries) = if tag == VALIDATOR_SET_TAG {
        (None, dict::entries(s, 16, None)?)
    } else {
        let total_weight = s.load_u64()?;
        (Some(total_weight), dict::entries_optional(&mut s, 16, None)?)
    };

    let mut validators = BTreeMap::new();
    for (key, value) in entries {
        let index = key.to_uint().and_then(|k| u16::try_from(k).ok()).ok_or_else(|| {
            CellError::layout("ValidatorSet", "validator index does not fit in 16 bits")
        })?;
        validators.insert(index, load_validator_descr(value)?);
    }

    Ok(ValidatorSet {
        utime_since,
        utime_until,
        total,
        main,
        total_weight,
        validators,
    })
}

/// Parse a `ValidatorDescr` (`0x53` or `0x73`).
pub fn load_validator_descr(mut s: CellSlice<'_>) -> Result<ValidatorDescr, CellError> {
    let kind = match s.load_u8()? {
        0x53 => ValidatorKind::SigPubKey,
        0x73 => ValidatorKind::SigPubKeyWithAdnl,
        other => {
            return Err(CellError::MagicMismatch {
                expected: 0x53,
                got: other as u64,
                bits: 8,
            })
        }
    };
    s.expect_magic(SIG_PUB_KEY_MAGIC as u64, 32)?;
    let pubkey = s.load_u256()?;
    let weight = s.load_u64()?;
    let adnl_addr = match kind {
        ValidatorKind::SigPubKeyWithAdnl => Some(s.load_u256()?),
        ValidatorKind::SigPubKey => None,
    };
    Ok(ValidatorDescr {
        kind,
        pubkey,
        weight,
        adnl_addr,
    })
}

// --- Helper functions ---

/// Value of config parameter `index`, if present.
fn config_param<'a>(config: &CellSlice<'a>, index: u32) -> Result<Option<CellSlice<'a>>, CellError> {
    let key = DictKey::from_uint(index as u64, 32);
    match dict::get(config.clone(), 32, &key, None)? {
        Some(mut value) => Ok(Some(value.load_ref_slice()?)),
        None => Ok(None),
    }
}

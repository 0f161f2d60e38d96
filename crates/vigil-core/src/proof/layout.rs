use crate::cell::{CellArena, CellBuilder, CellError, CellRef, CellSlice};
use crate::types::ChainPartition;

/// Magic of `masterchain_block_extra`.
pub const MC_BLOCK_EXTRA_MAGIC: u16 = 0xcca5;

/// Bits of the config address that closes the verbatim payload of a key block.
const CONFIG_ADDR_BITS: usize = 256;

/// `McBlockExtra` split into the parts pruning and extraction care about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct McBlockExtraParts {
    pub key_block: bool,
    /// References preceding the config dictionary, in cell order.
    pub leading: Vec<CellRef>,
    /// Root edge of `Hashmap 32 ^Cell`; only key blocks carry it.
    pub config: Option<CellRef>,
    /// Remaining data bits, carried verbatim. Ends with the config address.
    pub payload: Vec<u8>,
    pub payload_bits: usize,
}

/// Where the config dictionary sits inside `McBlockExtra` for one partition.
///
/// Both known layouts start with the `cca5` magic and the key block flag and
/// end with the config reference; they differ in which references come first.
pub trait McBlockExtraLayout: Send + Sync {
    fn partition(&self) -> ChainPartition;

    /// Names of the references preceding the config dictionary.
    fn leading_refs(&self) -> &'static [&'static str];

    fn split(&self, mut slice: CellSlice<'_>) -> Result<McBlockExtraParts, CellError> {
        slice.expect_magic(MC_BLOCK_EXTRA_MAGIC as u64, 16)?;
        let key_block = slice.load_bit()?;

        let mut leading = Vec::with_capacity(self.leading_refs().len());
        for name in self.leading_refs() {
            let cell = slice.load_ref().map_err(|_| {
                CellError::layout(
                    "McBlockExtra",
                    format!("missing {name} reference for {:?}", self.partition()),
                )
            })?;
            leading.push(cell);
        }

        let config = if key_block {
            let config = slice.load_ref().map_err(|_| {
                CellError::layout("McBlockExtra", "key block without a config dictionary")
            })?;
            if slice.remaining_bits() < CONFIG_ADDR_BITS {
                return Err(CellError::layout(
                    "McBlockExtra",
                    format!(
                        "{} bits left, config address needs {CONFIG_ADDR_BITS}",
                        slice.remaining_bits()
                    ),
                ));
            }
            Some(config)
        } else {
            None
        };

        if slice.remaining_refs() != 0 {
            return Err(CellError::layout(
                "McBlockExtra",
                format!(
                    "{} unexpected trailing references for {:?}",
                    slice.remaining_refs(),
                    self.partition()
                ),
            ));
        }

        let payload_bits = slice.remaining_bits();
        let payload = slice.load_bits(payload_bits)?;
        Ok(McBlockExtraParts {
            key_block,
            leading,
            config,
            payload,
            payload_bits,
        })
    }

    /// Reassemble a cell from `parts`, which may carry substituted references.
    fn assemble(
        &self,
        arena: &mut CellArena,
        parts: &McBlockExtraParts,
    ) -> Result<CellRef, CellError> {
        let mut b = CellBuilder::new();
        b.store_uint(MC_BLOCK_EXTRA_MAGIC as u64, 16)?
            .store_bit(parts.key_block)?;
        for cell in &parts.leading {
            b.store_ref(*cell)?;
        }
        if let Some(config) = parts.config {
            b.store_ref(config)?;
        }
        b.store_bits(&parts.payload, parts.payload_bits)?;
        b.build(arena)
    }
}

/// Basechain layout: `[shard_hashes, shard_fees, additional_info, config]`.
pub struct BasechainLayout;

impl McBlockExtraLayout for BasechainLayout {
    fn partition(&self) -> ChainPartition {
        ChainPartition::Basechain
    }

    fn leading_refs(&self) -> &'static [&'static str] {
        &["shard_hashes", "shard_fees", "additional_info"]
    }
}

/// Masterchain layout: `[additional_info, config]`.
pub struct MasterchainLayout;

impl McBlockExtraLayout for MasterchainLayout {
    fn partition(&self) -> ChainPartition {
        ChainPartition::Masterchain
    }

    fn leading_refs(&self) -> &'static [&'static str] {
        &["additional_info"]
    }
}

impl ChainPartition {
    pub fn layout(self) -> &'static dyn McBlockExtraLayout {
        match self {
            ChainPartition::Masterchain => &MasterchainLayout,
            ChainPartition::Basechain => &BasechainLayout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc_extra(arena: &mut CellArena, leading: usize, key_block: bool) -> CellRef {
        let leaf = {
            let mut b = CellBuilder::new();
            b.store_uint(1, 8).unwrap();
            b.build(arena).unwrap()
        };
        let mut b = CellBuilder::new();
        b.store_uint(MC_BLOCK_EXTRA_MAGIC as u64, 16).unwrap();
        b.store_bit(key_block).unwrap();
        for _ in 0..leading {
            b.store_ref(leaf).unwrap();
        }
        if key_block {
            b.store_ref(leaf).unwrap();
        }
        b.store_uint(0b101, 3).unwrap();
        b.store_u256(&[0x33; 32]).unwrap();
        b.build(arena).unwrap()
    }

    #[test]
    fn test_split_and_assemble_is_identity() {
        let mut arena = CellArena::new();
        for (partition, leading) in [
            (ChainPartition::Basechain, 3),
            (ChainPartition::Masterchain, 1),
        ] {
            let cell = mc_extra(&mut arena, leading, true);
            let layout = partition.layout();
            let parts = layout.split(arena.slice(cell).unwrap()).unwrap();
            assert!(parts.key_block);
            assert_eq!(parts.leading.len(), leading);
            assert_eq!(parts.payload_bits, 3 + 256);
            assert_eq!(layout.assemble(&mut arena, &parts).unwrap(), cell);
        }
    }

    #[test]
    fn test_wrong_layout_is_malformed() {
        let mut arena = CellArena::new();
        let masterchain = mc_extra(&mut arena, 1, true);
        let err = BasechainLayout
            .split(arena.slice(masterchain).unwrap())
            .unwrap_err();
        assert!(matches!(err, CellError::Layout { what: "McBlockExtra", .. }));
    }

    #[test]
    fn test_non_key_block_has_no_config() {
        let mut arena = CellArena::new();
        let cell = mc_extra(&mut arena, 1, false);
        let parts = MasterchainLayout.split(arena.slice(cell).unwrap()).unwrap();
        assert!(!parts.key_block);
        assert_eq!(parts.config, None);
    }
}

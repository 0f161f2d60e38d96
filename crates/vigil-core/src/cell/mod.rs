//! Cell model: the bounded binary-tree node every ledger structure is built from.
//!
//! Cells live in a [`CellArena`] and are addressed by [`CellRef`] index. Identical
//! cells are interned, so a subtree shared by several trees (or by a full block
//! and a proof over it) is stored once. The representation hash and depth of a
//! cell are computed for all four levels when it is inserted and never change.
//!
//! ## Exotic cells
//!
//! - **PrunedBranch** (tag 1): stands in for a hidden subtree. Its hashes below
//!   its own level are the *stored* hashes of the subtree it replaces, which is
//!   what makes the substitution invisible to a parent's level-0 hash.
//! - **MerkleProof** (tag 3): commits to the level-0 hash and depth of its single
//!   child, and hashes that child at level + 1.
//! - **Library** and **MerkleUpdate** are accepted and hashed but never built by
//!   this crate.

pub mod boc;
pub mod builder;
pub mod dict;
pub mod slice;

pub use builder::CellBuilder;
pub use slice::CellSlice;

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Maximum number of data bits in one cell.
pub const MAX_BITS: usize = 1023;

/// Maximum number of child references in one cell.
pub const MAX_REFS: usize = 4;

/// Highest hash level a cell can carry.
pub const MAX_LEVEL: u8 = 3;

/// Bit length of a pruned branch carrying `n` stored hashes.
const fn pruned_branch_bits(n: usize) -> usize {
    16 + n * (256 + 16)
}

const MERKLE_PROOF_BITS: usize = 8 + 256 + 16;
const MERKLE_UPDATE_BITS: usize = 8 + 2 * (256 + 16);
const LIBRARY_BITS: usize = 8 + 256;

/// Structural errors raised while building, reading or decoding cells.
///
/// Every variant is a `MalformedCellError` in the engine's error taxonomy:
/// the input violates the cell layout and the request that carried it must
/// be aborted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("Cell overflow: {bits} bits exceed the {MAX_BITS}-bit limit")]
    BitOverflow { bits: usize },

    #[error("Cell overflow: a cell holds at most {MAX_REFS} references")]
    RefOverflow,

    #[error("Cell underflow: requested {requested} bits but only {remaining} remain")]
    BitUnderflow { requested: usize, remaining: usize },

    #[error("Cell underflow: no reference left at index {index}")]
    RefUnderflow { index: usize },

    #[error("Integer width {bits} is not supported (at most 64 bits)")]
    UnsupportedWidth { bits: usize },

    #[error("Value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: i128, bits: usize },

    #[error("Unexpected magic: expected {expected:#x}, got {got:#x} ({bits} bits)")]
    MagicMismatch { expected: u64, got: u64, bits: usize },

    #[error("Unknown exotic cell tag {tag}")]
    UnknownExoticTag { tag: u8 },

    #[error("Invalid {cell_type:?} cell: {reason}")]
    InvalidExotic { cell_type: CellType, reason: String },

    #[error("Cannot read pruned branch {hash}: its contents are not part of this proof")]
    PrunedBranch { hash: String },

    #[error("Cell depth overflows 16 bits")]
    DepthOverflow,

    #[error("Unknown cell reference #{index}")]
    UnknownRef { index: u32 },

    #[error("Invalid bag of cells: {reason}")]
    InvalidBoc { reason: String },

    #[error("Invalid dictionary: {reason}")]
    InvalidDictionary { reason: String },

    #[error("Unsupported chain partition {partition}")]
    UnsupportedPartition { partition: i32 },

    #[error("Malformed {what}: {reason}")]
    Layout { what: &'static str, reason: String },
}

impl CellError {
    pub(crate) fn layout(what: &'static str, reason: impl Into<String>) -> Self {
        CellError::Layout {
            what,
            reason: reason.into(),
        }
    }
}

/// Cell kind. Exotic kinds carry their tag in the first data byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellType {
    Ordinary,
    PrunedBranch,
    Library,
    MerkleProof,
    MerkleUpdate,
}

impl CellType {
    pub fn from_tag(tag: u8) -> Result<Self, CellError> {
        match tag {
            1 => Ok(CellType::PrunedBranch),
            2 => Ok(CellType::Library),
            3 => Ok(CellType::MerkleProof),
            4 => Ok(CellType::MerkleUpdate),
            other => Err(CellError::UnknownExoticTag { tag: other }),
        }
    }

    pub fn tag(self) -> Option<u8> {
        match self {
            CellType::Ordinary => None,
            CellType::PrunedBranch => Some(1),
            CellType::Library => Some(2),
            CellType::MerkleProof => Some(3),
            CellType::MerkleUpdate => Some(4),
        }
    }

    pub fn is_exotic(self) -> bool {
        self != CellType::Ordinary
    }

    /// Merkle cells hash their children one level higher.
    pub fn is_merkle(self) -> bool {
        matches!(self, CellType::MerkleProof | CellType::MerkleUpdate)
    }
}

/// Three-bit mask of the levels at which a cell has a distinct hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const EMPTY: LevelMask = LevelMask(0);

    pub fn new(mask: u8) -> Self {
        Self(mask & 0b111)
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    /// Index of the highest set bit, plus one.
    pub fn level(self) -> u8 {
        (8 - self.0.leading_zeros()) as u8
    }

    pub fn hash_index(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn hash_count(self) -> usize {
        self.hash_index() + 1
    }

    /// The mask as seen from `level`: only bits below it survive.
    pub fn apply(self, level: u8) -> Self {
        let level = level.min(MAX_LEVEL);
        Self(self.0 & ((1u8 << level) - 1))
    }

    pub fn is_significant(self, level: u8) -> bool {
        level == 0 || (self.0 >> (level - 1)) & 1 != 0
    }

    /// Mask of a Merkle cell over a child with this mask.
    pub fn virtualize(self) -> Self {
        Self(self.0 >> 1)
    }
}

impl std::ops::BitOr for LevelMask {
    type Output = LevelMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        LevelMask(self.0 | rhs.0)
    }
}

/// Index of a cell inside a [`CellArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef(u32);

impl CellRef {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// An immutable cell with its per-level hashes and depths resolved.
#[derive(Clone, Debug)]
pub struct Cell {
    cell_type: CellType,
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<CellRef>,
    level_mask: LevelMask,
    hashes: [[u8; 32]; 4],
    depths: [u16; 4],
}

impl Cell {
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn is_exotic(&self) -> bool {
        self.cell_type.is_exotic()
    }

    /// Data bytes, MSB first; bits past `bit_len` are zero.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[CellRef] {
        &self.refs
    }

    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    pub fn level(&self) -> u8 {
        self.level_mask.level()
    }

    /// Representation hash at `level` (clamped to [`MAX_LEVEL`]).
    pub fn hash(&self, level: u8) -> [u8; 32] {
        self.hashes[level.min(MAX_LEVEL) as usize]
    }

    pub fn depth(&self, level: u8) -> u16 {
        self.depths[level.min(MAX_LEVEL) as usize]
    }

    pub(crate) fn bit(&self, index: usize) -> bool {
        (self.data[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Data with the completion tag appended when the length is not byte aligned.
    pub fn padded_data(&self) -> Vec<u8> {
        padded_data(&self.data, self.bit_len)
    }

    /// The d1 and d2 descriptor bytes used by both the hash and the BOC encoding.
    pub(crate) fn descriptors(&self, level_mask: LevelMask) -> [u8; 2] {
        descriptors(self.refs.len(), self.is_exotic(), level_mask, self.bit_len)
    }
}

/// Content-addressed store of cells.
#[derive(Debug, Default)]
pub struct CellArena {
    cells: Vec<Cell>,
    interned: HashMap<[u8; 32], CellRef>,
}

impl CellArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, cell: CellRef) -> Result<&Cell, CellError> {
        self.cells
            .get(cell.0 as usize)
            .ok_or(CellError::UnknownRef { index: cell.0 })
    }

    pub fn hash(&self, cell: CellRef, level: u8) -> Result<[u8; 32], CellError> {
        Ok(self.get(cell)?.hash(level))
    }

    pub fn depth(&self, cell: CellRef, level: u8) -> Result<u16, CellError> {
        Ok(self.get(cell)?.depth(level))
    }

    /// Open a read cursor over `cell`. Pruned branches cannot be read.
    pub fn slice(&self, cell: CellRef) -> Result<CellSlice<'_>, CellError> {
        let node = self.get(cell)?;
        if node.cell_type == CellType::PrunedBranch {
            return Err(CellError::PrunedBranch {
                hash: hex::encode(node.hash(0)),
            });
        }
        Ok(CellSlice::new(self, cell, node))
    }

    /// Insert a cell, returning the existing index if an identical cell is
    /// already stored.
    pub(crate) fn insert(
        &mut self,
        cell_type: CellType,
        mut data: Vec<u8>,
        bit_len: usize,
        refs: Vec<CellRef>,
    ) -> Result<CellRef, CellError> {
        if bit_len > MAX_BITS {
            return Err(CellError::BitOverflow { bits: bit_len });
        }
        if refs.len() > MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        for child in &refs {
            self.get(*child)?;
        }
        data.resize(bit_len.div_ceil(8), 0);
        if bit_len % 8 != 0 {
            let last = bit_len / 8;
            data[last] &= 0xffu8 << (8 - bit_len % 8);
        }

        let level_mask = self.level_mask_for(cell_type, &data, bit_len, &refs)?;
        let (hashes, depths) = self.compute_hashes(cell_type, &data, bit_len, &refs, level_mask)?;

        let key = hashes[MAX_LEVEL as usize];
        if let Some(existing) = self.interned.get(&key) {
            return Ok(*existing);
        }

        let index = u32::try_from(self.cells.len())
            .map_err(|_| CellError::layout("arena", "more than u32::MAX cells"))?;
        let cell_ref = CellRef(index);
        self.cells.push(Cell {
            cell_type,
            data,
            bit_len,
            refs,
            level_mask,
            hashes,
            depths,
        });
        self.interned.insert(key, cell_ref);
        Ok(cell_ref)
    }

    /// Drop every cell not reachable from `live`, rewriting each live ref to
    /// its new index. Returns how many cells were removed.
    ///
    /// Any other `CellRef` into this arena is invalid afterwards.
    pub fn compact(&mut self, live: &mut [&mut CellRef]) -> usize {
        let before = self.cells.len();
        let mut reachable = vec![false; before];
        let mut stack: Vec<CellRef> = live.iter().map(|cell| **cell).collect();
        while let Some(cell) = stack.pop() {
            let Some(seen) = reachable.get_mut(cell.0 as usize) else {
                continue;
            };
            if std::mem::replace(seen, true) {
                continue;
            }
            stack.extend_from_slice(&self.cells[cell.0 as usize].refs);
        }

        // Children always sit below their parents, so they are remapped first
        let mut remap: Vec<Option<CellRef>> = vec![None; before];
        self.interned.clear();
        for (index, mut cell) in std::mem::take(&mut self.cells).into_iter().enumerate() {
            if !reachable[index] {
                continue;
            }
            for child in &mut cell.refs {
                if let Some(moved) = remap[child.0 as usize] {
                    *child = moved;
                }
            }
            let moved = CellRef(self.cells.len() as u32);
            self.interned.insert(cell.hashes[MAX_LEVEL as usize], moved);
            self.cells.push(cell);
            remap[index] = Some(moved);
        }

        for cell in live.iter_mut() {
            if let Some(moved) = remap.get(cell.0 as usize).copied().flatten() {
                **cell = moved;
            }
        }
        let removed = before - self.cells.len();
        if removed > 0 {
            log::debug!("Compacted arena: {removed} cells dropped, {} kept", self.cells.len());
        }
        removed
    }

    /// Validate the exotic payload (if any) and derive the cell's level mask.
    fn level_mask_for(
        &self,
        cell_type: CellType,
        data: &[u8],
        bit_len: usize,
        refs: &[CellRef],
    ) -> Result<LevelMask, CellError> {
        let invalid = |reason: String| CellError::InvalidExotic { cell_type, reason };

        if let Some(tag) = cell_type.tag() {
            if bit_len < 8 || data[0] != tag {
                return Err(invalid(format!("payload does not start with tag {tag}")));
            }
        }

        match cell_type {
            CellType::Ordinary => Ok(refs
                .iter()
                .map(|r| self.cells[r.0 as usize].level_mask)
                .fold(LevelMask::EMPTY, |acc, m| acc | m)),

            CellType::PrunedBranch => {
                if !refs.is_empty() {
                    return Err(invalid("pruned branch must not have references".into()));
                }
                if bit_len < 16 {
                    return Err(invalid("missing level mask".into()));
                }
                let raw = data[1];
                let mask = LevelMask::new(raw);
                if raw > 0b111 || mask.level() == 0 {
                    return Err(invalid(format!("level mask {raw:#04x} out of range")));
                }
                let expected = pruned_branch_bits(mask.hash_index());
                if bit_len != expected {
                    return Err(invalid(format!(
                        "expected {expected} bits for mask {raw}, got {bit_len}"
                    )));
                }
                Ok(mask)
            }

            CellType::Library => {
                if bit_len != LIBRARY_BITS || !refs.is_empty() {
                    return Err(invalid(format!(
                        "expected {LIBRARY_BITS} bits and no references"
                    )));
                }
                Ok(LevelMask::EMPTY)
            }

            CellType::MerkleProof => {
                if bit_len != MERKLE_PROOF_BITS || refs.len() != 1 {
                    return Err(invalid(format!(
                        "expected {MERKLE_PROOF_BITS} bits and exactly one reference"
                    )));
                }
                let child = &self.cells[refs[0].0 as usize];
                check_commitment(child, &data[1..33], &data[33..35])
                    .map_err(|reason| invalid(reason))?;
                Ok(child.level_mask.virtualize())
            }

            CellType::MerkleUpdate => {
                if bit_len != MERKLE_UPDATE_BITS || refs.len() != 2 {
                    return Err(invalid(format!(
                        "expected {MERKLE_UPDATE_BITS} bits and exactly two references"
                    )));
                }
                let old = &self.cells[refs[0].0 as usize];
                let new = &self.cells[refs[1].0 as usize];
                check_commitment(old, &data[1..33], &data[65..67])
                    .map_err(|reason| invalid(format!("old state: {reason}")))?;
                check_commitment(new, &data[33..65], &data[67..69])
                    .map_err(|reason| invalid(format!("new state: {reason}")))?;
                Ok((old.level_mask | new.level_mask).virtualize())
            }
        }
    }

    fn compute_hashes(
        &self,
        cell_type: CellType,
        data: &[u8],
        bit_len: usize,
        refs: &[CellRef],
        mask: LevelMask,
    ) -> Result<([[u8; 32]; 4], [u16; 4]), CellError> {
        let is_pruned = cell_type == CellType::PrunedBranch;
        // A pruned branch only computes its own top hash; the lower ones are stored.
        let offset = if is_pruned { mask.hash_index() } else { 0 };

        let mut computed: Vec<([u8; 32], u16)> = Vec::with_capacity(mask.hash_count());
        let mut hash_i = 0usize;
        for level in 0..=mask.level() {
            if !mask.is_significant(level) {
                continue;
            }
            if hash_i < offset {
                hash_i += 1;
                continue;
            }

            let mut hasher = Sha256::new();
            hasher.update(descriptors(
                refs.len(),
                cell_type.is_exotic(),
                mask.apply(level),
                bit_len,
            ));
            if hash_i == offset {
                hasher.update(padded_data(data, bit_len));
            } else {
                hasher.update(computed[hash_i - offset - 1].0);
            }

            let child_level = if cell_type.is_merkle() {
                (level + 1).min(MAX_LEVEL)
            } else {
                level
            };
            let mut depth = 0u16;
            for child in refs {
                let child_depth = self.cells[child.0 as usize].depth(child_level);
                hasher.update(child_depth.to_be_bytes());
                depth = depth.max(child_depth);
            }
            if !refs.is_empty() {
                depth = depth.checked_add(1).ok_or(CellError::DepthOverflow)?;
            }
            for child in refs {
                hasher.update(self.cells[child.0 as usize].hash(child_level));
            }

            computed.push((finalize(hasher), depth));
            hash_i += 1;
        }

        let mut hashes = [[0u8; 32]; 4];
        let mut depths = [0u16; 4];
        for level in 0..=MAX_LEVEL {
            let index = mask.apply(level).hash_index();
            let (hash, depth) = if is_pruned {
                if index != mask.hash_index() {
                    stored_pruned_entry(data, mask.hash_index(), index)
                } else {
                    computed[0]
                }
            } else {
                computed[index]
            };
            hashes[level as usize] = hash;
            depths[level as usize] = depth;
        }
        Ok((hashes, depths))
    }
}

// --- Helper functions ---

fn descriptors(refs: usize, exotic: bool, mask: LevelMask, bit_len: usize) -> [u8; 2] {
    let exotic_flag = if exotic { 8 } else { 0 };
    let d1 = refs as u8 + exotic_flag + 32 * mask.mask();
    let d2 = (bit_len / 8 + bit_len.div_ceil(8)) as u8;
    [d1, d2]
}

fn padded_data(data: &[u8], bit_len: usize) -> Vec<u8> {
    let mut out = data[..bit_len.div_ceil(8)].to_vec();
    if bit_len % 8 != 0 {
        out[bit_len / 8] |= 0x80 >> (bit_len % 8);
    }
    out
}

/// Hash and depth stored at `index` inside a pruned branch holding `count` entries.
fn stored_pruned_entry(data: &[u8], count: usize, index: usize) -> ([u8; 32], u16) {
    let hash_at = 2 + 32 * index;
    let depth_at = 2 + 32 * count + 2 * index;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&data[hash_at..hash_at + 32]);
    let depth = u16::from_be_bytes([data[depth_at], data[depth_at + 1]]);
    (hash, depth)
}

fn check_commitment(child: &Cell, hash: &[u8], depth: &[u8]) -> Result<(), String> {
    if child.hash(0).as_slice() != hash {
        return Err(format!(
            "committed hash {} does not match child hash {}",
            hex::encode(hash),
            hex::encode(child.hash(0))
        ));
    }
    let depth = u16::from_be_bytes([depth[0], depth[1]]);
    if child.depth(0) != depth {
        return Err(format!(
            "committed depth {depth} does not match child depth {}",
            child.depth(0)
        ));
    }
    Ok(())
}

pub(crate) fn finalize(hasher: Sha256) -> [u8; 32] {
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finalize(hasher)
}

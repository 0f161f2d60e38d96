//! Bag-of-cells wire format (`b5ee9c72`).
//!
//! Layout of a serialized bag:
//!
//! ```text
//! magic:u32  flags:u8 (has_idx, has_crc32c, has_cache_bits, 2 zero bits, size:3)
//! off_bytes:u8  cells:size  roots:size  absent:size  tot_cells_size:off_bytes
//! root_list:[size; roots]  index:[off_bytes; cells]?  cell_data  crc32c:u32le?
//! ```
//!
//! Cells are written parents first, so every reference points at a higher index.

use super::{CellArena, CellError, CellRef, CellType, LevelMask};
use std::collections::{HashMap, HashSet};

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

/// Serialization switches.
#[derive(Clone, Copy, Debug)]
pub struct BocOptions {
    pub with_index: bool,
    pub with_crc32c: bool,
}

impl Default for BocOptions {
    fn default() -> Self {
        Self {
            with_index: false,
            with_crc32c: true,
        }
    }
}

/// Serialize the tree rooted at `root` with default options.
pub fn serialize(arena: &CellArena, root: CellRef) -> Result<Vec<u8>, CellError> {
    serialize_with(arena, root, BocOptions::default())
}

pub fn serialize_with(
    arena: &CellArena,
    root: CellRef,
    options: BocOptions,
) -> Result<Vec<u8>, CellError> {
    let order = topological_order(arena, root)?;
    let position: HashMap<CellRef, usize> =
        order.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    let size_bytes = bytes_for(order.len() as u64);

    let mut cell_blobs = Vec::with_capacity(order.len());
    for cell_ref in &order {
        let cell = arena.get(*cell_ref)?;
        let mut blob = Vec::new();
        blob.extend_from_slice(&cell.descriptors(cell.level_mask()));
        blob.extend_from_slice(&cell.padded_data());
        for child in cell.refs() {
            write_uint(&mut blob, position[child] as u64, size_bytes);
        }
        cell_blobs.push(blob);
    }
    let total_size: usize = cell_blobs.iter().map(Vec::len).sum();
    let off_bytes = bytes_for(total_size as u64);

    let mut out = Vec::with_capacity(total_size + 32);
    out.extend_from_slice(&BOC_MAGIC);
    let mut flags = size_bytes as u8;
    if options.with_index {
        flags |= 0x80;
    }
    if options.with_crc32c {
        flags |= 0x40;
    }
    out.push(flags);
    out.push(off_bytes as u8);
    write_uint(&mut out, order.len() as u64, size_bytes);
    write_uint(&mut out, 1, size_bytes); // roots
    write_uint(&mut out, 0, size_bytes); // absent
    write_uint(&mut out, total_size as u64, off_bytes);
    write_uint(&mut out, 0, size_bytes); // root index

    if options.with_index {
        let mut end = 0u64;
        for blob in &cell_blobs {
            end += blob.len() as u64;
            write_uint(&mut out, end, off_bytes);
        }
    }
    for blob in &cell_blobs {
        out.extend_from_slice(blob);
    }
    if options.with_crc32c {
        let crc = crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
    }
    Ok(out)
}

/// Parse a bag holding exactly one root.
pub fn deserialize(arena: &mut CellArena, bytes: &[u8]) -> Result<CellRef, CellError> {
    let roots = deserialize_all(arena, bytes)?;
    match roots.as_slice() {
        [root] => Ok(*root),
        _ => Err(invalid(format!("expected one root, found {}", roots.len()))),
    }
}

/// Parse a bag and return all of its roots, inserting every cell into `arena`.
pub fn deserialize_all(arena: &mut CellArena, bytes: &[u8]) -> Result<Vec<CellRef>, CellError> {
    let mut r = Reader { bytes, pos: 0 };

    if r.take(4)? != BOC_MAGIC.as_slice() {
        return Err(invalid("unknown magic"));
    }
    let flags = r.byte()?;
    let has_index = flags & 0x80 != 0;
    let has_crc = flags & 0x40 != 0;
    let size_bytes = (flags & 0x07) as usize;
    if size_bytes == 0 || size_bytes > 4 {
        return Err(invalid(format!("reference size {size_bytes} out of range")));
    }
    let off_bytes = r.byte()? as usize;
    if off_bytes == 0 || off_bytes > 8 {
        return Err(invalid(format!("offset size {off_bytes} out of range")));
    }

    let cell_count = r.uint(size_bytes)? as usize;
    let root_count = r.uint(size_bytes)? as usize;
    let absent = r.uint(size_bytes)?;
    let total_size = r.uint(off_bytes)? as usize;
    if absent != 0 {
        return Err(invalid("absent cells are not supported"));
    }
    if root_count == 0 || root_count > cell_count {
        return Err(invalid(format!(
            "{root_count} roots for {cell_count} cells"
        )));
    }
    // Every cell takes at least its two descriptor bytes
    let remaining = bytes.len() - r.pos;
    if cell_count > remaining / 2 {
        return Err(invalid(format!(
            "{cell_count} cells cannot fit in {remaining} bytes"
        )));
    }
    if total_size > remaining {
        return Err(invalid(format!(
            "cell data of {total_size} bytes exceeds the {remaining} remaining"
        )));
    }

    let mut root_indices = Vec::new();
    for _ in 0..root_count {
        let index = r.uint(size_bytes)? as usize;
        if index >= cell_count {
            return Err(invalid(format!("root index {index} out of range")));
        }
        root_indices.push(index);
    }
    if has_index {
        r.take(cell_count * off_bytes)?;
    }

    let data_start = r.pos;
    let mut raw_cells = Vec::new();
    for index in 0..cell_count {
        raw_cells.push(read_raw_cell(&mut r, index, cell_count, size_bytes)?);
    }
    if r.pos - data_start != total_size {
        return Err(invalid(format!(
            "cell data is {} bytes, header declares {total_size}",
            r.pos - data_start
        )));
    }

    if has_crc {
        let expected = u32::from_le_bytes(
            r.take(4)?
                .try_into()
                .map_err(|_| invalid("truncated checksum"))?,
        );
        let actual = crc32c(&bytes[..r.pos - 4]);
        if expected != actual {
            return Err(invalid(format!(
                "crc32c mismatch: stored {expected:#010x}, computed {actual:#010x}"
            )));
        }
    }
    if r.pos != bytes.len() {
        return Err(invalid(format!("{} trailing bytes", bytes.len() - r.pos)));
    }

    // Children always sit at higher indices, so build back to front.
    let mut built: Vec<Option<CellRef>> = vec![None; cell_count];
    for index in (0..cell_count).rev() {
        let raw = &raw_cells[index];
        let mut refs = Vec::with_capacity(raw.refs.len());
        for child in &raw.refs {
            let child = built[*child].ok_or_else(|| invalid("dangling reference"))?;
            refs.push(child);
        }
        let cell_type = if raw.exotic {
            let tag = raw
                .data
                .first()
                .copied()
                .ok_or_else(|| invalid(format!("exotic cell #{index} has no tag")))?;
            CellType::from_tag(tag)?
        } else {
            CellType::Ordinary
        };
        let cell = arena.insert(cell_type, raw.data.clone(), raw.bit_len, refs)?;
        if arena.get(cell)?.level_mask() != raw.level_mask {
            return Err(invalid(format!(
                "cell #{index} declares level mask {}, computed {}",
                raw.level_mask.mask(),
                arena.get(cell)?.level_mask().mask()
            )));
        }
        built[index] = Some(cell);
    }

    root_indices
        .into_iter()
        .map(|i| built[i].ok_or_else(|| invalid("unbuilt root")))
        .collect()
}

// --- Helper functions ---

struct RawCell {
    exotic: bool,
    level_mask: LevelMask,
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| invalid(format!("truncated at byte {}", self.pos)))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, n: usize) -> Result<u64, CellError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }
}

fn read_raw_cell(
    r: &mut Reader<'_>,
    index: usize,
    cell_count: usize,
    size_bytes: usize,
) -> Result<RawCell, CellError> {
    let d1 = r.byte()?;
    let d2 = r.byte()?;
    let ref_count = (d1 & 0x07) as usize;
    if ref_count > 4 {
        return Err(invalid(format!("cell #{index} declares {ref_count} references")));
    }
    let exotic = d1 & 0x08 != 0;
    let level_mask = LevelMask::new(d1 >> 5);

    let byte_len = (d2 as usize).div_ceil(2);
    let mut data = r.take(byte_len)?.to_vec();
    let bit_len = if d2 % 2 == 0 {
        byte_len * 8
    } else {
        // Strip the completion tag: the lowest set bit of the last byte.
        let last = data
            .last_mut()
            .filter(|b| **b != 0)
            .ok_or_else(|| invalid(format!("cell #{index} has no completion tag")))?;
        let trailing = last.trailing_zeros() as usize;
        *last &= !(1u8 << trailing);
        byte_len * 8 - trailing - 1
    };

    let mut refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        let child = r.uint(size_bytes)? as usize;
        if child <= index || child >= cell_count {
            return Err(invalid(format!(
                "cell #{index} references #{child}: references must point forward"
            )));
        }
        refs.push(child);
    }

    Ok(RawCell {
        exotic,
        level_mask,
        data,
        bit_len,
        refs,
    })
}

/// Reverse post-order DFS: every parent precedes all of its descendants.
fn topological_order(arena: &CellArena, root: CellRef) -> Result<Vec<CellRef>, CellError> {
    fn visit(
        arena: &CellArena,
        cell: CellRef,
        seen: &mut HashSet<CellRef>,
        post: &mut Vec<CellRef>,
    ) -> Result<(), CellError> {
        if !seen.insert(cell) {
            return Ok(());
        }
        for child in arena.get(cell)?.refs().iter().rev() {
            visit(arena, *child, seen, post)?;
        }
        post.push(cell);
        Ok(())
    }

    let mut seen = HashSet::new();
    let mut post = Vec::new();
    visit(arena, root, &mut seen, &mut post)?;
    post.reverse();
    Ok(post)
}

fn bytes_for(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

fn write_uint(out: &mut Vec<u8>, value: u64, bytes: usize) {
    for i in (0..bytes).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

fn invalid(reason: impl Into<String>) -> CellError {
    CellError::InvalidBoc {
        reason: reason.into(),
    }
}

/// CRC-32C (Castagnoli), reflected, as used by the bag-of-cells trailer.
pub fn crc32c(data: &[u8]) -> u32 {
    const POLY: u32 = 0x82f6_3b78;
    let mut crc = !0u32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;
    use hex_literal::hex;

    fn sample_tree(arena: &mut CellArena) -> CellRef {
        let shared = {
            let mut b = CellBuilder::new();
            b.store_uint(0x1234, 16).unwrap();
            b.build(arena).unwrap()
        };
        let left = {
            let mut b = CellBuilder::new();
            b.store_bit(true).unwrap().store_ref(shared).unwrap();
            b.build(arena).unwrap()
        };
        let mut b = CellBuilder::new();
        b.store_uint(0x11ef55aa, 32).unwrap();
        b.store_ref(left).unwrap().store_ref(shared).unwrap();
        b.build(arena).unwrap()
    }

    #[test]
    fn test_crc32c_check_value() {
        assert_eq!(crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn test_empty_cell_encoding() {
        let mut arena = CellArena::new();
        let empty = CellBuilder::new().build(&mut arena).unwrap();
        let bytes = serialize_with(
            &arena,
            empty,
            BocOptions {
                with_index: false,
                with_crc32c: false,
            },
        )
        .unwrap();
        assert_eq!(bytes, hex!("b5ee9c72 01 01 01 01 00 02 00 0000").to_vec());
    }

    #[test]
    fn test_serialize_then_parse_preserves_hash() {
        let mut arena = CellArena::new();
        let root = sample_tree(&mut arena);
        let expected = arena.hash(root, 0).unwrap();

        for options in [
            BocOptions::default(),
            BocOptions {
                with_index: true,
                with_crc32c: false,
            },
        ] {
            let bytes = serialize_with(&arena, root, options).unwrap();
            let mut fresh = CellArena::new();
            let parsed = deserialize(&mut fresh, &bytes).unwrap();
            assert_eq!(fresh.hash(parsed, 0).unwrap(), expected);
            // The shared leaf is stored once
            assert_eq!(fresh.len(), 3);
        }
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        let mut arena = CellArena::new();
        let root = sample_tree(&mut arena);
        let bytes = serialize(&arena, root).unwrap();

        let mut bad = bytes.clone();
        bad[0] = 0x00;
        assert!(matches!(
            deserialize(&mut CellArena::new(), &bad),
            Err(CellError::InvalidBoc { .. })
        ));

        assert!(matches!(
            deserialize(&mut CellArena::new(), &bytes[..bytes.len() - 6]),
            Err(CellError::InvalidBoc { .. })
        ));
    }

    #[test]
    fn test_rejects_corrupted_checksum() {
        let mut arena = CellArena::new();
        let root = sample_tree(&mut arena);
        let mut bytes = serialize(&arena, root).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = deserialize(&mut CellArena::new(), &bytes).unwrap_err();
        assert!(err.to_string().contains("crc32c"));
    }

    #[test]
    fn test_rejects_cell_count_larger_than_input() {
        // Header claims 0xffffffff cells in a 27-byte bag
        let bytes = hex!("b5ee9c72 04 01 ffffffff 00000001 00000000 00 00000000");
        let err = deserialize(&mut CellArena::new(), &bytes).unwrap_err();
        assert!(matches!(err, CellError::InvalidBoc { .. }));
        assert!(err.to_string().contains("cannot fit"));
    }

    #[test]
    fn test_rejects_total_size_larger_than_input() {
        let bytes = hex!("b5ee9c72 01 02 01 01 00 ffff 00 0000");
        let err = deserialize(&mut CellArena::new(), &bytes).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_rejects_backward_reference() {
        // The first cell references itself.
        let bytes = hex!("b5ee9c72 01 01 02 01 00 05 00 010000 0000").to_vec();
        let err = deserialize(&mut CellArena::new(), &bytes).unwrap_err();
        assert!(err.to_string().contains("point forward"));
    }
}

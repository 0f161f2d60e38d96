//! Dictionaries: `Hashmap n X`, `HashmapE n X` and `HashmapAug n X Y`.
//!
//! A dictionary is a binary Patricia tree. Each node starts with a label (a run
//! of key bits shared by everything below it), then is either a leaf holding
//! the value or a fork with two child references. Augmented dictionaries add an
//! extra value to every node: before the value in a leaf, after the references
//! in a fork.

use super::{CellArena, CellBuilder, CellError, CellRef, CellSlice};
use std::collections::BTreeMap;

/// Reader that consumes one augmentation value from a node.
pub type ExtraReader = fn(&mut CellSlice<'_>) -> Result<(), CellError>;

/// A dictionary key as an exact-length bit string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DictKey(Vec<bool>);

impl DictKey {
    pub fn from_uint(value: u64, bits: usize) -> Self {
        Self((0..bits).rev().map(|i| i < 64 && (value >> i) & 1 == 1).collect())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(
            (0..bytes.len() * 8)
                .map(|i| (bytes[i / 8] >> (7 - i % 8)) & 1 == 1)
                .collect(),
        )
    }

    pub fn bits(&self) -> &[bool] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key as an integer, if it is at most 64 bits long.
    pub fn to_uint(&self) -> Option<u64> {
        if self.0.len() > 64 {
            return None;
        }
        Some(self.0.iter().fold(0u64, |acc, b| (acc << 1) | u64::from(*b)))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.0.len().div_ceil(8)];
        for (i, bit) in self.0.iter().enumerate() {
            if *bit {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        out
    }
}

/// Skip a `CurrencyCollection`: `grams:(VarUInteger 16) other:(HashmapE 32 ...)`.
pub fn skip_currency_collection(slice: &mut CellSlice<'_>) -> Result<(), CellError> {
    let len = slice.load_uint(4)? as usize;
    slice.skip_bits(len * 8)?;
    slice.load_maybe_ref()?;
    Ok(())
}

/// Look up `key` in the dictionary whose root edge starts at `edge`.
///
/// Returns the value slice (augmentation already consumed), or `None` when the
/// key is absent. Reaching a pruned branch on the path is an error.
pub fn get<'a>(
    edge: CellSlice<'a>,
    key_bits: usize,
    key: &DictKey,
    extra: Option<ExtraReader>,
) -> Result<Option<CellSlice<'a>>, CellError> {
    if key.len() != key_bits {
        return Err(CellError::InvalidDictionary {
            reason: format!("key has {} bits, dictionary uses {key_bits}", key.len()),
        });
    }

    let mut slice = edge;
    let mut remaining = key.bits();
    loop {
        let label = load_label(&mut slice, remaining.len())?;
        if !remaining.starts_with(&label) {
            return Ok(None);
        }
        remaining = &remaining[label.len()..];

        if remaining.is_empty() {
            if let Some(skip) = extra {
                skip(&mut slice)?;
            }
            return Ok(Some(slice));
        }

        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        let next = if remaining[0] { right } else { left };
        slice = slice.arena().slice(next)?;
        remaining = &remaining[1..];
    }
}

/// Look up `key` in a `HashmapE` (a maybe-reference to the root) read from `slice`.
pub fn get_optional<'a>(
    slice: &mut CellSlice<'a>,
    key_bits: usize,
    key: &DictKey,
    extra: Option<ExtraReader>,
) -> Result<Option<CellSlice<'a>>, CellError> {
    match slice.load_maybe_ref()? {
        Some(root) => get(slice.arena().slice(root)?, key_bits, key, extra),
        None => Ok(None),
    }
}

/// All entries in key order.
pub fn entries<'a>(
    edge: CellSlice<'a>,
    key_bits: usize,
    extra: Option<ExtraReader>,
) -> Result<Vec<(DictKey, CellSlice<'a>)>, CellError> {
    let mut out = Vec::new();
    let mut prefix = Vec::with_capacity(key_bits);
    collect(edge, key_bits, &mut prefix, extra, &mut out)?;
    Ok(out)
}

/// All entries of a `HashmapE` read from `slice`; empty when the root is absent.
pub fn entries_optional<'a>(
    slice: &mut CellSlice<'a>,
    key_bits: usize,
    extra: Option<ExtraReader>,
) -> Result<Vec<(DictKey, CellSlice<'a>)>, CellError> {
    match slice.load_maybe_ref()? {
        Some(root) => entries(slice.arena().slice(root)?, key_bits, extra),
        None => Ok(Vec::new()),
    }
}

fn collect<'a>(
    mut slice: CellSlice<'a>,
    m: usize,
    prefix: &mut Vec<bool>,
    extra: Option<ExtraReader>,
    out: &mut Vec<(DictKey, CellSlice<'a>)>,
) -> Result<(), CellError> {
    let start = prefix.len();
    let label = load_label(&mut slice, m)?;
    let rest = m - label.len();
    prefix.extend_from_slice(&label);

    if rest == 0 {
        if let Some(skip) = extra {
            skip(&mut slice)?;
        }
        out.push((DictKey(prefix.clone()), slice));
    } else {
        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        for (bit, child) in [(false, left), (true, right)] {
            prefix.push(bit);
            let child = slice.arena().slice(child)?;
            collect(child, rest - 1, prefix, extra, out)?;
            prefix.pop();
        }
    }
    prefix.truncate(start);
    Ok(())
}

/// Build a dictionary and return its root edge cell, or `None` when empty.
///
/// Each value is spliced into its leaf verbatim. When `extra` is given, the
/// dictionary is augmented and that value is stored in every node.
pub fn build(
    arena: &mut CellArena,
    key_bits: usize,
    values: &BTreeMap<DictKey, CellBuilder>,
    extra: Option<&CellBuilder>,
) -> Result<Option<CellRef>, CellError> {
    if values.is_empty() {
        return Ok(None);
    }
    let mut items = Vec::with_capacity(values.len());
    for (key, value) in values {
        if key.len() != key_bits {
            return Err(CellError::InvalidDictionary {
                reason: format!("key has {} bits, dictionary uses {key_bits}", key.len()),
            });
        }
        items.push((key.bits(), value));
    }
    build_edge(arena, &items, key_bits, extra).map(Some)
}

fn build_edge(
    arena: &mut CellArena,
    items: &[(&[bool], &CellBuilder)],
    m: usize,
    extra: Option<&CellBuilder>,
) -> Result<CellRef, CellError> {
    let label_len = if items.len() == 1 {
        m
    } else {
        common_prefix_len(items)
    };
    let mut b = CellBuilder::new();
    store_label(&mut b, &items[0].0[..label_len], m)?;

    if label_len == m {
        if let Some(extra) = extra {
            b.store_builder(extra)?;
        }
        b.store_builder(items[0].1)?;
    } else {
        // Keys are sorted, so every 0-branch key precedes every 1-branch key.
        let split = items
            .iter()
            .position(|(k, _)| k[label_len])
            .unwrap_or(items.len());
        let left = strip(&items[..split], label_len + 1);
        let right = strip(&items[split..], label_len + 1);
        if left.is_empty() || right.is_empty() {
            return Err(CellError::InvalidDictionary {
                reason: "duplicate key".into(),
            });
        }
        let rest = m - label_len - 1;
        let left = build_edge(arena, &left, rest, extra)?;
        let right = build_edge(arena, &right, rest, extra)?;
        b.store_ref(left)?.store_ref(right)?;
        if let Some(extra) = extra {
            b.store_builder(extra)?;
        }
    }
    b.build(arena)
}

// --- Helper functions ---

/// Bits needed to encode a length in `0..=m`.
fn bits_for(m: usize) -> usize {
    (usize::BITS - m.leading_zeros()) as usize
}

fn strip<'b>(
    items: &[(&'b [bool], &'b CellBuilder)],
    at: usize,
) -> Vec<(&'b [bool], &'b CellBuilder)> {
    items.iter().map(|&(k, v)| (&k[at..], v)).collect()
}

fn common_prefix_len(items: &[(&[bool], &CellBuilder)]) -> usize {
    let first = items[0].0;
    items[1..]
        .iter()
        .map(|(k, _)| first.iter().zip(k.iter()).take_while(|(a, b)| a == b).count())
        .min()
        .unwrap_or(first.len())
}

fn load_label(slice: &mut CellSlice<'_>, m: usize) -> Result<Vec<bool>, CellError> {
    let len_bits = bits_for(m);
    let (len, same) = if !slice.load_bit()? {
        // hml_short$0 len:(Unary ~n) s:(n * Bit)
        let mut n = 0usize;
        while slice.load_bit()? {
            n += 1;
        }
        (n, None)
    } else if !slice.load_bit()? {
        // hml_long$10 n:(#<= m) s:(n * Bit)
        (slice.load_uint(len_bits)? as usize, None)
    } else {
        // hml_same$11 v:Bit n:(#<= m)
        let v = slice.load_bit()?;
        (slice.load_uint(len_bits)? as usize, Some(v))
    };

    if len > m {
        return Err(CellError::InvalidDictionary {
            reason: format!("label of {len} bits exceeds the {m} key bits left"),
        });
    }
    match same {
        Some(v) => Ok(vec![v; len]),
        None => (0..len).map(|_| slice.load_bit()).collect(),
    }
}

fn store_label(b: &mut CellBuilder, label: &[bool], m: usize) -> Result<(), CellError> {
    let n = label.len();
    let len_bits = bits_for(m);
    let short = 2 * n + 2;
    let long = 2 + len_bits + n;
    let uniform = n > 0 && label.iter().all(|bit| *bit == label[0]);

    if uniform && 3 + len_bits < short.min(long) {
        b.store_bit(true)?.store_bit(true)?.store_bit(label[0])?;
        b.store_uint(n as u64, len_bits)?;
        return Ok(());
    }
    if short <= long {
        b.store_bit(false)?;
        for _ in 0..n {
            b.store_bit(true)?;
        }
        b.store_bit(false)?;
    } else {
        b.store_bit(true)?.store_bit(false)?;
        b.store_uint(n as u64, len_bits)?;
    }
    for bit in label {
        b.store_bit(*bit)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_value(v: u64) -> CellBuilder {
        let mut b = CellBuilder::new();
        b.store_uint(v, 32).unwrap();
        b
    }

    fn sample(arena: &mut CellArena, keys: &[u64], bits: usize) -> CellRef {
        let values: BTreeMap<_, _> = keys
            .iter()
            .map(|k| (DictKey::from_uint(*k, bits), u32_value(k * 10)))
            .collect();
        build(arena, bits, &values, None).unwrap().unwrap()
    }

    #[test]
    fn test_lookup_hits_and_misses() {
        let mut arena = CellArena::new();
        let root = sample(&mut arena, &[32, 34, 36, 1], 32);

        for key in [32u64, 34, 36, 1] {
            let mut value = get(arena.slice(root).unwrap(), 32, &DictKey::from_uint(key, 32), None)
                .unwrap()
                .expect("present");
            assert_eq!(value.load_uint(32).unwrap(), key * 10);
        }
        let missing = get(arena.slice(root).unwrap(), 32, &DictKey::from_uint(35, 32), None).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_entries_in_key_order() {
        let mut arena = CellArena::new();
        let root = sample(&mut arena, &[5, 0, 3, 65535], 16);
        let keys: Vec<u64> = entries(arena.slice(root).unwrap(), 16, None)
            .unwrap()
            .iter()
            .map(|(k, _)| k.to_uint().unwrap())
            .collect();
        assert_eq!(keys, vec![0, 3, 5, 65535]);
    }

    #[test]
    fn test_single_entry_uses_compact_label() {
        let mut arena = CellArena::new();
        let root = sample(&mut arena, &[0], 256);
        // hml_same: 2 + 1 + 9 bits of label, then the 32-bit value
        assert_eq!(arena.get(root).unwrap().bit_len(), 12 + 32);
    }

    #[test]
    fn test_augmented_dictionary_skips_extra() {
        let mut arena = CellArena::new();
        let mut zero = CellBuilder::new();
        zero.store_uint(0, 4).unwrap().store_bit(false).unwrap();
        let values: BTreeMap<_, _> = [7u64, 9, 200]
            .iter()
            .map(|k| (DictKey::from_uint(*k, 64), u32_value(*k)))
            .collect();
        let root = build(&mut arena, 64, &values, Some(&zero)).unwrap().unwrap();

        let mut value = get(
            arena.slice(root).unwrap(),
            64,
            &DictKey::from_uint(200, 64),
            Some(skip_currency_collection),
        )
        .unwrap()
        .unwrap();
        assert_eq!(value.load_uint(32).unwrap(), 200);

        let all = entries(arena.slice(root).unwrap(), 64, Some(skip_currency_collection)).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_optional_dictionary() {
        let mut arena = CellArena::new();
        let root = sample(&mut arena, &[1, 2], 8);
        let mut b = CellBuilder::new();
        b.store_maybe_ref(Some(root)).unwrap().store_maybe_ref(None).unwrap();
        let holder = b.build(&mut arena).unwrap();

        let mut s = arena.slice(holder).unwrap();
        assert_eq!(entries_optional(&mut s, 8, None).unwrap().len(), 2);
        assert!(entries_optional(&mut s, 8, None).unwrap().is_empty());
    }

    #[test]
    fn test_key_length_mismatch() {
        let mut arena = CellArena::new();
        let root = sample(&mut arena, &[1], 32);
        let err = get(arena.slice(root).unwrap(), 32, &DictKey::from_uint(1, 16), None).unwrap_err();
        assert!(matches!(err, CellError::InvalidDictionary { .. }));
    }

    #[test]
    fn test_key_conversions() {
        let key = DictKey::from_bytes(&[0xc6, 0x01]);
        assert_eq!(key.len(), 16);
        assert_eq!(key.to_uint(), Some(0xc601));
        assert_eq!(key.to_bytes(), vec![0xc6, 0x01]);
        assert_eq!(DictKey::from_uint(0xc601, 16), key);
    }
}

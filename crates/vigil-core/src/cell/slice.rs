use super::{Cell, CellArena, CellError, CellRef, CellType};

/// Read cursor over one cell's bits and references.
///
/// Every read fails with a [`CellError`] on underflow instead of panicking, so
/// truncated or hostile input surfaces as a malformed-cell error.
#[derive(Clone, Debug)]
pub struct CellSlice<'a> {
    arena: &'a CellArena,
    cell: &'a Cell,
    cell_ref: CellRef,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub(crate) fn new(arena: &'a CellArena, cell_ref: CellRef, cell: &'a Cell) -> Self {
        Self {
            arena,
            cell,
            cell_ref,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn arena(&self) -> &'a CellArena {
        self.arena
    }

    /// The cell this cursor reads.
    pub fn cell_ref(&self) -> CellRef {
        self.cell_ref
    }

    pub fn cell_type(&self) -> CellType {
        self.cell.cell_type()
    }

    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs().len() - self.ref_pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn ensure_bits(&self, bits: usize) -> Result<(), CellError> {
        if bits > self.remaining_bits() {
            return Err(CellError::BitUnderflow {
                requested: bits,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        self.ensure_bits(1)?;
        let bit = self.cell.bit(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Read a `bits`-wide unsigned integer (`bits <= 64`).
    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        if bits > 64 {
            return Err(CellError::UnsupportedWidth { bits });
        }
        self.ensure_bits(bits)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.cell.bit(self.bit_pos));
            self.bit_pos += 1;
        }
        Ok(value)
    }

    /// Read a `bits`-wide two's complement integer.
    pub fn load_int(&mut self, bits: usize) -> Result<i64, CellError> {
        let raw = self.load_uint(bits)?;
        if bits == 0 || bits == 64 {
            return Ok(raw as i64);
        }
        if raw >> (bits - 1) & 1 == 1 {
            Ok((raw | !((1u64 << bits) - 1)) as i64)
        } else {
            Ok(raw as i64)
        }
    }

    pub fn load_u8(&mut self) -> Result<u8, CellError> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_u16(&mut self) -> Result<u16, CellError> {
        Ok(self.load_uint(16)? as u16)
    }

    pub fn load_u32(&mut self) -> Result<u32, CellError> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_u64(&mut self) -> Result<u64, CellError> {
        self.load_uint(64)
    }

    pub fn load_u256(&mut self) -> Result<[u8; 32], CellError> {
        let bytes = self.load_bits(256)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Read `bits` bits packed MSB first; the last byte is zero padded.
    pub fn load_bits(&mut self, bits: usize) -> Result<Vec<u8>, CellError> {
        self.ensure_bits(bits)?;
        let mut out = vec![0u8; bits.div_ceil(8)];
        for i in 0..bits {
            if self.cell.bit(self.bit_pos + i) {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        self.bit_pos += bits;
        Ok(out)
    }

    pub fn skip_bits(&mut self, bits: usize) -> Result<(), CellError> {
        self.ensure_bits(bits)?;
        self.bit_pos += bits;
        Ok(())
    }

    /// Consume a fixed tag, failing if it differs.
    pub fn expect_magic(&mut self, expected: u64, bits: usize) -> Result<(), CellError> {
        let got = self.load_uint(bits)?;
        if got != expected {
            return Err(CellError::MagicMismatch {
                expected,
                got,
                bits,
            });
        }
        Ok(())
    }

    pub fn load_ref(&mut self) -> Result<CellRef, CellError> {
        let cell = self.ref_at(self.ref_pos)?;
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Load the next reference and open a cursor on it.
    pub fn load_ref_slice(&mut self) -> Result<CellSlice<'a>, CellError> {
        let cell = self.load_ref()?;
        self.arena.slice(cell)
    }

    pub fn load_maybe_ref(&mut self) -> Result<Option<CellRef>, CellError> {
        if self.load_bit()? {
            Ok(Some(self.load_ref()?))
        } else {
            Ok(None)
        }
    }

    /// Reference at an absolute index, regardless of the cursor position.
    pub fn ref_at(&self, index: usize) -> Result<CellRef, CellError> {
        self.cell
            .refs()
            .get(index)
            .copied()
            .ok_or(CellError::RefUnderflow { index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    #[test]
    fn test_reads_follow_writes() {
        let mut arena = CellArena::new();
        let mut b = CellBuilder::new();
        b.store_uint(0x11ef55aa, 32).unwrap();
        b.store_int(-239, 32).unwrap();
        b.store_bit(true).unwrap();
        b.store_u256(&[0x5a; 32]).unwrap();
        let cell = b.build(&mut arena).unwrap();

        let mut s = arena.slice(cell).unwrap();
        s.expect_magic(0x11ef55aa, 32).unwrap();
        assert_eq!(s.load_int(32).unwrap(), -239);
        assert!(s.load_bit().unwrap());
        assert_eq!(s.load_u256().unwrap(), [0x5a; 32]);
        assert!(s.is_empty());
    }

    #[test]
    fn test_underflow_is_an_error() {
        let mut arena = CellArena::new();
        let mut b = CellBuilder::new();
        b.store_uint(3, 4).unwrap();
        let cell = b.build(&mut arena).unwrap();

        let mut s = arena.slice(cell).unwrap();
        assert_eq!(
            s.load_uint(8).unwrap_err(),
            CellError::BitUnderflow {
                requested: 8,
                remaining: 4
            }
        );
        assert_eq!(
            s.load_ref().unwrap_err(),
            CellError::RefUnderflow { index: 0 }
        );
    }

    #[test]
    fn test_magic_mismatch() {
        let mut arena = CellArena::new();
        let mut b = CellBuilder::new();
        b.store_uint(0xcca4, 16).unwrap();
        let cell = b.build(&mut arena).unwrap();

        let mut s = arena.slice(cell).unwrap();
        assert_eq!(
            s.expect_magic(0xcca5, 16).unwrap_err(),
            CellError::MagicMismatch {
                expected: 0xcca5,
                got: 0xcca4,
                bits: 16
            }
        );
    }

    #[test]
    fn test_maybe_ref() {
        let mut arena = CellArena::new();
        let leaf = CellBuilder::new().build(&mut arena).unwrap();
        let mut b = CellBuilder::new();
        b.store_maybe_ref(None).unwrap();
        b.store_maybe_ref(Some(leaf)).unwrap();
        let cell = b.build(&mut arena).unwrap();

        let mut s = arena.slice(cell).unwrap();
        assert_eq!(s.load_maybe_ref().unwrap(), None);
        assert_eq!(s.load_maybe_ref().unwrap(), Some(leaf));
    }
}

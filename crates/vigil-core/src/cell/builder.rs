use super::{CellArena, CellError, CellRef, CellSlice, CellType, MAX_BITS, MAX_REFS};

/// Append-only writer that produces one cell.
///
/// Store methods return `&mut Self` so writes can be chained with `?`:
///
/// ```ignore
/// let mut b = CellBuilder::new();
/// b.store_uint(0x11ef55aa, 32)?.store_int(-239, 32)?.store_ref(info)?;
/// let block = b.build(&mut arena)?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<CellRef>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    fn reserve_bits(&self, bits: usize) -> Result<(), CellError> {
        if self.bit_len + bits > MAX_BITS {
            return Err(CellError::BitOverflow {
                bits: self.bit_len + bits,
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        self.reserve_bits(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Store the low `bits` bits of `value`, most significant first.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 64 {
            return Err(CellError::UnsupportedWidth { bits });
        }
        if bits < 64 && value >> bits != 0 {
            return Err(CellError::ValueOutOfRange {
                value: value as i128,
                bits,
            });
        }
        self.reserve_bits(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    /// Store `value` as a `bits`-wide two's complement integer.
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self, CellError> {
        if bits == 0 || bits > 64 {
            return Err(CellError::UnsupportedWidth { bits });
        }
        if bits < 64 {
            let bound = 1i64 << (bits - 1);
            if value < -bound || value >= bound {
                return Err(CellError::ValueOutOfRange {
                    value: value as i128,
                    bits,
                });
            }
        }
        let raw = if bits == 64 {
            value as u64
        } else {
            (value as u64) & ((1u64 << bits) - 1)
        };
        self.store_uint(raw, bits)
    }

    /// Store the first `bits` bits of `bytes`.
    pub fn store_bits(&mut self, bytes: &[u8], bits: usize) -> Result<&mut Self, CellError> {
        if bits > bytes.len() * 8 {
            return Err(CellError::BitUnderflow {
                requested: bits,
                remaining: bytes.len() * 8,
            });
        }
        self.reserve_bits(bits)?;
        for i in 0..bits {
            self.push_bit((bytes[i / 8] >> (7 - i % 8)) & 1 == 1);
        }
        Ok(self)
    }

    pub fn store_u256(&mut self, value: &[u8; 32]) -> Result<&mut Self, CellError> {
        self.store_bits(value, 256)
    }

    pub fn store_ref(&mut self, cell: CellRef) -> Result<&mut Self, CellError> {
        if self.refs.len() >= MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// `Maybe ^X`: a presence bit followed by the reference when present.
    pub fn store_maybe_ref(&mut self, cell: Option<CellRef>) -> Result<&mut Self, CellError> {
        match cell {
            Some(cell) => {
                self.store_bit(true)?;
                self.store_ref(cell)
            }
            None => self.store_bit(false),
        }
    }

    /// Copy the unread bits and references of `slice`.
    pub fn store_slice(&mut self, slice: &CellSlice<'_>) -> Result<&mut Self, CellError> {
        let mut reader = slice.clone();
        let bits = reader.remaining_bits();
        let data = reader.load_bits(bits)?;
        self.store_bits(&data, bits)?;
        while reader.remaining_refs() > 0 {
            let child = reader.load_ref()?;
            self.store_ref(child)?;
        }
        Ok(self)
    }

    /// Copy the full contents of another builder.
    pub fn store_builder(&mut self, other: &CellBuilder) -> Result<&mut Self, CellError> {
        self.store_bits(&other.data, other.bit_len)?;
        if self.refs.len() + other.refs.len() > MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.extend_from_slice(&other.refs);
        Ok(self)
    }

    pub fn build(self, arena: &mut CellArena) -> Result<CellRef, CellError> {
        arena.insert(CellType::Ordinary, self.data, self.bit_len, self.refs)
    }

    /// Build an exotic cell; the kind is taken from the leading tag byte.
    pub fn build_exotic(self, arena: &mut CellArena) -> Result<CellRef, CellError> {
        let tag = match self.data.first() {
            Some(tag) if self.bit_len >= 8 => *tag,
            _ => {
                return Err(CellError::BitUnderflow {
                    requested: 8,
                    remaining: self.bit_len,
                })
            }
        };
        let cell_type = CellType::from_tag(tag)?;
        arena.insert(cell_type, self.data, self.bit_len, self.refs)
    }
}

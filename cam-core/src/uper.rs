//! Unaligned PER (ITU-T X.691) bit-level primitives.
//!
//! Only the subset CAM needs: constrained whole numbers, booleans, extension
//! markers and optional-field bitmaps. Bits are read MSB first.

/// Number of bits used to encode a value constrained to `lb..=ub`.
pub const fn constrained_width(lb: i64, ub: i64) -> u32 {
    let range = (ub - lb) as u64;
    64 - range.leading_zeros()
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Sequential reader over a UPER-encoded buffer.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    /// Bits consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Read `n` (<= 64) bits as an unsigned integer. `None` past the end.
    pub fn read_bits(&mut self, n: u32) -> Option<u64> {
        if n as usize > self.remaining() {
            return None;
        }
        let mut val = 0u64;
        for _ in 0..n {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            val = (val << 1) | bit as u64;
            self.pos += 1;
        }
        Some(val)
    }

    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    /// Constrained whole number in `lb..=ub`.
    pub fn read_constrained(&mut self, lb: i64, ub: i64) -> Option<i64> {
        let offset = self.read_bits(constrained_width(lb, ub))?;
        Some(lb + offset as i64)
    }

    /// Presence bitmap for `n` OPTIONAL components.
    pub fn read_bitmap(&mut self, n: u32) -> Option<Vec<bool>> {
        (0..n).map(|_| self.read_bool()).collect()
    }

    pub fn skip(&mut self, n: u32) -> Option<()> {
        if n as usize > self.remaining() {
            return None;
        }
        self.pos += n as usize;
        Some(())
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only UPER bit writer. Output is zero-padded to a whole octet.
#[derive(Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            if self.bits % 8 == 0 {
                self.data.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.data.len() - 1;
                self.data[last] |= 1 << (7 - (self.bits % 8));
            }
            self.bits += 1;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u64, 1);
    }

    /// Constrained whole number; `value` is clamped into `lb..=ub`.
    pub fn write_constrained(&mut self, value: i64, lb: i64, ub: i64) {
        let v = value.clamp(lb, ub);
        self.write_bits((v - lb) as u64, constrained_width(lb, ub));
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constrained_width() {
        assert_eq!(constrained_width(0, 255), 8);
        assert_eq!(constrained_width(1, 127), 7);
        assert_eq!(constrained_width(0, 16383), 14);
        assert_eq!(constrained_width(-900_000_000, 900_000_001), 31);
        assert_eq!(constrained_width(-1_800_000_000, 1_800_000_001), 32);
        assert_eq!(constrained_width(-100_000, 800_001), 20);
        assert_eq!(constrained_width(5, 5), 0);
    }

    #[test]
    fn test_read_bits_msb_first() {
        let mut r = BitReader::new(&[0b1010_0000, 0xFF]);
        assert_eq!(r.read_bits(3), Some(0b101));
        assert_eq!(r.read_bits(5), Some(0));
        assert_eq!(r.read_bits(4), Some(0xF));
        assert_eq!(r.remaining(), 4);
        assert_eq!(r.read_bits(5), None);
    }

    #[test]
    fn test_writer_matches_reader() {
        let mut w = BitWriter::new();
        w.write_bool(true);
        w.write_constrained(-123_456_789, -900_000_000, 900_000_001);
        w.write_constrained(1000, 0, 16383);
        assert_eq!(w.bit_len(), 1 + 31 + 14);

        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 6);
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bool(), Some(true));
        assert_eq!(
            r.read_constrained(-900_000_000, 900_000_001),
            Some(-123_456_789)
        );
        assert_eq!(r.read_constrained(0, 16383), Some(1000));
    }

    #[test]
    fn test_write_constrained_clamps() {
        let mut w = BitWriter::new();
        w.write_constrained(300, 0, 255);
        assert_eq!(w.into_bytes(), vec![0xFF]);
    }
}

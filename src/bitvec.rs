//! Packed bit container used for choice vectors and transfer payloads.
//!
//! Bits are addressed MSB-first within each byte: bit `i` lives at byte
//! `i / 8`, position `7 - i % 8`. This ordering is part of the wire format
//! and must not change.

use crate::prg::Prg;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitVector {
    bits: usize,
    buf: Vec<u8>,
}

impl BitVector {
    /// Creates a zero-initialized vector of `bits` bits.
    pub fn zeroed(bits: usize) -> Self {
        Self {
            bits,
            buf: vec![0u8; bits.div_ceil(8)],
        }
    }

    /// Creates a vector of `bits` bits filled from a keystream.
    ///
    /// Trailing bits of the last byte are cleared so two vectors with the
    /// same bit content always compare equal.
    pub fn from_keystream(bits: usize, prg: &mut Prg) -> Self {
        let mut buf = vec![0u8; bits.div_ceil(8)];
        prg.fill(&mut buf);
        let mut v = Self { bits, buf };
        v.mask_trailing();
        v
    }

    /// Wraps an existing byte buffer without copying.
    ///
    /// # Panics
    ///
    /// Panics if `buf.len() != ceil(bits / 8)`.
    pub fn from_bytes(buf: Vec<u8>, bits: usize) -> Self {
        assert_eq!(buf.len(), bits.div_ceil(8), "buffer/bit-length mismatch");
        let mut v = Self { bits, buf };
        v.mask_trailing();
        v
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    /// # Panics
    ///
    /// Panics if `i >= bit_len()`.
    pub fn get_bit(&self, i: usize) -> bool {
        assert!(i < self.bits, "bit index out of range");
        (self.buf[i / 8] >> (7 - i % 8)) & 1 != 0
    }

    /// # Panics
    ///
    /// Panics if `i >= bit_len()`.
    pub fn set_bit(&mut self, i: usize, value: bool) {
        assert!(i < self.bits, "bit index out of range");
        let mask = 1u8 << (7 - i % 8);
        if value {
            self.buf[i / 8] |= mask;
        } else {
            self.buf[i / 8] &= !mask;
        }
    }

    pub fn get_byte(&self, i: usize) -> u8 {
        self.buf[i]
    }

    pub fn set_byte(&mut self, i: usize, value: u8) {
        self.buf[i] = value;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // Unused bits of the last byte must stay zero; u-rows and column xors
    // assume it on both sides of the wire.
    fn mask_trailing(&mut self) {
        let rem = self.bits % 8;
        if rem != 0 {
            if let Some(last) = self.buf.last_mut() {
                *last &= 0xffu8 << (8 - rem);
            }
        }
    }
}

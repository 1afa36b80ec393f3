//! First-level base OTs and the bootstrap adapter.
//!
//! The base-OT primitive is treated as an external capability: it runs once
//! per session on the control channel and hands back a stream of hash-wide
//! keys. The bootstrap adapter only slices that stream into AES-sized key
//! seeds; no protocol logic lives here beyond that.

use rand::rngs::StdRng;
use rand::SeedableRng;
use sha3::{Digest, Keccak256};

use crate::bitvec::BitVector;
use crate::channel::AbstractChannel;
use crate::group::{CurvePoint, FieldElement, GroupError};
use crate::ot::{OtError, OtResult};
use crate::prg::AES_KEY_BYTES;

/// Width of the raw keys emitted by the base-OT primitive.
pub const BASE_OT_HASH_BYTES: usize = 32;

/// External 1-out-of-2 base-OT capability (Naor-Pinkas / DDH family).
///
/// `sender` returns `n_vals * count` keys of [`BASE_OT_HASH_BYTES`] each,
/// the `n_vals` keys of one OT adjacent; `receiver` returns the `count`
/// keys selected by `choices`.
pub trait BaseOt {
    fn sender<C: AbstractChannel>(
        &mut self,
        n_vals: usize,
        count: usize,
        channel: &mut C,
    ) -> OtResult<Vec<u8>>;

    fn receiver<C: AbstractChannel>(
        &mut self,
        n_vals: usize,
        count: usize,
        choices: &BitVector,
        channel: &mut C,
    ) -> OtResult<Vec<u8>>;
}

/// DDH-based instantiation over a [`CurvePoint`] backend.
///
/// The sender publishes `S = y*G`; each receiver response is
/// `R = x*G + c*S`, giving the sender keys `H(y*R)` and `H(y*R - y*S)`
/// while the receiver can only derive `H(x*S)`, the key of its choice bit.
pub struct DdhBaseOt<P: CurvePoint> {
    rng: StdRng,
    _curve: std::marker::PhantomData<P>,
}

impl<P: CurvePoint> DdhBaseOt<P> {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            _curve: std::marker::PhantomData,
        }
    }
}

impl<P: CurvePoint> Default for DdhBaseOt<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn key_hash(index: usize, point_bytes: &[u8]) -> [u8; BASE_OT_HASH_BYTES] {
    let mut hasher = Keccak256::default();
    hasher.update((index as u64).to_le_bytes());
    hasher.update(point_bytes);
    hasher.finalize().into()
}

fn read_point<P: CurvePoint, C: AbstractChannel>(channel: &mut C, len: usize) -> OtResult<P> {
    let mut buf = vec![0u8; len];
    channel.read_bytes(&mut buf)?;
    Ok(P::parse(&buf)?)
}

fn require_two_values(n_vals: usize) -> OtResult<()> {
    if n_vals != 2 {
        return Err(OtError::InvalidParameter(format!(
            "base OT supports exactly 2 values per transfer, got {n_vals}"
        )));
    }
    Ok(())
}

impl<P: CurvePoint> BaseOt for DdhBaseOt<P> {
    fn sender<C: AbstractChannel>(
        &mut self,
        n_vals: usize,
        count: usize,
        channel: &mut C,
    ) -> OtResult<Vec<u8>> {
        require_two_values(n_vals)?;
        let point_len = P::encoded_len()?;

        let y = P::Scalar::sample(&mut self.rng);
        let s = P::generator().scalar_mul(&y);
        channel.write_bytes(&s.serialize()?)?;
        channel.flush()?;

        // y*S, subtracted from y*R to derive the second key.
        let t = s.scalar_mul(&y);
        let t_neg = t.negate();

        let mut keys = Vec::with_capacity(2 * count * BASE_OT_HASH_BYTES);
        for i in 0..count {
            let r: P = read_point(channel, point_len)?;
            let yr = r.scalar_mul(&y);
            keys.extend_from_slice(&key_hash(i, &yr.serialize()?));
            keys.extend_from_slice(&key_hash(i, &yr.add(&t_neg).serialize()?));
        }
        Ok(keys)
    }

    fn receiver<C: AbstractChannel>(
        &mut self,
        n_vals: usize,
        count: usize,
        choices: &BitVector,
        channel: &mut C,
    ) -> OtResult<Vec<u8>> {
        require_two_values(n_vals)?;
        if choices.bit_len() < count {
            return Err(OtError::InvalidParameter(format!(
                "need {count} choice bits, got {}",
                choices.bit_len()
            )));
        }
        let point_len = P::encoded_len()?;

        let s: P = read_point(channel, point_len)?;
        if s.is_identity() {
            return Err(OtError::Group {
                source: GroupError::InvalidPoint,
            });
        }

        let mut secrets = Vec::with_capacity(count);
        for i in 0..count {
            let x = P::Scalar::sample(&mut self.rng);
            let mut r = P::generator().scalar_mul(&x);
            if choices.get_bit(i) {
                r = r.add(&s);
            }
            channel.write_bytes(&r.serialize()?)?;
            secrets.push(x);
        }
        channel.flush()?;

        let mut keys = Vec::with_capacity(count * BASE_OT_HASH_BYTES);
        for (i, x) in secrets.iter().enumerate() {
            keys.extend_from_slice(&key_hash(i, &s.scalar_mul(x).serialize()?));
        }
        Ok(keys)
    }
}

/// Fixed-width key seeds sliced out of the base-OT output, `keys_per_ot`
/// keys per OT index (2 on the pair-holding side, 1 on the choosing side).
pub struct KeySeedMatrix {
    buf: Vec<u8>,
    keys_per_ot: usize,
}

impl KeySeedMatrix {
    fn from_hash_stream(raw: &[u8], total_keys: usize, keys_per_ot: usize) -> OtResult<Self> {
        if raw.len() != total_keys * BASE_OT_HASH_BYTES {
            return Err(OtError::InvalidParameter(format!(
                "base OT returned {} bytes, expected {}",
                raw.len(),
                total_keys * BASE_OT_HASH_BYTES
            )));
        }
        let mut buf = Vec::with_capacity(total_keys * AES_KEY_BYTES);
        for key in raw.chunks(BASE_OT_HASH_BYTES) {
            buf.extend_from_slice(&key[..AES_KEY_BYTES]);
        }
        Ok(Self { buf, keys_per_ot })
    }

    pub fn ot_count(&self) -> usize {
        self.buf.len() / (AES_KEY_BYTES * self.keys_per_ot)
    }

    fn key(&self, slot: usize) -> [u8; AES_KEY_BYTES] {
        let mut out = [0u8; AES_KEY_BYTES];
        out.copy_from_slice(&self.buf[slot * AES_KEY_BYTES..][..AES_KEY_BYTES]);
        out
    }

    /// Both keys of OT `i`; only valid on the pair-holding side.
    pub fn pair(&self, i: usize) -> ([u8; AES_KEY_BYTES], [u8; AES_KEY_BYTES]) {
        debug_assert_eq!(self.keys_per_ot, 2);
        (self.key(2 * i), self.key(2 * i + 1))
    }

    /// The selected key of OT `i`; only valid on the choosing side.
    pub fn single(&self, i: usize) -> [u8; AES_KEY_BYTES] {
        debug_assert_eq!(self.keys_per_ot, 1);
        self.key(i)
    }

    pub(crate) fn into_pairs(self) -> Vec<([u8; AES_KEY_BYTES], [u8; AES_KEY_BYTES])> {
        (0..self.ot_count()).map(|i| self.pair(i)).collect()
    }

    pub(crate) fn into_singles(self) -> Vec<[u8; AES_KEY_BYTES]> {
        (0..self.ot_count()).map(|i| self.single(i)).collect()
    }
}

/// Runs the base-OT primitive as sender and slices the resulting
/// `2 * num_base_ots` keys.
pub fn bootstrap_sender<B: BaseOt, C: AbstractChannel>(
    base_ot: &mut B,
    num_base_ots: usize,
    channel: &mut C,
) -> OtResult<KeySeedMatrix> {
    let raw = base_ot.sender(2, num_base_ots, channel)?;
    KeySeedMatrix::from_hash_stream(&raw, 2 * num_base_ots, 2)
}

/// Runs the base-OT primitive as receiver with the supplied choice bits and
/// slices the resulting `num_base_ots` keys.
pub fn bootstrap_receiver<B: BaseOt, C: AbstractChannel>(
    base_ot: &mut B,
    num_base_ots: usize,
    choices: &BitVector,
    channel: &mut C,
) -> OtResult<KeySeedMatrix> {
    let raw = base_ot.receiver(2, num_base_ots, choices, channel)?;
    KeySeedMatrix::from_hash_stream(&raw, num_base_ots, 1)
}

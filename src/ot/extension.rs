//! Two-phase OT extension transfer core.
//!
//! One transfer call fans out over the supplied channels, each worker
//! handling an aligned slice of the OT indices:
//!
//! 1. the receiver expands both base seeds per row and sends
//!    `u_i = t0_i ^ t1_i ^ r`,
//! 2. the sender samples check pairs from its check seed, the receiver
//!    answers with digests of all four row combinations, and the sender
//!    verifies both reachable combinations per pair,
//! 3. the sender transposes its `q` rows into per-OT columns, derives pads
//!    through the XOF, and sends masked payload according to the variant.
//!
//! Both sides advance the shared row counter by the call's block count so
//! that consecutive calls draw fresh keystream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{Digest, Keccak256, Shake256};
use std::thread;
use tracing::debug;

use crate::bitvec::BitVector;
use crate::channel::AbstractChannel;
use crate::config::OtVariant;
use crate::ot::mask::MaskingFunction;
use crate::ot::{OtError, OtResult};
use crate::prg::{self, AES_KEY_BYTES};

const CHECK_DIGEST_BYTES: usize = 32;

/// Sender-side payload for one transfer call.
pub enum SenderInput<'a> {
    /// Explicit message pairs, `num_ots` messages of `bit_length / 8` bytes
    /// each, concatenated.
    General { x0: &'a [u8], x1: &'a [u8] },
    /// Correlation between the two messages per OT. Either one delta of
    /// `bit_length / 8` bytes applied to every OT, or one delta per OT.
    Correlated { delta: &'a [u8] },
    /// Both messages drawn from the pad XOF; nothing travels on the wire
    /// beyond the consistency check.
    Random,
}

impl SenderInput<'_> {
    fn variant(&self) -> OtVariant {
        match self {
            SenderInput::General { .. } => OtVariant::General,
            SenderInput::Correlated { .. } => OtVariant::Correlated,
            SenderInput::Random => OtVariant::Random,
        }
    }
}

/// Both message vectors as seen by the sender after a transfer call,
/// `num_ots` messages of `bit_length / 8` bytes each, concatenated.
pub struct SenderOutput {
    pub x0: Vec<u8>,
    pub x1: Vec<u8>,
}

/// Sender half of the extension: holds the base choice bits and the one
/// seed per base OT selected by them.
pub struct ExtensionSender {
    base_choices: BitVector,
    keys: Vec<[u8; AES_KEY_BYTES]>,
    num_checks: usize,
    check_seed: [u8; AES_KEY_BYTES],
    ctr: u64,
    call_idx: u64,
}

/// Receiver half of the extension: holds both seeds per base OT.
pub struct ExtensionReceiver {
    pairs: Vec<([u8; AES_KEY_BYTES], [u8; AES_KEY_BYTES])>,
    num_checks: usize,
    ctr: u64,
}

impl ExtensionSender {
    pub fn new(
        base_choices: BitVector,
        keys: Vec<[u8; AES_KEY_BYTES]>,
        num_checks: usize,
        check_seed: [u8; AES_KEY_BYTES],
    ) -> OtResult<Self> {
        if keys.len() < 2 {
            return Err(OtError::InvalidParameter(format!(
                "need at least 2 base OTs, got {}",
                keys.len()
            )));
        }
        if keys.len() != base_choices.bit_len() {
            return Err(OtError::InvalidParameter(format!(
                "{} base seeds but {} choice bits",
                keys.len(),
                base_choices.bit_len()
            )));
        }
        if num_checks == 0 {
            return Err(OtError::InvalidParameter(
                "need at least one consistency check".into(),
            ));
        }
        Ok(Self {
            base_choices,
            keys,
            num_checks,
            check_seed,
            ctr: 0,
            call_idx: 0,
        })
    }

    /// Runs one transfer call over `channels`, one worker per channel.
    pub fn send<C: AbstractChannel>(
        &mut self,
        channels: &mut [C],
        input: SenderInput<'_>,
        num_ots: usize,
        bit_length: usize,
        masking: &dyn MaskingFunction,
    ) -> OtResult<SenderOutput> {
        let lbytes = validate_call(channels.len(), num_ots, bit_length)?;
        match &input {
            SenderInput::General { x0, x1 } => {
                if x0.len() != num_ots * lbytes || x1.len() != num_ots * lbytes {
                    return Err(OtError::InvalidParameter(format!(
                        "message vectors must hold {} bytes, got {} and {}",
                        num_ots * lbytes,
                        x0.len(),
                        x1.len()
                    )));
                }
            }
            SenderInput::Correlated { delta } => {
                if delta.len() != lbytes && delta.len() != num_ots * lbytes {
                    return Err(OtError::InvalidParameter(format!(
                        "delta must hold {} or {} bytes, got {}",
                        lbytes,
                        num_ots * lbytes,
                        delta.len()
                    )));
                }
            }
            SenderInput::Random => {}
        }

        let bounds = slice_bounds(num_ots, channels.len());
        debug!(
            num_ots,
            bit_length,
            workers = bounds.len(),
            variant = ?input.variant(),
            "sender transfer call"
        );
        let results = {
            let this = &*self;
            let input = &input;
            thread::scope(|s| {
                let mut handles = Vec::with_capacity(bounds.len());
                for ((worker_idx, &(start, end)), channel) in
                    bounds.iter().enumerate().zip(channels.iter_mut())
                {
                    handles.push(s.spawn(move || {
                        this.send_slice(channel, worker_idx, start, end, lbytes, input, masking)
                    }));
                }
                handles
                    .into_iter()
                    .map(|h| h.join().map_err(|_| OtError::WorkerPanic))
                    .collect::<Vec<_>>()
            })
        };

        let mut x0 = Vec::with_capacity(num_ots * lbytes);
        let mut x1 = Vec::with_capacity(num_ots * lbytes);
        for result in results {
            let (part0, part1) = result??;
            x0.extend_from_slice(&part0);
            x1.extend_from_slice(&part1);
        }
        self.ctr += block_count(num_ots);
        self.call_idx += 1;
        Ok(SenderOutput { x0, x1 })
    }

    fn send_slice<C: AbstractChannel>(
        &self,
        channel: &mut C,
        worker_idx: usize,
        start: usize,
        end: usize,
        lbytes: usize,
        input: &SenderInput<'_>,
        masking: &dyn MaskingFunction,
    ) -> OtResult<(Vec<u8>, Vec<u8>)> {
        let slice_len = end - start;
        let mbytes = (slice_len + 7) / 8;
        let nbase = self.keys.len();
        let row_off = self.ctr + (start / 128) as u64;

        let mut u = vec![0u8; nbase * mbytes];
        channel.read_bytes(&mut u)?;

        let mut t = vec![0u8; nbase * mbytes];
        for (i, key) in self.keys.iter().enumerate() {
            prg::expand(key, row_off, &mut t[i * mbytes..][..mbytes]);
        }

        let pairs = self.sample_check_pairs(channel, worker_idx, nbase)?;
        self.verify_check_digests(channel, &pairs, &t, &u, mbytes)?;

        // q_i = t_i for s_i = 0, t_i ^ u_i for s_i = 1.
        for i in 0..nbase {
            if self.base_choices.get_bit(i) {
                let (t_row, u_row) = (&mut t[i * mbytes..][..mbytes], &u[i * mbytes..][..mbytes]);
                xor_in_place(t_row, u_row);
            }
        }

        let s_bytes = self.base_choices.as_bytes();
        let mut col = vec![0u8; (nbase + 7) / 8];
        let mut pad0 = vec![0u8; lbytes];
        let mut pad1 = vec![0u8; lbytes];
        let mut cipher = vec![0u8; lbytes];
        let mut wire = Vec::new();
        let mut out0 = Vec::with_capacity(slice_len * lbytes);
        let mut out1 = Vec::with_capacity(slice_len * lbytes);
        for j in 0..slice_len {
            let global = start + j;
            extract_column(&t, mbytes, nbase, j, &mut col);
            xof_pad(global, &col, &mut pad0);
            xor_in_place(&mut col, s_bytes);
            xof_pad(global, &col, &mut pad1);
            match input {
                SenderInput::General { x0, x1 } => {
                    let m0 = &x0[global * lbytes..][..lbytes];
                    let m1 = &x1[global * lbytes..][..lbytes];
                    masking.mask(global, &pad0, m0, &mut cipher);
                    wire.extend_from_slice(&cipher);
                    masking.mask(global, &pad1, m1, &mut cipher);
                    wire.extend_from_slice(&cipher);
                    out0.extend_from_slice(m0);
                    out1.extend_from_slice(m1);
                }
                SenderInput::Correlated { delta } => {
                    let d = if delta.len() == lbytes {
                        *delta
                    } else {
                        &delta[global * lbytes..][..lbytes]
                    };
                    // x0 = y0, x1 = y0 ^ delta, only the masked x1 travels.
                    let x1j: Vec<u8> = pad0.iter().zip(d).map(|(p, d)| p ^ d).collect();
                    masking.mask(global, &pad1, &x1j, &mut cipher);
                    wire.extend_from_slice(&cipher);
                    out0.extend_from_slice(&pad0);
                    out1.extend_from_slice(&x1j);
                }
                SenderInput::Random => {
                    out0.extend_from_slice(&pad0);
                    out1.extend_from_slice(&pad1);
                }
            }
        }
        if !wire.is_empty() {
            channel.write_bytes(&wire)?;
            channel.flush()?;
        }
        Ok((out0, out1))
    }

    fn sample_check_pairs<C: AbstractChannel>(
        &self,
        channel: &mut C,
        worker_idx: usize,
        nbase: usize,
    ) -> OtResult<Vec<(usize, usize)>> {
        let mut hasher = Keccak256::default();
        Digest::update(&mut hasher, self.check_seed);
        Digest::update(&mut hasher, self.call_idx.to_le_bytes());
        Digest::update(&mut hasher, (worker_idx as u64).to_le_bytes());
        let mut rng = StdRng::from_seed(hasher.finalize().into());

        let mut pairs = Vec::with_capacity(self.num_checks);
        let mut wire = Vec::with_capacity(self.num_checks * 8);
        for _ in 0..self.num_checks {
            let a = rng.gen_range(0..nbase);
            let mut b = rng.gen_range(0..nbase - 1);
            if b >= a {
                b += 1;
            }
            pairs.push((a, b));
            wire.extend_from_slice(&(a as u32).to_le_bytes());
            wire.extend_from_slice(&(b as u32).to_le_bytes());
        }
        channel.write_bytes(&wire)?;
        channel.flush()?;
        Ok(pairs)
    }

    fn verify_check_digests<C: AbstractChannel>(
        &self,
        channel: &mut C,
        pairs: &[(usize, usize)],
        t: &[u8],
        u: &[u8],
        mbytes: usize,
    ) -> OtResult<()> {
        let mut wire = vec![0u8; pairs.len() * 4 * CHECK_DIGEST_BYTES];
        channel.read_bytes(&mut wire)?;

        let mut scratch = vec![0u8; mbytes];
        for (k, &(a, b)) in pairs.iter().enumerate() {
            let digests = &wire[k * 4 * CHECK_DIGEST_BYTES..][..4 * CHECK_DIGEST_BYTES];
            let s_a = self.base_choices.get_bit(a) as usize;
            let s_b = self.base_choices.get_bit(b) as usize;

            // H(t_a ^ t_b) must sit at the index named by the choice bits,
            // H(t_a ^ t_b ^ u_a ^ u_b) at the complementary one.
            scratch.copy_from_slice(&t[a * mbytes..][..mbytes]);
            xor_in_place(&mut scratch, &t[b * mbytes..][..mbytes]);
            let same = check_digest(&scratch);
            xor_in_place(&mut scratch, &u[a * mbytes..][..mbytes]);
            xor_in_place(&mut scratch, &u[b * mbytes..][..mbytes]);
            let cross = check_digest(&scratch);

            let same_idx = (s_a << 1) | s_b;
            let cross_idx = ((1 - s_a) << 1) | (1 - s_b);
            if digests[same_idx * CHECK_DIGEST_BYTES..][..CHECK_DIGEST_BYTES] != same
                || digests[cross_idx * CHECK_DIGEST_BYTES..][..CHECK_DIGEST_BYTES] != cross
            {
                return Err(OtError::Consistency { row_a: a, row_b: b });
            }
        }
        Ok(())
    }
}

impl ExtensionReceiver {
    pub fn new(
        pairs: Vec<([u8; AES_KEY_BYTES], [u8; AES_KEY_BYTES])>,
        num_checks: usize,
    ) -> OtResult<Self> {
        if pairs.len() < 2 {
            return Err(OtError::InvalidParameter(format!(
                "need at least 2 base OTs, got {}",
                pairs.len()
            )));
        }
        if num_checks == 0 {
            return Err(OtError::InvalidParameter(
                "need at least one consistency check".into(),
            ));
        }
        Ok(Self {
            pairs,
            num_checks,
            ctr: 0,
        })
    }

    /// Runs one transfer call over `channels` and returns the `num_ots`
    /// chosen messages, concatenated.
    pub fn receive<C: AbstractChannel>(
        &mut self,
        channels: &mut [C],
        choices: &BitVector,
        num_ots: usize,
        bit_length: usize,
        variant: OtVariant,
        masking: &dyn MaskingFunction,
    ) -> OtResult<Vec<u8>> {
        let lbytes = validate_call(channels.len(), num_ots, bit_length)?;
        if choices.bit_len() < num_ots {
            return Err(OtError::InvalidParameter(format!(
                "need {num_ots} choice bits, got {}",
                choices.bit_len()
            )));
        }

        let bounds = slice_bounds(num_ots, channels.len());
        debug!(
            num_ots,
            bit_length,
            workers = bounds.len(),
            ?variant,
            "receiver transfer call"
        );
        let results = {
            let this = &*self;
            thread::scope(|s| {
                let mut handles = Vec::with_capacity(bounds.len());
                for (&(start, end), channel) in bounds.iter().zip(channels.iter_mut()) {
                    handles.push(s.spawn(move || {
                        this.receive_slice(channel, start, end, lbytes, choices, variant, masking)
                    }));
                }
                handles
                    .into_iter()
                    .map(|h| h.join().map_err(|_| OtError::WorkerPanic))
                    .collect::<Vec<_>>()
            })
        };

        let mut out = Vec::with_capacity(num_ots * lbytes);
        for result in results {
            out.extend_from_slice(&result??);
        }
        self.ctr += block_count(num_ots);
        Ok(out)
    }

    fn receive_slice<C: AbstractChannel>(
        &self,
        channel: &mut C,
        start: usize,
        end: usize,
        lbytes: usize,
        choices: &BitVector,
        variant: OtVariant,
        masking: &dyn MaskingFunction,
    ) -> OtResult<Vec<u8>> {
        let slice_len = end - start;
        let mbytes = (slice_len + 7) / 8;
        let nbase = self.pairs.len();
        let row_off = self.ctr + (start / 128) as u64;

        let mut t0 = vec![0u8; nbase * mbytes];
        let mut t1 = vec![0u8; nbase * mbytes];
        for (i, (k0, k1)) in self.pairs.iter().enumerate() {
            prg::expand(k0, row_off, &mut t0[i * mbytes..][..mbytes]);
            prg::expand(k1, row_off, &mut t1[i * mbytes..][..mbytes]);
        }

        // start is 128-aligned, so the choice slice is byte-aligned.
        let r_slice = &choices.as_bytes()[start / 8..][..mbytes];
        let mut u = vec![0u8; nbase * mbytes];
        for i in 0..nbase {
            let row = &mut u[i * mbytes..][..mbytes];
            row.copy_from_slice(&t0[i * mbytes..][..mbytes]);
            xor_in_place(row, &t1[i * mbytes..][..mbytes]);
            xor_in_place(row, r_slice);
        }
        channel.write_bytes(&u)?;
        channel.flush()?;

        self.answer_check_pairs(channel, &t0, &t1, mbytes, nbase)?;

        let payload_len = match variant {
            OtVariant::General => slice_len * 2 * lbytes,
            OtVariant::Correlated => slice_len * lbytes,
            OtVariant::Random => 0,
        };
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            channel.read_bytes(&mut payload)?;
        }

        let mut col = vec![0u8; (nbase + 7) / 8];
        let mut pad = vec![0u8; lbytes];
        let mut out = Vec::with_capacity(slice_len * lbytes);
        for j in 0..slice_len {
            let global = start + j;
            let choice = choices.get_bit(global);
            extract_column(&t0, mbytes, nbase, j, &mut col);
            xof_pad(global, &col, &mut pad);
            match variant {
                OtVariant::General => {
                    let side = if choice { 1 } else { 0 };
                    let cipher = &payload[(2 * j + side) * lbytes..][..lbytes];
                    let base = out.len();
                    out.resize(base + lbytes, 0);
                    masking.unmask(global, &pad, cipher, &mut out[base..]);
                }
                OtVariant::Correlated => {
                    if choice {
                        let cipher = &payload[j * lbytes..][..lbytes];
                        let base = out.len();
                        out.resize(base + lbytes, 0);
                        masking.unmask(global, &pad, cipher, &mut out[base..]);
                    } else {
                        out.extend_from_slice(&pad);
                    }
                }
                OtVariant::Random => out.extend_from_slice(&pad),
            }
        }
        Ok(out)
    }

    fn answer_check_pairs<C: AbstractChannel>(
        &self,
        channel: &mut C,
        t0: &[u8],
        t1: &[u8],
        mbytes: usize,
        nbase: usize,
    ) -> OtResult<()> {
        let mut pair_wire = vec![0u8; self.num_checks * 8];
        channel.read_bytes(&mut pair_wire)?;

        let mut wire = Vec::with_capacity(self.num_checks * 4 * CHECK_DIGEST_BYTES);
        let mut scratch = vec![0u8; mbytes];
        for chunk in pair_wire.chunks_exact(8) {
            let a = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
            let b = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as usize;
            if a >= nbase || b >= nbase || a == b {
                return Err(OtError::InvalidParameter(format!(
                    "peer requested invalid check pair ({a}, {b})"
                )));
            }
            for row_a in [&t0[a * mbytes..][..mbytes], &t1[a * mbytes..][..mbytes]] {
                for row_b in [&t0[b * mbytes..][..mbytes], &t1[b * mbytes..][..mbytes]] {
                    scratch.copy_from_slice(row_a);
                    xor_in_place(&mut scratch, row_b);
                    wire.extend_from_slice(&check_digest(&scratch));
                }
            }
        }
        channel.write_bytes(&wire)?;
        channel.flush()?;
        Ok(())
    }
}

fn validate_call(workers: usize, num_ots: usize, bit_length: usize) -> OtResult<usize> {
    if workers == 0 {
        return Err(OtError::InvalidParameter(
            "transfer needs at least one channel".into(),
        ));
    }
    if num_ots == 0 {
        return Err(OtError::InvalidParameter("no OTs requested".into()));
    }
    if bit_length == 0 || bit_length % 8 != 0 {
        return Err(OtError::InvalidParameter(format!(
            "bit length must be a positive multiple of 8, got {bit_length}"
        )));
    }
    Ok(bit_length / 8)
}

/// 128-bit blocks consumed by one call of `num_ots` OTs.
fn block_count(num_ots: usize) -> u64 {
    ((num_ots + 127) / 128) as u64
}

/// Partitions `0..num_ots` into at most `workers` contiguous slices whose
/// start indices are multiples of 128.
fn slice_bounds(num_ots: usize, workers: usize) -> Vec<(usize, usize)> {
    let per = (num_ots + workers - 1) / workers;
    let chunk = ((per + 127) / 128) * 128;
    let mut bounds = Vec::with_capacity(workers);
    let mut start = 0;
    while start < num_ots {
        let end = (start + chunk).min(num_ots);
        bounds.push((start, end));
        start = end;
    }
    bounds
}

fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Packs bit `j` of each of the `nbase` rows into `out`, highest bit first.
fn extract_column(rows: &[u8], mbytes: usize, nbase: usize, j: usize, out: &mut [u8]) {
    out.fill(0);
    for i in 0..nbase {
        let bit = (rows[i * mbytes + j / 8] >> (7 - j % 8)) & 1;
        out[i / 8] |= bit << (7 - i % 8);
    }
}

fn xof_pad(global_idx: usize, col: &[u8], out: &mut [u8]) {
    let mut xof = Shake256::default();
    xof.update(&(global_idx as u64).to_le_bytes());
    xof.update(col);
    xof.finalize_xof().read(out);
}

fn check_digest(buf: &[u8]) -> [u8; CHECK_DIGEST_BYTES] {
    let mut hasher = Keccak256::default();
    Digest::update(&mut hasher, buf);
    hasher.finalize().into()
}

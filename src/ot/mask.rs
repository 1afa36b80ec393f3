//! Output-masking strategy applied to the final transfer message.

/// Combines a derived pad with a message on the way out and inverts the
/// combination on the way in. Implementations must be position-independent
/// in state (they may be called concurrently from worker threads).
pub trait MaskingFunction: Sync {
    fn mask(&self, ot_index: usize, pad: &[u8], msg: &[u8], out: &mut [u8]);

    fn unmask(&self, ot_index: usize, pad: &[u8], masked: &[u8], out: &mut [u8]);
}

/// Default bitwise-xor masking.
pub struct XorMasking;

impl MaskingFunction for XorMasking {
    fn mask(&self, _ot_index: usize, pad: &[u8], msg: &[u8], out: &mut [u8]) {
        for ((o, p), m) in out.iter_mut().zip(pad).zip(msg) {
            *o = p ^ m;
        }
    }

    fn unmask(&self, _ot_index: usize, pad: &[u8], masked: &[u8], out: &mut [u8]) {
        for ((o, p), m) in out.iter_mut().zip(pad).zip(masked) {
            *o = p ^ m;
        }
    }
}

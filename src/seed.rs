//! Deterministic two-level seed derivation.
//!
//! The initial seed is a protocol-level public constant, not a secret: it
//! keys each party's local pseudorandom tape so that protocol transcripts
//! are reproducible, it provides no security on its own.

use sha3::{Digest, Keccak256};

use crate::config::Role;
use crate::prg::AES_KEY_BYTES;

/// Public protocol constant used when no session-specific seed is supplied.
pub const INITIAL_SEED: &[u8] = b"437398417012387813714564100";

/// Width of the first-level (receiver) seed.
pub const RECEIVER_SEED_BYTES: usize = 32;

/// Session seed material, derived once and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSeeds {
    /// `H(role || initial_seed)`; drives choice-bit sampling.
    pub receiver_seed: [u8; RECEIVER_SEED_BYTES],
    /// First 16 bytes of `H(role || receiver_seed)`; drives check-pair
    /// sampling on the sending side.
    pub sender_seed: [u8; AES_KEY_BYTES],
}

impl SessionSeeds {
    /// Pure function of `(role, initial_seed)`; idempotent, no side effects.
    pub fn derive(role: Role, initial_seed: &[u8]) -> Self {
        let mut hasher = Keccak256::default();
        hasher.update([role.as_byte()]);
        hasher.update(initial_seed);
        let receiver_seed: [u8; RECEIVER_SEED_BYTES] = hasher.finalize().into();

        let mut hasher = Keccak256::default();
        hasher.update([role.as_byte()]);
        hasher.update(receiver_seed);
        let full: [u8; 32] = hasher.finalize().into();
        let mut sender_seed = [0u8; AES_KEY_BYTES];
        sender_seed.copy_from_slice(&full[..AES_KEY_BYTES]);

        Self {
            receiver_seed,
            sender_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        for role in [Role::Sender, Role::Receiver] {
            let a = SessionSeeds::derive(role, INITIAL_SEED);
            let b = SessionSeeds::derive(role, INITIAL_SEED);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn roles_and_seeds_separate_tapes() {
        let s = SessionSeeds::derive(Role::Sender, INITIAL_SEED);
        let r = SessionSeeds::derive(Role::Receiver, INITIAL_SEED);
        assert_ne!(s.receiver_seed, r.receiver_seed);

        let other = SessionSeeds::derive(Role::Sender, b"another seed");
        assert_ne!(s.receiver_seed, other.receiver_seed);
    }

    #[test]
    fn sender_seed_is_truncated_second_level_hash() {
        let s = SessionSeeds::derive(Role::Receiver, INITIAL_SEED);
        let mut hasher = Keccak256::default();
        hasher.update([Role::Receiver.as_byte()]);
        hasher.update(s.receiver_seed);
        let full: [u8; 32] = hasher.finalize().into();
        assert_eq!(s.sender_seed, full[..AES_KEY_BYTES]);
    }
}

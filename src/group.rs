//! Collaborator seams toward the elliptic-curve / big-integer backend.
//!
//! The protocol core only touches curve arithmetic through these two
//! traits; the byte-level bridging into a concrete library stays behind
//! them. The crate ships one backend, the ed25519 group from `ark-ed25519`.

use ark_ec::{CurveConfig, Group};
use ark_ed25519::{EdwardsConfig, EdwardsProjective};
use ark_ff::{BigInteger, Field, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, SerializationError};
use ark_std::{UniformRand, Zero};
use rand::Rng;

#[derive(thiserror::Error, Debug)]
pub enum GroupError {
    #[error("point is not a valid group member")]
    InvalidPoint,
    #[error(transparent)]
    Serialize {
        #[from]
        source: SerializationError,
    },
}

/// Big-integer / field-element service: parse and serialize byte encodings
/// plus the modular arithmetic the protocol needs.
pub trait FieldElement: Clone + PartialEq + Sized + Send + Sync {
    fn parse(bytes: &[u8]) -> Result<Self, GroupError>;

    fn serialize(&self) -> Result<Vec<u8>, GroupError>;

    fn mod_mul(&self, other: &Self) -> Self;

    fn mod_exp(&self, exp: u64) -> Self;

    /// `None` for non-invertible elements (zero).
    fn mod_inverse(&self) -> Option<Self>;

    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self;

    /// Big-endian bit decomposition, fixed width (leading zeros included).
    fn to_bits_be(&self) -> Vec<bool>;
}

/// Elliptic-curve point service in additive notation. Parsing performs the
/// group-membership check; parsed points are always valid.
pub trait CurvePoint: Clone + PartialEq + Sized + Send + Sync {
    type Scalar: FieldElement;

    fn identity() -> Self;

    fn generator() -> Self;

    fn is_identity(&self) -> bool;

    fn add(&self, other: &Self) -> Self;

    fn double(&self) -> Self;

    fn negate(&self) -> Self;

    fn scalar_mul(&self, k: &Self::Scalar) -> Self;

    fn parse(bytes: &[u8]) -> Result<Self, GroupError>;

    fn serialize(&self) -> Result<Vec<u8>, GroupError>;

    /// Length of the fixed-width point encoding.
    fn encoded_len() -> Result<usize, GroupError> {
        Ok(Self::generator().serialize()?.len())
    }
}

/// Scalar field of the ed25519 backend.
pub type Ed25519Scalar = <EdwardsConfig as CurveConfig>::ScalarField;

impl FieldElement for Ed25519Scalar {
    fn parse(bytes: &[u8]) -> Result<Self, GroupError> {
        Ok(Self::deserialize_compressed(bytes)?)
    }

    fn serialize(&self) -> Result<Vec<u8>, GroupError> {
        let mut out = Vec::new();
        self.serialize_compressed(&mut out)?;
        Ok(out)
    }

    fn mod_mul(&self, other: &Self) -> Self {
        *self * other
    }

    fn mod_exp(&self, exp: u64) -> Self {
        self.pow([exp])
    }

    fn mod_inverse(&self) -> Option<Self> {
        self.inverse()
    }

    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::rand(rng)
    }

    fn to_bits_be(&self) -> Vec<bool> {
        self.into_bigint().to_bits_be()
    }
}

impl CurvePoint for EdwardsProjective {
    type Scalar = Ed25519Scalar;

    fn identity() -> Self {
        Self::zero()
    }

    fn generator() -> Self {
        <Self as Group>::generator()
    }

    fn is_identity(&self) -> bool {
        self.is_zero()
    }

    fn add(&self, other: &Self) -> Self {
        *self + other
    }

    fn double(&self) -> Self {
        Group::double(self)
    }

    fn negate(&self) -> Self {
        -*self
    }

    fn scalar_mul(&self, k: &Self::Scalar) -> Self {
        *self * k
    }

    fn parse(bytes: &[u8]) -> Result<Self, GroupError> {
        // Compressed decoding validates curve and subgroup membership.
        Self::deserialize_compressed(bytes).map_err(|_| GroupError::InvalidPoint)
    }

    fn serialize(&self) -> Result<Vec<u8>, GroupError> {
        let mut out = Vec::new();
        self.serialize_compressed(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn point_serialization_roundtrip() {
        let mut rng = StdRng::seed_from_u64(11);
        let k = Ed25519Scalar::sample(&mut rng);
        let p = <EdwardsProjective as CurvePoint>::generator().scalar_mul(&k);
        let bytes = p.serialize().unwrap();
        assert_eq!(bytes.len(), EdwardsProjective::encoded_len().unwrap());
        assert_eq!(EdwardsProjective::parse(&bytes).unwrap(), p);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let len = EdwardsProjective::encoded_len().unwrap();
        // All-0xff is not a valid compressed encoding for this curve.
        assert!(EdwardsProjective::parse(&vec![0xff; len]).is_err());
    }

    #[test]
    fn scalar_arithmetic_agrees_with_group_action() {
        let mut rng = StdRng::seed_from_u64(12);
        let a = Ed25519Scalar::sample(&mut rng);
        let b = Ed25519Scalar::sample(&mut rng);
        let g = <EdwardsProjective as CurvePoint>::generator();
        assert_eq!(
            g.scalar_mul(&a).scalar_mul(&b),
            g.scalar_mul(&a.mod_mul(&b))
        );

        let inv = a.mod_inverse().unwrap();
        assert_eq!(g.scalar_mul(&a).scalar_mul(&inv), g);
    }

    #[test]
    fn identity_and_negation() {
        let g = <EdwardsProjective as CurvePoint>::generator();
        assert!(EdwardsProjective::identity().is_identity());
        assert!(g.add(&g.negate()).is_identity());
        assert_eq!(CurvePoint::double(&g), g.add(&g));
    }
}

// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use ark_bls12_381::{Bls12_381, Fq, Fq12, Fq2, Fq6, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::pairing::{Pairing, PairingOutput};
use ark_ec::{AffineRepr, CurveGroup, Group as _};
use ark_ff::{BigInteger, PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, Compress, Validate};

use crate::helpers::{pad_message, u2048_from_be_hex, unpad_message};
use crate::{Error, Result, Scalar, U2048};

/// The BLS12-381 target group.
pub type Gt = PairingOutput<Bls12_381>;

/// Order of all three BLS12-381 groups.
const ORDER: &str = "73EDA753299D7D483339D80809A1D80553BDA402FFFE5BFEFFFFFFFF00000001";

pub(crate) fn order() -> U2048 {
    u2048_from_be_hex(ORDER)
}

pub(crate) fn to_fr(e: &Scalar) -> Fr {
    Fr::from_be_bytes_mod_order(&e.to_be_bytes(256))
}

/// BLS12-381 G₁: the server-side key group of the pairing flavor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct G1Group;

impl G1Group {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn identity(&self) -> G1Projective {
        G1Projective::zero()
    }

    pub(crate) fn generator(&self) -> G1Projective {
        G1Projective::generator()
    }

    pub(crate) fn element_to_bytes(&self, a: &G1Projective) -> Vec<u8> {
        let mut out = Vec::new();
        a.into_affine()
            .serialize_compressed(&mut out)
            .expect("compressed affine serialization to a vector cannot fail");

        out
    }

    pub(crate) fn element_from_bytes(&self, bytes: &[u8]) -> Result<G1Projective> {
        G1Affine::deserialize_compressed(bytes)
            .map(G1Projective::from)
            .map_err(|_| Error::InvalidElement)
    }
}

/// BLS12-381 G₂: the client-side key group of the pairing flavor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct G2Group;

impl G2Group {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn identity(&self) -> G2Projective {
        G2Projective::zero()
    }

    pub(crate) fn generator(&self) -> G2Projective {
        G2Projective::generator()
    }

    pub(crate) fn element_to_bytes(&self, a: &G2Projective) -> Vec<u8> {
        let mut out = Vec::new();
        a.into_affine()
            .serialize_compressed(&mut out)
            .expect("compressed affine serialization to a vector cannot fail");

        out
    }

    pub(crate) fn element_from_bytes(&self, bytes: &[u8]) -> Result<G2Projective> {
        G2Affine::deserialize_compressed(bytes)
            .map(G2Projective::from)
            .map_err(|_| Error::InvalidElement)
    }
}

/// BLS12-381 Gₜ: the message group of the pairing flavor.
///
/// Encoded plaintexts are arbitrary Fq12 values, not members of the order-r
/// subgroup, so deserialization deliberately skips the subgroup check and
/// the ciphertext fold works in the full field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GtGroup;

impl GtGroup {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn identity(&self) -> Gt {
        Gt::zero()
    }

    pub(crate) fn generator(&self) -> Gt {
        Bls12_381::pairing(G1Affine::generator(), G2Affine::generator())
    }

    pub(crate) fn apply_pairing(&self, a: &G1Projective, b: &G2Projective) -> Gt {
        Bls12_381::pairing(a.into_affine(), b.into_affine())
    }

    pub(crate) fn encode_bytes(&self, data: &[u8]) -> Result<Gt> {
        let capacity = self.bytes_per_element();
        if data.len() > capacity {
            return Err(Error::MessageTooLong {
                got: data.len(),
                capacity,
            });
        }

        // The padded payload is shorter than the base-field modulus, so the
        // embedding into the first Fq coefficient is injective.
        let coefficient = Fq::from_be_bytes_mod_order(&pad_message(data));
        let c0 = Fq6::new(
            Fq2::new(coefficient, Fq::zero()),
            Fq2::zero(),
            Fq2::zero(),
        );

        Ok(PairingOutput(Fq12::new(c0, Fq6::zero())))
    }

    pub(crate) fn decode_bytes(&self, a: &Gt) -> Result<Vec<u8>> {
        let bytes = a.0.c0.c0.c0.into_bigint().to_bytes_be();
        let first_non_zero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());

        unpad_message(&bytes[first_non_zero..]).ok_or(Error::BadPadding)
    }

    pub(crate) fn element_to_bytes(&self, a: &Gt) -> Vec<u8> {
        let mut out = Vec::new();
        a.0.serialize_uncompressed(&mut out)
            .expect("field serialization to a vector cannot fail");

        out
    }

    pub(crate) fn element_from_bytes(&self, bytes: &[u8]) -> Result<Gt> {
        Fq12::deserialize_with_mode(bytes, Compress::No, Validate::No)
            .map(PairingOutput)
            .map_err(|_| Error::InvalidElement)
    }

    pub(crate) fn bytes_per_element(&self) -> usize {
        48 - 3
    }
}

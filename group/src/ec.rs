// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use crypto_bigint::{Encoding, NonZero, U256};
use p256::elliptic_curve::ff::PrimeField;
use p256::elliptic_curve::point::DecompressPoint;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint};
use sha2::{Digest, Sha256};
use subtle::Choice;

use crate::helpers::{pad_message, unpad_message};
use crate::{Error, Result, Scalar, U2048};

/// Order of the P-256 group (RFC 5903).
const ORDER: &str = "FFFFFFFF00000000FFFFFFFFFFFFFFFFBCE6FAADA7179E84F3B9CAC2FC632551";

/// NIST P-256 with the Koblitz byte embedding.
///
/// The embedding tries candidates `x = r·k + i` for `i ∈ [0, k)`; with the
/// default `k = 256` the failure probability per message is at most 2⁻²⁵⁶.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EcGroup {
    k: u32,
}

impl Default for EcGroup {
    fn default() -> Self {
        Self { k: 256 }
    }
}

impl EcGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the embedding retry parameter.
    pub fn with_retry_parameter(k: u32) -> Self {
        assert!(k.is_power_of_two() && k >= 2, "k must be a power of two");

        Self { k }
    }

    pub fn retry_parameter(&self) -> u32 {
        self.k
    }

    pub(crate) fn identity(&self) -> ProjectivePoint {
        ProjectivePoint::IDENTITY
    }

    pub(crate) fn generator(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR
    }

    pub(crate) fn order(&self) -> U2048 {
        crate::helpers::u2048_from_be_hex(ORDER)
    }

    pub(crate) fn exp(&self, a: &ProjectivePoint, e: &Scalar) -> ProjectivePoint {
        *a * self.to_curve_scalar(e)
    }

    pub(crate) fn encode_bytes(&self, data: &[u8]) -> Result<ProjectivePoint> {
        let capacity = self.bytes_per_element();
        if data.len() > capacity {
            return Err(Error::MessageTooLong {
                got: data.len(),
                capacity,
            });
        }

        let padded = pad_message(data);
        let mut buf = [0u8; 32];
        buf[32 - padded.len()..].copy_from_slice(&padded);
        let r = U256::from_be_slice(&buf);
        let k = U256::from(self.k as u64);

        for i in 0..self.k {
            let x = r
                .wrapping_mul(&k)
                .wrapping_add(&U256::from(i as u64));
            let x_bytes: [u8; 32] = x.to_be_bytes();

            let candidate =
                AffinePoint::decompress(FieldBytes::from_slice(&x_bytes), Choice::from(0));
            if let Some(point) = Option::<AffinePoint>::from(candidate) {
                return Ok(ProjectivePoint::from(point));
            }
        }

        Err(Error::PointEmbedding(self.k))
    }

    pub(crate) fn decode_bytes(&self, a: &ProjectivePoint) -> Result<Vec<u8>> {
        let encoded = a.to_affine().to_encoded_point(false);
        let x_bytes = encoded.x().ok_or(Error::BadPadding)?;

        let x = U256::from_be_slice(x_bytes);
        let k = NonZero::new(U256::from(self.k as u64)).expect("k is at least two");
        let (quotient, _) = x.div_rem(&k);

        let bytes = quotient.to_be_bytes();
        let first_non_zero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());

        unpad_message(&bytes[first_non_zero..]).ok_or(Error::BadPadding)
    }

    /// Try-and-increment onto the curve. P-256 has cofactor one, so any
    /// curve point is already in the prime-order group.
    pub(crate) fn hash_into_element(&self, tag: &[u8]) -> Result<ProjectivePoint> {
        for counter in 0..self.k {
            let mut hasher = Sha256::new();
            hasher.update(b"p256 group element");
            hasher.update(tag);
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();

            let candidate =
                AffinePoint::decompress(FieldBytes::from_slice(&digest), Choice::from(0));
            if let Some(point) = Option::<AffinePoint>::from(candidate) {
                return Ok(ProjectivePoint::from(point));
            }
        }

        Err(Error::PointEmbedding(self.k))
    }

    pub(crate) fn element_to_bytes(&self, a: &ProjectivePoint) -> Vec<u8> {
        a.to_affine().to_encoded_point(false).as_bytes().to_vec()
    }

    pub(crate) fn element_from_bytes(&self, bytes: &[u8]) -> Result<ProjectivePoint> {
        let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidElement)?;

        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .map(ProjectivePoint::from)
            .ok_or(Error::InvalidElement)
    }

    /// Conservative capacity: the padded payload stays below 2²²⁴, keeping
    /// every candidate `x = r·k + i` inside the base field.
    pub(crate) fn bytes_per_element(&self) -> usize {
        32 - 6
    }

    fn to_curve_scalar(&self, e: &Scalar) -> p256::Scalar {
        let reduced = e.reduce(&self.order());
        let bytes: [u8; 32] = reduced.to_be_bytes(32).try_into().expect("fixed width");

        // Reduced modulo the curve order above, so the representation is
        // always canonical.
        Option::<p256::Scalar>::from(p256::Scalar::from_repr(bytes.into())).unwrap()
    }
}

// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use crypto_bigint::{Encoding, NonZero, RandomMod, U2048, U4096};
use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};

use crate::helpers::u2048_from_be;
use crate::{CsRng, Error, Result};

/// An exponent for one of the supported groups.
///
/// One working width (2048 bits) covers every supported order; values are
/// reduced modulo the owning group's order before they are exposed or used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scalar(pub(crate) U2048);

impl Scalar {
    pub const ZERO: Self = Self(U2048::ZERO);
    pub const ONE: Self = Self(U2048::ONE);

    pub fn from_u64(value: u64) -> Self {
        Self(U2048::from_u64(value))
    }

    pub fn from_uint(value: U2048) -> Self {
        Self(value)
    }

    /// Sample a uniform exponent in `[1, order)`.
    pub fn random_mod_order(rng: &mut impl CsRng, order: &U2048) -> Self {
        // Sampling in [0, order - 1) and shifting by one excludes zero
        // without bias.
        let bound = NonZero::new(order.wrapping_sub(&U2048::ONE))
            .expect("group orders are strictly greater than one");

        Self(U2048::random_mod(rng, &bound).wrapping_add(&U2048::ONE))
    }

    /// Reduce modulo `order`.
    pub fn reduce(&self, order: &U2048) -> Self {
        let order = NonZero::new(*order).expect("group orders are non-zero");

        Self(self.0.rem(&order))
    }

    pub fn add_mod(&self, rhs: &Self, order: &U2048) -> Self {
        Self(self.reduce(order).0.add_mod(&rhs.reduce(order).0, order))
    }

    pub fn sub_mod(&self, rhs: &Self, order: &U2048) -> Self {
        Self(self.reduce(order).0.sub_mod(&rhs.reduce(order).0, order))
    }

    /// `self · rhs mod order`, reduced through the double-width product.
    pub fn mul_mod(&self, rhs: &Self, order: &U2048) -> Self {
        let (lo, hi) = self.0.mul_wide(&rhs.0);
        let product = hi.concat(&lo);

        Self(reduce_wide(&product, order))
    }

    /// Whether the low bit is set. Used by the XOR flavor, whose exponents
    /// only matter modulo two.
    pub fn is_odd(&self) -> bool {
        self.0.to_be_bytes()[255] & 1 == 1
    }

    /// Fixed-width big-endian serialization, `width` bytes.
    pub fn to_be_bytes(&self, width: usize) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();

        bytes[256 - width..].to_vec()
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > 256 {
            return Err(Error::InvalidExponent);
        }

        Ok(Self(u2048_from_be(bytes)))
    }

    /// Expand a tag into a uniform exponent modulo `order` via a counter-mode
    /// SHA-256 stream twice the order width, then reduce.
    pub fn from_hash(tag: &[u8], order: &U2048) -> Self {
        let mut stream = Vec::with_capacity(512);
        let mut counter = 0u32;
        while stream.len() < 512 {
            let mut hasher = Sha256::new();
            hasher.update(tag);
            hasher.update(counter.to_le_bytes());
            stream.extend_from_slice(&hasher.finalize());
            counter += 1;
        }

        Self::from_wide_bytes(&stream[..512], order)
    }

    /// Reduce a double-width big-endian byte string modulo `order`. The
    /// double width keeps the reduction statistically uniform even for
    /// orders close to the working width.
    pub fn from_wide_bytes(bytes: &[u8], order: &U2048) -> Self {
        assert!(bytes.len() == 512, "wide reduction expects 512 bytes");

        let mut buf = [0u8; 512];
        buf.copy_from_slice(bytes);
        let wide = U4096::from_be_slice(&buf);

        Self(reduce_wide(&wide, order))
    }
}

/// Reduce a double-width value modulo a working-width order.
fn reduce_wide(value: &U4096, order: &U2048) -> U2048 {
    let wide_order = NonZero::new(U2048::ZERO.concat(order))
        .expect("group orders are non-zero");
    let reduced = value.rem(&wide_order);

    // The remainder fits the working width; drop the zero high half.
    let (_, low) = reduced.split();
    low
}

impl ConstantTimeEq for Scalar {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

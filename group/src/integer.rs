// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use crypto_bigint::modular::runtime_mod::{DynResidue, DynResidueParams};
use crypto_bigint::{NonZero, U2048};
use sha2::{Digest, Sha256};

use crate::helpers::{pad_message, trimmed_be_bytes, u2048_from_be, u2048_from_be_hex, unpad_message};
use crate::{Error, Result, Scalar};

/// RFC 3526 2048-bit MODP group. p is a safe prime with p ≡ 7 (mod 8), so 2
/// is a quadratic residue and generates the order-q subgroup.
const PRODUCTION_2048_P: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF"
);

/// Fixed 512-bit safe prime for tests; generator 4 is a square and therefore
/// lands in the order-q subgroup.
const TESTING_512_P: &str = concat!(
    "8DBD9D7303CE9DEBD1C4BB281DB208EB2A6330BABB3B93F03031D023125F2057",
    "A47E104825165E6618B8FFA14D4748A0CA264E1C4D3C1A6FE54E9BC8A5CDE1F3"
);

/// The prime-order subgroup of ℤ*_p for a safe prime p = 2q + 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegerGroup {
    p: U2048,
    q: U2048,
    g: U2048,
    element_bytes: usize,
}

impl IntegerGroup {
    /// The 2048-bit production group (RFC 3526 group 14, generator 2).
    pub fn production_2048() -> Self {
        let p = u2048_from_be_hex(PRODUCTION_2048_P);

        Self {
            p,
            q: p.shr_vartime(1),
            g: U2048::from_u64(2),
            element_bytes: 256,
        }
    }

    /// The fixed 512-bit testing group.
    pub fn testing_512() -> Self {
        let p = u2048_from_be_hex(TESTING_512_P);

        Self {
            p,
            q: p.shr_vartime(1),
            g: U2048::from_u64(4),
            element_bytes: 64,
        }
    }

    fn params(&self) -> DynResidueParams<{ U2048::LIMBS }> {
        DynResidueParams::new(&self.p)
    }

    pub(crate) fn identity(&self) -> U2048 {
        U2048::ONE
    }

    pub(crate) fn generator(&self) -> U2048 {
        self.g
    }

    pub(crate) fn order(&self) -> U2048 {
        self.q
    }

    pub(crate) fn mul(&self, a: &U2048, b: &U2048) -> U2048 {
        let params = self.params();

        (DynResidue::new(a, params) * DynResidue::new(b, params)).retrieve()
    }

    /// a⁻¹ = a^(p−2) for prime p.
    pub(crate) fn inv(&self, a: &U2048) -> U2048 {
        let exponent = self.p.wrapping_sub(&U2048::from_u64(2));

        DynResidue::new(a, self.params()).pow(&exponent).retrieve()
    }

    pub(crate) fn exp(&self, a: &U2048, e: &Scalar) -> U2048 {
        let exponent = e.reduce(&self.q).0;

        DynResidue::new(a, self.params()).pow(&exponent).retrieve()
    }

    /// Membership in the order-q subgroup: 0 < a < p and a^q ≡ 1.
    pub(crate) fn is_element(&self, a: &U2048) -> bool {
        if *a == U2048::ZERO || *a >= self.p {
            return false;
        }

        DynResidue::new(a, self.params()).pow(&self.q).retrieve() == U2048::ONE
    }

    pub(crate) fn encode_bytes(&self, data: &[u8]) -> Result<U2048> {
        let capacity = self.bytes_per_element();
        if data.len() > capacity {
            return Err(Error::MessageTooLong {
                got: data.len(),
                capacity,
            });
        }

        let embedded = u2048_from_be(&pad_message(data));

        // For p ≡ 3 (mod 4) exactly one of ±y is a quadratic residue; pick
        // the representative that lies in the subgroup so downstream
        // arithmetic stays closed.
        if self.is_element(&embedded) {
            Ok(embedded)
        } else {
            Ok(embedded.neg_mod(&self.p))
        }
    }

    pub(crate) fn decode_bytes(&self, a: &U2048) -> Result<Vec<u8>> {
        for candidate in [*a, a.neg_mod(&self.p)] {
            if let Some(data) = unpad_message(&trimmed_be_bytes(&candidate)) {
                return Ok(data);
            }
        }

        Err(Error::BadPadding)
    }

    /// Squaring the digest image lands it in the quadratic-residue subgroup.
    pub(crate) fn hash_into_element(&self, tag: &[u8]) -> U2048 {
        let mut stream = Vec::with_capacity(self.element_bytes);
        let mut counter = 0u32;
        while stream.len() < self.element_bytes {
            let mut hasher = Sha256::new();
            hasher.update(b"integer group element");
            hasher.update(tag);
            hasher.update(counter.to_le_bytes());
            stream.extend_from_slice(&hasher.finalize());
            counter += 1;
        }

        let p = NonZero::new(self.p).expect("the modulus is a fixed prime");
        let seed = u2048_from_be(&stream[..self.element_bytes]).rem(&p);
        let params = self.params();
        let squared = DynResidue::new(&seed, params) * DynResidue::new(&seed, params);

        let element = squared.retrieve();
        if element == U2048::ZERO {
            self.g
        } else {
            element
        }
    }

    pub(crate) fn element_to_bytes(&self, a: &U2048) -> Vec<u8> {
        self.fixed_width(a)
    }

    pub(crate) fn element_from_bytes(&self, bytes: &[u8]) -> Result<U2048> {
        if bytes.len() > self.element_bytes {
            return Err(Error::InvalidElement);
        }

        let value = u2048_from_be(bytes);
        if value == U2048::ZERO || value >= self.p {
            return Err(Error::InvalidElement);
        }

        Ok(value)
    }

    pub(crate) fn bytes_per_element(&self) -> usize {
        self.element_bytes - 3
    }

    /// p = 2q + 1, the generator has order exactly q, and the byte embedding
    /// round-trips. Primality of the fixed constants is established offline.
    pub(crate) fn is_probably_valid(&self) -> bool {
        if self.p != self.q.shl_vartime(1).wrapping_add(&U2048::ONE) {
            return false;
        }

        let g = DynResidue::new(&self.g, self.params());
        if g.pow(&self.q).retrieve() != U2048::ONE {
            return false;
        }
        if g.pow(&U2048::from_u64(2)).retrieve() == U2048::ONE {
            return false;
        }

        let probe = b"probe";
        matches!(
            self.encode_bytes(probe).and_then(|e| self.decode_bytes(&e)),
            Ok(ref data) if data == probe
        )
    }

    pub(crate) fn describe(&self) -> Vec<u8> {
        let mut out = self.fixed_width(&self.p);
        out.extend_from_slice(&self.fixed_width(&self.q));
        out.extend_from_slice(&self.fixed_width(&self.g));

        out
    }

    fn fixed_width(&self, value: &U2048) -> Vec<u8> {
        Scalar::from_uint(*value).to_be_bytes(self.element_bytes)
    }
}

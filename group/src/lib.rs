// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

pub use crypto_bigint::{NonZero, U2048};

pub use csrng::{CsRng, OsRng, SeedableRng};
pub use ec::EcGroup;
pub use integer::IntegerGroup;
pub use pairing::{G1Group, G2Group, GtGroup};
pub use scalar::Scalar;
pub use xor::XorGroup;

pub mod csrng;
mod ec;
mod helpers;
mod integer;
mod pairing;
mod scalar;
mod xor;

/// Group error.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("byte string of {got} bytes exceeds the {capacity}-byte element capacity")]
    MessageTooLong { got: usize, capacity: usize },
    #[error("no curve point found for any of the {0} embedding candidates")]
    PointEmbedding(u32),
    #[error("element does not decode to a padded byte string")]
    BadPadding,
    #[error("byte string is not a valid element of the group")]
    InvalidElement,
    #[error("byte string is not a valid exponent")]
    InvalidExponent,
    #[error("operation `{0}` is not supported by this group flavor")]
    UnsupportedOperation(&'static str),
}

/// Group result.
pub type Result<T> = std::result::Result<T, Error>;

/// An element of one of the supported group flavors.
///
/// Elements carry no back-reference to their group; all arithmetic goes
/// through the owning [`Group`] handle. Mixing an element into a handle of a
/// different flavor is a caller bug and panics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Element {
    Integer(U2048),
    P256(p256::ProjectivePoint),
    PairingG1(ark_bls12_381::G1Projective),
    PairingG2(ark_bls12_381::G2Projective),
    PairingGt(pairing::Gt),
    Xor(Vec<u8>),
}

/// A prime-order group (or the XOR testing pseudo-group) behind one
/// interface: multiplication, exponentiation, sampling, byte embedding and
/// serialization.
///
/// The five flavors cover the three required backends (integers mod p, an
/// elliptic curve over a prime field, a bilinear target group) plus the
/// explicitly insecure XOR flavor used for engine testing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Group {
    Integer(IntegerGroup),
    P256(EcGroup),
    PairingG1(G1Group),
    PairingG2(G2Group),
    PairingGt(GtGroup),
    Xor(XorGroup),
}

macro_rules! mismatch {
    () => {
        panic!("group/element flavor mismatch: this is a local usage bug")
    };
}

impl Group {
    /// The multiplicative identity.
    pub fn identity(&self) -> Element {
        match self {
            Group::Integer(g) => Element::Integer(g.identity()),
            Group::P256(g) => Element::P256(g.identity()),
            Group::PairingG1(g) => Element::PairingG1(g.identity()),
            Group::PairingG2(g) => Element::PairingG2(g.identity()),
            Group::PairingGt(g) => Element::PairingGt(g.identity()),
            Group::Xor(g) => Element::Xor(g.identity()),
        }
    }

    /// The fixed generator.
    pub fn generator(&self) -> Element {
        match self {
            Group::Integer(g) => Element::Integer(g.generator()),
            Group::P256(g) => Element::P256(g.generator()),
            Group::PairingG1(g) => Element::PairingG1(g.generator()),
            Group::PairingG2(g) => Element::PairingG2(g.generator()),
            Group::PairingGt(g) => Element::PairingGt(g.generator()),
            Group::Xor(g) => Element::Xor(g.generator()),
        }
    }

    /// The group order. Exponents are reduced modulo this before use.
    pub fn order(&self) -> U2048 {
        match self {
            Group::Integer(g) => g.order(),
            Group::P256(g) => g.order(),
            Group::PairingG1(_) | Group::PairingG2(_) | Group::PairingGt(_) => {
                pairing::order()
            }
            Group::Xor(g) => g.order(),
        }
    }

    /// Sample a uniform group element.
    pub fn random_element(&self, rng: &mut impl CsRng) -> Element {
        match self {
            Group::Xor(g) => Element::Xor(g.random_element(rng)),
            _ => {
                let exponent = self.random_exponent(rng);
                self.exp(&self.generator(), &exponent)
            }
        }
    }

    /// Sample a uniform exponent in `[1, order)`.
    pub fn random_exponent(&self, rng: &mut impl CsRng) -> Scalar {
        Scalar::random_mod_order(rng, &self.order())
    }

    /// `a · b`.
    pub fn mul(&self, a: &Element, b: &Element) -> Element {
        match (self, a, b) {
            (Group::Integer(g), Element::Integer(a), Element::Integer(b)) => {
                Element::Integer(g.mul(a, b))
            }
            (Group::P256(_), Element::P256(a), Element::P256(b)) => Element::P256(*a + *b),
            (Group::PairingG1(_), Element::PairingG1(a), Element::PairingG1(b)) => {
                Element::PairingG1(*a + *b)
            }
            (Group::PairingG2(_), Element::PairingG2(a), Element::PairingG2(b)) => {
                Element::PairingG2(*a + *b)
            }
            (Group::PairingGt(_), Element::PairingGt(a), Element::PairingGt(b)) => {
                Element::PairingGt(*a + *b)
            }
            (Group::Xor(g), Element::Xor(a), Element::Xor(b)) => Element::Xor(g.mul(a, b)),
            _ => mismatch!(),
        }
    }

    /// `a⁻¹`.
    pub fn inv(&self, a: &Element) -> Element {
        match (self, a) {
            (Group::Integer(g), Element::Integer(a)) => Element::Integer(g.inv(a)),
            (Group::P256(_), Element::P256(a)) => Element::P256(-*a),
            (Group::PairingG1(_), Element::PairingG1(a)) => Element::PairingG1(-*a),
            (Group::PairingG2(_), Element::PairingG2(a)) => Element::PairingG2(-*a),
            (Group::PairingGt(_), Element::PairingGt(a)) => Element::PairingGt(-*a),
            (Group::Xor(_), Element::Xor(a)) => Element::Xor(a.clone()),
            _ => mismatch!(),
        }
    }

    /// `a^e`, with `e` reduced modulo the group order.
    pub fn exp(&self, a: &Element, e: &Scalar) -> Element {
        match (self, a) {
            (Group::Integer(g), Element::Integer(a)) => Element::Integer(g.exp(a, e)),
            (Group::P256(g), Element::P256(a)) => Element::P256(g.exp(a, e)),
            (Group::PairingG1(_), Element::PairingG1(a)) => {
                Element::PairingG1(*a * pairing::to_fr(e))
            }
            (Group::PairingG2(_), Element::PairingG2(a)) => {
                Element::PairingG2(*a * pairing::to_fr(e))
            }
            (Group::PairingGt(_), Element::PairingGt(a)) => {
                Element::PairingGt(*a * pairing::to_fr(e))
            }
            (Group::Xor(g), Element::Xor(a)) => Element::Xor(g.exp(a, e)),
            _ => mismatch!(),
        }
    }

    /// `a₁^e₁ · a₂^e₂` in one call.
    pub fn cascade_exp(&self, a1: &Element, e1: &Scalar, a2: &Element, e2: &Scalar) -> Element {
        self.mul(&self.exp(a1, e1), &self.exp(a2, e2))
    }

    /// Whether `a` lies in this group (full subgroup check where the flavor
    /// supports one; parse-time validation covers the rest).
    pub fn is_element(&self, a: &Element) -> bool {
        match (self, a) {
            (Group::Integer(g), Element::Integer(a)) => g.is_element(a),
            (Group::P256(_), Element::P256(_)) => true,
            (Group::PairingG1(_), Element::PairingG1(_)) => true,
            (Group::PairingG2(_), Element::PairingG2(_)) => true,
            (Group::PairingGt(_), Element::PairingGt(_)) => true,
            (Group::Xor(g), Element::Xor(a)) => a.len() == g.width(),
            _ => false,
        }
    }

    /// Deterministically embed a byte string shorter than
    /// [`Self::bytes_per_element`] into an element; [`Self::decode_bytes`]
    /// recovers it. Padding bytes delimit the payload.
    pub fn encode_bytes(&self, data: &[u8]) -> Result<Element> {
        match self {
            Group::Integer(g) => g.encode_bytes(data).map(Element::Integer),
            Group::P256(g) => g.encode_bytes(data).map(Element::P256),
            Group::PairingGt(g) => g.encode_bytes(data).map(Element::PairingGt),
            Group::Xor(g) => g.encode_bytes(data).map(Element::Xor),
            Group::PairingG1(_) | Group::PairingG2(_) => {
                Err(Error::UnsupportedOperation("encode_bytes"))
            }
        }
    }

    /// Recover the byte string embedded by [`Self::encode_bytes`].
    pub fn decode_bytes(&self, a: &Element) -> Result<Vec<u8>> {
        match (self, a) {
            (Group::Integer(g), Element::Integer(a)) => g.decode_bytes(a),
            (Group::P256(g), Element::P256(a)) => g.decode_bytes(a),
            (Group::PairingGt(g), Element::PairingGt(a)) => g.decode_bytes(a),
            (Group::Xor(g), Element::Xor(a)) => g.decode_bytes(a),
            (Group::PairingG1(_), _) | (Group::PairingG2(_), _) => {
                Err(Error::UnsupportedOperation("decode_bytes"))
            }
            _ => mismatch!(),
        }
    }

    /// Hash an arbitrary tag onto a group element with unknown discrete log.
    pub fn hash_into_element(&self, tag: &[u8]) -> Result<Element> {
        match self {
            Group::Integer(g) => Ok(Element::Integer(g.hash_into_element(tag))),
            Group::P256(g) => g.hash_into_element(tag).map(Element::P256),
            Group::Xor(g) => Ok(Element::Xor(g.hash_into_element(tag))),
            Group::PairingG1(_) | Group::PairingG2(_) | Group::PairingGt(_) => {
                Err(Error::UnsupportedOperation("hash_into_element"))
            }
        }
    }

    /// Hash an arbitrary tag onto an exponent modulo the group order.
    pub fn hash_into_exponent(&self, tag: &[u8]) -> Scalar {
        Scalar::from_hash(tag, &self.order())
    }

    /// Serialize an element to its canonical byte form.
    pub fn element_to_bytes(&self, a: &Element) -> Vec<u8> {
        match (self, a) {
            (Group::Integer(g), Element::Integer(a)) => g.element_to_bytes(a),
            (Group::P256(g), Element::P256(a)) => g.element_to_bytes(a),
            (Group::PairingG1(g), Element::PairingG1(a)) => g.element_to_bytes(a),
            (Group::PairingG2(g), Element::PairingG2(a)) => g.element_to_bytes(a),
            (Group::PairingGt(g), Element::PairingGt(a)) => g.element_to_bytes(a),
            (Group::Xor(_), Element::Xor(a)) => a.clone(),
            _ => mismatch!(),
        }
    }

    /// Parse an element from bytes, validating group membership as far as the
    /// flavor allows.
    pub fn element_from_bytes(&self, bytes: &[u8]) -> Result<Element> {
        match self {
            Group::Integer(g) => g.element_from_bytes(bytes).map(Element::Integer),
            Group::P256(g) => g.element_from_bytes(bytes).map(Element::P256),
            Group::PairingG1(g) => g.element_from_bytes(bytes).map(Element::PairingG1),
            Group::PairingG2(g) => g.element_from_bytes(bytes).map(Element::PairingG2),
            Group::PairingGt(g) => g.element_from_bytes(bytes).map(Element::PairingGt),
            Group::Xor(g) => g.element_from_bytes(bytes).map(Element::Xor),
        }
    }

    /// Payload capacity of [`Self::encode_bytes`] in bytes.
    pub fn bytes_per_element(&self) -> usize {
        match self {
            Group::Integer(g) => g.bytes_per_element(),
            Group::P256(g) => g.bytes_per_element(),
            Group::PairingGt(g) => g.bytes_per_element(),
            Group::Xor(g) => g.bytes_per_element(),
            Group::PairingG1(_) | Group::PairingG2(_) => 0,
        }
    }

    /// Apply the bilinear pairing. Only the Gₜ flavor supports this; the
    /// arguments must come from G₁ and G₂ respectively.
    pub fn apply_pairing(&self, a: &Element, b: &Element) -> Result<Element> {
        match (self, a, b) {
            (Group::PairingGt(g), Element::PairingG1(a), Element::PairingG2(b)) => {
                Ok(Element::PairingGt(g.apply_pairing(a, b)))
            }
            (Group::PairingGt(_), _, _) => Err(Error::InvalidElement),
            _ => Err(Error::UnsupportedOperation("apply_pairing")),
        }
    }

    /// Structural self-check of the fixed group constants (generator order,
    /// subgroup arithmetic, embedding round-trip).
    pub fn is_probably_valid(&self) -> bool {
        let generator = self.generator();
        if !self.is_element(&generator) || generator == self.identity() {
            return false;
        }

        match self {
            Group::Integer(g) => g.is_probably_valid(),
            Group::Xor(_) => {
                let probe = b"probe";
                matches!(
                    self.encode_bytes(probe).and_then(|e| self.decode_bytes(&e)),
                    Ok(ref data) if data == probe
                )
            }
            _ => {
                // Exponents are reduced modulo the claimed order on use, so
                // probe with order − 1: g^(order−1) equals g⁻¹ exactly when
                // the generator's order divides the claimed one.
                let exponent = Scalar::from_uint(self.order().wrapping_sub(&U2048::ONE));

                self.exp(&generator, &exponent) == self.inv(&generator)
            }
        }
    }

    /// A stable byte descriptor of the group definition, used to bind proof
    /// transcripts to the exact parameter set.
    pub fn describe(&self) -> Vec<u8> {
        match self {
            Group::Integer(g) => {
                let mut out = b"integer/".to_vec();
                out.extend_from_slice(&g.describe());
                out
            }
            Group::P256(g) => format!("p256/k={}", g.retry_parameter()).into_bytes(),
            Group::PairingG1(_) => b"bls12-381/g1".to_vec(),
            Group::PairingG2(_) => b"bls12-381/g2".to_vec(),
            Group::PairingGt(_) => b"bls12-381/gt".to_vec(),
            Group::Xor(g) => format!("xor/{}", g.width()).into_bytes(),
        }
    }
}

// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use group::{CsRng, Element, Group, Scalar};
use serde::{Deserialize, Serialize};

use crate::sigma::{self, SchnorrProof, Statement};
use crate::{Error, Result};

/// A secret exponent in `[1, order)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKey {
    scalar: Scalar,
}

impl PrivateKey {
    pub fn generate(group: &Group, rng: &mut impl CsRng) -> Self {
        Self {
            scalar: group.random_exponent(rng),
        }
    }

    pub fn from_scalar(scalar: Scalar) -> Self {
        Self { scalar }
    }

    pub fn scalar(&self) -> &Scalar {
        &self.scalar
    }
}

/// `G^sk` for the generator of the owning group. Keys carry no group handle;
/// every operation names the group explicitly, which keeps the pairing
/// variant's split between server-side (G₁) and client-side (G₂) keys
/// statically visible at the call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    element: Element,
}

/// Serialized Schnorr proof of knowledge of the secret key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeProof {
    challenge: Vec<u8>,
    response: Vec<u8>,
}

impl PublicKey {
    pub fn from_private(group: &Group, private: &PrivateKey) -> Self {
        Self {
            element: group.exp(&group.generator(), private.scalar()),
        }
    }

    pub fn from_element(element: Element) -> Self {
        Self { element }
    }

    /// Parse and validate a key received over the wire.
    pub fn from_bytes(group: &Group, bytes: &[u8]) -> Result<Self> {
        let element = group.element_from_bytes(bytes)?;
        if !group.is_element(&element) {
            return Err(Error::Group(group::Error::InvalidElement));
        }

        Ok(Self { element })
    }

    pub fn to_bytes(&self, group: &Group) -> Vec<u8> {
        group.element_to_bytes(&self.element)
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Non-interactive proof of knowledge of the matching secret key, bound
    /// to `context` (the round nonce and parameter descriptor).
    pub fn prove_knowledge(
        &self,
        group: &Group,
        private: &PrivateKey,
        context: &[u8],
        rng: &mut impl CsRng,
    ) -> KnowledgeProof {
        let statements = [Statement {
            group,
            base: group.generator(),
            target: self.element.clone(),
        }];
        let proof = sigma::prove_schnorr(
            b"knowledge of secret key",
            context,
            &statements,
            private.scalar(),
            &group.order(),
            rng,
        );

        let width = (group.order().bits() + 7) / 8;
        let (challenge, response) = proof.to_bytes(width);
        KnowledgeProof {
            challenge,
            response,
        }
    }

    pub fn verify_knowledge(
        &self,
        group: &Group,
        proof: &KnowledgeProof,
        context: &[u8],
    ) -> Result<()> {
        let statements = [Statement {
            group,
            base: group.generator(),
            target: self.element.clone(),
        }];
        let proof = SchnorrProof::from_bytes(&proof.challenge, &proof.response)?;

        sigma::verify_schnorr(
            b"knowledge of secret key",
            context,
            &statements,
            &proof,
            &group.order(),
        )
    }
}

/// The product of a set of public keys, computed once per server or client
/// set and reused across every slot of a phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeySet {
    element: Element,
}

impl PublicKeySet {
    pub fn new<'a>(group: &Group, keys: impl IntoIterator<Item = &'a PublicKey>) -> Self {
        let element = keys
            .into_iter()
            .fold(group.identity(), |product, key| {
                group.mul(&product, key.element())
            });

        Self { element }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn as_key(&self) -> PublicKey {
        PublicKey::from_element(self.element.clone())
    }
}

#[cfg(test)]
mod tests {
    use group::{IntegerGroup, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn knowledge_proof_verifies_only_for_the_matching_secret() {
        let mut rng = ChaCha20Rng::seed_from_u64(20);
        let group = Group::Integer(IntegerGroup::testing_512());

        let private = PrivateKey::generate(&group, &mut rng);
        let public = PublicKey::from_private(&group, &private);

        let proof = public.prove_knowledge(&group, &private, b"round", &mut rng);
        assert!(public.verify_knowledge(&group, &proof, b"round").is_ok());
        assert!(public.verify_knowledge(&group, &proof, b"other round").is_err());

        let other = PrivateKey::generate(&group, &mut rng);
        let forged = public.prove_knowledge(&group, &other, b"round", &mut rng);
        assert!(public.verify_knowledge(&group, &forged, b"round").is_err());
    }

    #[test]
    fn key_set_is_the_product_of_its_members() {
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let group = Group::Integer(IntegerGroup::testing_512());

        let keys: Vec<PublicKey> = (0..5)
            .map(|_| PublicKey::from_private(&group, &PrivateKey::generate(&group, &mut rng)))
            .collect();

        let mut product = group.identity();
        for key in &keys {
            product = group.mul(&product, key.element());
        }

        let set = PublicKeySet::new(&group, keys.iter());
        assert_eq!(set.element(), &product);
    }

    #[test]
    fn wire_round_trip_rejects_garbage() {
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let group = Group::Integer(IntegerGroup::testing_512());

        let private = PrivateKey::generate(&group, &mut rng);
        let public = PublicKey::from_private(&group, &private);

        let bytes = public.to_bytes(&group);
        assert_eq!(PublicKey::from_bytes(&group, &bytes).unwrap(), public);
        assert!(PublicKey::from_bytes(&group, &[]).is_err());
    }
}

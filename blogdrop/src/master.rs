// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Master-secret derivation for the hashing-generator variant.
//!
//! After the ephemeral key exchange, each (client, server) pair hashes its
//! Diffie-Hellman share into a cell secret `σ_ij`; the public commit cell is
//! `g^σ_ij`, computable by both sides. A participant's master secret is the
//! sum of its cell secrets and its master public key the product of its
//! commit cells, so once every participant has cross-checked that both
//! sides of the commit matrix agree, every master public key is publicly
//! recomputable from the commits alone. The bulk cycle then runs the
//! ordinary discrete-log engine over these master key pairs.

use group::{Element, Group, Scalar};

use crate::{Parameters, PrivateKey, PublicKey, Result};

/// One side's view of a commit-matrix cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterCell {
    secret: Scalar,
    commit: Element,
}

impl MasterCell {
    /// Derive the cell for the pair `(my secret, their public key)`. Both
    /// ends of a pair arrive at the same cell because
    /// `their_pub^my_secret` is the shared Diffie-Hellman element.
    pub fn derive(
        params: &Parameters,
        my_private: &PrivateKey,
        their_public: &PublicKey,
    ) -> Self {
        let group = params.key_group();
        let shared = group.exp(their_public.element(), my_private.scalar());

        let mut tag = b"hashing generator cell".to_vec();
        tag.extend_from_slice(&group.element_to_bytes(&shared));
        tag.extend_from_slice(params.round_nonce());

        let secret = group.hash_into_exponent(&tag);
        let commit = group.exp(&group.generator(), &secret);

        Self { secret, commit }
    }

    pub fn commit(&self) -> &Element {
        &self.commit
    }

    pub fn commit_bytes(&self, group: &Group) -> Vec<u8> {
        group.element_to_bytes(&self.commit)
    }
}

/// Fold a participant's cells into its master key pair.
pub fn master_key_pair(params: &Parameters, cells: &[MasterCell]) -> (PrivateKey, PublicKey) {
    let group = params.key_group();
    let order = group.order();

    let secret = cells
        .iter()
        .fold(Scalar::ZERO, |sum, cell| sum.add_mod(&cell.secret, &order));
    let private = PrivateKey::from_scalar(secret);

    (private.clone(), PublicKey::from_private(group, &private))
}

/// Recompute a master public key from commit cells alone. Every participant
/// applies this to the commit vectors exchanged on the wire.
pub fn master_public_key(params: &Parameters, commits: &[Element]) -> PublicKey {
    let group = params.key_group();
    let element = commits
        .iter()
        .fold(group.identity(), |product, commit| group.mul(&product, commit));

    PublicKey::from_element(element)
}

/// Parse a wire commit vector, validating each cell.
pub fn commits_from_bytes(params: &Parameters, cells: &[Vec<u8>]) -> Result<Vec<Element>> {
    cells
        .iter()
        .map(|bytes| {
            let element = params.key_group().element_from_bytes(bytes)?;
            if !params.key_group().is_element(&element) {
                return Err(crate::Error::Group(group::Error::InvalidElement));
            }
            Ok(element)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use group::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn both_sides_of_a_pair_derive_the_same_cell() {
        let mut rng = ChaCha20Rng::seed_from_u64(40);
        let params = Parameters::integer_hashing_testing();
        let group = params.key_group();

        let client_priv = PrivateKey::generate(group, &mut rng);
        let client_pub = PublicKey::from_private(group, &client_priv);
        let server_priv = PrivateKey::generate(group, &mut rng);
        let server_pub = PublicKey::from_private(group, &server_priv);

        let client_side = MasterCell::derive(&params, &client_priv, &server_pub);
        let server_side = MasterCell::derive(&params, &server_priv, &client_pub);

        assert_eq!(client_side, server_side);
    }

    #[test]
    fn master_public_key_matches_the_master_secret() {
        let mut rng = ChaCha20Rng::seed_from_u64(41);
        let params = Parameters::integer_hashing_testing();
        let group = params.key_group();

        let client_priv = PrivateKey::generate(group, &mut rng);
        let cells: Vec<MasterCell> = (0..3)
            .map(|_| {
                let server_priv = PrivateKey::generate(group, &mut rng);
                let server_pub = PublicKey::from_private(group, &server_priv);
                MasterCell::derive(&params, &client_priv, &server_pub)
            })
            .collect();

        let (master_priv, master_pub) = master_key_pair(&params, &cells);
        assert_eq!(master_pub, PublicKey::from_private(group, &master_priv));

        let commits: Vec<Element> = cells.iter().map(|c| c.commit().clone()).collect();
        assert_eq!(master_public_key(&params, &commits), master_pub);
    }

    #[test]
    fn unrelated_pairs_disagree() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let params = Parameters::integer_hashing_testing();
        let group = params.key_group();

        let a = PrivateKey::generate(group, &mut rng);
        let b_pub = PublicKey::from_private(group, &PrivateKey::generate(group, &mut rng));
        let c_pub = PublicKey::from_private(group, &PrivateKey::generate(group, &mut rng));

        assert_ne!(
            MasterCell::derive(&params, &a, &b_pub),
            MasterCell::derive(&params, &a, &c_pub)
        );
    }
}

// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use group::{CsRng, Element};

use crate::{Parameters, Result};

/// A message encoded across the `n_elements` message-group elements of one
/// slot ciphertext.
#[derive(Clone, Debug)]
pub struct Plaintext {
    params: Parameters,
    elements: Vec<Element>,
}

impl Plaintext {
    /// The empty plaintext (every element encodes the empty byte string).
    pub fn empty(params: &Parameters) -> Self {
        let empty = params
            .msg_group()
            .encode_bytes(&[])
            .expect("the empty string always fits");

        Self {
            params: params.clone(),
            elements: vec![empty; params.n_elements()],
        }
    }

    /// The maximum number of message bytes one plaintext can carry.
    pub fn can_fit(params: &Parameters) -> usize {
        params.n_elements() * params.msg_group().bytes_per_element()
    }

    /// Encode `input`, splitting it across the elements. Returns the suffix
    /// that did not fit.
    pub fn encode(params: &Parameters, input: &[u8]) -> Result<(Self, Vec<u8>)> {
        let per_element = params.msg_group().bytes_per_element();
        let capacity = Self::can_fit(params);
        let (head, overflow) = input.split_at(input.len().min(capacity));

        let mut elements = Vec::with_capacity(params.n_elements());
        for index in 0..params.n_elements() {
            let chunk_start = (index * per_element).min(head.len());
            let chunk_end = ((index + 1) * per_element).min(head.len());

            elements.push(params.msg_group().encode_bytes(&head[chunk_start..chunk_end])?);
        }

        Ok((
            Self {
                params: params.clone(),
                elements,
            },
            overflow.to_vec(),
        ))
    }

    /// Reassemble the element chunks back into the message bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for element in &self.elements {
            out.extend_from_slice(&self.params.msg_group().decode_bytes(element)?);
        }

        Ok(out)
    }

    /// Replace every element with a uniform group element. Used to exercise
    /// the reveal path with undecodable content.
    pub fn set_random(&mut self, rng: &mut impl CsRng) {
        for element in &mut self.elements {
            *element = self.params.msg_group().random_element(rng);
        }
    }

    pub fn from_elements(params: &Parameters, elements: Vec<Element>) -> Self {
        Self {
            params: params.clone(),
            elements,
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }
}

#[cfg(test)]
mod tests {
    use group::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(0)]
    #[case::single_element(10)]
    #[case::spanning(80)]
    fn encode_decode_round_trips(#[case] length: usize) {
        let params = Parameters::integer_elgamal_testing();
        assert!(length <= Plaintext::can_fit(&params));

        let message: Vec<u8> = (0..length).map(|i| i as u8).collect();
        let (plaintext, overflow) = Plaintext::encode(&params, &message).unwrap();

        assert!(overflow.is_empty());
        assert_eq!(plaintext.elements().len(), params.n_elements());
        assert_eq!(plaintext.decode().unwrap(), message);
    }

    #[test]
    fn overflow_is_returned_to_the_caller() {
        let params = Parameters::integer_elgamal_testing();
        let capacity = Plaintext::can_fit(&params);

        let message = vec![0x42u8; capacity + 17];
        let (plaintext, overflow) = Plaintext::encode(&params, &message).unwrap();

        assert_eq!(overflow.len(), 17);
        let mut reassembled = plaintext.decode().unwrap();
        reassembled.extend_from_slice(&overflow);
        assert_eq!(reassembled, message);
    }

    #[test]
    fn random_plaintext_fails_to_decode() {
        let params = Parameters::integer_elgamal_testing();
        let mut rng = ChaCha20Rng::seed_from_u64(30);

        let mut plaintext = Plaintext::empty(&params);
        plaintext.set_random(&mut rng);

        assert!(plaintext.decode().is_err());
    }
}

// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! The three sigma-protocol shapes used across the slot engines, over
//! explicit `(group, base, target)` statement lists so that every proof
//! variant shares one implementation: plain Schnorr (knowledge of one
//! exponent behind one or more statements), Chaum-Pedersen as its
//! two-statement case, and the two-branch disjunction used by client
//! ciphertexts.

use group::{CsRng, Element, Group, Scalar, U2048};
use merlin::Transcript;

use crate::{Error, Result};

/// One claim `target = base^witness`. Statements within a branch share the
/// same witness; their groups may differ as long as the orders agree.
pub(crate) struct Statement<'a> {
    pub group: &'a Group,
    pub base: Element,
    pub target: Element,
}

/// Knowledge of a single exponent behind every statement in a list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchnorrProof {
    pub(crate) challenge: Scalar,
    pub(crate) response: Scalar,
}

/// Either branch one's exponent or branch two's, without revealing which.
/// The two sub-challenges must sum to the transcript challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisjunctiveProof {
    pub(crate) challenge_first: Scalar,
    pub(crate) response_first: Scalar,
    pub(crate) challenge_second: Scalar,
    pub(crate) response_second: Scalar,
}

/// The branch of a [`DisjunctiveProof`] the prover actually knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KnownBranch {
    First,
    Second,
}

fn transcript(label: &'static [u8], context: &[u8]) -> Transcript {
    let mut transcript = Transcript::new(b"blogdrop sigma protocol");
    transcript.append_message(b"proof label", label);
    transcript.append_message(b"context", context);

    transcript
}

fn append_statements(transcript: &mut Transcript, statements: &[Statement<'_>]) {
    for statement in statements {
        transcript.append_message(b"base", &statement.group.element_to_bytes(&statement.base));
        transcript.append_message(
            b"target",
            &statement.group.element_to_bytes(&statement.target),
        );
    }
}

fn append_commitments(
    transcript: &mut Transcript,
    statements: &[Statement<'_>],
    commitments: &[Element],
) {
    for (statement, commitment) in statements.iter().zip(commitments) {
        transcript.append_message(b"commitment", &statement.group.element_to_bytes(commitment));
    }
}

/// Draw a challenge wide enough to reduce uniformly modulo `order`.
fn challenge(transcript: &mut Transcript, order: &U2048) -> Scalar {
    let mut wide = [0u8; 512];
    transcript.challenge_bytes(b"challenge", &mut wide);

    Scalar::from_wide_bytes(&wide, order)
}

/// Commitments `base_i^v` for a fresh randomizer `v`.
fn commit(statements: &[Statement<'_>], randomizer: &Scalar) -> Vec<Element> {
    statements
        .iter()
        .map(|s| s.group.exp(&s.base, randomizer))
        .collect()
}

/// Commitments reconstructed from a (challenge, response) pair:
/// `base_i^r · target_i^c`.
fn reconstruct(statements: &[Statement<'_>], proof_challenge: &Scalar, response: &Scalar) -> Vec<Element> {
    statements
        .iter()
        .map(|s| s.group.cascade_exp(&s.base, response, &s.target, proof_challenge))
        .collect()
}

pub(crate) fn prove_schnorr(
    label: &'static [u8],
    context: &[u8],
    statements: &[Statement<'_>],
    witness: &Scalar,
    order: &U2048,
    rng: &mut impl CsRng,
) -> SchnorrProof {
    let randomizer = Scalar::random_mod_order(rng, order);
    let commitments = commit(statements, &randomizer);

    let mut transcript = transcript(label, context);
    append_statements(&mut transcript, statements);
    append_commitments(&mut transcript, statements, &commitments);
    let challenge = challenge(&mut transcript, order);

    let response = randomizer.sub_mod(&challenge.mul_mod(witness, order), order);

    SchnorrProof {
        challenge,
        response,
    }
}

pub(crate) fn verify_schnorr(
    label: &'static [u8],
    context: &[u8],
    statements: &[Statement<'_>],
    proof: &SchnorrProof,
    order: &U2048,
) -> Result<()> {
    let commitments = reconstruct(statements, &proof.challenge, &proof.response);

    let mut transcript = transcript(label, context);
    append_statements(&mut transcript, statements);
    append_commitments(&mut transcript, statements, &commitments);

    if challenge(&mut transcript, order) == proof.challenge {
        Ok(())
    } else {
        Err(Error::ProofVerification)
    }
}

pub(crate) fn prove_disjunctive(
    label: &'static [u8],
    context: &[u8],
    first: &[Statement<'_>],
    second: &[Statement<'_>],
    known: KnownBranch,
    witness: &Scalar,
    order: &U2048,
    rng: &mut impl CsRng,
) -> DisjunctiveProof {
    // The unknown branch is simulated with a random challenge/response pair;
    // the real branch absorbs whatever challenge share remains.
    let randomizer = Scalar::random_mod_order(rng, order);
    let fake_challenge = Scalar::random_mod_order(rng, order);
    let fake_response = Scalar::random_mod_order(rng, order);

    let (first_commitments, second_commitments) = match known {
        KnownBranch::First => (
            commit(first, &randomizer),
            reconstruct(second, &fake_challenge, &fake_response),
        ),
        KnownBranch::Second => (
            reconstruct(first, &fake_challenge, &fake_response),
            commit(second, &randomizer),
        ),
    };

    let mut transcript = transcript(label, context);
    append_statements(&mut transcript, first);
    append_statements(&mut transcript, second);
    append_commitments(&mut transcript, first, &first_commitments);
    append_commitments(&mut transcript, second, &second_commitments);
    let total = challenge(&mut transcript, order);

    let real_challenge = total.sub_mod(&fake_challenge, order);
    let real_response = randomizer.sub_mod(&real_challenge.mul_mod(witness, order), order);

    match known {
        KnownBranch::First => DisjunctiveProof {
            challenge_first: real_challenge,
            response_first: real_response,
            challenge_second: fake_challenge,
            response_second: fake_response,
        },
        KnownBranch::Second => DisjunctiveProof {
            challenge_first: fake_challenge,
            response_first: fake_response,
            challenge_second: real_challenge,
            response_second: real_response,
        },
    }
}

pub(crate) fn verify_disjunctive(
    label: &'static [u8],
    context: &[u8],
    first: &[Statement<'_>],
    second: &[Statement<'_>],
    proof: &DisjunctiveProof,
    order: &U2048,
) -> Result<()> {
    let first_commitments = reconstruct(first, &proof.challenge_first, &proof.response_first);
    let second_commitments = reconstruct(second, &proof.challenge_second, &proof.response_second);

    let mut transcript = transcript(label, context);
    append_statements(&mut transcript, first);
    append_statements(&mut transcript, second);
    append_commitments(&mut transcript, first, &first_commitments);
    append_commitments(&mut transcript, second, &second_commitments);
    let total = challenge(&mut transcript, order);

    if proof.challenge_first.add_mod(&proof.challenge_second, order) == total {
        Ok(())
    } else {
        Err(Error::ProofVerification)
    }
}

impl SchnorrProof {
    pub fn to_bytes(&self, width: usize) -> (Vec<u8>, Vec<u8>) {
        (
            self.challenge.to_be_bytes(width),
            self.response.to_be_bytes(width),
        )
    }

    pub fn from_bytes(challenge: &[u8], response: &[u8]) -> Result<Self> {
        Ok(Self {
            challenge: Scalar::from_be_bytes(challenge).map_err(Error::Group)?,
            response: Scalar::from_be_bytes(response).map_err(Error::Group)?,
        })
    }
}

impl DisjunctiveProof {
    pub fn to_bytes(&self, width: usize) -> [Vec<u8>; 4] {
        [
            self.challenge_first.to_be_bytes(width),
            self.response_first.to_be_bytes(width),
            self.challenge_second.to_be_bytes(width),
            self.response_second.to_be_bytes(width),
        ]
    }

    pub fn from_bytes(parts: [&[u8]; 4]) -> Result<Self> {
        Ok(Self {
            challenge_first: Scalar::from_be_bytes(parts[0]).map_err(Error::Group)?,
            response_first: Scalar::from_be_bytes(parts[1]).map_err(Error::Group)?,
            challenge_second: Scalar::from_be_bytes(parts[2]).map_err(Error::Group)?,
            response_second: Scalar::from_be_bytes(parts[3]).map_err(Error::Group)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use group::{IntegerGroup, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn test_group() -> Group {
        Group::Integer(IntegerGroup::testing_512())
    }

    #[test]
    fn schnorr_round_trips() {
        let mut rng = ChaCha20Rng::seed_from_u64(10);
        let group = test_group();
        let order = group.order();

        let witness = group.random_exponent(&mut rng);
        let base = group.random_element(&mut rng);
        let statements = [
            Statement {
                group: &group,
                base: group.generator(),
                target: group.exp(&group.generator(), &witness),
            },
            Statement {
                group: &group,
                base: base.clone(),
                target: group.exp(&base, &witness),
            },
        ];

        let proof = prove_schnorr(b"test", b"ctx", &statements, &witness, &order, &mut rng);
        assert!(verify_schnorr(b"test", b"ctx", &statements, &proof, &order).is_ok());

        // A different context or a perturbed statement must fail.
        assert!(verify_schnorr(b"test", b"other", &statements, &proof, &order).is_err());
        let tampered = [
            Statement {
                group: &group,
                base: group.generator(),
                target: group.exp(&group.generator(), &witness),
            },
            Statement {
                group: &group,
                base: base.clone(),
                target: group.random_element(&mut rng),
            },
        ];
        assert!(verify_schnorr(b"test", b"ctx", &tampered, &proof, &order).is_err());
    }

    #[test]
    fn disjunction_hides_the_known_branch() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let group = test_group();
        let order = group.order();

        let first_witness = group.random_exponent(&mut rng);
        let second_witness = group.random_exponent(&mut rng);
        let first_target = group.exp(&group.generator(), &first_witness);
        let second_target = group.exp(&group.generator(), &second_witness);

        for (known, witness) in [
            (KnownBranch::First, &first_witness),
            (KnownBranch::Second, &second_witness),
        ] {
            let first = [Statement {
                group: &group,
                base: group.generator(),
                target: first_target.clone(),
            }];
            let second = [Statement {
                group: &group,
                base: group.generator(),
                target: second_target.clone(),
            }];

            let proof =
                prove_disjunctive(b"or", b"ctx", &first, &second, known, witness, &order, &mut rng);
            assert!(verify_disjunctive(b"or", b"ctx", &first, &second, &proof, &order).is_ok());
        }
    }

    #[test]
    fn disjunction_needs_at_least_one_witness() {
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let group = test_group();
        let order = group.order();

        let witness = group.random_exponent(&mut rng);
        let wrong = group.random_exponent(&mut rng);
        let first = [Statement {
            group: &group,
            base: group.generator(),
            target: group.exp(&group.generator(), &witness),
        }];
        let second = [Statement {
            group: &group,
            base: group.generator(),
            target: group.exp(&group.generator(), &witness),
        }];

        let proof = prove_disjunctive(
            b"or",
            b"ctx",
            &first,
            &second,
            KnownBranch::First,
            &wrong,
            &order,
            &mut rng,
        );
        assert!(verify_disjunctive(b"or", b"ctx", &first, &second, &proof, &order).is_err());
    }
}

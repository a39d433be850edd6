// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use rand_chacha::ChaCha20Rng;
use rstest::rstest;

use group::{EcGroup, Element, G1Group, G2Group, Group, GtGroup, IntegerGroup, Scalar, SeedableRng, XorGroup};

fn embedding_groups() -> Vec<Group> {
    vec![
        Group::Integer(IntegerGroup::testing_512()),
        Group::Integer(IntegerGroup::production_2048()),
        Group::P256(EcGroup::new()),
        Group::PairingGt(GtGroup::new()),
        Group::Xor(XorGroup::new(32)),
    ]
}

#[test]
fn fixed_groups_are_probably_valid() {
    for group in embedding_groups() {
        assert!(group.is_probably_valid(), "{:?}", group.describe());
    }
    assert!(Group::PairingG1(G1Group::new()).is_probably_valid());
    assert!(Group::PairingG2(G2Group::new()).is_probably_valid());
}

#[rstest]
#[case::empty(b"".to_vec())]
#[case::shorts(b"shorts".to_vec())]
#[case::zeros(vec![0u8; 10])]
#[case::trailing_zero(vec![0xab, 0x00])]
#[case::high_bytes(vec![0xff; 20])]
fn encode_decode_round_trips(#[case] message: Vec<u8>) {
    for group in embedding_groups() {
        if message.len() > group.bytes_per_element() {
            continue;
        }

        let element = group.encode_bytes(&message).unwrap();
        assert!(group.is_element(&element));
        assert_eq!(group.decode_bytes(&element).unwrap(), message);
    }
}

#[test]
fn encode_decode_round_trips_at_capacity() {
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    for group in embedding_groups() {
        let mut message = vec![0u8; group.bytes_per_element()];
        rand_core::RngCore::fill_bytes(&mut rng, &mut message);

        let element = group.encode_bytes(&message).unwrap();
        assert_eq!(group.decode_bytes(&element).unwrap(), message);
    }
}

#[test]
fn oversized_messages_are_rejected() {
    for group in embedding_groups() {
        let message = vec![0u8; group.bytes_per_element() + 1];
        assert!(matches!(
            group.encode_bytes(&message),
            Err(group::Error::MessageTooLong { .. })
        ));
    }
}

#[test]
fn random_elements_decode_to_an_error() {
    // A random group element almost surely carries no valid padding.
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let group = Group::Integer(IntegerGroup::testing_512());

    let element = group.random_element(&mut rng);
    assert!(group.decode_bytes(&element).is_err());
}

#[test]
fn group_laws_hold() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);

    for group in [
        Group::Integer(IntegerGroup::testing_512()),
        Group::P256(EcGroup::new()),
        Group::PairingG1(G1Group::new()),
        Group::PairingG2(G2Group::new()),
        Group::PairingGt(GtGroup::new()),
    ] {
        let a = group.random_element(&mut rng);
        let b = group.random_element(&mut rng);

        assert!(group.is_element(&a));
        assert_eq!(group.mul(&a, &group.identity()), a);
        assert_eq!(group.mul(&a, &group.inv(&a)), group.identity());
        assert_eq!(group.mul(&a, &b), group.mul(&b, &a));
        assert_eq!(
            group.exp(&group.generator(), &Scalar::from_uint(group.order())),
            group.identity()
        );
    }
}

#[test]
fn exponent_arithmetic_matches_group_arithmetic() {
    let mut rng = ChaCha20Rng::seed_from_u64(4);

    for group in [
        Group::Integer(IntegerGroup::testing_512()),
        Group::P256(EcGroup::new()),
    ] {
        let order = group.order();
        let x = group.random_exponent(&mut rng);
        let y = group.random_exponent(&mut rng);
        let g = group.generator();

        // g^(x+y) = g^x · g^y
        assert_eq!(
            group.exp(&g, &x.add_mod(&y, &order)),
            group.mul(&group.exp(&g, &x), &group.exp(&g, &y))
        );
        // g^(x·y) = (g^x)^y
        assert_eq!(
            group.exp(&g, &x.mul_mod(&y, &order)),
            group.exp(&group.exp(&g, &x), &y)
        );
        // cascade form
        assert_eq!(
            group.cascade_exp(&g, &x, &group.exp(&g, &y), &Scalar::ONE),
            group.mul(&group.exp(&g, &x), &group.exp(&g, &y))
        );
    }
}

#[test]
fn element_bytes_round_trip() {
    let mut rng = ChaCha20Rng::seed_from_u64(5);

    for group in [
        Group::Integer(IntegerGroup::testing_512()),
        Group::P256(EcGroup::new()),
        Group::PairingG1(G1Group::new()),
        Group::PairingG2(G2Group::new()),
        Group::PairingGt(GtGroup::new()),
        Group::Xor(XorGroup::new(32)),
    ] {
        let a = group.random_element(&mut rng);
        let bytes = group.element_to_bytes(&a);
        assert_eq!(group.element_from_bytes(&bytes).unwrap(), a);
    }
}

#[test]
fn garbage_bytes_are_rejected() {
    for group in [
        Group::Integer(IntegerGroup::testing_512()),
        Group::P256(EcGroup::new()),
        Group::PairingG1(G1Group::new()),
        Group::PairingG2(G2Group::new()),
    ] {
        assert!(group.element_from_bytes(&[0x5a; 7]).is_err());
    }
}

#[test]
fn hash_into_element_lands_in_the_group() {
    for group in [
        Group::Integer(IntegerGroup::testing_512()),
        Group::P256(EcGroup::new()),
    ] {
        let a = group.hash_into_element(b"one tag").unwrap();
        let b = group.hash_into_element(b"another tag").unwrap();

        assert!(group.is_element(&a));
        assert_ne!(a, b);
        assert_eq!(a, group.hash_into_element(b"one tag").unwrap());
    }
}

#[test]
fn pairing_is_bilinear() {
    let mut rng = ChaCha20Rng::seed_from_u64(6);

    let g1 = Group::PairingG1(G1Group::new());
    let g2 = Group::PairingG2(G2Group::new());
    let gt = Group::PairingGt(GtGroup::new());

    let x = g1.random_exponent(&mut rng);
    let a = g1.generator();
    let b = g2.generator();

    let lhs = gt.apply_pairing(&g1.exp(&a, &x), &b).unwrap();
    let rhs = gt.exp(&gt.apply_pairing(&a, &b).unwrap(), &x);
    assert_eq!(lhs, rhs);

    assert!(matches!(
        gt.apply_pairing(&b, &a),
        Err(group::Error::InvalidElement)
    ));
}

#[test]
fn xor_exponentiation_follows_parity() {
    let group = Group::Xor(XorGroup::new(16));
    let mut rng = ChaCha20Rng::seed_from_u64(7);

    let a = group.random_element(&mut rng);
    assert_eq!(group.exp(&a, &Scalar::from_u64(3)), a);
    assert_eq!(group.exp(&a, &Scalar::from_u64(2)), group.identity());
    assert_eq!(group.inv(&a), a);
    if let (Element::Xor(x), Element::Xor(y)) = (&a, &group.mul(&a, &a)) {
        assert_ne!(x, &vec![0u8; 16], "sampled element should be non-trivial");
        assert_eq!(y, &vec![0u8; 16]);
    }
}

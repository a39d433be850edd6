// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! End-to-end engine flows for one anonymity slot: an author and three
//! cover clients submit to two bin servers, the bins close, the servers
//! exchange ciphertexts and every server reveals the author's message.

use rand_chacha::ChaCha20Rng;
use rstest::rstest;

use blogdrop::{
    new_slot_crypto, Parameters, PrivateKey, PublicKey, PublicKeySet, SlotCrypto, SlotKeys,
};
use group::SeedableRng;

const N_CLIENTS: usize = 4;
const N_SERVERS: usize = 2;

struct Fixture {
    params: Parameters,
    client_privs: Vec<PrivateKey>,
    client_pubs: Vec<PublicKey>,
    server_privs: Vec<PrivateKey>,
    server_pubs: Vec<PublicKey>,
    slot_priv: PrivateKey,
    slot_pub: PublicKey,
    server_keys: PublicKeySet,
}

fn fixture(params: Parameters, rng: &mut ChaCha20Rng) -> Fixture {
    let client_group = params.client_key_group().clone();
    let key_group = params.key_group().clone();

    let client_privs: Vec<PrivateKey> = (0..N_CLIENTS)
        .map(|_| PrivateKey::generate(&client_group, rng))
        .collect();
    let client_pubs: Vec<PublicKey> = client_privs
        .iter()
        .map(|private| PublicKey::from_private(&client_group, private))
        .collect();

    let server_privs: Vec<PrivateKey> = (0..N_SERVERS)
        .map(|_| PrivateKey::generate(&key_group, rng))
        .collect();
    let server_pubs: Vec<PublicKey> = server_privs
        .iter()
        .map(|private| PublicKey::from_private(&key_group, private))
        .collect();

    let slot_priv = PrivateKey::generate(&client_group, rng);
    let slot_pub = PublicKey::from_private(&client_group, &slot_priv);
    let server_keys = PublicKeySet::new(&key_group, server_pubs.iter());

    Fixture {
        params,
        client_privs,
        client_pubs,
        server_privs,
        server_pubs,
        slot_priv,
        slot_pub,
        server_keys,
    }
}

impl Fixture {
    fn client_keys(&self, index: usize, author: bool) -> SlotKeys {
        SlotKeys {
            client_private: self.client_privs[index].clone(),
            client_public: self.client_pubs[index].clone(),
            slot_public: self.slot_pub.clone(),
            author_private: author.then(|| self.slot_priv.clone()),
            server_private: None,
            server_public: None,
            server_keys: self.server_keys.clone(),
            server_list: self.server_pubs.clone(),
        }
    }

    fn server_keys_for(&self, index: usize, rng: &mut ChaCha20Rng) -> SlotKeys {
        // Bin servers still carry a client-role key pair; it is unused by
        // the bin operations themselves.
        let throwaway = PrivateKey::generate(self.params.client_key_group(), rng);

        SlotKeys {
            client_public: PublicKey::from_private(self.params.client_key_group(), &throwaway),
            client_private: throwaway,
            slot_public: self.slot_pub.clone(),
            author_private: None,
            server_private: Some(self.server_privs[index].clone()),
            server_public: Some(self.server_pubs[index].clone()),
            server_keys: self.server_keys.clone(),
            server_list: self.server_pubs.clone(),
        }
    }

    /// Generate one ciphertext per client, author at index 0.
    fn client_ciphertexts(&self, message: &[u8], rng: &mut ChaCha20Rng) -> Vec<Vec<u8>> {
        (0..N_CLIENTS)
            .map(|index| {
                let engine = new_slot_crypto(&self.params, 0, self.client_keys(index, index == 0));
                if index == 0 {
                    engine.gen_author(message, rng).unwrap()
                } else {
                    engine.gen_cover(rng).unwrap()
                }
            })
            .collect()
    }

    fn bins(&self, rng: &mut ChaCha20Rng) -> Vec<Box<dyn SlotCrypto>> {
        (0..N_SERVERS)
            .map(|index| new_slot_crypto(&self.params, 0, self.server_keys_for(index, rng)))
            .collect()
    }
}

fn run_slot(params: Parameters, message: &[u8]) -> Vec<Vec<u8>> {
    let mut rng = ChaCha20Rng::seed_from_u64(100);
    let fixture = fixture(params, &mut rng);

    let ciphertexts = fixture.client_ciphertexts(message, &mut rng);
    let mut bins = fixture.bins(&mut rng);

    for bin in bins.iter_mut() {
        for (ciphertext, public_key) in ciphertexts.iter().zip(&fixture.client_pubs) {
            bin.add_client_ct(ciphertext, public_key).unwrap();
        }
    }

    let server_cts: Vec<Vec<u8>> = bins
        .iter_mut()
        .map(|bin| bin.close_bin(&mut rng).unwrap())
        .collect();

    for bin in bins.iter_mut() {
        for (ciphertext, public_key) in server_cts.iter().zip(&fixture.server_pubs) {
            bin.add_server_ct(ciphertext, public_key).unwrap();
        }
    }

    bins.iter()
        .map(|bin| bin.reveal_plaintext().unwrap())
        .collect()
}

#[rstest]
#[case::integer_elgamal(Parameters::integer_elgamal_testing())]
#[case::integer_hashing(Parameters::integer_hashing_testing())]
#[case::pairing(Parameters::pairing_production(b"nonce".to_vec()))]
#[case::xor(Parameters::xor_testing(b"nonce".to_vec()))]
fn covers_cancel_and_the_author_message_survives(#[case] params: Parameters) {
    let message = b"hello".to_vec();

    for revealed in run_slot(params, &message) {
        assert_eq!(revealed, message);
    }
}

#[rstest]
#[case::integer_elgamal(Parameters::integer_elgamal_testing())]
#[case::pairing(Parameters::pairing_production(b"nonce".to_vec()))]
fn an_authorless_slot_reveals_an_empty_payload(#[case] params: Parameters) {
    let mut rng = ChaCha20Rng::seed_from_u64(101);
    let fixture = fixture(params, &mut rng);

    // Everyone covers; nobody holds the slot secret.
    let ciphertexts: Vec<Vec<u8>> = (0..N_CLIENTS)
        .map(|index| {
            let engine =
                new_slot_crypto(&fixture.params, 0, fixture.client_keys(index, false));
            engine.gen_cover(&mut rng).unwrap()
        })
        .collect();

    let mut bins = fixture.bins(&mut rng);
    for bin in bins.iter_mut() {
        for (ciphertext, public_key) in ciphertexts.iter().zip(&fixture.client_pubs) {
            bin.add_client_ct(ciphertext, public_key).unwrap();
        }
    }

    let server_cts: Vec<Vec<u8>> = bins
        .iter_mut()
        .map(|bin| bin.close_bin(&mut rng).unwrap())
        .collect();
    for bin in bins.iter_mut() {
        for (ciphertext, public_key) in server_cts.iter().zip(&fixture.server_pubs) {
            bin.add_server_ct(ciphertext, public_key).unwrap();
        }
    }

    for bin in &bins {
        assert_eq!(bin.reveal_plaintext().unwrap(), Vec::<u8>::new());
    }
}

#[test]
fn the_proof_of_an_honest_ciphertext_always_verifies() {
    let mut rng = ChaCha20Rng::seed_from_u64(102);
    let fixture = fixture(Parameters::integer_elgamal_testing(), &mut rng);

    let engine = new_slot_crypto(&fixture.params, 0, fixture.client_keys(1, false));
    let ciphertext = engine.gen_cover(&mut rng).unwrap();

    let verifier = new_slot_crypto(&fixture.params, 0, fixture.server_keys_for(0, &mut rng));
    assert!(verifier
        .verify_client(&ciphertext, &fixture.client_pubs[1])
        .is_ok());
}

#[test]
fn a_ciphertext_under_the_wrong_key_is_rejected() {
    let mut rng = ChaCha20Rng::seed_from_u64(103);
    let fixture = fixture(Parameters::integer_elgamal_testing(), &mut rng);

    let engine = new_slot_crypto(&fixture.params, 0, fixture.client_keys(1, false));
    let ciphertext = engine.gen_cover(&mut rng).unwrap();

    let verifier = new_slot_crypto(&fixture.params, 0, fixture.server_keys_for(0, &mut rng));
    assert!(verifier
        .verify_client(&ciphertext, &fixture.client_pubs[2])
        .is_err());
}

#[test]
fn close_bin_reports_the_failing_client() {
    let mut rng = ChaCha20Rng::seed_from_u64(104);
    let fixture = fixture(Parameters::integer_elgamal_testing(), &mut rng);

    let mut ciphertexts = fixture.client_ciphertexts(b"hi", &mut rng);

    // Client 2 swaps in a ciphertext generated under a different secret,
    // keeping the claimed public key.
    let outsider = PrivateKey::generate(fixture.params.client_key_group(), &mut rng);
    let forged_keys = SlotKeys {
        client_public: PublicKey::from_private(fixture.params.client_key_group(), &outsider),
        client_private: outsider,
        slot_public: fixture.slot_pub.clone(),
        author_private: None,
        server_private: None,
        server_public: None,
        server_keys: fixture.server_keys.clone(),
        server_list: fixture.server_pubs.clone(),
    };
    ciphertexts[2] = new_slot_crypto(&fixture.params, 0, forged_keys)
        .gen_cover(&mut rng)
        .unwrap();

    let mut bin = fixture
        .bins(&mut rng)
        .into_iter()
        .next()
        .unwrap();
    for (ciphertext, public_key) in ciphertexts.iter().zip(&fixture.client_pubs) {
        bin.add_client_ct(ciphertext, public_key).unwrap();
    }

    assert_eq!(
        bin.close_bin(&mut rng).unwrap_err(),
        blogdrop::Error::InvalidClientProof { index: 2 }
    );
}

#[test]
fn a_tampered_server_ciphertext_is_rejected() {
    let mut rng = ChaCha20Rng::seed_from_u64(105);
    let fixture = fixture(Parameters::integer_elgamal_testing(), &mut rng);

    let ciphertexts = fixture.client_ciphertexts(b"hi", &mut rng);
    let mut bins = fixture.bins(&mut rng);
    for bin in bins.iter_mut() {
        for (ciphertext, public_key) in ciphertexts.iter().zip(&fixture.client_pubs) {
            bin.add_client_ct(ciphertext, public_key).unwrap();
        }
    }

    let server_cts: Vec<Vec<u8>> = bins
        .iter_mut()
        .map(|bin| bin.close_bin(&mut rng).unwrap())
        .collect();

    // Present server 1's ciphertext under server 0's key.
    assert!(bins[0]
        .add_server_ct(&server_cts[1], &fixture.server_pubs[0])
        .is_err());
}

#[test]
fn element_count_follows_set_n_elements() {
    let mut rng = ChaCha20Rng::seed_from_u64(106);
    let fixture = fixture(Parameters::integer_elgamal_testing(), &mut rng);

    let mut author = new_slot_crypto(&fixture.params, 0, fixture.client_keys(0, true));
    let capacity = author.max_plaintext_len();

    author.set_n_elements(5);
    assert_eq!(author.n_elements(), 5);
    assert!(author.max_plaintext_len() > capacity);

    // A verifier still at the old element count must reject the ciphertext.
    let long_message = vec![0x61u8; capacity + 1];
    let ciphertext = author.gen_author(&long_message, &mut rng).unwrap();

    let verifier = new_slot_crypto(&fixture.params, 0, fixture.server_keys_for(0, &mut rng));
    assert!(verifier
        .verify_client(&ciphertext, &fixture.client_pubs[0])
        .is_err());
}

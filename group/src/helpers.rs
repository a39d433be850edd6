// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use crypto_bigint::{Encoding, U2048};

/// Big-endian bytes into the working-width integer, left-padded with zeros.
///
/// Panics if `bytes` exceeds the working width; callers bound their inputs
/// by the modulus byte length first.
pub(crate) fn u2048_from_be(bytes: &[u8]) -> U2048 {
    assert!(bytes.len() <= 256, "input exceeds the 2048-bit working width");

    let mut buf = [0u8; 256];
    buf[256 - bytes.len()..].copy_from_slice(bytes);
    U2048::from_be_slice(&buf)
}

/// Hex string (without prefix) into the working-width integer.
pub(crate) fn u2048_from_be_hex(hex: &str) -> U2048 {
    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("fixed constant is valid hex"))
        .collect();

    u2048_from_be(&bytes)
}

/// Big-endian bytes of `value` with leading zeros removed.
pub(crate) fn trimmed_be_bytes(value: &U2048) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first_non_zero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());

    bytes[first_non_zero..].to_vec()
}

/// `0xff ‖ data ‖ 0xff` framing used by every byte-embedding flavor.
pub(crate) fn pad_message(data: &[u8]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(data.len() + 2);
    padded.push(0xff);
    padded.extend_from_slice(data);
    padded.push(0xff);

    padded
}

/// Strip the `0xff ‖ data ‖ 0xff` framing, if present.
pub(crate) fn unpad_message(padded: &[u8]) -> Option<Vec<u8>> {
    if padded.len() < 2 || padded[0] != 0xff || padded[padded.len() - 1] != 0xff {
        return None;
    }

    Some(padded[1..padded.len() - 1].to_vec())
}

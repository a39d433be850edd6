// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use sha2::{Digest, Sha256};

use crate::{CsRng, Error, Result, Scalar, U2048};

/// Byte strings under XOR, masquerading as a group of order two.
///
/// This flavor exists to exercise the DC-net bookkeeping at XOR speed. It
/// provides no secrecy whatsoever and must never leave test or benchmark
/// code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XorGroup {
    width: usize,
}

impl XorGroup {
    pub fn new(width: usize) -> Self {
        assert!(width >= 4, "the element width must hold the padding bytes");

        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn identity(&self) -> Vec<u8> {
        vec![0u8; self.width]
    }

    pub(crate) fn generator(&self) -> Vec<u8> {
        vec![0x01u8; self.width]
    }

    pub(crate) fn order(&self) -> U2048 {
        U2048::from_u64(2)
    }

    pub(crate) fn random_element(&self, rng: &mut impl CsRng) -> Vec<u8> {
        let mut out = vec![0u8; self.width];
        rng.fill_bytes(&mut out);

        out
    }

    pub(crate) fn mul(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        a.iter().zip(b).map(|(x, y)| x ^ y).collect()
    }

    /// Every element is its own inverse; exponents only matter modulo two.
    pub(crate) fn exp(&self, a: &[u8], e: &Scalar) -> Vec<u8> {
        if e.is_odd() {
            a.to_vec()
        } else {
            self.identity()
        }
    }

    pub(crate) fn encode_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let capacity = self.bytes_per_element();
        if data.len() > capacity {
            return Err(Error::MessageTooLong {
                got: data.len(),
                capacity,
            });
        }

        let mut out = vec![0u8; self.width];
        out[0] = 0xff;
        out[1..1 + data.len()].copy_from_slice(data);
        out[1 + data.len()] = 0xff;

        Ok(out)
    }

    pub(crate) fn decode_bytes(&self, a: &[u8]) -> Result<Vec<u8>> {
        let last_non_zero = a
            .iter()
            .rposition(|&b| b != 0)
            .ok_or(Error::BadPadding)?;
        if a[0] != 0xff || a[last_non_zero] != 0xff || last_non_zero < 1 {
            return Err(Error::BadPadding);
        }

        Ok(a[1..last_non_zero].to_vec())
    }

    pub(crate) fn hash_into_element(&self, tag: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width);
        let mut counter = 0u32;
        while out.len() < self.width {
            let mut hasher = Sha256::new();
            hasher.update(b"xor group element");
            hasher.update(tag);
            hasher.update(counter.to_le_bytes());
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(self.width);

        out
    }

    pub(crate) fn element_from_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() != self.width {
            return Err(Error::InvalidElement);
        }

        Ok(bytes.to_vec())
    }

    pub(crate) fn bytes_per_element(&self) -> usize {
        self.width - 2
    }
}

// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore};

pub use rand_core::{OsRng, SeedableRng};

/// A Cryptographically Secure Random Generator (CSRNG).
/// We use this trait in any exported functionality, in order to force consumers to use allowed random-generators.
///
/// Rust rules specify that you cannot implement a foreign trait for a foreign struct, and we count on that to force an allow-list.
/// This of-course could be circumvented, but we urge consumers not to.
///
/// We currently support ChaCha20 and OsRng.
pub trait CsRng: RngCore + CryptoRng + Send + Sync {}

impl CsRng for OsRng {}

impl CsRng for ChaCha20Rng {}

// Let `&mut dyn CsRng` and boxed generators flow into generic
// `impl CsRng` entry points.
impl<T: CsRng + ?Sized> CsRng for &mut T {}

impl<T: CsRng + ?Sized> CsRng for Box<T> {}

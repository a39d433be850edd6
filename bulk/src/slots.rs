// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Slot lifecycle: the open/close flags, per-slot element counts, the
//! four-byte in-band length advertisement and the always-open rotation.
//! Every participant recomputes the identical state from the cleartext
//! alone, so no extra metadata crosses the wire.

/// Hard cap on the advertised per-slot element count.
pub(crate) const MAX_ELEMENTS: usize = 65_536;

/// Phases an author idles before advertising a close.
pub(crate) const IDLE_CLOSE_THRESHOLD: u64 = 5;

/// The length-advertisement header: the next phase's element count for the
/// same slot, little-endian, in-band as the first four bytes of the
/// payload.
pub(crate) const HEADER_LEN: usize = 4;

pub(crate) fn encode_header(next_elements: u32) -> [u8; HEADER_LEN] {
    next_elements.to_le_bytes()
}

pub(crate) fn decode_header(payload: &[u8]) -> Option<(u32, &[u8])> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&payload[..HEADER_LEN]);

    Some((u32::from_le_bytes(header), &payload[HEADER_LEN..]))
}

/// The smallest element count whose plaintext holds `message_len` bytes
/// plus the header, capped at [`MAX_ELEMENTS`].
pub(crate) fn elements_for(message_len: usize, bytes_per_element: usize) -> usize {
    let needed = message_len + HEADER_LEN;
    let elements = needed.div_ceil(bytes_per_element).max(1);

    elements.min(MAX_ELEMENTS)
}

pub(crate) struct SlotLifecycle {
    open: Vec<bool>,
    lengths: Vec<usize>,
    always_open: usize,
}

impl SlotLifecycle {
    /// Every slot starts open at the parameter default.
    pub fn new(n_slots: usize, initial_elements: usize) -> Self {
        Self {
            open: vec![true; n_slots],
            lengths: vec![initial_elements; n_slots],
            always_open: 0,
        }
    }

    pub fn is_open(&self, slot: usize) -> bool {
        self.open[slot]
    }

    pub fn elements_for_slot(&self, slot: usize) -> usize {
        self.lengths[slot]
    }

    pub fn always_open(&self) -> usize {
        self.always_open
    }

    pub fn all_closed(&self) -> bool {
        self.open.iter().all(|open| !open)
    }

    /// Apply one phase's advertisements and rotate the always-open slot.
    ///
    /// `advertisements[i]` is the header decoded from slot `i`'s payload,
    /// or `None` when the slot produced no payload this phase (closed slot,
    /// or an author that never submitted), which leaves it unchanged.
    ///
    /// The rotation runs after the advertisements so the forced-open slot
    /// cannot be immediately re-closed by a stale zero advertisement.
    pub fn phase_boundary(&mut self, advertisements: &[Option<u32>]) {
        debug_assert_eq!(advertisements.len(), self.open.len());

        for (slot, advertisement) in advertisements.iter().enumerate() {
            match advertisement {
                Some(0) => self.open[slot] = false,
                Some(elements) => {
                    self.open[slot] = true;
                    self.lengths[slot] = (*elements as usize).min(MAX_ELEMENTS);
                }
                None => {}
            }
        }

        // Advance to the next closed slot and force it open at the minimum
        // length; if every slot is already open the index stays put.
        let n_slots = self.open.len();
        for step in 1..=n_slots {
            let candidate = (self.always_open + step) % n_slots;
            if !self.open[candidate] {
                self.always_open = candidate;
                self.open[candidate] = true;
                self.lengths[candidate] = 1;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_round_trip() {
        let (elements, rest) = decode_header(&[0x05, 0x00, 0x00, 0x00, 0xaa, 0xbb]).unwrap();
        assert_eq!(elements, 5);
        assert_eq!(rest, &[0xaa, 0xbb]);

        assert!(decode_header(&[1, 2, 3]).is_none());
        assert_eq!(encode_header(5), [0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn element_counts_grow_with_the_message() {
        let bpe = 61;
        assert_eq!(elements_for(0, bpe), 1);
        assert_eq!(elements_for(57, bpe), 1);
        assert_eq!(elements_for(58, bpe), 2);
        assert_eq!(elements_for(800, bpe), 14);
        assert_eq!(elements_for(usize::MAX / 2, bpe), MAX_ELEMENTS);
    }

    #[test]
    fn advertisements_drive_open_flags_and_lengths() {
        let mut lifecycle = SlotLifecycle::new(3, 2);

        lifecycle.phase_boundary(&[Some(4), Some(0), None]);

        assert!(lifecycle.is_open(0));
        assert_eq!(lifecycle.elements_for_slot(0), 4);
        assert!(lifecycle.is_open(2));
        assert_eq!(lifecycle.elements_for_slot(2), 2);

        // Slot 1 advertised a close, so the rotation lands on it and forces
        // it back open at the minimum length.
        assert_eq!(lifecycle.always_open(), 1);
        assert!(lifecycle.is_open(1));
        assert_eq!(lifecycle.elements_for_slot(1), 1);
    }

    #[test]
    fn the_rotation_stays_put_when_every_slot_is_open() {
        let mut lifecycle = SlotLifecycle::new(3, 2);

        lifecycle.phase_boundary(&[Some(1), Some(1), Some(1)]);
        assert_eq!(lifecycle.always_open(), 0);

        lifecycle.phase_boundary(&[Some(1), Some(1), Some(1)]);
        assert_eq!(lifecycle.always_open(), 0);
    }

    #[test]
    fn the_rotation_advances_strictly_through_closed_slots() {
        let mut lifecycle = SlotLifecycle::new(4, 2);

        // Everyone closes; the rotation walks one slot per phase.
        lifecycle.phase_boundary(&[Some(0), Some(0), Some(0), Some(0)]);
        assert_eq!(lifecycle.always_open(), 1);

        lifecycle.phase_boundary(&[Some(0), Some(0), Some(0), Some(0)]);
        assert_eq!(lifecycle.always_open(), 2);

        lifecycle.phase_boundary(&[Some(0), Some(0), Some(0), Some(0)]);
        assert_eq!(lifecycle.always_open(), 3);

        // The always-open invariant holds throughout.
        assert!(lifecycle.is_open(lifecycle.always_open()) || lifecycle.all_closed());
    }

    #[test]
    fn oversized_advertisements_are_capped() {
        let mut lifecycle = SlotLifecycle::new(2, 2);

        lifecycle.phase_boundary(&[Some(u32::MAX), None]);
        assert_eq!(lifecycle.elements_for_slot(0), MAX_ELEMENTS);
    }
}

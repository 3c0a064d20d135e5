//! Per-frame fragment accumulator.

use bytes::Bytes;

use crate::{FRAGMENT_BYTES, FRAME_CAPACITY};

// ── FragmentBuffer ────────────────────────────────────────────────────────────

/// Accumulates the fragments of one frame into a contiguous byte region.
///
/// Storage is allocated once and reused across frames via [`reset`]; under
/// sustained streaming no per-frame allocation happens until a completed
/// frame is copied out with [`to_bytes`].
///
/// The fragment count is unknown until the last-flagged fragment arrives, so
/// completion is tracked as a bitmask of received indices checked against
/// `last_index + 1`.
///
/// [`reset`]: FragmentBuffer::reset
/// [`to_bytes`]: FragmentBuffer::to_bytes
pub struct FragmentBuffer {
    /// Id claimed by the most recent fragment applied here. `None` until the
    /// buffer has seen any fragment since the last reset.
    frame_id: Option<u8>,
    /// Number of fragments in this frame, known once the last fragment is
    /// seen (`last_index + 1`).
    expected: Option<u8>,
    /// One bit per received fragment index. u32 so the full 16-fragment mask
    /// `(1 << 16) - 1` is representable.
    received_mask: u32,
    storage: Box<[u8]>,
    /// Bytes considered valid in `storage`: payload length of the last
    /// newly-written fragment plus its byte offset.
    size: usize,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self {
            frame_id: None,
            expected: None,
            received_mask: 0,
            storage: vec![0u8; FRAME_CAPACITY].into_boxed_slice(),
            size: 0,
        }
    }

    /// Clear all per-frame state, keeping the storage allocation. Idempotent.
    pub fn reset(&mut self) {
        self.frame_id = None;
        self.expected = None;
        self.received_mask = 0;
        self.size = 0;
    }

    /// Apply one fragment.
    ///
    /// The claimed `frame_id` is adopted unconditionally, so this field
    /// tracks the *latest* fragment's id rather than the id the buffer was
    /// opened for. A fragment whose index bit is already set is a duplicate
    /// and is ignored without touching storage or `size`.
    ///
    /// Caller guarantees `index < MAX_FRAGMENTS` and
    /// `payload.len() <= FRAGMENT_BYTES` (enforced at the receive boundary).
    pub fn handle_fragment(&mut self, frame_id: u8, is_last: bool, index: u8, payload: &[u8]) {
        debug_assert!((index as usize) < crate::MAX_FRAGMENTS);
        debug_assert!(payload.len() <= FRAGMENT_BYTES);

        self.frame_id = Some(frame_id);
        if is_last {
            self.expected = Some(index + 1);
        }

        let bit = 1u32 << index;
        if self.received_mask & bit == 0 {
            self.received_mask |= bit;
            let offset = index as usize * FRAGMENT_BYTES;
            self.storage[offset..offset + payload.len()].copy_from_slice(payload);
            self.size = payload.len() + offset;
        }
    }

    /// True once the last fragment has been seen and every index in
    /// `[0, expected)` has been received.
    pub fn is_complete(&self) -> bool {
        match self.expected {
            Some(count) => self.received_mask == (1u32 << count) - 1,
            None => false,
        }
    }

    /// Circular distance from this buffer's frame id to `other_id` in the
    /// 8-bit sequence space; 0 if no frame has been claimed yet.
    pub fn id_diff(&self, other_id: u8) -> u8 {
        match self.frame_id {
            Some(id) => other_id.wrapping_sub(id),
            None => 0,
        }
    }

    /// The reconstructed frame payload, copied out of the reusable storage.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.storage[..self.size])
    }

    pub fn frame_id(&self) -> Option<u8> {
        self.frame_id
    }

    /// Claim `frame_id` without applying a fragment, so the next arriving
    /// fragment for that id routes as `diff == 0`.
    pub(crate) fn seed(&mut self, frame_id: u8) {
        self.frame_id = Some(frame_id);
    }
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::FragmentBuffer;
    use crate::FRAGMENT_BYTES;

    fn full(byte: u8) -> Vec<u8> {
        vec![byte; FRAGMENT_BYTES]
    }

    #[test]
    fn completes_in_order_and_reconstructs_payload() {
        let mut buf = FragmentBuffer::new();
        buf.handle_fragment(7, false, 0, &full(0xaa));
        assert!(!buf.is_complete());
        buf.handle_fragment(7, false, 1, &full(0xbb));
        assert!(!buf.is_complete());
        buf.handle_fragment(7, true, 2, b"tail");
        assert!(buf.is_complete());

        let frame = buf.to_bytes();
        assert_eq!(frame.len(), 2 * FRAGMENT_BYTES + 4);
        assert_eq!(&frame[..FRAGMENT_BYTES], full(0xaa).as_slice());
        assert_eq!(&frame[FRAGMENT_BYTES..2 * FRAGMENT_BYTES], full(0xbb).as_slice());
        assert_eq!(&frame[2 * FRAGMENT_BYTES..], b"tail");
    }

    #[test]
    fn completes_regardless_of_arrival_order() {
        // Every permutation of three fragments, last flag on index 2.
        let orders: &[[u8; 3]] = &[
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut buf = FragmentBuffer::new();
            for (n, &index) in order.iter().enumerate() {
                assert!(!buf.is_complete(), "complete after {} of 3 ({:?})", n, order);
                let payload = if index == 2 { b"end".to_vec() } else { full(index) };
                buf.handle_fragment(3, index == 2, index, &payload);
            }
            assert!(buf.is_complete(), "incomplete after {:?}", order);
        }
    }

    #[test]
    fn duplicate_fragment_is_ignored() {
        let mut buf = FragmentBuffer::new();
        buf.handle_fragment(9, false, 0, &full(0x11));
        buf.handle_fragment(9, true, 1, b"short");
        let before = buf.to_bytes();

        // Same index again with different content: no mutation.
        buf.handle_fragment(9, false, 0, &full(0x22));
        assert!(buf.is_complete());
        assert_eq!(buf.to_bytes(), before);
    }

    #[test]
    fn out_of_order_size_reflects_last_written() {
        // `size` is maintained from the most recently newly-received
        // fragment, so a lower-index fragment applied after the last one
        // leaves it understating the true frame length. Observed behavior,
        // pinned here.
        let mut buf = FragmentBuffer::new();
        buf.handle_fragment(4, true, 1, b"0123456789");
        buf.handle_fragment(4, false, 0, &full(0x33));
        assert!(buf.is_complete());
        assert_eq!(buf.to_bytes().len(), FRAGMENT_BYTES);
    }

    #[test]
    fn id_diff_wraps_modulo_256() {
        let mut buf = FragmentBuffer::new();
        assert_eq!(buf.id_diff(200), 0);

        buf.handle_fragment(254, false, 0, b"x");
        assert_eq!(buf.id_diff(2), 4);

        buf.reset();
        buf.handle_fragment(0, false, 0, b"x");
        assert_eq!(buf.id_diff(255), 255);
    }

    #[test]
    fn frame_id_tracks_latest_fragment() {
        let mut buf = FragmentBuffer::new();
        buf.handle_fragment(10, false, 0, b"a");
        buf.handle_fragment(11, false, 1, b"b");
        assert_eq!(buf.frame_id(), Some(11));
    }

    #[test]
    fn reset_clears_state_and_is_idempotent() {
        let mut buf = FragmentBuffer::new();
        buf.handle_fragment(5, true, 0, b"whole frame");
        assert!(buf.is_complete());

        buf.reset();
        buf.reset();
        assert!(!buf.is_complete());
        assert_eq!(buf.frame_id(), None);
        assert_eq!(buf.to_bytes().len(), 0);
    }

    #[test]
    fn sixteen_fragment_frame_completes() {
        let mut buf = FragmentBuffer::new();
        for index in 0..16u8 {
            buf.handle_fragment(1, index == 15, index, &full(index));
        }
        assert!(buf.is_complete());
        assert_eq!(buf.to_bytes().len(), 16 * FRAGMENT_BYTES);
    }
}

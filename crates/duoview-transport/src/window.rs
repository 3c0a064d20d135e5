//! Two-slot sliding window over the frame sequence of one screen.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::fragment::FragmentBuffer;

/// Ids this far ahead (or, equivalently in the circular space, behind) are
/// considered outside the active window and dropped.
const STALE_DIFF: u8 = 7;

// ── WindowStats ───────────────────────────────────────────────────────────────

/// Counters kept per window; loss and resync events are also logged as they
/// happen.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowStats {
    pub frames_completed: u64,
    pub resyncs: u64,
    pub stale_dropped: u64,
}

// ── FrameWindow ───────────────────────────────────────────────────────────────

/// Routes incoming fragments to one of two reassembly slots and emits each
/// completed frame exactly once.
///
/// `current` is the most advanced frame with at least one accepted fragment;
/// `next`, when populated, holds exactly `current.frame_id + 1 (mod 256)` —
/// fragments of the following frame that overtook the current frame's tail.
/// Memory stays bounded to these two slots for the window's whole lifetime;
/// completing or abandoning a frame only ever resets or swaps them.
pub struct FrameWindow {
    current: FragmentBuffer,
    next: FragmentBuffer,
    stats: WindowStats,
}

impl FrameWindow {
    pub fn new() -> Self {
        Self {
            current: FragmentBuffer::new(),
            next: FragmentBuffer::new(),
            stats: WindowStats::default(),
        }
    }

    /// Apply one fragment for this screen. Returns the reassembled frame
    /// payload when this fragment completes a frame.
    ///
    /// Routing is by circular distance from `current`'s frame id:
    /// - `0` — the tracked frame itself;
    /// - `1` — the immediately following frame, accumulated in `next` until
    ///   either frame completes;
    /// - `2..7` — the tracked frame stalled while the stream moved on;
    ///   discard both slots and restart from the new id;
    /// - `>= 7` — stale or implausibly far ahead; dropped.
    pub fn handle_fragment(
        &mut self,
        frame_id: u8,
        is_last: bool,
        index: u8,
        payload: &[u8],
    ) -> Option<Bytes> {
        let diff = self.current.id_diff(frame_id);

        if diff == 0 {
            self.current.handle_fragment(frame_id, is_last, index, payload);
            if self.current.is_complete() {
                let frame = self.current.to_bytes();
                // Role exchange, not a copy: the slot that may already hold
                // fragments of the following frame becomes current.
                std::mem::swap(&mut self.current, &mut self.next);
                self.next.reset();
                self.stats.frames_completed += 1;
                return Some(frame);
            }
        } else if diff == 1 {
            self.next.handle_fragment(frame_id, is_last, index, payload);
            if self.next.is_complete() {
                // The following frame finished before the current one did;
                // the current frame is abandoned. Seed the window so the
                // subsequent id routes as the tracked frame from its first
                // fragment.
                let frame = self.next.to_bytes();
                self.current.reset();
                self.next.reset();
                self.current.seed(frame_id.wrapping_add(1));
                self.stats.frames_completed += 1;
                return Some(frame);
            }
        } else if diff < STALE_DIFF {
            debug!(
                "Resync: tracked frame {:?} stalled, restarting at frame {} (diff={})",
                self.current.frame_id(),
                frame_id,
                diff
            );
            self.stats.resyncs += 1;
            self.current.reset();
            self.next.reset();
            self.current.handle_fragment(frame_id, is_last, index, payload);
        } else {
            warn!(
                "Dropping stale fragment: frame_id={} index={} diff={} (window at {:?})",
                frame_id,
                index,
                diff,
                self.current.frame_id()
            );
            self.stats.stale_dropped += 1;
        }

        None
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }
}

impl Default for FrameWindow {
    fn default() -> Self {
        Self::new()
    }
}

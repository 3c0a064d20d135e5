//! duoview-transport — UDP frame reassembly for the dual-screen stream.
//!
//! The device encodes each screen's frames as JPEG and slices every frame
//! into fixed-size fragments, one per UDP datagram. Datagrams may arrive out
//! of order, duplicated, or not at all; this crate reassembles complete
//! frames out of that stream while keeping memory bounded to two in-flight
//! frames per screen.
//!
//! # Datagram Layout (4-byte header)
//!
//! ```text
//! [0]   frame_id   u8   wrapping frame sequence number (mod 256)
//! [1]   flags      u8   bit0 = screen (0 secondary, 1 primary)
//!                       bit4 = last-fragment marker
//! [2]   format     u8   opaque format tag, not interpreted here
//! [3]   index      u8   fragment index within the frame, 0–15
//! [4..] payload    [u8] fragment bytes, ≤ FRAGMENT_BYTES
//! ```
//!
//! # Architecture
//!
//! ```text
//! datagram ──► FrameReceiver ──► FrameWindow[screen] ──► FragmentBuffer
//!                  │                     │
//!                  │◄── completed frame ─┘
//!                  ▼
//!          (Screen, Bytes) to the caller, once per completed frame
//! ```
//!
//! A frame is complete when every fragment index up to the last-flagged one
//! has been received. Each [`FrameWindow`] tracks the frame in flight plus
//! the one immediately after it, which tolerates the dominant reordering
//! pattern on this transport: a following frame's first fragments overtaking
//! the current frame's tail.

pub mod fragment;
pub mod receiver;
pub mod window;

pub use fragment::FragmentBuffer;
pub use receiver::{FrameReceiver, ReceiverStats, StreamHandle};
pub use window::{FrameWindow, WindowStats};

// ── Wire constants ────────────────────────────────────────────────────────────

/// UDP port the device streams video to.
pub const VIDEO_PORT: u16 = 8001;

/// Fixed per-datagram header length.
pub const HEADER_SIZE: usize = 4;

/// Maximum payload bytes per fragment.
pub const FRAGMENT_BYTES: usize = 1444;

/// Fragment indices are 0–15, one bit each in the received mask.
pub const MAX_FRAGMENTS: usize = 16;

/// Storage capacity of one reassembly buffer (one maximum-size frame).
pub const FRAME_CAPACITY: usize = MAX_FRAGMENTS * FRAGMENT_BYTES;

/// Flags bit 4 marks the last fragment of a frame.
pub const LAST_FRAGMENT_FLAG: u8 = 0x10;

/// Reusable receive buffer length — comfortably above header + payload.
pub(crate) const DATAGRAM_BUFFER_LEN: usize = 2000;

use serde::{Deserialize, Serialize};

// MARK: - Screen

/// One of the device's two independent video channels.
///
/// Both screens are multiplexed over the same UDP port; bit 0 of the datagram
/// flags byte selects the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    Secondary = 0,
    Primary = 1,
}

impl Screen {
    /// Decode the screen from the datagram flags byte (bit 0, 1 = primary).
    pub fn from_flags(flags: u8) -> Self {
        if flags & 0x01 != 0 {
            Self::Primary
        } else {
            Self::Secondary
        }
    }

    /// Stable array index for screen-keyed dispatch tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secondary => write!(f, "secondary"),
            Self::Primary => write!(f, "primary"),
        }
    }
}

// MARK: - AssembledFrame

/// One complete encoded image for one screen, reassembled from its fragments.
///
/// `data` is a self-contained JPEG as sent by the device; no validation or
/// decoding happens on this side of the channel. Each completed frame is
/// delivered exactly once.
#[derive(Debug, Clone)]
pub struct AssembledFrame {
    pub screen: Screen,
    pub data: bytes::Bytes,
}

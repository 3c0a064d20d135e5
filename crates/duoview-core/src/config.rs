use serde::{Deserialize, Serialize};

use crate::types::Screen;

// MARK: - ReceiverConfig

/// Configuration for the UDP frame receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// UDP port the device streams to.
    pub port: u16,
    /// Kernel receive buffer size (`SO_RCVBUF`). Generously sized so bursty
    /// datagram arrival is absorbed while the consumer drains frames.
    pub recv_buffer_bytes: usize,
    /// How long a single `recv()` call waits for a datagram before reporting
    /// a recoverable timeout.
    pub recv_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: 8001,
            recv_buffer_bytes: 8 * 1024 * 1024,
            recv_timeout_ms: 100,
        }
    }
}

// MARK: - StreamParams

/// Parameters sent with the stream-start command on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamParams {
    /// Which screen the device should favour when bandwidth is tight.
    pub priority_screen: Screen,
    /// How strongly the prioritised screen is favoured over the other.
    pub priority_factor: u8,
    /// JPEG quality, 0–100.
    pub jpeg_quality: u8,
    /// Quality-of-service percentage the target bandwidth is derived from.
    pub qos_percent: u8,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            priority_screen: Screen::Primary,
            priority_factor: 5,
            jpeg_quality: 80,
            qos_percent: 100,
        }
    }
}

impl StreamParams {
    /// Returns a copy with quality and QoS clamped to their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.jpeg_quality = self.jpeg_quality.min(100);
        self.qos_percent = self.qos_percent.min(100);
        self
    }
}

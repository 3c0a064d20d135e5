//! duoview-control — fire-and-forget command channel to the device.
//!
//! The streaming device listens on a reliable TCP port for short,
//! fixed-layout command packets. A connection is opened per command, used
//! once, and closed; no reply is read. Commands either start/stop the UDP
//! video stream (with priority, quality, and bandwidth parameters) or write
//! a byte buffer to a target memory address on the device — the one-off
//! patch path. The reassembly core has no dependency on this channel beyond
//! being the reason datagrams eventually start arriving.
//!
//! # Packet Layout (80-byte header, little-endian)
//!
//! ```text
//! [0..4]    magic     u32       0x4456434C ("DVCL")
//! [4..8]    seq       u32       monotonically increasing per client
//! [8..12]   opcode    u32       command type
//! [12..76]  args      [u32;16]  command arguments
//! [76..80]  data_len  u32       payload byte count
//! [80..]    payload   [u8]      data_len bytes
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use duoview_core::StreamParams;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

// ── Constants ─────────────────────────────────────────────────────────────────

/// TCP port the device's command listener runs on.
pub const CONTROL_PORT: u16 = 8000;

const MAGIC: u32 = 0x4456_434C;
const ARG_WORDS: usize = 16;
const HEADER_SIZE: usize = 4 + 4 + 4 + ARG_WORDS * 4 + 4;

// ── Opcode ────────────────────────────────────────────────────────────────────

/// Command types understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Write the packet payload to a target memory address.
    WriteMemory = 10,
    /// Begin streaming both screens over UDP with the given parameters.
    StreamStart = 901,
    /// End the stream.
    StreamStop = 902,
}

// ── ControlClient ─────────────────────────────────────────────────────────────

/// Sends one-shot commands to the device.
///
/// Each call opens a fresh TCP connection, writes a single packet, and
/// closes. Connection or send failures are surfaced to the caller directly;
/// nothing is retried.
pub struct ControlClient {
    host: String,
    port: u16,
    seq: AtomicU32,
}

impl ControlClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_port(host, CONTROL_PORT)
    }

    pub fn with_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            seq: AtomicU32::new(1),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Ask the device to start streaming.
    ///
    /// Quality and QoS are clamped to their valid ranges before encoding.
    pub async fn start_stream(&self, params: &StreamParams) -> anyhow::Result<()> {
        let params = params.normalized();
        self.send_command(Opcode::StreamStart, stream_args(&params), &[]).await
    }

    /// Ask the device to stop streaming.
    pub async fn stop_stream(&self) -> anyhow::Result<()> {
        self.send_command(Opcode::StreamStop, [0u32; ARG_WORDS], &[]).await
    }

    /// Write `data` to `addr` on the device.
    pub async fn write_memory(&self, addr: u32, data: &[u8]) -> anyhow::Result<()> {
        let mut args = [0u32; ARG_WORDS];
        args[0] = addr;
        args[1] = data.len() as u32;
        self.send_command(Opcode::WriteMemory, args, data).await
    }

    // ── Transport ────────────────────────────────────────────────────────────

    async fn send_command(
        &self,
        opcode: Opcode,
        args: [u32; ARG_WORDS],
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let packet = encode_packet(seq, opcode, &args, payload);

        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("TCP connect to {}:{}", self.host, self.port))?;
        stream.set_nodelay(true)?;
        stream
            .write_all(&packet)
            .await
            .with_context(|| format!("Sending {:?} (seq={})", opcode, seq))?;
        stream.shutdown().await.context("Closing control connection")?;

        debug!(
            "Sent {:?} seq={} ({} header + {} payload bytes)",
            opcode,
            seq,
            HEADER_SIZE,
            payload.len()
        );
        Ok(())
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Argument words for [`Opcode::StreamStart`].
///
/// args[0] packs the prioritised screen and its scaling factor; args[1] is
/// the JPEG quality; args[2] is the target bandwidth in bytes per second.
fn stream_args(params: &StreamParams) -> [u32; ARG_WORDS] {
    let mut args = [0u32; ARG_WORDS];
    args[0] = ((params.priority_screen as u32) << 8) | params.priority_factor as u32;
    args[1] = params.jpeg_quality as u32;
    args[2] = qos_bytes_per_sec(params.qos_percent);
    args
}

/// Each QoS percentage point buys 1 Mbit/s of target bandwidth, expressed in
/// bytes per second on the wire.
fn qos_bytes_per_sec(percent: u8) -> u32 {
    percent as u32 * (1024 * 1024 / 8)
}

fn encode_packet(seq: u32, opcode: Opcode, args: &[u32; ARG_WORDS], payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
    packet.extend_from_slice(&MAGIC.to_le_bytes());
    packet.extend_from_slice(&seq.to_le_bytes());
    packet.extend_from_slice(&(opcode as u32).to_le_bytes());
    for arg in args {
        packet.extend_from_slice(&arg.to_le_bytes());
    }
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(payload);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;
    use duoview_core::Screen;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn packet_layout_is_fixed_and_little_endian() {
        let mut args = [0u32; ARG_WORDS];
        args[0] = 0x0102_0304;
        args[15] = 0xdead_beef;
        let packet = encode_packet(7, Opcode::StreamStart, &args, b"xyz");

        assert_eq!(packet.len(), HEADER_SIZE + 3);
        assert_eq!(&packet[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&packet[4..8], &7u32.to_le_bytes());
        assert_eq!(&packet[8..12], &901u32.to_le_bytes());
        assert_eq!(&packet[12..16], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&packet[72..76], &0xdead_beefu32.to_le_bytes());
        assert_eq!(&packet[76..80], &3u32.to_le_bytes());
        assert_eq!(&packet[80..], b"xyz");
    }

    #[test]
    fn stream_args_pack_priority_quality_and_bandwidth() {
        let params = StreamParams {
            priority_screen: Screen::Primary,
            priority_factor: 5,
            jpeg_quality: 80,
            qos_percent: 100,
        };
        let args = stream_args(&params);
        assert_eq!(args[0], (1 << 8) | 5);
        assert_eq!(args[1], 80);
        assert_eq!(args[2], 100 * 1024 * 1024 / 8);
        assert!(args[3..].iter().all(|&a| a == 0));
    }

    #[tokio::test]
    async fn write_memory_sends_one_packet_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener");
        let port = listener.local_addr().expect("addr").port();

        let client = ControlClient::with_port("127.0.0.1", port);
        let send = tokio::spawn(async move { client.write_memory(0x0030_0000, b"patch").await });

        let (mut conn, _) = listener.accept().await.expect("accept");
        let mut received = Vec::new();
        // read_to_end returning means the client closed its side.
        conn.read_to_end(&mut received).await.expect("read");
        send.await.expect("join").expect("send ok");

        assert_eq!(received.len(), HEADER_SIZE + 5);
        assert_eq!(&received[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&received[8..12], &10u32.to_le_bytes());
        assert_eq!(&received[12..16], &0x0030_0000u32.to_le_bytes());
        assert_eq!(&received[16..20], &5u32.to_le_bytes());
        assert_eq!(&received[76..80], &5u32.to_le_bytes());
        assert_eq!(&received[80..], b"patch");
    }

    #[tokio::test]
    async fn sequence_numbers_increase_across_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener");
        let port = listener.local_addr().expect("addr").port();
        let client = ControlClient::with_port("127.0.0.1", port);

        let mut seqs = Vec::new();
        for _ in 0..2 {
            let accept = listener.accept();
            let (_, (mut conn, _)) =
                tokio::join!(async { client.stop_stream().await.expect("send") }, async {
                    accept.await.expect("accept")
                });
            let mut received = Vec::new();
            conn.read_to_end(&mut received).await.expect("read");
            seqs.push(u32::from_le_bytes(received[4..8].try_into().expect("seq field")));
        }
        assert_eq!(seqs, vec![1, 2]);
    }
}

//! Datagram receive/dispatch loop.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use duoview_core::{AssembledFrame, ReceiverConfig, Screen, TransportError};

use crate::window::{FrameWindow, WindowStats};
use crate::{DATAGRAM_BUFFER_LEN, FRAGMENT_BYTES, HEADER_SIZE, LAST_FRAGMENT_FLAG, MAX_FRAGMENTS};

/// Completed frames buffered between the receive task and the consumer.
const FRAME_CHANNEL_CAPACITY: usize = 64;

// ── FragmentHeader ────────────────────────────────────────────────────────────

/// Decoded 4-byte datagram header (see the crate docs for the layout).
struct FragmentHeader {
    frame_id: u8,
    screen: Screen,
    is_last: bool,
    /// Opaque format tag from the device; carried for diagnostics only.
    format: u8,
    index: u8,
}

impl FragmentHeader {
    fn parse(datagram: &[u8]) -> Option<Self> {
        if datagram.len() < HEADER_SIZE {
            return None;
        }
        let flags = datagram[1];
        Some(Self {
            frame_id: datagram[0],
            screen: Screen::from_flags(flags),
            is_last: flags & LAST_FRAGMENT_FLAG != 0,
            format: datagram[2],
            index: datagram[3],
        })
    }
}

// ── ReceiverStats ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiverStats {
    pub datagrams_received: u64,
    /// Datagrams dropped at the boundary: truncated header, fragment index
    /// outside the mask width, or oversized payload.
    pub malformed_dropped: u64,
}

// ── FrameReceiver ─────────────────────────────────────────────────────────────

/// Owns the UDP socket and the per-screen frame windows.
///
/// All reassembly state is mutated exclusively by the task calling
/// [`recv`](FrameReceiver::recv), so the core needs no locking; use
/// [`spawn`](FrameReceiver::spawn) to run the loop on a dedicated task and
/// hand completed frames to a consumer over a channel.
pub struct FrameReceiver {
    socket: UdpSocket,
    /// Reusable receive buffer; never reallocated.
    recv_buf: Vec<u8>,
    windows: [FrameWindow; 2],
    timeout: Duration,
    stats: ReceiverStats,
}

impl FrameReceiver {
    // ── Construction ─────────────────────────────────────────────────────────

    /// Bind the video port with a generously sized kernel receive buffer.
    ///
    /// Bind or socket-setup failure is fatal and surfaced immediately.
    pub async fn bind(config: &ReceiverConfig) -> Result<Self, TransportError> {
        let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, config.port).into();

        let fail = |source: std::io::Error| TransportError::BindFailed {
            port: config.port,
            source,
        };

        // socket2 for SO_RCVBUF, then hand the fd to tokio.
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(fail)?;
        raw.set_recv_buffer_size(config.recv_buffer_bytes).map_err(fail)?;
        raw.set_nonblocking(true).map_err(fail)?;
        raw.bind(&addr.into()).map_err(fail)?;

        let socket = UdpSocket::from_std(raw.into()).map_err(fail)?;
        info!(
            "Frame receiver bound on {} (rcvbuf={} bytes, recv timeout={}ms)",
            socket.local_addr().map_err(fail)?,
            config.recv_buffer_bytes,
            config.recv_timeout_ms
        );

        Ok(Self {
            socket,
            recv_buf: vec![0u8; DATAGRAM_BUFFER_LEN],
            windows: [FrameWindow::new(), FrameWindow::new()],
            timeout: Duration::from_millis(config.recv_timeout_ms),
            stats: ReceiverStats::default(),
        })
    }

    // ── Receiving ─────────────────────────────────────────────────────────────

    /// Await one valid datagram, dispatch it, and report the outcome.
    ///
    /// Returns the screen the fragment belonged to, plus the reassembled
    /// frame payload when this fragment completed a frame. Malformed
    /// datagrams (truncated header, out-of-range index, oversized payload)
    /// are dropped and logged without ending the call; the whole call is
    /// bounded by one configured timeout, reported as the recoverable
    /// [`TransportError::Timeout`].
    pub async fn recv(&mut self) -> Result<(Screen, Option<Bytes>), TransportError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let (len, _peer) = match timeout_at(deadline, self.socket.recv_from(&mut self.recv_buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(TransportError::Timeout {
                        ms: self.timeout.as_millis() as u64,
                    })
                }
            };
            self.stats.datagrams_received += 1;

            let Some(header) = FragmentHeader::parse(&self.recv_buf[..len]) else {
                warn!("Dropping truncated datagram: {} bytes < {}-byte header", len, HEADER_SIZE);
                self.stats.malformed_dropped += 1;
                continue;
            };
            if header.index as usize >= MAX_FRAGMENTS {
                warn!(
                    "Dropping fragment with out-of-range index {}: frame_id={} screen={}",
                    header.index, header.frame_id, header.screen
                );
                self.stats.malformed_dropped += 1;
                continue;
            }
            let payload_len = len - HEADER_SIZE;
            if payload_len > FRAGMENT_BYTES {
                warn!(
                    "Dropping oversized fragment: {} payload bytes > {} (frame_id={})",
                    payload_len, FRAGMENT_BYTES, header.frame_id
                );
                self.stats.malformed_dropped += 1;
                continue;
            }

            trace!(
                "frag screen={} frame_id={} index={} last={} format={} len={}",
                header.screen, header.frame_id, header.index, header.is_last, header.format, payload_len
            );

            let image = self.windows[header.screen.index()].handle_fragment(
                header.frame_id,
                header.is_last,
                header.index,
                &self.recv_buf[HEADER_SIZE..len],
            );
            return Ok((header.screen, image));
        }
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Address the receiver is actually bound to (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn window_stats(&self, screen: Screen) -> WindowStats {
        self.windows[screen.index()].stats()
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Release the socket. Consuming, so a double close is unrepresentable.
    pub fn close(self) {
        drop(self);
    }

    // ── Spawned receive loop ──────────────────────────────────────────────────

    /// Run the receive loop on its own tokio task.
    ///
    /// Completed frames cross to the consumer over the returned bounded
    /// channel — never through shared state, since the reassembly buffers
    /// are reused the moment the loop moves on. The loop ends when
    /// [`StreamHandle::stop`] is signalled (a pending receive unblocks at
    /// the next timeout tick at the latest), when the consumer drops the
    /// frame channel, or on a fatal socket error (surfaced through
    /// [`StreamHandle::join`]).
    pub fn spawn(self) -> (StreamHandle, mpsc::Receiver<AssembledFrame>) {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(self, frame_tx, stop_rx));
        (StreamHandle { stop: stop_tx, task }, frame_rx)
    }

    /// Bind and spawn in one step, for callers that don't need the bound
    /// address first.
    pub async fn start(
        config: &ReceiverConfig,
    ) -> Result<(StreamHandle, mpsc::Receiver<AssembledFrame>), TransportError> {
        Ok(Self::bind(config).await?.spawn())
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

async fn receive_loop(
    mut receiver: FrameReceiver,
    frame_tx: mpsc::Sender<AssembledFrame>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let result = tokio::select! {
            // Also fires on stop-sender drop: dropping the handle cancels.
            _ = stop_rx.changed() => break,
            result = receiver.recv() => result,
        };

        match result {
            Ok((screen, Some(data))) => {
                if frame_tx.send(AssembledFrame { screen, data }).await.is_err() {
                    debug!("Frame consumer gone — stopping receive loop");
                    break;
                }
            }
            Ok((_, None)) => {}
            // Idle tick; loop around and re-check the stop signal.
            Err(TransportError::Timeout { .. }) => {}
            Err(e) => {
                warn!("Receive loop ending on fatal error: {}", e);
                return Err(e);
            }
        }
    }

    info!(
        "Receive loop stopped (datagrams={} malformed={})",
        receiver.stats.datagrams_received, receiver.stats.malformed_dropped
    );
    Ok(())
}

// ── StreamHandle ──────────────────────────────────────────────────────────────

/// Control handle for a spawned receive loop.
pub struct StreamHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), TransportError>>,
}

impl StreamHandle {
    /// Signal the loop to stop. The pending receive unblocks promptly.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the loop to finish and surface its exit result.
    pub async fn join(self) -> Result<(), TransportError> {
        self.task
            .await
            .unwrap_or_else(|e| Err(TransportError::Io(std::io::Error::other(e))))
    }
}

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Chunked Transport Driver
//!
//! [`FrameLink`] is the capability this crate assumes of the radio
//! stack: open a connection-oriented link to one peer, write
//! bounded-size frames that are acknowledged by the link layer, and
//! receive frames from the peer. Nothing here replaces the radio —
//! platform BLE plumbing implements the trait; tests and the relay use
//! the in-memory [`memory_pair`].
//!
//! [`ChunkTransport`] sits on top of one link and turns whole envelopes
//! into frame sequences and back. Writes use bounded retry with
//! exponential backoff; every wait is under a deadline; disconnecting
//! releases pending receivers with `TRANSPORT_DISCONNECTED` instead of
//! leaving them hanging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::identity::PeerId;
use crate::wire::chunk::{self, ChunkFrame, Reassembler};

// ---------------------------------------------------------------------------
// FrameLink
// ---------------------------------------------------------------------------

/// A connection-oriented link to a single peer.
///
/// Implementations must make `write_frame` resolve only once the link
/// layer acknowledged the write, and must make `next_frame` return
/// [`BeamError::TransportDisconnected`] promptly when the link drops —
/// pending waiters are released, never abandoned.
#[async_trait]
pub trait FrameLink: Send + Sync {
    /// The peer on the other end, as advertised at connection time.
    fn peer_id(&self) -> PeerId;

    /// `true` while the link is up.
    fn is_connected(&self) -> bool;

    /// Write one frame and wait for the link-layer ack.
    async fn write_frame(&self, frame: &[u8]) -> BeamResult<()>;

    /// Wait for the next inbound frame.
    async fn next_frame(&self) -> BeamResult<Vec<u8>>;

    /// Tear the link down. Idempotent.
    fn disconnect(&self);
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Tunables for the chunked transport. Defaults come from [`config`];
/// tests shrink them to keep the suite fast.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum data bytes per frame.
    pub frame_ceiling: usize,
    /// Deadline for a single frame write to be acknowledged.
    pub write_ack_timeout: Duration,
    /// Attempts per frame before surfacing `TRANSPORT_TIMEOUT`.
    pub write_retry_max: u32,
    /// Base delay for exponential backoff between retries.
    pub write_backoff_base: Duration,
    /// Partial reassembly sets older than this are discarded.
    pub reassembly_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_ceiling: config::DEFAULT_FRAME_CEILING,
            write_ack_timeout: config::WRITE_ACK_TIMEOUT,
            write_retry_max: config::WRITE_RETRY_MAX,
            write_backoff_base: config::WRITE_BACKOFF_BASE,
            reassembly_timeout: config::REASSEMBLY_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkTransport
// ---------------------------------------------------------------------------

/// Chunking send/receive driver over one [`FrameLink`].
pub struct ChunkTransport {
    link: Arc<dyn FrameLink>,
    config: TransportConfig,
    reassembler: Mutex<Reassembler>,
}

impl ChunkTransport {
    /// Wrap a link with the default tunables.
    pub fn new(link: Arc<dyn FrameLink>) -> Self {
        Self::with_config(link, TransportConfig::default())
    }

    /// Wrap a link with explicit tunables.
    pub fn with_config(link: Arc<dyn FrameLink>, config: TransportConfig) -> Self {
        let reassembler = Mutex::new(Reassembler::new(config.reassembly_timeout));
        Self {
            link,
            config,
            reassembler,
        }
    }

    /// The peer this transport talks to.
    pub fn peer_id(&self) -> PeerId {
        self.link.peer_id()
    }

    /// `true` while the underlying link is up.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Tear the link down, releasing any pending receive.
    pub fn disconnect(&self) {
        self.link.disconnect();
    }

    /// Send one whole message (an encoded envelope), chunked to the
    /// frame ceiling. Each frame write is retried with exponential
    /// backoff up to the attempt cap.
    pub async fn send(&self, payload: &[u8]) -> BeamResult<()> {
        let message_id = Uuid::new_v4();
        let frames = chunk::split(message_id, payload, self.config.frame_ceiling)?;
        tracing::debug!(
            peer = %self.link.peer_id(),
            message_id = %message_id,
            bytes = payload.len(),
            frames = frames.len(),
            "sending chunked message"
        );
        for frame in &frames {
            self.write_with_retry(&frame.to_bytes()).await?;
        }
        Ok(())
    }

    /// Wait for the next whole message from the peer.
    ///
    /// Frames for interleaved or abandoned messages are handled by the
    /// reassembler; this future resolves only when a complete message is
    /// available or the link fails.
    pub async fn recv(&self) -> BeamResult<Vec<u8>> {
        let peer = self.link.peer_id();
        loop {
            let bytes = self.link.next_frame().await?;
            let frame = match ChunkFrame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "dropping undecodable frame");
                    continue;
                }
            };
            let mut reassembler = self.reassembler.lock().await;
            if let Some(message) = reassembler.accept(&peer, frame)? {
                return Ok(message);
            }
        }
    }

    /// Like [`recv`](Self::recv) but bounded by a deadline.
    pub async fn recv_timeout(&self, deadline: Duration, stage: &'static str) -> BeamResult<Vec<u8>> {
        tokio::time::timeout(deadline, self.recv())
            .await
            .map_err(|_| BeamError::TransportTimeout { stage })?
    }

    /// Discard timed-out partial messages. Called from the periodic
    /// maintenance sweep.
    pub async fn sweep_reassembly(&self) -> Vec<BeamError> {
        self.reassembler.lock().await.sweep()
    }

    async fn write_with_retry(&self, frame: &[u8]) -> BeamResult<()> {
        let mut backoff = self.config.write_backoff_base;
        for attempt in 1..=self.config.write_retry_max {
            if !self.link.is_connected() {
                return Err(BeamError::TransportDisconnected);
            }
            match tokio::time::timeout(self.config.write_ack_timeout, self.link.write_frame(frame))
                .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(BeamError::TransportDisconnected)) => {
                    // No point retrying into a dead link.
                    return Err(BeamError::TransportDisconnected);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        peer = %self.link.peer_id(),
                        attempt,
                        error = %e,
                        "frame write failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        peer = %self.link.peer_id(),
                        attempt,
                        "frame write ack deadline elapsed"
                    );
                }
            }
            if attempt < self.config.write_retry_max {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(BeamError::TransportTimeout { stage: "write-ack" })
    }
}

// ---------------------------------------------------------------------------
// In-memory link
// ---------------------------------------------------------------------------

/// One end of an in-memory duplex link.
///
/// Faithful to the radio in the ways that matter to the protocol: frames
/// are delivered in order, `write_frame` resolves when the other end has
/// buffered the frame, and disconnecting either end releases both.
pub struct MemoryLink {
    peer: PeerId,
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    connected: Arc<AtomicBool>,
}

/// Build a connected pair of in-memory links.
///
/// `a_id`/`b_id` are the identities each end advertises: the link
/// returned first talks *to* `b_id`, the second *to* `a_id`.
pub fn memory_pair(a_id: PeerId, b_id: PeerId) -> (Arc<MemoryLink>, Arc<MemoryLink>) {
    // Capacity 1 keeps backpressure honest: a stalled reader stalls the
    // writer's ack, exactly like a saturated radio.
    let (a_tx, b_rx) = mpsc::channel(1);
    let (b_tx, a_rx) = mpsc::channel(1);
    let connected = Arc::new(AtomicBool::new(true));

    let a = Arc::new(MemoryLink {
        peer: b_id,
        tx: a_tx,
        rx: Mutex::new(a_rx),
        connected: Arc::clone(&connected),
    });
    let b = Arc::new(MemoryLink {
        peer: a_id,
        tx: b_tx,
        rx: Mutex::new(b_rx),
        connected,
    });
    (a, b)
}

#[async_trait]
impl FrameLink for MemoryLink {
    fn peer_id(&self) -> PeerId {
        self.peer.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write_frame(&self, frame: &[u8]) -> BeamResult<()> {
        if !self.is_connected() {
            return Err(BeamError::TransportDisconnected);
        }
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| BeamError::TransportDisconnected)
    }

    async fn next_frame(&self) -> BeamResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(BeamError::TransportDisconnected);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            frame = rx.recv() => frame.ok_or(BeamError::TransportDisconnected),
            _ = wait_for_disconnect(Arc::clone(&self.connected)) => {
                Err(BeamError::TransportDisconnected)
            }
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Poll-based disconnect watcher for the in-memory link. 10ms polling is
/// imperceptible next to real radio latencies and keeps the link free of
/// extra channels.
async fn wait_for_disconnect(connected: Arc<AtomicBool>) {
    while connected.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

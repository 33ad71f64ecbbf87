// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Chunk Frames & Reassembly
//!
//! A handshake envelope is ~300 bytes; an encrypted payment envelope can
//! exceed a kilobyte. The radio link delivers writes of at most a couple
//! hundred bytes. This module bridges the two: the sender splits an
//! encoded envelope into ordered frames, the receiver buffers them per
//! `(peer, message)` and reassembles once the set is complete.
//!
//! ## Frame layout
//!
//! Fixed 24-byte header followed by the data slice:
//!
//! ```text
//! ┌────────────────┬───────────┬───────────┬──────────────┐
//! │ message id 16B │ index u32 │ count u32 │ data ≤ceiling│
//! └────────────────┴───────────┴───────────┴──────────────┘
//! ```
//!
//! Integers are big-endian. The ceiling bounds the data portion and is
//! tuned below worst-case link MTU headroom (see
//! [`config::DEFAULT_FRAME_CEILING`]).
//!
//! ## Reassembly rules
//!
//! - Frames may arrive in any order within a message; the receiver
//!   reorders by index.
//! - One in-flight message per peer. Frames for a second concurrent
//!   message id are dropped until the first completes or times out —
//!   interleaving two messages on a serial link is always a sender bug.
//! - Partial sets older than the timeout are discarded to bound memory.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::identity::PeerId;

// ---------------------------------------------------------------------------
// ChunkFrame
// ---------------------------------------------------------------------------

/// One link-layer frame of a chunked message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Message this frame belongs to.
    pub message_id: Uuid,
    /// Zero-based position of this frame.
    pub index: u32,
    /// Total number of frames in the message.
    pub count: u32,
    /// This frame's slice of the message bytes.
    pub data: Vec<u8>,
}

impl ChunkFrame {
    /// Serialize to the binary wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(config::CHUNK_HEADER_LENGTH + self.data.len());
        out.extend_from_slice(self.message_id.as_bytes());
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse the binary wire form.
    pub fn from_bytes(bytes: &[u8]) -> BeamResult<Self> {
        if bytes.len() < config::CHUNK_HEADER_LENGTH {
            return Err(BeamError::MalformedEnvelope(format!(
                "chunk frame of {} bytes is shorter than the {} byte header",
                bytes.len(),
                config::CHUNK_HEADER_LENGTH
            )));
        }
        let message_id = Uuid::from_slice(&bytes[..16])
            .map_err(|e| BeamError::MalformedEnvelope(e.to_string()))?;
        let index = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let count = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        if count == 0 || index >= count {
            return Err(BeamError::MalformedEnvelope(format!(
                "chunk frame index {} out of range for count {}",
                index, count
            )));
        }
        Ok(Self {
            message_id,
            index,
            count,
            data: bytes[config::CHUNK_HEADER_LENGTH..].to_vec(),
        })
    }
}

/// Split a payload into frames whose data portions respect `ceiling`.
///
/// An empty payload still produces one (empty) frame so the receiver has
/// something to complete against.
pub fn split(message_id: Uuid, payload: &[u8], ceiling: usize) -> BeamResult<Vec<ChunkFrame>> {
    if ceiling == 0 {
        return Err(BeamError::MalformedEnvelope(
            "frame ceiling must be positive".into(),
        ));
    }
    let count = payload.len().div_ceil(ceiling).max(1);
    if count > u32::MAX as usize {
        return Err(BeamError::MalformedEnvelope(
            "payload needs more than u32::MAX frames".into(),
        ));
    }
    let frames = (0..count)
        .map(|i| {
            let start = i * ceiling;
            let end = usize::min(start + ceiling, payload.len());
            ChunkFrame {
                message_id,
                index: i as u32,
                count: count as u32,
                data: payload[start..end].to_vec(),
            }
        })
        .collect();
    Ok(frames)
}

// ---------------------------------------------------------------------------
// Reassembler
// ---------------------------------------------------------------------------

/// A partially received message.
struct InFlight {
    message_id: Uuid,
    count: u32,
    received: HashMap<u32, Vec<u8>>,
    started_at: Instant,
}

impl InFlight {
    fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.count
    }

    fn assemble(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for index in 0..self.count {
            // is_complete() guaranteed every index is present.
            if let Some(part) = self.received.remove(&index) {
                out.extend_from_slice(&part);
            }
        }
        out
    }
}

/// Per-peer frame buffer that turns ordered-or-not frames back into
/// whole messages.
pub struct Reassembler {
    in_flight: HashMap<PeerId, InFlight>,
    timeout: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(config::REASSEMBLY_TIMEOUT)
    }
}

impl Reassembler {
    /// A reassembler discarding partial sets older than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            in_flight: HashMap::new(),
            timeout,
        }
    }

    /// Feed one frame. Returns the completed message once the final
    /// frame of a set arrives, `None` while the set is still partial or
    /// when the frame was dropped (second concurrent message id).
    pub fn accept(&mut self, peer: &PeerId, frame: ChunkFrame) -> BeamResult<Option<Vec<u8>>> {
        // Timed-out partials make room for the new message.
        if let Some(pending) = self.in_flight.get(peer) {
            if pending.started_at.elapsed() >= self.timeout {
                tracing::warn!(
                    peer = %peer,
                    message_id = %pending.message_id,
                    received = pending.received.len(),
                    expected = pending.count,
                    "discarding timed-out partial message"
                );
                self.in_flight.remove(peer);
            }
        }

        let entry = self.in_flight.entry(peer.clone()).or_insert_with(|| InFlight {
            message_id: frame.message_id,
            count: frame.count,
            received: HashMap::new(),
            started_at: Instant::now(),
        });

        if entry.message_id != frame.message_id {
            // One in-flight message per peer; a second id is dropped
            // until the first completes or times out.
            tracing::warn!(
                peer = %peer,
                in_flight = %entry.message_id,
                dropped = %frame.message_id,
                "dropping frame for concurrent message"
            );
            return Ok(None);
        }
        if entry.count != frame.count {
            let expected = entry.count;
            self.in_flight.remove(peer);
            return Err(BeamError::MalformedEnvelope(format!(
                "frame count changed mid-message ({} -> {})",
                expected, frame.count
            )));
        }

        // Duplicate indices (link-layer retransmits) are idempotent.
        entry.received.entry(frame.index).or_insert(frame.data);

        if entry.is_complete() {
            let done = self
                .in_flight
                .remove(peer)
                .ok_or(BeamError::TransportDisconnected)?;
            return Ok(Some(done.assemble()));
        }
        Ok(None)
    }

    /// Discard partial sets older than the timeout. Returns one
    /// [`BeamError::ReassemblyIncomplete`] descriptor per discarded set
    /// so callers can surface or log them.
    pub fn sweep(&mut self) -> Vec<BeamError> {
        let timeout = self.timeout;
        let expired: Vec<PeerId> = self
            .in_flight
            .iter()
            .filter(|(_, p)| p.started_at.elapsed() >= timeout)
            .map(|(peer, _)| peer.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|peer| {
                self.in_flight.remove(&peer).map(|p| {
                    tracing::debug!(peer = %peer, message_id = %p.message_id, "reassembly sweep discarded partial");
                    BeamError::ReassemblyIncomplete {
                        message_id: p.message_id.to_string(),
                    }
                })
            })
            .collect()
    }

    /// Number of peers with a partial message buffered.
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(tag: &str) -> PeerId {
        PeerId::from_string(tag)
    }

    #[test]
    fn frame_roundtrip() {
        let frame = ChunkFrame {
            message_id: Uuid::new_v4(),
            index: 3,
            count: 9,
            data: vec![1, 2, 3, 4, 5],
        };
        let decoded = ChunkFrame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn truncated_frame_rejected() {
        assert!(ChunkFrame::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn index_out_of_range_rejected() {
        let mut bytes = ChunkFrame {
            message_id: Uuid::new_v4(),
            index: 0,
            count: 1,
            data: vec![],
        }
        .to_bytes();
        // Forge index = 5, count = 1.
        bytes[16..20].copy_from_slice(&5u32.to_be_bytes());
        assert!(ChunkFrame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn split_respects_ceiling() {
        let payload: Vec<u8> = (0..=99).collect();
        let frames = split(Uuid::new_v4(), &payload, 20).unwrap();
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|f| f.data.len() <= 20));
        assert!(frames.iter().all(|f| f.count == 5));
    }

    #[test]
    fn split_empty_payload_yields_one_frame() {
        let frames = split(Uuid::new_v4(), &[], 20).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.is_empty());
    }

    #[test]
    fn reassembly_in_order() {
        let payload: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();
        let frames = split(Uuid::new_v4(), &payload, 16).unwrap();
        let mut reassembler = Reassembler::default();
        let p = peer("a");

        let mut result = None;
        for frame in frames {
            result = reassembler.accept(&p, frame).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn reassembly_any_arrival_order() {
        let payload: Vec<u8> = (0..150).map(|i| (i * 7 % 256) as u8).collect();
        let mut frames = split(Uuid::new_v4(), &payload, 13).unwrap();
        // Reverse is the pathological order for a naive concatenator.
        frames.reverse();

        let mut reassembler = Reassembler::default();
        let p = peer("a");
        let mut result = None;
        for frame in frames {
            result = reassembler.accept(&p, frame).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn duplicate_frames_are_idempotent() {
        let payload = vec![9u8; 40];
        let frames = split(Uuid::new_v4(), &payload, 16).unwrap();
        let mut reassembler = Reassembler::default();
        let p = peer("a");

        assert!(reassembler.accept(&p, frames[0].clone()).unwrap().is_none());
        assert!(reassembler.accept(&p, frames[0].clone()).unwrap().is_none());
        assert!(reassembler.accept(&p, frames[1].clone()).unwrap().is_none());
        let result = reassembler.accept(&p, frames[2].clone()).unwrap();
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn concurrent_message_frames_dropped() {
        let first = split(Uuid::new_v4(), &[1u8; 40], 16).unwrap();
        let second = split(Uuid::new_v4(), &[2u8; 40], 16).unwrap();
        let mut reassembler = Reassembler::default();
        let p = peer("a");

        assert!(reassembler.accept(&p, first[0].clone()).unwrap().is_none());
        // Interleaved frame from a different message: dropped.
        assert!(reassembler.accept(&p, second[0].clone()).unwrap().is_none());
        assert!(reassembler.accept(&p, first[1].clone()).unwrap().is_none());
        let result = reassembler.accept(&p, first[2].clone()).unwrap();
        assert_eq!(result.unwrap(), vec![1u8; 40]);

        // The second message never completes from its dropped frame.
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn peers_do_not_share_buffers() {
        let payload_a = vec![1u8; 30];
        let payload_b = vec![2u8; 30];
        let frames_a = split(Uuid::new_v4(), &payload_a, 16).unwrap();
        let frames_b = split(Uuid::new_v4(), &payload_b, 16).unwrap();
        let mut reassembler = Reassembler::default();

        assert!(reassembler.accept(&peer("a"), frames_a[0].clone()).unwrap().is_none());
        assert!(reassembler.accept(&peer("b"), frames_b[0].clone()).unwrap().is_none());
        assert_eq!(
            reassembler.accept(&peer("a"), frames_a[1].clone()).unwrap().unwrap(),
            payload_a
        );
        assert_eq!(
            reassembler.accept(&peer("b"), frames_b[1].clone()).unwrap().unwrap(),
            payload_b
        );
    }

    #[test]
    fn stale_partial_discarded_then_new_message_accepted() {
        let mut reassembler = Reassembler::new(Duration::from_millis(0));
        let p = peer("a");
        let stale = split(Uuid::new_v4(), &[1u8; 40], 16).unwrap();
        let fresh = split(Uuid::new_v4(), &[2u8; 10], 16).unwrap();

        assert!(reassembler.accept(&p, stale[0].clone()).unwrap().is_none());
        // Zero timeout: the stale partial is discarded on the next frame,
        // and the new single-frame message completes immediately.
        let result = reassembler.accept(&p, fresh[0].clone()).unwrap();
        assert_eq!(result.unwrap(), vec![2u8; 10]);
    }

    #[test]
    fn sweep_reports_discarded_sets() {
        let mut reassembler = Reassembler::new(Duration::from_millis(0));
        let frames = split(Uuid::new_v4(), &[1u8; 40], 16).unwrap();
        reassembler.accept(&peer("a"), frames[0].clone()).unwrap();

        let discarded = reassembler.sweep();
        assert_eq!(discarded.len(), 1);
        assert!(matches!(
            discarded[0],
            BeamError::ReassemblyIncomplete { .. }
        ));
        assert_eq!(reassembler.pending_count(), 0);
    }
}

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! The session engine: owns every live session, seals and opens
//! envelopes, and enforces replay protection and idle expiry.
//!
//! One session per peer identity at a time. A new handshake for a peer
//! discards the superseded session outright — counters and keys are
//! never carried over. Nonces live only in memory: a restarted process
//! re-runs key exchange, it does not resume counting.

use std::time::{Duration, Instant};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use dashmap::DashMap;
use serde::Serialize;

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::identity::PeerId;
use crate::session::handshake::{
    HandshakeStage, InitiatorHandshake, KeyExchangeConfirm, KeyExchangeInit, KeyExchangeResponse,
    ResponderHandshake,
};
use crate::wire::envelope::{Envelope, EnvelopeType};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One live encrypted channel to a peer. Owned exclusively by the
/// engine; the fields the outside world may see travel via
/// [`SessionInfo`].
pub struct Session {
    /// Session id agreed during the handshake.
    pub session_id: String,
    /// The peer on the other end.
    pub peer_id: PeerId,
    key: [u8; 32],
    /// Last nonce we used for sending. Strictly increasing, never reused.
    send_nonce: u64,
    /// Highest nonce accepted from the peer. Anything at or below is a
    /// replay.
    recv_high_watermark: u64,
    created_at: Instant,
    last_used_at: Instant,
}

impl Session {
    fn new(session_id: String, peer_id: PeerId, key: [u8; 32]) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            peer_id,
            key,
            send_nonce: 0,
            recv_high_watermark: 0,
            created_at: now,
            last_used_at: now,
        }
    }

    fn is_expired(&self, idle_window: Duration) -> bool {
        self.last_used_at.elapsed() >= idle_window
    }
}

/// Observable session facts for status queries. No key material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// The peer the session belongs to.
    pub peer_id: PeerId,
    /// The session id.
    pub session_id: String,
    /// Last nonce sent.
    pub send_nonce: u64,
    /// Highest nonce accepted.
    pub recv_high_watermark: u64,
    /// Seconds since establishment.
    pub age_secs: u64,
    /// Seconds since last use.
    pub idle_secs: u64,
}

// ---------------------------------------------------------------------------
// SessionEngine
// ---------------------------------------------------------------------------

/// Owns sessions and in-flight handshakes for all peers. Every map is
/// keyed per peer — operations on one peer never lock out another.
pub struct SessionEngine {
    our_id: PeerId,
    sessions: DashMap<PeerId, Session>,
    pending_initiator: DashMap<PeerId, InitiatorHandshake>,
    pending_confirm: DashMap<PeerId, Session>,
    pending_responder: DashMap<PeerId, ResponderHandshake>,
    idle_window: Duration,
}

impl SessionEngine {
    /// Engine with the default idle expiry window.
    pub fn new(our_id: PeerId) -> Self {
        Self::with_idle_window(our_id, config::SESSION_IDLE_EXPIRY)
    }

    /// Engine with an explicit idle window (tests use tiny ones).
    pub fn with_idle_window(our_id: PeerId, idle_window: Duration) -> Self {
        Self {
            our_id,
            sessions: DashMap::new(),
            pending_initiator: DashMap::new(),
            pending_confirm: DashMap::new(),
            pending_responder: DashMap::new(),
            idle_window,
        }
    }

    /// Our own peer id.
    pub fn our_id(&self) -> &PeerId {
        &self.our_id
    }

    // --- Initiator side ---------------------------------------------------

    /// Start (or restart) a handshake toward `peer`. Any superseded
    /// session or half-done handshake for the peer is discarded.
    pub fn begin_handshake(&self, peer: &PeerId) -> KeyExchangeInit {
        self.sessions.remove(peer);
        self.pending_confirm.remove(peer);
        let (state, init) = InitiatorHandshake::begin(self.our_id.clone());
        tracing::debug!(peer = %peer, session = %init.session_id, "key exchange initiated");
        self.pending_initiator.insert(peer.clone(), state);
        init
    }

    /// Process the responder's answer. Returns the authentication
    /// challenge that must be signed into the confirm. The derived
    /// session is parked until [`confirm_sent`](Self::confirm_sent) —
    /// the channel is only established once the confirm is on the wire.
    pub fn handle_response(
        &self,
        peer: &PeerId,
        response: &KeyExchangeResponse,
    ) -> BeamResult<Vec<u8>> {
        let (_, state) = self
            .pending_initiator
            .remove(peer)
            .ok_or_else(|| BeamError::KeyExchangeFailed("no handshake in flight".into()))?;
        let session_id = response.session_id.clone();
        let (key, responder_id, challenge) = state.complete(response)?;
        self.pending_confirm
            .insert(peer.clone(), Session::new(session_id, responder_id, key));
        Ok(challenge)
    }

    /// Mark the confirm as sent, promoting the parked session to
    /// `Established`.
    pub fn confirm_sent(&self, peer: &PeerId) -> BeamResult<()> {
        let (_, session) = self
            .pending_confirm
            .remove(peer)
            .ok_or_else(|| BeamError::KeyExchangeFailed("no session awaiting confirm".into()))?;
        tracing::info!(peer = %peer, session = %session.session_id, "session established (initiator)");
        self.sessions.insert(peer.clone(), session);
        Ok(())
    }

    // --- Responder side ---------------------------------------------------

    /// Answer a `key_exchange_init`, embedding the trust layer's
    /// challenge. The derived key is parked until the confirm proves the
    /// initiator's identity.
    pub fn respond_handshake(
        &self,
        init: &KeyExchangeInit,
        challenge: Vec<u8>,
    ) -> BeamResult<KeyExchangeResponse> {
        let peer = init.peer_id.clone();
        self.sessions.remove(&peer);
        let (state, response) =
            ResponderHandshake::respond(init, self.our_id.clone(), challenge)?;
        tracing::debug!(peer = %peer, session = %response.session_id, "key exchange response sent");
        self.pending_responder.insert(peer, state);
        Ok(response)
    }

    /// Install the session after the confirm's identity proof has been
    /// verified by the trust layer.
    pub fn handle_confirm(&self, peer: &PeerId, confirm: &KeyExchangeConfirm) -> BeamResult<()> {
        let (_, state) = self
            .pending_responder
            .remove(peer)
            .ok_or_else(|| BeamError::KeyExchangeFailed("no handshake awaiting confirm".into()))?;
        let session_id = state.session_id().to_string();
        let key = state.finish(confirm)?;
        tracing::info!(peer = %peer, session = %session_id, "session established (responder)");
        self.sessions
            .insert(peer.clone(), Session::new(session_id, peer.clone(), key));
        Ok(())
    }

    // --- Encrypted channel ------------------------------------------------

    /// Encrypt `plaintext` into a sealed envelope for `peer`.
    ///
    /// The send nonce is a strictly increasing counter; the AES-GCM
    /// nonce is derived from it, so a counter value is never reused
    /// under a session key. The envelope header is bound as associated
    /// data.
    pub fn seal(
        &self,
        peer: &PeerId,
        envelope_type: EnvelopeType,
        plaintext: &[u8],
    ) -> BeamResult<Envelope> {
        let mut entry = self.session_entry(peer)?;
        let session = entry.value_mut();

        session.send_nonce += 1;
        let nonce = session.send_nonce;

        let mut envelope = Envelope::sealed(
            envelope_type,
            session.session_id.clone(),
            nonce,
            Vec::new(),
            Vec::new(),
        );
        let aad = envelope.header_bytes();

        let cipher = Aes256Gcm::new_from_slice(&session.key)
            .map_err(|_| BeamError::KeyExchangeFailed("bad session key length".into()))?;
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&aes_nonce(nonce)),
                Payload { msg: plaintext, aad: &aad },
            )
            .map_err(|_| BeamError::DecryptFailed)?;

        let tag = sealed.split_off(sealed.len() - config::AES_TAG_LENGTH);
        envelope.payload = sealed;
        envelope.auth_tag = Some(tag);
        session.last_used_at = Instant::now();
        Ok(envelope)
    }

    /// Decrypt a sealed envelope from `peer`.
    ///
    /// Rejects replays (nonce at or below the high-watermark) with
    /// `REPLAY_DETECTED`; any tag or header mismatch is `DECRYPT_FAILED`
    /// with no further detail.
    pub fn open(&self, peer: &PeerId, envelope: &Envelope) -> BeamResult<Vec<u8>> {
        let mut entry = self.session_entry(peer)?;
        let session = entry.value_mut();

        let nonce = envelope
            .nonce
            .ok_or_else(|| BeamError::MalformedEnvelope("sealed envelope without nonce".into()))?;
        let tag = envelope
            .auth_tag
            .as_ref()
            .ok_or_else(|| BeamError::MalformedEnvelope("sealed envelope without tag".into()))?;
        if envelope.session_id.as_deref() != Some(session.session_id.as_str()) {
            return Err(BeamError::DecryptFailed);
        }
        if nonce <= session.recv_high_watermark {
            return Err(BeamError::ReplayDetected {
                nonce,
                high_watermark: session.recv_high_watermark,
            });
        }

        let aad = envelope.header_bytes();
        let mut ciphertext = envelope.payload.clone();
        ciphertext.extend_from_slice(tag);

        let cipher = Aes256Gcm::new_from_slice(&session.key)
            .map_err(|_| BeamError::DecryptFailed)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&aes_nonce(nonce)),
                Payload { msg: &ciphertext, aad: &aad },
            )
            .map_err(|_| BeamError::DecryptFailed)?;

        session.recv_high_watermark = nonce;
        session.last_used_at = Instant::now();
        Ok(plaintext)
    }

    // --- Lifecycle --------------------------------------------------------

    /// `true` if a live (non-expired) session exists for `peer`.
    pub fn has_session(&self, peer: &PeerId) -> bool {
        match self.sessions.get(peer) {
            Some(session) => !session.is_expired(self.idle_window),
            None => false,
        }
    }

    /// Drop the peer's session (after a decrypt failure the channel is
    /// not assumed compromised, but it is re-negotiated, not reused).
    pub fn discard(&self, peer: &PeerId) {
        if self.sessions.remove(peer).is_some() {
            tracing::info!(peer = %peer, "session discarded");
        }
    }

    /// Purge expired sessions and stale half-done handshakes. Returns
    /// how many sessions were removed.
    pub fn expire_idle(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|peer, session| {
                let keep = !session.is_expired(self.idle_window);
                if !keep {
                    tracing::info!(peer = %peer, session = %session.session_id, "session expired");
                }
                keep
            });
        before - self.sessions.len()
    }

    /// Where the peer's handshake/session currently stands.
    pub fn stage(&self, peer: &PeerId) -> HandshakeStage {
        if let Some(session) = self.sessions.get(peer) {
            return if session.is_expired(self.idle_window) {
                HandshakeStage::Expired
            } else {
                HandshakeStage::Established
            };
        }
        if self.pending_confirm.contains_key(peer) {
            return HandshakeStage::ResponseReceived;
        }
        if self.pending_initiator.contains_key(peer) || self.pending_responder.contains_key(peer) {
            return HandshakeStage::InitSent;
        }
        HandshakeStage::None
    }

    /// Live session count.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Status snapshot across all sessions. No key material leaves the
    /// engine.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo {
                peer_id: entry.key().clone(),
                session_id: entry.session_id.clone(),
                send_nonce: entry.send_nonce,
                recv_high_watermark: entry.recv_high_watermark,
                age_secs: entry.created_at.elapsed().as_secs(),
                idle_secs: entry.last_used_at.elapsed().as_secs(),
            })
            .collect()
    }

    fn session_entry(
        &self,
        peer: &PeerId,
    ) -> BeamResult<dashmap::mapref::one::RefMut<'_, PeerId, Session>> {
        match self.sessions.get_mut(peer) {
            Some(entry) if !entry.is_expired(self.idle_window) => Ok(entry),
            Some(entry) => {
                let session_id = entry.session_id.clone();
                drop(entry);
                self.sessions.remove(peer);
                tracing::info!(peer = %peer, session = %session_id, "expired session purged");
                Err(BeamError::AuthRequired)
            }
            None => Err(BeamError::AuthRequired),
        }
    }
}

/// 96-bit AES-GCM nonce from the session counter: four zero bytes then
/// the counter big-endian. Unique per key because the counter is.
fn aes_nonce(counter: u64) -> [u8; config::AES_NONCE_LENGTH] {
    let mut nonce = [0u8; config::AES_NONCE_LENGTH];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a full handshake between two engines and return them.
    fn established_pair() -> (SessionEngine, SessionEngine, PeerId, PeerId) {
        let alice_id = PeerId::from_string("alice");
        let bob_id = PeerId::from_string("bob");
        let alice = SessionEngine::new(alice_id.clone());
        let bob = SessionEngine::new(bob_id.clone());
        handshake(&alice, &bob, &alice_id, &bob_id);
        (alice, bob, alice_id, bob_id)
    }

    fn handshake(alice: &SessionEngine, bob: &SessionEngine, alice_id: &PeerId, bob_id: &PeerId) {
        let init = alice.begin_handshake(bob_id);
        let response = bob.respond_handshake(&init, vec![9u8; 32]).unwrap();
        let challenge = alice.handle_response(bob_id, &response).unwrap();
        assert_eq!(challenge, vec![9u8; 32]);
        let confirm = KeyExchangeConfirm {
            session_id: response.session_id.clone(),
            identity_key: vec![0; 32],
            challenge_signature: vec![0; 64],
        };
        alice.confirm_sent(bob_id).unwrap();
        bob.handle_confirm(alice_id, &confirm).unwrap();
    }

    #[test]
    fn seal_open_roundtrip() {
        let (alice, bob, alice_id, bob_id) = established_pair();
        let envelope = alice
            .seal(&bob_id, EnvelopeType::PaymentRequest, b"pay bob 5.0")
            .unwrap();
        assert_eq!(envelope.nonce, Some(1));
        let plaintext = bob.open(&alice_id, &envelope).unwrap();
        assert_eq!(plaintext, b"pay bob 5.0");
    }

    #[test]
    fn nonces_strictly_increase() {
        let (alice, _, _, bob_id) = established_pair();
        let e1 = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"1").unwrap();
        let e2 = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"2").unwrap();
        assert!(e2.nonce.unwrap() > e1.nonce.unwrap());
    }

    #[test]
    fn replay_rejected_even_with_valid_tag() {
        let (alice, bob, alice_id, bob_id) = established_pair();
        let envelope = alice
            .seal(&bob_id, EnvelopeType::PaymentRequest, b"once")
            .unwrap();
        bob.open(&alice_id, &envelope).unwrap();

        // Bit-for-bit identical envelope, valid ciphertext and tag.
        let err = bob.open(&alice_id, &envelope).unwrap_err();
        assert!(matches!(err, BeamError::ReplayDetected { nonce: 1, high_watermark: 1 }));
    }

    #[test]
    fn stale_nonce_below_watermark_rejected() {
        let (alice, bob, alice_id, bob_id) = established_pair();
        let first = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"1").unwrap();
        let second = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"2").unwrap();
        bob.open(&alice_id, &second).unwrap();
        let err = bob.open(&alice_id, &first).unwrap_err();
        assert!(matches!(err, BeamError::ReplayDetected { .. }));
    }

    #[test]
    fn tampered_ciphertext_fails_generically() {
        let (alice, bob, alice_id, bob_id) = established_pair();
        let mut envelope = alice
            .seal(&bob_id, EnvelopeType::PaymentRequest, b"intact")
            .unwrap();
        envelope.payload[0] ^= 0xFF;
        assert!(matches!(
            bob.open(&alice_id, &envelope),
            Err(BeamError::DecryptFailed)
        ));
    }

    #[test]
    fn tampered_header_voids_the_tag() {
        let (alice, bob, alice_id, bob_id) = established_pair();
        let mut envelope = alice
            .seal(&bob_id, EnvelopeType::PaymentRequest, b"intact")
            .unwrap();
        // Header is not encrypted, but it is authenticated.
        envelope.envelope_type = EnvelopeType::ReceiverReady;
        assert!(matches!(
            bob.open(&alice_id, &envelope),
            Err(BeamError::DecryptFailed)
        ));
    }

    #[test]
    fn expired_session_cannot_decrypt() {
        let alice_id = PeerId::from_string("alice");
        let bob_id = PeerId::from_string("bob");
        let alice = SessionEngine::new(alice_id.clone());
        let bob = SessionEngine::with_idle_window(bob_id.clone(), Duration::from_millis(0));
        handshake(&alice, &bob, &alice_id, &bob_id);

        let envelope = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"late").unwrap();
        // Bob's zero idle window expired the session immediately.
        assert!(matches!(
            bob.open(&alice_id, &envelope),
            Err(BeamError::AuthRequired)
        ));
        assert!(!bob.has_session(&alice_id));
    }

    #[test]
    fn rekey_after_expiry_succeeds() {
        let alice_id = PeerId::from_string("alice");
        let bob_id = PeerId::from_string("bob");
        let alice = SessionEngine::with_idle_window(alice_id.clone(), Duration::from_millis(0));
        let bob = SessionEngine::new(bob_id.clone());
        handshake(&alice, &bob, &alice_id, &bob_id);
        assert!(!alice.has_session(&bob_id));

        // The next send path re-runs key exchange and works again.
        handshake(&alice, &bob, &alice_id, &bob_id);
        // (Fresh engine window applies per seal; re-handshake resets last_used.)
        let bob2 = bob.seal(&alice_id, EnvelopeType::ReceiverReady, b"ready").unwrap();
        assert!(bob2.nonce.is_some());
    }

    #[test]
    fn new_handshake_supersedes_old_session() {
        let (alice, bob, alice_id, bob_id) = established_pair();
        let old = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"old").unwrap();
        bob.open(&alice_id, &old).unwrap();

        handshake(&alice, &bob, &alice_id, &bob_id);
        // Counters restarted with the new session.
        let fresh = alice.seal(&bob_id, EnvelopeType::PaymentRequest, b"new").unwrap();
        assert_eq!(fresh.nonce, Some(1));
        assert_eq!(bob.open(&alice_id, &fresh).unwrap(), b"new");
        assert_ne!(old.session_id, fresh.session_id);
    }

    #[test]
    fn open_without_session_is_auth_required() {
        let engine = SessionEngine::new(PeerId::from_string("solo"));
        let envelope = Envelope::sealed(
            EnvelopeType::PaymentRequest,
            "ghost".into(),
            1,
            vec![0; 16],
            vec![1, 2, 3],
        );
        assert!(matches!(
            engine.open(&PeerId::from_string("stranger"), &envelope),
            Err(BeamError::AuthRequired)
        ));
    }

    #[test]
    fn expire_idle_purges_and_counts() {
        let alice_id = PeerId::from_string("alice");
        let bob_id = PeerId::from_string("bob");
        let alice = SessionEngine::with_idle_window(alice_id.clone(), Duration::from_millis(0));
        let bob = SessionEngine::new(bob_id.clone());
        handshake(&alice, &bob, &alice_id, &bob_id);

        assert_eq!(alice.expire_idle(), 1);
        assert_eq!(alice.session_count(), 0);
        assert_eq!(alice.stage(&bob_id), HandshakeStage::None);
    }
}

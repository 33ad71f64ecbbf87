// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! Key-exchange messages and the per-side handshake state.
//!
//! The initiator holds an [`InitiatorHandshake`] between sending the
//! init and receiving the response; the responder holds a
//! [`ResponderHandshake`] between sending the response and receiving the
//! confirm. Both are consumed exactly once — the ephemeral secret is
//! spent by the DH computation, which the type system enforces.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::identity::PeerId;
use crate::wire::b64;

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Round 1: initiator → responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeInit {
    /// Session id the initiator proposes (UUIDv4).
    pub session_id: String,
    /// Initiator's claimed peer id.
    pub peer_id: PeerId,
    /// Initiator's ephemeral X25519 public key.
    #[serde(with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
    /// Fresh random value mixed into the KDF.
    #[serde(with = "b64")]
    pub random: Vec<u8>,
}

/// Round 2: responder → initiator. Carries the responder's half of the
/// key agreement plus the authentication challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    /// Echoes the session id from the init.
    pub session_id: String,
    /// Responder's claimed peer id.
    pub peer_id: PeerId,
    /// Responder's ephemeral X25519 public key.
    #[serde(with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
    /// Fresh random value mixed into the KDF.
    #[serde(with = "b64")]
    pub random: Vec<u8>,
    /// Authentication challenge the initiator must sign.
    #[serde(with = "b64")]
    pub challenge: Vec<u8>,
}

/// Round 3: initiator → responder. Proves control of the claimed
/// identity; completes the session on the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeConfirm {
    /// Echoes the session id.
    pub session_id: String,
    /// Initiator's Ed25519 identity (verifying) key.
    #[serde(with = "b64")]
    pub identity_key: Vec<u8>,
    /// Ed25519 signature over `challenge || peer_id`.
    #[serde(with = "b64")]
    pub challenge_signature: Vec<u8>,
}

/// Where a peer's handshake currently stands. Tracked by the engine for
/// observability; the data itself lives in the typed states below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// No handshake in flight.
    None,
    /// Initiator: init sent, waiting for the response.
    InitSent,
    /// Initiator: response received, confirm on the wire.
    ResponseReceived,
    /// Session established.
    Established,
    /// Session expired; the next send re-keys.
    Expired,
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive the session key: BLAKE3 `derive_key` over the DH shared secret,
/// both randoms, and both peer ids (initiator first). Both ends must feed
/// the exact same byte sequence, so ordering is by role, not by arrival.
fn derive_session_key(
    shared_secret: &[u8; 32],
    initiator_random: &[u8],
    responder_random: &[u8],
    initiator: &PeerId,
    responder: &PeerId,
) -> [u8; 32] {
    let mut ikm = Vec::with_capacity(32 + initiator_random.len() + responder_random.len() + 64);
    ikm.extend_from_slice(shared_secret);
    ikm.extend_from_slice(initiator_random);
    ikm.extend_from_slice(responder_random);
    ikm.extend_from_slice(initiator.as_str().as_bytes());
    ikm.extend_from_slice(responder.as_str().as_bytes());
    blake3::derive_key(config::SESSION_KEY_CONTEXT, &ikm)
}

fn fresh_random() -> Vec<u8> {
    let mut random = vec![0u8; config::KEY_EXCHANGE_RANDOM_LENGTH];
    OsRng.fill_bytes(&mut random);
    random
}

fn ephemeral_pair() -> (EphemeralSecret, [u8; 32]) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = X25519PublicKey::from(&secret).to_bytes();
    (secret, public)
}

fn peer_public_key(bytes: &[u8]) -> BeamResult<X25519PublicKey> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| BeamError::KeyExchangeFailed("ephemeral key must be 32 bytes".into()))?;
    Ok(X25519PublicKey::from(array))
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Initiator-side state between init and response.
pub struct InitiatorHandshake {
    session_id: String,
    our_id: PeerId,
    our_random: Vec<u8>,
    ephemeral_secret: EphemeralSecret,
}

impl InitiatorHandshake {
    /// Start a handshake: generate the ephemeral pair and the init
    /// message.
    pub fn begin(our_id: PeerId) -> (Self, KeyExchangeInit) {
        let (ephemeral_secret, ephemeral_public) = ephemeral_pair();
        let session_id = Uuid::new_v4().to_string();
        let random = fresh_random();

        let init = KeyExchangeInit {
            session_id: session_id.clone(),
            peer_id: our_id.clone(),
            ephemeral_public_key: ephemeral_public.to_vec(),
            random: random.clone(),
        };
        let state = Self {
            session_id,
            our_id,
            our_random: random,
            ephemeral_secret,
        };
        (state, init)
    }

    /// The proposed session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Consume the response: complete the DH exchange and derive the
    /// session key. Returns the key, the responder's peer id, and the
    /// challenge still to be signed.
    pub fn complete(
        self,
        response: &KeyExchangeResponse,
    ) -> BeamResult<([u8; 32], PeerId, Vec<u8>)> {
        if response.session_id != self.session_id {
            return Err(BeamError::KeyExchangeFailed(format!(
                "response for session {} while negotiating {}",
                response.session_id, self.session_id
            )));
        }
        let their_public = peer_public_key(&response.ephemeral_public_key)?;
        let shared = self.ephemeral_secret.diffie_hellman(&their_public);
        let key = derive_session_key(
            shared.as_bytes(),
            &self.our_random,
            &response.random,
            &self.our_id,
            &response.peer_id,
        );
        Ok((key, response.peer_id.clone(), response.challenge.clone()))
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Responder-side state between response and confirm.
pub struct ResponderHandshake {
    session_id: String,
    session_key: [u8; 32],
    peer_id: PeerId,
}

impl ResponderHandshake {
    /// Answer an init: generate our ephemeral pair, derive the session
    /// key immediately (the responder needs no second DH step), and
    /// embed the supplied authentication challenge.
    ///
    /// The key is held, not installed — the session only becomes live
    /// once the confirm proves the initiator's identity.
    pub fn respond(
        init: &KeyExchangeInit,
        our_id: PeerId,
        challenge: Vec<u8>,
    ) -> BeamResult<(Self, KeyExchangeResponse)> {
        let (ephemeral_secret, ephemeral_public) = ephemeral_pair();
        let their_public = peer_public_key(&init.ephemeral_public_key)?;
        let shared = ephemeral_secret.diffie_hellman(&their_public);

        let random = fresh_random();
        let session_key = derive_session_key(
            shared.as_bytes(),
            &init.random,
            &random,
            &init.peer_id,
            &our_id,
        );

        let response = KeyExchangeResponse {
            session_id: init.session_id.clone(),
            peer_id: our_id,
            ephemeral_public_key: ephemeral_public.to_vec(),
            random,
            challenge,
        };
        let state = Self {
            session_id: init.session_id.clone(),
            session_key,
            peer_id: init.peer_id.clone(),
        };
        Ok((state, response))
    }

    /// The session id under negotiation.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The initiator's claimed peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Consume the state once the confirm has been verified, yielding
    /// the session key. Identity verification is the trust layer's job
    /// and must happen before this is called.
    pub fn finish(self, confirm: &KeyExchangeConfirm) -> BeamResult<[u8; 32]> {
        if confirm.session_id != self.session_id {
            return Err(BeamError::KeyExchangeFailed(format!(
                "confirm for session {} while negotiating {}",
                confirm.session_id, self.session_id
            )));
        }
        Ok(self.session_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (PeerId, PeerId) {
        (PeerId::from_string("initiator"), PeerId::from_string("responder"))
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let (alice, bob) = ids();
        let (initiator, init) = InitiatorHandshake::begin(alice);
        let (responder, response) =
            ResponderHandshake::respond(&init, bob, vec![1u8; 32]).unwrap();

        let (initiator_key, peer, challenge) = initiator.complete(&response).unwrap();
        assert_eq!(peer.as_str(), "responder");
        assert_eq!(challenge, vec![1u8; 32]);

        let confirm = KeyExchangeConfirm {
            session_id: response.session_id.clone(),
            identity_key: vec![0; 32],
            challenge_signature: vec![0; 64],
        };
        let responder_key = responder.finish(&confirm).unwrap();
        assert_eq!(initiator_key, responder_key);
    }

    #[test]
    fn key_depends_on_randoms_not_just_dh() {
        // Two handshakes between the same ids must never share a key.
        let (alice, bob) = ids();
        let run = |alice: PeerId, bob: PeerId| {
            let (initiator, init) = InitiatorHandshake::begin(alice);
            let (_, response) =
                ResponderHandshake::respond(&init, bob, vec![0u8; 32]).unwrap();
            initiator.complete(&response).unwrap().0
        };
        let k1 = run(alice.clone(), bob.clone());
        let k2 = run(alice, bob);
        assert_ne!(k1, k2);
    }

    #[test]
    fn mismatched_session_id_rejected() {
        let (alice, bob) = ids();
        let (initiator, init) = InitiatorHandshake::begin(alice);
        let (responder, mut response) =
            ResponderHandshake::respond(&init, bob, vec![0u8; 32]).unwrap();

        response.session_id = "someone-elses-session".into();
        assert!(matches!(
            initiator.complete(&response),
            Err(BeamError::KeyExchangeFailed(_))
        ));

        let confirm = KeyExchangeConfirm {
            session_id: "someone-elses-session".into(),
            identity_key: vec![],
            challenge_signature: vec![],
        };
        assert!(matches!(
            responder.finish(&confirm),
            Err(BeamError::KeyExchangeFailed(_))
        ));
    }

    #[test]
    fn malformed_ephemeral_key_rejected() {
        let (alice, bob) = ids();
        let (_, mut init) = InitiatorHandshake::begin(alice);
        init.ephemeral_public_key = vec![0u8; 31];
        assert!(matches!(
            ResponderHandshake::respond(&init, bob, vec![]),
            Err(BeamError::KeyExchangeFailed(_))
        ));
    }

    #[test]
    fn messages_serialize_camel_case() {
        let (alice, _) = ids();
        let (_, init) = InitiatorHandshake::begin(alice);
        let json = serde_json::to_value(&init).unwrap();
        assert!(json["sessionId"].is_string());
        assert!(json["ephemeralPublicKey"].is_string());
        assert!(json["random"].is_string());
    }
}

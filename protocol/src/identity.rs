// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! Device identity: Ed25519 keypairs and the peer ids derived from them.
//!
//! A device's identity is its Ed25519 keypair. The [`PeerId`] every other
//! layer keys on is a BLAKE3 digest of the verifying key, hex-encoded —
//! compact enough for advertising packets, collision-resistant enough to
//! never worry about.
//!
//! Long-term keys live behind the [`KeyStore`] trait so that platform
//! secure storage (keychain, StrongBox, whatever) can be plugged in
//! without this crate knowing about it.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BeamError, BeamResult};

/// Number of digest bytes kept in a peer id. 16 bytes (32 hex chars) is
/// plenty — we are naming devices, not mining.
const PEER_ID_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Stable identifier for a peer device, derived from its identity key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Derive a peer id from an Ed25519 verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let digest = blake3::hash(key.as_bytes());
        Self(hex::encode(&digest.as_bytes()[..PEER_ID_LENGTH]))
    }

    /// Wrap an already-derived id (e.g. one read from an advertising
    /// packet). No validation beyond non-emptiness — the challenge
    /// handshake is what proves the peer actually controls it.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DeviceKeypair
// ---------------------------------------------------------------------------

/// The device's long-term Ed25519 identity keypair.
#[derive(Clone)]
pub struct DeviceKeypair {
    signing: SigningKey,
}

impl DeviceKeypair {
    /// Generate a fresh identity keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from 32 secret-key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    /// The 32 secret-key bytes, for persistence by a host key store.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The public (verifying) half of the identity.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The peer id other devices know us by.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_verifying_key(&self.verifying_key())
    }

    /// Sign an authentication challenge.
    ///
    /// The signed message is `challenge || peer_id`, binding the response
    /// to the identity being claimed so a response cannot be replayed
    /// under a different id.
    pub fn sign_challenge(&self, challenge: &[u8]) -> Signature {
        let mut message = challenge.to_vec();
        message.extend_from_slice(self.peer_id().as_str().as_bytes());
        self.signing.sign(&message)
    }
}

impl fmt::Debug for DeviceKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.debug_struct("DeviceKeypair")
            .field("peer_id", &self.peer_id())
            .finish()
    }
}

/// Verify a challenge response against the claimed identity.
///
/// Checks two things: the presented verifying key actually derives the
/// claimed peer id, and the signature covers `challenge || peer_id`.
pub fn verify_challenge_response(
    claimed: &PeerId,
    verifying_key_bytes: &[u8; 32],
    challenge: &[u8],
    signature_bytes: &[u8; 64],
) -> BeamResult<()> {
    let key = VerifyingKey::from_bytes(verifying_key_bytes).map_err(|_| BeamError::AuthFailed)?;
    if &PeerId::from_verifying_key(&key) != claimed {
        return Err(BeamError::AuthFailed);
    }
    let mut message = challenge.to_vec();
    message.extend_from_slice(claimed.as_str().as_bytes());
    let signature = Signature::from_bytes(signature_bytes);
    key.verify(&message, &signature)
        .map_err(|_| BeamError::AuthFailed)
}

// ---------------------------------------------------------------------------
// KeyStore
// ---------------------------------------------------------------------------

/// Access to the device's identity keypair.
///
/// Platform-specific secure storage implements this; the in-memory
/// variant below is for tests and ephemeral relay processes.
pub trait KeyStore: Send + Sync {
    /// The device identity keypair.
    fn identity_keypair(&self) -> &DeviceKeypair;
}

/// Keypair held in process memory. Fine for tests and short-lived relays;
/// not what you want on a phone.
pub struct MemoryKeyStore {
    keypair: DeviceKeypair,
}

impl MemoryKeyStore {
    /// Wrap an existing keypair.
    pub fn new(keypair: DeviceKeypair) -> Self {
        Self { keypair }
    }

    /// Generate a fresh identity.
    pub fn ephemeral() -> Self {
        Self::new(DeviceKeypair::generate())
    }
}

impl KeyStore for MemoryKeyStore {
    fn identity_keypair(&self) -> &DeviceKeypair {
        &self.keypair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_deterministic() {
        let kp = DeviceKeypair::generate();
        let a = PeerId::from_verifying_key(&kp.verifying_key());
        let b = kp.peer_id();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), PEER_ID_LENGTH * 2);
    }

    #[test]
    fn distinct_keys_distinct_ids() {
        let a = DeviceKeypair::generate().peer_id();
        let b = DeviceKeypair::generate().peer_id();
        assert_ne!(a, b);
    }

    #[test]
    fn challenge_response_roundtrip() {
        let kp = DeviceKeypair::generate();
        let challenge = [7u8; 32];
        let sig = kp.sign_challenge(&challenge);

        verify_challenge_response(
            &kp.peer_id(),
            kp.verifying_key().as_bytes(),
            &challenge,
            &sig.to_bytes(),
        )
        .expect("valid response verifies");
    }

    #[test]
    fn response_bound_to_claimed_identity() {
        let kp = DeviceKeypair::generate();
        let imposter = DeviceKeypair::generate();
        let challenge = [7u8; 32];
        let sig = kp.sign_challenge(&challenge);

        // Right signature, wrong claimed id.
        let result = verify_challenge_response(
            &imposter.peer_id(),
            kp.verifying_key().as_bytes(),
            &challenge,
            &sig.to_bytes(),
        );
        assert!(matches!(result, Err(BeamError::AuthFailed)));
    }

    #[test]
    fn tampered_challenge_fails() {
        let kp = DeviceKeypair::generate();
        let sig = kp.sign_challenge(&[7u8; 32]);
        let result = verify_challenge_response(
            &kp.peer_id(),
            kp.verifying_key().as_bytes(),
            &[8u8; 32],
            &sig.to_bytes(),
        );
        assert!(matches!(result, Err(BeamError::AuthFailed)));
    }

    #[test]
    fn debug_never_prints_secrets() {
        let kp = DeviceKeypair::generate();
        let printed = format!("{:?}", kp);
        assert!(printed.contains("peer_id"));
        assert!(!printed.contains("signing"));
    }
}

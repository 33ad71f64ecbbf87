// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # The Wire Envelope
//!
//! Every message between two Beam devices — handshake, payment,
//! confirmation, error — travels inside the same versioned envelope:
//!
//! ```json
//! {
//!   "type": "payment_request",
//!   "version": "1.0.0",
//!   "sessionId": "5f3c…",
//!   "nonce": 7,
//!   "authTag": "base64…",
//!   "payload": "base64…"
//! }
//! ```
//!
//! `nonce` and `authTag` are present on every post-handshake message;
//! handshake and error envelopes travel in the clear with both set to
//! null. Decoding rejects an unknown major version before the payload is
//! inspected at all — a device that cannot speak our wire format gets no
//! further attention.
//!
//! ## Associated data
//!
//! The header fields (`type`, `version`, `sessionId`, `nonce`) have a
//! canonical byte form, [`Envelope::header_bytes`], which the session
//! layer feeds to AES-GCM as associated data. Tampering with any header
//! field therefore voids the authentication tag even though the header
//! itself is not encrypted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::wire::b64;

// ---------------------------------------------------------------------------
// EnvelopeType
// ---------------------------------------------------------------------------

/// Discriminant for what an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Encrypted structured payment payload, sender → receiver.
    PaymentRequest,
    /// Encrypted confirmation (tx hash + confirmed flag), receiver → sender.
    TransactionConfirmation,
    /// Encrypted signal that the receiver is advertising again.
    ReceiverReady,
    /// Key exchange round 1, in the clear.
    KeyExchangeInit,
    /// Key exchange round 2, in the clear; carries the auth challenge.
    KeyExchangeResponse,
    /// Key exchange round 3, in the clear; carries the challenge response.
    KeyExchangeConfirm,
    /// Typed rejection, in the clear.
    Error,
}

impl EnvelopeType {
    /// `true` for message types that only exist inside an established
    /// session and therefore require `sessionId`, `nonce`, and `authTag`.
    pub fn requires_session(self) -> bool {
        matches!(
            self,
            Self::PaymentRequest | Self::TransactionConfirmation | Self::ReceiverReady
        )
    }
}

impl fmt::Display for EnvelopeType {
    /// `Display` is the snake_case wire name, keeping log lines and the
    /// AAD header in exact agreement with the JSON encoding.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PaymentRequest => "payment_request",
            Self::TransactionConfirmation => "transaction_confirmation",
            Self::ReceiverReady => "receiver_ready",
            Self::KeyExchangeInit => "key_exchange_init",
            Self::KeyExchangeResponse => "key_exchange_response",
            Self::KeyExchangeConfirm => "key_exchange_confirm",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The versioned wire message wrapping any protocol payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// What the payload is.
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    /// Protocol version, `MAJOR.MINOR.PATCH`.
    pub version: String,
    /// Session this envelope belongs to; null pre-handshake.
    pub session_id: Option<String>,
    /// Strictly increasing per-session counter; null pre-handshake.
    pub nonce: Option<u64>,
    /// AES-GCM authentication tag; null pre-handshake.
    #[serde(with = "b64::option")]
    pub auth_tag: Option<Vec<u8>>,
    /// Payload bytes: ciphertext post-handshake, plaintext otherwise.
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build a cleartext envelope (handshake and error traffic).
    pub fn plaintext(envelope_type: EnvelopeType, payload: Vec<u8>) -> Self {
        Self {
            envelope_type,
            version: config::PROTOCOL_VERSION.to_string(),
            session_id: None,
            nonce: None,
            auth_tag: None,
            payload,
        }
    }

    /// Build a sealed envelope. The session layer is the only caller;
    /// `payload` is ciphertext and `auth_tag` the GCM tag over it plus
    /// the header.
    pub fn sealed(
        envelope_type: EnvelopeType,
        session_id: String,
        nonce: u64,
        auth_tag: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self {
            envelope_type,
            version: config::PROTOCOL_VERSION.to_string(),
            session_id: Some(session_id),
            nonce: Some(nonce),
            auth_tag: Some(auth_tag),
            payload: ciphertext,
        }
    }

    /// Canonical header bytes used as AEAD associated data:
    /// `type|version|sessionId|nonce` with `-` for absent fields.
    ///
    /// Must be byte-identical on both ends, so it is derived purely from
    /// wire-visible fields.
    pub fn header_bytes(&self) -> Vec<u8> {
        let session = self.session_id.as_deref().unwrap_or("-");
        let nonce = self
            .nonce
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{}|{}|{}|{}",
            self.envelope_type, self.version, session, nonce
        )
        .into_bytes()
    }

    /// Serialize to wire bytes. Deterministic: the same logical envelope
    /// always yields the same bytes (serde_json emits struct fields in
    /// declaration order).
    pub fn encode(&self) -> BeamResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BeamError::Serialization(e.to_string()))
    }

    /// Parse and validate wire bytes with the default payload cap.
    pub fn decode(bytes: &[u8]) -> BeamResult<Self> {
        Self::decode_with_limit(bytes, config::MAX_ENVELOPE_PAYLOAD)
    }

    /// Parse and validate wire bytes.
    ///
    /// Rejection order matters: version first (before any payload
    /// inspection), then payload size, then per-type required fields.
    pub fn decode_with_limit(bytes: &[u8], max_payload: usize) -> BeamResult<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| BeamError::MalformedEnvelope(e.to_string()))?;

        let major = envelope
            .version
            .split('.')
            .next()
            .and_then(|m| m.parse::<u16>().ok())
            .ok_or_else(|| BeamError::MalformedEnvelope("unparseable version".into()))?;
        if major != config::PROTOCOL_VERSION_MAJOR {
            return Err(BeamError::UnsupportedVersion(envelope.version));
        }

        if envelope.payload.len() > max_payload {
            return Err(BeamError::MalformedEnvelope(format!(
                "payload of {} bytes exceeds the {} byte cap",
                envelope.payload.len(),
                max_payload
            )));
        }

        if envelope.envelope_type.requires_session()
            && (envelope.session_id.is_none()
                || envelope.nonce.is_none()
                || envelope.auth_tag.is_none())
        {
            return Err(BeamError::MalformedEnvelope(format!(
                "{} requires sessionId, nonce, and authTag",
                envelope.envelope_type
            )));
        }

        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// Error payload
// ---------------------------------------------------------------------------

/// Payload of an `error` envelope: the rejection code plus a
/// human-readable message. Codes are the stable strings from
/// [`BeamError::code`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable rejection code, e.g. `DEVICE_BLOCKED`.
    pub code: String,
    /// Human-readable detail. Never contains secret material.
    pub message: String,
}

impl ErrorPayload {
    /// Build from a [`BeamError`]. The on-wire message is the error's
    /// own display form, which is already scrubbed of secrets.
    pub fn from_error(err: &BeamError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Map a received error payload back to the corresponding
    /// [`BeamError`] so callers get a typed failure, not a string.
    pub fn into_error(self) -> BeamError {
        match self.code.as_str() {
            "DEVICE_BLOCKED" => BeamError::DeviceBlocked { remaining_secs: 0 },
            "RATE_LIMITED" => BeamError::RateLimited { retry_after_secs: 0 },
            "AUTH_REQUIRED" => BeamError::AuthRequired,
            "AUTH_FAILED" => BeamError::AuthFailed,
            "DECRYPT_FAILED" => BeamError::DecryptFailed,
            "UNSUPPORTED_VERSION" => BeamError::UnsupportedVersion(self.message),
            "INSUFFICIENT_AVAILABLE_BALANCE" => BeamError::InsufficientAvailableBalance {
                requested: 0,
                available: 0,
            },
            "DUPLICATE_TRANSACTION" => BeamError::DuplicateTransaction,
            "STALE_NONCE" => BeamError::StaleNonce { local: 0, chain: 0 },
            "KEY_EXCHANGE_FAILED" => BeamError::KeyExchangeFailed(self.message),
            _ => BeamError::MalformedEnvelope(format!(
                "peer error {}: {}",
                self.code, self.message
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_sample() -> Envelope {
        Envelope::sealed(
            EnvelopeType::PaymentRequest,
            "session-1".to_string(),
            7,
            vec![0xAA; 16],
            vec![1, 2, 3, 4],
        )
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let envelope = sealed_sample();
        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = sealed_sample().encode().unwrap();
        let b = sealed_sample().encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wire_field_names_are_the_documented_ones() {
        let bytes = sealed_sample().encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "payment_request");
        assert!(json["sessionId"].is_string());
        assert!(json["nonce"].is_u64());
        assert!(json["authTag"].is_string());
        assert!(json["payload"].is_string());
    }

    #[test]
    fn wrong_major_version_rejected_before_payload() {
        let mut envelope = sealed_sample();
        envelope.version = "2.0.0".to_string();
        // Oversized payload too — version must win.
        envelope.payload = vec![0; config::MAX_ENVELOPE_PAYLOAD + 1];
        let bytes = envelope.encode().unwrap();
        let err = Envelope::decode(&bytes).unwrap_err();
        assert!(matches!(err, BeamError::UnsupportedVersion(_)));
    }

    #[test]
    fn minor_version_drift_is_fine() {
        let mut envelope = sealed_sample();
        envelope.version = "1.9.3".to_string();
        let bytes = envelope.encode().unwrap();
        assert!(Envelope::decode(&bytes).is_ok());
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut envelope = sealed_sample();
        envelope.payload = vec![0; 65];
        let bytes = envelope.encode().unwrap();
        let err = Envelope::decode_with_limit(&bytes, 64).unwrap_err();
        assert!(matches!(err, BeamError::MalformedEnvelope(_)));
    }

    #[test]
    fn post_handshake_types_require_session_fields() {
        let envelope = Envelope::plaintext(EnvelopeType::PaymentRequest, vec![1, 2, 3]);
        let bytes = envelope.encode().unwrap();
        let err = Envelope::decode(&bytes).unwrap_err();
        assert!(matches!(err, BeamError::MalformedEnvelope(_)));
    }

    #[test]
    fn handshake_types_travel_plaintext() {
        let envelope = Envelope::plaintext(EnvelopeType::KeyExchangeInit, vec![9]);
        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.session_id, None);
        assert_eq!(decoded.nonce, None);
    }

    #[test]
    fn header_bytes_cover_all_header_fields() {
        let sealed = sealed_sample();
        let header = String::from_utf8(sealed.header_bytes()).unwrap();
        assert_eq!(header, "payment_request|1.0.0|session-1|7");

        let clear = Envelope::plaintext(EnvelopeType::Error, vec![]);
        let header = String::from_utf8(clear.header_bytes()).unwrap();
        assert_eq!(header, "error|1.0.0|-|-");
    }

    #[test]
    fn garbage_is_malformed() {
        let err = Envelope::decode(b"not even json").unwrap_err();
        assert!(matches!(err, BeamError::MalformedEnvelope(_)));
    }

    #[test]
    fn error_payload_maps_back_to_typed_errors() {
        let payload = ErrorPayload::from_error(&BeamError::AuthRequired);
        assert_eq!(payload.code, "AUTH_REQUIRED");
        assert!(matches!(payload.into_error(), BeamError::AuthRequired));

        let payload = ErrorPayload {
            code: "DEVICE_BLOCKED".into(),
            message: "blocked".into(),
        };
        assert!(matches!(
            payload.into_error(),
            BeamError::DeviceBlocked { .. }
        ));
    }
}

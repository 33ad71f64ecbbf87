// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! Error types for the Beam protocol.
//!
//! Every failure carries a stable string code (see [`BeamError::code`]).
//! The caller — or the UI behind it — must react differently to
//! `DEVICE_BLOCKED` than to `TRANSPORT_TIMEOUT`, so errors are never
//! downgraded to a generic failure on their way up the stack.
//!
//! Crypto and trust variants deliberately carry no secret material; what
//! they print is safe to log.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type BeamResult<T> = Result<T, BeamError>;

/// The full failure taxonomy of the protocol.
#[derive(Debug, Error)]
pub enum BeamError {
    // --- Transport ---
    /// No link to the peer could be established within the attempt cap.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A link-layer write or a protocol wait exceeded its deadline.
    #[error("transport timeout during {stage}")]
    TransportTimeout {
        /// The stage that timed out (e.g. "write-ack", "confirmation").
        stage: &'static str,
    },

    /// The peer disconnected while an exchange was in flight. Pending
    /// waiters are released with this error, never left hanging.
    #[error("transport disconnected")]
    TransportDisconnected,

    /// A chunked message was abandoned before all frames arrived.
    #[error("reassembly incomplete for message {message_id}")]
    ReassemblyIncomplete {
        /// The message id of the abandoned set.
        message_id: String,
    },

    // --- Protocol ---
    /// The envelope's major version does not match ours.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// The envelope failed structural validation.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    // --- Crypto ---
    /// Key agreement could not be completed.
    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// Authenticated decryption failed. Wrong key, corrupted ciphertext,
    /// or tampered header — we do not say which.
    #[error("decryption failed")]
    DecryptFailed,

    /// The message nonce is at or below the session's high-watermark.
    #[error("replay detected: nonce {nonce} <= high-watermark {high_watermark}")]
    ReplayDetected {
        /// Nonce carried by the rejected message.
        nonce: u64,
        /// Highest nonce already accepted for the session.
        high_watermark: u64,
    },

    // --- Trust ---
    /// The peer has no established session / is not authenticated.
    #[error("authentication required")]
    AuthRequired,

    /// The challenge response did not verify.
    #[error("authentication failed")]
    AuthFailed,

    /// The peer is blocked; even a valid response is rejected until the
    /// cool-down elapses.
    #[error("device blocked for another {remaining_secs}s")]
    DeviceBlocked {
        /// Seconds until the block lapses.
        remaining_secs: u64,
    },

    /// The peer exceeded its payment rate window. Authentication state
    /// is unaffected.
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window has room again.
        retry_after_secs: u64,
    },

    // --- Offline guard ---
    /// Known balance minus already-queued pending amounts cannot cover
    /// the new payment.
    #[error("insufficient available balance: requested {requested}, available {available}")]
    InsufficientAvailableBalance {
        /// Amount requested, in base units.
        requested: u128,
        /// Balance still unencumbered by the queue, in base units.
        available: u128,
    },

    /// An identical `(to, amount, chainId)` payment is already pending.
    #[error("duplicate transaction")]
    DuplicateTransaction,

    /// The locally tracked offline nonce is not behind the last known
    /// on-chain nonce.
    #[error("stale nonce: local {local} vs on-chain {chain}")]
    StaleNonce {
        /// Locally tracked offline nonce.
        local: u64,
        /// Last known on-chain nonce.
        chain: u64,
    },

    // --- Ambient ---
    /// Serialization or deserialization of a protocol structure failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The persistent queue store failed.
    #[error("store error: {0}")]
    Store(String),

    /// The chain signer/broadcaster collaborator failed.
    #[error("signer error: {0}")]
    Signer(String),
}

impl BeamError {
    /// Stable string code for this error, as it appears on the wire and
    /// in logs. These are part of the external interface — renaming one
    /// is a breaking change.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            Self::TransportTimeout { .. } => "TRANSPORT_TIMEOUT",
            Self::TransportDisconnected => "TRANSPORT_DISCONNECTED",
            Self::ReassemblyIncomplete { .. } => "REASSEMBLY_INCOMPLETE",
            Self::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            Self::MalformedEnvelope(_) => "MALFORMED_ENVELOPE",
            Self::KeyExchangeFailed(_) => "KEY_EXCHANGE_FAILED",
            Self::DecryptFailed => "DECRYPT_FAILED",
            Self::ReplayDetected { .. } => "REPLAY_DETECTED",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::DeviceBlocked { .. } => "DEVICE_BLOCKED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InsufficientAvailableBalance { .. } => "INSUFFICIENT_AVAILABLE_BALANCE",
            Self::DuplicateTransaction => "DUPLICATE_TRANSACTION",
            Self::StaleNonce { .. } => "STALE_NONCE",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Signer(_) => "SIGNER_ERROR",
        }
    }

    /// `true` for transport-category errors, which are the only ones
    /// retried locally (with bounded backoff). Everything else is
    /// terminal for the current operation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable(_)
                | Self::TransportTimeout { .. }
                | Self::TransportDisconnected
                | Self::ReassemblyIncomplete { .. }
        )
    }
}

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Protocol Configuration & Constants
//!
//! Every magic number in Beam lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Tunables that tests need to vary (frame ceiling, timeouts, attempt
//! limits) also have `…Config` structs in their owning modules; those
//! structs default to the values defined here.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Major version — bump on breaking wire changes. An envelope with a
/// different major version is rejected before its payload is inspected.
pub const PROTOCOL_VERSION_MAJOR: u16 = 1;

/// Minor version — bump on backward-compatible additions.
pub const PROTOCOL_VERSION_MINOR: u16 = 0;

/// Patch version — bump on non-wire bug fixes.
pub const PROTOCOL_VERSION_PATCH: u16 = 0;

/// The full version string carried by every envelope.
pub const PROTOCOL_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes. Session keys are exactly this long.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits is the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// BLAKE3 `derive_key` context string for session keys. Changing this is a
/// breaking protocol change — every device must agree on it.
pub const SESSION_KEY_CONTEXT: &str = "beam-protocol v1 session key";

/// Length of the random value each side contributes to the key exchange.
pub const KEY_EXCHANGE_RANDOM_LENGTH: usize = 32;

/// Length of the authentication challenge issued to unknown peers.
pub const CHALLENGE_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Link / Chunking
// ---------------------------------------------------------------------------

/// Default ceiling for the `data` portion of a chunk frame, in bytes.
///
/// BLE links commonly negotiate an MTU of 185 bytes; the frame header
/// (message id + index + count) costs [`CHUNK_HEADER_LENGTH`] and the
/// link layer keeps a few bytes of its own, so 160 leaves headroom on
/// every radio we have seen in the field.
pub const DEFAULT_FRAME_CEILING: usize = 160;

/// Fixed chunk frame header: 16-byte message id + u32 index + u32 count.
pub const CHUNK_HEADER_LENGTH: usize = 24;

/// Partial reassembly sets older than this are discarded to bound memory.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a single link-layer write to be acknowledged.
pub const WRITE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum attempts for a single frame write before giving up.
pub const WRITE_RETRY_MAX: u32 = 3;

/// Base delay for exponential backoff between write retries.
pub const WRITE_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Maximum connection attempts. Connection establishment never loops
/// indefinitely; after this many failures the operation surfaces
/// `TRANSPORT_UNAVAILABLE`.
pub const CONNECT_ATTEMPT_MAX: u32 = 3;

// ---------------------------------------------------------------------------
// Envelope Limits
// ---------------------------------------------------------------------------

/// Maximum envelope payload size in bytes. Anything larger is rejected at
/// decode time before further inspection. 64 KiB is generous for payment
/// traffic — a compact payment payload is well under 1 KiB.
pub const MAX_ENVELOPE_PAYLOAD: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Session Lifetimes
// ---------------------------------------------------------------------------

/// Sessions idle longer than this are expired and purged. An expired
/// session cannot decrypt; the next send re-runs key exchange.
pub const SESSION_IDLE_EXPIRY: Duration = Duration::from_secs(300);

/// How often the maintenance sweep reclaims expired sessions, stale auth
/// records, and abandoned reassembly buffers.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Device Trust
// ---------------------------------------------------------------------------

/// A challenge response arriving later than this is treated as a failed
/// attempt.
pub const CHALLENGE_RESPONSE_DEADLINE: Duration = Duration::from_secs(15);

/// Failed authentication attempts before a peer transitions to `Blocked`.
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Cool-down duration for a blocked peer. Unblocking earlier is an
/// explicit administrative action, never automatic.
pub const BLOCK_COOLDOWN: Duration = Duration::from_secs(300);

/// Window over which repeated blocks are counted for escalation.
pub const BLACKLIST_WINDOW: Duration = Duration::from_secs(3600);

/// Number of blocks within [`BLACKLIST_WINDOW`] that escalates a peer to
/// the extended blacklist.
pub const BLACKLIST_THRESHOLD: u32 = 3;

/// Extended blacklist duration after escalation.
pub const BLACKLIST_DURATION: Duration = Duration::from_secs(86_400);

/// Payment envelopes accepted from an authenticated peer per window.
pub const TX_RATE_LIMIT_MAX: u32 = 10;

/// Window for the transaction rate limiter.
pub const TX_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Auth records idle longer than this are reclaimed by the sweep, unless
/// the peer is blocked (blocks must outlive churn).
pub const TRUST_RECORD_IDLE: Duration = Duration::from_secs(1800);

// ---------------------------------------------------------------------------
// Orchestrator Timeouts
// ---------------------------------------------------------------------------

/// How long the sender waits for each key-exchange round-trip.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the sender waits for a `transaction_confirmation`.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the sender waits for the receiver to signal `receiver_ready`.
/// Absence of the signal is a soft outcome, not a failure.
pub const RECEIVER_READY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Offline Guard
// ---------------------------------------------------------------------------

/// A payment to the same recipient within this window of a queued one is
/// logged as suspicious but not blocked (only exact duplicates are).
pub const DUPLICATE_SIMILARITY_WINDOW: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_matches_components() {
        let expected = format!(
            "{}.{}.{}",
            PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, PROTOCOL_VERSION_PATCH
        );
        assert_eq!(PROTOCOL_VERSION, expected);
    }

    #[test]
    fn crypto_parameter_sizes() {
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(AES_TAG_LENGTH, 16);
        assert_eq!(CHUNK_HEADER_LENGTH, 16 + 4 + 4);
    }

    #[test]
    fn frame_ceiling_leaves_mtu_headroom() {
        // 185-byte BLE MTU minus our header must still fit a full frame.
        assert!(DEFAULT_FRAME_CEILING + CHUNK_HEADER_LENGTH < 185);
    }

    #[test]
    fn timing_constants_sanity() {
        assert!(WRITE_ACK_TIMEOUT < CONFIRMATION_TIMEOUT);
        assert!(BLOCK_COOLDOWN < BLACKLIST_DURATION);
        assert!(REASSEMBLY_TIMEOUT.as_millis() > 0);
    }
}

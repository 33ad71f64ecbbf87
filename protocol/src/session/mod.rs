// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Session Layer — Key Exchange & Encrypted Channel
//!
//! Three messages establish a session:
//!
//! ```text
//!   Initiator                                   Responder
//!      │  key_exchange_init {sessionId, ephKey, random}  │
//!      ├────────────────────────────────────────────────►│
//!      │  key_exchange_response {…, random, challenge}   │
//!      │◄────────────────────────────────────────────────┤
//!      │  key_exchange_confirm {sessionId, identityKey,  │
//!      │                        challengeSignature}      │
//!      ├────────────────────────────────────────────────►│
//! ```
//!
//! Both sides derive the same 32-byte session key from the X25519 shared
//! secret, both random values, and both peer ids; only after the confirm
//! is the session `Established` on either end. The responder's challenge
//! rides the second message and its signed answer the third, so device
//! admission costs no extra round-trip and a session can only ever exist
//! for an authenticated peer.
//!
//! Ephemeral keys are generated per session and consumed by the DH
//! computation; compromising a long-term identity key reveals no past
//! session traffic.
//!
//! The per-peer state machine is `None → InitSent → ResponseReceived →
//! Established → Expired`. Superseded sessions are discarded whole — a
//! session is never mutated back into an earlier state.

mod engine;
mod handshake;

pub use engine::{Session, SessionEngine, SessionInfo};
pub use handshake::{
    HandshakeStage, InitiatorHandshake, KeyExchangeConfirm, KeyExchangeInit, KeyExchangeResponse,
    ResponderHandshake,
};

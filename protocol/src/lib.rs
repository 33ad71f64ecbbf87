// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Beam Protocol — Core Library
//!
//! Beam moves a signed payment instruction between two peer devices over a
//! short-range radio link that may have no path to the internet, and later
//! reconciles that instruction with a network once connectivity returns.
//!
//! The hard part is not the payment itself — it is the transport: a secure,
//! session-oriented protocol running over an unreliable, MTU-constrained,
//! connection-oriented link, plus the trust machinery a receiving device
//! must enforce against unauthenticated strangers.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the layers of the protocol:
//!
//! - **wire** — The versioned envelope, the compact payment payload, and
//!   the chunk frames that adapt envelopes to small link-layer writes.
//! - **transport** — The `FrameLink` radio capability and the chunked
//!   send/receive driver with bounded retries.
//! - **session** — X25519 key exchange, AES-256-GCM session encryption,
//!   per-session replay protection, and idle expiry.
//! - **trust** — Challenge/response device admission, attempt counters,
//!   cool-down blocks, blacklist escalation, and the payment rate limiter.
//! - **queue** — The offline queue with its pre-flight security checks
//!   (available balance, duplicates, nonce ordering) and the submission
//!   sweep that drains it when connectivity returns.
//! - **orchestrator** — The sender-side flow: session, send, confirmation,
//!   receiver-ready, each stage under its own timeout.
//! - **receiver** — The advertiser side: admit, decrypt, execute or queue,
//!   confirm.
//! - **identity** / **chain** — Device keys and the opaque chain
//!   signer/broadcaster capability.
//!
//! ## Design Philosophy
//!
//! 1. Every failure has a specific code. `DEVICE_BLOCKED` and
//!    `TRANSPORT_TIMEOUT` demand different reactions; we never flatten them.
//! 2. No hidden global state — every store is constructed and injected,
//!    so tests are deterministic.
//! 3. Per-peer state is locked per peer. A stalled peer never serializes
//!    the others.
//! 4. If it touches money, it has tests. Plural.

pub mod chain;
pub mod config;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod queue;
pub mod receiver;
pub mod session;
pub mod transport;
pub mod trust;
pub mod wire;

pub use chain::ChainBroadcaster;
pub use error::{BeamError, BeamResult};
pub use identity::{DeviceKeypair, KeyStore, PeerId};
pub use orchestrator::{PaymentOrchestrator, PaymentResult, PaymentStatus};
pub use queue::{OfflineQueue, QueueStore, QueuedTransaction, SledQueueStore};
pub use receiver::PaymentReceiver;
pub use session::{Session, SessionEngine};
pub use transport::{ChunkTransport, FrameLink};
pub use trust::{AuthStatus, TrustStore};
pub use wire::envelope::{Envelope, EnvelopeType};
pub use wire::payment::PaymentPayload;

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! The wire layer: everything that is ever serialized toward a peer.
//!
//! Three pieces live here:
//!
//! - [`envelope`] — the versioned JSON envelope wrapping every protocol
//!   message, plus its decode-time validation rules.
//! - [`payment`] — the structured payment payload and its compact binary
//!   encoding (BLE framing is far more MTU-constrained than an HTTP body;
//!   a naive text encoding meaningfully increases the chunk count and
//!   with it the failure probability).
//! - [`chunk`] — the fixed-header frames that carry an envelope across a
//!   link whose writes are capped well below the envelope size.

pub mod chunk;
pub mod envelope;
pub mod payment;

pub(crate) mod b64;

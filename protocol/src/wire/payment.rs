// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Structured Payment Payload
//!
//! The payment instruction itself: recipient, amount, chain, token, and
//! the merchant metadata a point-of-sale flow attaches. This is what
//! gets encrypted into a `payment_request` envelope.
//!
//! ## Compact binary encoding
//!
//! A payment payload serialized as JSON runs 400+ bytes; as bincode it is
//! roughly a third of that. On a link chunked at 160 bytes per frame that
//! is the difference between one frame and three, and every extra frame
//! is another chance for the radio to drop the exchange. So the default
//! wire form is bincode behind a one-byte format marker; JSON remains
//! decodable for interop and debugging (a JSON document necessarily
//! starts with `{`, which can never collide with the marker).
//!
//! Amounts travel as decimal strings (`"5.0"`) — the form wallets and
//! invoices use — and are converted to integer base units against the
//! token's `decimals` whenever arithmetic is needed. Floats touch no
//! money path.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{BeamError, BeamResult};

/// Format marker for the compact binary encoding. Deliberately not a
/// printable character and not `{`.
const ENCODING_BINARY: u8 = 0x01;

// ---------------------------------------------------------------------------
// Token / metadata
// ---------------------------------------------------------------------------

/// The asset a payment is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    /// Ticker, e.g. `"USDC"`.
    pub symbol: String,
    /// Contract address; empty for the chain-native asset.
    pub address: String,
    /// Number of decimal places in the token's base unit.
    pub decimals: u8,
    /// `true` for the chain's native asset.
    pub is_native: bool,
}

impl TokenInfo {
    /// The chain-native asset with the given ticker and decimals.
    pub fn native(symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            address: String::new(),
            decimals,
            is_native: true,
        }
    }
}

/// Optional point-of-sale metadata attached by the receiver's invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    /// Merchant display name.
    pub merchant: Option<String>,
    /// Free-form location string.
    pub location: Option<String>,
    /// Upper bound the payer agreed to, decimal string.
    pub max_amount: Option<String>,
    /// Lower bound the payer agreed to, decimal string.
    pub min_amount: Option<String>,
    /// Unix milliseconds after which the instruction is void.
    pub expiry: Option<u64>,
    /// Unix milliseconds when the metadata was produced.
    pub timestamp: Option<u64>,
}

// ---------------------------------------------------------------------------
// PaymentPayload
// ---------------------------------------------------------------------------

/// The structured payment instruction carried by a `payment_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Recipient address on the target chain.
    pub to: String,
    /// Amount as a decimal string, e.g. `"5.0"`.
    pub amount: String,
    /// Target chain identifier.
    pub chain_id: u64,
    /// Asset being transferred.
    pub token: TokenInfo,
    /// Free-form reference the receiver can reconcile against.
    pub payment_reference: Option<String>,
    /// Point-of-sale metadata, when present.
    pub metadata: Option<PaymentMetadata>,
    /// Unix milliseconds when the instruction was created.
    pub timestamp: u64,
    /// Payload schema version; currently the protocol version.
    pub version: String,
}

impl PaymentPayload {
    /// Encode in the compact binary form: marker byte + bincode.
    pub fn to_compact_bytes(&self) -> BeamResult<Vec<u8>> {
        let body =
            bincode::serialize(self).map_err(|e| BeamError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(ENCODING_BINARY);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Encode as plain JSON. Bigger on the wire; handy for tooling.
    pub fn to_json_bytes(&self) -> BeamResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BeamError::Serialization(e.to_string()))
    }

    /// Decode either wire form, distinguished by the first byte.
    pub fn from_bytes(bytes: &[u8]) -> BeamResult<Self> {
        match bytes.first() {
            Some(&ENCODING_BINARY) => bincode::deserialize(&bytes[1..])
                .map_err(|e| BeamError::Serialization(e.to_string())),
            Some(&b'{') => serde_json::from_slice(bytes)
                .map_err(|e| BeamError::Serialization(e.to_string())),
            Some(other) => Err(BeamError::MalformedEnvelope(format!(
                "unknown payment payload encoding marker 0x{:02x}",
                other
            ))),
            None => Err(BeamError::MalformedEnvelope(
                "empty payment payload".into(),
            )),
        }
    }

    /// The amount converted to integer base units per the token decimals.
    pub fn base_units(&self) -> BeamResult<u128> {
        parse_decimal(&self.amount, self.token.decimals)
    }
}

/// Parse a decimal amount string into integer base units.
///
/// Rejects negative amounts, more fractional digits than the token
/// supports, and anything that is not plain `digits[.digits]`.
pub fn parse_decimal(amount: &str, decimals: u8) -> BeamResult<u128> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(BeamError::Serialization("empty amount".into()));
    }
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(BeamError::Serialization(format!("bad amount '{amount}'")));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(BeamError::Serialization(format!("bad amount '{amount}'")));
    }
    // Trailing zeros beyond the token's precision are harmless; real
    // extra precision is not.
    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(BeamError::Serialization(format!(
            "amount '{amount}' has more than {decimals} fractional digits"
        )));
    }

    let scale = 10u128.pow(decimals as u32);
    let whole_units = if whole.is_empty() {
        0u128
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| BeamError::Serialization(format!("amount '{amount}' overflows")))?
    };
    let frac_units = if frac.is_empty() {
        0u128
    } else {
        let parsed = frac
            .parse::<u128>()
            .map_err(|_| BeamError::Serialization(format!("amount '{amount}' overflows")))?;
        parsed * 10u128.pow(decimals as u32 - frac.len() as u32)
    };
    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(|| BeamError::Serialization(format!("amount '{amount}' overflows")))
}

// ---------------------------------------------------------------------------
// Confirmation payload
// ---------------------------------------------------------------------------

/// Payload of a `transaction_confirmation` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPayload {
    /// Hash of the broadcast transaction; absent when the payment was
    /// queued for later submission.
    pub transaction_hash: Option<String>,
    /// `true` once the receiver executed (or durably queued) the payment.
    pub confirmed: bool,
    /// `true` when the receiver was offline and queued instead of
    /// broadcasting.
    pub queued: bool,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

/// Convenience builder for a fresh payload with the current timestamp.
pub fn payment_now(
    to: impl Into<String>,
    amount: impl Into<String>,
    chain_id: u64,
    token: TokenInfo,
) -> PaymentPayload {
    PaymentPayload {
        to: to.into(),
        amount: amount.into(),
        chain_id,
        token,
        payment_reference: None,
        metadata: None,
        timestamp: chrono::Utc::now().timestamp_millis() as u64,
        version: config::PROTOCOL_VERSION.to_string(),
    }
}

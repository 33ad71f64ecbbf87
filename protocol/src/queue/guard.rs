// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! Pre-flight checks for offline queueing.
//!
//! Three gates run, in order, before anything is signed or persisted:
//! available balance, duplicate detection, and nonce freshness. Each is
//! a pure function over the candidate payment and the current pending
//! set, so they are testable without a store or a chain.

use chrono::Utc;

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::wire::payment::{parse_decimal, PaymentPayload};

use super::store::QueuedTransaction;

/// Balance gate: confirmed balance minus everything already pending in
/// the same chain/token lane must cover the new amount.
pub fn check_available_balance(
    payment: &PaymentPayload,
    balance: u128,
    pending: &[QueuedTransaction],
) -> BeamResult<()> {
    let requested = payment.base_units()?;
    let mut reserved: u128 = 0;
    for tx in pending {
        if tx.chain_id == payment.chain_id && tx.token.address == payment.token.address {
            let amount = parse_decimal(&tx.amount, tx.token.decimals)?;
            reserved = reserved.saturating_add(amount);
        }
    }
    let available = balance.saturating_sub(reserved);
    if requested > available {
        return Err(BeamError::InsufficientAvailableBalance {
            requested,
            available,
        });
    }
    Ok(())
}

/// Duplicate gate: an identical `(to, amount, chainId)` still pending is
/// rejected. A near-miss — same recipient and chain within a short
/// window but a different amount — is only logged; repeat payments to
/// the same merchant are legitimate.
pub fn check_duplicate(payment: &PaymentPayload, pending: &[QueuedTransaction]) -> BeamResult<()> {
    let now = Utc::now().timestamp();
    for tx in pending {
        if tx.chain_id != payment.chain_id || tx.to != payment.to {
            continue;
        }
        if tx.amount == payment.amount {
            return Err(BeamError::DuplicateTransaction);
        }
        let age = now.saturating_sub(tx.created_at);
        if age >= 0 && (age as u64) < config::DUPLICATE_SIMILARITY_WINDOW.as_secs() {
            tracing::warn!(
                to = %payment.to,
                chain_id = payment.chain_id,
                queued_amount = %tx.amount,
                new_amount = %payment.amount,
                "similar transaction queued to the same recipient moments ago"
            );
        }
    }
    Ok(())
}

/// Nonce gate: the locally tracked offline nonce must sit strictly below
/// the last confirmed on-chain nonce, or the queued transaction could
/// never land in order once submitted.
pub fn check_nonce(local_offline_nonce: u64, chain_nonce: u64) -> BeamResult<()> {
    if local_offline_nonce >= chain_nonce {
        return Err(BeamError::StaleNonce {
            local: local_offline_nonce,
            chain: chain_nonce,
        });
    }
    Ok(())
}

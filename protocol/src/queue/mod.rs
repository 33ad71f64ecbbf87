// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Offline Queue
//!
//! When the chain is unreachable a validated payment is signed and
//! parked here instead of being dropped. Entries live in a durable
//! store ([`store::QueueStore`]) and are swept to the chain when
//! connectivity returns.
//!
//! Mutations are serialized per `(chainId, token)` lane: queued
//! transactions in one lane carry consecutive account nonces, so both
//! enqueue and sweep take the lane lock before touching it. Lanes are
//! independent — a stuck lane never delays another.
//!
//! The sweep submits in creation order and stops a lane at the first
//! failure: submitting the entries behind a failed one would land them
//! out of nonce order.

pub mod guard;
pub mod store;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chain::ChainBroadcaster;
use crate::error::BeamResult;
use crate::wire::payment::PaymentPayload;

pub use store::{MemoryQueueStore, QueueStore, QueuedTransaction, SecurityStamp, SledQueueStore, TxStatus};

type LaneKey = (u64, String);

#[derive(Default)]
struct LaneState {
    /// Highest offline nonce handed out in this lane.
    offline_nonce: u64,
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub submitted: usize,
    pub failed: usize,
    /// Entries skipped because an earlier entry in their lane failed.
    pub held_back: usize,
}

/// The offline queue: guard checks, signing, persistence, and the
/// connectivity-restoration sweep.
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    chain: Arc<dyn ChainBroadcaster>,
    lanes: DashMap<LaneKey, Arc<Mutex<LaneState>>>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn QueueStore>, chain: Arc<dyn ChainBroadcaster>) -> Self {
        Self {
            store,
            chain,
            lanes: DashMap::new(),
        }
    }

    fn lane(&self, key: &LaneKey) -> Arc<Mutex<LaneState>> {
        self.lanes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LaneState::default())))
            .clone()
    }

    /// Validate, sign, and persist a payment for later submission.
    ///
    /// Runs the three guard gates under the lane lock, then signs via
    /// the chain collaborator and appends the entry with a completed
    /// security stamp. The lane's offline nonce only advances when all
    /// gates pass.
    pub async fn enqueue(&self, payment: &PaymentPayload) -> BeamResult<QueuedTransaction> {
        let key = (payment.chain_id, payment.token.address.clone());
        let lane = self.lane(&key);
        let mut lane = lane.lock().await;

        let pending = self.store.list_pending()?;
        let balance = self.chain.balance_of(&payment.token.address).await?;
        guard::check_available_balance(payment, balance, &pending)?;
        guard::check_duplicate(payment, &pending)?;
        let chain_nonce = self.chain.account_nonce().await?;
        guard::check_nonce(lane.offline_nonce, chain_nonce)?;

        let signed = self.chain.sign_transaction(payment).await?;
        let tx = QueuedTransaction {
            id: Uuid::new_v4().to_string(),
            to: payment.to.clone(),
            amount: payment.amount.clone(),
            chain_id: payment.chain_id,
            token: payment.token.clone(),
            signed_payload: signed.raw,
            tx_hash: signed.hash,
            nonce: signed.nonce,
            status: TxStatus::Pending,
            created_at: Utc::now().timestamp(),
            security_stamp: SecurityStamp::complete(),
        };
        self.store.append(&tx)?;
        lane.offline_nonce += 1;

        tracing::info!(
            id = %tx.id,
            to = %tx.to,
            amount = %tx.amount,
            chain_id = tx.chain_id,
            "payment queued for later submission"
        );
        Ok(tx)
    }

    /// Pending entries across all lanes, in creation order.
    pub fn pending(&self) -> BeamResult<Vec<QueuedTransaction>> {
        self.store.list_pending()
    }

    /// Submit pending entries now that connectivity is back.
    ///
    /// Entries are grouped by lane and submitted in creation order. A
    /// broadcast failure marks that entry `Failed` and holds back the
    /// rest of its lane; other lanes continue.
    pub async fn sweep(&self) -> BeamResult<SweepReport> {
        let mut report = SweepReport::default();
        if !self.chain.is_online().await {
            return Ok(report);
        }

        let pending = self.store.list_pending()?;
        let mut lanes: Vec<(LaneKey, Vec<QueuedTransaction>)> = Vec::new();
        for tx in pending {
            let key = tx.lane();
            match lanes.iter_mut().find(|(k, _)| *k == key) {
                Some((_, txs)) => txs.push(tx),
                None => lanes.push((key, vec![tx])),
            }
        }

        for (key, txs) in lanes {
            let lane = self.lane(&key);
            let _guard = lane.lock().await;
            let mut lane_failed = false;
            for tx in txs {
                if lane_failed {
                    report.held_back += 1;
                    continue;
                }
                let signed = crate::chain::SignedTransaction {
                    raw: tx.signed_payload.clone(),
                    hash: tx.tx_hash.clone(),
                    nonce: tx.nonce,
                };
                match self.chain.broadcast(&signed).await {
                    Ok(hash) => {
                        self.store.update_status(&tx.id, TxStatus::Submitted)?;
                        report.submitted += 1;
                        tracing::info!(id = %tx.id, tx_hash = %hash, "queued payment submitted");
                    }
                    Err(err) => {
                        self.store.update_status(&tx.id, TxStatus::Failed)?;
                        report.failed += 1;
                        lane_failed = true;
                        tracing::warn!(
                            id = %tx.id,
                            error = %err,
                            "queued payment failed, holding back its lane"
                        );
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InMemoryChain;
    use crate::error::BeamError;
    use crate::wire::payment::{parse_decimal, payment_now, TokenInfo};
    use std::sync::atomic::Ordering;

    fn token() -> TokenInfo {
        TokenInfo::native("ETH", 2)
    }

    fn queue_with(balance: &str, chain_nonce: u64) -> (OfflineQueue, Arc<InMemoryChain>) {
        let chain = Arc::new(InMemoryChain::new(parse_decimal(balance, 2).unwrap()));
        chain.set_confirmed_nonce(chain_nonce);
        let store = Arc::new(MemoryQueueStore::new());
        (OfflineQueue::new(store, chain.clone()), chain)
    }

    #[tokio::test]
    async fn enqueue_persists_with_complete_stamp() {
        let (queue, _) = queue_with("100", 10);
        let tx = queue
            .enqueue(&payment_now("0xa", "25", 1, token()))
            .await
            .unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert!(tx.security_stamp.balance_checked);
        assert!(tx.security_stamp.nonce_checked);
        assert_eq!(queue.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn available_balance_counts_pending() {
        let (queue, _) = queue_with("100", 10);
        queue
            .enqueue(&payment_now("0xa", "40", 1, token()))
            .await
            .unwrap();
        queue
            .enqueue(&payment_now("0xb", "50", 1, token()))
            .await
            .unwrap();

        let err = queue
            .enqueue(&payment_now("0xc", "20", 1, token()))
            .await
            .unwrap_err();
        assert!(matches!(err, BeamError::InsufficientAvailableBalance { .. }));

        queue
            .enqueue(&payment_now("0xc", "10", 1, token()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn identical_pending_payment_rejected() {
        let (queue, _) = queue_with("100", 10);
        queue
            .enqueue(&payment_now("0xshop", "25", 1, token()))
            .await
            .unwrap();
        let err = queue
            .enqueue(&payment_now("0xshop", "25", 1, token()))
            .await
            .unwrap_err();
        assert!(matches!(err, BeamError::DuplicateTransaction));
    }

    #[tokio::test]
    async fn offline_nonce_catches_up_with_the_chain() {
        // Chain nonce 2: two enqueues fit, the third is stale.
        let (queue, _) = queue_with("100", 2);
        queue
            .enqueue(&payment_now("0xa", "10", 1, token()))
            .await
            .unwrap();
        queue
            .enqueue(&payment_now("0xb", "10", 1, token()))
            .await
            .unwrap();
        let err = queue
            .enqueue(&payment_now("0xc", "10", 1, token()))
            .await
            .unwrap_err();
        assert!(matches!(err, BeamError::StaleNonce { local: 2, chain: 2 }));
    }

    #[tokio::test]
    async fn sweep_submits_in_order_when_online() {
        let (queue, chain) = queue_with("100", 10);
        queue
            .enqueue(&payment_now("0xa", "10", 1, token()))
            .await
            .unwrap();
        queue
            .enqueue(&payment_now("0xb", "20", 1, token()))
            .await
            .unwrap();

        let report = queue.sweep().await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(chain.broadcast_count(), 2);
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_is_a_noop_while_offline() {
        let (queue, chain) = queue_with("100", 10);
        queue
            .enqueue(&payment_now("0xa", "10", 1, token()))
            .await
            .unwrap();
        chain.set_online(false);

        let report = queue.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(queue.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_submission_holds_back_its_lane() {
        let (queue, chain) = queue_with("100", 10);
        queue
            .enqueue(&payment_now("0xa", "10", 1, token()))
            .await
            .unwrap();
        queue
            .enqueue(&payment_now("0xb", "20", 1, token()))
            .await
            .unwrap();
        chain.fail_broadcast.store(true, Ordering::SeqCst);

        let report = queue.sweep().await.unwrap();
        assert_eq!(report.submitted, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.held_back, 1);
        // The held-back entry is still pending for a later sweep.
        assert_eq!(queue.pending().unwrap().len(), 1);
        assert_eq!(queue.pending().unwrap()[0].to, "0xb");
    }

    #[tokio::test]
    async fn other_lanes_continue_past_a_failure() {
        let (queue, chain) = queue_with("100", 10);
        queue
            .enqueue(&payment_now("0xa", "10", 1, token()))
            .await
            .unwrap();
        let mut other = payment_now("0xz", "10", 137, token());
        other.chain_id = 137;
        queue.enqueue(&other).await.unwrap();

        chain.fail_broadcast.store(true, Ordering::SeqCst);
        let report = queue.sweep().await.unwrap();
        // Both lanes were attempted: a failure in one lane never stops
        // the other from being tried.
        assert_eq!(report.failed, 2);
        assert_eq!(report.held_back, 0);
    }
}

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! Chain access seam.
//!
//! The transport never talks to a blockchain itself — everything it
//! needs goes through [`ChainBroadcaster`], injected by the host
//! application. Implementations wrap whatever RPC stack the host uses;
//! the trait only promises what the payment flow and the offline queue
//! actually consume: connectivity state, signing, broadcast, the
//! account's confirmed nonce, and its on-chain balance.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{BeamError, BeamResult};
use crate::wire::payment::PaymentPayload;

/// A transaction signed and serialized by the host's wallet, opaque to
/// the transport.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// Raw bytes ready for broadcast.
    pub raw: Vec<u8>,
    /// Transaction hash as the chain will report it.
    pub hash: String,
    /// Account nonce the transaction was signed with.
    pub nonce: u64,
}

/// Host-provided gateway to the chain.
#[async_trait]
pub trait ChainBroadcaster: Send + Sync {
    /// Whether the node currently has chain connectivity. Consulted
    /// before every execution attempt; `false` routes payments to the
    /// offline queue.
    async fn is_online(&self) -> bool;

    /// Sign a payment into a broadcast-ready transaction using the next
    /// local nonce. Called for both immediate execution and queueing —
    /// queued entries are signed at enqueue time so the device can go
    /// fully offline afterwards.
    async fn sign_transaction(&self, payment: &PaymentPayload) -> BeamResult<SignedTransaction>;

    /// Broadcast a previously signed transaction. Returns the chain's
    /// transaction hash on acceptance.
    async fn broadcast(&self, tx: &SignedTransaction) -> BeamResult<String>;

    /// The account's last confirmed on-chain nonce.
    async fn account_nonce(&self) -> BeamResult<u64>;

    /// Confirmed balance for `token` in base units.
    async fn balance_of(&self, token_address: &str) -> BeamResult<u128>;
}

/// Scriptable in-memory [`ChainBroadcaster`]: balance and connectivity
/// are plain fields, broadcasts are recorded in order. Backs the demo
/// relay and the test suite; a production host supplies its own RPC
/// implementation instead.
pub struct InMemoryChain {
    online: AtomicBool,
    confirmed_nonce: AtomicU64,
    next_nonce: AtomicU64,
    balance: Mutex<u128>,
    broadcasts: Mutex<Vec<String>>,
    /// When set, every broadcast fails with a transport error.
    pub fail_broadcast: AtomicBool,
}

impl InMemoryChain {
    pub fn new(balance: u128) -> Self {
        Self {
            online: AtomicBool::new(true),
            confirmed_nonce: AtomicU64::new(0),
            next_nonce: AtomicU64::new(1),
            balance: Mutex::new(balance),
            broadcasts: Mutex::new(Vec::new()),
            fail_broadcast: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_confirmed_nonce(&self, nonce: u64) {
        self.confirmed_nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock() = balance;
    }

    /// Hashes broadcast so far, in submission order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().len()
    }
}

#[async_trait]
impl ChainBroadcaster for InMemoryChain {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn sign_transaction(&self, payment: &PaymentPayload) -> BeamResult<SignedTransaction> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let mut raw =
            serde_json::to_vec(payment).map_err(|e| BeamError::Serialization(e.to_string()))?;
        raw.extend_from_slice(&nonce.to_be_bytes());
        let hash = format!("0x{}", hex::encode(blake3::hash(&raw).as_bytes()));
        Ok(SignedTransaction { raw, hash, nonce })
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> BeamResult<String> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(BeamError::TransportUnavailable("rpc refused".into()));
        }
        self.broadcasts.lock().push(tx.hash.clone());
        Ok(tx.hash.clone())
    }

    async fn account_nonce(&self) -> BeamResult<u64> {
        Ok(self.confirmed_nonce.load(Ordering::SeqCst))
    }

    async fn balance_of(&self, _token_address: &str) -> BeamResult<u128> {
        Ok(*self.balance.lock())
    }
}

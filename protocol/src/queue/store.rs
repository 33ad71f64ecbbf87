// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! Queue persistence.
//!
//! Queued payments must survive process restarts, so the store is a
//! real on-disk structure: a sled tree keyed by a big-endian sequence
//! number (iteration order == creation order) with bincode values, plus
//! a small id→sequence index for status updates. An in-memory
//! implementation backs tests that don't care about durability.

use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{BeamError, BeamResult};
use crate::wire::payment::TokenInfo;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Lifecycle of a queued payment. `Pending` entries are the only ones a
/// sweep will touch; `Failed` is terminal and blocks the lane behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Submitted,
    Failed,
}

/// Proof that each pre-flight check actually ran before the entry was
/// persisted. All three must be true for a well-formed record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStamp {
    pub balance_checked: bool,
    pub duplicate_checked: bool,
    pub nonce_checked: bool,
}

impl SecurityStamp {
    pub fn complete() -> Self {
        Self {
            balance_checked: true,
            duplicate_checked: true,
            nonce_checked: true,
        }
    }
}

/// One payment waiting for connectivity. Signed at enqueue time; the
/// sweep only broadcasts, it never re-signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTransaction {
    /// Stable id (UUIDv4), independent of storage order.
    pub id: String,
    pub to: String,
    /// Human-readable decimal amount, as carried on the wire.
    pub amount: String,
    pub chain_id: u64,
    pub token: TokenInfo,
    /// Broadcast-ready signed transaction bytes.
    pub signed_payload: Vec<u8>,
    /// Hash the chain will report once submitted.
    pub tx_hash: String,
    /// Account nonce the payload was signed with.
    pub nonce: u64,
    pub status: TxStatus,
    /// Unix seconds.
    pub created_at: i64,
    pub security_stamp: SecurityStamp,
}

impl QueuedTransaction {
    /// Lane key: mutations are serialized per chain/token.
    pub fn lane(&self) -> (u64, String) {
        (self.chain_id, self.token.address.clone())
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable ordered store for queued payments.
pub trait QueueStore: Send + Sync {
    /// Persist a new entry, returning its sequence number. Sequence
    /// numbers are strictly increasing; iteration follows them.
    fn append(&self, tx: &QueuedTransaction) -> BeamResult<u64>;

    /// All `Pending` entries in creation order.
    fn list_pending(&self) -> BeamResult<Vec<QueuedTransaction>>;

    /// Update one entry's status by id. Unknown ids are an error.
    fn update_status(&self, id: &str, status: TxStatus) -> BeamResult<()>;
}

// ---------------------------------------------------------------------------
// Sled implementation
// ---------------------------------------------------------------------------

const QUEUE_TREE: &str = "queue";
const INDEX_TREE: &str = "queue_index";

/// Production store on sled.
pub struct SledQueueStore {
    queue: sled::Tree,
    index: sled::Tree,
    db: sled::Db,
}

impl SledQueueStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> BeamResult<Self> {
        let db = sled::open(path).map_err(|e| BeamError::Store(e.to_string()))?;
        Self::from_db(db)
    }

    /// Throwaway store backed by a temporary sled database.
    pub fn temporary() -> BeamResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| BeamError::Store(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> BeamResult<Self> {
        let queue = db
            .open_tree(QUEUE_TREE)
            .map_err(|e| BeamError::Store(e.to_string()))?;
        let index = db
            .open_tree(INDEX_TREE)
            .map_err(|e| BeamError::Store(e.to_string()))?;
        Ok(Self { queue, index, db })
    }

    fn load(&self, seq_key: &[u8]) -> BeamResult<Option<QueuedTransaction>> {
        let Some(bytes) = self
            .queue
            .get(seq_key)
            .map_err(|e| BeamError::Store(e.to_string()))?
        else {
            return Ok(None);
        };
        let tx = bincode::deserialize(&bytes).map_err(|e| BeamError::Serialization(e.to_string()))?;
        Ok(Some(tx))
    }
}

impl QueueStore for SledQueueStore {
    fn append(&self, tx: &QueuedTransaction) -> BeamResult<u64> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| BeamError::Store(e.to_string()))?;
        let bytes = bincode::serialize(tx).map_err(|e| BeamError::Serialization(e.to_string()))?;
        self.queue
            .insert(seq.to_be_bytes(), bytes)
            .map_err(|e| BeamError::Store(e.to_string()))?;
        self.index
            .insert(tx.id.as_bytes(), &seq.to_be_bytes())
            .map_err(|e| BeamError::Store(e.to_string()))?;
        self.queue
            .flush()
            .map_err(|e| BeamError::Store(e.to_string()))?;
        Ok(seq)
    }

    fn list_pending(&self) -> BeamResult<Vec<QueuedTransaction>> {
        let mut pending = Vec::new();
        for item in self.queue.iter() {
            let (_, bytes) = item.map_err(|e| BeamError::Store(e.to_string()))?;
            let tx: QueuedTransaction =
                bincode::deserialize(&bytes).map_err(|e| BeamError::Serialization(e.to_string()))?;
            if tx.status == TxStatus::Pending {
                pending.push(tx);
            }
        }
        Ok(pending)
    }

    fn update_status(&self, id: &str, status: TxStatus) -> BeamResult<()> {
        let seq_key = self
            .index
            .get(id.as_bytes())
            .map_err(|e| BeamError::Store(e.to_string()))?
            .ok_or_else(|| BeamError::Store(format!("unknown queue entry {id}")))?;
        let mut tx = self
            .load(&seq_key)?
            .ok_or_else(|| BeamError::Store(format!("dangling index for {id}")))?;
        tx.status = status;
        let bytes = bincode::serialize(&tx).map_err(|e| BeamError::Serialization(e.to_string()))?;
        self.queue
            .insert(seq_key, bytes)
            .map_err(|e| BeamError::Store(e.to_string()))?;
        self.queue
            .flush()
            .map_err(|e| BeamError::Store(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Non-durable store for tests.
#[derive(Default)]
pub struct MemoryQueueStore {
    entries: Mutex<Vec<QueuedTransaction>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn append(&self, tx: &QueuedTransaction) -> BeamResult<u64> {
        let mut entries = self.entries.lock();
        entries.push(tx.clone());
        Ok(entries.len() as u64 - 1)
    }

    fn list_pending(&self) -> BeamResult<Vec<QueuedTransaction>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|tx| tx.status == TxStatus::Pending)
            .cloned()
            .collect())
    }

    fn update_status(&self, id: &str, status: TxStatus) -> BeamResult<()> {
        let mut entries = self.entries.lock();
        let tx = entries
            .iter_mut()
            .find(|tx| tx.id == id)
            .ok_or_else(|| BeamError::Store(format!("unknown queue entry {id}")))?;
        tx.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, amount: &str) -> QueuedTransaction {
        QueuedTransaction {
            id: id.into(),
            to: "0xrecipient".into(),
            amount: amount.into(),
            chain_id: 1,
            token: TokenInfo::native("ETH", 18),
            signed_payload: vec![1, 2, 3],
            tx_hash: format!("0xhash-{id}"),
            nonce: 1,
            status: TxStatus::Pending,
            created_at: 1_700_000_000,
            security_stamp: SecurityStamp::complete(),
        }
    }

    #[test]
    fn sled_append_preserves_creation_order() {
        let store = SledQueueStore::temporary().unwrap();
        store.append(&sample("a", "1.0")).unwrap();
        store.append(&sample("b", "2.0")).unwrap();
        store.append(&sample("c", "3.0")).unwrap();

        let ids: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|tx| tx.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn sled_update_status_removes_from_pending() {
        let store = SledQueueStore::temporary().unwrap();
        store.append(&sample("a", "1.0")).unwrap();
        store.append(&sample("b", "2.0")).unwrap();

        store.update_status("a", TxStatus::Submitted).unwrap();
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
    }

    #[test]
    fn sled_unknown_id_is_an_error() {
        let store = SledQueueStore::temporary().unwrap();
        assert!(store.update_status("nope", TxStatus::Failed).is_err());
    }

    #[test]
    fn sled_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledQueueStore::open(dir.path()).unwrap();
            store.append(&sample("a", "1.0")).unwrap();
        }
        let store = SledQueueStore::open(dir.path()).unwrap();
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a");
        assert!(pending[0].security_stamp.balance_checked);
    }

    #[test]
    fn memory_store_behaves_like_sled() {
        let store = MemoryQueueStore::new();
        store.append(&sample("a", "1.0")).unwrap();
        store.append(&sample("b", "2.0")).unwrap();
        store.update_status("b", TxStatus::Failed).unwrap();

        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a");
    }
}

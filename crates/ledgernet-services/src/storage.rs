//! Ledger storage seam.
//!
//! The network layer never talks to a database directly. Everything it needs
//! from the chain (tip, blocks, transaction status, pending queues, candidate
//! records, relayed data) goes through the `Ledger` trait. `MemoryLedger` is
//! the in-process implementation used by the daemon and by tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use ledgernet_core::message::{PrivateDataRequest, PrivateFileRequest, SubNodeDataRequest};
use ledgernet_core::wire::ZERO_HASH;
use ledgernet_core::Hash;
use thiserror::Error;

/// Height and hash of the last applied block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub block_id: i64,
    pub hash: Hash,
}

/// A block announced by a peer and queued for fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    pub hash: Hash,
    pub block_id: i64,
    pub node_position: i64,
}

/// A transaction body waiting to be included in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: Hash,
    pub data: Vec<u8>,
    /// Stop-network transactions jump the queue.
    pub high_priority: bool,
}

/// A block body as stored in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub block_id: i64,
    pub hash: Hash,
    pub data: Vec<u8>,
}

/// Last positive vote tally seen for a candidate node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateNodeRecord {
    pub address: String,
    pub tcp_address: String,
    pub reply_count: i64,
    pub reply_timestamp: i64,
    /// The tally document as received.
    pub raw_payload: Vec<u8>,
}

/// Relayed private or sharded data, keyed by the hash of its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPayload {
    PrivateData(PrivateDataRequest),
    PrivateFile(PrivateFileRequest),
    SubNodeData(SubNodeDataRequest),
}

impl RelayPayload {
    pub fn task_uuid(&self) -> &str {
        match self {
            RelayPayload::PrivateData(r) => &r.task_uuid,
            RelayPayload::PrivateFile(r) => &r.task_uuid,
            RelayPayload::SubNodeData(r) => &r.task_uuid,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            RelayPayload::PrivateData(r) => &r.data,
            RelayPayload::PrivateFile(r) => &r.data,
            RelayPayload::SubNodeData(r) => &r.data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    pub hash: Hash,
    pub received_at: i64,
    pub payload: RelayPayload,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("ledger lock poisoned")]
    Poisoned,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Everything the network layer reads from or writes to the chain.
///
/// Inserts are idempotent: a duplicate key is not an error, the call just
/// reports `false`.
pub trait Ledger: Send + Sync {
    /// The last applied block. Block id 0 and the zero hash when empty.
    fn chain_tip(&self) -> Result<ChainTip, StorageError>;

    fn pending_block_exists(&self, hash: &Hash) -> Result<bool, StorageError>;
    fn insert_pending_block(&self, block: PendingBlock) -> Result<bool, StorageError>;

    /// Already recorded in the transaction log.
    fn tx_in_log(&self, hash: &Hash) -> Result<bool, StorageError>;
    /// Already applied to state.
    fn tx_applied(&self, hash: &Hash) -> Result<bool, StorageError>;
    /// Already waiting in the pending queue.
    fn tx_pending(&self, hash: &Hash) -> Result<bool, StorageError>;
    fn insert_pending_tx(&self, tx: PendingTransaction) -> Result<bool, StorageError>;

    fn block_hash(&self, block_id: i64) -> Result<Option<Hash>, StorageError>;
    /// Blocks with id strictly greater than `block_id`, ascending.
    fn blocks_after(&self, block_id: i64, limit: usize) -> Result<Vec<StoredBlock>, StorageError>;
    /// Blocks with id at most `block_id`, descending.
    fn blocks_down_from(&self, block_id: i64, limit: usize)
        -> Result<Vec<StoredBlock>, StorageError>;
    /// Highest stored block id, 0 when there are none.
    fn max_block_id(&self) -> Result<i64, StorageError>;

    fn upsert_candidate(&self, record: CandidateNodeRecord) -> Result<(), StorageError>;
    fn candidate(&self, address: &str) -> Result<Option<CandidateNodeRecord>, StorageError>;

    fn store_relayed(&self, record: RelayRecord) -> Result<bool, StorageError>;
}

/// In-memory ledger.
#[derive(Default)]
pub struct MemoryLedger {
    blocks: RwLock<BTreeMap<i64, StoredBlock>>,
    pending_blocks: DashMap<Hash, PendingBlock>,
    tx_log: DashSet<Hash>,
    applied: DashSet<Hash>,
    pending_txs: DashMap<Hash, PendingTransaction>,
    candidates: DashMap<String, CandidateNodeRecord>,
    relayed: DashMap<Hash, RelayRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or replace a block. The highest id becomes the chain tip.
    pub fn push_block(&self, block: StoredBlock) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write().map_err(|_| StorageError::Poisoned)?;
        blocks.insert(block.block_id, block);
        Ok(())
    }

    pub fn record_in_log(&self, hash: Hash) {
        self.tx_log.insert(hash);
    }

    pub fn record_applied(&self, hash: Hash) {
        self.applied.insert(hash);
    }

    pub fn pending_block(&self, hash: &Hash) -> Option<PendingBlock> {
        self.pending_blocks.get(hash).map(|b| b.clone())
    }

    pub fn pending_block_count(&self) -> usize {
        self.pending_blocks.len()
    }

    pub fn pending_tx(&self, hash: &Hash) -> Option<PendingTransaction> {
        self.pending_txs.get(hash).map(|t| t.clone())
    }

    pub fn pending_tx_count(&self) -> usize {
        self.pending_txs.len()
    }

    pub fn relayed(&self, hash: &Hash) -> Option<RelayRecord> {
        self.relayed.get(hash).map(|r| r.clone())
    }
}

impl Ledger for MemoryLedger {
    fn chain_tip(&self) -> Result<ChainTip, StorageError> {
        let blocks = self.blocks.read().map_err(|_| StorageError::Poisoned)?;
        Ok(blocks
            .values()
            .next_back()
            .map(|b| ChainTip {
                block_id: b.block_id,
                hash: b.hash,
            })
            .unwrap_or(ChainTip {
                block_id: 0,
                hash: ZERO_HASH,
            }))
    }

    fn pending_block_exists(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.pending_blocks.contains_key(hash))
    }

    fn insert_pending_block(&self, block: PendingBlock) -> Result<bool, StorageError> {
        match self.pending_blocks.entry(block.hash) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(block);
                Ok(true)
            }
        }
    }

    fn tx_in_log(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.tx_log.contains(hash))
    }

    fn tx_applied(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.applied.contains(hash))
    }

    fn tx_pending(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.pending_txs.contains_key(hash))
    }

    fn insert_pending_tx(&self, tx: PendingTransaction) -> Result<bool, StorageError> {
        match self.pending_txs.entry(tx.hash) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(true)
            }
        }
    }

    fn block_hash(&self, block_id: i64) -> Result<Option<Hash>, StorageError> {
        let blocks = self.blocks.read().map_err(|_| StorageError::Poisoned)?;
        Ok(blocks.get(&block_id).map(|b| b.hash))
    }

    fn blocks_after(&self, block_id: i64, limit: usize) -> Result<Vec<StoredBlock>, StorageError> {
        let blocks = self.blocks.read().map_err(|_| StorageError::Poisoned)?;
        let Some(from) = block_id.checked_add(1) else {
            return Ok(Vec::new());
        };
        Ok(blocks.range(from..).take(limit).map(|(_, b)| b.clone()).collect())
    }

    fn blocks_down_from(
        &self,
        block_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredBlock>, StorageError> {
        let blocks = self.blocks.read().map_err(|_| StorageError::Poisoned)?;
        Ok(blocks
            .range(..=block_id)
            .rev()
            .take(limit)
            .map(|(_, b)| b.clone())
            .collect())
    }

    fn max_block_id(&self) -> Result<i64, StorageError> {
        let blocks = self.blocks.read().map_err(|_| StorageError::Poisoned)?;
        Ok(blocks.keys().next_back().copied().unwrap_or(0))
    }

    fn upsert_candidate(&self, record: CandidateNodeRecord) -> Result<(), StorageError> {
        self.candidates.insert(record.address.clone(), record);
        Ok(())
    }

    fn candidate(&self, address: &str) -> Result<Option<CandidateNodeRecord>, StorageError> {
        Ok(self.candidates.get(address).map(|c| c.clone()))
    }

    fn store_relayed(&self, record: RelayRecord) -> Result<bool, StorageError> {
        match self.relayed.entry(record.hash) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }
}

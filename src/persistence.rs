//! Snapshot persistence for the ledger.
//!
//! The chain is persisted as an ordered sequence of block records, one row
//! per block with the transaction array stored as JSON. Loading returns the
//! raw records; restore-time validation lives in
//! `Blockchain::from_snapshot`, which the node runs before the snapshot
//! becomes authoritative.

use crate::block::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends. Implementations provide wholesale
/// saving/loading of the chain snapshot.
pub trait Persistence: Send + Sync {
    /// Replace the stored snapshot with the given ordered block sequence.
    fn save_chain(&self, blocks: &[Block]) -> Result<(), ChainError>;

    /// Load the stored snapshot. `None` means no snapshot has been saved.
    fn load_chain(&self) -> Result<Option<Vec<Block>>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                hash TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                transactions TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }
}

impl Persistence for Database {
    fn save_chain(&self, blocks: &[Block]) -> Result<(), ChainError> {
        let conn_guard = self
            .conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to start transaction: {}", e)))?;

        // A replacement chain may be shorter at a given height than what was
        // stored before, so the snapshot is rewritten wholesale.
        tx.execute("DELETE FROM blocks", [])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to clear blocks: {}", e)))?;

        for block in blocks {
            let transactions_json = serde_json::to_string(&block.transactions).map_err(|e| {
                ChainError::DatabaseError(format!("Failed to serialize transactions: {}", e))
            })?;

            tx.execute(
                "INSERT INTO blocks (height, hash, previous_hash, timestamp, nonce, transactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    block.index as i64,
                    block.hash,
                    block.previous_hash,
                    block.timestamp,
                    block.nonce as i64,
                    transactions_json,
                ],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    fn load_chain(&self) -> Result<Option<Vec<Block>>, ChainError> {
        let conn_guard = self
            .conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        let mut stmt = conn_guard
            .prepare(
                "SELECT height, hash, previous_hash, timestamp, nonce, transactions
                 FROM blocks ORDER BY height ASC",
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let height: i64 = row.get(0)?;
                let hash: String = row.get(1)?;
                let previous_hash: String = row.get(2)?;
                let timestamp: i64 = row.get(3)?;
                let nonce: i64 = row.get(4)?;
                let transactions_json: String = row.get(5)?;
                Ok((height, hash, previous_hash, timestamp, nonce, transactions_json))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row_result in rows {
            let (height, hash, previous_hash, timestamp, nonce, transactions_json) = row_result
                .map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;

            let transactions: Vec<Transaction> = serde_json::from_str(&transactions_json)
                .map_err(|e| {
                    ChainError::LoadCorrupt(format!(
                        "block {} has unreadable transactions: {}",
                        height, e
                    ))
                })?;

            blocks.push(Block {
                index: height as u64,
                timestamp,
                transactions,
                previous_hash,
                nonce: nonce as u64,
                hash,
            });
        }

        if blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(blocks))
    }
}

/// Simple in-memory persistence implementation useful for tests and
/// ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    blocks: Arc<Mutex<Vec<Block>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_chain(&self, blocks: &[Block]) -> Result<(), ChainError> {
        let mut stored = self
            .blocks
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        *stored = blocks.to_vec();
        Ok(())
    }

    fn load_chain(&self) -> Result<Option<Vec<Block>>, ChainError> {
        let stored = self
            .blocks
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        if stored.is_empty() {
            return Ok(None);
        }
        Ok(Some(stored.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::transaction::{action, Transaction};

    fn mined_chain() -> Blockchain {
        let mut chain = Blockchain::new(1, 100);
        let mut tx = Transaction::new(
            Some("alice".to_string()),
            "bob",
            10,
            action::TRANSFER,
            serde_json::Value::Null,
        );
        tx.signature = Some("ad".repeat(64));
        chain.add_transaction(tx).unwrap();
        chain.mine_pending_transactions("miner").unwrap();
        chain
    }

    #[test]
    fn test_database_round_trip() {
        let chain = mined_chain();

        let db = Database::open(":memory:").unwrap();
        db.save_chain(&chain.export_chain()).unwrap();

        let loaded = db.load_chain().unwrap().unwrap();
        assert_eq!(loaded, chain.export_chain());

        let restored = Blockchain::from_snapshot(loaded, 1, 100).unwrap();
        assert!(restored.is_valid());
        assert_eq!(restored.balance_of("bob"), 10);
    }

    #[test]
    fn test_database_save_is_wholesale() {
        let chain = mined_chain();
        let db = Database::open(":memory:").unwrap();
        db.save_chain(&chain.export_chain()).unwrap();

        // Saving a shorter sequence must not leave stale tail rows behind.
        let genesis_only = &chain.export_chain()[..1];
        db.save_chain(genesis_only).unwrap();

        let loaded = db.load_chain().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_database_empty_means_no_snapshot() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.load_chain().unwrap().is_none());
    }

    #[test]
    fn test_in_memory_round_trip() {
        let chain = mined_chain();
        let store = InMemoryPersistence::new();

        assert!(store.load_chain().unwrap().is_none());
        store.save_chain(&chain.export_chain()).unwrap();

        let loaded = store.load_chain().unwrap().unwrap();
        assert_eq!(loaded, chain.export_chain());
    }
}

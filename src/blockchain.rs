//! Ledger core: the block sequence, the pending pool, validation, mining
//! orchestration, and the fork-choice/replacement rule.

use crate::block::Block;
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::policy::TransactionPolicy;
use crate::transaction::Transaction;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Previous-hash sentinel carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

const BLOCK_EVENT_CAPACITY: usize = 64;

/// The append-only, hash-linked ledger.
///
/// The chain is never empty: a genesis block is built at construction. It
/// grows by single-block appends from mining, or is replaced wholesale by
/// `replace_chain`; no other mutation of history exists.
pub struct Blockchain {
    blocks: Vec<Block>,
    mempool: Mempool,
    pub difficulty: u32,
    pub mining_reward: u64,
    policy: Option<Box<dyn TransactionPolicy>>,
    block_events: broadcast::Sender<Block>,
}

impl Blockchain {
    pub fn new(difficulty: u32, mining_reward: u64) -> Self {
        let (block_events, _) = broadcast::channel(BLOCK_EVENT_CAPACITY);
        Blockchain {
            blocks: vec![Self::create_genesis()],
            mempool: Mempool::new(),
            difficulty,
            mining_reward,
            policy: None,
            block_events,
        }
    }

    /// Rebuild a chain from persisted block records.
    ///
    /// The sequence must be non-empty, start with a well-formed genesis, and
    /// pass the same linkage/hash validation as `is_valid`; anything else is
    /// `LoadCorrupt`, and the snapshot must not become authoritative.
    pub fn from_snapshot(
        blocks: Vec<Block>,
        difficulty: u32,
        mining_reward: u64,
    ) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Err(ChainError::LoadCorrupt(
                "snapshot contains no blocks".to_string(),
            ));
        }
        let genesis = &blocks[0];
        if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err(ChainError::LoadCorrupt(
                "snapshot genesis is malformed".to_string(),
            ));
        }
        if !Self::sequence_is_valid(&blocks) {
            return Err(ChainError::LoadCorrupt(
                "snapshot fails linkage/hash validation".to_string(),
            ));
        }

        let (block_events, _) = broadcast::channel(BLOCK_EVENT_CAPACITY);
        Ok(Blockchain {
            blocks,
            mempool: Mempool::new(),
            difficulty,
            mining_reward,
            policy: None,
            block_events,
        })
    }

    fn create_genesis() -> Block {
        Block::new(
            0,
            chrono::Utc::now().timestamp_millis(),
            Vec::new(),
            GENESIS_PREVIOUS_HASH,
        )
    }

    /// Install the business-rule validator consulted for gated action tags.
    pub fn set_policy(&mut self, policy: Box<dyn TransactionPolicy>) {
        self.policy = Some(policy);
    }

    pub fn latest_block(&self) -> &Block {
        self.blocks
            .last()
            .expect("chain always contains the genesis block")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Current pool contents, in arrival order.
    pub fn pending(&self) -> &[Transaction] {
        self.mempool.transactions()
    }

    /// Subscribe to mined-block notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Block> {
        self.block_events.subscribe()
    }

    /// Validate a submitted transaction and append it to the pool.
    ///
    /// Requires a non-empty recipient and `tx.is_valid()`; when a policy is
    /// installed and the action tag is gated, the policy may veto. On any
    /// failure the pool is untouched.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), ChainError> {
        if tx.recipient.trim().is_empty() {
            return Err(ChainError::InvalidTransaction(
                "missing recipient".to_string(),
            ));
        }
        tx.is_valid()?;
        tx.validate_size()?;

        if let Some(policy) = &self.policy {
            if policy.applies_to(&tx.action) && !policy.validate(&tx) {
                return Err(ChainError::InvalidTransaction(format!(
                    "action '{}' rejected by policy",
                    tx.action
                )));
            }
        }

        self.mempool.add(tx);
        Ok(())
    }

    /// Build a block from the pool, run proof-of-work, append it, publish a
    /// block-mined notification, and reset the pool to a single reward
    /// transaction for `reward_recipient`.
    pub fn mine_pending_transactions(&mut self, reward_recipient: &str) -> Result<Block, ChainError> {
        let cancel = AtomicBool::new(false);
        self.mine_pending_transactions_cancellable(reward_recipient, &cancel)
    }

    /// Cancellable form of `mine_pending_transactions`.
    ///
    /// On `MiningInterrupted` the chain and pool are unchanged; the append,
    /// notification, and pool reset all happen after the target is met.
    pub fn mine_pending_transactions_cancellable(
        &mut self,
        reward_recipient: &str,
        cancel: &AtomicBool,
    ) -> Result<Block, ChainError> {
        let mut block = Block::new(
            self.blocks.len() as u64,
            chrono::Utc::now().timestamp_millis(),
            self.mempool.transactions().to_vec(),
            self.latest_block().hash.clone(),
        );
        block.mine_cancellable(self.difficulty, cancel)?;

        info!(
            index = block.index,
            hash = %block.hash,
            tx_count = block.transactions.len(),
            "mined block"
        );

        self.blocks.push(block.clone());
        self.mempool
            .reset_with(Transaction::reward(reward_recipient, self.mining_reward));
        let _ = self.block_events.send(block.clone());
        Ok(block)
    }

    /// Running balance for an address: full scan over every block, `+amount`
    /// where the address is the recipient, `-amount` where it is the sender.
    /// Recomputed on every call, no caching.
    pub fn balance_of(&self, address: &str) -> i64 {
        let mut balance: i64 = 0;
        for block in &self.blocks {
            for tx in &block.transactions {
                if tx.recipient == address {
                    balance += tx.amount as i64;
                }
                if tx.sender.as_deref() == Some(address) {
                    balance -= tx.amount as i64;
                }
            }
        }
        balance
    }

    /// Whole-chain validity: every non-genesis block must hash to its stored
    /// value and link to its predecessor's hash.
    ///
    /// Does not re-check proof-of-work targets or embedded transaction
    /// signatures (see DESIGN.md).
    pub fn is_valid(&self) -> bool {
        Self::sequence_is_valid(&self.blocks)
    }

    fn sequence_is_valid(blocks: &[Block]) -> bool {
        for i in 1..blocks.len() {
            let block = &blocks[i];
            if block.hash != block.compute_hash() {
                return false;
            }
            if block.previous_hash != blocks[i - 1].hash {
                return false;
            }
        }
        true
    }

    /// Fork choice: adopt `candidate` iff it is strictly longer than the
    /// current chain and passes linkage/hash validation over its own
    /// sequence. Length-only, not cumulative-work (see DESIGN.md). On
    /// rejection no mutation occurs.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), ChainError> {
        if candidate.len() <= self.blocks.len() {
            let reason = format!(
                "candidate length {} does not exceed current length {}",
                candidate.len(),
                self.blocks.len()
            );
            warn!(%reason, "rejected candidate chain");
            return Err(ChainError::ChainReplaceRejected(reason));
        }
        if !Self::sequence_is_valid(&candidate) {
            let reason = "candidate fails linkage/hash validation".to_string();
            warn!(%reason, "rejected candidate chain");
            return Err(ChainError::ChainReplaceRejected(reason));
        }

        info!(
            old_len = self.blocks.len(),
            new_len = candidate.len(),
            "adopting replacement chain"
        );
        self.blocks = candidate;
        Ok(())
    }

    /// Full ordered block sequence for broadcast to peers.
    pub fn export_chain(&self) -> Vec<Block> {
        self.blocks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::GatedPolicy;
    use crate::transaction::action;
    use serde_json::json;

    fn transfer(sender: &str, recipient: &str, amount: u64) -> Transaction {
        let mut tx = Transaction::new(
            Some(sender.to_string()),
            recipient,
            amount,
            action::TRANSFER,
            serde_json::Value::Null,
        );
        // Presence-only signature check: a marker satisfies the pool rules.
        tx.signature = Some("ad".repeat(64));
        tx
    }

    #[test]
    fn test_genesis_shape() {
        let chain = Blockchain::new(2, 100);
        assert_eq!(chain.len(), 1);

        let genesis = &chain.blocks()[0];
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash, genesis.compute_hash());
    }

    #[test]
    fn test_add_transaction_requires_recipient() {
        let mut chain = Blockchain::new(1, 100);
        let tx = transfer("alice", "", 10);
        let err = chain.add_transaction(tx).unwrap_err();
        assert!(matches!(err, ChainError::InvalidTransaction(_)));
        assert!(chain.pending().is_empty());
    }

    #[test]
    fn test_add_transaction_requires_signature_for_senders() {
        let mut chain = Blockchain::new(1, 100);
        let mut tx = transfer("alice", "bob", 10);
        tx.signature = None;
        assert!(chain.add_transaction(tx).is_err());
        assert!(chain.pending().is_empty());
    }

    #[test]
    fn test_add_transaction_accepts_reward_unconditionally() {
        let mut chain = Blockchain::new(1, 100);
        chain
            .add_transaction(Transaction::reward("miner", 100))
            .unwrap();
        assert_eq!(chain.pending().len(), 1);
    }

    #[test]
    fn test_policy_vetoes_gated_actions_only() {
        let mut chain = Blockchain::new(1, 100);
        chain.set_policy(Box::new(GatedPolicy::new(
            [action::ORDER_CREATED],
            |tx: &Transaction| tx.amount <= 500,
        )));

        let mut order = Transaction::new(
            Some("alice".to_string()),
            "supplier",
            9_000,
            action::ORDER_CREATED,
            json!({"order_id": "PO-1"}),
        );
        order.signature = Some("ad".repeat(64));
        let err = chain.add_transaction(order).unwrap_err();
        assert!(err.to_string().contains("rejected by policy"));
        assert!(chain.pending().is_empty());

        // The same amount on an ungated action passes straight through.
        chain.add_transaction(transfer("alice", "bob", 9_000)).unwrap();
        assert_eq!(chain.pending().len(), 1);
    }

    #[test]
    fn test_mining_end_to_end() {
        let mut chain = Blockchain::new(2, 100);
        chain.add_transaction(transfer("A", "B", 10)).unwrap();

        let block = chain.mine_pending_transactions("M").unwrap();
        assert_eq!(chain.len(), 2);
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.previous_hash, chain.blocks()[0].hash);

        assert_eq!(chain.balance_of("B"), 10);
        assert_eq!(chain.balance_of("A"), -10);

        // The reward sits in the pool until the next block is mined.
        assert_eq!(chain.balance_of("M"), 0);
        assert_eq!(chain.pending().len(), 1);
        let reward = &chain.pending()[0];
        assert!(reward.sender.is_none());
        assert_eq!(reward.recipient, "M");
        assert_eq!(reward.amount, 100);

        chain.mine_pending_transactions("M").unwrap();
        assert_eq!(chain.balance_of("M"), 100);
    }

    #[test]
    fn test_mined_block_notification() {
        let mut chain = Blockchain::new(1, 100);
        let mut events = chain.subscribe();

        chain.add_transaction(transfer("A", "B", 5)).unwrap();
        let mined = chain.mine_pending_transactions("M").unwrap();

        let notified = events.try_recv().unwrap();
        assert_eq!(notified.hash, mined.hash);
    }

    #[test]
    fn test_tampering_breaks_validity() {
        let mut chain = Blockchain::new(1, 100);
        chain.add_transaction(transfer("A", "B", 10)).unwrap();
        chain.mine_pending_transactions("M").unwrap();
        chain.mine_pending_transactions("M").unwrap();
        assert!(chain.is_valid());

        // Transaction content
        let mut tampered = chain.export_chain();
        tampered[1].transactions[0].amount = 9_999;
        assert!(!Blockchain::sequence_is_valid(&tampered));

        let mut tampered = chain.export_chain();
        tampered[1].transactions[0].sender = Some("mallory".to_string());
        assert!(!Blockchain::sequence_is_valid(&tampered));

        // Header fields
        let mut tampered = chain.export_chain();
        tampered[2].timestamp += 1;
        assert!(!Blockchain::sequence_is_valid(&tampered));

        let mut tampered = chain.export_chain();
        tampered[1].nonce += 1;
        assert!(!Blockchain::sequence_is_valid(&tampered));

        let mut tampered = chain.export_chain();
        tampered[2].previous_hash = "11".repeat(32);
        assert!(!Blockchain::sequence_is_valid(&tampered));

        // The stored hash itself
        let mut tampered = chain.export_chain();
        tampered[1].hash = "22".repeat(32);
        assert!(!Blockchain::sequence_is_valid(&tampered));
    }

    #[test]
    fn test_replace_chain_fork_choice() {
        let mut longer = Blockchain::new(1, 100);
        longer.add_transaction(transfer("A", "B", 10)).unwrap();
        longer.mine_pending_transactions("M").unwrap();
        longer.mine_pending_transactions("M").unwrap();
        let candidate = longer.export_chain();
        assert_eq!(candidate.len(), 3);

        // Shorter candidate rejected
        let mut chain = Blockchain::new(1, 100);
        chain.mine_pending_transactions("M").unwrap();
        chain.mine_pending_transactions("M").unwrap();
        chain.mine_pending_transactions("M").unwrap();
        let current = chain.export_chain();
        assert!(matches!(
            chain.replace_chain(candidate[..2].to_vec()),
            Err(ChainError::ChainReplaceRejected(_))
        ));
        assert_eq!(chain.export_chain(), current);

        // Equal-length candidate rejected
        let mut chain = Blockchain::new(1, 100);
        chain.mine_pending_transactions("M").unwrap();
        chain.mine_pending_transactions("M").unwrap();
        assert!(chain.replace_chain(candidate.clone()).is_err());

        // Longer but tampered candidate rejected
        let mut chain = Blockchain::new(1, 100);
        let mut tampered = candidate.clone();
        tampered[1].transactions[0].amount = 1_000_000;
        assert!(chain.replace_chain(tampered).is_err());
        assert_eq!(chain.len(), 1);

        // Longer and valid candidate adopted
        let mut chain = Blockchain::new(1, 100);
        chain.replace_chain(candidate.clone()).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.balance_of("B"), 10);
    }

    #[test]
    fn test_conservation_outside_reward_transactions() {
        let mut chain = Blockchain::new(1, 100);
        chain.add_transaction(transfer("A", "B", 10)).unwrap();
        chain.add_transaction(transfer("B", "C", 4)).unwrap();
        let block = chain.mine_pending_transactions("M").unwrap();

        // No reward transaction in the first mined block: credits == debits.
        let credited: u64 = block.transactions.iter().map(|t| t.amount).sum();
        let debited: u64 = block
            .transactions
            .iter()
            .filter(|t| t.sender.is_some())
            .map(|t| t.amount)
            .sum();
        assert_eq!(credited, debited);

        // The next block carries the reward: net-new value equals the reward.
        let block = chain.mine_pending_transactions("M").unwrap();
        let credited: u64 = block.transactions.iter().map(|t| t.amount).sum();
        let debited: u64 = block
            .transactions
            .iter()
            .filter(|t| t.sender.is_some())
            .map(|t| t.amount)
            .sum();
        assert_eq!(credited - debited, 100);
    }

    #[test]
    fn test_from_snapshot_round_trip() {
        let mut chain = Blockchain::new(1, 100);
        chain.add_transaction(transfer("A", "B", 10)).unwrap();
        chain.mine_pending_transactions("M").unwrap();

        let restored = Blockchain::from_snapshot(chain.export_chain(), 1, 100).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.is_valid());
        assert_eq!(restored.balance_of("B"), 10);
    }

    #[test]
    fn test_from_snapshot_rejects_corruption() {
        let mut chain = Blockchain::new(1, 100);
        chain.add_transaction(transfer("A", "B", 10)).unwrap();
        chain.mine_pending_transactions("M").unwrap();

        let mut tampered = chain.export_chain();
        tampered[1].transactions[0].amount = 99;
        assert!(matches!(
            Blockchain::from_snapshot(tampered, 1, 100),
            Err(ChainError::LoadCorrupt(_))
        ));

        assert!(matches!(
            Blockchain::from_snapshot(Vec::new(), 1, 100),
            Err(ChainError::LoadCorrupt(_))
        ));

        let mut bad_genesis = chain.export_chain();
        bad_genesis[0].previous_hash = "33".repeat(32);
        assert!(matches!(
            Blockchain::from_snapshot(bad_genesis, 1, 100),
            Err(ChainError::LoadCorrupt(_))
        ));
    }

    #[test]
    fn test_mining_interruption_leaves_state_unchanged() {
        let mut chain = Blockchain::new(16, 100);
        chain.add_transaction(transfer("A", "B", 10)).unwrap();

        let cancel = AtomicBool::new(true);
        let result = chain.mine_pending_transactions_cancellable("M", &cancel);
        assert!(matches!(result, Err(ChainError::MiningInterrupted)));

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.pending().len(), 1);
        assert_eq!(chain.pending()[0].recipient, "B");
    }
}

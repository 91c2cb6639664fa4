//! Pending-transaction pool.
//!
//! The pool holds submitted, not-yet-mined transactions in arrival order.
//! Arrival order is the only ordering guarantee; mining fixes the final
//! inclusion order when the pool contents are copied into a block.

use crate::transaction::Transaction;

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Append a validated transaction.
    pub fn add(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    /// The current pool contents, in arrival order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Replace the entire pool with a single transaction.
    ///
    /// Used after a successful mine: the pool becomes exactly the next
    /// reward transaction. Anything submitted while mining ran is discarded
    /// here, not requeued (see DESIGN.md).
    pub fn reset_with(&mut self, tx: Transaction) {
        self.transactions.clear();
        self.transactions.push(tx);
    }
}

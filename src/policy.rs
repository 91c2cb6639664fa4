//! Business-rule hook consulted before transactions enter the pool.

use crate::transaction::Transaction;
use std::collections::HashSet;

/// External validator predicate for gated `action` tags.
///
/// `add_transaction` consults the installed policy only when
/// `applies_to(tx.action)` holds; a `false` from `validate` is surfaced to
/// the submitter as an invalid transaction and the pool stays untouched.
pub trait TransactionPolicy: Send + Sync {
    /// Whether this policy gates the given action tag.
    fn applies_to(&self, action: &str) -> bool;

    /// Accept or reject a transaction whose action is gated.
    fn validate(&self, tx: &Transaction) -> bool;
}

/// A policy over a fixed tag set, delegating the verdict to a predicate.
pub struct GatedPolicy<F>
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    gated_actions: HashSet<String>,
    predicate: F,
}

impl<F> GatedPolicy<F>
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    pub fn new(gated_actions: impl IntoIterator<Item = impl Into<String>>, predicate: F) -> Self {
        Self {
            gated_actions: gated_actions.into_iter().map(Into::into).collect(),
            predicate,
        }
    }
}

impl<F> TransactionPolicy for GatedPolicy<F>
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    fn applies_to(&self, action: &str) -> bool {
        self.gated_actions.contains(action)
    }

    fn validate(&self, tx: &Transaction) -> bool {
        (self.predicate)(tx)
    }
}

// src/core/pubsub/mod.rs

//! The publish-subscribe core: a subject trie behind a lock, plus the helpers
//! that validate and tokenize subjects.

use crate::core::metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

pub mod subject;
pub mod subscription;
pub mod trie;

pub use subscription::Subscription;
pub use trie::SubjectTrie;

/// The outcome of `SubscriptionRegistry::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeResult {
    Subscribed,
    /// An equal subscription was already registered; nothing changed.
    Duplicate,
}

/// `SubscriptionRegistry` is the shared index of every live subscription.
///
/// Lookups take a read lock; inserts and owner removal take the write lock. The
/// lock is never held while messages are delivered: matches are cloned out as
/// `Arc<Subscription>`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    trie: RwLock<SubjectTrie<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a subscription. The caller validates the subject first.
    pub fn subscribe(&self, subscription: Arc<Subscription>) -> SubscribeResult {
        let pattern = subscription.subject.clone();
        let tokens = subject::tokenize(&pattern);
        if self.trie.write().insert(&tokens, subscription) {
            metrics::ACTIVE_SUBSCRIPTIONS.inc();
            SubscribeResult::Subscribed
        } else {
            SubscribeResult::Duplicate
        }
    }

    /// Removes every subscription owned by `owner`, returning how many were removed.
    pub fn unsubscribe_by_owner(&self, owner: u64) -> usize {
        let removed = self.trie.write().retain(|sub| sub.owner != owner);
        if removed > 0 {
            metrics::ACTIVE_SUBSCRIPTIONS.sub(removed as f64);
            debug!("Removed {removed} subscription(s) of client {owner}.");
        }
        removed
    }

    /// Returns every subscription whose pattern matches `subject`, in no
    /// particular order.
    pub fn match_subject(&self, subject: &[u8]) -> Vec<Arc<Subscription>> {
        let tokens = subject::tokenize(subject);
        self.trie
            .read()
            .matches(&tokens)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trie.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

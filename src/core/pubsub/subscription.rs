// src/core/pubsub/subscription.rs

use bytes::Bytes;

/// A client's interest in a subject pattern.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subject: Bytes,
    pub sid: Bytes,
    /// Parsed and stored; delivery does not use it.
    pub queue_group: Option<Bytes>,
    /// The id of the session that created the subscription.
    pub owner: u64,
}

impl Subscription {
    pub fn new(subject: Bytes, sid: Bytes, queue_group: Option<Bytes>, owner: u64) -> Self {
        Self {
            subject,
            sid,
            queue_group,
            owner,
        }
    }
}

// The queue group is not part of a subscription's identity.
impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.sid == other.sid && self.subject == other.subject
    }
}

impl Eq for Subscription {}

//! Resolution of the key that decides which group a message joins.

use crate::{message::Message, types::Payload};
use std::sync::atomic::{AtomicU64, Ordering};

/// Extracts the correlation key from an inbound message.
///
/// Returning `None` makes the handler fail the call with
/// [MissingCorrelationKey](crate::CorrelationError::MissingCorrelationKey).
pub trait CorrelationStrategy<K, T>: Send + Sync {
    fn correlation_key(&self, message: &Message<T>) -> Option<K>;
}

impl<K, T, F> CorrelationStrategy<K, T> for F
where
    F: Fn(&Message<T>) -> Option<K> + Send + Sync,
{
    fn correlation_key(&self, message: &Message<T>) -> Option<K> {
        self(message)
    }
}

/// What to do with messages that carry no `correlation_id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeyPolicy {
    /// Reject the message with a missing key error.
    #[default]
    Fail,

    /// Give the message a generated key of its own, so that it forms a
    /// singleton group.
    Singleton,
}

/// Correlates messages by their `correlation_id` header.
#[derive(Debug, Default)]
pub struct HeaderCorrelation {
    policy: MissingKeyPolicy,
    singletons: AtomicU64,
}

impl HeaderCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: MissingKeyPolicy) -> Self {
        Self {
            policy,
            singletons: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> MissingKeyPolicy {
        self.policy
    }
}

impl<T> CorrelationStrategy<String, T> for HeaderCorrelation
where
    T: Payload,
{
    fn correlation_key(&self, message: &Message<T>) -> Option<String> {
        if let Some(correlation_id) = message.correlation_id() {
            return Some(correlation_id.to_string());
        }

        match self.policy {
            MissingKeyPolicy::Fail => None,
            MissingKeyPolicy::Singleton => {
                let id = self.singletons.fetch_add(1, Ordering::Relaxed);
                Some(format!("singleton-{id}"))
            }
        }
    }
}

use std::{fmt::Debug, hash::Hash};

/// The key that identifies a message group in the correlator.
pub trait Key: Clone + PartialEq + Eq + Hash + Debug + Sync + Send + 'static {}

impl<K> Key for K where K: Clone + PartialEq + Eq + Hash + Debug + Sync + Send + 'static {}

/// The payload carried by a [Message](crate::Message).
///
/// Payloads are opaque to the correlator. Equality is only used to
/// detect duplicate deliveries.
pub trait Payload: Clone + PartialEq + Debug + Sync + Send + 'static {}

impl<T> Payload for T where T: Clone + PartialEq + Debug + Sync + Send + 'static {}

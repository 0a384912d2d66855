use std::time::Duration;
use thiserror::Error;

/// Errors returned to callers of the
/// [CorrelatingHandler](crate::CorrelatingHandler).
///
/// Malformed sequence metadata and sequence size conflicts are not
/// errors. Those messages are dropped or discarded and the call
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("message carries no correlation key")]
    MissingCorrelationKey,

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("group store rejected the message: {0}")]
    Store(#[from] StoreError),
}

/// Failure to hand a message to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no output channel or reply channel available")]
    NoDestination,

    #[error("channel is full")]
    Full,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel is disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store capacity of {capacity} messages exceeded")]
    CapacityExceeded { capacity: usize },
}

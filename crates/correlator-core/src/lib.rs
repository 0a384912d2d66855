//! This library groups up messages that share a correlation key,
//! releases each group once a release strategy declares it ready, and
//! turns the group into output messages through a group processor.
//! Aggregators and resequencers are both built this way.
//!
//! # Usage
//!
//! ```rust
//! use correlator_core::{
//!     CorrelatingHandler, HandlerConfig, HeaderCorrelation, Message, QueueChannel,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> eyre::Result<()> {
//! let output = Arc::new(QueueChannel::<&str>::unbounded());
//!
//! // Release messages in sequence order as soon as a contiguous run
//! // is available.
//! let handler = CorrelatingHandler::<String, &str>::resequencer(HeaderCorrelation::new())
//!     .output_channel(output.clone())
//!     .config(HandlerConfig::resequencing(true))
//!     .build()?;
//!
//! for (payload, number) in [("c", 3), ("a", 1), ("b", 2)] {
//!     let message = Message::builder(payload)
//!         .correlation_id("ABC")
//!         .sequence(number, 3)
//!         .build();
//!     handler.handle_message(message)?;
//! }
//!
//! let payloads: Vec<_> = output.drain().into_iter().map(Message::into_payload).collect();
//! assert_eq!(payloads, ["a", "b", "c"]);
//! # Ok(())
//! # }
//! ```
//!
//! Groups that never become ready are completed by a
//! [CompletionReaper] once they are older than the configured timeout.

pub mod channel;
mod config;
pub mod correlation;
mod error;
pub mod group;
mod handler;
pub mod message;
pub mod processor;
pub mod reaper;
pub mod release;
pub mod sequence;
pub mod store;
mod types;

pub use channel::{ChannelRef, MessageChannel, QueueChannel};
pub use config::HandlerConfig;
pub use correlation::{CorrelationStrategy, HeaderCorrelation, MissingKeyPolicy};
pub use error::{CorrelationError, DispatchError, StoreError};
pub use group::{MessageGroup, SequenceBarrier};
pub use handler::{CorrelatingHandler, HandlerBuilder};
pub use message::{Message, MessageBuilder, MessageHeaders};
pub use processor::{
    AggregatingProcessor, GroupProcessor, PassThroughProcessor, Release, Resequencer,
};
pub use reaper::{CompletionReaper, ReaperHandle};
pub use release::{AlwaysRelease, MessageCountRelease, ReleaseStrategy, SequenceSizeRelease};
pub use store::{GroupStore, InMemoryGroupStore, KeyLocks};
pub use types::*;

//! Immutable message envelopes and their headers.

use crate::{channel::ChannelRef, types::Payload};
use indexmap::IndexMap;
use std::{fmt, sync::Arc};

/// Metadata attached to a [Message].
///
/// The sequence fields are explicit integers rather than loosely
/// typed header values. They are checked by
/// [validate](crate::sequence::validate) when a message enters the
/// correlator.
#[derive(Clone)]
pub struct MessageHeaders<T> {
    pub correlation_id: Option<String>,
    /// Position of the message within its sequence, starting from 1.
    pub sequence_number: Option<u32>,
    /// Total number of messages in the sequence.
    pub sequence_size: Option<u32>,
    /// Per-message destination that overrides the handler's output
    /// channel.
    pub reply_channel: Option<ChannelRef<T>>,
    /// Free-form headers in insertion order.
    pub extra: IndexMap<String, String>,
}

impl<T> Default for MessageHeaders<T> {
    fn default() -> Self {
        Self {
            correlation_id: None,
            sequence_number: None,
            sequence_size: None,
            reply_channel: None,
            extra: IndexMap::new(),
        }
    }
}

impl<T> PartialEq for MessageHeaders<T> {
    fn eq(&self, other: &Self) -> bool {
        let same_reply_channel = match (&self.reply_channel, &other.reply_channel) {
            (Some(lhs), Some(rhs)) => Arc::ptr_eq(lhs, rhs),
            (None, None) => true,
            _ => false,
        };

        same_reply_channel
            && self.correlation_id == other.correlation_id
            && self.sequence_number == other.sequence_number
            && self.sequence_size == other.sequence_size
            && self.extra == other.extra
    }
}

impl<T> fmt::Debug for MessageHeaders<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHeaders")
            .field("correlation_id", &self.correlation_id)
            .field("sequence_number", &self.sequence_number)
            .field("sequence_size", &self.sequence_size)
            .field("reply_channel", &self.reply_channel.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// A payload together with its headers.
///
/// Two messages are equal when both payloads and headers are equal.
/// Reply channels are compared by identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    payload: T,
    headers: MessageHeaders<T>,
}

impl<T> Message<T>
where
    T: Payload,
{
    /// Creates a message without any headers.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            headers: MessageHeaders::default(),
        }
    }

    pub fn builder(payload: T) -> MessageBuilder<T> {
        MessageBuilder::with_payload(payload)
    }

    /// Starts a builder pre-filled with the headers of this message.
    pub fn to_builder(&self) -> MessageBuilder<T> {
        MessageBuilder {
            payload: self.payload.clone(),
            headers: self.headers.clone(),
        }
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn headers(&self) -> &MessageHeaders<T> {
        &self.headers
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.correlation_id.as_deref()
    }

    pub fn sequence_number(&self) -> Option<u32> {
        self.headers.sequence_number
    }

    pub fn sequence_size(&self) -> Option<u32> {
        self.headers.sequence_size
    }

    pub fn reply_channel(&self) -> Option<&ChannelRef<T>> {
        self.headers.reply_channel.as_ref()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.extra.get(name).map(String::as_str)
    }
}

/// Builder for [Message].
pub struct MessageBuilder<T> {
    payload: T,
    headers: MessageHeaders<T>,
}

impl<T> MessageBuilder<T>
where
    T: Payload,
{
    pub fn with_payload(payload: T) -> Self {
        Self {
            payload,
            headers: MessageHeaders::default(),
        }
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.headers.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn sequence_number(mut self, sequence_number: u32) -> Self {
        self.headers.sequence_number = Some(sequence_number);
        self
    }

    pub fn sequence_size(mut self, sequence_size: u32) -> Self {
        self.headers.sequence_size = Some(sequence_size);
        self
    }

    /// Sets both the position and the total size of the sequence.
    pub fn sequence(self, sequence_number: u32, sequence_size: u32) -> Self {
        self.sequence_number(sequence_number)
            .sequence_size(sequence_size)
    }

    pub fn reply_channel(mut self, channel: ChannelRef<T>) -> Self {
        self.headers.reply_channel = Some(channel);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.extra.insert(name.into(), value.into());
        self
    }

    /// Drops the sequence headers, e.g. when a group is folded into a
    /// single message.
    pub fn clear_sequence(mut self) -> Self {
        self.headers.sequence_number = None;
        self.headers.sequence_size = None;
        self
    }

    pub fn build(self) -> Message<T> {
        Message {
            payload: self.payload,
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::QueueChannel;

    #[test]
    fn test_builder_sets_headers() {
        let message = Message::builder("payload")
            .correlation_id("ABC")
            .sequence(2, 3)
            .header("origin", "sensor-1")
            .build();

        assert_eq!(message.payload(), &"payload");
        assert_eq!(message.correlation_id(), Some("ABC"));
        assert_eq!(message.sequence_number(), Some(2));
        assert_eq!(message.sequence_size(), Some(3));
        assert_eq!(message.header("origin"), Some("sensor-1"));
        assert!(message.reply_channel().is_none());
    }

    #[test]
    fn test_equal_content_means_equal_messages() {
        let lhs = Message::builder(7).correlation_id("A").sequence(1, 2).build();
        let rhs = Message::builder(7).correlation_id("A").sequence(1, 2).build();
        let other = Message::builder(8).correlation_id("A").sequence(1, 2).build();

        assert_eq!(lhs, rhs);
        assert_ne!(lhs, other);
    }

    #[test]
    fn test_reply_channels_compare_by_identity() {
        let first: ChannelRef<i32> = Arc::new(QueueChannel::unbounded());
        let second: ChannelRef<i32> = Arc::new(QueueChannel::unbounded());

        let lhs = Message::builder(1).reply_channel(first.clone()).build();
        let same = Message::builder(1).reply_channel(first).build();
        let different = Message::builder(1).reply_channel(second).build();

        assert_eq!(lhs, same);
        assert_ne!(lhs, different);
    }

    #[test]
    fn test_to_builder_copies_headers() {
        let original = Message::builder("a").correlation_id("X").sequence(1, 1).build();
        let copy = original.to_builder().clear_sequence().build();

        assert_eq!(copy.correlation_id(), Some("X"));
        assert_eq!(copy.sequence_number(), None);
        assert_eq!(copy.sequence_size(), None);
    }
}

//! Policies turning a ready group into output messages.

use crate::{
    group::MessageGroup,
    message::{Message, MessageBuilder},
    release::ReleaseStrategy,
    types::{Key, Payload},
};

/// Output of a [GroupProcessor].
#[derive(Debug, Clone, PartialEq)]
pub enum Release<T> {
    /// The group emitted everything it ever will and can be removed.
    Complete(Vec<Message<T>>),

    /// Part of the group was emitted. The group stays in the store.
    Partial(Vec<Message<T>>),
}

impl<T> Release<T> {
    pub fn messages(&self) -> &[Message<T>] {
        match self {
            Release::Complete(messages) | Release::Partial(messages) => messages,
        }
    }

    pub fn into_messages(self) -> Vec<Message<T>> {
        match self {
            Release::Complete(messages) | Release::Partial(messages) => messages,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Release::Complete(_))
    }
}

/// Transforms a ready group into output messages, in the order they
/// must be sent.
pub trait GroupProcessor<K, T>: Send + Sync {
    /// Processes a group the release strategy declared ready. Messages
    /// consumed by the processor are removed from the group. Whatever
    /// a completed group still holds is discarded.
    fn process(&self, group: &mut MessageGroup<K, T>) -> Release<T>;

    /// Produces the partial result of a group that is forcibly
    /// completed before it became ready.
    fn complete_partial(&self, group: &mut MessageGroup<K, T>) -> Vec<Message<T>> {
        self.process(group).into_messages()
    }
}

/// Emits the group's messages unchanged in arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughProcessor;

impl<K, T> GroupProcessor<K, T> for PassThroughProcessor
where
    K: Key,
    T: Payload,
{
    fn process(&self, group: &mut MessageGroup<K, T>) -> Release<T> {
        Release::Complete(group.take_messages())
    }
}

/// Folds a group into a single message.
///
/// The output carries the correlation id of the group and the reply
/// channel of the first member that has one. Sequence headers are
/// dropped.
pub struct AggregatingProcessor<F> {
    combine: F,
}

impl<F> AggregatingProcessor<F> {
    pub fn new(combine: F) -> Self {
        Self { combine }
    }
}

impl<K, T, F> GroupProcessor<K, T> for AggregatingProcessor<F>
where
    K: Key,
    T: Payload,
    F: Fn(&[Message<T>]) -> T + Send + Sync,
{
    fn process(&self, group: &mut MessageGroup<K, T>) -> Release<T> {
        let messages = group.take_messages();
        let Some(first) = messages.first() else {
            return Release::Complete(vec![]);
        };

        let mut builder = MessageBuilder::with_payload((self.combine)(&messages));
        if let Some(correlation_id) = first.correlation_id() {
            builder = builder.correlation_id(correlation_id);
        }
        if let Some(reply_channel) = messages.iter().find_map(|message| message.reply_channel()) {
            builder = builder.reply_channel(reply_channel.clone());
        }

        Release::Complete(vec![builder.build()])
    }
}

/// Releases messages in ascending sequence order.
///
/// Only numbered messages are released. Anything else stays in the
/// group for the handler to discard when the group completes.
///
/// The resequencer is both the release strategy and the processor of
/// its handler. With partial release enabled, the contiguous run
/// starting at the next expected number is emitted as soon as it is
/// available. Otherwise nothing is emitted until the whole sequence
/// is buffered.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resequencer {
    release_partial_sequences: bool,
}

impl Resequencer {
    pub fn new(release_partial_sequences: bool) -> Self {
        Self {
            release_partial_sequences,
        }
    }

    pub fn releases_partial_sequences(&self) -> bool {
        self.release_partial_sequences
    }
}

impl<K, T> ReleaseStrategy<K, T> for Resequencer
where
    K: Key,
    T: Payload,
{
    fn can_release(&self, group: &MessageGroup<K, T>) -> bool {
        if self.release_partial_sequences {
            group.contains_sequence_number(group.barrier().next_expected())
        } else {
            group.has_complete_sequence()
        }
    }
}

impl<K, T> GroupProcessor<K, T> for Resequencer
where
    K: Key,
    T: Payload,
{
    fn process(&self, group: &mut MessageGroup<K, T>) -> Release<T> {
        if !self.release_partial_sequences {
            return Release::Complete(group.take_sequenced());
        }

        let released = group.release_contiguous();
        if group.is_drained() {
            Release::Complete(released)
        } else {
            Release::Partial(released)
        }
    }

    fn complete_partial(&self, group: &mut MessageGroup<K, T>) -> Vec<Message<T>> {
        group.take_sequenced()
    }
}

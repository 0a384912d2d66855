use crate::{
    message::Message,
    types::{Key, Payload},
};
use itertools::Itertools;
use std::{collections::BTreeMap, time::Instant};

/// Resequencing progress of a group.
///
/// `next_expected` only moves forward. Sequence numbers below it were
/// already released and are never released again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceBarrier {
    next_expected: u32,
}

impl Default for SequenceBarrier {
    fn default() -> Self {
        Self { next_expected: 1 }
    }
}

impl SequenceBarrier {
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn is_released(&self, sequence_number: u32) -> bool {
        sequence_number < self.next_expected
    }

    fn advance(&mut self) {
        self.next_expected += 1;
    }
}

/// The messages currently associated with one correlation key.
///
/// Messages are kept in arrival order. Mutation happens only through
/// the handler while it holds the key's lock.
#[derive(Debug, Clone)]
pub struct MessageGroup<K, T> {
    key: K,
    messages: Vec<Message<T>>,
    sequence_size: Option<u32>,
    barrier: SequenceBarrier,
    /// Number of messages ever accepted, released ones included.
    received: usize,
    created_at: Instant,
    completed: bool,
}

impl<K, T> MessageGroup<K, T>
where
    K: Key,
    T: Payload,
{
    pub fn new(key: K) -> Self {
        Self::with_created_at(key, Instant::now())
    }

    pub fn with_created_at(key: K, created_at: Instant) -> Self {
        Self {
            key,
            messages: vec![],
            sequence_size: None,
            barrier: SequenceBarrier::default(),
            received: 0,
            created_at,
            completed: false,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message<T>] {
        &self.messages
    }

    pub fn sequence_size(&self) -> Option<u32> {
        self.sequence_size
    }

    pub fn is_sequenced(&self) -> bool {
        self.sequence_size.is_some()
    }

    pub fn barrier(&self) -> SequenceBarrier {
        self.barrier
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// A completed group has released its messages and only remains to
    /// turn away late arrivals.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Checks whether every message of the sequence has been accepted
    /// at some point, released or not.
    pub fn has_seen_whole_sequence(&self) -> bool {
        match self.sequence_size {
            Some(size) => self.received >= size as usize,
            None => true,
        }
    }

    /// Checks whether the message's sequence size disagrees with the
    /// size already established for this group.
    ///
    /// In strict mode a sequenced message joining an unsequenced group,
    /// or the opposite, is a conflict too.
    pub fn conflicts_with(&self, message: &Message<T>, strict: bool) -> bool {
        match (self.sequence_size, message.sequence_size()) {
            (Some(established), Some(size)) => established != size,
            (Some(_), None) => strict,
            (None, Some(_)) => strict && !self.messages.is_empty(),
            (None, None) => false,
        }
    }

    /// Checks whether the message's sequence number lies beyond the
    /// sequence size established for this group.
    pub fn is_out_of_range(&self, message: &Message<T>) -> bool {
        matches!(
            (message.sequence_number(), self.sequence_size),
            (Some(number), Some(size)) if number > size
        )
    }

    /// Checks whether the message was seen before, either by its
    /// sequence number or by full equality.
    pub fn is_duplicate(&self, message: &Message<T>) -> bool {
        if let Some(number) = message.sequence_number() {
            if self.barrier.is_released(number) || self.contains_sequence_number(number) {
                return true;
            }
        }

        self.messages.contains(message)
    }

    pub fn contains_sequence_number(&self, sequence_number: u32) -> bool {
        self.messages
            .iter()
            .any(|message| message.sequence_number() == Some(sequence_number))
    }

    /// Checks whether every number in `1..=sequence_size` is buffered.
    pub fn has_complete_sequence(&self) -> bool {
        let Some(size) = self.sequence_size else {
            return false;
        };

        let present = self.buffered_by_sequence();
        (1..=size).all(|number| present.contains_key(&number))
    }

    /// Buffered messages keyed by their sequence number. Messages
    /// without a sequence number are left out.
    pub fn buffered_by_sequence(&self) -> BTreeMap<u32, &Message<T>> {
        self.messages
            .iter()
            .filter_map(|message| Some((message.sequence_number()?, message)))
            .collect()
    }

    /// Checks whether the barrier went past the last sequence number.
    pub fn is_drained(&self) -> bool {
        matches!(self.sequence_size, Some(size) if self.barrier.next_expected > size)
    }

    pub(crate) fn push(&mut self, message: Message<T>) {
        if self.sequence_size.is_none() {
            self.sequence_size = message.sequence_size();
        }
        self.received += 1;
        self.messages.push(message);
    }

    /// Removes and returns all messages in arrival order.
    pub(crate) fn take_messages(&mut self) -> Vec<Message<T>> {
        std::mem::take(&mut self.messages)
    }

    /// Removes and returns the messages carrying a sequence number in
    /// ascending order. Messages without one stay in the group.
    pub(crate) fn take_sequenced(&mut self) -> Vec<Message<T>> {
        let (sequenced, rest): (Vec<_>, Vec<_>) = self
            .take_messages()
            .into_iter()
            .partition(|message| message.sequence_number().is_some());
        self.messages = rest;

        sequenced
            .into_iter()
            .sorted_by_key(|message| message.sequence_number())
            .collect()
    }

    /// Removes buffered messages numbered beyond `size`, returning how
    /// many were removed. They no longer count as received.
    pub(crate) fn drop_beyond(&mut self, size: u32) -> usize {
        let before = self.messages.len();
        self.messages
            .retain(|message| message.sequence_number().is_none_or(|number| number <= size));

        let dropped = before - self.messages.len();
        self.received -= dropped;
        dropped
    }

    /// Releases the contiguous run of messages starting at the
    /// barrier's next expected number, advancing the barrier past it.
    pub(crate) fn release_contiguous(&mut self) -> Vec<Message<T>> {
        let mut released = vec![];

        while !self.is_drained() {
            let next = self.barrier.next_expected;
            let Some(index) = self
                .messages
                .iter()
                .position(|message| message.sequence_number() == Some(next))
            else {
                break;
            };

            released.push(self.messages.remove(index));
            self.barrier.advance();
        }

        released
    }

    pub(crate) fn mark_completed(&mut self) {
        self.messages.clear();
        self.completed = true;
    }
}

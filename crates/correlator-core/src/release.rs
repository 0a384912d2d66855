//! Policies deciding when a group is ready to be released.

use crate::{
    group::MessageGroup,
    types::{Key, Payload},
};

/// Decides whether a group is ready. The decision must not depend on
/// anything but the group itself.
pub trait ReleaseStrategy<K, T>: Send + Sync {
    fn can_release(&self, group: &MessageGroup<K, T>) -> bool;
}

/// Releases a group as soon as it holds a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRelease;

impl<K, T> ReleaseStrategy<K, T> for AlwaysRelease
where
    K: Key,
    T: Payload,
{
    fn can_release(&self, group: &MessageGroup<K, T>) -> bool {
        !group.is_empty()
    }
}

/// Releases a group once it holds `threshold` messages, or once a
/// sequenced group holds its whole sequence.
#[derive(Debug, Clone, Copy)]
pub struct MessageCountRelease {
    threshold: usize,
}

impl MessageCountRelease {
    /// Creates the strategy. A zero threshold is raised to one.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for MessageCountRelease {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<K, T> ReleaseStrategy<K, T> for MessageCountRelease
where
    K: Key,
    T: Payload,
{
    fn can_release(&self, group: &MessageGroup<K, T>) -> bool {
        let len = group.len();
        len >= self.threshold
            || matches!(group.sequence_size(), Some(size) if len == size as usize)
    }
}

/// Releases a group when every number of its sequence is buffered.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceSizeRelease;

impl<K, T> ReleaseStrategy<K, T> for SequenceSizeRelease
where
    K: Key,
    T: Payload,
{
    fn can_release(&self, group: &MessageGroup<K, T>) -> bool {
        group.has_complete_sequence()
    }
}

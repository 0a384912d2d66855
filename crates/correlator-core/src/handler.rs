//! The correlating message handler.

use crate::{
    channel::ChannelRef,
    config::HandlerConfig,
    correlation::CorrelationStrategy,
    error::{CorrelationError, DispatchError},
    group::MessageGroup,
    message::Message,
    processor::{GroupProcessor, Resequencer},
    reaper::ReaperEntry,
    release::{ReleaseStrategy, SequenceSizeRelease},
    sequence::{self, Validation},
    store::{GroupStore, InMemoryGroupStore, KeyLocks},
    types::{Key, Payload},
};
use eyre::{Result, ensure};
use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::Instant,
};
use tracing::{debug, trace, warn};

/// Groups inbound messages by correlation key and releases them
/// through pluggable release and processing strategies.
///
/// Calls for different keys run in parallel. Calls for the same key
/// are serialized, and each call holds the key's lock from the group
/// lookup until its released messages are dispatched.
pub struct CorrelatingHandler<K, T>
where
    K: Key,
    T: Payload,
{
    correlation: Arc<dyn CorrelationStrategy<K, T>>,
    release: Arc<dyn ReleaseStrategy<K, T>>,
    processor: Arc<dyn GroupProcessor<K, T>>,
    store: Arc<dyn GroupStore<K, T>>,
    locks: KeyLocks<K>,
    output_channel: Option<ChannelRef<T>>,
    discard_channel: Option<ChannelRef<T>>,
    config: HandlerConfig,
    reaper_tx: OnceLock<flume::Sender<ReaperEntry<K>>>,
}

impl<K, T> CorrelatingHandler<K, T>
where
    K: Key,
    T: Payload,
{
    /// Starts building a handler with a custom processor.
    pub fn builder(
        correlation: impl CorrelationStrategy<K, T> + 'static,
        processor: impl GroupProcessor<K, T> + 'static,
    ) -> HandlerBuilder<K, T> {
        HandlerBuilder::new(Arc::new(correlation), Some(Arc::new(processor)))
    }

    /// Starts building a resequencing handler. The resequencer serves
    /// as both release strategy and processor.
    pub fn resequencer(
        correlation: impl CorrelationStrategy<K, T> + 'static,
    ) -> HandlerBuilder<K, T> {
        HandlerBuilder::new(Arc::new(correlation), None)
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Accepts one inbound message.
    ///
    /// Messages with malformed sequence headers are dropped, and
    /// messages whose sequence size conflicts with their group are
    /// discarded. Neither is an error.
    pub fn handle_message(&self, message: Message<T>) -> Result<(), CorrelationError> {
        let Some(key) = self.correlation.correlation_key(&message) else {
            debug!("reject a message without correlation key");
            return Err(CorrelationError::MissingCorrelationKey);
        };

        if sequence::validate(&message) == Validation::RejectMalformed {
            debug!(
                key = ?key,
                sequence_number = ?message.sequence_number(),
                sequence_size = ?message.sequence_size(),
                "drop a message with malformed sequence headers"
            );
            return Ok(());
        }

        self.locks
            .with_lock(&key, || self.handle_locked(&key, message))
    }

    /// Completes the group of the key before it became ready.
    ///
    /// What the group holds is sent to the output path when partial
    /// results are enabled, or to the discard channel otherwise. The
    /// group is removed in both cases. Absent keys are ignored.
    pub fn force_complete(&self, key: &K) -> Result<(), CorrelationError> {
        self.locks.with_lock(key, || self.complete_locked(key))
    }

    /// Force-completes every group created at least one timeout before
    /// `now`, returning how many were completed. Does nothing when no
    /// timeout is configured.
    pub fn expire_groups(&self, now: Instant) -> usize {
        let Some(cutoff) = self
            .config
            .timeout()
            .and_then(|timeout| now.checked_sub(timeout))
        else {
            return 0;
        };

        self.store
            .expire_older_than(cutoff)
            .into_iter()
            .filter(|key| match self.expire_group(key, now) {
                Ok(expired) => expired,
                Err(err) => {
                    warn!(key = ?key, "failed to complete an expired group: {err}");
                    false
                }
            })
            .count()
    }

    /// Number of groups in the store, completed ones included.
    pub fn group_count(&self) -> usize {
        self.store.len()
    }

    pub fn contains_group(&self, key: &K) -> bool {
        self.store.get(key).is_some()
    }

    /// Lists the messages buffered for the key.
    pub fn list(&self, key: &K) -> Vec<Message<T>> {
        self.store.list(key)
    }

    /// Force-completes the group of the key if it is still present and
    /// its timeout elapsed by `now`. A younger group re-created under
    /// the same key is left alone.
    pub(crate) fn expire_group(&self, key: &K, now: Instant) -> Result<bool, CorrelationError> {
        let Some(timeout) = self.config.timeout() else {
            return Ok(false);
        };

        self.locks.with_lock(key, || {
            let expired = self
                .store
                .get(key)
                .is_some_and(|group| group.created_at() + timeout <= now);
            if !expired {
                return Ok(false);
            }

            debug!(key = ?key, "group timed out");
            self.complete_locked(key)?;
            Ok(true)
        })
    }

    pub(crate) fn attach_reaper(&self, tx: flume::Sender<ReaperEntry<K>>) -> Result<()> {
        ensure!(
            self.reaper_tx.set(tx).is_ok(),
            "a reaper is already attached to this handler"
        );
        Ok(())
    }

    fn handle_locked(&self, key: &K, message: Message<T>) -> Result<(), CorrelationError> {
        let (mut group, created) = self.store.get_or_create(key);
        if created {
            self.schedule(&group);
        }

        if group.is_completed() {
            debug!(key = ?key, "discard a message arriving after its group completed");
            return self.discard(vec![message]);
        }

        if group.conflicts_with(&message, self.config.strict_sequence_size) {
            debug!(
                key = ?key,
                expected = ?group.sequence_size(),
                actual = ?message.sequence_size(),
                "discard a message with conflicting sequence size"
            );
            return self.discard(vec![message]);
        }

        if group.is_out_of_range(&message) {
            debug!(
                key = ?key,
                sequence_number = ?message.sequence_number(),
                sequence_size = ?group.sequence_size(),
                "drop a message numbered beyond its group's sequence size"
            );
            return Ok(());
        }

        if group.is_duplicate(&message) {
            trace!(
                key = ?key,
                sequence_number = ?message.sequence_number(),
                "ignore a duplicate message"
            );
            return Ok(());
        }

        // A message establishing the sequence size invalidates numbers
        // buffered beyond it.
        if let (None, Some(size)) = (group.sequence_size(), message.sequence_size()) {
            let dropped = group.drop_beyond(size);
            if dropped > 0 {
                debug!(
                    key = ?key,
                    dropped,
                    size,
                    "drop messages numbered beyond the sequence size"
                );
                self.store.replace(group);
            }
        }

        let mut group = match self.store.add(key, message) {
            Ok(group) => group,
            Err(err) => {
                if created {
                    self.store.remove(key);
                }
                warn!(key = ?key, "failed to buffer a message: {err}");
                return Err(err.into());
            }
        };

        if !self.release.can_release(&group) {
            return Ok(());
        }

        let release = self.processor.process(&mut group);
        let complete = release.is_complete();
        let messages = release.into_messages();
        trace!(key = ?key, count = messages.len(), complete, "release messages");

        // The store must reflect the release before anything is sent.
        let leftovers = if complete {
            let leftovers = group.take_messages();
            self.finish(group);
            leftovers
        } else {
            self.store.replace(group);
            vec![]
        };

        self.dispatch(messages)?;
        self.discard_leftovers(key, leftovers)
    }

    fn complete_locked(&self, key: &K) -> Result<(), CorrelationError> {
        let Some(mut group) = self.store.remove(key) else {
            return Ok(());
        };

        if group.is_empty() {
            trace!(key = ?key, "remove a group with nothing buffered");
            return Ok(());
        }

        if self.config.send_partial_result_on_timeout {
            let messages = self.processor.complete_partial(&mut group);
            debug!(key = ?key, count = messages.len(), "release a partial group");
            self.dispatch(messages)?;
            self.discard_leftovers(key, group.take_messages())
        } else {
            let messages = group.take_messages();
            debug!(key = ?key, count = messages.len(), "discard an incomplete group");
            self.discard(messages)
        }
    }

    /// Removes a fully released group, or leaves a completed marker
    /// behind when stragglers of its sequence are still expected.
    fn finish(&self, mut group: MessageGroup<K, T>) {
        if self.config.discard_late_arrivals
            && group.is_sequenced()
            && !group.has_seen_whole_sequence()
        {
            group.mark_completed();
            self.store.replace(group);
        } else {
            self.store.remove(group.key());
        }
    }

    fn schedule(&self, group: &MessageGroup<K, T>) {
        let (Some(tx), Some(timeout)) = (self.reaper_tx.get(), self.config.timeout()) else {
            return;
        };

        let entry = ReaperEntry::new(group.created_at() + timeout, group.key().clone());
        if tx.send(entry).is_err() {
            trace!(key = ?group.key(), "reaper is gone, skip scheduling");
        }
    }

    /// Sends released messages, each to its reply channel or else to
    /// the output channel. Stops at the first failure.
    fn dispatch(&self, messages: Vec<Message<T>>) -> Result<(), CorrelationError> {
        for message in messages {
            let Some(channel) = message
                .reply_channel()
                .or(self.output_channel.as_ref())
                .cloned()
            else {
                warn!(
                    correlation_id = ?message.correlation_id(),
                    "no destination for a released message"
                );
                return Err(DispatchError::NoDestination.into());
            };

            channel.send(message, self.config.send_timeout)?;
        }

        Ok(())
    }

    /// Discards what a completed group held but its processor did not
    /// release.
    fn discard_leftovers(
        &self,
        key: &K,
        leftovers: Vec<Message<T>>,
    ) -> Result<(), CorrelationError> {
        if leftovers.is_empty() {
            return Ok(());
        }

        debug!(
            key = ?key,
            count = leftovers.len(),
            "discard messages left in a completed group"
        );
        self.discard(leftovers)
    }

    fn discard(&self, messages: Vec<Message<T>>) -> Result<(), CorrelationError> {
        let Some(channel) = &self.discard_channel else {
            trace!(count = messages.len(), "no discard channel, drop messages");
            return Ok(());
        };

        for message in messages {
            channel.send(message, self.config.send_timeout)?;
        }

        Ok(())
    }
}

impl<K, T> fmt::Debug for CorrelatingHandler<K, T>
where
    K: Key,
    T: Payload,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelatingHandler")
            .field("config", &self.config)
            .field("groups", &self.store.len())
            .field("has_output_channel", &self.output_channel.is_some())
            .field("has_discard_channel", &self.discard_channel.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder of [CorrelatingHandler].
pub struct HandlerBuilder<K, T>
where
    K: Key,
    T: Payload,
{
    correlation: Arc<dyn CorrelationStrategy<K, T>>,
    processor: Option<Arc<dyn GroupProcessor<K, T>>>,
    release: Option<Arc<dyn ReleaseStrategy<K, T>>>,
    store: Option<Arc<dyn GroupStore<K, T>>>,
    output_channel: Option<ChannelRef<T>>,
    discard_channel: Option<ChannelRef<T>>,
    config: HandlerConfig,
}

impl<K, T> HandlerBuilder<K, T>
where
    K: Key,
    T: Payload,
{
    fn new(
        correlation: Arc<dyn CorrelationStrategy<K, T>>,
        processor: Option<Arc<dyn GroupProcessor<K, T>>>,
    ) -> Self {
        Self {
            correlation,
            processor,
            release: None,
            store: None,
            output_channel: None,
            discard_channel: None,
            config: HandlerConfig::default(),
        }
    }

    /// Overrides the release strategy. Defaults to
    /// [SequenceSizeRelease].
    pub fn release_strategy(mut self, release: impl ReleaseStrategy<K, T> + 'static) -> Self {
        self.release = Some(Arc::new(release));
        self
    }

    /// Overrides the group store. Defaults to an [InMemoryGroupStore]
    /// bounded by the configured store capacity.
    pub fn store(mut self, store: Arc<dyn GroupStore<K, T>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn output_channel(mut self, channel: ChannelRef<T>) -> Self {
        self.output_channel = Some(channel);
        self
    }

    pub fn discard_channel(mut self, channel: ChannelRef<T>) -> Self {
        self.discard_channel = Some(channel);
        self
    }

    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<CorrelatingHandler<K, T>> {
        let Self {
            correlation,
            processor,
            release,
            store,
            output_channel,
            discard_channel,
            config,
        } = self;

        config.validate()?;

        let (release, processor): (Arc<dyn ReleaseStrategy<K, T>>, Arc<dyn GroupProcessor<K, T>>) =
            match processor {
                Some(processor) => (
                    release.unwrap_or_else(|| Arc::new(SequenceSizeRelease)),
                    processor,
                ),
                None => {
                    let resequencer = Arc::new(Resequencer::new(config.release_partial_sequences));
                    (release.unwrap_or_else(|| resequencer.clone()), resequencer)
                }
            };

        let store = store.unwrap_or_else(|| {
            Arc::new(InMemoryGroupStore::<K, T>::with_capacity(
                config.store_capacity,
            ))
        });

        Ok(CorrelatingHandler {
            correlation,
            release,
            processor,
            store,
            locks: KeyLocks::new(),
            output_channel,
            discard_channel,
            config,
            reaper_tx: OnceLock::new(),
        })
    }
}

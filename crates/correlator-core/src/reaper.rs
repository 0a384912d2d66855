//! Background completion of groups that outlive their timeout.

use crate::{
    handler::CorrelatingHandler,
    types::{Key, Payload},
};
use eyre::{Result, WrapErr, bail};
use std::{
    collections::{BinaryHeap, binary_heap::PeekMut},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tokio::{
    runtime,
    sync::watch,
    task::{self, JoinHandle},
    time,
};
use tracing::{debug, trace, warn};

/// A scheduled expiration in the reaper's heap.
#[derive(Debug, Clone)]
pub(crate) struct ReaperEntry<K> {
    deadline: Instant,
    key: K,
}

impl<K> ReaperEntry<K> {
    pub(crate) fn new(deadline: Instant, key: K) -> Self {
        Self { deadline, key }
    }
}

impl<K> PartialEq for ReaperEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl<K> Eq for ReaperEntry<K> {}

impl<K> PartialOrd for ReaperEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for ReaperEntry<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap behavior
        other.deadline.cmp(&self.deadline)
    }
}

/// Force-completes groups of a handler once they are older than the
/// configured timeout.
///
/// The handler reports every group it creates to the reaper, which
/// keeps the deadlines in a min-heap and wakes up for the earliest
/// one. A periodic sweep over the store catches groups created before
/// the reaper was attached.
pub struct CompletionReaper;

impl CompletionReaper {
    /// Spawns the reaper task for the handler on the current tokio
    /// runtime.
    ///
    /// Fails when the handler has no timeout, when it already has a
    /// reaper, or when called outside a tokio runtime. The task ends
    /// when the returned handle is shut down or dropped, or when the
    /// handler is dropped.
    pub fn spawn<K, T>(handler: &Arc<CorrelatingHandler<K, T>>) -> Result<ReaperHandle>
    where
        K: Key,
        T: Payload,
    {
        let Some(timeout) = handler.config().timeout() else {
            bail!("the handler has no timeout to reap groups with");
        };
        let sweep_interval = handler.config().sweep_interval().unwrap_or(timeout);
        let runtime =
            runtime::Handle::try_current().wrap_err("the reaper requires a tokio runtime")?;

        let (schedule_tx, schedule_rx) = flume::unbounded();
        handler.attach_reaper(schedule_tx)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run(
            Arc::downgrade(handler),
            schedule_rx,
            shutdown_rx,
            sweep_interval,
        ));
        debug!(?timeout, ?sweep_interval, "reaper started");

        Ok(ReaperHandle { shutdown_tx, task })
    }
}

/// Controls a running [CompletionReaper]. Dropping the handle stops
/// the reaper.
#[derive(Debug)]
#[must_use = "the reaper stops when its handle is dropped"]
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stops the reaper and waits for its task to end.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!("reaper task failed: {err}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run<K, T>(
    handler: Weak<CorrelatingHandler<K, T>>,
    schedule_rx: flume::Receiver<ReaperEntry<K>>,
    mut shutdown_rx: watch::Receiver<bool>,
    sweep_interval: Duration,
) where
    K: Key,
    T: Payload,
{
    let mut heap: BinaryHeap<ReaperEntry<K>> = BinaryHeap::new();
    let mut next_sweep = Instant::now() + sweep_interval;

    loop {
        let wake_at = heap
            .peek()
            .map_or(next_sweep, |entry| entry.deadline.min(next_sweep));

        tokio::select! {
            _ = time::sleep_until(wake_at.into()) => {
                let Some(handler) = handler.upgrade() else {
                    break;
                };
                let now = Instant::now();

                let mut due = vec![];
                while let Some(entry) = heap.peek_mut() {
                    if entry.deadline > now {
                        break;
                    }
                    due.push(PeekMut::pop(entry).key);
                }

                let sweep = now >= next_sweep;
                if sweep {
                    next_sweep = now + sweep_interval;
                }

                // Completion blocks on key locks and channel sends.
                let pass = task::spawn_blocking(move || expire(&handler, due, sweep, now));
                tokio::select! {
                    result = pass => {
                        if let Err(err) = result {
                            warn!("reaper expiry pass failed: {err}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
            entry = schedule_rx.recv_async() => {
                match entry {
                    Ok(entry) => heap.push(entry),
                    Err(_) => break,
                }
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    debug!(pending = heap.len(), "reaper stopped");
}

/// Completes the groups whose deadline passed, then sweeps the store
/// when a sweep is due.
fn expire<K, T>(handler: &CorrelatingHandler<K, T>, due: Vec<K>, sweep: bool, now: Instant)
where
    K: Key,
    T: Payload,
{
    for key in due {
        match handler.expire_group(&key, now) {
            Ok(true) => trace!(key = ?key, "reaped a group"),
            Ok(false) => {}
            Err(err) => warn!(key = ?key, "failed to complete an expired group: {err}"),
        }
    }

    if sweep {
        let count = handler.expire_groups(now);
        if count > 0 {
            debug!(count, "sweep completed expired groups");
        }
    }
}

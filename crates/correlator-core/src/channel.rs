//! Destinations that released, discarded and reply messages are sent to.

use crate::{error::DispatchError, message::Message, types::Payload};
use flume::{Receiver, SendTimeoutError, Sender, TrySendError};
use futures::{StreamExt, stream::BoxStream};
use std::{fmt, sync::Arc, time::Duration};

/// A destination accepting messages.
///
/// `timeout` is the caller's budget for a send that cannot complete
/// immediately. `None` waits as long as needed and `Some(ZERO)` never
/// waits.
pub trait MessageChannel<T>: Send + Sync {
    fn send(&self, message: Message<T>, timeout: Option<Duration>) -> Result<(), DispatchError>;
}

/// Shared handle to a destination.
pub type ChannelRef<T> = Arc<dyn MessageChannel<T>>;

/// An in-process queue that buffers messages until they are received.
pub struct QueueChannel<T> {
    tx: Sender<Message<T>>,
    rx: Receiver<Message<T>>,
}

impl<T> QueueChannel<T>
where
    T: Payload,
{
    pub fn unbounded() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Creates a queue holding at most `capacity` messages. Sends to a
    /// full queue wait for the send timeout and then fail.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx }
    }

    /// Takes the next message without waiting.
    pub fn receive(&self) -> Option<Message<T>> {
        self.rx.try_recv().ok()
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Option<Message<T>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Takes every message currently queued.
    pub fn drain(&self) -> Vec<Message<T>> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Streams queued messages. The stream stays open as long as the
    /// channel is alive.
    pub fn stream(&self) -> BoxStream<'static, Message<T>> {
        self.rx.clone().into_stream().boxed()
    }
}

impl<T> MessageChannel<T> for QueueChannel<T>
where
    T: Payload,
{
    fn send(&self, message: Message<T>, timeout: Option<Duration>) -> Result<(), DispatchError> {
        match timeout {
            None => self
                .tx
                .send(message)
                .map_err(|_| DispatchError::Disconnected),
            Some(timeout) if timeout.is_zero() => {
                self.tx.try_send(message).map_err(|err| match err {
                    TrySendError::Full(_) => DispatchError::Full,
                    TrySendError::Disconnected(_) => DispatchError::Disconnected,
                })
            }
            Some(timeout) => self
                .tx
                .send_timeout(message, timeout)
                .map_err(|err| match err {
                    SendTimeoutError::Timeout(_) => DispatchError::Timeout(timeout),
                    SendTimeoutError::Disconnected(_) => DispatchError::Disconnected,
                }),
        }
    }
}

impl<T> fmt::Debug for QueueChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueChannel")
            .field("len", &self.rx.len())
            .field("capacity", &self.rx.capacity())
            .finish()
    }
}

//! Command Channel
//!
//! Ordered, unbounded delivery of commands from the owner context to the
//! render context.
//! Features:
//! - Many producers, one consumer
//! - FIFO order, so commands for the same section apply in submission order
//! - Submission never blocks and never fails for capacity
//! - Fire and forget: nothing is reported back to the producer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

/// Delivery counters shared by both ends of a channel
#[derive(Debug, Default)]
pub struct ChannelStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelStats {
    /// Commands accepted by the channel
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Commands handed to the consumer
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Commands discarded because the consumer was gone
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer end of a command channel
#[derive(Debug)]
pub struct CommandSender<T> {
    sender: Sender<T>,
    stats: Arc<ChannelStats>,
}

impl<T> Clone for CommandSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<T> CommandSender<T> {
    /// Queue a command for the consumer
    ///
    /// Returns `false` if the consumer has shut down; the command is dropped.
    pub fn submit(&self, command: T) -> bool {
        match self.sender.send(command) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Command dropped: receiver disconnected");
                false
            }
        }
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

/// Consumer end of a command channel
#[derive(Debug)]
pub struct CommandReceiver<T> {
    receiver: Receiver<T>,
    stats: Arc<ChannelStats>,
}

impl<T> CommandReceiver<T> {
    /// Take the next command if one is queued
    pub fn try_recv(&self) -> Option<T> {
        let command = self.receiver.try_recv().ok()?;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Some(command)
    }

    /// Wait up to `timeout` for the next command
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let command = self.receiver.recv_timeout(timeout)?;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(command)
    }

    /// Take every command queued right now, in submission order
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.try_recv())
    }

    /// Number of commands waiting
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

/// Create a connected sender/receiver pair
pub fn command_channel<T>() -> (CommandSender<T>, CommandReceiver<T>) {
    let (sender, receiver) = unbounded();
    let stats = Arc::new(ChannelStats::default());
    (
        CommandSender { sender, stats: stats.clone() },
        CommandReceiver { receiver, stats },
    )
}

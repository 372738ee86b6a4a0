//! Lock-free command inbox
//!
//! Connection handlers push decoded commands through cloned [`CommandSender`]s;
//! the authority drains everything pending at the start of each tick.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::command::{CommandEnvelope, PeerCommand, PeerId};
use crate::game::constants::command::INBOX_CAPACITY;

/// Bounded MPSC inbox feeding the authoritative tick
pub struct CommandInbox {
    sender: Sender<CommandEnvelope>,
    receiver: Receiver<CommandEnvelope>,
    capacity: usize,
}

impl CommandInbox {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Create a sender handle for a connection
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Try to submit a command (non-blocking). False when full.
    #[inline]
    pub fn try_submit(&self, peer: PeerId, command: PeerCommand) -> bool {
        self.sender
            .try_send(CommandEnvelope::new(peer, command))
            .is_ok()
    }

    /// Drain every pending command in arrival order
    pub fn drain(&self) -> Vec<CommandEnvelope> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandInbox {
    fn default() -> Self {
        Self::new(INBOX_CAPACITY)
    }
}

/// Clonable sender handle
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<CommandEnvelope>,
}

impl CommandSender {
    /// Submit a command (non-blocking)
    #[inline]
    pub fn try_send(&self, envelope: CommandEnvelope) -> Result<(), InboxError> {
        self.sender.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => InboxError::Full,
            TrySendError::Disconnected(_) => InboxError::Disconnected,
        })
    }
}

/// Inbox errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InboxError {
    /// Inbox is full (backpressure)
    #[error("Command inbox is full")]
    Full,
    /// Authority stopped draining
    #[error("Command inbox disconnected")]
    Disconnected,
}

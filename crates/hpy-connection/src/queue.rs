//! Serialized command queue.
//!
//! Bounded FIFO with exactly one command in flight. The queue itself is pure:
//! it hands back a [`Dispatch`] whenever a command should go on the air, and
//! the caller writes it and arms the timeout. Each dispatch carries a
//! sequence number so a late timeout for an already-completed command is
//! recognised and ignored.

use hpy_protocol::model::CharId;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Default pending-command capacity.
pub const MAX_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Done when the local write is acknowledged. The real response, if any,
    /// arrives separately.
    OnWriteAck,
    /// Done when the matching notification arrives.
    OnNotification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Diagnostic label, e.g. `HS_GET_DEV_STATUS`.
    pub tag: &'static str,
    pub char_id: CharId,
    pub data: Vec<u8>,
    pub timeout: Duration,
    pub completion: CompletionPolicy,
}

impl QueuedCommand {
    /// Command on `CmdRx` answered by a `CmdTx` notification.
    pub fn notification(tag: &'static str, data: Vec<u8>, timeout: Duration) -> Self {
        Self {
            tag,
            char_id: CharId::CmdRx,
            data,
            timeout,
            completion: CompletionPolicy::OnNotification,
        }
    }

    /// Command on `CmdRx` completed by the write acknowledgment.
    pub fn write_ack(tag: &'static str, data: Vec<u8>, timeout: Duration) -> Self {
        Self {
            tag,
            char_id: CharId::CmdRx,
            data,
            timeout,
            completion: CompletionPolicy::OnWriteAck,
        }
    }
}

/// A command that just became in-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub seq: u64,
    pub command: QueuedCommand,
}

/// Result of a timeout: the expired command and whatever was dispatched
/// in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOut {
    pub expired: QueuedCommand,
    pub next: Option<Dispatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command queue full ({capacity} pending)")]
pub struct QueueFull {
    pub capacity: usize,
}

#[derive(Debug)]
pub struct CommandQueue {
    capacity: usize,
    pending: VecDeque<QueuedCommand>,
    in_flight: Option<(u64, QueuedCommand)>,
    next_seq: u64,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(MAX_QUEUE_DEPTH)
    }
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: VecDeque::with_capacity(capacity),
            in_flight: None,
            next_seq: 0,
        }
    }

    /// Append a command. Returns the dispatch when the queue was idle.
    pub fn enqueue(&mut self, command: QueuedCommand) -> Result<Option<Dispatch>, QueueFull> {
        if self.pending.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        self.pending.push_back(command);
        Ok(self.drain_if_idle())
    }

    /// Complete the in-flight command and dispatch the next one.
    pub fn signal_done(&mut self) -> Option<Dispatch> {
        self.in_flight = None;
        self.drain_if_idle()
    }

    /// Expire the in-flight command if it is still dispatch `seq`.
    pub fn signal_timeout(&mut self, seq: u64) -> Option<TimedOut> {
        match &self.in_flight {
            Some((current, _)) if *current == seq => {}
            _ => return None,
        }
        let (_, expired) = self.in_flight.take()?;
        Some(TimedOut {
            expired,
            next: self.drain_if_idle(),
        })
    }

    /// Drop everything, pending and in flight.
    pub fn flush(&mut self) {
        self.pending.clear();
        self.in_flight = None;
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn current(&self) -> Option<&QueuedCommand> {
        self.in_flight.as_ref().map(|(_, cmd)| cmd)
    }

    pub fn current_seq(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|(seq, _)| *seq)
    }

    fn drain_if_idle(&mut self) -> Option<Dispatch> {
        if self.in_flight.is_some() {
            return None;
        }
        let command = self.pending.pop_front()?;
        self.next_seq += 1;
        let seq = self.next_seq;
        self.in_flight = Some((seq, command.clone()));
        Some(Dispatch { seq, command })
    }
}

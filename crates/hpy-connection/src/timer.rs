//! Cancelable timers owned by a connection slot.
//!
//! The slot never sleeps. It asks a [`TimerScheduler`] to deliver a
//! [`TimerToken`] back after a delay, keeps the token in its armed list and
//! drops it on cancel. A token that fires after it was cancelled, or after
//! its slot was torn down, no longer matches the armed list and is ignored.

use crate::events::ConnectionId;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FwCallback {
    /// Patch length settled, begin streaming.
    Stream,
    /// Stream drained, send finalize.
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// In-flight command timeout, keyed by the queue dispatch sequence.
    Command { seq: u64 },
    FwCallback(FwCallback),
    /// Return to `Ready` if the ring does not drop the link after a
    /// failed or cancelled update.
    FwFallback,
    ReconnectDelay,
    ConnectTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub conn_id: ConnectionId,
    /// Slot generation; distinguishes a recycled connection id.
    pub instance: u64,
    pub id: u64,
    pub kind: TimerKind,
}

/// Delivers tokens back to the engine after a delay.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, token: TimerToken, after: Duration);
    fn cancel(&self, token: &TimerToken);
}

/// Armed timers of one slot.
#[derive(Debug)]
pub(crate) struct TimerSet {
    conn_id: ConnectionId,
    instance: u64,
    next_id: u64,
    armed: Vec<TimerToken>,
}

impl TimerSet {
    pub(crate) fn new(conn_id: ConnectionId, instance: u64) -> Self {
        Self {
            conn_id,
            instance,
            next_id: 0,
            armed: Vec::new(),
        }
    }

    pub(crate) fn arm(&mut self, scheduler: &dyn TimerScheduler, kind: TimerKind, after: Duration) {
        self.next_id += 1;
        let token = TimerToken {
            conn_id: self.conn_id,
            instance: self.instance,
            id: self.next_id,
            kind,
        };
        self.armed.push(token);
        scheduler.schedule(token, after);
    }

    /// Cancel every armed timer matching `pred`.
    pub(crate) fn cancel_where(
        &mut self,
        scheduler: &dyn TimerScheduler,
        pred: impl Fn(&TimerKind) -> bool,
    ) {
        self.armed.retain(|token| {
            if pred(&token.kind) {
                scheduler.cancel(token);
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn cancel_all(&mut self, scheduler: &dyn TimerScheduler) {
        self.cancel_where(scheduler, |_| true);
    }

    /// Consume a fired token. `false` means it is stale.
    pub(crate) fn take_fired(&mut self, token: &TimerToken) -> bool {
        match self.armed.iter().position(|t| t == token) {
            Some(pos) => {
                self.armed.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self, pred: impl Fn(&TimerKind) -> bool) -> bool {
        self.armed.iter().any(|t| pred(&t.kind))
    }

    pub(crate) fn len(&self) -> usize {
        self.armed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        scheduled: Mutex<Vec<TimerToken>>,
        cancelled: Mutex<Vec<TimerToken>>,
    }

    impl TimerScheduler for Recorder {
        fn schedule(&self, token: TimerToken, _after: Duration) {
            self.scheduled.lock().push(token);
        }
        fn cancel(&self, token: &TimerToken) {
            self.cancelled.lock().push(*token);
        }
    }

    #[test]
    fn test_fired_token_consumed_once() {
        let rec = Recorder::default();
        let mut set = TimerSet::new(ConnectionId::from_index(0).unwrap(), 1);
        set.arm(&rec, TimerKind::ReconnectDelay, Duration::from_secs(1));
        let token = rec.scheduled.lock()[0];
        assert!(set.take_fired(&token));
        assert!(!set.take_fired(&token));
    }

    #[test]
    fn test_cancelled_token_is_stale() {
        let rec = Recorder::default();
        let mut set = TimerSet::new(ConnectionId::from_index(0).unwrap(), 1);
        set.arm(&rec, TimerKind::Command { seq: 1 }, Duration::from_secs(5));
        set.arm(&rec, TimerKind::FwFallback, Duration::from_secs(5));
        set.cancel_where(&rec, |k| matches!(k, TimerKind::Command { .. }));
        assert_eq!(set.len(), 1);
        assert_eq!(rec.cancelled.lock().len(), 1);

        let command_token = rec.scheduled.lock()[0];
        assert!(!set.take_fired(&command_token));
        assert!(set.is_armed(|k| *k == TimerKind::FwFallback));
    }

    #[test]
    fn test_other_instance_token_is_stale() {
        let rec = Recorder::default();
        let conn = ConnectionId::from_index(2).unwrap();
        let mut old = TimerSet::new(conn, 1);
        let mut new = TimerSet::new(conn, 2);
        old.arm(&rec, TimerKind::ConnectTimeout, Duration::from_secs(1));
        new.arm(&rec, TimerKind::ConnectTimeout, Duration::from_secs(1));
        let old_token = rec.scheduled.lock()[0];
        assert!(!new.take_fired(&old_token));
    }
}

//! Reconnection backoff.
//!
//! Two schedules: one after an unexpected link loss and one after a firmware
//! update, which also waits out the ring's reboot before the first attempt.
//! The controller is a counter plus schedule lookup; the slot owns the timers
//! and the connect call.

use hpy_config::{BackoffBand, ReconnectConfig};
use std::time::Duration;

/// Attempt number to wait interval, by band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    bands: Vec<BackoffBand>,
}

impl BackoffSchedule {
    pub fn new(bands: Vec<BackoffBand>) -> Self {
        Self { bands }
    }

    /// Interval before `attempt` (1-based). Attempts past the last band use
    /// the last band's interval.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let band = self
            .bands
            .iter()
            .find(|band| (band.from_attempt..=band.to_attempt).contains(&attempt))
            .or_else(|| {
                if self.bands.first().is_some_and(|b| attempt < b.from_attempt) {
                    self.bands.first()
                } else {
                    self.bands.last()
                }
            });
        band.map(|b| Duration::from_millis(b.interval_ms))
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    Normal,
    /// After a firmware update; failures report `FwUpdateReconnectFail`.
    FwReboot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    /// Arm the delay timer.
    Wait(Duration),
    /// Issue a connect and arm the connect timeout.
    Connect { attempt: u32 },
    Connected,
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct ReconnectController {
    mode: ReconnectMode,
    schedule: BackoffSchedule,
    max_attempts: u32,
    reboot_grace: Duration,
    attempt: u32,
    awaiting_connect: bool,
}

impl ReconnectController {
    pub fn new(mode: ReconnectMode, config: &ReconnectConfig) -> Self {
        let (bands, reboot_grace) = match mode {
            ReconnectMode::Normal => (config.schedule.clone(), Duration::ZERO),
            ReconnectMode::FwReboot => (config.fw_schedule.clone(), config.fw_reboot_wait()),
        };
        Self {
            mode,
            schedule: BackoffSchedule::new(bands),
            max_attempts: config.max_attempts.max(1),
            reboot_grace,
            attempt: 0,
            awaiting_connect: false,
        }
    }

    pub fn mode(&self) -> ReconnectMode {
        self.mode
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// A connect is outstanding and its outcome not yet known.
    pub fn is_awaiting_connect(&self) -> bool {
        self.awaiting_connect
    }

    pub fn start(&mut self) -> ReconnectStep {
        self.attempt = 0;
        self.awaiting_connect = false;
        ReconnectStep::Wait(self.reboot_grace + self.schedule.delay_for_attempt(1))
    }

    pub fn on_wait_elapsed(&mut self) -> ReconnectStep {
        self.attempt += 1;
        self.awaiting_connect = true;
        ReconnectStep::Connect {
            attempt: self.attempt,
        }
    }

    pub fn on_connected(&mut self) -> ReconnectStep {
        self.awaiting_connect = false;
        ReconnectStep::Connected
    }

    /// Connect failed or timed out.
    pub fn on_attempt_failed(&mut self) -> ReconnectStep {
        self.awaiting_connect = false;
        if self.attempt >= self.max_attempts {
            return ReconnectStep::Exhausted {
                attempts: self.attempt,
            };
        }
        ReconnectStep::Wait(self.schedule.delay_for_attempt(self.attempt + 1))
    }
}

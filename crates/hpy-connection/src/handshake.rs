//! Post-connect handshake sequencing.
//!
//! Pure step planning. The runner decides which command comes next from the
//! firmware tier and the flags in the first device status, then drains the
//! ring's crash-log file. It never touches the queue or the shim; the slot
//! feeds it responses and enqueues whatever it returns.

use crate::queue::QueuedCommand;
use crate::shim::TimeSource;
use hpy_config::HpyConfig;
use hpy_protocol::builder;
use hpy_protocol::command_id::MEMFAULT_FILE_ID;
use hpy_protocol::model::{DeviceStatus, FirmwareTier};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    GetDaqConfig,
    GetDeviceStatus,
    SetUtc,
    SetInfo,
    SetFingerDetection,
    GetMemfaultFileLength,
    ReadMemfaultFile,
}

impl HandshakeStep {
    pub fn tag(self) -> &'static str {
        match self {
            HandshakeStep::GetDaqConfig => "HS_GET_DAQ_CONFIG",
            HandshakeStep::GetDeviceStatus => "HS_GET_DEV_STATUS",
            HandshakeStep::SetUtc => "HS_SET_UTC",
            HandshakeStep::SetInfo => "HS_SET_INFO",
            HandshakeStep::SetFingerDetection => "HS_SET_FINGER_DET",
            HandshakeStep::GetMemfaultFileLength => "HS_MF_GET_LEN",
            HandshakeStep::ReadMemfaultFile => "HS_MF_READ",
        }
    }
}

/// Handshake knobs taken from [`HpyConfig`].
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    pub command_timeout: Duration,
    pub skip_finger_detection: bool,
    pub memfault_enabled: bool,
    pub max_memfault_chunks: u32,
}

impl From<&HpyConfig> for HandshakeSettings {
    fn from(config: &HpyConfig) -> Self {
        Self {
            command_timeout: config.connection.command_timeout(),
            skip_finger_detection: config.connection.skip_finger_detection,
            memfault_enabled: config.memfault.enabled,
            max_memfault_chunks: config.memfault.max_chunks_per_drain,
        }
    }
}

pub struct HandshakeRunner {
    tier: FirmwareTier,
    settings: HandshakeSettings,
    time: Arc<dyn TimeSource>,
    pending: VecDeque<HandshakeStep>,
    current_step: Option<HandshakeStep>,
    complete: bool,
    memfault_draining: bool,
    memfault_reads: u32,
    memfault_stored: u32,
    memfault_expected_length: u32,
}

impl std::fmt::Debug for HandshakeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeRunner")
            .field("tier", &self.tier)
            .field("pending", &self.pending)
            .field("current_step", &self.current_step)
            .field("complete", &self.complete)
            .field("memfault_draining", &self.memfault_draining)
            .finish()
    }
}

impl HandshakeRunner {
    pub fn new(tier: FirmwareTier, settings: HandshakeSettings, time: Arc<dyn TimeSource>) -> Self {
        Self {
            tier,
            settings,
            time,
            pending: VecDeque::new(),
            current_step: None,
            complete: false,
            memfault_draining: false,
            memfault_reads: 0,
            memfault_stored: 0,
            memfault_expected_length: 0,
        }
    }

    /// Reset and return the first command. `None` means the handshake is
    /// already complete (Tier0).
    pub fn start(&mut self) -> Option<QueuedCommand> {
        self.pending.clear();
        self.current_step = None;
        self.complete = false;
        self.memfault_draining = false;
        self.memfault_reads = 0;
        self.memfault_stored = 0;
        self.memfault_expected_length = 0;

        match self.tier {
            FirmwareTier::Tier0 => {
                self.complete = true;
                return None;
            }
            FirmwareTier::Tier1 => {
                self.pending.push_back(HandshakeStep::GetDeviceStatus);
            }
            FirmwareTier::Tier2 => {
                self.pending.push_back(HandshakeStep::GetDaqConfig);
                self.pending.push_back(HandshakeStep::GetDeviceStatus);
            }
        }
        self.next_command()
    }

    /// Insert the steps the device asked for, then continue.
    pub fn on_device_status(&mut self, status: &DeviceStatus) -> Option<QueuedCommand> {
        if status.needs_set_utc() {
            self.pending.push_front(HandshakeStep::SetUtc);
        }
        if status.needs_set_info() && self.tier == FirmwareTier::Tier2 {
            let at = match self.pending.front() {
                Some(HandshakeStep::SetUtc) => 1,
                _ => 0,
            };
            self.pending.insert(at, HandshakeStep::SetInfo);
        }
        if status.needs_set_finger_detection() && !self.settings.skip_finger_detection {
            self.pending.push_back(HandshakeStep::SetFingerDetection);
        }
        self.next_command()
    }

    pub fn on_command_complete(&mut self) -> Option<QueuedCommand> {
        self.next_command()
    }

    /// `None` or zero length ends the drain.
    pub fn on_memfault_file_length(&mut self, length: Option<u32>) -> Option<QueuedCommand> {
        match length {
            Some(len) if len > 0 => {
                self.memfault_expected_length = len;
                Some(self.step_command(HandshakeStep::ReadMemfaultFile))
            }
            _ => self.finish(),
        }
    }

    /// A `ReadFile` finished. `stored` is whether a chunk reached the buffer.
    pub fn on_memfault_read_complete(&mut self, stored: bool) -> Option<QueuedCommand> {
        self.memfault_reads += 1;
        if stored {
            self.memfault_stored += 1;
        }
        if self.memfault_reads < self.settings.max_memfault_chunks {
            Some(self.step_command(HandshakeStep::GetMemfaultFileLength))
        } else {
            self.finish()
        }
    }

    /// The current step timed out or was rejected by the device.
    pub fn on_step_failed(&mut self) -> Option<QueuedCommand> {
        match self.current_step {
            Some(HandshakeStep::GetMemfaultFileLength) => self.finish(),
            Some(HandshakeStep::ReadMemfaultFile) => self.on_memfault_read_complete(false),
            _ => self.next_command(),
        }
    }

    /// Abandon the drain, e.g. when a chunk cannot fit the crash-log buffer.
    pub fn abort_drain(&mut self) {
        self.finish();
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Chunks stored in the crash-log buffer during this drain.
    pub fn memfault_chunks_downloaded(&self) -> u32 {
        self.memfault_stored
    }

    pub fn memfault_expected_length(&self) -> u32 {
        self.memfault_expected_length
    }

    pub fn current_step(&self) -> Option<HandshakeStep> {
        self.current_step
    }

    fn finish(&mut self) -> Option<QueuedCommand> {
        self.current_step = None;
        self.complete = true;
        None
    }

    fn next_command(&mut self) -> Option<QueuedCommand> {
        if let Some(step) = self.pending.pop_front() {
            return Some(self.step_command(step));
        }
        if !self.memfault_draining
            && self.settings.memfault_enabled
            && self.tier >= FirmwareTier::Tier1
        {
            self.memfault_draining = true;
            return Some(self.step_command(HandshakeStep::GetMemfaultFileLength));
        }
        self.finish()
    }

    fn step_command(&mut self, step: HandshakeStep) -> QueuedCommand {
        self.current_step = Some(step);
        let data = match step {
            HandshakeStep::GetDaqConfig => builder::get_daq_config(),
            HandshakeStep::GetDeviceStatus => builder::get_device_status(),
            HandshakeStep::SetUtc => builder::set_utc(self.time.utc_seconds()),
            HandshakeStep::SetInfo => builder::set_info(self.time.gmt_offset_hours()),
            HandshakeStep::SetFingerDetection => builder::set_finger_detection(true),
            HandshakeStep::GetMemfaultFileLength => builder::get_file_length(MEMFAULT_FILE_ID),
            HandshakeStep::ReadMemfaultFile => {
                builder::read_file(MEMFAULT_FILE_ID, 0, self.memfault_expected_length)
            }
        };
        QueuedCommand::notification(step.tag(), data, self.settings.command_timeout)
    }
}

//! SUOTA firmware-update state machine.
//!
//! `Idle -> Flash -> PatchLen -> Streaming -> WaitClose -> Finalize` and
//! then one of `Complete`, `Error` or `Cancelled`. Like the download
//! controller it only returns [`FwUpdateAction`]s; delays come back in as
//! [`FwCallback`]s once the slot's timer fires.

use crate::events::{ConnectionId, ErrorCode, HpyEvent};
use crate::timer::FwCallback;
use hpy_config::FwUpdateConfig;
use hpy_protocol::command_id::L2CAP_SUOTA_PSM;
use hpy_protocol::model::CharId;
use std::sync::Arc;
use std::time::Duration;

pub const SUOTA_CMD_FLASH: [u8; 4] = [0x00, 0x00, 0x00, 0x13];
pub const SUOTA_CMD_FINALIZE: [u8; 4] = [0x00, 0x00, 0x00, 0xFE];
pub const SUOTA_CMD_RESET: [u8; 4] = [0x00, 0x00, 0x00, 0xFD];
pub const SUOTA_CMD_ABORT: [u8; 4] = [0x00, 0x00, 0x00, 0xFF];

pub const SUOTA_SRV_STARTED: u8 = 1;
pub const SUOTA_CMP_OK: u8 = 2;
pub const SUOTA_SRV_EXIT: u8 = 3;
pub const SUOTA_APP_ERROR: u8 = 9;
pub const SUOTA_IMG_STARTED: u8 = 16;

/// Status codes `SRV_EXIT..=APP_ERROR` abort the update in any state.
pub fn is_suota_error(code: u8) -> bool {
    (SUOTA_SRV_EXIT..=SUOTA_APP_ERROR).contains(&code)
}

pub fn suota_status_name(code: u8) -> String {
    let name = match code {
        SUOTA_SRV_STARTED => "SRV_STARTED",
        SUOTA_CMP_OK => "CMP_OK",
        SUOTA_SRV_EXIT => "SRV_EXIT",
        4 => "CRC_ERR",
        5 => "PATCH_LEN_ERR",
        6 => "EXT_MEM_WRITE_ERR",
        7 => "INT_MEM_ERR",
        8 => "INVAL_MEM_TYPE",
        SUOTA_APP_ERROR => "APP_ERROR",
        SUOTA_IMG_STARTED => "IMG_STARTED",
        other => return format!("UNKNOWN({})", other),
    };
    name.to_string()
}

/// Block size as written to the patch-length characteristic. `None` when it
/// is zero or does not fit the 16-bit field.
pub fn patch_len(block_size: usize) -> Option<u16> {
    u16::try_from(block_size).ok().filter(|len| *len > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwUpdateState {
    Idle,
    Flash,
    PatchLen,
    Streaming,
    WaitClose,
    Finalize,
    Complete,
    Error,
    Cancelled,
}

impl FwUpdateState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FwUpdateState::Complete | FwUpdateState::Error | FwUpdateState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FwUpdateAction {
    /// Write to a SUOTA characteristic with response.
    WriteSuota { char_id: CharId, data: Vec<u8> },
    StartL2capStream {
        psm: u16,
        image: Arc<[u8]>,
        block_size: usize,
        inter_block_delay: Duration,
    },
    EmitEvent(HpyEvent),
    ScheduleCallback { after: Duration, callback: FwCallback },
    SessionComplete,
    Multiple(Vec<FwUpdateAction>),
    NoOp,
}

#[derive(Debug)]
pub struct FwUpdateController {
    conn_id: ConnectionId,
    image: Arc<[u8]>,
    config: FwUpdateConfig,
    state: FwUpdateState,
}

impl FwUpdateController {
    pub fn new(conn_id: ConnectionId, image: Arc<[u8]>, config: FwUpdateConfig) -> Self {
        Self {
            conn_id,
            image,
            config,
            state: FwUpdateState::Idle,
        }
    }

    pub fn state(&self) -> FwUpdateState {
        self.state
    }

    pub fn total_blocks(&self) -> usize {
        self.image.len().div_ceil(self.config.block_size.max(1))
    }

    pub fn start(&mut self) -> FwUpdateAction {
        self.state = FwUpdateState::Flash;
        FwUpdateAction::WriteSuota {
            char_id: CharId::SuotaMemDev,
            data: SUOTA_CMD_FLASH.to_vec(),
        }
    }

    pub fn on_suota_status(&mut self, code: u8) -> FwUpdateAction {
        if is_suota_error(code) {
            return self.fail(format!("SUOTA error: {}", suota_status_name(code)));
        }

        match self.state {
            // SRV_STARTED or IMG_STARTED; anything outside the error band is accepted
            FwUpdateState::Flash => {
                let Some(len) = patch_len(self.config.block_size) else {
                    return self.fail(format!(
                        "SUOTA block size {} out of range",
                        self.config.block_size
                    ));
                };
                self.state = FwUpdateState::PatchLen;
                FwUpdateAction::Multiple(vec![
                    FwUpdateAction::WriteSuota {
                        char_id: CharId::SuotaPatchLen,
                        data: len.to_le_bytes().to_vec(),
                    },
                    FwUpdateAction::ScheduleCallback {
                        after: Duration::from_millis(self.config.patch_len_delay_ms),
                        callback: FwCallback::Stream,
                    },
                ])
            }
            FwUpdateState::Finalize if code == SUOTA_CMP_OK => {
                self.state = FwUpdateState::Complete;
                FwUpdateAction::Multiple(vec![
                    FwUpdateAction::WriteSuota {
                        char_id: CharId::SuotaMemDev,
                        data: SUOTA_CMD_RESET.to_vec(),
                    },
                    FwUpdateAction::SessionComplete,
                ])
            }
            FwUpdateState::Finalize => {
                self.fail(format!("SUOTA FINALIZE failed: status={}", code))
            }
            _ => FwUpdateAction::NoOp,
        }
    }

    pub fn on_callback(&mut self, callback: FwCallback) -> FwUpdateAction {
        match (callback, self.state) {
            (FwCallback::Stream, FwUpdateState::PatchLen) => {
                self.state = FwUpdateState::Streaming;
                FwUpdateAction::StartL2capStream {
                    psm: L2CAP_SUOTA_PSM,
                    image: Arc::clone(&self.image),
                    block_size: self.config.block_size,
                    inter_block_delay: Duration::from_millis(self.config.inter_block_delay_ms),
                }
            }
            (FwCallback::Finalize, FwUpdateState::WaitClose) => {
                self.state = FwUpdateState::Finalize;
                FwUpdateAction::WriteSuota {
                    char_id: CharId::SuotaMemDev,
                    data: SUOTA_CMD_FINALIZE.to_vec(),
                }
            }
            _ => FwUpdateAction::NoOp,
        }
    }

    pub fn on_stream_progress(&mut self, blocks_sent: usize, blocks_total: usize) -> FwUpdateAction {
        if self.state != FwUpdateState::Streaming {
            return FwUpdateAction::NoOp;
        }
        FwUpdateAction::EmitEvent(HpyEvent::FwUpdateProgress {
            conn_id: self.conn_id,
            bytes_written: blocks_sent * self.config.block_size,
            total_bytes: blocks_total * self.config.block_size,
        })
    }

    /// The image is on the wire; give the ring time to drain before finalize.
    pub fn on_stream_complete(&mut self) -> FwUpdateAction {
        if self.state != FwUpdateState::Streaming {
            return FwUpdateAction::NoOp;
        }
        self.state = FwUpdateState::WaitClose;
        FwUpdateAction::ScheduleCallback {
            after: Duration::from_millis(self.config.close_wait_ms),
            callback: FwCallback::Finalize,
        }
    }

    pub fn on_stream_error(&mut self, message: &str) -> FwUpdateAction {
        if self.state.is_terminal() || self.state == FwUpdateState::Idle {
            return FwUpdateAction::NoOp;
        }
        self.fail(format!("L2CAP stream error: {}", message))
    }

    pub fn cancel(&mut self) -> FwUpdateAction {
        if self.state == FwUpdateState::Idle || self.state.is_terminal() {
            return FwUpdateAction::NoOp;
        }
        self.state = FwUpdateState::Cancelled;
        FwUpdateAction::WriteSuota {
            char_id: CharId::SuotaMemDev,
            data: SUOTA_CMD_ABORT.to_vec(),
        }
    }

    fn fail(&mut self, message: String) -> FwUpdateAction {
        self.state = FwUpdateState::Error;
        FwUpdateAction::EmitEvent(HpyEvent::error(
            self.conn_id,
            ErrorCode::FwTransferFail,
            message,
        ))
    }
}

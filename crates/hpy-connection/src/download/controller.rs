// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Batch download state machine.
//!
//! Pure and runtime-agnostic: every input returns a [`DownloadAction`]
//! describing the effect the slot must perform. The L2CAP path is tried
//! first when the firmware supports it; any L2CAP failure drops to GATT for
//! the remaining frames, and GATT has no further fallback.

use super::accumulator::GattFrameAccumulator;
use crate::events::{ConnectionId, ErrorCode, HpyEvent, Transport};
use crate::queue::QueuedCommand;
use hpy_config::HpyConfig;
use hpy_protocol::builder;
use hpy_protocol::command_id as cmd;
use hpy_protocol::response::parse_configure_l2cap_response;
use std::time::Duration;

pub const DL_GET_DEV_STATUS: &str = "DL_GET_DEV_STATUS";
pub const DL_CONFIGURE_L2CAP_OPEN: &str = "DL_CONFIGURE_L2CAP_OPEN";
pub const DL_GET_FRAMES_L2CAP: &str = "DL_GET_FRAMES_L2CAP";
pub const DL_CONFIGURE_L2CAP_CLOSE: &str = "DL_CONFIGURE_L2CAP_CLOSE";
pub const DL_GET_FRAMES_GATT: &str = "DL_GET_FRAMES_GATT";

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadAction {
    EnqueueCommand(QueuedCommand),
    OpenL2cap { psm: u16 },
    StartL2capReceive { expected_frames: u32 },
    CloseL2cap,
    EmitEvent(HpyEvent),
    SessionComplete,
    Multiple(Vec<DownloadAction>),
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    ConfigureL2capOpen,
    WaitingL2capSocket,
    RequestingL2capBatch,
    ReceivingL2cap,
    ReceivingGatt,
    ConfigureL2capClose,
    Done,
}

impl DownloadPhase {
    pub fn is_l2cap(self) -> bool {
        matches!(
            self,
            DownloadPhase::ConfigureL2capOpen
                | DownloadPhase::WaitingL2capSocket
                | DownloadPhase::RequestingL2capBatch
                | DownloadPhase::ReceivingL2cap
        )
    }

    /// An L2CAP socket may be open in this phase.
    fn has_socket(self) -> bool {
        matches!(
            self,
            DownloadPhase::WaitingL2capSocket
                | DownloadPhase::RequestingL2capBatch
                | DownloadPhase::ReceivingL2cap
        )
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub batch_size: u32,
    pub max_retries: u32,
    /// Firmware supports L2CAP and the host prefers it.
    pub use_l2cap: bool,
    pub l2cap_command_timeout: Duration,
    pub gatt_batch_timeout: Duration,
}

impl DownloadSettings {
    pub fn from_config(config: &HpyConfig, firmware_supports_l2cap: bool) -> Self {
        let download = &config.download;
        Self {
            batch_size: download.batch_size.max(1),
            max_retries: download.max_retries,
            use_l2cap: firmware_supports_l2cap && download.prefer_l2cap,
            l2cap_command_timeout: Duration::from_millis(download.l2cap_command_timeout_ms),
            gatt_batch_timeout: Duration::from_millis(download.gatt_batch_timeout_ms),
        }
    }
}

#[derive(Debug)]
pub struct DownloadController {
    conn_id: ConnectionId,
    settings: DownloadSettings,
    phase: DownloadPhase,
    sync_frame_count: u32,
    sync_frame_reboots: u32,
    total_to_download: u32,
    total_downloaded: u32,
    batch_expected: u32,
    batch_received: u32,
    batch_retries: u32,
    transport: Transport,
    gatt: GattFrameAccumulator,
}

impl DownloadController {
    pub fn new(conn_id: ConnectionId, settings: DownloadSettings) -> Self {
        Self {
            conn_id,
            settings,
            phase: DownloadPhase::Idle,
            sync_frame_count: 0,
            sync_frame_reboots: 0,
            total_to_download: 0,
            total_downloaded: 0,
            batch_expected: 0,
            batch_received: 0,
            batch_retries: 0,
            transport: Transport::Gatt,
            gatt: GattFrameAccumulator::new(),
        }
    }

    pub fn phase(&self) -> DownloadPhase {
        self.phase
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Frames received in the batch currently in progress.
    pub fn batch_frames_received(&self) -> u32 {
        self.batch_received
    }

    pub fn total_frames_downloaded(&self) -> u32 {
        self.total_downloaded
    }

    pub fn start_session(
        &mut self,
        sync_frame_count: u32,
        sync_frame_reboots: u32,
        unsynced_frames: u32,
    ) -> DownloadAction {
        self.sync_frame_count = sync_frame_count;
        self.sync_frame_reboots = sync_frame_reboots;
        self.total_to_download = unsynced_frames;
        self.total_downloaded = 0;
        self.batch_retries = 0;

        if unsynced_frames == 0 {
            return self.finish_session(Vec::new());
        }
        if self.settings.use_l2cap {
            self.start_l2cap_path()
        } else {
            self.start_gatt_path()
        }
    }

    /// Command response routed from the slot while downloading.
    pub fn on_command_response(&mut self, value: &[u8]) -> DownloadAction {
        let Some(&cmd_byte) = value.first() else {
            return DownloadAction::NoOp;
        };
        if cmd_byte == cmd::UNRECOGNIZED {
            if self.phase.is_l2cap() {
                return self.fall_back_to_gatt();
            }
            if self.phase == DownloadPhase::ReceivingGatt {
                return self.on_gatt_batch_complete(self.gatt.frames_received(), false);
            }
            return DownloadAction::NoOp;
        }

        match (self.phase, cmd_byte) {
            (DownloadPhase::ConfigureL2capOpen, cmd::CONFIGURE_L2CAP) => {
                match parse_configure_l2cap_response(value) {
                    Ok(resp) if resp.status == 0 => {
                        self.phase = DownloadPhase::WaitingL2capSocket;
                        DownloadAction::OpenL2cap {
                            psm: cmd::L2CAP_DOWNLOAD_PSM,
                        }
                    }
                    _ => self.fall_back_to_gatt(),
                }
            }
            // The channel status byte is informational; the receiver is
            // already listening and reports its own failures.
            (DownloadPhase::RequestingL2capBatch, cmd::GET_FRAMES_L2CAP) => {
                self.phase = DownloadPhase::ReceivingL2cap;
                DownloadAction::NoOp
            }
            (DownloadPhase::ReceivingGatt, cmd::GET_FRAMES) => {
                let result = self.gatt.validate(value);
                self.on_gatt_batch_complete(result.frames_received, result.crc_valid)
            }
            (DownloadPhase::ConfigureL2capClose, cmd::CONFIGURE_L2CAP) => {
                self.finish_session(Vec::new())
            }
            _ => DownloadAction::NoOp,
        }
    }

    /// A download command expired without a response.
    pub fn on_command_timeout(&mut self, tag: &str) -> DownloadAction {
        match (self.phase, tag) {
            (phase, DL_CONFIGURE_L2CAP_OPEN | DL_GET_FRAMES_L2CAP) if phase.is_l2cap() => {
                self.fall_back_to_gatt()
            }
            (DownloadPhase::ReceivingGatt, DL_GET_FRAMES_GATT) => {
                self.on_gatt_batch_complete(self.gatt.frames_received(), false)
            }
            (DownloadPhase::ConfigureL2capClose, DL_CONFIGURE_L2CAP_CLOSE) => {
                self.finish_session(Vec::new())
            }
            _ => DownloadAction::NoOp,
        }
    }

    pub fn on_l2cap_connected(&mut self) -> DownloadAction {
        if self.phase != DownloadPhase::WaitingL2capSocket {
            return DownloadAction::NoOp;
        }
        self.transport = Transport::L2cap;
        self.request_l2cap_batch()
    }

    /// One frame reassembled by the platform L2CAP receiver.
    pub fn on_l2cap_frame(&mut self, frame: Vec<u8>) -> DownloadAction {
        if !matches!(
            self.phase,
            DownloadPhase::RequestingL2capBatch | DownloadPhase::ReceivingL2cap
        ) {
            return DownloadAction::NoOp;
        }
        DownloadAction::Multiple(vec![
            DownloadAction::EmitEvent(HpyEvent::DownloadFrame {
                conn_id: self.conn_id,
                frame,
            }),
            self.frame_progress(),
        ])
    }

    pub fn on_l2cap_batch_complete(&mut self, frames_received: u32, crc_valid: bool) -> DownloadAction {
        // The batch can finish before the GET_FRAMES_L2CAP response arrives.
        if !matches!(
            self.phase,
            DownloadPhase::RequestingL2capBatch | DownloadPhase::ReceivingL2cap
        ) {
            return DownloadAction::NoOp;
        }

        if !crc_valid {
            if self.batch_retries < self.settings.max_retries {
                self.batch_retries += 1;
                return self.request_l2cap_batch();
            }
            return self.fall_back_to_gatt();
        }

        let mut actions = self.commit_batch(frames_received);
        if self.is_drained(frames_received) {
            self.phase = DownloadPhase::ConfigureL2capClose;
            actions.push(DownloadAction::CloseL2cap);
            actions.push(DownloadAction::EnqueueCommand(QueuedCommand::notification(
                DL_CONFIGURE_L2CAP_CLOSE,
                builder::configure_l2cap(false, false),
                self.settings.l2cap_command_timeout,
            )));
        } else {
            actions.push(self.request_l2cap_batch());
        }
        DownloadAction::Multiple(actions)
    }

    pub fn on_l2cap_error(&mut self, _message: &str) -> DownloadAction {
        if !self.phase.is_l2cap() {
            return DownloadAction::NoOp;
        }
        self.fall_back_to_gatt()
    }

    /// Stream-TX payload during a GATT batch.
    pub fn on_stream_data(&mut self, data: &[u8]) -> DownloadAction {
        if self.phase != DownloadPhase::ReceivingGatt {
            return DownloadAction::NoOp;
        }
        let frames = self.gatt.push(data);
        if frames.is_empty() {
            return DownloadAction::NoOp;
        }
        let mut actions = Vec::with_capacity(frames.len() * 2);
        for frame in frames {
            actions.push(DownloadAction::EmitEvent(HpyEvent::DownloadFrame {
                conn_id: self.conn_id,
                frame,
            }));
            actions.push(self.frame_progress());
        }
        DownloadAction::Multiple(actions)
    }

    pub fn on_gatt_batch_complete(&mut self, frames_received: u32, crc_valid: bool) -> DownloadAction {
        if self.phase != DownloadPhase::ReceivingGatt {
            return DownloadAction::NoOp;
        }

        if !crc_valid {
            if self.batch_retries < self.settings.max_retries {
                self.batch_retries += 1;
                return self.request_gatt_batch();
            }
            self.batch_retries = 0;
            let actions = vec![
                DownloadAction::EmitEvent(HpyEvent::DownloadBatch {
                    conn_id: self.conn_id,
                    frames_in_batch: frames_received,
                    total_frames_downloaded: self.total_downloaded,
                    crc_valid: false,
                }),
                DownloadAction::EmitEvent(HpyEvent::error(
                    self.conn_id,
                    ErrorCode::DownloadCrcInvalid,
                    format!(
                        "Batch CRC invalid after {} retries",
                        self.settings.max_retries
                    ),
                )),
            ];
            return self.finish_session(actions);
        }

        let mut actions = self.commit_batch(frames_received);
        if self.is_drained(frames_received) {
            self.finish_session(actions)
        } else {
            actions.push(self.request_gatt_batch());
            DownloadAction::Multiple(actions)
        }
    }

    /// No more batches after this one. An empty verified batch means the
    /// ring has nothing left, whatever its status count said.
    fn is_drained(&self, frames_in_batch: u32) -> bool {
        frames_in_batch == 0 || self.remaining() == 0
    }

    fn remaining(&self) -> u32 {
        self.total_to_download.saturating_sub(self.total_downloaded)
    }

    fn next_batch_len(&self) -> u32 {
        self.remaining().min(self.settings.batch_size)
    }

    fn frame_progress(&mut self) -> DownloadAction {
        self.batch_received += 1;
        DownloadAction::EmitEvent(HpyEvent::DownloadProgress {
            conn_id: self.conn_id,
            frames_downloaded: self.total_downloaded + self.batch_received,
            frames_total: self.total_to_download,
            transport: self.transport,
        })
    }

    /// Advance the sync position past a verified batch.
    fn commit_batch(&mut self, frames: u32) -> Vec<DownloadAction> {
        self.total_downloaded += frames;
        self.sync_frame_count = self.sync_frame_count.wrapping_add(frames);
        self.batch_retries = 0;
        self.batch_received = 0;
        vec![
            DownloadAction::EmitEvent(HpyEvent::DownloadBatch {
                conn_id: self.conn_id,
                frames_in_batch: frames,
                total_frames_downloaded: self.total_downloaded,
                crc_valid: true,
            }),
            DownloadAction::EmitEvent(HpyEvent::DownloadProgress {
                conn_id: self.conn_id,
                frames_downloaded: self.total_downloaded,
                frames_total: self.total_to_download,
                transport: self.transport,
            }),
        ]
    }

    fn start_l2cap_path(&mut self) -> DownloadAction {
        self.phase = DownloadPhase::ConfigureL2capOpen;
        DownloadAction::EnqueueCommand(QueuedCommand::notification(
            DL_CONFIGURE_L2CAP_OPEN,
            builder::configure_l2cap(true, true),
            self.settings.l2cap_command_timeout,
        ))
    }

    fn request_l2cap_batch(&mut self) -> DownloadAction {
        self.batch_expected = self.next_batch_len();
        self.batch_received = 0;
        self.phase = DownloadPhase::RequestingL2capBatch;
        // The ring transmits as soon as it accepts the request, so the
        // receiver must be listening first.
        DownloadAction::Multiple(vec![
            DownloadAction::StartL2capReceive {
                expected_frames: self.batch_expected,
            },
            DownloadAction::EnqueueCommand(QueuedCommand::notification(
                DL_GET_FRAMES_L2CAP,
                builder::get_frames_l2cap(
                    self.sync_frame_count,
                    self.sync_frame_reboots,
                    self.batch_expected,
                ),
                self.settings.l2cap_command_timeout,
            )),
        ])
    }

    fn fall_back_to_gatt(&mut self) -> DownloadAction {
        let close = self.phase.has_socket();
        self.transport = Transport::Gatt;
        self.batch_retries = 0;
        let gatt = self.start_gatt_path();
        if close {
            DownloadAction::Multiple(vec![DownloadAction::CloseL2cap, gatt])
        } else {
            gatt
        }
    }

    fn start_gatt_path(&mut self) -> DownloadAction {
        self.transport = Transport::Gatt;
        self.request_gatt_batch()
    }

    fn request_gatt_batch(&mut self) -> DownloadAction {
        self.batch_expected = self.next_batch_len();
        self.batch_received = 0;
        self.gatt.reset();
        // Receiving before the write goes out: stream data can arrive before
        // the write acknowledgment.
        self.phase = DownloadPhase::ReceivingGatt;
        DownloadAction::EnqueueCommand(QueuedCommand::write_ack(
            DL_GET_FRAMES_GATT,
            builder::get_frames_gatt(
                self.sync_frame_count,
                self.sync_frame_reboots,
                self.batch_expected,
            ),
            self.settings.gatt_batch_timeout,
        ))
    }

    fn finish_session(&mut self, mut actions: Vec<DownloadAction>) -> DownloadAction {
        self.phase = DownloadPhase::Done;
        actions.push(DownloadAction::EmitEvent(HpyEvent::DownloadComplete {
            conn_id: self.conn_id,
            total_frames: self.total_downloaded,
        }));
        actions.push(DownloadAction::SessionComplete);
        DownloadAction::Multiple(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpy_protocol::command_id::FRAME_SIZE;
    use hpy_protocol::Crc32;

    fn conn() -> ConnectionId {
        ConnectionId::from_index(0).unwrap()
    }

    fn settings(use_l2cap: bool) -> DownloadSettings {
        DownloadSettings {
            batch_size: 64,
            max_retries: 1,
            use_l2cap,
            l2cap_command_timeout: Duration::from_secs(5),
            gatt_batch_timeout: Duration::from_secs(30),
        }
    }

    fn flatten(action: DownloadAction, out: &mut Vec<DownloadAction>) {
        match action {
            DownloadAction::Multiple(actions) => {
                for a in actions {
                    flatten(a, out);
                }
            }
            DownloadAction::NoOp => {}
            other => out.push(other),
        }
    }

    fn flat(action: DownloadAction) -> Vec<DownloadAction> {
        let mut out = Vec::new();
        flatten(action, &mut out);
        out
    }

    fn enqueued_tags(actions: &[DownloadAction]) -> Vec<&'static str> {
        actions
            .iter()
            .filter_map(|a| match a {
                DownloadAction::EnqueueCommand(c) => Some(c.tag),
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[DownloadAction]) -> Vec<&HpyEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                DownloadAction::EmitEvent(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn crc_response(data: &[u8]) -> Vec<u8> {
        let mut response = vec![cmd::GET_FRAMES];
        response.extend_from_slice(&Crc32::checksum(data).to_le_bytes());
        response.push(0);
        response
    }

    #[test]
    fn test_zero_frames_completes_immediately() {
        let mut dl = DownloadController::new(conn(), settings(true));
        let actions = flat(dl.start_session(10, 1, 0));
        assert_eq!(
            actions,
            vec![
                DownloadAction::EmitEvent(HpyEvent::DownloadComplete {
                    conn_id: conn(),
                    total_frames: 0
                }),
                DownloadAction::SessionComplete,
            ]
        );
        assert_eq!(dl.phase(), DownloadPhase::Done);
    }

    #[test]
    fn test_gatt_batch_valid_crc() {
        let mut dl = DownloadController::new(conn(), settings(false));
        let actions = flat(dl.start_session(100, 2, 2));
        assert_eq!(enqueued_tags(&actions), vec![DL_GET_FRAMES_GATT]);
        assert_eq!(dl.phase(), DownloadPhase::ReceivingGatt);

        let stream = vec![0xA5u8; FRAME_SIZE * 2];
        let mut frames = 0;
        for chunk in stream.chunks(244) {
            let acts = flat(dl.on_stream_data(chunk));
            frames += events(&acts)
                .iter()
                .filter(|e| matches!(e, HpyEvent::DownloadFrame { .. }))
                .count();
        }
        assert_eq!(frames, 2);
        assert_eq!(dl.batch_frames_received(), 2);

        let actions = flat(dl.on_command_response(&crc_response(&stream)));
        let evs = events(&actions);
        assert!(matches!(
            evs[0],
            HpyEvent::DownloadBatch {
                frames_in_batch: 2,
                total_frames_downloaded: 2,
                crc_valid: true,
                ..
            }
        ));
        assert!(matches!(evs.last(), Some(HpyEvent::DownloadComplete { total_frames: 2, .. })));
        assert_eq!(actions.last(), Some(&DownloadAction::SessionComplete));
    }

    #[test]
    fn test_gatt_batches_advance_sync_position() {
        let mut s = settings(false);
        s.batch_size = 1;
        let mut dl = DownloadController::new(conn(), s);
        dl.start_session(100, 2, 2);
        let frame = vec![1u8; FRAME_SIZE];
        dl.on_stream_data(&frame);
        let actions = flat(dl.on_command_response(&crc_response(&frame)));
        let next = actions
            .iter()
            .find_map(|a| match a {
                DownloadAction::EnqueueCommand(c) => Some(c.data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(&next[1..5], &101u32.to_le_bytes());
        assert_eq!(&next[17..21], &1u32.to_le_bytes());
    }

    #[test]
    fn test_gatt_crc_retry_then_fail() {
        let mut dl = DownloadController::new(conn(), settings(false));
        dl.start_session(0, 0, 1);
        dl.on_stream_data(&vec![1u8; FRAME_SIZE]);
        let bad = vec![cmd::GET_FRAMES, 0, 0, 0, 0, 0];

        let retry = flat(dl.on_command_response(&bad));
        assert_eq!(enqueued_tags(&retry), vec![DL_GET_FRAMES_GATT]);
        assert!(events(&retry).is_empty());

        dl.on_stream_data(&vec![1u8; FRAME_SIZE]);
        let failed = flat(dl.on_command_response(&bad));
        let evs = events(&failed);
        assert!(matches!(evs[0], HpyEvent::DownloadBatch { crc_valid: false, .. }));
        assert!(matches!(
            evs[1],
            HpyEvent::Error {
                code: ErrorCode::DownloadCrcInvalid,
                ..
            }
        ));
        assert!(matches!(evs[2], HpyEvent::DownloadComplete { total_frames: 0, .. }));
        assert_eq!(failed.last(), Some(&DownloadAction::SessionComplete));
    }

    #[test]
    fn test_empty_valid_gatt_batch_ends_session() {
        let mut dl = DownloadController::new(conn(), settings(false));
        dl.start_session(100, 1, 5);
        let actions = flat(dl.on_command_response(&crc_response(&[])));
        assert!(enqueued_tags(&actions).is_empty());
        assert!(matches!(
            events(&actions).last(),
            Some(HpyEvent::DownloadComplete { total_frames: 0, .. })
        ));
        assert_eq!(actions.last(), Some(&DownloadAction::SessionComplete));
        assert_eq!(dl.phase(), DownloadPhase::Done);
    }

    #[test]
    fn test_empty_valid_l2cap_batch_closes_channel() {
        let mut dl = DownloadController::new(conn(), settings(true));
        dl.start_session(100, 1, 5);
        dl.on_command_response(&[cmd::CONFIGURE_L2CAP, 0x00, 0x01]);
        dl.on_l2cap_connected();
        let actions = flat(dl.on_l2cap_batch_complete(0, true));
        assert!(actions.contains(&DownloadAction::CloseL2cap));
        assert_eq!(enqueued_tags(&actions), vec![DL_CONFIGURE_L2CAP_CLOSE]);
        assert_eq!(dl.phase(), DownloadPhase::ConfigureL2capClose);
    }

    #[test]
    fn test_l2cap_happy_path() {
        let mut dl = DownloadController::new(conn(), settings(true));
        let actions = flat(dl.start_session(5, 0, 3));
        assert_eq!(enqueued_tags(&actions), vec![DL_CONFIGURE_L2CAP_OPEN]);

        let open = dl.on_command_response(&[cmd::CONFIGURE_L2CAP, 0x00, 0x01]);
        assert_eq!(open, DownloadAction::OpenL2cap { psm: 130 });

        let request = flat(dl.on_l2cap_connected());
        assert_eq!(request[0], DownloadAction::StartL2capReceive { expected_frames: 3 });
        assert_eq!(enqueued_tags(&request), vec![DL_GET_FRAMES_L2CAP]);
        assert_eq!(dl.transport(), Transport::L2cap);

        dl.on_command_response(&[cmd::GET_FRAMES_L2CAP, 0x02]);
        assert_eq!(dl.phase(), DownloadPhase::ReceivingL2cap);
        for _ in 0..3 {
            dl.on_l2cap_frame(vec![0u8; FRAME_SIZE]);
        }
        assert_eq!(dl.batch_frames_received(), 3);

        let done = flat(dl.on_l2cap_batch_complete(3, true));
        assert!(done.contains(&DownloadAction::CloseL2cap));
        assert_eq!(enqueued_tags(&done), vec![DL_CONFIGURE_L2CAP_CLOSE]);
        assert_eq!(dl.phase(), DownloadPhase::ConfigureL2capClose);

        let finished = flat(dl.on_command_response(&[cmd::CONFIGURE_L2CAP, 0x00, 0x00]));
        assert!(matches!(
            events(&finished)[0],
            HpyEvent::DownloadComplete { total_frames: 3, .. }
        ));
    }

    #[test]
    fn test_l2cap_configure_rejected_falls_back_to_gatt() {
        let mut dl = DownloadController::new(conn(), settings(true));
        dl.start_session(0, 0, 4);
        let actions = flat(dl.on_command_response(&[cmd::CONFIGURE_L2CAP, 0x01, 0x00]));
        assert_eq!(enqueued_tags(&actions), vec![DL_GET_FRAMES_GATT]);
        assert!(!actions.contains(&DownloadAction::CloseL2cap));
        assert_eq!(dl.transport(), Transport::Gatt);
    }

    #[test]
    fn test_l2cap_unrecognized_falls_back_and_closes_socket() {
        let mut dl = DownloadController::new(conn(), settings(true));
        dl.start_session(0, 0, 4);
        dl.on_command_response(&[cmd::CONFIGURE_L2CAP, 0x00, 0x01]);
        dl.on_l2cap_connected();
        let actions = flat(dl.on_command_response(&[cmd::UNRECOGNIZED]));
        assert_eq!(actions[0], DownloadAction::CloseL2cap);
        assert_eq!(enqueued_tags(&actions), vec![DL_GET_FRAMES_GATT]);
        assert_eq!(dl.phase(), DownloadPhase::ReceivingGatt);
    }

    #[test]
    fn test_l2cap_crc_exhausted_falls_back_without_advancing() {
        let mut dl = DownloadController::new(conn(), settings(true));
        dl.start_session(50, 0, 2);
        dl.on_command_response(&[cmd::CONFIGURE_L2CAP, 0x00, 0x01]);
        dl.on_l2cap_connected();

        let retry = flat(dl.on_l2cap_batch_complete(2, false));
        assert_eq!(enqueued_tags(&retry), vec![DL_GET_FRAMES_L2CAP]);

        let fallback = flat(dl.on_l2cap_batch_complete(2, false));
        assert!(events(&fallback).is_empty());
        let gatt_request = fallback
            .iter()
            .find_map(|a| match a {
                DownloadAction::EnqueueCommand(c) if c.tag == DL_GET_FRAMES_GATT => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(&gatt_request.data[1..5], &50u32.to_le_bytes());
        assert_eq!(dl.total_frames_downloaded(), 0);
    }

    #[test]
    fn test_timeouts_route_by_phase() {
        let mut dl = DownloadController::new(conn(), settings(true));
        dl.start_session(0, 0, 1);
        let fallback = flat(dl.on_command_timeout(DL_CONFIGURE_L2CAP_OPEN));
        assert_eq!(enqueued_tags(&fallback), vec![DL_GET_FRAMES_GATT]);

        // Stale tag from another phase is ignored
        assert_eq!(dl.on_command_timeout(DL_GET_FRAMES_L2CAP), DownloadAction::NoOp);
    }

    #[test]
    fn test_batch_complete_ignored_outside_l2cap_receive() {
        let mut dl = DownloadController::new(conn(), settings(false));
        dl.start_session(0, 0, 1);
        assert_eq!(dl.on_l2cap_batch_complete(1, true), DownloadAction::NoOp);
        assert_eq!(dl.on_l2cap_error("late"), DownloadAction::NoOp);
    }
}

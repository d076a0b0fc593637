// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! One connection: lifecycle, command queue and the active sub-controller.
//!
//! A [`ConnectionSlot`] owns everything belonging to a single ring. It reacts
//! to three kinds of input:
//!
//! - host calls routed from the façade (`connect`, `start_download`, ...)
//! - [`ShimEvent`]s reported by the platform
//! - [`TimerToken`]s delivered back by the [`TimerScheduler`]
//!
//! The handshake, download and firmware-update controllers are pure state
//! machines. At most one of them is active at a time; the slot performs the
//! actions they return.

use crate::download::{DownloadAction, DownloadController, DownloadSettings, DL_GET_DEV_STATUS};
use crate::error::ApiError;
use crate::events::{ConnectionId, ConnectionState, ErrorCode, HpyEvent};
use crate::fw_update::{patch_len, FwUpdateAction, FwUpdateController, FwUpdateState};
use crate::handshake::{HandshakeRunner, HandshakeSettings, HandshakeStep};
use crate::memfault::MemfaultBuffer;
use crate::queue::{CommandQueue, CompletionPolicy, Dispatch, QueueFull, QueuedCommand};
use crate::reconnect::{ReconnectController, ReconnectMode, ReconnectStep};
use crate::shim::{BleShim, EventSink, ShimEvent, TimeSource, WriteType};
use crate::timer::{TimerKind, TimerScheduler, TimerSet, TimerToken};
use hpy_config::HpyConfig;
use hpy_protocol::command_id as cmd;
use hpy_protocol::model::{
    CharId, DEVICE_INFO_READS, NOTIFY_SUBSCRIPTIONS, REQUIRED_CHARACTERISTICS,
};
use hpy_protocol::response::{
    parse_daq_config, parse_device_status, parse_extended_device_status, parse_file_length,
    parse_read_file_crc, parse_set_utc_response,
};
use hpy_protocol::{builder, Crc32, DeviceInfo, DeviceStatus, FirmwareTier};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared collaborators handed to every slot.
#[derive(Clone)]
pub struct SlotContext {
    pub shim: Arc<dyn BleShim>,
    pub time: Arc<dyn TimeSource>,
    pub events: Arc<dyn EventSink>,
    pub timers: Arc<dyn TimerScheduler>,
    pub config: Arc<HpyConfig>,
}

#[derive(Debug)]
enum ActiveController {
    None,
    Handshake(HandshakeRunner),
    Download(DownloadController),
    FwUpdate(FwUpdateController),
}

/// Post-connect setup progress before the handshake starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupStage {
    Idle,
    Subscribing,
    ReadingInfo,
}

pub struct ConnectionSlot {
    conn_id: ConnectionId,
    ctx: SlotContext,
    state: ConnectionState,
    handle: Option<String>,

    device_info: DeviceInfo,
    last_status: Option<DeviceStatus>,
    tier: FirmwareTier,
    available_chars: HashSet<CharId>,

    queue: CommandQueue,
    timers: TimerSet,
    active: ActiveController,
    reconnect: Option<ReconnectController>,

    setup: SetupStage,
    pending_subscriptions: VecDeque<CharId>,
    pending_reads: VecDeque<CharId>,

    memfault: MemfaultBuffer,
    memfault_rx: Option<Vec<u8>>,

    download_enabled: bool,
    pending_status_poll: bool,
    resume_download_after_reconnect: bool,
    fw_error_pending_disconnect: bool,
    was_fw_update_rebooting: bool,
    is_user_disconnect: bool,
    connect_handled: bool,
    service_discovery_started: bool,
}

impl ConnectionSlot {
    /// `instance` tags this slot's timers so tokens outliving a recycled id
    /// are recognised as stale.
    pub fn new(conn_id: ConnectionId, instance: u64, ctx: SlotContext) -> Self {
        let queue = CommandQueue::new(ctx.config.connection.max_queue_depth);
        let memfault = MemfaultBuffer::new(
            ctx.config.memfault.buffer_size,
            ctx.config.memfault.max_descriptors,
        );
        Self {
            conn_id,
            ctx,
            state: ConnectionState::Idle,
            handle: None,
            device_info: DeviceInfo::default(),
            last_status: None,
            tier: FirmwareTier::Tier0,
            available_chars: HashSet::new(),
            queue,
            timers: TimerSet::new(conn_id, instance),
            active: ActiveController::None,
            reconnect: None,
            setup: SetupStage::Idle,
            pending_subscriptions: VecDeque::new(),
            pending_reads: VecDeque::new(),
            memfault,
            memfault_rx: None,
            download_enabled: false,
            pending_status_poll: false,
            resume_download_after_reconnect: false,
            fw_error_pending_disconnect: false,
            was_fw_update_rebooting: false,
            is_user_disconnect: false,
            connect_handled: false,
            service_discovery_started: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn last_status(&self) -> Option<&DeviceStatus> {
        self.last_status.as_ref()
    }

    pub fn firmware_tier(&self) -> FirmwareTier {
        self.tier
    }

    pub fn is_download_enabled(&self) -> bool {
        self.download_enabled
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.pending()
    }

    pub fn reconnect_attempt(&self) -> Option<u32> {
        self.reconnect.as_ref().map(|rc| rc.attempt())
    }

    pub fn memfault(&self) -> &MemfaultBuffer {
        &self.memfault
    }

    pub fn memfault_mut(&mut self) -> &mut MemfaultBuffer {
        &mut self.memfault
    }

    // ========================================================================
    // Host operations
    // ========================================================================

    /// Start an initial connection. Only valid from `Idle` or `Disconnected`.
    pub fn connect(&mut self, handle: &str) -> bool {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Disconnected) {
            return false;
        }
        self.handle = Some(handle.to_string());
        self.is_user_disconnect = false;
        self.connect_handled = false;
        self.transition(ConnectionState::Connecting);
        self.ctx.shim.connect(self.conn_id, handle);
        true
    }

    /// User-initiated disconnect. No reconnection follows.
    pub fn disconnect(&mut self) {
        self.is_user_disconnect = true;
        self.resume_download_after_reconnect = false;
        self.fw_error_pending_disconnect = false;
        self.was_fw_update_rebooting = false;
        self.reconnect = None;
        self.timers.cancel_all(self.ctx.timers.as_ref());
        self.cleanup_operations();
        self.ctx.shim.disconnect(self.conn_id);
        self.transition(ConnectionState::Disconnected);
    }

    /// Queue a host command. Dispatches immediately when the queue is idle.
    pub fn enqueue_command(&mut self, command: QueuedCommand) -> Result<(), QueueFull> {
        let dispatch = self.queue.enqueue(command)?;
        self.dispatch(dispatch);
        Ok(())
    }

    /// Enable downloading and poll the device for unsynced frames.
    pub fn start_download(&mut self) -> Result<(), QueueFull> {
        if self.state != ConnectionState::Ready {
            return Ok(());
        }
        self.enqueue_command(QueuedCommand::notification(
            DL_GET_DEV_STATUS,
            builder::get_device_status(),
            self.ctx.config.connection.command_timeout(),
        ))?;
        self.download_enabled = true;
        self.pending_status_poll = true;
        self.log("Download enabled, polling device status");
        Ok(())
    }

    pub fn stop_download(&mut self) {
        self.download_enabled = false;
        self.pending_status_poll = false;
        self.resume_download_after_reconnect = false;

        match self.state {
            ConnectionState::Downloading => {
                if matches!(self.active, ActiveController::Download(_)) {
                    self.ctx.shim.l2cap_close(self.conn_id);
                    self.active = ActiveController::None;
                }
                self.flush_queue();
                self.log("Download stopped");
                self.transition(ConnectionState::Ready);
            }
            ConnectionState::Waiting => {
                self.log("Download disabled");
                self.transition(ConnectionState::Ready);
            }
            _ => {}
        }
    }

    /// Begin a SUOTA update from `Ready`.
    pub fn start_fw_update(&mut self, image: Arc<[u8]>) -> Result<(), ApiError> {
        if self.state != ConnectionState::Ready {
            return Err(ApiError::CommandRejected);
        }
        if image.is_empty() {
            self.emit(HpyEvent::error(
                self.conn_id,
                ErrorCode::FwImageInvalid,
                "Firmware image is empty",
            ));
            return Err(ApiError::CommandRejected);
        }
        let block_size = self.ctx.config.fw_update.block_size;
        if patch_len(block_size).is_none() {
            self.emit(HpyEvent::error(
                self.conn_id,
                ErrorCode::FwImageInvalid,
                format!("SUOTA block size {} out of range", block_size),
            ));
            return Err(ApiError::CommandRejected);
        }

        let mut controller =
            FwUpdateController::new(self.conn_id, image, self.ctx.config.fw_update.clone());
        self.log(format!(
            "FW update starting: {} blocks",
            controller.total_blocks()
        ));
        self.transition(ConnectionState::FwUpdating);
        let action = controller.start();
        self.active = ActiveController::FwUpdate(controller);
        self.handle_fw_action(action);
        Ok(())
    }

    pub fn cancel_fw_update(&mut self) {
        let action = match &mut self.active {
            ActiveController::FwUpdate(controller) => controller.cancel(),
            _ => return,
        };
        self.cancel_fw_callbacks();
        self.handle_fw_action(action);
        self.active = ActiveController::None;
        self.log("FW update cancelled, awaiting disconnect");
        self.arm_fw_fallback();
    }

    /// Release timers and queued work before the slot is dropped.
    pub fn teardown(&mut self) {
        self.timers.cancel_all(self.ctx.timers.as_ref());
        self.queue.flush();
        self.reconnect = None;
        self.active = ActiveController::None;
        self.memfault_rx = None;
    }

    // ========================================================================
    // Platform callbacks
    // ========================================================================

    pub fn handle_shim_event(&mut self, event: ShimEvent) {
        match event {
            ShimEvent::DeviceDiscovered { .. } => {}
            ShimEvent::Connected { .. } => self.on_connected(),
            ShimEvent::Disconnected { status, .. } => self.on_disconnected(status),
            ShimEvent::ServicesDiscovered { chars, .. } => self.on_services_discovered(chars),
            ShimEvent::CharacteristicRead { char_id, value, .. } => {
                self.on_characteristic_read(char_id, &value)
            }
            ShimEvent::CharacteristicChanged { char_id, value, .. } => {
                self.on_characteristic_changed(char_id, &value)
            }
            ShimEvent::WriteComplete { char_id, status, .. } => {
                self.on_write_complete(char_id, status)
            }
            ShimEvent::DescriptorWritten { char_id, status, .. } => {
                self.on_descriptor_written(char_id, status)
            }
            ShimEvent::MtuChanged { mtu, .. } => self.on_mtu_changed(mtu),
            ShimEvent::RssiRead { rssi, .. } => self.log(format!("RSSI: {} dBm", rssi)),
            ShimEvent::L2capConnected { .. } => {
                self.log("L2CAP channel connected");
                let action = match &mut self.active {
                    ActiveController::Download(dl) => dl.on_l2cap_connected(),
                    _ => return,
                };
                self.handle_download_action(action);
            }
            ShimEvent::L2capFrame { frame, .. } => {
                let action = match &mut self.active {
                    ActiveController::Download(dl) => dl.on_l2cap_frame(frame),
                    _ => return,
                };
                self.handle_download_action(action);
            }
            ShimEvent::L2capBatchComplete {
                frames_received,
                crc_valid,
                ..
            } => {
                self.log(format!(
                    "L2CAP batch complete: {} frames, crc_valid={}",
                    frames_received, crc_valid
                ));
                let action = match &mut self.active {
                    ActiveController::Download(dl) => {
                        dl.on_l2cap_batch_complete(frames_received, crc_valid)
                    }
                    _ => return,
                };
                self.handle_download_action(action);
            }
            ShimEvent::L2capError { message, .. } => {
                warn!(conn_id = %self.conn_id, "L2CAP error: {}", message);
                self.log(format!("L2CAP error: {}", message));
                let action = match &mut self.active {
                    ActiveController::Download(dl) => dl.on_l2cap_error(&message),
                    _ => return,
                };
                self.handle_download_action(action);
            }
            ShimEvent::L2capSendProgress {
                blocks_sent,
                blocks_total,
                ..
            } => {
                let action = match &mut self.active {
                    ActiveController::FwUpdate(fw) => fw.on_stream_progress(blocks_sent, blocks_total),
                    _ => return,
                };
                self.handle_fw_action(action);
            }
            ShimEvent::L2capSendComplete { .. } => {
                self.log("FW image stream complete");
                let action = match &mut self.active {
                    ActiveController::FwUpdate(fw) => fw.on_stream_complete(),
                    _ => return,
                };
                self.handle_fw_action(action);
            }
            ShimEvent::L2capSendError { message, .. } => {
                let action = match &mut self.active {
                    ActiveController::FwUpdate(fw) => fw.on_stream_error(&message),
                    _ => return,
                };
                self.handle_fw_action(action);
            }
        }
    }

    fn on_connected(&mut self) {
        if self.connect_handled {
            return;
        }
        self.connect_handled = true;

        let step = match self.reconnect.as_mut() {
            Some(rc) if rc.is_awaiting_connect() => Some(rc.on_connected()),
            _ => None,
        };
        if let Some(step) = step {
            self.timers.cancel_where(self.ctx.timers.as_ref(), |k| {
                matches!(k, TimerKind::ConnectTimeout)
            });
            self.apply_reconnect_step(step);
        }

        self.service_discovery_started = false;
        self.log("Connected, requesting MTU");
        self.ctx
            .shim
            .request_mtu(self.conn_id, self.ctx.config.connection.requested_mtu);
    }

    fn on_mtu_changed(&mut self, mtu: u16) {
        if self.service_discovery_started {
            return;
        }
        self.service_discovery_started = true;
        self.log(format!("MTU: {}, discovering services", mtu));
        self.ctx.shim.discover_services(self.conn_id);
    }

    fn on_services_discovered(&mut self, chars: HashSet<CharId>) {
        let connecting = matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Reconnecting
                | ConnectionState::FwUpdateRebooting
        );
        if self.setup != SetupStage::Idle || !connecting {
            debug!(conn_id = %self.conn_id, "ignoring duplicate service discovery");
            return;
        }

        self.log(format!("Services discovered: {} characteristics", chars.len()));
        self.available_chars = chars;

        if !REQUIRED_CHARACTERISTICS
            .iter()
            .all(|c| self.available_chars.contains(c))
        {
            self.fail_setup("HCS service missing");
            return;
        }

        let mut subscriptions: VecDeque<CharId> = NOTIFY_SUBSCRIPTIONS
            .iter()
            .copied()
            .filter(|c| *c == CharId::CmdTx || self.available_chars.contains(c))
            .collect();
        let Some(first) = subscriptions.pop_front() else {
            self.start_device_info_reads();
            return;
        };
        self.setup = SetupStage::Subscribing;
        self.pending_subscriptions = subscriptions;
        self.ctx
            .shim
            .subscribe_notifications(self.conn_id, first, true);
    }

    fn on_descriptor_written(&mut self, char_id: CharId, status: i32) {
        if self.setup != SetupStage::Subscribing {
            return;
        }
        if status != 0 {
            warn!(conn_id = %self.conn_id, "subscribe {:?} failed: status={}", char_id, status);
        }
        match self.pending_subscriptions.pop_front() {
            Some(next) => self.ctx.shim.subscribe_notifications(self.conn_id, next, true),
            None => self.start_device_info_reads(),
        }
    }

    fn start_device_info_reads(&mut self) {
        let mut reads: VecDeque<CharId> = DEVICE_INFO_READS
            .iter()
            .copied()
            .filter(|c| self.available_chars.contains(c))
            .collect();
        let Some(first) = reads.pop_front() else {
            self.fail_setup("DIS service missing");
            return;
        };
        self.setup = SetupStage::ReadingInfo;
        self.device_info = DeviceInfo::default();
        self.pending_reads = reads;
        self.ctx.shim.read_characteristic(self.conn_id, first);
    }

    fn on_characteristic_read(&mut self, char_id: CharId, value: &[u8]) {
        if self.setup != SetupStage::ReadingInfo {
            debug!(conn_id = %self.conn_id, "unexpected read of {:?}", char_id);
            return;
        }
        self.device_info.apply_read(char_id, value);
        match self.pending_reads.pop_front() {
            Some(next) => self.ctx.shim.read_characteristic(self.conn_id, next),
            None => self.on_device_info_complete(),
        }
    }

    fn on_device_info_complete(&mut self) {
        self.setup = SetupStage::Idle;
        self.tier = self.device_info.firmware_tier();
        self.log(format!(
            "Device info: fw={} tier={}",
            self.device_info.fw_version, self.tier
        ));
        self.emit(HpyEvent::DeviceInfo {
            conn_id: self.conn_id,
            info: self.device_info.clone(),
        });

        if self.tier == FirmwareTier::Tier0 {
            self.was_fw_update_rebooting = false;
            self.transition(ConnectionState::ConnectedLimited);
            return;
        }

        self.memfault.increment_connect_seq();
        self.transition(ConnectionState::Handshaking);
        let mut runner = HandshakeRunner::new(
            self.tier,
            HandshakeSettings::from(self.ctx.config.as_ref()),
            Arc::clone(&self.ctx.time),
        );
        let first = runner.start();
        self.active = ActiveController::Handshake(runner);
        self.enqueue_handshake(first);
    }

    fn fail_setup(&mut self, message: &str) {
        warn!(conn_id = %self.conn_id, "{}", message);
        self.emit(HpyEvent::error(self.conn_id, ErrorCode::ConnectFail, message));
        self.setup = SetupStage::Idle;
        self.ctx.shim.disconnect(self.conn_id);
        self.transition(ConnectionState::Disconnected);
    }

    fn on_write_complete(&mut self, char_id: CharId, status: i32) {
        if status != 0 {
            warn!(conn_id = %self.conn_id, "write {:?} failed: status={}", char_id, status);
        }
        let completes = self
            .queue
            .current()
            .is_some_and(|c| c.completion == CompletionPolicy::OnWriteAck && c.char_id == char_id);
        if completes {
            self.signal_done();
        }
    }

    fn on_characteristic_changed(&mut self, char_id: CharId, value: &[u8]) {
        match char_id {
            CharId::CmdTx => self.handle_command_response(value),
            CharId::FrameTx => self.handle_frame_tx(value),
            CharId::StreamTx => self.handle_stream_tx(value),
            CharId::DebugTx => self.emit(HpyEvent::DebugMessage {
                conn_id: self.conn_id,
                message: value.to_vec(),
            }),
            CharId::SuotaStatus => {
                let Some(&code) = value.first() else { return };
                self.log(format!("SUOTA status: {}", code));
                let action = match &mut self.active {
                    ActiveController::FwUpdate(fw) => fw.on_suota_status(code),
                    _ => return,
                };
                self.handle_fw_action(action);
            }
            other => debug!(conn_id = %self.conn_id, "notification on {:?} ignored", other),
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    pub fn on_timer(&mut self, token: TimerToken) {
        if !self.timers.take_fired(&token) {
            return;
        }
        match token.kind {
            TimerKind::Command { seq } => {
                let Some(timed_out) = self.queue.signal_timeout(seq) else {
                    return;
                };
                let tag = timed_out.expired.tag;
                warn!(conn_id = %self.conn_id, "command timeout: {}", tag);
                self.emit(HpyEvent::error(
                    self.conn_id,
                    ErrorCode::CommandTimeout,
                    format!("Command timeout: {}", tag),
                ));
                self.dispatch(timed_out.next);
                self.on_command_timed_out(tag);
            }
            TimerKind::FwCallback(callback) => {
                let action = match &mut self.active {
                    ActiveController::FwUpdate(fw) => fw.on_callback(callback),
                    _ => return,
                };
                self.handle_fw_action(action);
            }
            TimerKind::FwFallback => {
                if self.fw_error_pending_disconnect {
                    self.fw_error_pending_disconnect = false;
                    self.log("Ring did not disconnect after FW update error");
                    self.transition(ConnectionState::Ready);
                }
            }
            TimerKind::ReconnectDelay => {
                let step = match self.reconnect.as_mut() {
                    Some(rc) => rc.on_wait_elapsed(),
                    None => return,
                };
                self.apply_reconnect_step(step);
            }
            TimerKind::ConnectTimeout => {
                let step = match self.reconnect.as_mut() {
                    Some(rc) if rc.is_awaiting_connect() => rc.on_attempt_failed(),
                    _ => return,
                };
                self.log("Reconnect attempt timed out");
                self.ctx.shim.disconnect(self.conn_id);
                self.apply_reconnect_step(step);
            }
        }
    }

    fn on_command_timed_out(&mut self, tag: &str) {
        if tag == DL_GET_DEV_STATUS && self.pending_status_poll {
            self.pending_status_poll = false;
            if self.state == ConnectionState::Ready && self.download_enabled {
                self.log("Status poll timed out, waiting for superframe close");
                self.transition(ConnectionState::Waiting);
            }
            return;
        }

        match self.state {
            ConnectionState::Handshaking => {
                let (failed, next) = match &mut self.active {
                    ActiveController::Handshake(runner) => {
                        let failed = runner.current_step();
                        (failed, runner.on_step_failed())
                    }
                    _ => return,
                };
                if failed == Some(HandshakeStep::ReadMemfaultFile) {
                    self.memfault_rx = None;
                }
                self.enqueue_handshake(next);
            }
            ConnectionState::Downloading => {
                let action = match &mut self.active {
                    ActiveController::Download(dl) => dl.on_command_timeout(tag),
                    _ => return,
                };
                self.handle_download_action(action);
            }
            _ => {}
        }
    }

    // ========================================================================
    // Command queue
    // ========================================================================

    fn dispatch(&mut self, dispatch: Option<Dispatch>) {
        let Some(Dispatch { seq, command }) = dispatch else {
            return;
        };
        debug!(
            conn_id = %self.conn_id,
            "TX {} [{} bytes]",
            command.tag,
            command.data.len()
        );
        self.ctx.shim.write_characteristic(
            self.conn_id,
            command.char_id,
            &command.data,
            WriteType::WithoutResponse,
        );
        self.timers
            .arm(self.ctx.timers.as_ref(), TimerKind::Command { seq }, command.timeout);
    }

    fn signal_done(&mut self) {
        self.cancel_command_timers();
        let next = self.queue.signal_done();
        self.dispatch(next);
    }

    /// A CmdTx notification completes the in-flight command only when that
    /// command waits for one.
    fn complete_on_notification(&mut self) {
        let waits = self
            .queue
            .current()
            .is_some_and(|c| c.completion == CompletionPolicy::OnNotification);
        if waits {
            self.signal_done();
        }
    }

    fn flush_queue(&mut self) {
        self.cancel_command_timers();
        self.queue.flush();
    }

    fn cancel_command_timers(&mut self) {
        self.timers.cancel_where(self.ctx.timers.as_ref(), |k| {
            matches!(k, TimerKind::Command { .. })
        });
    }

    /// Internal enqueue; the queue only overflows if the host flooded it.
    fn enqueue_internal(&mut self, command: QueuedCommand) {
        let tag = command.tag;
        if let Err(err) = self.enqueue_command(command) {
            warn!(conn_id = %self.conn_id, "dropping {}: {}", tag, err);
            self.log(format!("Dropped {}: queue full", tag));
        }
    }

    // ========================================================================
    // Command responses
    // ========================================================================

    fn handle_command_response(&mut self, value: &[u8]) {
        let Some(&cmd_byte) = value.first() else {
            return;
        };
        debug!(
            conn_id = %self.conn_id,
            "RX {} [{} bytes]",
            cmd::name(cmd_byte),
            value.len()
        );

        if cmd_byte == cmd::UNRECOGNIZED {
            self.emit(HpyEvent::error(
                self.conn_id,
                ErrorCode::CommandUnrecognized,
                "Unrecognized command",
            ));
            match self.state {
                ConnectionState::Downloading => self.handle_download_response(value),
                ConnectionState::Handshaking => {
                    self.complete_on_notification();
                    let next = match &mut self.active {
                        ActiveController::Handshake(runner) => runner.on_step_failed(),
                        _ => return,
                    };
                    self.enqueue_handshake(next);
                }
                _ => self.complete_on_notification(),
            }
            return;
        }

        match self.state {
            ConnectionState::Handshaking => self.handle_handshake_response(cmd_byte, value),
            ConnectionState::Downloading => self.handle_download_response(value),
            _ => {
                self.complete_on_notification();
                self.handle_ready_response(cmd_byte, value);
            }
        }
    }

    fn handle_ready_response(&mut self, cmd_byte: u8, value: &[u8]) {
        match cmd_byte {
            cmd::GET_DEVICE_STATUS => match parse_device_status(value) {
                Ok(status) => {
                    self.last_status = Some(status.clone());
                    self.emit(HpyEvent::DeviceStatus {
                        conn_id: self.conn_id,
                        status: status.clone(),
                    });
                    if self.pending_status_poll {
                        self.pending_status_poll = false;
                        if status.unsynced_frames > 0 {
                            self.begin_download_session(&status);
                        } else {
                            self.log("No unsynced frames, waiting for superframe close");
                            self.transition(ConnectionState::Waiting);
                        }
                    }
                }
                Err(err) => warn!(conn_id = %self.conn_id, "bad device status: {}", err),
            },
            cmd::GET_DAQ_CONFIG => match parse_daq_config(value) {
                Ok(config) => self.emit(HpyEvent::DaqConfig {
                    conn_id: self.conn_id,
                    config,
                }),
                Err(err) => warn!(conn_id = %self.conn_id, "bad DAQ config: {}", err),
            },
            cmd::GET_EXTENDED_DEVICE_STATUS => match parse_extended_device_status(value) {
                Ok(status) => self.emit(HpyEvent::ExtendedDeviceStatus {
                    conn_id: self.conn_id,
                    status,
                }),
                Err(err) => warn!(conn_id = %self.conn_id, "bad extended status: {}", err),
            },
            _ => self.emit(HpyEvent::CommandResult {
                conn_id: self.conn_id,
                cmd_id: cmd_byte,
                raw: value.to_vec(),
            }),
        }
    }

    fn handle_handshake_response(&mut self, cmd_byte: u8, value: &[u8]) {
        self.complete_on_notification();
        if !matches!(self.active, ActiveController::Handshake(_)) {
            return;
        }
        let ActiveController::Handshake(mut runner) =
            std::mem::replace(&mut self.active, ActiveController::None)
        else {
            return;
        };

        let next = match cmd_byte {
            cmd::GET_DAQ_CONFIG => {
                match parse_daq_config(value) {
                    Ok(config) => {
                        self.log(format!("DAQ config: mode={}", config.mode_string()));
                        self.emit(HpyEvent::DaqConfig {
                            conn_id: self.conn_id,
                            config,
                        });
                    }
                    Err(err) => warn!(conn_id = %self.conn_id, "bad DAQ config: {}", err),
                }
                runner.on_command_complete()
            }
            cmd::GET_DEVICE_STATUS => match parse_device_status(value) {
                Ok(status) => {
                    self.log(format!(
                        "Device status: soc={}% unsynced={} flags=0x{:02x}",
                        status.soc, status.unsynced_frames, status.send_utc_flags
                    ));
                    self.last_status = Some(status.clone());
                    self.emit(HpyEvent::DeviceStatus {
                        conn_id: self.conn_id,
                        status: status.clone(),
                    });
                    runner.on_device_status(&status)
                }
                Err(err) => {
                    warn!(conn_id = %self.conn_id, "bad device status: {}", err);
                    runner.on_command_complete()
                }
            },
            cmd::SET_UTC => {
                if let Ok(resp) = parse_set_utc_response(value) {
                    self.log(format!(
                        "UTC set: ring_utc={} reboots={}",
                        resp.ring_utc, resp.ring_reboots
                    ));
                }
                runner.on_command_complete()
            }
            cmd::SET_INFO | cmd::SET_FINGER_DETECTION => {
                self.log(format!("{} acknowledged", cmd::name(cmd_byte)));
                runner.on_command_complete()
            }
            cmd::GET_FILE_LENGTH => {
                let length = parse_file_length(value).ok();
                self.log(format!("Memfault file length: {:?}", length));
                if let Some(len) = length.filter(|l| *l > 0) {
                    if !self.memfault.can_fit_chunk(len as usize) {
                        self.emit(HpyEvent::error(
                            self.conn_id,
                            ErrorCode::MemfaultBufferFull,
                            format!("Memfault chunk of {} bytes does not fit", len),
                        ));
                        runner.abort_drain();
                        self.active = ActiveController::Handshake(runner);
                        self.on_handshake_complete();
                        return;
                    }
                    self.memfault_rx = Some(Vec::with_capacity(len as usize));
                }
                runner.on_memfault_file_length(length)
            }
            cmd::READ_FILE => {
                let ring_crc = parse_read_file_crc(value).ok();
                let data = self.memfault_rx.take().unwrap_or_default();
                let crc_valid =
                    !data.is_empty() && ring_crc.is_some_and(|crc| Crc32::checksum(&data) == crc);
                if !crc_valid {
                    warn!(conn_id = %self.conn_id, "memfault chunk CRC mismatch");
                }
                let stored = self.memfault.write_chunk(&data, crc_valid).is_some();
                self.log(format!(
                    "Memfault chunk: {} bytes, crc_valid={}, stored={}",
                    data.len(),
                    crc_valid,
                    stored
                ));
                runner.on_memfault_read_complete(stored)
            }
            other => {
                debug!(conn_id = %self.conn_id, "unexpected {} during handshake", cmd::name(other));
                runner.on_command_complete()
            }
        };

        self.active = ActiveController::Handshake(runner);
        self.enqueue_handshake(next);
    }

    fn enqueue_handshake(&mut self, next: Option<QueuedCommand>) {
        match next {
            Some(command) => self.enqueue_internal(command),
            None => {
                if matches!(&self.active, ActiveController::Handshake(r) if r.is_complete()) {
                    self.on_handshake_complete();
                }
            }
        }
    }

    fn on_handshake_complete(&mut self) {
        let chunks = match &self.active {
            ActiveController::Handshake(runner) => runner.memfault_chunks_downloaded(),
            _ => 0,
        };
        self.active = ActiveController::None;
        self.memfault_rx = None;

        if chunks > 0 || !self.memfault.chunks().is_empty() {
            self.log(format!("Memfault drain complete: {} new chunks", chunks));
            self.emit(HpyEvent::MemfaultComplete {
                conn_id: self.conn_id,
                chunks,
            });
        }

        if self.was_fw_update_rebooting {
            self.was_fw_update_rebooting = false;
            info!(
                conn_id = %self.conn_id,
                "FW update complete, running {}",
                self.device_info.fw_version
            );
            self.emit(HpyEvent::FwUpdateComplete {
                conn_id: self.conn_id,
                fw_version: self.device_info.fw_version.clone(),
            });
        }

        self.transition(ConnectionState::Ready);

        if self.resume_download_after_reconnect {
            self.resume_download_after_reconnect = false;
            self.log("Resuming download after reconnect");
            if let Err(err) = self.start_download() {
                warn!(conn_id = %self.conn_id, "download resume failed: {}", err);
            }
        }
    }

    // ========================================================================
    // Download
    // ========================================================================

    fn handle_frame_tx(&mut self, value: &[u8]) {
        if self.state == ConnectionState::Downloading && value.first() == Some(&cmd::GET_FRAMES) {
            self.handle_download_response(value);
            return;
        }

        let status = match parse_device_status(value) {
            Ok(status) => status,
            Err(err) => {
                debug!(conn_id = %self.conn_id, "unparsed frame-TX notification: {}", err);
                return;
            }
        };
        self.last_status = Some(status.clone());
        self.emit(HpyEvent::DeviceStatus {
            conn_id: self.conn_id,
            status: status.clone(),
        });

        let idle = matches!(self.state, ConnectionState::Ready | ConnectionState::Waiting);
        if idle && self.download_enabled && status.is_superframe_close() && status.unsynced_frames > 0 {
            self.log(format!(
                "Superframe closed with {} unsynced frames",
                status.unsynced_frames
            ));
            self.begin_download_session(&status);
        }
    }

    fn handle_stream_tx(&mut self, value: &[u8]) {
        match self.state {
            ConnectionState::Downloading => {
                let action = match &mut self.active {
                    ActiveController::Download(dl) => dl.on_stream_data(value),
                    _ => return,
                };
                self.handle_download_action(action);
            }
            ConnectionState::Handshaking => {
                if let (ActiveController::Handshake(runner), Some(buf)) =
                    (&self.active, self.memfault_rx.as_mut())
                {
                    let expected = runner.memfault_expected_length() as usize;
                    let take = value.len().min(expected.saturating_sub(buf.len()));
                    buf.extend_from_slice(&value[..take]);
                }
            }
            _ => {}
        }
    }

    fn handle_download_response(&mut self, value: &[u8]) {
        if !matches!(self.active, ActiveController::Download(_)) {
            return;
        }
        self.complete_on_notification();
        let action = match &mut self.active {
            ActiveController::Download(dl) => dl.on_command_response(value),
            _ => return,
        };
        self.handle_download_action(action);
    }

    fn begin_download_session(&mut self, status: &DeviceStatus) {
        let supports_l2cap = self.device_info.supports_l2cap_download();
        let settings = DownloadSettings::from_config(&self.ctx.config, supports_l2cap);
        self.log(format!(
            "L2CAP check: fw={} supported={} preferred={}",
            self.device_info.fw_version, supports_l2cap, self.ctx.config.download.prefer_l2cap
        ));

        let mut controller = DownloadController::new(self.conn_id, settings);
        self.download_enabled = true;
        self.transition(ConnectionState::Downloading);
        let action = controller.start_session(
            status.sync_frame_count,
            status.sync_frame_reboots,
            u32::from(status.unsynced_frames),
        );
        self.log(format!(
            "Download starting: {} frames via {}",
            status.unsynced_frames,
            controller.transport()
        ));
        self.active = ActiveController::Download(controller);
        self.handle_download_action(action);
    }

    fn handle_download_action(&mut self, action: DownloadAction) {
        match action {
            DownloadAction::EnqueueCommand(command) => self.enqueue_internal(command),
            DownloadAction::OpenL2cap { psm } => self.ctx.shim.l2cap_open(self.conn_id, psm),
            DownloadAction::StartL2capReceive { expected_frames } => self
                .ctx
                .shim
                .l2cap_start_receiving(self.conn_id, expected_frames),
            DownloadAction::CloseL2cap => self.ctx.shim.l2cap_close(self.conn_id),
            DownloadAction::EmitEvent(event) => self.emit(event),
            DownloadAction::SessionComplete => {
                self.active = ActiveController::None;
                if self.download_enabled {
                    self.log("Download session complete, waiting for next superframe");
                    self.transition(ConnectionState::Waiting);
                } else {
                    self.transition(ConnectionState::Ready);
                }
            }
            DownloadAction::Multiple(actions) => {
                for action in actions {
                    self.handle_download_action(action);
                }
            }
            DownloadAction::NoOp => {}
        }
    }

    // ========================================================================
    // Firmware update
    // ========================================================================

    fn handle_fw_action(&mut self, action: FwUpdateAction) {
        match action {
            FwUpdateAction::WriteSuota { char_id, data } => {
                debug!(conn_id = %self.conn_id, "SUOTA TX {:?} [{} bytes]", char_id, data.len());
                self.ctx
                    .shim
                    .write_characteristic(self.conn_id, char_id, &data, WriteType::WithResponse);
            }
            FwUpdateAction::StartL2capStream {
                psm,
                image,
                block_size,
                inter_block_delay,
            } => {
                self.log(format!("Streaming {} bytes on PSM {}", image.len(), psm));
                self.ctx.shim.l2cap_stream_send(
                    self.conn_id,
                    psm,
                    image,
                    block_size,
                    inter_block_delay,
                );
            }
            FwUpdateAction::EmitEvent(event) => {
                self.emit(event);
                let failed = matches!(
                    &self.active,
                    ActiveController::FwUpdate(fw) if fw.state() == FwUpdateState::Error
                );
                if failed {
                    self.active = ActiveController::None;
                    self.cancel_fw_callbacks();
                    self.log("FW update failed, awaiting disconnect");
                    self.arm_fw_fallback();
                }
            }
            FwUpdateAction::ScheduleCallback { after, callback } => {
                self.timers.arm(
                    self.ctx.timers.as_ref(),
                    TimerKind::FwCallback(callback),
                    after,
                );
            }
            FwUpdateAction::SessionComplete => {
                self.active = ActiveController::None;
                self.cancel_fw_callbacks();
                self.was_fw_update_rebooting = true;
                info!(conn_id = %self.conn_id, "FW image accepted, ring rebooting");
                self.transition(ConnectionState::FwUpdateRebooting);
                self.ctx.shim.disconnect(self.conn_id);
                if self.reconnect.is_none() {
                    self.start_fw_reboot_reconnection();
                }
            }
            FwUpdateAction::Multiple(actions) => {
                for action in actions {
                    self.handle_fw_action(action);
                }
            }
            FwUpdateAction::NoOp => {}
        }
    }

    fn cancel_fw_callbacks(&mut self) {
        self.timers.cancel_where(self.ctx.timers.as_ref(), |k| {
            matches!(k, TimerKind::FwCallback(_))
        });
    }

    /// After a failed or cancelled update the ring normally drops the link.
    /// If it does not, return to `Ready` once the fallback expires.
    fn arm_fw_fallback(&mut self) {
        self.fw_error_pending_disconnect = true;
        let timers = self.ctx.timers.as_ref();
        self.timers
            .cancel_where(timers, |k| matches!(k, TimerKind::FwFallback));
        self.timers.arm(
            timers,
            TimerKind::FwFallback,
            std::time::Duration::from_millis(self.ctx.config.fw_update.reboot_fallback_ms),
        );
    }

    // ========================================================================
    // Disconnect and reconnection
    // ========================================================================

    fn on_disconnected(&mut self, status: i32) {
        self.log(format!("Disconnected (status={})", status));

        self.timers.cancel_where(self.ctx.timers.as_ref(), |k| {
            matches!(k, TimerKind::FwFallback)
        });
        let had_fw_error = std::mem::take(&mut self.fw_error_pending_disconnect);
        let was_downloading = self.download_enabled;
        let interrupted = match &self.active {
            ActiveController::Download(dl) => dl.batch_frames_received(),
            _ => 0,
        };
        let was_updating = matches!(self.active, ActiveController::FwUpdate(_));
        self.cleanup_operations();

        let step = match self.reconnect.as_mut() {
            Some(rc) if rc.is_awaiting_connect() => Some(rc.on_attempt_failed()),
            _ => None,
        };
        if let Some(step) = step {
            self.timers.cancel_where(self.ctx.timers.as_ref(), |k| {
                matches!(k, TimerKind::ConnectTimeout)
            });
            self.apply_reconnect_step(step);
            return;
        }

        if self.is_user_disconnect || self.state == ConnectionState::Disconnected {
            if self.state != ConnectionState::Disconnected {
                self.transition(ConnectionState::Disconnected);
            }
            return;
        }

        let fw_reboot = !had_fw_error
            && (self.was_fw_update_rebooting
                || was_updating
                || matches!(
                    self.state,
                    ConnectionState::FwUpdating | ConnectionState::FwUpdateRebooting
                ));
        if fw_reboot {
            if self.reconnect.is_none() {
                self.was_fw_update_rebooting = true;
                self.start_fw_reboot_reconnection();
            }
            return;
        }

        let reconnecting = matches!(
            self.state,
            ConnectionState::Reconnecting | ConnectionState::FwUpdateRebooting
        );
        if reconnecting && self.reconnect.is_some() {
            return;
        }

        if was_downloading {
            self.resume_download_after_reconnect = true;
            if interrupted > 0 {
                self.log(format!("Download interrupted with {} partial frames", interrupted));
                self.emit(HpyEvent::DownloadInterrupted {
                    conn_id: self.conn_id,
                    partial_frames: interrupted,
                });
            }
        }
        self.start_normal_reconnection();
    }

    /// Drop in-progress work tied to the link.
    fn cleanup_operations(&mut self) {
        self.flush_queue();
        if let ActiveController::Download(_) =
            std::mem::replace(&mut self.active, ActiveController::None)
        {
            self.ctx.shim.l2cap_close(self.conn_id);
        }
        self.cancel_fw_callbacks();
        self.download_enabled = false;
        self.pending_status_poll = false;
        self.memfault_rx = None;
        self.setup = SetupStage::Idle;
        self.pending_subscriptions.clear();
        self.pending_reads.clear();
    }

    fn start_normal_reconnection(&mut self) {
        let Some(handle) = self.handle.clone() else {
            self.transition(ConnectionState::Disconnected);
            return;
        };
        let mut controller = ReconnectController::new(ReconnectMode::Normal, &self.ctx.config.reconnect);
        info!(
            conn_id = %self.conn_id,
            "starting reconnection to {} ({} attempts)",
            handle,
            controller.max_attempts()
        );
        let step = controller.start();
        self.reconnect = Some(controller);
        self.transition(ConnectionState::Reconnecting);
        self.apply_reconnect_step(step);
    }

    fn start_fw_reboot_reconnection(&mut self) {
        if self.handle.is_none() {
            self.was_fw_update_rebooting = false;
            self.transition(ConnectionState::Disconnected);
            return;
        }
        let mut controller =
            ReconnectController::new(ReconnectMode::FwReboot, &self.ctx.config.reconnect);
        self.log(format!(
            "Waiting {} ms for ring to reboot",
            self.ctx.config.reconnect.fw_reboot_wait_ms
        ));
        let step = controller.start();
        self.reconnect = Some(controller);
        self.transition(ConnectionState::FwUpdateRebooting);
        self.apply_reconnect_step(step);
    }

    fn apply_reconnect_step(&mut self, step: ReconnectStep) {
        match step {
            ReconnectStep::Wait(delay) => {
                self.timers
                    .arm(self.ctx.timers.as_ref(), TimerKind::ReconnectDelay, delay);
            }
            ReconnectStep::Connect { attempt } => {
                let Some(handle) = self.handle.clone() else {
                    self.reconnect = None;
                    self.transition(ConnectionState::Disconnected);
                    return;
                };
                let (state, max) = match self.reconnect.as_ref() {
                    Some(rc) if rc.mode() == ReconnectMode::FwReboot => {
                        (ConnectionState::FwUpdateRebooting, rc.max_attempts())
                    }
                    Some(rc) => (ConnectionState::Reconnecting, rc.max_attempts()),
                    None => return,
                };
                self.transition_with_retry(state, attempt);
                self.log(format!("Reconnect attempt {}/{}", attempt, max));
                self.connect_handled = false;
                self.ctx.shim.connect(self.conn_id, &handle);
                self.timers.arm(
                    self.ctx.timers.as_ref(),
                    TimerKind::ConnectTimeout,
                    self.ctx.config.reconnect.connect_timeout(),
                );
            }
            ReconnectStep::Connected => {
                self.reconnect = None;
            }
            ReconnectStep::Exhausted { attempts } => {
                let fw = self
                    .reconnect
                    .as_ref()
                    .is_some_and(|rc| rc.mode() == ReconnectMode::FwReboot);
                self.reconnect = None;
                self.resume_download_after_reconnect = false;
                let (code, message) = if fw {
                    self.was_fw_update_rebooting = false;
                    (
                        ErrorCode::FwUpdateReconnectFail,
                        format!("Ring did not return after FW update ({} attempts)", attempts),
                    )
                } else {
                    (
                        ErrorCode::ReconnectFail,
                        format!("Reconnect failed after {} attempts", attempts),
                    )
                };
                warn!(conn_id = %self.conn_id, "{}", message);
                self.emit(HpyEvent::error(self.conn_id, code, message));
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn transition(&mut self, new_state: ConnectionState) {
        self.transition_with_retry(new_state, 0);
    }

    fn transition_with_retry(&mut self, new_state: ConnectionState, retry_count: u32) {
        if self.state == new_state && retry_count == 0 {
            return;
        }
        let old = std::mem::replace(&mut self.state, new_state);
        info!(conn_id = %self.conn_id, "State: {} -> {}", old, new_state);
        self.emit(HpyEvent::Log {
            conn_id: self.conn_id,
            message: format!("State: {} -> {}", old, new_state),
        });
        self.emit(HpyEvent::StateChanged {
            conn_id: self.conn_id,
            state: new_state,
            retry_count,
        });
    }

    fn emit(&self, event: HpyEvent) {
        self.ctx.events.emit(event);
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(conn_id = %self.conn_id, "{}", message);
        self.emit(HpyEvent::Log {
            conn_id: self.conn_id,
            message,
        });
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("conn_id", &self.conn_id)
            .field("state", &self.state)
            .field("tier", &self.tier)
            .field("active", &self.active)
            .field("armed_timers", &self.timers.len())
            .finish()
    }
}

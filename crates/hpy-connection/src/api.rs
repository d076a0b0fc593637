// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host-facing operations.
//!
//! [`PlatformApi`] maps library calls onto the [`ConnectionRegistry`]. Every
//! call returns synchronously with `Ok` or an [`ApiError`]; outcomes of the
//! work it starts arrive later as [`HpyEvent`]s.
//!
//! Command calls check, in order: a known connection id, a live link, a
//! `Ready` or `Waiting` state, the firmware tier, and queue space.

use crate::error::{ApiError, Result};
use crate::events::{ConnectionId, ConnectionState, HpyEvent};
use crate::queue::QueuedCommand;
use crate::registry::ConnectionRegistry;
use crate::shim::{BleShim, EventSink, ShimEvent, TimeSource};
use crate::slot::{ConnectionSlot, SlotContext};
use crate::timer::{TimerScheduler, TimerToken};
use hpy_config::HpyConfig;
use hpy_protocol::{builder, DaqConfig, DeviceInfo, FirmwareTier, ScannedDevice};
use std::sync::Arc;

pub struct PlatformApi {
    registry: ConnectionRegistry,
}

impl PlatformApi {
    pub fn new(
        shim: Arc<dyn BleShim>,
        time: Arc<dyn TimeSource>,
        events: Arc<dyn EventSink>,
        timers: Arc<dyn TimerScheduler>,
        config: HpyConfig,
    ) -> Self {
        Self::from_context(SlotContext {
            shim,
            time,
            events,
            timers,
            config: Arc::new(config),
        })
    }

    pub fn from_context(ctx: SlotContext) -> Self {
        Self {
            registry: ConnectionRegistry::new(ctx),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // ========================================================================
    // Scanning and connections
    // ========================================================================

    pub fn scan_start(&mut self) {
        self.registry.scan_start();
    }

    pub fn scan_stop(&mut self) {
        self.registry.scan_stop();
    }

    pub fn discovered_devices(&self) -> Vec<ScannedDevice> {
        self.registry.discovered_devices().to_vec()
    }

    pub fn connect(&mut self, handle: &str) -> Result<ConnectionId> {
        self.registry.connect(handle)
    }

    pub fn disconnect(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.registry
            .with_slot(conn_id, ConnectionSlot::disconnect)
            .ok_or(ApiError::InvalidConnId)
    }

    pub fn connection_state(&self, conn_id: ConnectionId) -> Option<ConnectionState> {
        self.registry.state(conn_id)
    }

    pub fn active_connections(&self) -> Vec<ConnectionId> {
        self.registry.active_connections()
    }

    /// Returns the cached device information and republishes it as an event.
    pub fn get_device_info(&self, conn_id: ConnectionId) -> Result<DeviceInfo> {
        let slot = self.registry.slot(conn_id).ok_or(ApiError::InvalidConnId)?;
        let info = slot.device_info().clone();
        self.registry.context().events.emit(HpyEvent::DeviceInfo {
            conn_id,
            info: info.clone(),
        });
        Ok(info)
    }

    pub fn read_rssi(&self, conn_id: ConnectionId) -> Result<()> {
        let slot = self.registry.slot(conn_id).ok_or(ApiError::InvalidConnId)?;
        ensure_connected(slot.state())?;
        self.registry.context().shim.read_rssi(conn_id);
        Ok(())
    }

    // ========================================================================
    // Device commands
    // ========================================================================

    pub fn get_device_status(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.send_command(
            conn_id,
            FirmwareTier::Tier1,
            "GET_DEV_STATUS",
            builder::get_device_status(),
        )
    }

    pub fn get_daq_config(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.send_command(
            conn_id,
            FirmwareTier::Tier2,
            "GET_DAQ_CONFIG",
            builder::get_daq_config(),
        )
    }

    pub fn set_daq_config(
        &mut self,
        conn_id: ConnectionId,
        config: &DaqConfig,
        apply_immediately: bool,
    ) -> Result<()> {
        self.send_command(
            conn_id,
            FirmwareTier::Tier2,
            "SET_DAQ_CONFIG",
            builder::set_daq_config(config, apply_immediately),
        )
    }

    pub fn identify(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.send_command(conn_id, FirmwareTier::Tier2, "IDENTIFY", builder::identify())
    }

    pub fn start_daq(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.send_command(conn_id, FirmwareTier::Tier1, "START_DAQ", builder::start_daq())
    }

    pub fn stop_daq(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.send_command(conn_id, FirmwareTier::Tier1, "STOP_DAQ", builder::stop_daq())
    }

    pub fn get_extended_device_status(&mut self, conn_id: ConnectionId) -> Result<()> {
        self.send_command(
            conn_id,
            FirmwareTier::Tier2,
            "GET_EXT_DEV_STATUS",
            builder::get_extended_device_status(),
        )
    }

    pub fn set_finger_detection(&mut self, conn_id: ConnectionId, enable: bool) -> Result<()> {
        self.send_command(
            conn_id,
            FirmwareTier::Tier2,
            "SET_FINGER_DETECTION",
            builder::set_finger_detection(enable),
        )
    }

    pub fn l2cap_throughput_test(&mut self, conn_id: ConnectionId, num_packets: u16) -> Result<()> {
        self.send_command(
            conn_id,
            FirmwareTier::Tier2,
            "L2CAP_THROUGHPUT_TEST",
            builder::l2cap_throughput_test(num_packets),
        )
    }

    fn send_command(
        &mut self,
        conn_id: ConnectionId,
        min_tier: FirmwareTier,
        tag: &'static str,
        data: Vec<u8>,
    ) -> Result<()> {
        let timeout = self.registry.context().config.connection.command_timeout();
        let slot = self
            .registry
            .slot_mut(conn_id)
            .ok_or(ApiError::InvalidConnId)?;
        ensure_connected(slot.state())?;
        if !matches!(slot.state(), ConnectionState::Ready | ConnectionState::Waiting) {
            return Err(ApiError::CommandRejected);
        }
        if slot.firmware_tier() < min_tier {
            return Err(ApiError::FwNotSupported);
        }
        slot.enqueue_command(QueuedCommand::notification(tag, data, timeout))
            .map_err(|_| ApiError::QueueFull)
    }

    // ========================================================================
    // Download
    // ========================================================================

    pub fn start_download(&mut self, conn_id: ConnectionId) -> Result<()> {
        let slot = self
            .registry
            .slot_mut(conn_id)
            .ok_or(ApiError::InvalidConnId)?;
        ensure_connected(slot.state())?;
        if slot.state() != ConnectionState::Ready {
            return Err(ApiError::CommandRejected);
        }
        if slot.firmware_tier() < FirmwareTier::Tier1 {
            return Err(ApiError::FwNotSupported);
        }
        slot.start_download().map_err(|_| ApiError::QueueFull)
    }

    pub fn stop_download(&mut self, conn_id: ConnectionId) -> Result<()> {
        let slot = self
            .registry
            .slot_mut(conn_id)
            .ok_or(ApiError::InvalidConnId)?;
        ensure_connected(slot.state())?;
        slot.stop_download();
        Ok(())
    }

    // ========================================================================
    // Firmware update
    // ========================================================================

    pub fn start_fw_update(&mut self, conn_id: ConnectionId, image: impl Into<Arc<[u8]>>) -> Result<()> {
        let slot = self
            .registry
            .slot_mut(conn_id)
            .ok_or(ApiError::InvalidConnId)?;
        ensure_connected(slot.state())?;
        slot.start_fw_update(image.into())
    }

    pub fn cancel_fw_update(&mut self, conn_id: ConnectionId) -> Result<()> {
        let slot = self
            .registry
            .slot_mut(conn_id)
            .ok_or(ApiError::InvalidConnId)?;
        ensure_connected(slot.state())?;
        if slot.state() != ConnectionState::FwUpdating {
            return Err(ApiError::CommandRejected);
        }
        slot.cancel_fw_update();
        Ok(())
    }

    // ========================================================================
    // Crash logs
    // ========================================================================

    /// Bytes of every chunk not yet marked uploaded, oldest first.
    pub fn memfault_chunks(&self, conn_id: ConnectionId) -> Result<Vec<Vec<u8>>> {
        let slot = self.registry.slot(conn_id).ok_or(ApiError::InvalidConnId)?;
        let buffer = slot.memfault();
        Ok(buffer
            .unuploaded_chunks()
            .iter()
            .map(|chunk| buffer.read_chunk_data(chunk))
            .collect())
    }

    /// Mark every pending chunk uploaded. Returns how many were marked.
    pub fn mark_memfault_chunks_uploaded(&mut self, conn_id: ConnectionId) -> Result<usize> {
        let slot = self
            .registry
            .slot_mut(conn_id)
            .ok_or(ApiError::InvalidConnId)?;
        let pending = slot.memfault().unuploaded_chunks();
        slot.memfault_mut().mark_uploaded(&pending);
        Ok(pending.len())
    }

    // ========================================================================
    // Driver inputs
    // ========================================================================

    pub fn handle_shim_event(&mut self, event: ShimEvent) {
        self.registry.handle_shim_event(event);
    }

    pub fn on_timer(&mut self, token: TimerToken) {
        self.registry.on_timer(token);
    }

    pub fn shutdown(&mut self) {
        self.registry.shutdown();
    }
}

fn ensure_connected(state: ConnectionState) -> Result<()> {
    match state {
        ConnectionState::Disconnected | ConnectionState::Reconnecting => {
            Err(ApiError::NotConnected)
        }
        _ => Ok(()),
    }
}

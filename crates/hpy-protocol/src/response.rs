//! Response parsers.
//!
//! Each parser takes the full notification including the leading command id
//! and checks only the minimum length; optional trailing fields read as zero.

use crate::bytes::{byte_at, u16_at, u32_at};
use crate::error::{ensure_len, Result};
use crate::model::{DaqConfig, DeviceStatus};
use serde::{Deserialize, Serialize};

pub const DEVICE_STATUS_MIN_LEN: usize = 22;

pub fn parse_device_status(value: &[u8]) -> Result<DeviceStatus> {
    ensure_len("device status", value, DEVICE_STATUS_MIN_LEN)?;
    Ok(DeviceStatus {
        phy_status: value[1],
        charger_state: value[2],
        charging_state: value[3],
        charging_mode: value[4],
        charger_blocked_reason: value[5],
        charger_rev_id: value[6],
        charger_status: value[7],
        battery_voltage: u16_at(value, 8),
        soc: value[10],
        daq_mode: value[11],
        unsynced_frames: u16_at(value, 12),
        sync_frame_count: u32_at(value, 14),
        sync_frame_reboots: u32_at(value, 18),
        opportunistic_sampling_state: byte_at(value, 22),
        opportunistic_state_time: if value.len() > 24 { u16_at(value, 23) } else { 0 },
        ship_mode_status: byte_at(value, 25),
        sleep_state: byte_at(value, 26),
        // Older firmware omits the flags. 0xFF asks for UTC and info and
        // leaves finger detection alone.
        send_utc_flags: if value.len() > 27 { value[27] } else { 0xFF },
        boot_handshake_flag: byte_at(value, 28),
        pseudo_ring_on_off: byte_at(value, 29),
        notif_sender: byte_at(value, 30),
        ble_ci: byte_at(value, 31),
        clock_rate: byte_at(value, 32),
    })
}

pub fn parse_daq_config(value: &[u8]) -> Result<DaqConfig> {
    ensure_len("daq config", value, 3)?;
    let flag = |offset: usize| byte_at(value, offset) != 0;
    Ok(DaqConfig {
        version: value[1],
        mode: value[2],
        ambient_light_en: flag(3),
        ambient_light_period_ms: u32_at(value, 4),
        ambient_temp_en: flag(8),
        ambient_temp_period_ms: u32_at(value, 9),
        skin_temp_en: flag(13),
        skin_temp_period_ms: u32_at(value, 14),
        ppg_cycle_time_ms: u32_at(value, 18),
        ppg_interval_time_ms: u32_at(value, 22),
        ppg_on_during_sleep_en: flag(26),
        compressed_sensing_en: flag(27),
        multi_spectral_en: flag(28),
        multi_spectral_period_ms: u32_at(value, 29),
        sf_max_latency_ms: u32_at(value, 33),
        ppg_fsr: byte_at(value, 37),
        eda_sweep_en: flag(38),
        eda_sweep_period_ms: u32_at(value, 39),
        acc_ulp_en: byte_at(value, 43),
        opp_sample_en: flag(44),
        opp_sample_period_ms: u32_at(value, 45),
        opp_sample_alt_mode: byte_at(value, 49),
        memfault_config: byte_at(value, 50),
        opp_sample_on_time_ms: u32_at(value, 51),
        acc_2g_during_sleep_en: flag(55),
        acc_inactivity_config: byte_at(value, 56),
        ppg_stop_config: byte_at(value, 57),
        ppg_agc_channel_config: byte_at(value, 58),
        sleep_thresh_config: byte_at(value, 59),
        cs_mode: byte_at(value, 60),
        reset_ring_cfg: byte_at(value, 61),
        eda_sweep_param_cfg: byte_at(value, 62),
        daily_daq_mode_cfg: byte_at(value, 63),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetUtcResponse {
    pub ring_utc: u32,
    pub ring_reboots: u32,
}

pub fn parse_set_utc_response(value: &[u8]) -> Result<SetUtcResponse> {
    ensure_len("set utc", value, 13)?;
    Ok(SetUtcResponse {
        ring_utc: u32_at(value, 1),
        ring_reboots: u32_at(value, 9),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureL2capResponse {
    pub status: u8,
    pub turbo_accepted: bool,
}

pub fn parse_configure_l2cap_response(value: &[u8]) -> Result<ConfigureL2capResponse> {
    ensure_len("configure l2cap", value, 3)?;
    Ok(ConfigureL2capResponse {
        status: value[1],
        turbo_accepted: value[2] != 0,
    })
}

/// Blood-pressure measurement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedDeviceStatus {
    pub bp_state: u8,
    pub bp_time_left_sec: u16,
}

pub fn parse_extended_device_status(value: &[u8]) -> Result<ExtendedDeviceStatus> {
    ensure_len("extended device status", value, 4)?;
    Ok(ExtendedDeviceStatus {
        bp_state: value[1],
        bp_time_left_sec: u16_at(value, 2),
    })
}

/// Channel status byte of a `GET_FRAMES_L2CAP` response.
pub fn parse_get_frames_l2cap_response(value: &[u8]) -> Result<u8> {
    ensure_len("get frames l2cap", value, 2)?;
    Ok(value[1])
}

pub fn parse_file_length(value: &[u8]) -> Result<u32> {
    ensure_len("file length", value, 5)?;
    Ok(u32_at(value, 1))
}

/// CRC the device computed over a `READ_FILE` payload.
pub fn parse_read_file_crc(value: &[u8]) -> Result<u32> {
    ensure_len("read file", value, 5)?;
    Ok(u32_at(value, 1))
}

/// Authoritative CRC carried by the GATT batch terminal notification.
pub fn parse_batch_crc(value: &[u8]) -> Result<u32> {
    ensure_len("batch crc", value, 5)?;
    Ok(u32_at(value, 1))
}

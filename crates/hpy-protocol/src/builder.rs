//! Command frame builders.
//!
//! Every builder returns the exact bytes written to `CmdRx`. Multi-byte
//! fields are little-endian.

use crate::bytes::{write_u16_le, write_u32_le};
use crate::command_id as cmd;
use crate::model::DaqConfig;

pub fn get_device_status() -> Vec<u8> {
    vec![cmd::GET_DEVICE_STATUS]
}

pub fn get_extended_device_status() -> Vec<u8> {
    vec![cmd::GET_EXTENDED_DEVICE_STATUS]
}

pub fn get_daq_config() -> Vec<u8> {
    vec![cmd::GET_DAQ_CONFIG]
}

pub fn identify() -> Vec<u8> {
    vec![cmd::IDENTIFY]
}

pub fn start_daq() -> Vec<u8> {
    vec![cmd::START_DAQ, 0, 0, 0, 0]
}

pub fn stop_daq() -> Vec<u8> {
    vec![cmd::STOP_DAQ, 0, 0, 0, 0]
}

/// 66-byte `SET_DAQ_CONFIG`: id, apply flag, then the config in its
/// `GET_DAQ_CONFIG` response layout (shifted by one), then a reserved byte.
pub fn set_daq_config(config: &DaqConfig, apply_immediately: bool) -> Vec<u8> {
    let mut buf = vec![0u8; 66];
    buf[0] = cmd::SET_DAQ_CONFIG;
    buf[1] = apply_immediately as u8;
    buf[2] = config.version;
    buf[3] = config.mode;
    buf[4] = config.ambient_light_en as u8;
    write_u32_le(&mut buf, 5, config.ambient_light_period_ms);
    buf[9] = config.ambient_temp_en as u8;
    write_u32_le(&mut buf, 10, config.ambient_temp_period_ms);
    buf[14] = config.skin_temp_en as u8;
    write_u32_le(&mut buf, 15, config.skin_temp_period_ms);
    write_u32_le(&mut buf, 19, config.ppg_cycle_time_ms);
    write_u32_le(&mut buf, 23, config.ppg_interval_time_ms);
    buf[27] = config.ppg_on_during_sleep_en as u8;
    buf[28] = config.compressed_sensing_en as u8;
    buf[29] = config.multi_spectral_en as u8;
    write_u32_le(&mut buf, 30, config.multi_spectral_period_ms);
    write_u32_le(&mut buf, 34, config.sf_max_latency_ms);
    buf[38] = config.ppg_fsr;
    buf[39] = config.eda_sweep_en as u8;
    write_u32_le(&mut buf, 40, config.eda_sweep_period_ms);
    buf[44] = config.acc_ulp_en;
    buf[45] = config.opp_sample_en as u8;
    write_u32_le(&mut buf, 46, config.opp_sample_period_ms);
    buf[50] = config.opp_sample_alt_mode;
    buf[51] = config.memfault_config;
    write_u32_le(&mut buf, 52, config.opp_sample_on_time_ms);
    buf[56] = config.acc_2g_during_sleep_en as u8;
    buf[57] = config.acc_inactivity_config;
    buf[58] = config.ppg_stop_config;
    buf[59] = config.ppg_agc_channel_config;
    buf[60] = config.sleep_thresh_config;
    buf[61] = config.cs_mode;
    buf[62] = config.reset_ring_cfg;
    buf[63] = config.eda_sweep_param_cfg;
    buf[64] = config.daily_daq_mode_cfg;
    buf
}

/// 13-byte `SET_UTC` with the seconds at offset 1. The rest is reserved.
pub fn set_utc(utc_seconds: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 13];
    buf[0] = cmd::SET_UTC;
    write_u32_le(&mut buf, 1, utc_seconds);
    buf
}

const SET_INFO_APP_TYPE: u8 = 0xA0;
const SET_INFO_CHECKSUM_SEED: u16 = 0x051B;

/// 35-byte `SET_INFO`.
///
/// Byte 1 is the signed GMT offset in hours, byte 2 the app type. Bytes
/// 33..35 hold `0x051B + sum(bytes[1..=32])`, little-endian.
pub fn set_info(gmt_offset_hours: i8) -> Vec<u8> {
    let mut buf = vec![0u8; 35];
    buf[0] = cmd::SET_INFO;
    buf[1] = gmt_offset_hours as u8;
    buf[2] = SET_INFO_APP_TYPE;
    let checksum = buf[1..=32]
        .iter()
        .fold(SET_INFO_CHECKSUM_SEED, |acc, b| acc.wrapping_add(*b as u16));
    write_u16_le(&mut buf, 33, checksum);
    buf
}

pub fn set_finger_detection(enable: bool) -> Vec<u8> {
    vec![cmd::SET_FINGER_DETECTION, enable as u8]
}

pub fn configure_l2cap(listen: bool, turbo_48mhz: bool) -> Vec<u8> {
    vec![
        cmd::CONFIGURE_L2CAP,
        if listen {
            cmd::L2CAP_ACTION_LISTEN
        } else {
            cmd::L2CAP_ACTION_CLOSE
        },
        if turbo_48mhz {
            cmd::L2CAP_TURBO_48MHZ
        } else {
            cmd::L2CAP_TURBO_16MHZ
        },
    ]
}

fn get_frames_with(id: u8, sync_frame_count: u32, sync_frame_reboots: u32, limit: u32) -> Vec<u8> {
    // 9..17 is the reserved "to" position
    let mut buf = vec![0u8; 23];
    buf[0] = id;
    write_u32_le(&mut buf, 1, sync_frame_count);
    write_u32_le(&mut buf, 5, sync_frame_reboots);
    write_u32_le(&mut buf, 17, limit);
    write_u16_le(&mut buf, 21, cmd::FLAGS_AUTO_SYNC_FRAME);
    buf
}

/// Batch request answered over the L2CAP download channel.
pub fn get_frames_l2cap(sync_frame_count: u32, sync_frame_reboots: u32, limit: u32) -> Vec<u8> {
    get_frames_with(cmd::GET_FRAMES_L2CAP, sync_frame_count, sync_frame_reboots, limit)
}

/// Batch request answered with stream-TX frame data and a CRC notification.
pub fn get_frames_gatt(sync_frame_count: u32, sync_frame_reboots: u32, limit: u32) -> Vec<u8> {
    get_frames_with(cmd::GET_FRAMES, sync_frame_count, sync_frame_reboots, limit)
}

pub fn get_file_length(file_id: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 3];
    buf[0] = cmd::GET_FILE_LENGTH;
    write_u16_le(&mut buf, 1, file_id);
    buf
}

pub fn read_file(file_id: u16, offset: u32, length: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 11];
    buf[0] = cmd::READ_FILE;
    write_u16_le(&mut buf, 1, file_id);
    write_u32_le(&mut buf, 3, offset);
    write_u32_le(&mut buf, 7, length);
    buf
}

pub fn l2cap_throughput_test(num_packets: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 3];
    buf[0] = cmd::L2CAP_THROUGHPUT_TEST;
    write_u16_le(&mut buf, 1, num_packets);
    buf
}

//! Command frame layouts.

use hpy_protocol::builder;
use hpy_protocol::command_id as cmd;
use hpy_protocol::response::parse_daq_config;
use hpy_protocol::DaqConfig;

#[test]
fn test_single_byte_commands() {
    assert_eq!(builder::get_device_status(), vec![0x1E]);
    assert_eq!(builder::get_daq_config(), vec![0x2B]);
    assert_eq!(builder::identify(), vec![0x33]);
    assert_eq!(builder::get_extended_device_status(), vec![0x38]);
}

#[test]
fn test_daq_start_stop_carry_reserved_bytes() {
    assert_eq!(builder::start_daq(), vec![0x04, 0, 0, 0, 0]);
    assert_eq!(builder::stop_daq(), vec![0x05, 0, 0, 0, 0]);
}

#[test]
fn test_set_utc_layout() {
    let buf = builder::set_utc(0x6543_2100);
    assert_eq!(buf.len(), 13);
    assert_eq!(buf[0], cmd::SET_UTC);
    assert_eq!(&buf[1..5], &[0x00, 0x21, 0x43, 0x65]);
    assert!(buf[5..].iter().all(|b| *b == 0));
}

#[test]
fn test_set_info_checksum_negative_offset() {
    let buf = builder::set_info(-6);
    assert_eq!(buf.len(), 35);
    assert_eq!(buf[0], cmd::SET_INFO);
    assert_eq!(buf[1], 0xFA);
    assert_eq!(buf[2], 0xA0);
    // 0x051B + 0xFA + 0xA0
    assert_eq!(&buf[33..35], &[0xB5, 0x06]);
}

#[test]
fn test_set_info_checksum_positive_offset() {
    let buf = builder::set_info(2);
    assert_eq!(&buf[33..35], &[0xBD, 0x05]);
}

#[test]
fn test_configure_l2cap() {
    assert_eq!(builder::configure_l2cap(true, true), vec![0x34, 0x10, 0x01]);
    assert_eq!(builder::configure_l2cap(false, false), vec![0x34, 0x20, 0x00]);
}

#[test]
fn test_get_frames_layout() {
    let buf = builder::get_frames_l2cap(0x0102_0304, 7, 64);
    assert_eq!(buf.len(), 23);
    assert_eq!(buf[0], cmd::GET_FRAMES_L2CAP);
    assert_eq!(&buf[1..5], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&buf[5..9], &[7, 0, 0, 0]);
    assert!(buf[9..17].iter().all(|b| *b == 0));
    assert_eq!(&buf[17..21], &[64, 0, 0, 0]);
    assert_eq!(&buf[21..23], &[0x04, 0x00]);

    let gatt = builder::get_frames_gatt(0x0102_0304, 7, 64);
    assert_eq!(gatt[0], cmd::GET_FRAMES);
    assert_eq!(&gatt[1..], &buf[1..]);
}

#[test]
fn test_file_commands() {
    assert_eq!(builder::get_file_length(2), vec![0x00, 0x02, 0x00]);
    assert_eq!(
        builder::read_file(2, 0, 300),
        vec![0x01, 0x02, 0x00, 0, 0, 0, 0, 0x2C, 0x01, 0, 0]
    );
}

#[test]
fn test_l2cap_throughput_test() {
    assert_eq!(builder::l2cap_throughput_test(500), vec![0x64, 0xF4, 0x01]);
}

#[test]
fn test_set_daq_config_mirrors_response_layout() {
    let config = DaqConfig {
        version: 3,
        mode: 2,
        ambient_light_en: true,
        ambient_light_period_ms: 60_000,
        skin_temp_en: true,
        skin_temp_period_ms: 30_000,
        ppg_cycle_time_ms: 1_000,
        multi_spectral_period_ms: 900_000,
        memfault_config: 1,
        cs_mode: 4,
        daily_daq_mode_cfg: 9,
        ..DaqConfig::default()
    };
    let buf = builder::set_daq_config(&config, true);
    assert_eq!(buf.len(), 66);
    assert_eq!(buf[0], cmd::SET_DAQ_CONFIG);
    assert_eq!(buf[1], 1);
    assert_eq!(buf[65], 0);

    // The payload after the apply flag is the GET_DAQ_CONFIG body.
    let mut response = vec![cmd::GET_DAQ_CONFIG];
    response.extend_from_slice(&buf[2..65]);
    assert_eq!(parse_daq_config(&response).unwrap(), config);
}

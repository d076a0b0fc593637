//! Command identifiers and protocol constants.
//!
//! Every command frame starts with one of these ids and the device echoes it
//! as the first byte of its response. [`UNRECOGNIZED`] is sent back instead
//! when the firmware does not know the command.

pub const GET_FILE_LENGTH: u8 = 0x00;
pub const READ_FILE: u8 = 0x01;
pub const START_DAQ: u8 = 0x04;
pub const STOP_DAQ: u8 = 0x05;
pub const SET_UTC: u8 = 0x0B;
/// GATT frame download. The batch CRC response also uses this id.
pub const GET_FRAMES: u8 = 0x17;
pub const GET_DEVICE_STATUS: u8 = 0x1E;
pub const SET_DAQ_CONFIG: u8 = 0x2A;
pub const GET_DAQ_CONFIG: u8 = 0x2B;
pub const SET_FINGER_DETECTION: u8 = 0x2D;
pub const SET_INFO: u8 = 0x32;
pub const IDENTIFY: u8 = 0x33;
pub const CONFIGURE_L2CAP: u8 = 0x34;
pub const GET_FRAMES_L2CAP: u8 = 0x35;
pub const GET_EXTENDED_DEVICE_STATUS: u8 = 0x38;
pub const L2CAP_THROUGHPUT_TEST: u8 = 0x64;
pub const UNRECOGNIZED: u8 = 0xFF;

pub const L2CAP_ACTION_LISTEN: u8 = 0x10;
pub const L2CAP_ACTION_CLOSE: u8 = 0x20;
pub const L2CAP_TURBO_48MHZ: u8 = 0x01;
pub const L2CAP_TURBO_16MHZ: u8 = 0x00;

/// Batch request flag: device advances its own sync position on success.
pub const FLAGS_AUTO_SYNC_FRAME: u16 = 0x0004;

/// `DeviceStatus::notif_sender` value signalling fresh frames.
pub const NOTIF_SENDER_SUPERFRAME_CLOSE: u8 = 0x04;

/// Size of one sensor frame in bytes.
pub const FRAME_SIZE: usize = 4096;

/// File id of the crash-log file.
pub const MEMFAULT_FILE_ID: u16 = 2;

/// L2CAP channel used for frame download.
pub const L2CAP_DOWNLOAD_PSM: u16 = 130;

/// L2CAP channel used for SUOTA image streaming.
pub const L2CAP_SUOTA_PSM: u16 = 129;

/// Human-readable command name for logs.
pub fn name(cmd_id: u8) -> &'static str {
    match cmd_id {
        GET_FILE_LENGTH => "GET_FILE_LENGTH",
        READ_FILE => "READ_FILE",
        START_DAQ => "START_DAQ",
        STOP_DAQ => "STOP_DAQ",
        SET_UTC => "SET_UTC",
        GET_FRAMES => "GET_FRAMES",
        GET_DEVICE_STATUS => "GET_DEVICE_STATUS",
        SET_DAQ_CONFIG => "SET_DAQ_CONFIG",
        GET_DAQ_CONFIG => "GET_DAQ_CONFIG",
        SET_FINGER_DETECTION => "SET_FINGER_DETECTION",
        SET_INFO => "SET_INFO",
        IDENTIFY => "IDENTIFY",
        CONFIGURE_L2CAP => "CONFIGURE_L2CAP",
        GET_FRAMES_L2CAP => "GET_FRAMES_L2CAP",
        GET_EXTENDED_DEVICE_STATUS => "GET_EXTENDED_DEVICE_STATUS",
        L2CAP_THROUGHPUT_TEST => "L2CAP_THROUGHPUT_TEST",
        UNRECOGNIZED => "UNRECOGNIZED",
        _ => "UNKNOWN",
    }
}

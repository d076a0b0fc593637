//! Device status snapshot returned by `GET_DEVICE_STATUS` and pushed on
//! frame-TX when the ring's state changes.

use crate::command_id::NOTIF_SENDER_SUPERFRAME_CLOSE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub phy_status: u8,
    pub charger_state: u8,
    pub charging_state: u8,
    pub charging_mode: u8,
    pub charger_blocked_reason: u8,
    pub charger_rev_id: u8,
    pub charger_status: u8,
    /// Millivolts.
    pub battery_voltage: u16,
    /// State of charge, percent.
    pub soc: u8,
    pub daq_mode: u8,
    pub unsynced_frames: u16,
    pub sync_frame_count: u32,
    pub sync_frame_reboots: u32,
    pub opportunistic_sampling_state: u8,
    pub opportunistic_state_time: u16,
    pub ship_mode_status: u8,
    pub sleep_state: u8,
    /// Bit 0: host must send UTC. Bit 1: host must send info.
    /// Bit 2 *clear*: host must send finger detection.
    pub send_utc_flags: u8,
    pub boot_handshake_flag: u8,
    pub pseudo_ring_on_off: u8,
    pub notif_sender: u8,
    pub ble_ci: u8,
    pub clock_rate: u8,
}

fn unknown_hex(value: u8) -> String {
    format!("Unknown(0x{:x})", value)
}

fn unknown(value: u8) -> String {
    format!("Unknown({})", value)
}

impl DeviceStatus {
    pub fn needs_set_utc(&self) -> bool {
        self.send_utc_flags & 0x01 != 0
    }

    pub fn needs_set_info(&self) -> bool {
        self.send_utc_flags & 0x02 != 0
    }

    pub fn needs_set_finger_detection(&self) -> bool {
        self.send_utc_flags & 0x04 == 0
    }

    /// The ring pushed this status because a superframe closed.
    pub fn is_superframe_close(&self) -> bool {
        self.notif_sender == NOTIF_SENDER_SUPERFRAME_CLOSE
    }

    pub fn phy_string(&self) -> String {
        match self.phy_status {
            0x01 => "OnFinger".into(),
            0x02 => "OffFinger".into(),
            0x03 => "OnCharger".into(),
            other => unknown_hex(other),
        }
    }

    pub fn daq_string(&self) -> String {
        match self.daq_mode {
            0x01 => "Off".into(),
            0x02 => "Sensing".into(),
            0x03 => "On".into(),
            other => unknown_hex(other),
        }
    }

    pub fn sync_string(&self) -> String {
        format!("boot{}:frame{}", self.sync_frame_reboots, self.sync_frame_count)
    }

    pub fn notif_sender_string(&self) -> String {
        match self.notif_sender {
            0x01 => "ChargerStateChange".into(),
            0x02 => "OnFinger".into(),
            0x03 => "OffFinger".into(),
            0x04 => "SuperframeClose".into(),
            0x05 => "SleepStatusChange".into(),
            0x06 => "PseudoFastOnOff".into(),
            0x07 => "DevStatusReq".into(),
            0x08 => "CI_Changed".into(),
            other => unknown_hex(other),
        }
    }

    pub fn clock_rate_string(&self) -> String {
        match self.clock_rate {
            0 => "16MHz".into(),
            1 => "48MHz".into(),
            2 => "96MHz".into(),
            other => unknown(other),
        }
    }

    pub fn charger_state_string(&self) -> String {
        match self.charger_state {
            0 => "NoCharger".into(),
            1 => "ChargerDetected".into(),
            2 => "ChargerReady".into(),
            other => unknown(other),
        }
    }

    pub fn charging_state_string(&self) -> String {
        match self.charging_state {
            0 => "NotCharging".into(),
            1 => "PreCharge".into(),
            2 => "FastCharge".into(),
            3 => "TopOff".into(),
            4 => "Done".into(),
            other => unknown(other),
        }
    }

    pub fn sleep_state_string(&self) -> String {
        match self.sleep_state {
            0 => "Awake".into(),
            1 => "Sleeping".into(),
            other => unknown(other),
        }
    }

    pub fn ship_mode_string(&self) -> String {
        match self.ship_mode_status {
            0 => "Normal".into(),
            1 => "ShipMode".into(),
            other => unknown(other),
        }
    }

    pub fn charger_status_string(&self) -> String {
        format!("0x{:02X}", self.charger_status)
    }
}

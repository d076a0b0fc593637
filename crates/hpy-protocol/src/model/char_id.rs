//! Logical characteristic identifiers.
//!
//! The shim maps these to platform handles. Keeping the state machines on
//! `CharId` means no UUID lookups happen on the hot path.

use crate::uuid as ids;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharId {
    /// Write without response: host to ring commands.
    CmdRx,
    /// Notify: command responses.
    CmdTx,
    /// Notify: GATT frame payload during download, file-read payload otherwise.
    StreamTx,
    /// Notify: firmware debug output.
    DebugTx,
    /// Notify: unsolicited device status and the GATT batch CRC.
    FrameTx,

    DisSerialNumber,
    DisFwVersion,
    DisSwVersion,
    DisManufacturerName,
    DisModelNumber,

    SuotaMemDev,
    SuotaGpioMap,
    SuotaMemInfo,
    SuotaPatchLen,
    SuotaPatchData,
    SuotaStatus,
    SuotaL2capPsm,
    SuotaVersion,
    SuotaMtu,
    SuotaPatchDataCharSize,
}

/// Notifications enabled after discovery, in order.
pub const NOTIFY_SUBSCRIPTIONS: [CharId; 5] = [
    CharId::CmdTx,
    CharId::StreamTx,
    CharId::DebugTx,
    CharId::FrameTx,
    CharId::SuotaStatus,
];

/// Device Information reads after subscription, in order.
pub const DEVICE_INFO_READS: [CharId; 5] = [
    CharId::DisSerialNumber,
    CharId::DisFwVersion,
    CharId::DisSwVersion,
    CharId::DisManufacturerName,
    CharId::DisModelNumber,
];

/// Characteristics the command service must expose for a usable connection.
pub const REQUIRED_CHARACTERISTICS: [CharId; 2] = [CharId::CmdRx, CharId::CmdTx];

impl CharId {
    pub fn uuid(self) -> Uuid {
        match self {
            CharId::CmdRx => ids::HCS_CMD_RX,
            CharId::CmdTx => ids::HCS_CMD_TX,
            CharId::StreamTx => ids::HCS_STREAM_TX,
            CharId::DebugTx => ids::HCS_DEBUG_TX,
            CharId::FrameTx => ids::HCS_FRAME_TX,
            CharId::DisSerialNumber => ids::DIS_SERIAL_NUMBER,
            CharId::DisFwVersion => ids::DIS_FW_VERSION,
            CharId::DisSwVersion => ids::DIS_SW_VERSION,
            CharId::DisManufacturerName => ids::DIS_MANUFACTURER_NAME,
            CharId::DisModelNumber => ids::DIS_MODEL_NUMBER,
            CharId::SuotaMemDev => ids::SUOTA_MEM_DEV,
            CharId::SuotaGpioMap => ids::SUOTA_GPIO_MAP,
            CharId::SuotaMemInfo => ids::SUOTA_MEM_INFO,
            CharId::SuotaPatchLen => ids::SUOTA_PATCH_LEN,
            CharId::SuotaPatchData => ids::SUOTA_PATCH_DATA,
            CharId::SuotaStatus => ids::SUOTA_STATUS,
            CharId::SuotaL2capPsm => ids::SUOTA_L2CAP_PSM,
            CharId::SuotaVersion => ids::SUOTA_VERSION,
            CharId::SuotaMtu => ids::SUOTA_MTU,
            CharId::SuotaPatchDataCharSize => ids::SUOTA_PATCH_DATA_CHAR_SIZE,
        }
    }

    /// UUID of the service exposing this characteristic.
    pub fn service_uuid(self) -> Uuid {
        match self {
            CharId::CmdRx | CharId::CmdTx | CharId::StreamTx | CharId::DebugTx | CharId::FrameTx => {
                ids::HCS_SERVICE
            }
            CharId::DisSerialNumber
            | CharId::DisFwVersion
            | CharId::DisSwVersion
            | CharId::DisManufacturerName
            | CharId::DisModelNumber => ids::DIS_SERVICE,
            _ => ids::SUOTA_SERVICE,
        }
    }

    /// Reverse lookup used by shims that receive raw UUIDs.
    pub fn from_uuid(uuid: &Uuid) -> Option<CharId> {
        ALL.iter().copied().find(|id| id.uuid() == *uuid)
    }
}

const ALL: [CharId; 20] = [
    CharId::CmdRx,
    CharId::CmdTx,
    CharId::StreamTx,
    CharId::DebugTx,
    CharId::FrameTx,
    CharId::DisSerialNumber,
    CharId::DisFwVersion,
    CharId::DisSwVersion,
    CharId::DisManufacturerName,
    CharId::DisModelNumber,
    CharId::SuotaMemDev,
    CharId::SuotaGpioMap,
    CharId::SuotaMemInfo,
    CharId::SuotaPatchLen,
    CharId::SuotaPatchData,
    CharId::SuotaStatus,
    CharId::SuotaL2capPsm,
    CharId::SuotaVersion,
    CharId::SuotaMtu,
    CharId::SuotaPatchDataCharSize,
];

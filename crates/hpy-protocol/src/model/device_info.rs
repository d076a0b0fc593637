//! Device Information service contents.

use super::tier::{supports_l2cap_download, FirmwareTier};
use super::CharId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub manufacturer_name: String,
    pub fw_version: String,
    pub sw_version: String,
    pub model_number: String,
}

impl DeviceInfo {
    pub fn firmware_tier(&self) -> FirmwareTier {
        FirmwareTier::from_version(&self.fw_version)
    }

    pub fn supports_l2cap_download(&self) -> bool {
        supports_l2cap_download(&self.fw_version)
    }

    /// Store the value read from a DIS characteristic.
    ///
    /// Values are decoded as UTF-8 (lossy) with trailing NULs removed.
    /// Returns `false` for characteristics outside the DIS set.
    pub fn apply_read(&mut self, char_id: CharId, value: &[u8]) -> bool {
        let text = decode_dis_string(value);
        match char_id {
            CharId::DisSerialNumber => self.serial_number = text,
            CharId::DisFwVersion => self.fw_version = text,
            CharId::DisSwVersion => self.sw_version = text,
            CharId::DisManufacturerName => self.manufacturer_name = text,
            CharId::DisModelNumber => self.model_number = text,
            _ => return false,
        }
        true
    }
}

fn decode_dis_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

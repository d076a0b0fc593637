use serde::{Deserialize, Serialize};

/// A ring seen during scanning.
///
/// `handle` is the shim's opaque device reference (typically the address
/// or a platform object key). The core never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedDevice {
    pub handle: String,
    pub name: String,
    pub address: String,
    pub rssi: i16,
    #[serde(default)]
    pub ring_size: u8,
    #[serde(default)]
    pub ring_color: u8,
}

impl ScannedDevice {
    pub fn new(
        handle: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        rssi: i16,
    ) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            address: address.into(),
            rssi,
            ring_size: 0,
            ring_color: 0,
        }
    }
}

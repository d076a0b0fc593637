//! Device data models.

pub mod char_id;
pub mod daq_config;
pub mod device_info;
pub mod device_status;
pub mod scanned_device;
pub mod tier;

pub use char_id::{CharId, DEVICE_INFO_READS, NOTIFY_SUBSCRIPTIONS, REQUIRED_CHARACTERISTICS};
pub use daq_config::DaqConfig;
pub use device_info::DeviceInfo;
pub use device_status::DeviceStatus;
pub use scanned_device::ScannedDevice;
pub use tier::{supports_l2cap_download, FirmwareTier};

//! Frame download over L2CAP or GATT.

pub mod accumulator;
pub mod controller;

pub use accumulator::{BatchResult, GattFrameAccumulator};
pub use controller::{
    DownloadAction, DownloadController, DownloadPhase, DownloadSettings, DL_CONFIGURE_L2CAP_CLOSE,
    DL_CONFIGURE_L2CAP_OPEN, DL_GET_DEV_STATUS, DL_GET_FRAMES_GATT, DL_GET_FRAMES_L2CAP,
};

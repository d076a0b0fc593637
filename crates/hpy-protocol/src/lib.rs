// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hpy-protocol
//!
//! Wire-level pieces of the HPY ring protocol: little-endian codecs, the
//! incremental CRC, command ids and builders, response parsers, GATT UUIDs
//! and the device data models. Nothing here performs I/O.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod builder;
pub mod bytes;
pub mod command_id;
pub mod crc;
pub mod error;
pub mod model;
pub mod response;
pub mod uuid;

pub use crc::{ChecksumAccumulator, Crc32};
pub use error::{ProtocolError, Result};
pub use model::{
    CharId, DaqConfig, DeviceInfo, DeviceStatus, FirmwareTier, ScannedDevice,
};

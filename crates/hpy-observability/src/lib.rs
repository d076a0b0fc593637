// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hpy-observability
//!
//! Logging setup shared by every HPY crate, with per-crate debug flag support.
//!
//! ## Features
//! - `file-logging`: File-based log rotation (desktop only)

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &["hpy-ble", "hpy-config", "hpy-protocol", "hpy-connection"];

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `hpy_ble.toml`. Every section is `#[serde(default)]`, so an empty file
//! yields the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HpyConfig {
    pub connection: ConnectionConfig,
    pub download: DownloadConfig,
    pub reconnect: ReconnectConfig,
    pub fw_update: FwUpdateConfig,
    pub memfault: MemfaultConfig,
    pub scan: ScanConfig,
    pub logging: LoggingConfig,
}

/// Per-connection command and link settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub command_timeout_ms: u64,
    pub skip_finger_detection: bool,
    pub requested_mtu: u16,
    pub max_queue_depth: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            skip_finger_detection: false,
            requested_mtu: 247,
            max_queue_depth: 4,
        }
    }
}

impl ConnectionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Frame download settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Frames requested per batch
    pub batch_size: u32,
    /// CRC retries per batch before escalating
    pub max_retries: u32,
    /// Use L2CAP when the firmware supports it
    pub prefer_l2cap: bool,
    pub l2cap_command_timeout_ms: u64,
    pub gatt_batch_timeout_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_retries: 1,
            prefer_l2cap: true,
            l2cap_command_timeout_ms: 5000,
            gatt_batch_timeout_ms: 30_000,
        }
    }
}

/// One band of a reconnection schedule: attempts `from_attempt..=to_attempt`
/// wait `interval_ms` before connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackoffBand {
    pub from_attempt: u32,
    pub to_attempt: u32,
    pub interval_ms: u64,
}

impl BackoffBand {
    pub const fn new(from_attempt: u32, to_attempt: u32, interval_ms: u64) -> Self {
        Self {
            from_attempt,
            to_attempt,
            interval_ms,
        }
    }
}

/// Reconnection policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    /// Bound on the wait for a connect outcome per attempt
    pub connect_timeout_ms: u64,
    /// Grace period before the first attempt after a firmware update
    pub fw_reboot_wait_ms: u64,
    pub schedule: Vec<BackoffBand>,
    pub fw_schedule: Vec<BackoffBand>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            connect_timeout_ms: 15_000,
            fw_reboot_wait_ms: 30_000,
            schedule: vec![
                BackoffBand::new(1, 5, 1_000),
                BackoffBand::new(6, 20, 5_000),
                BackoffBand::new(21, 64, 15_000),
            ],
            fw_schedule: vec![
                BackoffBand::new(1, 10, 2_000),
                BackoffBand::new(11, 64, 5_000),
            ],
        }
    }
}

impl ReconnectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn fw_reboot_wait(&self) -> Duration {
        Duration::from_millis(self.fw_reboot_wait_ms)
    }
}

/// SUOTA firmware-update pacing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FwUpdateConfig {
    pub block_size: usize,
    pub patch_len_delay_ms: u64,
    pub inter_block_delay_ms: u64,
    pub close_wait_ms: u64,
    /// Return to `Ready` if no disconnect follows an error or cancel
    pub reboot_fallback_ms: u64,
}

impl Default for FwUpdateConfig {
    fn default() -> Self {
        Self {
            block_size: 240,
            patch_len_delay_ms: 200,
            inter_block_delay_ms: 30,
            close_wait_ms: 5_000,
            reboot_fallback_ms: 5_000,
        }
    }
}

/// Crash-log drain and ring buffer settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemfaultConfig {
    pub enabled: bool,
    pub buffer_size: usize,
    pub max_descriptors: usize,
    pub max_chunks_per_drain: u32,
}

impl Default for MemfaultConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 131_072,
            max_descriptors: 16,
            max_chunks_per_drain: 8,
        }
    }
}

/// Scan filtering
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    pub min_rssi: i16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { min_rssi: -80 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub log_dir: Option<String>,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            log_dir: None,
            retention_runs: 10,
        }
    }
}

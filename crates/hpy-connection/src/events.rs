// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host-visible identifiers, connection states and the event stream.

use hpy_protocol::model::{DaqConfig, DeviceInfo, DeviceStatus, ScannedDevice};
use hpy_protocol::response::ExtendedDeviceStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of concurrent connections.
pub const MAX_CONNECTIONS: usize = 8;

/// Connection handle in `-1..=7`. `-1` is [`ConnectionId::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(i8);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(-1);

    /// `None` outside `-1..=7`.
    pub fn new(value: i8) -> Option<Self> {
        if (-1..MAX_CONNECTIONS as i8).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if index < MAX_CONNECTIONS {
            Some(Self(index as i8))
        } else {
            None
        }
    }

    pub fn value(self) -> i8 {
        self.0
    }

    /// Slot index, `None` for the invalid id.
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Ready,
    /// Tier 0 firmware: connected, but no application commands.
    ConnectedLimited,
    Downloading,
    /// Download enabled, waiting for the ring to close a superframe.
    Waiting,
    FwUpdating,
    FwUpdateRebooting,
    Reconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Handshaking => "HANDSHAKING",
            ConnectionState::Ready => "READY",
            ConnectionState::ConnectedLimited => "CONNECTED_LIMITED",
            ConnectionState::Downloading => "DOWNLOADING",
            ConnectionState::Waiting => "WAITING",
            ConnectionState::FwUpdating => "FW_UPDATING",
            ConnectionState::FwUpdateRebooting => "FW_UPDATE_REBOOTING",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// Error classes carried by [`HpyEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ConnectFail,
    HandshakeFail,
    CommandTimeout,
    CommandUnrecognized,
    ReconnectFail,
    DownloadBufferOverrun,
    DownloadCrcInvalid,
    FwImageInvalid,
    FwTransferFail,
    FwUpdateReconnectFail,
    MemfaultBufferFull,
    MaxConnections,
    Generic,
}

/// Frame-download transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Gatt,
    L2cap,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Gatt => "GATT",
            Transport::L2cap => "L2CAP",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HpyEvent {
    DeviceDiscovered {
        device: ScannedDevice,
    },
    StateChanged {
        conn_id: ConnectionId,
        state: ConnectionState,
        retry_count: u32,
    },
    DeviceInfo {
        conn_id: ConnectionId,
        info: DeviceInfo,
    },
    DeviceStatus {
        conn_id: ConnectionId,
        status: DeviceStatus,
    },
    DaqConfig {
        conn_id: ConnectionId,
        config: DaqConfig,
    },
    ExtendedDeviceStatus {
        conn_id: ConnectionId,
        status: ExtendedDeviceStatus,
    },
    /// Response without a dedicated parser.
    CommandResult {
        conn_id: ConnectionId,
        cmd_id: u8,
        raw: Vec<u8>,
    },
    DebugMessage {
        conn_id: ConnectionId,
        message: Vec<u8>,
    },
    Error {
        conn_id: ConnectionId,
        code: ErrorCode,
        message: String,
    },
    Log {
        conn_id: ConnectionId,
        message: String,
    },
    DownloadBatch {
        conn_id: ConnectionId,
        frames_in_batch: u32,
        total_frames_downloaded: u32,
        crc_valid: bool,
    },
    DownloadProgress {
        conn_id: ConnectionId,
        frames_downloaded: u32,
        frames_total: u32,
        transport: Transport,
    },
    DownloadFrame {
        conn_id: ConnectionId,
        frame: Vec<u8>,
    },
    DownloadComplete {
        conn_id: ConnectionId,
        total_frames: u32,
    },
    /// A disconnect cut a batch short; the host should drop this many frames.
    DownloadInterrupted {
        conn_id: ConnectionId,
        partial_frames: u32,
    },
    FwUpdateProgress {
        conn_id: ConnectionId,
        bytes_written: usize,
        total_bytes: usize,
    },
    FwUpdateComplete {
        conn_id: ConnectionId,
        fw_version: String,
    },
    MemfaultComplete {
        conn_id: ConnectionId,
        chunks: u32,
    },
}

impl HpyEvent {
    pub fn conn_id(&self) -> ConnectionId {
        match self {
            HpyEvent::DeviceDiscovered { .. } => ConnectionId::INVALID,
            HpyEvent::StateChanged { conn_id, .. }
            | HpyEvent::DeviceInfo { conn_id, .. }
            | HpyEvent::DeviceStatus { conn_id, .. }
            | HpyEvent::DaqConfig { conn_id, .. }
            | HpyEvent::ExtendedDeviceStatus { conn_id, .. }
            | HpyEvent::CommandResult { conn_id, .. }
            | HpyEvent::DebugMessage { conn_id, .. }
            | HpyEvent::Error { conn_id, .. }
            | HpyEvent::Log { conn_id, .. }
            | HpyEvent::DownloadBatch { conn_id, .. }
            | HpyEvent::DownloadProgress { conn_id, .. }
            | HpyEvent::DownloadFrame { conn_id, .. }
            | HpyEvent::DownloadComplete { conn_id, .. }
            | HpyEvent::DownloadInterrupted { conn_id, .. }
            | HpyEvent::FwUpdateProgress { conn_id, .. }
            | HpyEvent::FwUpdateComplete { conn_id, .. }
            | HpyEvent::MemfaultComplete { conn_id, .. } => *conn_id,
        }
    }

    pub fn error(conn_id: ConnectionId, code: ErrorCode, message: impl Into<String>) -> Self {
        HpyEvent::Error {
            conn_id,
            code,
            message: message.into(),
        }
    }
}

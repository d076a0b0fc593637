//! Platform boundary.
//!
//! [`BleShim`] is what the engine calls into; [`ShimEvent`] is what the
//! platform reports back. Implementations must not call back into the engine
//! synchronously from a `BleShim` method: callbacks are delivered as
//! `ShimEvent`s on the next turn of the driver.

use crate::events::{ConnectionId, HpyEvent};
use hpy_protocol::model::{CharId, ScannedDevice};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// BLE operations provided by the host platform.
pub trait BleShim: Send + Sync {
    fn scan_start(&self);
    fn scan_stop(&self);

    /// `handle` is the opaque device reference from [`ScannedDevice::handle`].
    fn connect(&self, conn_id: ConnectionId, handle: &str);
    fn disconnect(&self, conn_id: ConnectionId);

    fn discover_services(&self, conn_id: ConnectionId);

    fn write_characteristic(
        &self,
        conn_id: ConnectionId,
        char_id: CharId,
        data: &[u8],
        write_type: WriteType,
    );

    fn read_characteristic(&self, conn_id: ConnectionId, char_id: CharId);

    fn subscribe_notifications(&self, conn_id: ConnectionId, char_id: CharId, enable: bool);

    fn request_mtu(&self, conn_id: ConnectionId, mtu: u16);

    fn read_rssi(&self, conn_id: ConnectionId);

    fn l2cap_open(&self, conn_id: ConnectionId, psm: u16);

    /// Start the frame receiver on the open channel. The platform reassembles
    /// `expected_frames` frames, checks the trailing CRC and reports
    /// [`ShimEvent::L2capBatchComplete`].
    fn l2cap_start_receiving(&self, conn_id: ConnectionId, expected_frames: u32);

    fn l2cap_close(&self, conn_id: ConnectionId);

    fn l2cap_stream_send(
        &self,
        conn_id: ConnectionId,
        psm: u16,
        image: Arc<[u8]>,
        block_size: usize,
        inter_block_delay: Duration,
    );
}

/// Wall clock and timezone.
pub trait TimeSource: Send + Sync {
    fn utc_seconds(&self) -> u32;
    fn gmt_offset_hours(&self) -> i8;
}

/// [`TimeSource`] backed by the system clock and local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn utc_seconds(&self) -> u32 {
        u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }

    fn gmt_offset_hours(&self) -> i8 {
        let seconds = chrono::Local::now().offset().local_minus_utc();
        (seconds / 3600) as i8
    }
}

/// Receiver of host-facing events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: HpyEvent);
}

impl<F> EventSink for F
where
    F: Fn(HpyEvent) + Send + Sync,
{
    fn emit(&self, event: HpyEvent) {
        self(event)
    }
}

/// Callbacks reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum ShimEvent {
    DeviceDiscovered {
        device: ScannedDevice,
    },
    Connected {
        conn_id: ConnectionId,
    },
    Disconnected {
        conn_id: ConnectionId,
        status: i32,
    },
    ServicesDiscovered {
        conn_id: ConnectionId,
        chars: HashSet<CharId>,
    },
    CharacteristicRead {
        conn_id: ConnectionId,
        char_id: CharId,
        value: Vec<u8>,
    },
    CharacteristicChanged {
        conn_id: ConnectionId,
        char_id: CharId,
        value: Vec<u8>,
    },
    WriteComplete {
        conn_id: ConnectionId,
        char_id: CharId,
        status: i32,
    },
    DescriptorWritten {
        conn_id: ConnectionId,
        char_id: CharId,
        status: i32,
    },
    MtuChanged {
        conn_id: ConnectionId,
        mtu: u16,
    },
    RssiRead {
        conn_id: ConnectionId,
        rssi: i16,
    },
    L2capConnected {
        conn_id: ConnectionId,
    },
    L2capFrame {
        conn_id: ConnectionId,
        frame: Vec<u8>,
    },
    L2capBatchComplete {
        conn_id: ConnectionId,
        frames_received: u32,
        crc_valid: bool,
    },
    L2capError {
        conn_id: ConnectionId,
        message: String,
    },
    L2capSendProgress {
        conn_id: ConnectionId,
        blocks_sent: usize,
        blocks_total: usize,
    },
    L2capSendComplete {
        conn_id: ConnectionId,
    },
    L2capSendError {
        conn_id: ConnectionId,
        message: String,
    },
}

impl ShimEvent {
    /// Target connection, `None` for scan results.
    pub fn conn_id(&self) -> Option<ConnectionId> {
        match self {
            ShimEvent::DeviceDiscovered { .. } => None,
            ShimEvent::Connected { conn_id }
            | ShimEvent::Disconnected { conn_id, .. }
            | ShimEvent::ServicesDiscovered { conn_id, .. }
            | ShimEvent::CharacteristicRead { conn_id, .. }
            | ShimEvent::CharacteristicChanged { conn_id, .. }
            | ShimEvent::WriteComplete { conn_id, .. }
            | ShimEvent::DescriptorWritten { conn_id, .. }
            | ShimEvent::MtuChanged { conn_id, .. }
            | ShimEvent::RssiRead { conn_id, .. }
            | ShimEvent::L2capConnected { conn_id }
            | ShimEvent::L2capFrame { conn_id, .. }
            | ShimEvent::L2capBatchComplete { conn_id, .. }
            | ShimEvent::L2capError { conn_id, .. }
            | ShimEvent::L2capSendProgress { conn_id, .. }
            | ShimEvent::L2capSendComplete { conn_id }
            | ShimEvent::L2capSendError { conn_id, .. } => Some(*conn_id),
        }
    }
}

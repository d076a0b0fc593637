//! Recording mocks and a harness that walks a slot through connection setup.

#![allow(dead_code)]

use hpy_config::HpyConfig;
use hpy_connection::{
    BleShim, ConnectionId, ConnectionState, EventSink, HpyEvent, PlatformApi, ShimEvent,
    TimeSource, TimerKind, TimerScheduler, TimerToken, WriteType,
};
use hpy_protocol::command_id as cmd;
use hpy_protocol::model::{CharId, DEVICE_INFO_READS, NOTIFY_SUBSCRIPTIONS};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const UTC_SECONDS: u32 = 1_708_000_000;
pub const GMT_OFFSET: i8 = -6;

#[derive(Debug, Clone, PartialEq)]
pub enum ShimCall {
    ScanStart,
    ScanStop,
    Connect { conn_id: ConnectionId, handle: String },
    Disconnect(ConnectionId),
    DiscoverServices(ConnectionId),
    Write { char_id: CharId, data: Vec<u8>, write_type: WriteType },
    Read(CharId),
    Subscribe(CharId),
    RequestMtu(u16),
    ReadRssi(ConnectionId),
    L2capOpen(u16),
    L2capStartReceiving(u32),
    L2capClose(ConnectionId),
    L2capStreamSend { psm: u16, len: usize, block_size: usize },
}

#[derive(Default)]
pub struct MockShim {
    calls: Mutex<Vec<ShimCall>>,
}

impl MockShim {
    pub fn calls(&self) -> Vec<ShimCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Command bytes written to `CmdRx`, oldest first.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ShimCall::Write {
                    char_id: CharId::CmdRx,
                    data,
                    ..
                } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Leading command ids of [`MockShim::commands`].
    pub fn command_ids(&self) -> Vec<u8> {
        self.commands().iter().filter_map(|c| c.first().copied()).collect()
    }

    pub fn suota_writes(&self) -> Vec<(CharId, Vec<u8>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ShimCall::Write {
                    char_id,
                    data,
                    write_type: WriteType::WithResponse,
                } => Some((*char_id, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ShimCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(*c)).count()
    }

    fn record(&self, call: ShimCall) {
        self.calls.lock().push(call);
    }
}

impl BleShim for MockShim {
    fn scan_start(&self) {
        self.record(ShimCall::ScanStart);
    }

    fn scan_stop(&self) {
        self.record(ShimCall::ScanStop);
    }

    fn connect(&self, conn_id: ConnectionId, handle: &str) {
        self.record(ShimCall::Connect {
            conn_id,
            handle: handle.to_string(),
        });
    }

    fn disconnect(&self, conn_id: ConnectionId) {
        self.record(ShimCall::Disconnect(conn_id));
    }

    fn discover_services(&self, conn_id: ConnectionId) {
        self.record(ShimCall::DiscoverServices(conn_id));
    }

    fn write_characteristic(
        &self,
        _conn_id: ConnectionId,
        char_id: CharId,
        data: &[u8],
        write_type: WriteType,
    ) {
        self.record(ShimCall::Write {
            char_id,
            data: data.to_vec(),
            write_type,
        });
    }

    fn read_characteristic(&self, _conn_id: ConnectionId, char_id: CharId) {
        self.record(ShimCall::Read(char_id));
    }

    fn subscribe_notifications(&self, _conn_id: ConnectionId, char_id: CharId, _enable: bool) {
        self.record(ShimCall::Subscribe(char_id));
    }

    fn request_mtu(&self, _conn_id: ConnectionId, mtu: u16) {
        self.record(ShimCall::RequestMtu(mtu));
    }

    fn read_rssi(&self, conn_id: ConnectionId) {
        self.record(ShimCall::ReadRssi(conn_id));
    }

    fn l2cap_open(&self, _conn_id: ConnectionId, psm: u16) {
        self.record(ShimCall::L2capOpen(psm));
    }

    fn l2cap_start_receiving(&self, _conn_id: ConnectionId, expected_frames: u32) {
        self.record(ShimCall::L2capStartReceiving(expected_frames));
    }

    fn l2cap_close(&self, conn_id: ConnectionId) {
        self.record(ShimCall::L2capClose(conn_id));
    }

    fn l2cap_stream_send(
        &self,
        _conn_id: ConnectionId,
        psm: u16,
        image: Arc<[u8]>,
        block_size: usize,
        _inter_block_delay: Duration,
    ) {
        self.record(ShimCall::L2capStreamSend {
            psm,
            len: image.len(),
            block_size,
        });
    }
}

pub struct MockTime;

impl TimeSource for MockTime {
    fn utc_seconds(&self) -> u32 {
        UTC_SECONDS
    }

    fn gmt_offset_hours(&self) -> i8 {
        GMT_OFFSET
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HpyEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<HpyEvent> {
        self.events.lock().clone()
    }

    /// Events other than `Log`.
    pub fn significant(&self) -> Vec<HpyEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| !matches!(e, HpyEvent::Log { .. }))
            .cloned()
            .collect()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                HpyEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: HpyEvent) {
        self.events.lock().push(event);
    }
}

/// Timers that only fire when a test says so.
#[derive(Default)]
pub struct ManualTimers {
    armed: Mutex<Vec<(TimerToken, Duration)>>,
}

impl ManualTimers {
    pub fn armed(&self) -> Vec<(TimerToken, Duration)> {
        self.armed.lock().clone()
    }

    /// Take the most recently armed timer of a kind, as if it had fired.
    pub fn take(&self, pred: impl Fn(&TimerKind) -> bool) -> Option<(TimerToken, Duration)> {
        let mut armed = self.armed.lock();
        let pos = armed.iter().rposition(|(t, _)| pred(&t.kind))?;
        Some(armed.remove(pos))
    }

    pub fn is_armed(&self, pred: impl Fn(&TimerKind) -> bool) -> bool {
        self.armed.lock().iter().any(|(t, _)| pred(&t.kind))
    }
}

impl TimerScheduler for ManualTimers {
    fn schedule(&self, token: TimerToken, after: Duration) {
        self.armed.lock().push((token, after));
    }

    fn cancel(&self, token: &TimerToken) {
        self.armed.lock().retain(|(t, _)| t != token);
    }
}

pub struct Harness {
    pub api: PlatformApi,
    pub shim: Arc<MockShim>,
    pub events: Arc<RecordingSink>,
    pub timers: Arc<ManualTimers>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: HpyConfig) -> Self {
        let shim = Arc::new(MockShim::default());
        let events = Arc::new(RecordingSink::default());
        let timers = Arc::new(ManualTimers::default());
        let api = PlatformApi::new(
            shim.clone(),
            Arc::new(MockTime),
            events.clone(),
            timers.clone(),
            config,
        );
        Self {
            api,
            shim,
            events,
            timers,
        }
    }

    pub fn inject(&mut self, event: ShimEvent) {
        self.api.handle_shim_event(event);
    }

    pub fn notify(&mut self, conn_id: ConnectionId, char_id: CharId, value: Vec<u8>) {
        self.inject(ShimEvent::CharacteristicChanged {
            conn_id,
            char_id,
            value,
        });
    }

    /// Respond on command-TX.
    pub fn respond(&mut self, conn_id: ConnectionId, value: Vec<u8>) {
        self.notify(conn_id, CharId::CmdTx, value);
    }

    pub fn fire(&mut self, pred: impl Fn(&TimerKind) -> bool) -> Duration {
        let (token, after) = self.timers.take(pred).expect("timer armed");
        self.api.on_timer(token);
        after
    }

    /// Connect and run link setup up to the end of the DIS reads.
    pub fn bring_up(&mut self, fw_version: &str) -> ConnectionId {
        let conn_id = self.api.connect("AA:BB:CC:DD:EE:01").expect("slot");
        self.link_up(conn_id, fw_version);
        conn_id
    }

    /// Link setup for an existing slot, after its connect call.
    pub fn link_up(&mut self, conn_id: ConnectionId, fw_version: &str) {
        self.inject(ShimEvent::Connected { conn_id });
        self.inject(ShimEvent::MtuChanged { conn_id, mtu: 247 });
        self.inject(ShimEvent::ServicesDiscovered {
            conn_id,
            chars: all_chars(),
        });
        for char_id in NOTIFY_SUBSCRIPTIONS {
            self.inject(ShimEvent::DescriptorWritten {
                conn_id,
                char_id,
                status: 0,
            });
        }
        for char_id in DEVICE_INFO_READS {
            let value = match char_id {
                CharId::DisFwVersion => fw_version.as_bytes().to_vec(),
                CharId::DisSerialNumber => b"SN0001\0".to_vec(),
                CharId::DisManufacturerName => b"Happy Health".to_vec(),
                _ => b"1.0".to_vec(),
            };
            self.inject(ShimEvent::CharacteristicRead {
                conn_id,
                char_id,
                value,
            });
        }
    }

    /// Tier2 handshake with nothing requested by the device.
    pub fn to_ready(&mut self, fw_version: &str) -> ConnectionId {
        let conn_id = self.bring_up(fw_version);
        self.respond(conn_id, daq_config_response());
        self.respond(conn_id, device_status(0, 0, 0, 0x04, 0));
        conn_id
    }

    pub fn state(&self, conn_id: ConnectionId) -> Option<ConnectionState> {
        self.api.connection_state(conn_id)
    }
}

/// Defaults with the crash-log drain off, so handshakes end at the last
/// configuration step.
pub fn test_config() -> HpyConfig {
    let mut config = HpyConfig::default();
    config.memfault.enabled = false;
    config
}

pub fn all_chars() -> HashSet<CharId> {
    NOTIFY_SUBSCRIPTIONS
        .iter()
        .chain(DEVICE_INFO_READS.iter())
        .copied()
        .chain([CharId::CmdRx, CharId::SuotaMemDev, CharId::SuotaPatchLen])
        .collect()
}

pub fn daq_config_response() -> Vec<u8> {
    vec![cmd::GET_DAQ_CONFIG, 1, 2]
}

/// 33-byte `GET_DEVICE_STATUS` response.
pub fn device_status(
    unsynced: u16,
    sync_frame_count: u32,
    sync_frame_reboots: u32,
    send_utc_flags: u8,
    notif_sender: u8,
) -> Vec<u8> {
    let mut buf = vec![0u8; 33];
    buf[0] = cmd::GET_DEVICE_STATUS;
    buf[1] = 0x01;
    buf[8..10].copy_from_slice(&3900u16.to_le_bytes());
    buf[10] = 80;
    buf[12..14].copy_from_slice(&unsynced.to_le_bytes());
    buf[14..18].copy_from_slice(&sync_frame_count.to_le_bytes());
    buf[18..22].copy_from_slice(&sync_frame_reboots.to_le_bytes());
    buf[27] = send_utc_flags;
    buf[30] = notif_sender;
    buf
}

pub fn set_utc_response() -> Vec<u8> {
    let mut buf = vec![0u8; 13];
    buf[0] = cmd::SET_UTC;
    buf[1..5].copy_from_slice(&UTC_SECONDS.to_le_bytes());
    buf[9..13].copy_from_slice(&3u32.to_le_bytes());
    buf
}

pub fn file_length_response(length: u32) -> Vec<u8> {
    let mut buf = vec![cmd::GET_FILE_LENGTH];
    buf.extend_from_slice(&length.to_le_bytes());
    buf
}

pub fn read_file_response(crc: u32) -> Vec<u8> {
    let mut buf = vec![cmd::READ_FILE];
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Terminal GATT batch notification `[0x17, crc LE, status]`.
pub fn batch_crc_response(crc: u32) -> Vec<u8> {
    let mut buf = vec![cmd::GET_FRAMES];
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.push(0);
    buf
}

pub fn frame(fill: u8) -> Vec<u8> {
    vec![fill; cmd::FRAME_SIZE]
}

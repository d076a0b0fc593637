//! End-to-end through the umbrella crate: a config file on disk, the tokio
//! driver and a limited-tier ring.

use hpy_ble::prelude::*;
use hpy_ble::protocol::model::{DEVICE_INFO_READS, NOTIFY_SUBSCRIPTIONS};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingShim {
    mtu_requests: Mutex<Vec<u16>>,
    disconnects: Mutex<Vec<ConnectionId>>,
    writes: Mutex<usize>,
}

impl BleShim for RecordingShim {
    fn scan_start(&self) {}
    fn scan_stop(&self) {}
    fn connect(&self, _conn_id: ConnectionId, _handle: &str) {}

    fn disconnect(&self, conn_id: ConnectionId) {
        self.disconnects.lock().push(conn_id);
    }

    fn discover_services(&self, _conn_id: ConnectionId) {}

    fn write_characteristic(
        &self,
        _conn_id: ConnectionId,
        _char_id: CharId,
        _data: &[u8],
        _write_type: WriteType,
    ) {
        *self.writes.lock() += 1;
    }

    fn read_characteristic(&self, _conn_id: ConnectionId, _char_id: CharId) {}
    fn subscribe_notifications(&self, _conn_id: ConnectionId, _char_id: CharId, _enable: bool) {}

    fn request_mtu(&self, _conn_id: ConnectionId, mtu: u16) {
        self.mtu_requests.lock().push(mtu);
    }

    fn read_rssi(&self, _conn_id: ConnectionId) {}
    fn l2cap_open(&self, _conn_id: ConnectionId, _psm: u16) {}
    fn l2cap_start_receiving(&self, _conn_id: ConnectionId, _expected_frames: u32) {}
    fn l2cap_close(&self, _conn_id: ConnectionId) {}

    fn l2cap_stream_send(
        &self,
        _conn_id: ConnectionId,
        _psm: u16,
        _image: Arc<[u8]>,
        _block_size: usize,
        _inter_block_delay: Duration,
    ) {
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("hpy_ble.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_config_file_feeds_defaults_for_missing_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[connection]\nrequested_mtu = 185\n\n[scan]\nmin_rssi = -70\n");

    let config = load_config(Some(&path), None).unwrap();
    assert_eq!(config.connection.requested_mtu, 185);
    assert_eq!(config.scan.min_rssi, -70);
    assert_eq!(config.download.batch_size, 64);
    assert_eq!(config.reconnect.max_attempts, 64);
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[connection]\nrequested_mtu = 600\n");
    assert!(load_config(Some(&path), None).is_err());
}

#[tokio::test]
async fn test_limited_ring_reaches_connected_limited() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[connection]\nrequested_mtu = 185\n");
    let config = load_config(Some(&path), None).unwrap();

    let shim = Arc::new(RecordingShim::default());
    let platform = HpyPlatform::spawn(shim.clone(), Arc::new(SystemTimeSource), config);
    let mut events = platform.subscribe();
    let callbacks = platform.callbacks();

    let conn_id = platform.connect("AA:BB:CC:DD:EE:01").await.unwrap().unwrap();
    callbacks.send(ShimEvent::Connected { conn_id }).unwrap();
    callbacks.send(ShimEvent::MtuChanged { conn_id, mtu: 185 }).unwrap();

    let chars: HashSet<CharId> = NOTIFY_SUBSCRIPTIONS
        .iter()
        .chain(DEVICE_INFO_READS.iter())
        .copied()
        .chain([CharId::CmdRx])
        .collect();
    callbacks
        .send(ShimEvent::ServicesDiscovered { conn_id, chars })
        .unwrap();
    for char_id in NOTIFY_SUBSCRIPTIONS {
        callbacks
            .send(ShimEvent::DescriptorWritten {
                conn_id,
                char_id,
                status: 0,
            })
            .unwrap();
    }
    for char_id in DEVICE_INFO_READS {
        let value = match char_id {
            CharId::DisFwVersion => b"1.5.0.3".to_vec(),
            _ => b"x".to_vec(),
        };
        callbacks
            .send(ShimEvent::CharacteristicRead {
                conn_id,
                char_id,
                value,
            })
            .unwrap();
    }

    let mut saw_info = false;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                HpyEvent::DeviceInfo { info, .. } => {
                    assert_eq!(info.fw_version, "1.5.0.3");
                    saw_info = true;
                }
                HpyEvent::StateChanged {
                    state: ConnectionState::ConnectedLimited,
                    ..
                } => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_info);

    assert_eq!(*shim.mtu_requests.lock(), vec![185]);
    // A limited ring gets no protocol commands.
    assert_eq!(*shim.writes.lock(), 0);
    let state = platform
        .call(move |api| api.connection_state(conn_id))
        .await
        .unwrap();
    assert_eq!(state, Some(ConnectionState::ConnectedLimited));

    platform.shutdown().await.unwrap();
    assert_eq!(*shim.disconnects.lock(), vec![conn_id]);
}

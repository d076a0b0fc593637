//! # hpy-ble - protocol engine for the HPY wearable ring
//!
//! The ring exposes a command/response service over BLE GATT (plus L2CAP
//! channels for bulk transfers). This crate drives up to eight rings at once:
//! connection setup, the firmware-tiered handshake, bulk data download with
//! CRC validation, SUOTA firmware updates, crash-log drain and automatic
//! reconnection. The host platform supplies the BLE radio through the
//! [`connection::BleShim`] trait and receives everything that happens as
//! [`connection::HpyEvent`]s.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! hpy-ble = "0.1"  # Default: runtime + observability
//! ```
//!
//! ```rust,no_run
//! use hpy_ble::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(shim: Arc<dyn BleShim>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config_or_default(None)?;
//! let platform = HpyPlatform::spawn(shim, Arc::new(SystemTimeSource), config);
//! let mut events = platform.subscribe();
//!
//! let conn_id = platform.connect("AA:BB:CC:DD:EE:01").await??;
//! while let Ok(event) = events.recv().await {
//!     if let HpyEvent::StateChanged { state: ConnectionState::Ready, .. } = event {
//!         platform.start_download(conn_id).await??;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Platform callbacks (connected, notifications, write acks, L2CAP progress)
//! are posted with [`connection::HpyPlatform::callbacks`].
//!
//! ## Feature Flags
//!
//! - **`runtime`** (default): the connection engine and the tokio driver
//! - **`observability`** (default): `tracing` subscriber setup and debug flags
//! - **`file-logging`**: daily-rolling file logs in addition to the console
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: hpy-config, hpy-protocol                   │
//! │  (TOML config, builders, parsers, CRC, models)          │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Engine: hpy-connection                                 │
//! │  (slots, registry, host façade, tokio driver)           │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Platform shim (host supplied)                          │
//! │  (Android / iOS / desktop BLE stack)                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

// Re-export foundation
pub use hpy_config as config;
pub use hpy_protocol as protocol;

// Re-export engine
#[cfg(feature = "runtime")]
pub use hpy_connection as connection;

#[cfg(feature = "observability")]
pub use hpy_observability as observability;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, load_config_or_default, HpyConfig};
    pub use crate::protocol::{
        CharId, DaqConfig, DeviceInfo, DeviceStatus, FirmwareTier, ProtocolError, ScannedDevice,
    };

    #[cfg(feature = "runtime")]
    pub use crate::connection::{
        ApiError, BleShim, ConnectionId, ConnectionState, ErrorCode, EventSink, HpyEvent,
        HpyPlatform, PlatformApi, ShimCallbackSender, ShimEvent, SystemTimeSource, TimeSource,
        Transport, WriteType,
    };

    #[cfg(feature = "observability")]
    pub use crate::observability::{init_logging, parse_debug_flags, CrateDebugFlags};
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # hpy-connection
//!
//! Per-connection protocol engine for the HPY ring.
//!
//! ## Layout
//!
//! - [`slot::ConnectionSlot`] orchestrates one ring: connect, service setup,
//!   handshake, download, firmware update and reconnection.
//! - The sub-controllers ([`handshake`], [`download`], [`fw_update`],
//!   [`reconnect`]) are pure state machines returning actions.
//! - [`registry::ConnectionRegistry`] holds up to eight slots and the scan
//!   results; [`api::PlatformApi`] is the host-facing façade on top of it.
//! - [`runtime::HpyPlatform`] runs the façade inside a tokio task.
//!
//! The platform supplies a [`shim::BleShim`], a [`shim::TimeSource`] and,
//! when not using the tokio driver, a [`timer::TimerScheduler`].

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod download;
pub mod error;
pub mod events;
pub mod fw_update;
pub mod handshake;
pub mod memfault;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod runtime;
pub mod shim;
pub mod slot;
pub mod timer;

pub use api::PlatformApi;
pub use error::{ApiError, Result, RuntimeError};
pub use events::{ConnectionId, ConnectionState, ErrorCode, HpyEvent, Transport, MAX_CONNECTIONS};
pub use memfault::{MemfaultBuffer, MemfaultChunkDescriptor};
pub use queue::{CommandQueue, CompletionPolicy, QueuedCommand, MAX_QUEUE_DEPTH};
pub use registry::ConnectionRegistry;
pub use runtime::{HpyPlatform, ShimCallbackSender, TokioTimerScheduler};
pub use shim::{BleShim, EventSink, ShimEvent, SystemTimeSource, TimeSource, WriteType};
pub use slot::{ConnectionSlot, SlotContext};
pub use timer::{FwCallback, TimerKind, TimerScheduler, TimerToken};

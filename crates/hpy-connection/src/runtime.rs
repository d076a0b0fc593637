// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tokio driver.
//!
//! [`HpyPlatform::spawn`] moves a [`PlatformApi`] into a single task that
//! owns every slot. Host calls, platform callbacks and fired timers all
//! arrive on one channel, so each connection sees exactly one input at a
//! time. Events fan out on a broadcast channel.

use crate::api::PlatformApi;
use crate::error::{ApiError, RuntimeError};
use crate::events::{ConnectionId, HpyEvent};
use crate::shim::{BleShim, EventSink, ShimEvent, TimeSource};
use crate::timer::{TimerScheduler, TimerToken};
use hpy_config::HpyConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the event broadcast channel. Slow subscribers lag past this.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

type Call = Box<dyn FnOnce(&mut PlatformApi) + Send>;

enum Message {
    Call(Call),
    Shim(ShimEvent),
    Timer(TimerToken),
    Shutdown,
}

/// [`TimerScheduler`] backed by `tokio::time::sleep` tasks.
pub struct TokioTimerScheduler {
    tx: mpsc::UnboundedSender<Message>,
    runtime: tokio::runtime::Handle,
    tasks: Arc<Mutex<HashMap<TimerToken, JoinHandle<()>>>>,
}

impl TokioTimerScheduler {
    fn new(tx: mpsc::UnboundedSender<Message>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            tx,
            runtime,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl TimerScheduler for TokioTimerScheduler {
    fn schedule(&self, token: TimerToken, after: Duration) {
        let tx = self.tx.clone();
        let tasks = Arc::clone(&self.tasks);
        // Held across spawn so the task cannot remove its entry before it exists.
        let mut guard = self.tasks.lock();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            tasks.lock().remove(&token);
            let _ = tx.send(Message::Timer(token));
        });
        guard.insert(token, handle);
    }

    fn cancel(&self, token: &TimerToken) {
        if let Some(handle) = self.tasks.lock().remove(token) {
            handle.abort();
        }
    }
}

struct BroadcastSink {
    tx: broadcast::Sender<HpyEvent>,
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: HpyEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Cloneable handle the platform adapter uses to report callbacks.
#[derive(Clone)]
pub struct ShimCallbackSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl ShimCallbackSender {
    /// Post a callback. Safe to call from any thread; returns
    /// [`RuntimeError::Shutdown`] once the driver has stopped.
    pub fn send(&self, event: ShimEvent) -> Result<(), RuntimeError> {
        self.tx
            .send(Message::Shim(event))
            .map_err(|_| RuntimeError::Shutdown)
    }
}

pub struct HpyPlatform {
    tx: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<HpyEvent>,
    task: JoinHandle<()>,
}

impl HpyPlatform {
    /// Start the driver task on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn spawn(shim: Arc<dyn BleShim>, time: Arc<dyn TimeSource>, config: HpyConfig) -> Self {
        let runtime = tokio::runtime::Handle::current();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let api = PlatformApi::new(
            shim,
            time,
            Arc::new(BroadcastSink { tx: events.clone() }),
            Arc::new(TokioTimerScheduler::new(tx.clone(), runtime.clone())),
            config,
        );
        let task = runtime.spawn(run(api, rx));
        info!("HPY platform driver started");

        Self { tx, events, task }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HpyEvent> {
        self.events.subscribe()
    }

    pub fn callbacks(&self) -> ShimCallbackSender {
        ShimCallbackSender {
            tx: self.tx.clone(),
        }
    }

    /// Run `f` on the driver task and return its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R, RuntimeError>
    where
        F: FnOnce(&mut PlatformApi) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let call: Call = Box::new(move |api| {
            let _ = reply_tx.send(f(api));
        });
        self.tx
            .send(Message::Call(call))
            .map_err(|_| RuntimeError::Shutdown)?;
        reply_rx.await.map_err(|_| RuntimeError::ReplyDropped)
    }

    pub async fn connect(&self, handle: impl Into<String>) -> Result<Result<ConnectionId, ApiError>, RuntimeError> {
        let handle = handle.into();
        self.call(move |api| api.connect(&handle)).await
    }

    pub async fn disconnect(&self, conn_id: ConnectionId) -> Result<Result<(), ApiError>, RuntimeError> {
        self.call(move |api| api.disconnect(conn_id)).await
    }

    pub async fn start_download(&self, conn_id: ConnectionId) -> Result<Result<(), ApiError>, RuntimeError> {
        self.call(move |api| api.start_download(conn_id)).await
    }

    /// Disconnect every slot and stop the driver.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        self.tx
            .send(Message::Shutdown)
            .map_err(|_| RuntimeError::Shutdown)?;
        self.task.await.map_err(|err| {
            warn!("driver task ended abnormally: {}", err);
            RuntimeError::Shutdown
        })
    }
}

async fn run(mut api: PlatformApi, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Call(call) => call(&mut api),
            Message::Shim(event) => api.handle_shim_event(event),
            Message::Timer(token) => api.on_timer(token),
            Message::Shutdown => {
                debug!("driver shutdown requested");
                break;
            }
        }
    }
    api.shutdown();
    info!("HPY platform driver stopped");
}

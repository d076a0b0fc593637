//! Connection registry.
//!
//! Fixed table of [`MAX_CONNECTIONS`] slots plus the scan results. A slot
//! lives from `connect` until it settles in `Disconnected`, at which point it
//! is torn down and its id becomes available again.

use crate::error::{ApiError, Result};
use crate::events::{ConnectionId, ConnectionState, ErrorCode, HpyEvent, MAX_CONNECTIONS};
use crate::shim::ShimEvent;
use crate::slot::{ConnectionSlot, SlotContext};
use crate::timer::TimerToken;
use hpy_protocol::ScannedDevice;
use tracing::{debug, info, warn};

pub struct ConnectionRegistry {
    ctx: SlotContext,
    slots: [Option<ConnectionSlot>; MAX_CONNECTIONS],
    discovered: Vec<ScannedDevice>,
    scanning: bool,
    next_instance: u64,
}

impl ConnectionRegistry {
    pub fn new(ctx: SlotContext) -> Self {
        info!(
            "Initializing connection registry (max_connections={}, min_rssi={})",
            MAX_CONNECTIONS, ctx.config.scan.min_rssi
        );
        Self {
            ctx,
            slots: Default::default(),
            discovered: Vec::new(),
            scanning: false,
            next_instance: 0,
        }
    }

    pub fn context(&self) -> &SlotContext {
        &self.ctx
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Clear previous results and ask the platform to scan.
    pub fn scan_start(&mut self) {
        self.discovered.clear();
        self.scanning = true;
        self.ctx.shim.scan_start();
    }

    pub fn scan_stop(&mut self) {
        self.scanning = false;
        self.ctx.shim.scan_stop();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn discovered_devices(&self) -> &[ScannedDevice] {
        &self.discovered
    }

    /// Record a scan result. Weak advertisers are dropped; a repeat address
    /// replaces the earlier entry.
    fn on_device_discovered(&mut self, device: ScannedDevice) {
        if device.rssi < self.ctx.config.scan.min_rssi {
            debug!("ignoring {} at {} dBm", device.address, device.rssi);
            return;
        }
        match self
            .discovered
            .iter_mut()
            .find(|d| d.address == device.address)
        {
            Some(existing) => *existing = device.clone(),
            None => self.discovered.push(device.clone()),
        }
        self.ctx.events.emit(HpyEvent::DeviceDiscovered { device });
    }

    // ========================================================================
    // Slots
    // ========================================================================

    /// Allocate the lowest free slot and start connecting.
    ///
    /// # Arguments
    /// * `handle` - Opaque device reference from a scan result
    pub fn connect(&mut self, handle: &str) -> Result<ConnectionId> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            warn!("Connection table full ({}/{})", MAX_CONNECTIONS, MAX_CONNECTIONS);
            self.ctx.events.emit(HpyEvent::error(
                ConnectionId::INVALID,
                ErrorCode::MaxConnections,
                format!("All {} connection slots in use", MAX_CONNECTIONS),
            ));
            return Err(ApiError::MaxConnections);
        };
        let conn_id = ConnectionId::from_index(index).ok_or(ApiError::InvalidConnId)?;

        self.next_instance += 1;
        let mut slot = ConnectionSlot::new(conn_id, self.next_instance, self.ctx.clone());
        slot.connect(handle);
        self.slots[index] = Some(slot);
        info!("✓ Connection allocated: {} -> {}", handle, conn_id);
        self.release_if_disconnected(conn_id);
        Ok(conn_id)
    }

    pub fn slot(&self, conn_id: ConnectionId) -> Option<&ConnectionSlot> {
        self.slots.get(conn_id.index()?)?.as_ref()
    }

    pub fn slot_mut(&mut self, conn_id: ConnectionId) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(conn_id.index()?)?.as_mut()
    }

    /// Run `f` against a slot, then free the slot if it ended up
    /// `Disconnected`.
    pub fn with_slot<R>(
        &mut self,
        conn_id: ConnectionId,
        f: impl FnOnce(&mut ConnectionSlot) -> R,
    ) -> Option<R> {
        let result = f(self.slot_mut(conn_id)?);
        self.release_if_disconnected(conn_id);
        Some(result)
    }

    pub fn state(&self, conn_id: ConnectionId) -> Option<ConnectionState> {
        self.slot(conn_id).map(ConnectionSlot::state)
    }

    pub fn active_connections(&self) -> Vec<ConnectionId> {
        self.slots
            .iter()
            .flatten()
            .map(ConnectionSlot::conn_id)
            .collect()
    }

    /// Drop a slot without a disconnect sequence.
    pub fn destroy(&mut self, conn_id: ConnectionId) {
        let Some(index) = conn_id.index() else { return };
        if let Some(mut slot) = self.slots.get_mut(index).and_then(Option::take) {
            slot.teardown();
            debug!("{} released", conn_id);
        }
    }

    /// Disconnect and release every slot.
    pub fn shutdown(&mut self) {
        for conn_id in self.active_connections() {
            if let Some(slot) = self.slot_mut(conn_id) {
                slot.disconnect();
            }
            self.destroy(conn_id);
        }
        if self.scanning {
            self.scan_stop();
        }
    }

    fn release_if_disconnected(&mut self, conn_id: ConnectionId) {
        if self.state(conn_id) == Some(ConnectionState::Disconnected) {
            self.destroy(conn_id);
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    pub fn handle_shim_event(&mut self, event: ShimEvent) {
        let conn_id = match event {
            ShimEvent::DeviceDiscovered { device } => {
                self.on_device_discovered(device);
                return;
            }
            ref other => other.conn_id(),
        };
        let Some(conn_id) = conn_id else { return };
        if self.with_slot(conn_id, |slot| slot.handle_shim_event(event)).is_none() {
            debug!("event for released {} dropped", conn_id);
        }
    }

    pub fn on_timer(&mut self, token: TimerToken) {
        self.with_slot(token.conn_id, |slot| slot.on_timer(token));
    }
}

//! Display session
//!
//! [`HwcSession`] is the entry point for every client call. It owns the slot
//! registry and routes each per-display operation through the two-level lock
//! discipline:
//!
//! 1. take the slot's power-state lock briefly and, if an asynchronous power
//!    change is in flight, substitute the slot's dummy alias;
//! 2. take the (possibly substituted) slot's operation lock;
//! 3. fail with an invalid-display error if nothing is bound there;
//! 4. run the operation and release.
//!
//! The cross-display coordinators (hotplug, power, secure session, virtual
//! displays, commit bookkeeping, administrative commands) live in the
//! submodules and all go through the same routing.

mod admin;
mod commit;
mod display_ops;
mod hotplug;
mod power;
mod secure;
mod virtual_display;

pub use admin::{AdminCommand, AdminReply, TransitionEvent};
pub use secure::SecurePhase;
pub use virtual_display::VirtualDisplayData;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::callbacks::{Callbacks, NotificationSink};
use crate::config::SessionConfig;
use crate::cwb::{CaptureTarget, CwbPipeline, CwbStatus};
use crate::device::{CompositionCore, DisplayEventHandler};
use crate::display::HwcDisplay;
use crate::error::{HwcError, HwcResult};
use crate::layer::Layer;
use crate::locker::Locker;
use crate::registry::{DisplayRegistry, SlotState};
use crate::types::{BufferHandle, CwbConfig, DisplayId, DisplayKind, LayerId};
use crate::uevent::{HotplugEvent, UEventHub, UEventListener};

use admin::IdlePcState;
use hotplug::{HotplugState, ResourceState};
use secure::SecureState;

/// Where an operation addressed to a display actually runs.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    id: DisplayId,
    redirected: bool,
    secure_transition: bool,
}

pub struct HwcSession {
    config: SessionConfig,
    core: Arc<dyn CompositionCore>,
    registry: DisplayRegistry,
    callbacks: Callbacks,
    cwb: CwbPipeline,
    /// Commits take the read side, administrative commands the write side.
    command_seq: RwLock<()>,
    primary: Locker<DisplayId>,
    /// Serializes config switches across displays.
    display_config: Mutex<()>,
    secure: Locker<SecureState>,
    hotplug: Locker<HotplugState>,
    resources: Locker<ResourceState>,
    virtuals: Mutex<HashMap<DisplayId, VirtualDisplayData>>,
    idle_pc: Mutex<IdlePcState>,
    epoch: Instant,
    weak_self: Weak<HwcSession>,
}

impl HwcSession {
    /// Build a session on top of `core` and bind the displays it reports.
    ///
    /// Failing to reach the composition core is the only fatal condition;
    /// displays that cannot be created come up degraded instead.
    pub fn new(core: Arc<dyn CompositionCore>, config: SessionConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = DisplayRegistry::new(config.display.layout())
            .map_err(|e| anyhow!("invalid slot layout: {}", e))?;
        let timeouts = config.timeouts.clone();

        let session = Arc::new_cyclic(|weak: &Weak<HwcSession>| {
            let target: Weak<dyn CaptureTarget> = weak.clone();
            Self {
                callbacks: Callbacks::new(timeouts.client_hotplug_wait()),
                cwb: CwbPipeline::new(target, timeouts.cwb_completion()),
                config,
                core,
                registry,
                command_seq: RwLock::new(()),
                primary: Locker::new(0),
                display_config: Mutex::new(()),
                secure: Locker::default(),
                hotplug: Locker::default(),
                resources: Locker::default(),
                virtuals: Mutex::new(HashMap::new()),
                idle_pc: Mutex::new(IdlePcState::default()),
                epoch: Instant::now(),
                weak_self: weak.clone(),
            }
        });

        session
            .init()
            .context("Failed to initialize display session")?;
        Ok(session)
    }

    fn init(&self) -> Result<()> {
        info!("🏗️ Initializing display session...");
        let handler: Weak<dyn DisplayEventHandler> = self.weak_self.clone();
        self.core.set_event_handler(handler);

        let infos = self
            .core
            .query_displays()
            .map_err(|e| anyhow!("composition core unavailable: {}", e))?;

        let mut builtins: Vec<_> = infos
            .iter()
            .filter(|i| i.kind == DisplayKind::Builtin && i.is_connected)
            .collect();
        builtins.sort_by_key(|i| !i.is_primary);
        if builtins.is_empty() {
            warn!("⚠️ No builtin display reported; primary starts degraded");
        }

        let builtin_slots: Vec<DisplayId> = self
            .registry
            .slots_of(DisplayKind::Builtin)
            .map(|s| s.id())
            .collect();
        for (index, id) in builtin_slots.into_iter().enumerate() {
            let slot = self.registry.slot(id)?;
            match builtins.get(index) {
                Some(info) => self.bind_physical(slot, info, false),
                None if id == self.registry.primary().id() => self.bind_placeholder(slot, "primary"),
                None => {}
            }
        }

        for info in infos
            .iter()
            .filter(|i| i.kind == DisplayKind::Pluggable && i.is_connected && i.capabilities_ready)
        {
            match self.registry.free_slot(DisplayKind::Pluggable) {
                Some(slot) => self.bind_physical(slot, info, false),
                None => warn!("⚠️ No free pluggable slot for {}", info.name),
            }
        }

        let idle_timeout = self.config.general.idle_timeout_ms;
        if idle_timeout > 0 {
            self.apply_idle_timeout(idle_timeout);
        }

        info!(
            "✅ Display session ready: {} slot(s), {} bound",
            self.registry.len(),
            self.registry.slots().filter(|s| s.is_bound()).count()
        );
        Ok(())
    }

    /// Receive device events from the process-wide listener.
    pub fn attach_listener(&self, hub: &UEventHub) {
        let listener: Weak<dyn UEventListener> = self.weak_self.clone();
        hub.register(listener);
    }

    /// Register the client's notification sink and announce every display
    /// that is already up.
    pub fn register_callback(&self, sink: Arc<dyn NotificationSink>) {
        self.callbacks.register(sink);
        let connected: Vec<DisplayId> = self
            .registry
            .slots()
            .filter(|s| matches!(s.kind(), DisplayKind::Builtin | DisplayKind::Pluggable))
            .filter(|s| matches!(s.state(), SlotState::Connected | SlotState::Dummy))
            .map(|s| s.id())
            .collect();
        for id in connected {
            self.notify_hotplug(id, true);
        }
    }

    pub fn unregister_callback(&self) {
        self.callbacks.unregister();
    }

    /// Stop capture workers and detach the client.
    pub fn shutdown(&self) {
        info!("🔽 Shutting down display session...");
        self.cwb.teardown_all();
        self.callbacks.unregister();
        info!("✅ Display session shutdown complete");
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &DisplayRegistry {
        &self.registry
    }

    pub fn primary_display(&self) -> DisplayId {
        *self.primary.lock()
    }

    pub fn slot_state(&self, display: DisplayId) -> HwcResult<SlotState> {
        Ok(self.registry.slot(display)?.state())
    }

    /// The display came up showing a sink-requested test pattern.
    pub fn is_test_pattern(&self, display: DisplayId) -> HwcResult<bool> {
        Ok(self.registry.slot(display)?.op.lock().test_pattern)
    }

    /// A client is registered and the primary has committed a frame.
    pub fn is_ready(&self) -> bool {
        if !self.callbacks.is_registered() {
            return false;
        }
        self.registry
            .slot(self.primary_display())
            .map(|s| s.commit.lock().frames > 0)
            .unwrap_or(false)
    }

    // --- routing ---

    fn resolve(&self, display: DisplayId) -> HwcResult<Resolved> {
        let slot = self.registry.slot(display)?;
        if slot.kind() == DisplayKind::Dummy {
            return Err(HwcError::BadDisplay);
        }
        let power = slot.power.lock();
        let (id, redirected) = match (power.transition, slot.alias()) {
            (true, Some(alias)) => (alias, true),
            _ => (display, false),
        };
        Ok(Resolved {
            id,
            redirected,
            secure_transition: power.secure_transition,
        })
    }

    fn with_display<R>(
        &self,
        id: DisplayId,
        op: impl FnOnce(&mut HwcDisplay) -> HwcResult<R>,
    ) -> HwcResult<R> {
        let slot = self.registry.slot(id)?;
        let mut data = slot.op.lock();
        op(data.display_mut()?)
    }

    pub(crate) fn call_display_function<R>(
        &self,
        display: DisplayId,
        op: impl FnOnce(&mut HwcDisplay) -> HwcResult<R>,
    ) -> HwcResult<R> {
        let target = self.resolve(display)?;
        if target.redirected {
            trace!("display {} redirected to alias {}", display, target.id);
        }
        self.with_display(target.id, op)
    }

    pub(crate) fn call_layer_function<R>(
        &self,
        display: DisplayId,
        layer: LayerId,
        op: impl FnOnce(&mut Layer) -> HwcResult<R>,
    ) -> HwcResult<R> {
        self.call_display_function(display, |d| d.with_layer(layer, op))
    }

    fn notify_hotplug(&self, display: DisplayId, connected: bool) {
        if let Err(e) = self.callbacks.hotplug(display, connected) {
            warn!(
                "⚠️ Hotplug ({}) for display {} not delivered: {}",
                if connected { "connect" } else { "disconnect" },
                display,
                e
            );
        }
    }

    fn request_refresh(&self, display: DisplayId) {
        if let Ok(slot) = self.registry.slot(display) {
            slot.commit.update(|c| c.pending_refresh = true);
        }
        if self.callbacks.refresh(display).is_err() {
            debug!("refresh for display {} dropped: no client", display);
        }
    }

    fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    fn arc(&self) -> Option<Arc<HwcSession>> {
        self.weak_self.upgrade()
    }
}

impl DisplayEventHandler for HwcSession {
    fn cwb_done(&self, display: DisplayId, status: i32, handle_id: u64) {
        self.cwb
            .notify_cwb_status(display, CwbStatus::from_core(status), handle_id);
    }

    fn vm_release_done(&self, display: DisplayId) {
        if let Ok(slot) = self.registry.slot(display) {
            slot.vm_release.update(|pending| *pending = false);
            debug!("VM released display {}", display);
        }
    }

    fn refresh(&self, display: DisplayId) {
        self.request_refresh(display);
    }

    fn vsync(&self, display: DisplayId, timestamp_ns: i64, period_ns: u32) {
        let enabled = self
            .registry
            .slot(display)
            .map(|s| s.vsync_enabled())
            .unwrap_or(false);
        if enabled {
            let _ = self.callbacks.vsync(display, timestamp_ns, period_ns);
        }
    }
}

impl CaptureTarget for HwcSession {
    fn submit_capture(
        &self,
        display: DisplayId,
        config: &CwbConfig,
        buffer: &BufferHandle,
        handle_id: u64,
    ) -> HwcResult<()> {
        let target = self.resolve(display)?;
        if target.secure_transition {
            debug!("capture {} on display {} refused: secure transition", handle_id, display);
            return Err(HwcError::TransitionInProgress);
        }
        self.with_display(target.id, |d| {
            d.device_mut().submit_capture(config, buffer, handle_id)
        })
    }
}

impl UEventListener for HwcSession {
    fn on_hotplug_event(&self, event: HotplugEvent) {
        self.handle_hotplug_event(event);
    }
}

//! Hotplug and slot lifecycle.
//!
//! Device events are coalesced to one pending event per category. They are
//! applied right away once the session is ready, otherwise they wait for the
//! primary display's first commit. Applying an event enumerates the core
//! (bounded by the external connection timeout), binds or unbinds slots, and
//! tells the client.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use super::HwcSession;
use crate::device::DisplayDevice;
use crate::display::{DummyDisplay, HwcDisplay};
use crate::error::{HwcError, HwcResult};
use crate::registry::{CommitState, Slot, SlotState};
use crate::types::{DisplayId, DisplayKind, HwDisplayInfo};
use crate::uevent::{HotplugCategory, HotplugEvent};

#[derive(Debug, Default)]
pub(super) struct HotplugState {
    pub(super) pending: BTreeMap<HotplugCategory, HotplugEvent>,
    pub(super) processing: bool,
}

/// Pluggable connects wait until the active builtin has released shared
/// pipeline resources with a fresh commit.
#[derive(Debug, Default)]
pub(super) struct ResourceState {
    pub(super) waiting: bool,
}

enum Enumeration {
    Ready(Vec<HwDisplayInfo>),
    /// Nothing new is connected; the event was stale.
    Spurious,
    /// The core never reported a usable display in time.
    Failed,
}

fn kind_of(category: HotplugCategory) -> DisplayKind {
    match category {
        HotplugCategory::Builtin => DisplayKind::Builtin,
        HotplugCategory::Pluggable => DisplayKind::Pluggable,
    }
}

impl HwcSession {
    /// Entry point for device events.
    pub fn handle_hotplug_event(&self, event: HotplugEvent) {
        let coalesced = self
            .hotplug
            .update(|h| h.pending.insert(event.category, event).is_some());
        if coalesced {
            debug!("coalesced pending {:?} hotplug event", event.category);
        }
        if !self.is_ready() {
            info!(
                "⏳ Session not ready; deferring {:?} hotplug until the primary commits",
                event.category
            );
            return;
        }
        self.process_pending_hotplug();
    }

    /// Number of hotplug events waiting to be applied.
    pub fn pending_hotplug_count(&self) -> usize {
        self.hotplug.lock().pending.len()
    }

    /// Apply every pending hotplug event. Only one caller drains at a time;
    /// a failed event stays pending unless a newer one replaced it.
    pub fn process_pending_hotplug(&self) -> usize {
        let claimed = self.hotplug.update(|h| {
            if h.processing || h.pending.is_empty() {
                false
            } else {
                h.processing = true;
                true
            }
        });
        if !claimed {
            return 0;
        }

        let mut handled = 0;
        loop {
            let next = self.hotplug.update(|h| {
                let next = h.pending.pop_first();
                if next.is_none() {
                    h.processing = false;
                }
                next
            });
            let Some((category, event)) = next else {
                break;
            };
            match self.apply_hotplug(event) {
                Ok(()) => handled += 1,
                Err(e) => {
                    warn!("⚠️ {:?} hotplug failed, will retry: {}", category, e);
                    self.hotplug.update(|h| {
                        h.pending.entry(category).or_insert(event);
                        h.processing = false;
                    });
                    break;
                }
            }
        }
        handled
    }

    /// Drain pending hotplug off the calling thread.
    pub(super) fn schedule_pending_hotplug(&self) {
        let idle = {
            let h = self.hotplug.lock();
            !h.pending.is_empty() && !h.processing
        };
        if !idle {
            return;
        }
        let Some(session) = self.arc() else {
            return;
        };
        let spawned = thread::Builder::new()
            .name("hwc-hotplug".into())
            .spawn(move || {
                session.process_pending_hotplug();
            });
        if let Err(e) = spawned {
            warn!("⚠️ Could not start hotplug worker: {}", e);
        }
    }

    fn apply_hotplug(&self, event: HotplugEvent) -> HwcResult<()> {
        let kind = kind_of(event.category);
        if event.connected {
            self.connect_displays(kind, event)
        } else {
            self.disconnect_displays(kind);
            Ok(())
        }
    }

    fn connect_displays(&self, kind: DisplayKind, event: HotplugEvent) -> HwcResult<()> {
        let test_pattern = event.hpd_pattern != 0;
        let mut connected = Vec::new();

        match self.enumerate(kind) {
            Enumeration::Spurious => {
                debug!("{:?} connect event with nothing new to bind", kind);
                return Ok(());
            }
            Enumeration::Ready(infos) => {
                if kind == DisplayKind::Pluggable {
                    self.wait_for_resources()?;
                }
                for info in &infos {
                    // Slots only free up on a disconnect, which arrives as its own event.
                    let Some(slot) = self.slot_for_connect(kind) else {
                        warn!("⚠️ No free {:?} slot for {}; ignoring it", kind, info.name);
                        break;
                    };
                    if test_pattern {
                        info!("🧪 Display {} comes up in test-pattern mode (bpp {})", slot.id(), event.hpd_bpp);
                    }
                    self.bind_physical(slot, info, test_pattern);
                    connected.push(slot.id());
                }
            }
            Enumeration::Failed => {
                let Some(slot) = self.slot_for_connect(kind) else {
                    warn!("⚠️ {:?} display failed to enumerate and no slot is free", kind);
                    return Ok(());
                };
                warn!(
                    "⚠️ {:?} display did not enumerate within {:?}; showing placeholder on {}",
                    kind,
                    self.config.timeouts.external_connection(),
                    slot.id()
                );
                self.bind_placeholder(slot, "external");
                connected.push(slot.id());
            }
        }

        for id in connected {
            self.notify_hotplug(id, true);
        }
        Ok(())
    }

    /// Poll the core until every newly connected display of `kind` reports
    /// its full capability set, bounded by the external connection timeout.
    fn enumerate(&self, kind: DisplayKind) -> Enumeration {
        let timeouts = &self.config.timeouts;
        let deadline = Instant::now() + timeouts.external_connection();
        let mut saw_any = false;

        loop {
            match self.core.query_displays() {
                Ok(infos) => {
                    let fresh: Vec<HwDisplayInfo> = infos
                        .into_iter()
                        .filter(|i| i.kind == kind && i.is_connected)
                        .filter(|i| self.registry.slot_for_device(kind, i.device_id).is_none())
                        .collect();
                    if !fresh.is_empty() {
                        saw_any = true;
                        if fresh.iter().all(|i| i.capabilities_ready) {
                            return Enumeration::Ready(fresh);
                        }
                    }
                }
                Err(e) => {
                    saw_any = true;
                    debug!("display enumeration failed: {}", e);
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(timeouts.enumeration_poll());
        }

        if saw_any {
            Enumeration::Failed
        } else {
            Enumeration::Spurious
        }
    }

    /// A degraded slot of `kind` is reused before a free one.
    fn slot_for_connect(&self, kind: DisplayKind) -> Option<&Slot> {
        self.registry
            .slots_of(kind)
            .find(|s| s.state() == SlotState::Dummy)
            .or_else(|| self.registry.free_slot(kind))
    }

    fn disconnect_displays(&self, kind: DisplayKind) {
        let connected: Vec<i32> = self
            .core
            .query_displays()
            .map(|infos| {
                infos
                    .into_iter()
                    .filter(|i| i.kind == kind && i.is_connected)
                    .map(|i| i.device_id)
                    .collect()
            })
            .unwrap_or_default();

        let gone: Vec<DisplayId> = self
            .registry
            .slots_of(kind)
            .filter(|s| {
                let data = s.op.lock();
                let placeholder = data.device_id < 0 && kind == DisplayKind::Pluggable;
                data.display.is_some() && (placeholder || !connected.contains(&data.device_id))
            })
            .map(|s| s.id())
            .collect();

        if gone.is_empty() {
            debug!("{:?} disconnect event with nothing to remove", kind);
            return;
        }

        for &id in &gone {
            self.unbind(id);
            self.notify_hotplug(id, false);
        }
        self.reassign_primary(&gone);
    }

    /// Bind `info` to `slot`, or a placeholder when the core cannot create
    /// the device.
    pub(super) fn bind_physical(&self, slot: &Slot, info: &HwDisplayInfo, test_pattern: bool) {
        slot.op.update(|d| d.state = SlotState::PendingConnect);

        let device: Box<dyn DisplayDevice> = match self.core.create_display(slot.id(), info) {
            Ok(device) => device,
            Err(e) => {
                warn!(
                    "⚠️ Could not create display {} ({}): {}; using placeholder",
                    slot.id(),
                    info.name,
                    e
                );
                Box::new(DummyDisplay::placeholder(info.name.clone()))
            }
        };
        let degraded = device.kind() == DisplayKind::Dummy;
        let device_id = if degraded { -1 } else { info.device_id };
        self.install(slot, device, device_id, test_pattern);

        info!(
            "🖥️ Display {} bound to {} (device {}){}",
            slot.id(),
            info.name,
            device_id,
            if degraded { " [degraded]" } else { "" }
        );
    }

    pub(super) fn bind_placeholder(&self, slot: &Slot, name: &str) {
        slot.op.update(|d| d.state = SlotState::PendingConnect);
        let device = Box::new(DummyDisplay::placeholder(name));
        self.install(slot, device, -1, false);
        info!("🖥️ Display {} bound to a placeholder", slot.id());
    }

    fn install(&self, slot: &Slot, device: Box<dyn DisplayDevice>, device_id: i32, test_pattern: bool) {
        let attributes = device.attributes(device.active_config()).ok();
        let name = device.name();
        let state = if device.kind() == DisplayKind::Dummy {
            SlotState::Dummy
        } else {
            SlotState::Connected
        };

        let previous = slot.op.update(|d| {
            let previous = d.display.replace(HwcDisplay::new(slot.id(), device));
            d.device_id = device_id;
            d.test_pattern = test_pattern;
            d.state = state;
            previous
        });
        if let Some(previous) = previous {
            self.release_device(previous);
        }
        slot.commit.update(|c| *c = CommitState::default());

        if let (Some(alias), Some(attributes)) = (slot.alias(), attributes) {
            if let Ok(alias_slot) = self.registry.slot(alias) {
                let dummy = DummyDisplay::new(format!("{}-alias", name), attributes);
                alias_slot.op.update(|d| {
                    d.display = Some(HwcDisplay::new(alias, Box::new(dummy)));
                    d.state = SlotState::Dummy;
                });
            }
        }
    }

    /// Tear a slot down: captures first, then the display and its alias.
    pub(super) fn unbind(&self, id: DisplayId) {
        let Ok(slot) = self.registry.slot(id) else {
            return;
        };
        let failed = self.cwb.teardown(id);
        if failed > 0 {
            debug!("failed {} capture(s) while unbinding display {}", failed, id);
        }

        let previous = slot.op.update(|d| {
            d.state = SlotState::PendingDisconnect;
            let previous = d.display.take();
            d.device_id = -1;
            d.test_pattern = false;
            d.state = SlotState::Disconnected;
            previous
        });
        slot.set_vsync_enabled(false);
        slot.commit.update(|c| *c = CommitState::default());
        if let Some(previous) = previous {
            self.release_device(previous);
        }

        if let Some(alias) = slot.alias() {
            if let Ok(alias_slot) = self.registry.slot(alias) {
                alias_slot.op.update(|d| {
                    d.display = None;
                    d.state = SlotState::Disconnected;
                });
            }
        }
        info!("🔌 Display {} unbound", id);
    }

    /// Placeholders never came from the core and are simply dropped.
    pub(super) fn release_device(&self, display: HwcDisplay) {
        if display.kind() == DisplayKind::Dummy {
            return;
        }
        self.core.destroy_display(display.into_device());
    }

    fn reassign_primary(&self, removed: &[DisplayId]) {
        let current = self.primary_display();
        if !removed.contains(&current) {
            return;
        }
        let candidate = self
            .registry
            .slots_of(DisplayKind::Builtin)
            .chain(self.registry.slots_of(DisplayKind::Pluggable))
            .find(|s| s.state() == SlotState::Connected)
            .map(|s| s.id());
        match candidate {
            Some(next) => {
                self.primary.update(|p| *p = next);
                info!("👑 Primary display moved from {} to {}", current, next);
            }
            None => warn!("⚠️ Primary display {} removed and no replacement is connected", current),
        }
    }

    /// Wait for the active builtin to commit once more so shared pipeline
    /// resources are free for a new pluggable display.
    pub fn wait_for_resources(&self) -> HwcResult<()> {
        let primary = self.primary_display();
        let active = self
            .registry
            .slot(primary)
            .map(|s| {
                s.op
                    .lock()
                    .display
                    .as_ref()
                    .map(|d| d.power_mode().is_active())
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if !active {
            return Ok(());
        }

        self.resources.update(|r| r.waiting = true);
        self.request_refresh(primary);

        let timeouts = &self.config.timeouts;
        let mut guard = self.resources.lock();
        let outcome = self.resources.wait_with_retry(
            &mut guard,
            timeouts.commit_done_interval(),
            timeouts.commit_done_retries,
            |r| !r.waiting,
        );
        guard.waiting = false;
        if outcome.is_satisfied() {
            Ok(())
        } else {
            warn!("⚠️ Display {} did not release resources in time", primary);
            Err(HwcError::NoResources)
        }
    }

    /// Post-commit hook of the active builtin.
    pub(super) fn mark_resources_ready(&self) {
        self.resources.update(|r| r.waiting = false);
    }
}

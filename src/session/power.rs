//! Power-mode transitions.
//!
//! Builtin panels with a dummy alias change power in the background: the
//! request mirrors the layer stack onto the alias, raises the slot's
//! transition flag and returns. Until the real panel has switched, every
//! operation addressed to the slot lands on the alias. The background thread
//! then copies the stack back, clears the flag and wakes waiters.
//!
//! Lock nesting here is always power → operation, never the reverse.

use log::{debug, info, warn};
use std::thread;

use super::HwcSession;
use crate::error::{HwcError, HwcResult};
use crate::registry::Slot;
use crate::types::{DisplayId, DisplayKind, PowerMode};

impl HwcSession {
    pub fn set_power_mode(&self, display: DisplayId, mode: PowerMode) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        if slot.kind() == DisplayKind::Dummy || !slot.is_bound() {
            return Err(HwcError::BadDisplay);
        }
        if matches!(mode, PowerMode::Doze | PowerMode::DozeSuspend)
            && slot.kind() != DisplayKind::Builtin
        {
            return Err(HwcError::Unsupported);
        }

        match slot.alias() {
            Some(alias) if self.config.display.async_power_mode => {
                self.set_power_mode_async(slot, alias, mode)
            }
            _ => self.set_power_mode_sync(slot, mode),
        }
    }

    /// Current mode as seen by clients; a pending mode counts as applied.
    pub fn get_power_mode(&self, display: DisplayId) -> HwcResult<PowerMode> {
        let slot = self.registry.slot(display)?;
        if slot.kind() == DisplayKind::Dummy {
            return Err(HwcError::BadDisplay);
        }
        if let Some(mode) = slot.power.lock().pending_mode {
            return Ok(mode);
        }
        self.with_display(display, |d| Ok(d.power_mode()))
    }

    /// Whether an asynchronous power change is applying on `display`.
    pub fn is_power_transition_pending(&self, display: DisplayId) -> HwcResult<bool> {
        Ok(self.registry.slot(display)?.power.lock().transition)
    }

    /// Block (bounded) until no power change is in flight on `display`.
    pub fn wait_for_power_transition(&self, display: DisplayId) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        let mut power = slot.power.lock();
        let outcome = slot.power.wait_until(
            &mut power,
            self.config.timeouts.power_transition(),
            |p| !p.transition,
        );
        if outcome.is_satisfied() {
            Ok(())
        } else {
            Err(HwcError::TransitionInProgress)
        }
    }

    fn set_power_mode_sync(&self, slot: &Slot, mode: PowerMode) -> HwcResult<()> {
        self.wait_for_power_transition(slot.id())?;
        if slot.power.lock().secure_transition {
            return Err(HwcError::TransitionInProgress);
        }
        self.with_display(slot.id(), |d| d.set_power_mode(mode))?;
        info!("⚡ Display {} power mode {:?}", slot.id(), mode);
        Ok(())
    }

    fn set_power_mode_async(&self, slot: &Slot, alias: DisplayId, mode: PowerMode) -> HwcResult<()> {
        let display = slot.id();
        let alias_slot = self.registry.slot(alias)?;
        {
            let mut power = slot.power.lock();
            let idle = slot.power.wait_until(
                &mut power,
                self.config.timeouts.power_transition(),
                |p| !p.transition,
            );
            if !idle.is_satisfied() || power.secure_transition {
                return Err(HwcError::TransitionInProgress);
            }

            let (layers, current) = {
                let data = slot.op.lock();
                let real = data.display()?;
                (real.layers().clone(), real.power_mode())
            };
            if current == mode {
                return Ok(());
            }
            {
                let mut data = alias_slot.op.lock();
                let dummy = data.display_mut()?;
                dummy.replace_layers(layers);
                dummy.set_power_mode(mode)?;
            }
            power.transition = true;
            power.pending_mode = Some(mode);
        }
        debug!("display {} redirected to alias {} for {:?}", display, alias, mode);

        let Some(session) = self.arc() else {
            return self.finish_power_transition(display, alias, mode);
        };
        let spawned = thread::Builder::new()
            .name(format!("hwc-power-{}", display))
            .spawn(move || {
                if let Err(e) = session.finish_power_transition(display, alias, mode) {
                    warn!("⚠️ Power mode {:?} on display {} failed: {}", mode, display, e);
                }
            });
        if let Err(e) = spawned {
            warn!("⚠️ Could not start power transition thread: {}; applying inline", e);
            return self.finish_power_transition(display, alias, mode);
        }
        Ok(())
    }

    /// Apply `mode` on the real panel and hand the slot back to it.
    fn finish_power_transition(
        &self,
        display: DisplayId,
        alias: DisplayId,
        mode: PowerMode,
    ) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        let alias_slot = self.registry.slot(alias)?;

        // The flag keeps clients on the alias, so nothing else contends here
        // beyond the event paths.
        let applied = self.with_display(display, |d| d.set_power_mode(mode));

        {
            let mut power = slot.power.lock();
            let layers = alias_slot
                .op
                .lock()
                .display()
                .map(|d| d.layers().clone());
            if let Ok(layers) = layers {
                if let Some(real) = slot.op.lock().display.as_mut() {
                    real.replace_layers(layers);
                }
            }
            power.transition = false;
            power.pending_mode = None;
        }
        slot.power.notify_all();

        match &applied {
            Ok(()) => info!("⚡ Display {} power mode {:?}", display, mode),
            Err(e) => warn!("⚠️ Display {} stays in its previous power mode: {}", display, e),
        }
        if mode.is_active() {
            self.request_refresh(display);
        }
        applied
    }
}

//! Secure ("trusted UI") session transitions.
//!
//! One display at a time, process-wide, may run the four-phase protocol:
//!
//! - **Prepare** reserves the display; refused while any display is mid
//!   power or secure transition. Pending captures are failed so no protected
//!   frame is written back.
//! - **Start** waits (bounded) for the VM to release the panel, then switches.
//! - **End** switches back.
//! - **Unprepare** drops the reservation and asks the client for a frame.
//!
//! Commits on the reserved display fail with transition-in-progress from
//! Prepare until Unprepare.

use log::{debug, info, warn};

use super::HwcSession;
use crate::error::{HwcError, HwcResult};
use crate::types::{DisplayId, DisplayKind, SecureEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurePhase {
    #[default]
    Idle,
    Prepared,
    Started,
    Ended,
}

#[derive(Debug, Default)]
pub(super) struct SecureState {
    pub(super) display: Option<DisplayId>,
    pub(super) phase: SecurePhase,
    /// Process-wide secure-session-active flag.
    pub(super) active: bool,
}

impl HwcSession {
    pub fn prepare_secure_session(&self, display: DisplayId) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        if slot.kind() != DisplayKind::Builtin {
            return Err(if slot.kind() == DisplayKind::Dummy {
                HwcError::BadDisplay
            } else {
                HwcError::Unsupported
            });
        }
        if !slot.is_bound() {
            return Err(HwcError::BadDisplay);
        }

        {
            let mut secure = self.secure.lock();
            if secure.display.is_some() {
                return Err(HwcError::TransitionInProgress);
            }
            let busy = self.registry.slots().any(|s| {
                let power = s.power.lock();
                power.transition || power.secure_transition
            });
            if busy {
                return Err(HwcError::TransitionInProgress);
            }
            slot.power.update(|p| p.secure_transition = true);
            secure.display = Some(display);
            secure.phase = SecurePhase::Prepared;
        }

        let drained = self.cwb.teardown(display);
        if drained > 0 {
            debug!("failed {} capture(s) ahead of secure session", drained);
        }
        info!("🔒 Secure session prepared on display {}", display);
        Ok(())
    }

    pub fn start_secure_session(&self, display: DisplayId) -> HwcResult<()> {
        let mut secure = self.secure.lock();
        self.check_phase(&secure, display, &[SecurePhase::Prepared])?;

        let slot = self.registry.slot(display)?;
        slot.vm_release.update(|pending| *pending = true);
        let handed_over = self.with_display(display, |d| {
            d.device_mut().handle_secure_event(SecureEvent::Start)
        });
        match handed_over {
            Ok(()) => {}
            Err(HwcError::Unsupported) => {
                // No VM handshake on this device.
                slot.vm_release.update(|pending| *pending = false);
            }
            Err(e) => {
                slot.vm_release.update(|pending| *pending = false);
                return Err(e);
            }
        }

        if let Err(e) = self.wait_for_vm_release(display) {
            slot.vm_release.update(|pending| *pending = false);
            return Err(e);
        }

        secure.phase = SecurePhase::Started;
        secure.active = true;
        info!("🔒 Secure session started on display {}", display);
        Ok(())
    }

    pub fn end_secure_session(&self, display: DisplayId) -> HwcResult<()> {
        let mut secure = self.secure.lock();
        self.check_phase(&secure, display, &[SecurePhase::Started])?;

        let handed_back = self.with_display(display, |d| {
            d.device_mut().handle_secure_event(SecureEvent::End)
        });
        match handed_back {
            Ok(()) | Err(HwcError::Unsupported) => {}
            Err(e) => return Err(e),
        }

        secure.phase = SecurePhase::Ended;
        secure.active = false;
        info!("🔓 Secure session ended on display {}", display);
        Ok(())
    }

    pub fn unprepare_secure_session(&self, display: DisplayId) -> HwcResult<()> {
        {
            let mut secure = self.secure.lock();
            self.check_phase(&secure, display, &[SecurePhase::Prepared, SecurePhase::Ended])?;
            self.registry
                .slot(display)?
                .power
                .update(|p| p.secure_transition = false);
            secure.display = None;
            secure.phase = SecurePhase::Idle;
            secure.active = false;
        }
        info!("🔓 Secure session released display {}", display);
        self.request_refresh(display);
        Ok(())
    }

    pub fn is_secure_session_active(&self) -> bool {
        self.secure.lock().active
    }

    /// Display holding the secure reservation and its phase.
    pub fn secure_session(&self) -> Option<(DisplayId, SecurePhase)> {
        let secure = self.secure.lock();
        secure.display.map(|d| (d, secure.phase))
    }

    fn check_phase(
        &self,
        secure: &SecureState,
        display: DisplayId,
        allowed: &[SecurePhase],
    ) -> HwcResult<()> {
        self.registry.slot(display)?;
        match secure.display {
            Some(owner) if owner != display => Err(HwcError::TransitionInProgress),
            Some(_) if allowed.contains(&secure.phase) => Ok(()),
            _ => {
                warn!(
                    "⚠️ Secure session call on display {} out of order (phase {:?})",
                    display, secure.phase
                );
                Err(HwcError::BadParameter)
            }
        }
    }

    /// Wait in fixed rounds for the VM to let go of `display`.
    pub fn wait_for_vm_release(&self, display: DisplayId) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        let timeouts = &self.config.timeouts;
        let mut pending = slot.vm_release.lock();
        let outcome = slot.vm_release.wait_with_retry(
            &mut pending,
            timeouts.vm_release_interval(),
            timeouts.vm_release_retries,
            |p| !*p,
        );
        if outcome.is_satisfied() {
            Ok(())
        } else {
            warn!(
                "⚠️ VM did not release display {} after {} x {:?}",
                display,
                timeouts.vm_release_retries,
                timeouts.vm_release_interval()
            );
            Err(HwcError::NoResources)
        }
    }
}

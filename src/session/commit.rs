//! Commit path and the waits that hang off it.
//!
//! Commits hold the read side of the command-sequencing lock, so an
//! administrative command that needs a quiet pipeline takes the write side
//! and waits for in-flight commits to drain. After a present the session
//! records the retire fence, wakes anyone waiting for commit-done, releases
//! pluggable connects waiting on resources and picks up deferred hotplug.

use log::{debug, trace, warn};

use super::HwcSession;
use crate::display::CommitOutcome;
use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::types::{
    Composition, ConfigId, DisplayId, LayerId, LayerRequest, VsyncPeriodChangeConstraints,
    VsyncPeriodChangeTimeline,
};

impl HwcSession {
    /// Validate the pending frame of `display`, or commit it.
    pub fn commit_or_prepare(
        &self,
        display: DisplayId,
        validate_only: bool,
    ) -> HwcResult<CommitOutcome> {
        let _seq = self.command_seq.read();
        let target = self.resolve(display)?;
        if target.secure_transition {
            return Err(HwcError::TransitionInProgress);
        }

        let result = self.with_display(target.id, |d| d.commit_or_prepare(validate_only));
        match &result {
            Ok(outcome) if outcome.retire_fence.is_some() => {
                self.post_commit(display, outcome.retire_fence.clone());
            }
            Ok(_) => {}
            Err(e) => {
                if let Ok(slot) = self.registry.slot(display) {
                    slot.commit.update(|c| c.last_error = Some(*e));
                }
            }
        }
        result
    }

    fn post_commit(&self, display: DisplayId, retire_fence: Option<Fence>) {
        let Ok(slot) = self.registry.slot(display) else {
            return;
        };
        let frames = slot.commit.update(|c| {
            c.frames += 1;
            c.retire_fence = retire_fence;
            c.last_error = None;
            c.pending_refresh = false;
            c.frames
        });
        trace!("display {} committed frame {}", display, frames);

        if display == self.primary_display() {
            self.mark_resources_ready();
            if self.callbacks.is_registered() {
                self.schedule_pending_hotplug();
            }
        }
    }

    /// Wait (bounded, in draw-cycle rounds) for `display` to commit another
    /// frame. A refresh is requested so the client produces one.
    pub fn wait_for_commit_done(&self, display: DisplayId) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        let start = slot.commit.lock().frames;
        self.request_refresh(display);

        let timeouts = &self.config.timeouts;
        let mut commit = slot.commit.lock();
        let outcome = slot.commit.wait_with_retry(
            &mut commit,
            timeouts.commit_done_interval(),
            timeouts.commit_done_retries,
            |c| c.frames > start,
        );
        if outcome.is_satisfied() {
            Ok(())
        } else {
            warn!(
                "⚠️ Display {} did not commit within {} draw cycles",
                display, timeouts.commit_done_retries
            );
            Err(HwcError::NoResources)
        }
    }

    /// Retire fence of the last commit on `display`.
    pub fn last_retire_fence(&self, display: DisplayId) -> HwcResult<Option<Fence>> {
        Ok(self.registry.slot(display)?.commit.lock().retire_fence.clone())
    }

    /// Error of the last failed commit on `display`, cleared by a good one.
    pub fn last_commit_error(&self, display: DisplayId) -> HwcResult<Option<HwcError>> {
        Ok(self.registry.slot(display)?.commit.lock().last_error)
    }

    pub fn committed_frames(&self, display: DisplayId) -> HwcResult<u64> {
        Ok(self.registry.slot(display)?.commit.lock().frames)
    }

    pub fn accept_display_changes(&self, display: DisplayId) -> HwcResult<()> {
        self.call_display_function(display, |d| d.accept_display_changes())
    }

    pub fn get_changed_composition_types(
        &self,
        display: DisplayId,
    ) -> HwcResult<Vec<(LayerId, Composition)>> {
        self.call_display_function(display, |d| d.changed_composition_types())
    }

    pub fn get_display_requests(
        &self,
        display: DisplayId,
    ) -> HwcResult<(u32, Vec<(LayerId, LayerRequest)>)> {
        self.call_display_function(display, |d| d.display_requests())
    }

    pub fn get_release_fences(&self, display: DisplayId) -> HwcResult<Vec<(LayerId, Fence)>> {
        self.call_display_function(display, |d| Ok(d.release_fences()))
    }

    pub fn get_active_config(&self, display: DisplayId) -> HwcResult<ConfigId> {
        self.call_display_function(display, |d| Ok(d.device().active_config()))
    }

    pub fn set_active_config(&self, display: DisplayId, config: ConfigId) -> HwcResult<()> {
        self.set_active_config_with_constraints(
            display,
            config,
            &VsyncPeriodChangeConstraints::default(),
        )
        .map(|_| ())
    }

    /// Switch configs and report when the new vsync period applies. The
    /// timeline always describes the config actually in effect.
    pub fn set_active_config_with_constraints(
        &self,
        display: DisplayId,
        config: ConfigId,
        constraints: &VsyncPeriodChangeConstraints,
    ) -> HwcResult<VsyncPeriodChangeTimeline> {
        let _config_lock = self.display_config.lock();
        let now = self.now_ns();
        let timeline = self.call_display_function(display, |d| {
            d.set_active_config_with_constraints(config, constraints, now)
        })?;
        debug!(
            "display {} config {} applies at {} ns (refresh required: {})",
            display, config, timeline.new_vsync_applied_time_ns, timeline.refresh_required
        );

        if timeline.refresh_required {
            let _ = self.callbacks.vsync_period_timing_changed(display, &timeline);
        }
        Ok(timeline)
    }

    pub fn get_display_vsync_period(&self, display: DisplayId) -> HwcResult<u32> {
        self.call_display_function(display, |d| {
            let active = d.device().active_config();
            Ok(d.device().attributes(active)?.vsync_period_ns)
        })
    }

    pub fn set_vsync_enabled(&self, display: DisplayId, enabled: bool) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        self.call_display_function(display, |d| d.set_vsync_enabled(enabled))?;
        slot.set_vsync_enabled(enabled);
        Ok(())
    }
}

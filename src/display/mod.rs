//! Per-display state bound to a registry slot.
//!
//! An [`HwcDisplay`] pairs a device from the composition core with the layer
//! stack the client builds for it, and tracks where the current frame is in
//! the validate → accept → present cycle.

mod dummy;

pub use dummy::DummyDisplay;

use log::{debug, warn};

use crate::device::{DisplayDevice, ValidationResult};
use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::layer::{Layer, LayerStack};
use crate::types::{
    ConfigId, DisplayId, DisplayKind, LayerId, LayerRequest, PowerMode,
    VsyncPeriodChangeConstraints, VsyncPeriodChangeTimeline,
};

/// What `commit_or_prepare` hands back to the caller.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Present only when the frame was committed.
    pub retire_fence: Option<Fence>,
    pub num_types: u32,
    pub num_requests: u32,
    /// The caller still has to commit this frame.
    pub needs_commit: bool,
}

pub struct HwcDisplay {
    id: DisplayId,
    device: Box<dyn DisplayDevice>,
    layers: LayerStack,
    geometry_changed: bool,
    validated: bool,
    pending_changes: Option<ValidationResult>,
    release_fences: Vec<(LayerId, Fence)>,
    power_mode: PowerMode,
    vsync_enabled: bool,
    screen_updates_enabled: bool,
    frame_count: u64,
}

impl HwcDisplay {
    pub fn new(id: DisplayId, device: Box<dyn DisplayDevice>) -> Self {
        Self {
            id,
            device,
            layers: LayerStack::new(),
            geometry_changed: true,
            validated: false,
            pending_changes: None,
            release_fences: Vec::new(),
            power_mode: PowerMode::Off,
            vsync_enabled: false,
            screen_updates_enabled: true,
            frame_count: 0,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn kind(&self) -> DisplayKind {
        self.device.kind()
    }

    pub fn device(&self) -> &dyn DisplayDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn DisplayDevice {
        self.device.as_mut()
    }

    /// Give the device back, e.g. to hand it to the core for destruction.
    pub fn into_device(self) -> Box<dyn DisplayDevice> {
        self.device
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    // --- layers ---

    pub fn create_layer(&mut self) -> LayerId {
        self.geometry_changed = true;
        self.layers.create()
    }

    pub fn destroy_layer(&mut self, layer: LayerId) -> HwcResult<()> {
        self.layers.destroy(layer)?;
        self.geometry_changed = true;
        Ok(())
    }

    pub fn has_layer(&self, layer: LayerId) -> bool {
        self.layers.get(layer).is_some()
    }

    pub fn layer(&self, layer: LayerId) -> Option<&Layer> {
        self.layers.get(layer)
    }

    /// Run `op` on one layer; a successful mutation invalidates the last
    /// validation.
    pub fn with_layer<R>(
        &mut self,
        layer: LayerId,
        op: impl FnOnce(&mut Layer) -> HwcResult<R>,
    ) -> HwcResult<R> {
        let target = self.layers.get_mut(layer).ok_or(HwcError::BadLayer)?;
        let result = op(target)?;
        self.geometry_changed = true;
        Ok(result)
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Replace the whole stack. Used when mirroring onto or back from a
    /// dummy alias.
    pub fn replace_layers(&mut self, layers: LayerStack) {
        self.layers = layers;
        self.geometry_changed = true;
        self.pending_changes = None;
    }

    // --- frame cycle ---

    fn validate(&mut self) -> HwcResult<ValidationResult> {
        let result = self.device.validate(&self.layers)?;
        for (layer, composition) in &result.changed_types {
            if let Some(l) = self.layers.get_mut(*layer) {
                l.device_composition = *composition;
            }
        }
        self.validated = true;
        self.geometry_changed = false;
        self.pending_changes = if result.has_changes() {
            Some(result.clone())
        } else {
            None
        };
        debug!(
            "display {} validated: {} type changes, {} requests",
            self.id,
            result.changed_types.len(),
            result.layer_requests.len()
        );
        Ok(result)
    }

    fn needs_validation(&self) -> bool {
        self.geometry_changed || !self.validated
    }

    /// Validate the pending frame, or commit it when nothing stands in the way.
    pub fn commit_or_prepare(&mut self, validate_only: bool) -> HwcResult<CommitOutcome> {
        if validate_only {
            if !self.needs_validation() {
                let (num_types, num_requests) = self.pending_counts();
                return Ok(CommitOutcome {
                    retire_fence: None,
                    num_types,
                    num_requests,
                    needs_commit: false,
                });
            }
            let result = self.validate()?;
            return Ok(CommitOutcome {
                retire_fence: None,
                num_types: result.changed_types.len() as u32,
                num_requests: result.layer_requests.len() as u32,
                needs_commit: true,
            });
        }

        if self.needs_validation() {
            let result = self.validate()?;
            if result.has_changes() {
                return Ok(CommitOutcome {
                    retire_fence: None,
                    num_types: result.changed_types.len() as u32,
                    num_requests: result.layer_requests.len() as u32,
                    needs_commit: true,
                });
            }
        } else if self.pending_changes.is_some() {
            return Err(HwcError::NotValidated);
        }

        let fence = self.present()?;
        Ok(CommitOutcome {
            retire_fence: Some(fence),
            num_types: 0,
            num_requests: 0,
            needs_commit: false,
        })
    }

    fn pending_counts(&self) -> (u32, u32) {
        self.pending_changes
            .as_ref()
            .map(|c| (c.changed_types.len() as u32, c.layer_requests.len() as u32))
            .unwrap_or((0, 0))
    }

    fn present(&mut self) -> HwcResult<Fence> {
        if !self.screen_updates_enabled {
            // Frame is dropped; hand back a signaled fence so the client keeps going.
            self.validated = false;
            return Ok(Fence::signaled());
        }
        let result = self.device.present(&self.layers)?;
        self.release_fences = result.release_fences;
        self.validated = false;
        self.frame_count += 1;
        Ok(result.retire_fence)
    }

    /// Adopt the composition types the device asked for.
    pub fn accept_display_changes(&mut self) -> HwcResult<()> {
        if !self.validated {
            return Err(HwcError::NotValidated);
        }
        if let Some(changes) = self.pending_changes.take() {
            for (layer, composition) in changes.changed_types {
                if let Some(l) = self.layers.get_mut(layer) {
                    l.composition = composition;
                }
            }
        }
        Ok(())
    }

    pub fn changed_composition_types(&self) -> HwcResult<Vec<(LayerId, crate::types::Composition)>> {
        if !self.validated {
            return Err(HwcError::NotValidated);
        }
        Ok(self
            .pending_changes
            .as_ref()
            .map(|c| c.changed_types.clone())
            .unwrap_or_default())
    }

    pub fn display_requests(&self) -> HwcResult<(u32, Vec<(LayerId, LayerRequest)>)> {
        if !self.validated {
            return Err(HwcError::NotValidated);
        }
        Ok(self
            .pending_changes
            .as_ref()
            .map(|c| (c.display_requests, c.layer_requests.clone()))
            .unwrap_or_default())
    }

    pub fn release_fences(&self) -> Vec<(LayerId, Fence)> {
        self.release_fences.clone()
    }

    // --- power / vsync / config ---

    pub fn power_mode(&self) -> PowerMode {
        self.power_mode
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> HwcResult<()> {
        if self.power_mode == mode {
            return Ok(());
        }
        self.device.set_power_mode(mode)?;
        debug!("display {} power {:?} -> {:?}", self.id, self.power_mode, mode);
        self.power_mode = mode;
        if !mode.is_active() {
            self.validated = false;
        }
        Ok(())
    }

    pub fn vsync_enabled(&self) -> bool {
        self.vsync_enabled
    }

    pub fn set_vsync_enabled(&mut self, enabled: bool) -> HwcResult<()> {
        self.device.set_vsync_enabled(enabled)?;
        self.vsync_enabled = enabled;
        Ok(())
    }

    pub fn set_screen_updates(&mut self, enabled: bool) {
        self.screen_updates_enabled = enabled;
    }

    /// Switch configs and describe when the new vsync period takes effect.
    ///
    /// A timeline is produced even when another change won the race; it then
    /// describes the config actually in effect.
    pub fn set_active_config_with_constraints(
        &mut self,
        config: ConfigId,
        constraints: &VsyncPeriodChangeConstraints,
        now_ns: i64,
    ) -> HwcResult<VsyncPeriodChangeTimeline> {
        if !self.device.configs().contains(&config) {
            return Err(HwcError::BadParameter);
        }
        let current = self.device.active_config();
        if constraints.seamless_required
            && current != config
            && !self.device.is_seamless_switch(current, config)
        {
            return Err(HwcError::Unsupported);
        }

        let switch = if current == config {
            crate::device::ConfigSwitch {
                active: current,
                refresh_required: false,
            }
        } else {
            self.device.set_active_config(config, constraints)?
        };
        if switch.active != config {
            warn!(
                "display {}: config {} requested but {} is in effect",
                self.id, config, switch.active
            );
        }

        let period = self.device.attributes(switch.active)?.vsync_period_ns;
        let applied = constraints.desired_time_ns.max(now_ns);
        if switch.active != current {
            self.geometry_changed = true;
        }
        Ok(VsyncPeriodChangeTimeline {
            new_vsync_applied_time_ns: applied,
            refresh_required: switch.refresh_required,
            refresh_time_ns: if switch.refresh_required {
                applied - period as i64
            } else {
                0
            },
            vsync_period_ns: period,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConfigSwitch, PresentResult};
    use crate::types::{
        Composition, DisplayAttributes, DisplayCapability, LayerRequest,
    };

    /// Device that asks for client composition on every layer once.
    struct PickyDevice {
        active: ConfigId,
        race_to: Option<ConfigId>,
        presents: u32,
    }

    impl DisplayDevice for PickyDevice {
        fn kind(&self) -> DisplayKind {
            DisplayKind::Builtin
        }
        fn device_id(&self) -> i32 {
            0
        }
        fn name(&self) -> String {
            "picky".into()
        }
        fn configs(&self) -> Vec<ConfigId> {
            vec![0, 1, 2]
        }
        fn active_config(&self) -> ConfigId {
            self.active
        }
        fn attributes(&self, config: ConfigId) -> HwcResult<DisplayAttributes> {
            Ok(DisplayAttributes {
                width: 1080,
                height: 2400,
                vsync_period_ns: [16_666_666, 11_111_111, 8_333_333][config as usize],
                dpi_x: 400.0,
                dpi_y: 400.0,
                config_group: 0,
            })
        }
        fn set_active_config(
            &mut self,
            config: ConfigId,
            _constraints: &VsyncPeriodChangeConstraints,
        ) -> HwcResult<ConfigSwitch> {
            self.active = self.race_to.take().unwrap_or(config);
            Ok(ConfigSwitch {
                active: self.active,
                refresh_required: true,
            })
        }
        fn is_seamless_switch(&self, _from: ConfigId, to: ConfigId) -> bool {
            to != 2
        }
        fn capabilities(&self) -> Vec<DisplayCapability> {
            vec![]
        }
        fn validate(&mut self, layers: &LayerStack) -> HwcResult<ValidationResult> {
            let changed_types = layers
                .iter()
                .filter(|l| l.composition != Composition::Client)
                .map(|l| (l.id, Composition::Client))
                .collect::<Vec<_>>();
            let layer_requests = changed_types
                .iter()
                .map(|(id, _)| (*id, LayerRequest::ClearClientTarget))
                .collect();
            Ok(ValidationResult {
                changed_types,
                layer_requests,
                display_requests: 0,
            })
        }
        fn present(&mut self, _layers: &LayerStack) -> HwcResult<PresentResult> {
            self.presents += 1;
            Ok(PresentResult {
                retire_fence: Fence::signaled(),
                release_fences: vec![],
            })
        }
        fn set_power_mode(&mut self, _mode: PowerMode) -> HwcResult<()> {
            Ok(())
        }
        fn set_vsync_enabled(&mut self, _enabled: bool) -> HwcResult<()> {
            Ok(())
        }
    }

    fn picky() -> HwcDisplay {
        HwcDisplay::new(
            0,
            Box::new(PickyDevice {
                active: 0,
                race_to: None,
                presents: 0,
            }),
        )
    }

    #[test]
    fn test_validate_only_twice_reports_no_commit_needed() {
        let mut display = picky();
        let first = display.commit_or_prepare(true).unwrap();
        assert!(first.needs_commit);
        let second = display.commit_or_prepare(true).unwrap();
        assert!(!second.needs_commit);
        assert!(second.retire_fence.is_none());
    }

    #[test]
    fn test_commit_requires_accepting_changes() {
        let mut display = picky();
        let layer = display.create_layer();
        display
            .with_layer(layer, |l| l.set_composition_type(Composition::Device))
            .unwrap();

        let outcome = display.commit_or_prepare(false).unwrap();
        assert!(outcome.needs_commit);
        assert_eq!(outcome.num_types, 1);
        assert_eq!(outcome.num_requests, 1);
        assert!(outcome.retire_fence.is_none());

        assert_eq!(display.commit_or_prepare(false).unwrap_err(), HwcError::NotValidated);

        assert_eq!(display.changed_composition_types().unwrap().len(), 1);
        display.accept_display_changes().unwrap();
        assert_eq!(display.layer(layer).unwrap().composition, Composition::Client);

        let outcome = display.commit_or_prepare(false).unwrap();
        assert!(!outcome.needs_commit);
        assert!(outcome.retire_fence.unwrap().is_signaled());
        assert_eq!(display.frame_count(), 1);
    }

    #[test]
    fn test_unchanged_frame_commits_without_revalidation_prompt() {
        let mut display = picky();
        let outcome = display.commit_or_prepare(false).unwrap();
        assert!(!outcome.needs_commit);
        assert!(outcome.retire_fence.is_some());
    }

    #[test]
    fn test_layer_mutation_invalidates_validation() {
        let mut display = picky();
        let layer = display.create_layer();
        display
            .with_layer(layer, |l| l.set_composition_type(Composition::Client))
            .unwrap();
        assert!(display.commit_or_prepare(true).unwrap().needs_commit);
        assert!(!display.commit_or_prepare(true).unwrap().needs_commit);
        display.with_layer(layer, |l| l.set_z_order(3)).unwrap();
        assert!(display.commit_or_prepare(true).unwrap().needs_commit);
        assert_eq!(display.with_layer(99, |l| l.set_z_order(1)), Err(HwcError::BadLayer));
    }

    #[test]
    fn test_config_change_timeline() {
        let mut display = picky();
        let constraints = VsyncPeriodChangeConstraints {
            desired_time_ns: 1_000,
            seamless_required: false,
        };
        let timeline = display
            .set_active_config_with_constraints(1, &constraints, 5_000)
            .unwrap();
        assert_eq!(timeline.vsync_period_ns, 11_111_111);
        assert_eq!(timeline.new_vsync_applied_time_ns, 5_000);
        assert!(timeline.refresh_required);

        let seamless = VsyncPeriodChangeConstraints {
            desired_time_ns: 0,
            seamless_required: true,
        };
        assert_eq!(
            display.set_active_config_with_constraints(2, &seamless, 0),
            Err(HwcError::Unsupported)
        );
        assert_eq!(
            display.set_active_config_with_constraints(7, &constraints, 0),
            Err(HwcError::BadParameter)
        );
    }

    #[test]
    fn test_timeline_reflects_config_in_effect_after_race() {
        let mut display = HwcDisplay::new(
            0,
            Box::new(PickyDevice {
                active: 0,
                race_to: Some(2),
                presents: 0,
            }),
        );
        let timeline = display
            .set_active_config_with_constraints(1, &VsyncPeriodChangeConstraints::default(), 0)
            .unwrap();
        assert_eq!(timeline.vsync_period_ns, 8_333_333);
    }
}

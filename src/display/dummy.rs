//! Software stand-in display.
//!
//! Dummy displays accept every frame and complete it immediately. They back
//! alias slots while a builtin panel changes power state, and stand in for a
//! pluggable display whose enumeration never finished.

use crate::device::{ConfigSwitch, DisplayDevice, PresentResult, ValidationResult};
use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::layer::LayerStack;
use crate::types::{
    BufferHandle, ConfigId, CwbConfig, DisplayAttributes, DisplayCapability, DisplayKind,
    PowerMode, VsyncPeriodChangeConstraints,
};

pub struct DummyDisplay {
    name: String,
    attributes: DisplayAttributes,
    placeholder: bool,
}

impl DummyDisplay {
    pub fn new(name: impl Into<String>, attributes: DisplayAttributes) -> Self {
        Self {
            name: name.into(),
            attributes,
            placeholder: false,
        }
    }

    /// Degraded stand-in shown when a hotplugged display never finished
    /// enumerating.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: DisplayAttributes {
                width: 1920,
                height: 1080,
                vsync_period_ns: 16_666_666,
                dpi_x: 160.0,
                dpi_y: 160.0,
                config_group: 0,
            },
            placeholder: true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

impl DisplayDevice for DummyDisplay {
    fn kind(&self) -> DisplayKind {
        DisplayKind::Dummy
    }

    fn device_id(&self) -> i32 {
        -1
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn configs(&self) -> Vec<ConfigId> {
        vec![0]
    }

    fn active_config(&self) -> ConfigId {
        0
    }

    fn attributes(&self, config: ConfigId) -> HwcResult<DisplayAttributes> {
        if config != 0 {
            return Err(HwcError::BadParameter);
        }
        Ok(self.attributes)
    }

    fn set_active_config(
        &mut self,
        config: ConfigId,
        _constraints: &VsyncPeriodChangeConstraints,
    ) -> HwcResult<ConfigSwitch> {
        if config != 0 {
            return Err(HwcError::BadParameter);
        }
        Ok(ConfigSwitch {
            active: 0,
            refresh_required: false,
        })
    }

    fn is_seamless_switch(&self, _from: ConfigId, _to: ConfigId) -> bool {
        true
    }

    fn capabilities(&self) -> Vec<DisplayCapability> {
        Vec::new()
    }

    fn validate(&mut self, _layers: &LayerStack) -> HwcResult<ValidationResult> {
        Ok(ValidationResult::default())
    }

    fn present(&mut self, layers: &LayerStack) -> HwcResult<PresentResult> {
        Ok(PresentResult {
            retire_fence: Fence::signaled(),
            release_fences: layers.iter().map(|l| (l.id, Fence::signaled())).collect(),
        })
    }

    fn set_power_mode(&mut self, _mode: PowerMode) -> HwcResult<()> {
        Ok(())
    }

    fn set_vsync_enabled(&mut self, _enabled: bool) -> HwcResult<()> {
        Ok(())
    }

    fn set_brightness(&mut self, _level: f32) -> HwcResult<()> {
        Ok(())
    }

    fn submit_capture(
        &mut self,
        _config: &CwbConfig,
        _buffer: &BufferHandle,
        _handle_id: u64,
    ) -> HwcResult<()> {
        Err(HwcError::NoResources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_completes_frames_immediately() {
        let mut dummy = DummyDisplay::placeholder("hdmi");
        assert!(dummy.is_placeholder());
        let mut layers = LayerStack::new();
        let id = layers.create();
        assert!(!dummy.validate(&layers).unwrap().has_changes());
        let result = dummy.present(&layers).unwrap();
        assert!(result.retire_fence.is_signaled());
        assert_eq!(result.release_fences.len(), 1);
        assert_eq!(result.release_fences[0].0, id);
        assert_eq!(dummy.attributes(1), Err(HwcError::BadParameter));
    }
}

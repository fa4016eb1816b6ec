//! Collaborator interfaces consumed by the session.
//!
//! The composition engine that actually programs display hardware lives
//! behind these traits. The session only orchestrates: it never assumes
//! anything about how a frame is composed.

use std::sync::Weak;

use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::layer::LayerStack;
use crate::types::{
    BufferHandle, ColorMode, Composition, ConfigId, CwbConfig, DisplayAttributes,
    DisplayCapability, DisplayId, DisplayKind, HwDisplayInfo, IdentificationData, LayerId,
    LayerRequest, PixelFormat, PowerMode, QsyncMode, SecureEvent, VsyncPeriodChangeConstraints,
};

/// Result of validating a layer stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    /// Layers whose composition type the device wants changed.
    pub changed_types: Vec<(LayerId, Composition)>,
    pub layer_requests: Vec<(LayerId, LayerRequest)>,
    pub display_requests: u32,
}

impl ValidationResult {
    pub fn has_changes(&self) -> bool {
        !self.changed_types.is_empty() || !self.layer_requests.is_empty()
    }
}

/// Result of committing a layer stack to hardware.
#[derive(Debug, Clone)]
pub struct PresentResult {
    pub retire_fence: Fence,
    pub release_fences: Vec<(LayerId, Fence)>,
}

/// Outcome of a config switch as observed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSwitch {
    /// Config in effect after the request. Differs from the requested one
    /// when a conflicting change won the race.
    pub active: ConfigId,
    pub refresh_required: bool,
}

/// One display as driven by the composition core.
pub trait DisplayDevice: Send {
    fn kind(&self) -> DisplayKind;

    /// Hardware id of the underlying device, `-1` for software displays.
    fn device_id(&self) -> i32;

    fn name(&self) -> String;

    fn configs(&self) -> Vec<ConfigId>;

    fn active_config(&self) -> ConfigId;

    fn attributes(&self, config: ConfigId) -> HwcResult<DisplayAttributes>;

    /// Switch to `config`, honoring the constraints where possible.
    fn set_active_config(
        &mut self,
        config: ConfigId,
        constraints: &VsyncPeriodChangeConstraints,
    ) -> HwcResult<ConfigSwitch>;

    fn is_seamless_switch(&self, from: ConfigId, to: ConfigId) -> bool;

    fn capabilities(&self) -> Vec<DisplayCapability>;

    fn identification_data(&self) -> HwcResult<IdentificationData> {
        Err(HwcError::Unsupported)
    }

    fn validate(&mut self, layers: &LayerStack) -> HwcResult<ValidationResult>;

    fn present(&mut self, layers: &LayerStack) -> HwcResult<PresentResult>;

    fn set_power_mode(&mut self, mode: PowerMode) -> HwcResult<()>;

    fn set_vsync_enabled(&mut self, enabled: bool) -> HwcResult<()>;

    fn set_brightness(&mut self, _level: f32) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    /// Queue `buffer` to receive the next composed frame. Completion is
    /// reported through [`DisplayEventHandler::cwb_done`].
    fn submit_capture(
        &mut self,
        _config: &CwbConfig,
        _buffer: &BufferHandle,
        _handle_id: u64,
    ) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    fn handle_secure_event(&mut self, _event: SecureEvent) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    fn set_color_mode(&mut self, _mode: ColorMode) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    fn set_idle_timeout(&mut self, _timeout_ms: u32) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    fn set_qsync_mode(&mut self, _mode: QsyncMode) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    fn set_panel_luminance(&mut self, _min: f32, _max: f32) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    /// Allow or forbid the panel to power-collapse while idle. A synchronous
    /// request takes effect with the next committed frame.
    fn control_idle_power_collapse(&mut self, _enable: bool, _synchronous: bool) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }

    /// Output buffer for virtual displays.
    fn set_output_buffer(&mut self, _buffer: &BufferHandle, _release: &Fence) -> HwcResult<()> {
        Err(HwcError::Unsupported)
    }
}

/// Asynchronous notifications flowing from the composition core back to the
/// session.
pub trait DisplayEventHandler: Send + Sync {
    fn cwb_done(&self, display: DisplayId, status: i32, handle_id: u64);
    fn vm_release_done(&self, display: DisplayId);
    fn refresh(&self, display: DisplayId);
    fn vsync(&self, display: DisplayId, timestamp_ns: i64, period_ns: u32);
}

/// Entry point of the composition engine.
pub trait CompositionCore: Send + Sync {
    /// Enumerate hardware displays and their connection state.
    fn query_displays(&self) -> HwcResult<Vec<HwDisplayInfo>>;

    fn create_display(
        &self,
        client_id: DisplayId,
        info: &HwDisplayInfo,
    ) -> HwcResult<Box<dyn DisplayDevice>>;

    fn create_virtual_display(
        &self,
        client_id: DisplayId,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> HwcResult<Box<dyn DisplayDevice>>;

    fn destroy_display(&self, device: Box<dyn DisplayDevice>);

    /// Number of virtual displays the hardware can back at once.
    fn max_virtual_displays(&self) -> u32;

    fn set_event_handler(&self, handler: Weak<dyn DisplayEventHandler>);
}

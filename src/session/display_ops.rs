//! Per-display queries, layer operations and captures.
//!
//! Everything here is a thin routing shim: resolve the target through the
//! lock discipline, then hand off to the display or one of its layers.

use std::sync::Weak;

use super::HwcSession;
use crate::cwb::CwbCallback;
use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::types::{
    Attribute, BlendMode, BufferHandle, Color, ColorMode, Composition, ConfigId, ConnectionType,
    CwbConfig, DisplayCapability, DisplayId, DisplayKind, DisplayType, FRect,
    IdentificationData, LayerFlag, LayerId, LayerType, Rect, Region, Transform,
};

impl HwcSession {
    // --- display queries ---

    pub fn get_display_type(&self, display: DisplayId) -> HwcResult<DisplayType> {
        self.call_display_function(display, |d| {
            Ok(match d.kind() {
                DisplayKind::Virtual => DisplayType::Virtual,
                _ => DisplayType::Physical,
            })
        })
    }

    pub fn get_display_connection_type(&self, display: DisplayId) -> HwcResult<ConnectionType> {
        let kind = self.registry.slot(display)?.kind();
        self.call_display_function(display, |_| match kind {
            DisplayKind::Builtin => Ok(ConnectionType::Internal),
            DisplayKind::Pluggable => Ok(ConnectionType::External),
            _ => Err(HwcError::Unsupported),
        })
    }

    pub fn get_display_capabilities(&self, display: DisplayId) -> HwcResult<Vec<DisplayCapability>> {
        self.call_display_function(display, |d| Ok(d.device().capabilities()))
    }

    pub fn get_display_configs(&self, display: DisplayId) -> HwcResult<Vec<ConfigId>> {
        self.call_display_function(display, |d| Ok(d.device().configs()))
    }

    pub fn get_display_attribute(
        &self,
        display: DisplayId,
        config: ConfigId,
        attribute: Attribute,
    ) -> HwcResult<i32> {
        self.call_display_function(display, |d| {
            Ok(d.device().attributes(config)?.get(attribute))
        })
    }

    pub fn get_display_identification_data(
        &self,
        display: DisplayId,
    ) -> HwcResult<IdentificationData> {
        self.call_display_function(display, |d| d.device().identification_data())
    }

    pub fn get_display_name(&self, display: DisplayId) -> HwcResult<String> {
        self.call_display_function(display, |d| Ok(d.device().name()))
    }

    pub fn set_brightness(&self, display: DisplayId, level: f32) -> HwcResult<()> {
        // -1 turns the backlight off.
        if !(level == -1.0 || (0.0..=1.0).contains(&level)) {
            return Err(HwcError::BadParameter);
        }
        self.call_display_function(display, |d| d.device_mut().set_brightness(level))
    }

    pub fn set_color_mode(&self, display: DisplayId, mode: ColorMode) -> HwcResult<()> {
        self.call_display_function(display, |d| d.device_mut().set_color_mode(mode))
    }

    // --- layers ---

    pub fn create_layer(&self, display: DisplayId) -> HwcResult<LayerId> {
        self.call_display_function(display, |d| Ok(d.create_layer()))
    }

    pub fn destroy_layer(&self, display: DisplayId, layer: LayerId) -> HwcResult<()> {
        self.call_display_function(display, |d| d.destroy_layer(layer))
    }

    pub fn set_layer_buffer(
        &self,
        display: DisplayId,
        layer: LayerId,
        buffer: BufferHandle,
        acquire_fence: Option<Fence>,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_buffer(buffer, acquire_fence))
    }

    pub fn set_layer_blend_mode(
        &self,
        display: DisplayId,
        layer: LayerId,
        mode: BlendMode,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_blend_mode(mode))
    }

    pub fn set_layer_source_crop(
        &self,
        display: DisplayId,
        layer: LayerId,
        crop: FRect,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_source_crop(crop))
    }

    pub fn set_layer_display_frame(
        &self,
        display: DisplayId,
        layer: LayerId,
        frame: Rect,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_display_frame(frame))
    }

    pub fn set_layer_transform(
        &self,
        display: DisplayId,
        layer: LayerId,
        transform: Transform,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_transform(transform))
    }

    pub fn set_layer_z_order(&self, display: DisplayId, layer: LayerId, z: u32) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_z_order(z))
    }

    pub fn set_layer_plane_alpha(
        &self,
        display: DisplayId,
        layer: LayerId,
        alpha: f32,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_plane_alpha(alpha))
    }

    pub fn set_layer_type(
        &self,
        display: DisplayId,
        layer: LayerId,
        layer_type: LayerType,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_type(layer_type))
    }

    pub fn set_layer_flag(&self, display: DisplayId, layer: LayerId, flag: LayerFlag) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_flag(flag))
    }

    pub fn set_layer_surface_damage(
        &self,
        display: DisplayId,
        layer: LayerId,
        damage: Region,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_surface_damage(damage))
    }

    pub fn set_layer_visible_region(
        &self,
        display: DisplayId,
        layer: LayerId,
        region: Region,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_visible_region(region))
    }

    pub fn set_layer_composition_type(
        &self,
        display: DisplayId,
        layer: LayerId,
        composition: Composition,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_composition_type(composition))
    }

    pub fn set_layer_color(&self, display: DisplayId, layer: LayerId, color: Color) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_color(color))
    }

    pub fn set_layer_dataspace(
        &self,
        display: DisplayId,
        layer: LayerId,
        dataspace: i32,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_dataspace(dataspace))
    }

    pub fn set_layer_per_frame_metadata(
        &self,
        display: DisplayId,
        layer: LayerId,
        keys: &[i32],
        values: &[f32],
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_per_frame_metadata(keys, values))
    }

    pub fn set_layer_color_transform(
        &self,
        display: DisplayId,
        layer: LayerId,
        matrix: Option<[f32; 16]>,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_color_transform(matrix))
    }

    pub fn set_cursor_position(
        &self,
        display: DisplayId,
        layer: LayerId,
        x: i32,
        y: i32,
    ) -> HwcResult<()> {
        self.call_layer_function(display, layer, |l| l.set_cursor_position(x, y))
    }

    pub fn get_layer_count(&self, display: DisplayId) -> HwcResult<usize> {
        self.call_display_function(display, |d| Ok(d.layers().len()))
    }

    // --- capture ---

    /// Queue a capture of the next composed frame of `display` into
    /// `buffer`.
    pub fn post_buffer(
        &self,
        display: DisplayId,
        config: &CwbConfig,
        buffer: &BufferHandle,
        callback: Weak<dyn CwbCallback>,
    ) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        if slot.kind() == DisplayKind::Dummy || !slot.is_bound() {
            return Err(HwcError::BadDisplay);
        }
        // Enqueue under the power lock: a secure prepare either drains this
        // request or its flag is already visible here.
        let power = slot.power.lock();
        if power.secure_transition {
            return Err(HwcError::TransitionInProgress);
        }
        let queued = self.cwb.post_buffer(display, config, buffer, callback);
        drop(power);
        queued
    }

    pub fn is_cwb_active_on_display(&self, display: DisplayId) -> bool {
        self.cwb.is_cwb_active_on_display(display)
    }
}

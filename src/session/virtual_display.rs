//! Virtual display lifecycle.

use log::info;

use super::HwcSession;
use crate::error::{HwcError, HwcResult};
use crate::display::HwcDisplay;
use crate::fence::Fence;
use crate::registry::SlotState;
use crate::types::{BufferHandle, DisplayId, DisplayKind, PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualDisplayData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub in_use: bool,
}

impl HwcSession {
    /// Virtual displays that may exist at once: the smaller of the
    /// configured limit, the slot count and what the core can back.
    pub fn get_max_virtual_display_count(&self) -> u32 {
        let slots = self.registry.slots_of(DisplayKind::Virtual).count() as u32;
        self.config
            .display
            .max_virtual_displays
            .min(slots)
            .min(self.core.max_virtual_displays())
    }

    pub fn create_virtual_display(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> HwcResult<DisplayId> {
        if width == 0 || height == 0 {
            return Err(HwcError::BadParameter);
        }

        let mut virtuals = self.virtuals.lock();
        let in_use = virtuals.values().filter(|v| v.in_use).count() as u32;
        if in_use >= self.get_max_virtual_display_count() {
            return Err(HwcError::NoResources);
        }
        let slot = self
            .registry
            .free_slot(DisplayKind::Virtual)
            .ok_or(HwcError::NoResources)?;

        let device = self
            .core
            .create_virtual_display(slot.id(), width, height, format)?;
        slot.op.update(|d| {
            d.display = Some(HwcDisplay::new(slot.id(), device));
            d.device_id = -1;
            d.state = SlotState::Connected;
        });
        virtuals.insert(
            slot.id(),
            VirtualDisplayData {
                width,
                height,
                format,
                in_use: true,
            },
        );

        info!(
            "🪞 Virtual display {} created ({}x{} {:?})",
            slot.id(),
            width,
            height,
            format
        );
        Ok(slot.id())
    }

    pub fn destroy_virtual_display(&self, display: DisplayId) -> HwcResult<()> {
        let slot = self.registry.slot(display)?;
        if slot.kind() != DisplayKind::Virtual {
            return Err(HwcError::BadDisplay);
        }

        let mut virtuals = self.virtuals.lock();
        if !virtuals.contains_key(&display) {
            return Err(HwcError::BadDisplay);
        }
        self.cwb.teardown(display);
        let previous = slot.op.update(|d| {
            d.state = SlotState::Disconnected;
            d.display.take()
        });
        slot.set_vsync_enabled(false);
        if let Some(previous) = previous {
            self.release_device(previous);
        }
        virtuals.remove(&display);

        info!("🪞 Virtual display {} destroyed", display);
        Ok(())
    }

    pub fn virtual_display_data(&self, display: DisplayId) -> HwcResult<VirtualDisplayData> {
        self.virtuals
            .lock()
            .get(&display)
            .copied()
            .ok_or(HwcError::BadDisplay)
    }

    /// Buffer the next frame of a virtual display is written to.
    pub fn set_output_buffer(
        &self,
        display: DisplayId,
        buffer: &BufferHandle,
        release_fence: &Fence,
    ) -> HwcResult<()> {
        if self.registry.slot(display)?.kind() != DisplayKind::Virtual {
            return Err(HwcError::Unsupported);
        }
        self.call_display_function(display, |d| {
            d.device_mut().set_output_buffer(buffer, release_fence)
        })
    }
}

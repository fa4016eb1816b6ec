//! Layer state owned by a display.
//!
//! Layers are pure data until commit time, when the whole stack is handed
//! to the composition core. Every setter validates its input and marks the
//! owning stack dirty so the next commit re-validates.

use std::collections::BTreeMap;

use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::types::{
    BlendMode, BufferHandle, Color, Composition, FRect, LayerFlag, LayerId, LayerType, Rect,
    Region, Transform,
};

/// Number of per-frame metadata keys a layer may carry.
pub const MAX_METADATA_KEYS: usize = 16;

#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub buffer: Option<BufferHandle>,
    pub acquire_fence: Option<Fence>,
    pub blend_mode: BlendMode,
    pub source_crop: FRect,
    pub display_frame: Rect,
    pub transform: Transform,
    pub z_order: u32,
    pub plane_alpha: f32,
    pub layer_type: LayerType,
    pub flag: LayerFlag,
    pub surface_damage: Region,
    pub visible_region: Region,
    pub composition: Composition,
    /// Composition the device picked during the last validation.
    pub device_composition: Composition,
    pub color: Color,
    pub dataspace: i32,
    pub per_frame_metadata: BTreeMap<i32, f32>,
    pub color_transform: Option<[f32; 16]>,
    pub cursor_position: (i32, i32),
}

impl Layer {
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            buffer: None,
            acquire_fence: None,
            blend_mode: BlendMode::Premultiplied,
            source_crop: FRect::default(),
            display_frame: Rect::default(),
            transform: Transform::Identity,
            z_order: 0,
            plane_alpha: 1.0,
            layer_type: LayerType::Unknown,
            flag: LayerFlag::Default,
            surface_damage: Vec::new(),
            visible_region: Vec::new(),
            composition: Composition::Invalid,
            device_composition: Composition::Invalid,
            color: Color::default(),
            dataspace: 0,
            per_frame_metadata: BTreeMap::new(),
            color_transform: None,
            cursor_position: (0, 0),
        }
    }

    pub fn set_buffer(&mut self, buffer: BufferHandle, acquire_fence: Option<Fence>) -> HwcResult<()> {
        if !buffer.is_valid() {
            return Err(HwcError::BadParameter);
        }
        self.buffer = Some(buffer);
        self.acquire_fence = acquire_fence;
        Ok(())
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) -> HwcResult<()> {
        self.blend_mode = mode;
        Ok(())
    }

    pub fn set_source_crop(&mut self, crop: FRect) -> HwcResult<()> {
        if !crop.is_valid() {
            return Err(HwcError::BadParameter);
        }
        self.source_crop = crop;
        Ok(())
    }

    pub fn set_display_frame(&mut self, frame: Rect) -> HwcResult<()> {
        if frame.right < frame.left || frame.bottom < frame.top {
            return Err(HwcError::BadParameter);
        }
        self.display_frame = frame;
        Ok(())
    }

    pub fn set_transform(&mut self, transform: Transform) -> HwcResult<()> {
        self.transform = transform;
        Ok(())
    }

    pub fn set_z_order(&mut self, z: u32) -> HwcResult<()> {
        self.z_order = z;
        Ok(())
    }

    pub fn set_plane_alpha(&mut self, alpha: f32) -> HwcResult<()> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(HwcError::BadParameter);
        }
        self.plane_alpha = alpha;
        Ok(())
    }

    pub fn set_type(&mut self, layer_type: LayerType) -> HwcResult<()> {
        self.layer_type = layer_type;
        Ok(())
    }

    pub fn set_flag(&mut self, flag: LayerFlag) -> HwcResult<()> {
        self.flag = flag;
        Ok(())
    }

    pub fn set_surface_damage(&mut self, damage: Region) -> HwcResult<()> {
        self.surface_damage = damage;
        Ok(())
    }

    pub fn set_visible_region(&mut self, region: Region) -> HwcResult<()> {
        self.visible_region = region;
        Ok(())
    }

    pub fn set_composition_type(&mut self, composition: Composition) -> HwcResult<()> {
        if composition == Composition::Invalid {
            return Err(HwcError::BadParameter);
        }
        self.composition = composition;
        Ok(())
    }

    pub fn set_color(&mut self, color: Color) -> HwcResult<()> {
        self.color = color;
        Ok(())
    }

    pub fn set_dataspace(&mut self, dataspace: i32) -> HwcResult<()> {
        self.dataspace = dataspace;
        Ok(())
    }

    pub fn set_per_frame_metadata(&mut self, keys: &[i32], values: &[f32]) -> HwcResult<()> {
        if keys.len() != values.len() || keys.len() > MAX_METADATA_KEYS {
            return Err(HwcError::BadParameter);
        }
        self.per_frame_metadata = keys.iter().copied().zip(values.iter().copied()).collect();
        Ok(())
    }

    pub fn set_color_transform(&mut self, matrix: Option<[f32; 16]>) -> HwcResult<()> {
        self.color_transform = matrix;
        Ok(())
    }

    pub fn set_cursor_position(&mut self, x: i32, y: i32) -> HwcResult<()> {
        if self.composition != Composition::Cursor {
            return Err(HwcError::BadLayer);
        }
        self.cursor_position = (x, y);
        Ok(())
    }
}

/// Layers of one display, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    layers: BTreeMap<LayerId, Layer>,
    next_id: LayerId,
}

impl LayerStack {
    pub fn new() -> Self {
        Self {
            layers: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn create(&mut self) -> LayerId {
        let id = self.next_id;
        self.next_id += 1;
        self.layers.insert(id, Layer::new(id));
        id
    }

    pub fn destroy(&mut self, id: LayerId) -> HwcResult<()> {
        self.layers.remove(&id).map(|_| ()).ok_or(HwcError::BadLayer)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Layers sorted bottom to top.
    pub fn by_z_order(&self) -> Vec<&Layer> {
        let mut sorted: Vec<&Layer> = self.layers.values().collect();
        sorted.sort_by_key(|l| (l.z_order, l.id));
        sorted
    }
}

//! Plain data types shared by the session, the registry and the
//! composition-core collaborator traits.

use serde::{Deserialize, Serialize};

use crate::error::{HwcError, HwcResult};

/// Client-visible display id.
pub type DisplayId = u64;

/// Layer id, unique per display.
pub type LayerId = u64;

/// Display configuration index.
pub type ConfigId = u32;

/// What sits behind a display slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayKind {
    Builtin,
    Pluggable,
    Virtual,
    /// Placeholder used as an alias target or as a degraded stand-in.
    Dummy,
}

/// Display type as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayType {
    Physical,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerMode {
    Off,
    Doze,
    On,
    DozeSuspend,
    OnSuspend,
}

impl PowerMode {
    pub fn from_i32(value: i32) -> HwcResult<Self> {
        match value {
            0 => Ok(PowerMode::Off),
            1 => Ok(PowerMode::Doze),
            2 => Ok(PowerMode::On),
            3 => Ok(PowerMode::DozeSuspend),
            4 => Ok(PowerMode::OnSuspend),
            _ => Err(HwcError::BadParameter),
        }
    }

    /// Modes in which the panel is scanning out.
    pub fn is_active(&self) -> bool {
        matches!(self, PowerMode::On | PowerMode::Doze | PowerMode::OnSuspend)
    }
}

/// How a layer is composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Composition {
    Invalid,
    Client,
    Device,
    SolidColor,
    Cursor,
    Sideband,
    DisplayDecoration,
}

impl Composition {
    pub fn from_i32(value: i32) -> HwcResult<Self> {
        match value {
            0 => Ok(Composition::Invalid),
            1 => Ok(Composition::Client),
            2 => Ok(Composition::Device),
            3 => Ok(Composition::SolidColor),
            4 => Ok(Composition::Cursor),
            5 => Ok(Composition::Sideband),
            6 => Ok(Composition::DisplayDecoration),
            _ => Err(HwcError::BadParameter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    None,
    Premultiplied,
    Coverage,
}

impl BlendMode {
    pub fn from_i32(value: i32) -> HwcResult<Self> {
        match value {
            1 => Ok(BlendMode::None),
            2 => Ok(BlendMode::Premultiplied),
            3 => Ok(BlendMode::Coverage),
            _ => Err(HwcError::BadParameter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    FlipH,
    FlipV,
    Rot90,
    Rot180,
    Rot270,
    FlipHRot90,
    FlipVRot90,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerType {
    Unknown,
    App,
    Game,
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFlag {
    Default,
    Compatible,
    Mask,
}

/// Integer rectangle, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.right.is_finite()
            && self.bottom.is_finite()
            && self.right >= self.left
            && self.bottom >= self.top
    }
}

/// A set of rectangles; empty means "whole layer".
pub type Region = Vec<Rect>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Pixel formats accepted for virtual displays and capture buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Rgb888,
    Rgb565,
    Bgra8888,
    Rgba1010102,
    YCbCr420,
}

impl PixelFormat {
    pub fn from_i32(value: i32) -> HwcResult<Self> {
        match value {
            1 => Ok(PixelFormat::Rgba8888),
            2 => Ok(PixelFormat::Rgbx8888),
            3 => Ok(PixelFormat::Rgb888),
            4 => Ok(PixelFormat::Rgb565),
            5 => Ok(PixelFormat::Bgra8888),
            0x23 => Ok(PixelFormat::YCbCr420),
            0x2B => Ok(PixelFormat::Rgba1010102),
            _ => Err(HwcError::BadParameter),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            PixelFormat::Rgba8888 => 1,
            PixelFormat::Rgbx8888 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 4,
            PixelFormat::Bgra8888 => 5,
            PixelFormat::YCbCr420 => 0x23,
            PixelFormat::Rgba1010102 => 0x2B,
        }
    }

    /// Bytes per pixel of the first plane.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgba8888
            | PixelFormat::Rgbx8888
            | PixelFormat::Bgra8888
            | PixelFormat::Rgba1010102 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 2,
            PixelFormat::YCbCr420 => 1,
        }
    }
}

/// Opaque graphics buffer handed in by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferHandle {
    /// Allocator-unique id; doubles as the CWB correlation id.
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl BufferHandle {
    pub fn new(id: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            id,
            width,
            height,
            format,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Where in the display pipeline a capture taps the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CwbTapPoint {
    #[default]
    LayerMixer,
    Dspp,
    Demura,
}

/// Capture request configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CwbConfig {
    /// Region of interest; empty captures the whole display.
    pub roi: Rect,
    pub post_processed: bool,
    pub tap_point: CwbTapPoint,
}

/// Per-config display attributes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayAttributes {
    pub width: u32,
    pub height: u32,
    pub vsync_period_ns: u32,
    pub dpi_x: f32,
    pub dpi_y: f32,
    pub config_group: i32,
}

impl DisplayAttributes {
    pub fn get(&self, attribute: Attribute) -> i32 {
        match attribute {
            Attribute::Width => self.width as i32,
            Attribute::Height => self.height as i32,
            Attribute::VsyncPeriod => self.vsync_period_ns as i32,
            Attribute::DpiX => (self.dpi_x * 1000.0) as i32,
            Attribute::DpiY => (self.dpi_y * 1000.0) as i32,
            Attribute::ConfigGroup => self.config_group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Width,
    Height,
    VsyncPeriod,
    DpiX,
    DpiY,
    ConfigGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCapability {
    SkipClientColorTransform,
    Doze,
    Brightness,
    ProtectedContents,
    AutoLowLatencyMode,
    Suspend,
    DisplayIdleTimer,
}

/// EDID-style identification blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationData {
    pub port: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VsyncPeriodChangeConstraints {
    /// Earliest time the new period may take effect.
    pub desired_time_ns: i64,
    pub seamless_required: bool,
}

/// When and how a vsync-period change takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VsyncPeriodChangeTimeline {
    pub new_vsync_applied_time_ns: i64,
    pub refresh_required: bool,
    pub refresh_time_ns: i64,
    /// Period of the config actually in effect.
    pub vsync_period_ns: u32,
}

/// Per-layer request produced by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRequest {
    ClearClientTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    Native,
    Srgb,
    DisplayP3,
    Bt2020,
    Bt2100Pq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QsyncMode {
    None,
    ContinuousMode,
    OneShotMode,
}

/// What the composition core reports about a hardware display.
#[derive(Debug, Clone, PartialEq)]
pub struct HwDisplayInfo {
    pub device_id: i32,
    pub kind: DisplayKind,
    pub is_connected: bool,
    pub is_primary: bool,
    /// False until the device has reported its full capability set.
    pub capabilities_ready: bool,
    pub name: String,
}

/// Secure ("trusted UI") transition events forwarded to a display device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecureEvent {
    Start,
    End,
}

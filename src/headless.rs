//! Headless composition core ("null display mode").
//!
//! An in-process [`CompositionCore`] with software displays, used when no
//! display hardware is present and to drive the session end to end in tests.
//!
//! ## Features
//! - Builtin panels with three configs (60, 90 and 120 Hz)
//! - Pluggable outputs that can be connected and removed at runtime,
//!   optionally announcing themselves through a device-event channel
//! - Virtual displays up to a configurable limit
//! - Captures that complete on their own or on demand
//! - VM hand-off for secure sessions, immediate or manual
//!
//! Asynchronous notifications (capture done, VM release, refresh, vsync) are
//! delivered on a dedicated `headless-events` thread, never on the caller's.

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::device::{
    CompositionCore, ConfigSwitch, DisplayDevice, DisplayEventHandler, PresentResult,
    ValidationResult,
};
use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::layer::LayerStack;
use crate::types::{
    BufferHandle, ColorMode, Composition, ConfigId, CwbConfig, DisplayAttributes,
    DisplayCapability, DisplayId, DisplayKind, HwDisplayInfo, IdentificationData, PixelFormat,
    PowerMode, QsyncMode, SecureEvent, VsyncPeriodChangeConstraints,
};
use crate::uevent::HotplugEvent;

/// First hardware id handed to pluggable outputs.
const PLUGGABLE_BASE_ID: i32 = 100;

enum CoreEvent {
    CwbDone {
        display: DisplayId,
        status: i32,
        handle_id: u64,
    },
    VmReleaseDone {
        display: DisplayId,
    },
    Refresh {
        display: DisplayId,
    },
    Vsync {
        display: DisplayId,
        timestamp_ns: i64,
        period_ns: u32,
    },
    Flush(Sender<()>),
}

/// A capture handed to a headless display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedCapture {
    pub display: DisplayId,
    pub handle_id: u64,
}

struct CoreState {
    inventory: Vec<HwDisplayInfo>,
    next_pluggable: i32,
    fail_enumeration: bool,
    fail_create: bool,
    /// Readiness reported for newly connected pluggables.
    pluggable_ready: bool,
    max_virtual: u32,
    active_virtual: u32,
    /// `Some(status)` completes every capture right away with `status`.
    capture_status: Option<i32>,
    vm_release_auto: bool,
    power_delay: Duration,
    submitted: Vec<SubmittedCapture>,
    destroyed: Vec<i32>,
    /// `(display, allowed)` for every idle power-collapse change.
    idle_pc: Vec<(DisplayId, bool)>,
}

struct Shared {
    state: Mutex<CoreState>,
    handler: Mutex<Option<Weak<dyn DisplayEventHandler>>>,
    uevents: Mutex<Option<Sender<HotplugEvent>>>,
}

pub struct HeadlessCore {
    shared: Arc<Shared>,
    events: Sender<CoreEvent>,
}

impl HeadlessCore {
    /// A core with `builtins` connected panels; panel 0 is primary.
    pub fn new(builtins: usize) -> Arc<Self> {
        let inventory = (0..builtins)
            .map(|i| HwDisplayInfo {
                device_id: i as i32,
                kind: DisplayKind::Builtin,
                is_connected: true,
                is_primary: i == 0,
                capabilities_ready: true,
                name: format!("builtin-{}", i),
            })
            .collect();

        let shared = Arc::new(Shared {
            state: Mutex::new(CoreState {
                inventory,
                next_pluggable: PLUGGABLE_BASE_ID,
                fail_enumeration: false,
                fail_create: false,
                pluggable_ready: true,
                max_virtual: 1,
                active_virtual: 0,
                capture_status: Some(0),
                vm_release_auto: true,
                power_delay: Duration::ZERO,
                submitted: Vec::new(),
                destroyed: Vec::new(),
                idle_pc: Vec::new(),
            }),
            handler: Mutex::new(None),
            uevents: Mutex::new(None),
        });

        let (events, rx) = mpsc::channel();
        let dispatch = Arc::downgrade(&shared);
        if let Err(e) = thread::Builder::new()
            .name("headless-events".into())
            .spawn(move || dispatch_events(dispatch, rx))
        {
            warn!("⚠️ Could not start headless event thread: {}", e);
        }

        info!("🖥️ Headless core up with {} builtin panel(s)", builtins);
        Arc::new(Self { shared, events })
    }

    /// Route device events for connects and removals into `sender`.
    pub fn attach_uevents(&self, sender: Sender<HotplugEvent>) {
        *self.shared.uevents.lock() = Some(sender);
    }

    /// Plug in an external output and return its hardware id.
    pub fn connect_pluggable(&self) -> i32 {
        let device_id = {
            let mut state = self.shared.state.lock();
            let device_id = state.next_pluggable;
            state.next_pluggable += 1;
            let ready = state.pluggable_ready;
            state.inventory.push(HwDisplayInfo {
                device_id,
                kind: DisplayKind::Pluggable,
                is_connected: true,
                is_primary: false,
                capabilities_ready: ready,
                name: format!("hdmi-{}", device_id),
            });
            device_id
        };
        debug!("headless: pluggable {} connected", device_id);
        self.send_uevent(HotplugEvent::pluggable(true));
        device_id
    }

    /// Unplug an external output.
    pub fn disconnect_pluggable(&self, device_id: i32) {
        self.shared
            .state
            .lock()
            .inventory
            .retain(|i| !(i.kind == DisplayKind::Pluggable && i.device_id == device_id));
        debug!("headless: pluggable {} disconnected", device_id);
        self.send_uevent(HotplugEvent::pluggable(false));
    }

    /// Report a builtin panel as gone, as on a detachable or folding device.
    pub fn disconnect_builtin(&self, device_id: i32) {
        let mut state = self.shared.state.lock();
        for info in state
            .inventory
            .iter_mut()
            .filter(|i| i.kind == DisplayKind::Builtin && i.device_id == device_id)
        {
            info.is_connected = false;
        }
        drop(state);
        debug!("headless: builtin {} disconnected", device_id);
        self.send_uevent(HotplugEvent::builtin(false));
    }

    /// Finish enumeration of a pluggable that was connected not ready.
    pub fn mark_ready(&self, device_id: i32) {
        let mut state = self.shared.state.lock();
        for info in state.inventory.iter_mut().filter(|i| i.device_id == device_id) {
            info.capabilities_ready = true;
        }
    }

    pub fn set_pluggable_ready(&self, ready: bool) {
        self.shared.state.lock().pluggable_ready = ready;
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.shared.state.lock().fail_enumeration = fail;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.shared.state.lock().fail_create = fail;
    }

    pub fn set_max_virtual(&self, max: u32) {
        self.shared.state.lock().max_virtual = max;
    }

    /// `None` leaves captures pending until [`complete_capture`](Self::complete_capture).
    pub fn set_capture_status(&self, status: Option<i32>) {
        self.shared.state.lock().capture_status = status;
    }

    pub fn set_vm_release_auto(&self, auto: bool) {
        self.shared.state.lock().vm_release_auto = auto;
    }

    /// Time every power-mode change takes on a panel.
    pub fn set_power_delay(&self, delay: Duration) {
        self.shared.state.lock().power_delay = delay;
    }

    pub fn complete_capture(&self, display: DisplayId, handle_id: u64, status: i32) {
        let _ = self.events.send(CoreEvent::CwbDone {
            display,
            status,
            handle_id,
        });
    }

    pub fn release_vm(&self, display: DisplayId) {
        let _ = self.events.send(CoreEvent::VmReleaseDone { display });
    }

    pub fn request_refresh(&self, display: DisplayId) {
        let _ = self.events.send(CoreEvent::Refresh { display });
    }

    pub fn emit_vsync(&self, display: DisplayId, timestamp_ns: i64, period_ns: u32) {
        let _ = self.events.send(CoreEvent::Vsync {
            display,
            timestamp_ns,
            period_ns,
        });
    }

    /// Block until every notification queued so far has been delivered.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        if self.events.send(CoreEvent::Flush(tx)).is_ok() {
            let _ = rx.recv_timeout(Duration::from_secs(5));
        }
    }

    pub fn submitted_captures(&self) -> Vec<SubmittedCapture> {
        self.shared.state.lock().submitted.clone()
    }

    /// Hardware ids of displays handed back through `destroy_display`.
    pub fn destroyed(&self) -> Vec<i32> {
        self.shared.state.lock().destroyed.clone()
    }

    /// Idle power-collapse changes applied to panels, oldest first.
    pub fn idle_power_collapse_calls(&self) -> Vec<(DisplayId, bool)> {
        self.shared.state.lock().idle_pc.clone()
    }

    fn send_uevent(&self, event: HotplugEvent) {
        if let Some(sender) = self.shared.uevents.lock().as_ref() {
            if sender.send(event).is_err() {
                warn!("⚠️ Device event channel closed");
            }
        }
    }
}

fn dispatch_events(shared: Weak<Shared>, rx: Receiver<CoreEvent>) {
    for event in rx {
        if let CoreEvent::Flush(done) = event {
            let _ = done.send(());
            continue;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let handler = shared.handler.lock().as_ref().and_then(|h| h.upgrade());
        let Some(handler) = handler else {
            trace!("headless event dropped: no handler");
            continue;
        };
        match event {
            CoreEvent::CwbDone {
                display,
                status,
                handle_id,
            } => handler.cwb_done(display, status, handle_id),
            CoreEvent::VmReleaseDone { display } => handler.vm_release_done(display),
            CoreEvent::Refresh { display } => handler.refresh(display),
            CoreEvent::Vsync {
                display,
                timestamp_ns,
                period_ns,
            } => handler.vsync(display, timestamp_ns, period_ns),
            CoreEvent::Flush(_) => {}
        }
    }
    debug!("headless event thread stopped");
}

impl CompositionCore for HeadlessCore {
    fn query_displays(&self) -> HwcResult<Vec<HwDisplayInfo>> {
        let state = self.shared.state.lock();
        if state.fail_enumeration {
            return Err(HwcError::NoResources);
        }
        Ok(state.inventory.clone())
    }

    fn create_display(
        &self,
        client_id: DisplayId,
        info: &HwDisplayInfo,
    ) -> HwcResult<Box<dyn DisplayDevice>> {
        let state = self.shared.state.lock();
        if state.fail_create {
            return Err(HwcError::NoResources);
        }
        if !state
            .inventory
            .iter()
            .any(|i| i.device_id == info.device_id && i.is_connected)
        {
            return Err(HwcError::BadDisplay);
        }
        let configs = match info.kind {
            DisplayKind::Builtin => builtin_configs(),
            DisplayKind::Pluggable => vec![attributes(1920, 1080, 60, 0)],
            _ => return Err(HwcError::BadParameter),
        };
        Ok(Box::new(HeadlessDevice::new(
            client_id,
            info.device_id,
            info.kind,
            info.name.clone(),
            configs,
            Arc::clone(&self.shared),
            self.events.clone(),
        )))
    }

    fn create_virtual_display(
        &self,
        client_id: DisplayId,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> HwcResult<Box<dyn DisplayDevice>> {
        let mut state = self.shared.state.lock();
        if state.active_virtual >= state.max_virtual {
            return Err(HwcError::NoResources);
        }
        state.active_virtual += 1;
        debug!("headless: virtual {}x{} {:?}", width, height, format);
        Ok(Box::new(HeadlessDevice::new(
            client_id,
            -1,
            DisplayKind::Virtual,
            format!("virtual-{}", client_id),
            vec![attributes(width, height, 60, 0)],
            Arc::clone(&self.shared),
            self.events.clone(),
        )))
    }

    fn destroy_display(&self, device: Box<dyn DisplayDevice>) {
        let mut state = self.shared.state.lock();
        if device.kind() == DisplayKind::Virtual {
            state.active_virtual = state.active_virtual.saturating_sub(1);
        }
        state.destroyed.push(device.device_id());
    }

    fn max_virtual_displays(&self) -> u32 {
        self.shared.state.lock().max_virtual
    }

    fn set_event_handler(&self, handler: Weak<dyn DisplayEventHandler>) {
        *self.shared.handler.lock() = Some(handler);
    }
}

fn attributes(width: u32, height: u32, hz: u32, config_group: i32) -> DisplayAttributes {
    DisplayAttributes {
        width,
        height,
        vsync_period_ns: 1_000_000_000 / hz,
        dpi_x: 420.0,
        dpi_y: 420.0,
        config_group,
    }
}

/// 60 and 90 Hz switch seamlessly; 120 Hz needs a full modeset.
fn builtin_configs() -> Vec<DisplayAttributes> {
    vec![
        attributes(1080, 2400, 60, 0),
        attributes(1080, 2400, 90, 0),
        attributes(1080, 2400, 120, 1),
    ]
}

/// Software display produced by [`HeadlessCore`].
pub struct HeadlessDevice {
    client_id: DisplayId,
    device_id: i32,
    kind: DisplayKind,
    name: String,
    configs: Vec<DisplayAttributes>,
    active: ConfigId,
    shared: Arc<Shared>,
    events: Sender<CoreEvent>,
    power: PowerMode,
    brightness: f32,
    color_mode: ColorMode,
    qsync: QsyncMode,
    idle_timeout_ms: u32,
    luminance: (f32, f32),
    output_buffer: Option<BufferHandle>,
}

impl HeadlessDevice {
    fn new(
        client_id: DisplayId,
        device_id: i32,
        kind: DisplayKind,
        name: String,
        configs: Vec<DisplayAttributes>,
        shared: Arc<Shared>,
        events: Sender<CoreEvent>,
    ) -> Self {
        Self {
            client_id,
            device_id,
            kind,
            name,
            configs,
            active: 0,
            shared,
            events,
            power: PowerMode::Off,
            brightness: 1.0,
            color_mode: ColorMode::Native,
            qsync: QsyncMode::None,
            idle_timeout_ms: 0,
            luminance: (0.0, 0.0),
            output_buffer: None,
        }
    }

    fn config(&self, config: ConfigId) -> HwcResult<&DisplayAttributes> {
        self.configs
            .get(config as usize)
            .ok_or(HwcError::BadParameter)
    }
}

impl DisplayDevice for HeadlessDevice {
    fn kind(&self) -> DisplayKind {
        self.kind
    }

    fn device_id(&self) -> i32 {
        self.device_id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn configs(&self) -> Vec<ConfigId> {
        (0..self.configs.len() as ConfigId).collect()
    }

    fn active_config(&self) -> ConfigId {
        self.active
    }

    fn attributes(&self, config: ConfigId) -> HwcResult<DisplayAttributes> {
        self.config(config).copied()
    }

    fn set_active_config(
        &mut self,
        config: ConfigId,
        _constraints: &VsyncPeriodChangeConstraints,
    ) -> HwcResult<ConfigSwitch> {
        self.config(config)?;
        let refresh_required = config != self.active;
        self.active = config;
        Ok(ConfigSwitch {
            active: config,
            refresh_required,
        })
    }

    fn is_seamless_switch(&self, from: ConfigId, to: ConfigId) -> bool {
        match (self.config(from), self.config(to)) {
            (Ok(a), Ok(b)) => a.config_group == b.config_group,
            _ => false,
        }
    }

    fn capabilities(&self) -> Vec<DisplayCapability> {
        match self.kind {
            DisplayKind::Builtin => vec![
                DisplayCapability::SkipClientColorTransform,
                DisplayCapability::Doze,
                DisplayCapability::Brightness,
                DisplayCapability::ProtectedContents,
            ],
            DisplayKind::Pluggable => vec![DisplayCapability::ProtectedContents],
            _ => Vec::new(),
        }
    }

    fn identification_data(&self) -> HwcResult<IdentificationData> {
        if self.kind == DisplayKind::Virtual {
            return Err(HwcError::Unsupported);
        }
        let mut data = b"HEADLESS".to_vec();
        data.extend_from_slice(&self.device_id.to_le_bytes());
        Ok(IdentificationData {
            port: self.device_id as u8,
            data,
        })
    }

    fn validate(&mut self, layers: &LayerStack) -> HwcResult<ValidationResult> {
        let changed_types = layers
            .iter()
            .filter(|l| {
                matches!(
                    l.composition,
                    Composition::Sideband | Composition::DisplayDecoration
                )
            })
            .map(|l| (l.id, Composition::Client))
            .collect();
        Ok(ValidationResult {
            changed_types,
            ..Default::default()
        })
    }

    fn present(&mut self, layers: &LayerStack) -> HwcResult<PresentResult> {
        trace!("headless {}: present {} layer(s)", self.client_id, layers.len());
        Ok(PresentResult {
            retire_fence: Fence::signaled(),
            release_fences: layers.iter().map(|l| (l.id, Fence::signaled())).collect(),
        })
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> HwcResult<()> {
        let delay = self.shared.state.lock().power_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.power = mode;
        Ok(())
    }

    fn set_vsync_enabled(&mut self, _enabled: bool) -> HwcResult<()> {
        Ok(())
    }

    fn set_brightness(&mut self, level: f32) -> HwcResult<()> {
        if self.kind != DisplayKind::Builtin {
            return Err(HwcError::Unsupported);
        }
        self.brightness = level;
        Ok(())
    }

    fn submit_capture(
        &mut self,
        _config: &CwbConfig,
        _buffer: &BufferHandle,
        handle_id: u64,
    ) -> HwcResult<()> {
        if !self.power.is_active() && self.kind != DisplayKind::Virtual {
            return Err(HwcError::NoResources);
        }
        let status = {
            let mut state = self.shared.state.lock();
            state.submitted.push(SubmittedCapture {
                display: self.client_id,
                handle_id,
            });
            state.capture_status
        };
        if let Some(status) = status {
            let _ = self.events.send(CoreEvent::CwbDone {
                display: self.client_id,
                status,
                handle_id,
            });
        }
        Ok(())
    }

    fn handle_secure_event(&mut self, event: SecureEvent) -> HwcResult<()> {
        if self.kind != DisplayKind::Builtin {
            return Err(HwcError::Unsupported);
        }
        if event == SecureEvent::Start && self.shared.state.lock().vm_release_auto {
            let _ = self.events.send(CoreEvent::VmReleaseDone {
                display: self.client_id,
            });
        }
        Ok(())
    }

    fn set_color_mode(&mut self, mode: ColorMode) -> HwcResult<()> {
        self.color_mode = mode;
        Ok(())
    }

    fn set_idle_timeout(&mut self, timeout_ms: u32) -> HwcResult<()> {
        if self.kind != DisplayKind::Builtin {
            return Err(HwcError::Unsupported);
        }
        self.idle_timeout_ms = timeout_ms;
        Ok(())
    }

    fn set_qsync_mode(&mut self, mode: QsyncMode) -> HwcResult<()> {
        if self.kind != DisplayKind::Builtin {
            return Err(HwcError::Unsupported);
        }
        self.qsync = mode;
        Ok(())
    }

    fn set_panel_luminance(&mut self, min: f32, max: f32) -> HwcResult<()> {
        self.luminance = (min, max);
        Ok(())
    }

    fn control_idle_power_collapse(&mut self, enable: bool, _synchronous: bool) -> HwcResult<()> {
        if self.kind != DisplayKind::Builtin {
            return Err(HwcError::Unsupported);
        }
        self.shared.state.lock().idle_pc.push((self.client_id, enable));
        Ok(())
    }

    fn set_output_buffer(&mut self, buffer: &BufferHandle, _release: &Fence) -> HwcResult<()> {
        if self.kind != DisplayKind::Virtual {
            return Err(HwcError::Unsupported);
        }
        self.output_buffer = Some(buffer.clone());
        Ok(())
    }
}

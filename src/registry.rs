//! Fixed-capacity display slot table.
//!
//! Slots are laid out once at session start and never move:
//!
//! ```text
//! [0]            primary builtin
//! [1 .. B)       remaining builtin panels
//! [B .. B+P)     pluggable outputs
//! [.. +V)        virtual displays
//! [.. +B)        dummy aliases, one per builtin (async power mode only)
//! ```
//!
//! Each slot carries two lockers. The power-state locker is only ever held
//! briefly to resolve where an operation should go; the operation locker
//! guards the bound display and its lifecycle state. Code that needs both
//! takes power first and never the other way around.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::display::HwcDisplay;
use crate::error::{HwcError, HwcResult};
use crate::fence::Fence;
use crate::locker::Locker;
use crate::types::{DisplayId, DisplayKind, PowerMode};

/// Upper bound on the number of slots a session can own.
pub const MAX_DISPLAYS: usize = 16;

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Disconnected,
    PendingConnect,
    Connected,
    PendingDisconnect,
    /// Bound to a placeholder, or the alias of a transitioning builtin.
    Dummy,
}

/// How many slots of each kind to lay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub builtin: usize,
    pub pluggable: usize,
    pub virtual_displays: usize,
    pub async_power: bool,
}

impl SlotLayout {
    pub fn total(&self) -> usize {
        let aliases = if self.async_power { self.builtin } else { 0 };
        self.builtin + self.pluggable + self.virtual_displays + aliases
    }

    pub fn validate(&self) -> HwcResult<()> {
        if self.builtin == 0 || self.total() > MAX_DISPLAYS {
            return Err(HwcError::BadParameter);
        }
        Ok(())
    }
}

/// Guarded by the power-state locker.
#[derive(Debug, Default)]
pub struct PowerState {
    /// An asynchronous power change is applying on the real device.
    pub transition: bool,
    pub pending_mode: Option<PowerMode>,
    /// A secure-session transition has reserved this slot.
    pub secure_transition: bool,
}

/// Guarded by the operation locker.
pub struct SlotData {
    pub display: Option<HwcDisplay>,
    pub device_id: i32,
    pub state: SlotState,
    pub test_pattern: bool,
}

impl SlotData {
    fn empty() -> Self {
        Self {
            display: None,
            device_id: -1,
            state: SlotState::Disconnected,
            test_pattern: false,
        }
    }

    pub fn display(&self) -> HwcResult<&HwcDisplay> {
        self.display.as_ref().ok_or(HwcError::BadDisplay)
    }

    pub fn display_mut(&mut self) -> HwcResult<&mut HwcDisplay> {
        self.display.as_mut().ok_or(HwcError::BadDisplay)
    }
}

/// Post-commit bookkeeping of one slot.
#[derive(Debug, Default)]
pub struct CommitState {
    /// Bumped after every present.
    pub frames: u64,
    pub retire_fence: Option<Fence>,
    pub last_error: Option<HwcError>,
    pub pending_refresh: bool,
}

pub struct Slot {
    id: DisplayId,
    kind: DisplayKind,
    alias: Option<DisplayId>,
    pub(crate) power: Locker<PowerState>,
    pub(crate) op: Locker<SlotData>,
    /// Set while the slot waits for the VM to release the panel.
    pub(crate) vm_release: Locker<bool>,
    pub(crate) commit: Locker<CommitState>,
    vsync_enabled: AtomicBool,
}

impl Slot {
    fn new(id: DisplayId, kind: DisplayKind, alias: Option<DisplayId>) -> Self {
        Self {
            id,
            kind,
            alias,
            power: Locker::default(),
            op: Locker::new(SlotData::empty()),
            vm_release: Locker::new(false),
            commit: Locker::default(),
            vsync_enabled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn kind(&self) -> DisplayKind {
        self.kind
    }

    /// Dummy slot operations are redirected to while this one transitions.
    pub fn alias(&self) -> Option<DisplayId> {
        self.alias
    }

    pub fn state(&self) -> SlotState {
        self.op.lock().state
    }

    /// Readable without the operation lock, so vsync delivery never waits
    /// behind a slow device call.
    pub fn vsync_enabled(&self) -> bool {
        self.vsync_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_vsync_enabled(&self, enabled: bool) {
        self.vsync_enabled.store(enabled, Ordering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.op.lock().display.is_some()
    }
}

pub struct DisplayRegistry {
    layout: SlotLayout,
    slots: Vec<Slot>,
}

impl DisplayRegistry {
    pub fn new(layout: SlotLayout) -> HwcResult<Self> {
        layout.validate()?;

        let alias_base = layout.builtin + layout.pluggable + layout.virtual_displays;
        let mut slots = Vec::with_capacity(layout.total());
        for i in 0..layout.builtin {
            let alias = layout.async_power.then(|| (alias_base + i) as DisplayId);
            slots.push(Slot::new(i as DisplayId, DisplayKind::Builtin, alias));
        }
        for _ in 0..layout.pluggable {
            slots.push(Slot::new(slots.len() as DisplayId, DisplayKind::Pluggable, None));
        }
        for _ in 0..layout.virtual_displays {
            slots.push(Slot::new(slots.len() as DisplayId, DisplayKind::Virtual, None));
        }
        if layout.async_power {
            for _ in 0..layout.builtin {
                slots.push(Slot::new(slots.len() as DisplayId, DisplayKind::Dummy, None));
            }
        }

        debug!("laid out {} display slots: {:?}", slots.len(), layout);
        Ok(Self { layout, slots })
    }

    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolve an id to its slot. Does not check that anything is bound.
    pub fn slot(&self, id: DisplayId) -> HwcResult<&Slot> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.slots.get(i))
            .ok_or(HwcError::BadDisplay)
    }

    pub fn primary(&self) -> &Slot {
        &self.slots[0]
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn slots_of(&self, kind: DisplayKind) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(move |s| s.kind == kind)
    }

    /// First unbound slot of `kind`.
    pub fn free_slot(&self, kind: DisplayKind) -> Option<&Slot> {
        self.slots_of(kind).find(|s| !s.is_bound())
    }

    /// Slot currently bound to hardware device `device_id`.
    pub fn slot_for_device(&self, kind: DisplayKind, device_id: i32) -> Option<&Slot> {
        self.slots_of(kind).find(|s| {
            let data = s.op.lock();
            data.display.is_some() && data.device_id == device_id
        })
    }
}

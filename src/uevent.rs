//! Process-scoped device event listener.
//!
//! Reading device events is a blocking call that cannot be interrupted, so
//! the listener is not owned by any session. It is started once per process
//! and sessions register with it. Two threads cooperate:
//!
//! - the *reader* blocks on the [`EventSource`] and parks each event in a
//!   one-per-category pending slot, overwriting anything not yet delivered;
//! - the *dispatcher* hands pending events to the registered listener.
//!
//! Events that arrive while nobody is registered stay pending (latest per
//! category) until a listener shows up.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hwc_session::uevent::{self, ChannelEventSource};
//!
//! let (source, _sender) = ChannelEventSource::new();
//! let hub = uevent::init(Box::new(source));
//! assert!(hub.init_done());
//! ```

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use crate::locker::Locker;

/// How often the dispatcher re-checks for shutdown while idle.
const DISPATCH_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HotplugCategory {
    Builtin,
    Pluggable,
}

/// One device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugEvent {
    pub category: HotplugCategory,
    pub connected: bool,
    /// Bits per pixel requested by the sink, 0 when unspecified.
    pub hpd_bpp: u32,
    /// Non-zero asks for a test pattern instead of client content.
    pub hpd_pattern: u32,
}

impl HotplugEvent {
    pub fn pluggable(connected: bool) -> Self {
        Self {
            category: HotplugCategory::Pluggable,
            connected,
            hpd_bpp: 0,
            hpd_pattern: 0,
        }
    }

    pub fn builtin(connected: bool) -> Self {
        Self {
            category: HotplugCategory::Builtin,
            ..Self::pluggable(connected)
        }
    }
}

/// Blocking producer of device events.
pub trait EventSource: Send {
    /// Block until the next event. `None` means the source is gone.
    fn wait_event(&mut self) -> Option<HotplugEvent>;
}

pub trait UEventListener: Send + Sync {
    fn on_hotplug_event(&self, event: HotplugEvent);
}

/// Event source fed through a channel.
pub struct ChannelEventSource {
    rx: Receiver<HotplugEvent>,
}

impl ChannelEventSource {
    pub fn new() -> (Self, Sender<HotplugEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { rx }, tx)
    }
}

impl EventSource for ChannelEventSource {
    fn wait_event(&mut self) -> Option<HotplugEvent> {
        self.rx.recv().ok()
    }
}

#[derive(Default)]
struct HubState {
    pending: BTreeMap<HotplugCategory, HotplugEvent>,
    listener: Option<Weak<dyn UEventListener>>,
    closed: bool,
    received: u64,
    delivered: u64,
}

pub struct UEventHub {
    state: Locker<HubState>,
    init_done: Mutex<bool>,
}

impl UEventHub {
    /// Start a listener on `source`. Most callers want the process-wide
    /// instance from [`init`] instead.
    pub fn start(source: Box<dyn EventSource>) -> Arc<Self> {
        let hub = Arc::new(Self {
            state: Locker::default(),
            init_done: Mutex::new(false),
        });

        let reader_hub = Arc::clone(&hub);
        let reader = thread::Builder::new()
            .name("hwc-uevent-reader".into())
            .spawn(move || reader_hub.read_loop(source));
        let dispatch_hub = Arc::clone(&hub);
        let dispatcher = thread::Builder::new()
            .name("hwc-uevent-dispatch".into())
            .spawn(move || dispatch_hub.dispatch_loop());

        match (reader, dispatcher) {
            (Ok(_), Ok(_)) => {
                *hub.init_done.lock() = true;
                info!("👂 Device event listener started");
            }
            (r, d) => warn!(
                "⚠️ Device event listener failed to start (reader ok: {}, dispatcher ok: {})",
                r.is_ok(),
                d.is_ok()
            ),
        }
        hub
    }

    pub fn init_done(&self) -> bool {
        *self.init_done.lock()
    }

    /// Deliver future events to `listener`, replacing any earlier one.
    pub fn register(&self, listener: Weak<dyn UEventListener>) {
        self.state.update(|s| s.listener = Some(listener));
        debug!("device event listener registered");
    }

    pub fn unregister(&self) {
        self.state.update(|s| s.listener = None);
    }

    /// Events read from the source so far.
    pub fn received(&self) -> u64 {
        self.state.lock().received
    }

    /// Events handed to a listener so far.
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    fn read_loop(&self, mut source: Box<dyn EventSource>) {
        while let Some(event) = source.wait_event() {
            trace!("device event {:?}", event);
            self.state.update(|s| {
                s.received += 1;
                if let Some(old) = s.pending.insert(event.category, event) {
                    debug!("coalesced undelivered {:?} event", old.category);
                }
            });
        }
        info!("Device event source closed");
        self.state.update(|s| s.closed = true);
    }

    fn dispatch_loop(&self) {
        loop {
            let (event, listener) = {
                let mut state = self.state.lock();
                let ready = |s: &mut HubState| {
                    s.closed || (!s.pending.is_empty() && live(&s.listener).is_some())
                };
                if !self.state.wait_until(&mut state, DISPATCH_POLL, ready).is_satisfied() {
                    continue;
                }
                let Some(listener) = live(&state.listener) else {
                    if state.closed {
                        return;
                    }
                    continue;
                };
                let Some((_, event)) = state.pending.pop_first() else {
                    if state.closed {
                        return;
                    }
                    continue;
                };
                state.delivered += 1;
                (event, listener)
            };
            listener.on_hotplug_event(event);
            // Promoted only for the duration of one notification.
            drop(listener);
        }
    }
}

fn live(listener: &Option<Weak<dyn UEventListener>>) -> Option<Arc<dyn UEventListener>> {
    listener.as_ref().and_then(Weak::upgrade)
}

static HUB: OnceLock<Arc<UEventHub>> = OnceLock::new();

/// Start the process-wide listener. Only the first call's source is used;
/// later calls return the running instance.
pub fn init(source: Box<dyn EventSource>) -> Arc<UEventHub> {
    let mut source = Some(source);
    let hub = HUB.get_or_init(|| match source.take() {
        Some(src) => UEventHub::start(src),
        None => UEventHub::start(Box::new(ChannelEventSource::new().0)),
    });
    if source.is_some() {
        debug!("device event listener already running; ignoring new source");
    }
    Arc::clone(hub)
}

/// The process-wide listener, if started.
pub fn global() -> Option<Arc<UEventHub>> {
    HUB.get().cloned()
}

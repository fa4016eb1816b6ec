// Shared fixtures for the session integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hwc_session::cwb::{CwbCallback, CwbStatus};
use hwc_session::headless::HeadlessCore;
use hwc_session::types::{
    BufferHandle, DisplayId, PixelFormat, PowerMode, VsyncPeriodChangeTimeline,
};
use hwc_session::{HwcSession, NotificationSink, SessionConfig};

/// Default layout with every wait shortened so failures surface quickly.
pub fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.timeouts.external_connection_ms = 100;
    config.timeouts.enumeration_poll_ms = 10;
    config.timeouts.vm_release_interval_ms = 20;
    config.timeouts.vm_release_retries = 3;
    config.timeouts.commit_done_interval_ms = 50;
    config.timeouts.commit_done_retries = 4;
    config.timeouts.client_hotplug_wait_ms = 100;
    config.timeouts.power_transition_ms = 2000;
    config.timeouts.cwb_completion_ms = 500;
    config
}

pub fn start(config: SessionConfig) -> (Arc<HwcSession>, Arc<HeadlessCore>) {
    let core = HeadlessCore::new(config.display.builtin);
    let session = HwcSession::new(core.clone(), config).expect("session starts");
    (session, core)
}

pub fn power_on(session: &HwcSession, display: DisplayId) {
    session.set_power_mode(display, PowerMode::On).unwrap();
    session.wait_for_power_transition(display).unwrap();
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Hotplug(DisplayId, bool),
    Refresh(DisplayId),
    Vsync(DisplayId, i64),
    TimingChanged(DisplayId, VsyncPeriodChangeTimeline),
}

/// Sink that records everything it is told.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn hotplugs(&self) -> Vec<(DisplayId, bool)> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Hotplug(d, c) => Some((d, c)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.events.lock().iter().filter(|n| pred(n)).count()
    }

    fn push(&self, n: Notification) {
        self.events.lock().push(n);
    }
}

impl NotificationSink for RecordingSink {
    fn on_hotplug(&self, display: DisplayId, connected: bool) {
        self.push(Notification::Hotplug(display, connected));
    }

    fn on_refresh(&self, display: DisplayId) {
        self.push(Notification::Refresh(display));
    }

    fn on_vsync(&self, display: DisplayId, timestamp_ns: i64, _period_ns: u32) {
        self.push(Notification::Vsync(display, timestamp_ns));
    }

    fn on_vsync_period_timing_changed(
        &self,
        display: DisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    ) {
        self.push(Notification::TimingChanged(display, *timeline));
    }
}

/// Capture callback that records completions in order.
#[derive(Default)]
pub struct RecordingCapture {
    done: Mutex<Vec<(DisplayId, CwbStatus, u64)>>,
}

impl RecordingCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn done(&self) -> Vec<(DisplayId, CwbStatus, u64)> {
        self.done.lock().clone()
    }
}

impl CwbCallback for RecordingCapture {
    fn on_cwb_done(&self, display: DisplayId, status: CwbStatus, buffer: &BufferHandle) {
        self.done.lock().push((display, status, buffer.id));
    }
}

pub fn capture_buffer(id: u64) -> BufferHandle {
    BufferHandle::new(id, 1080, 2400, PixelFormat::Rgba8888)
}

/// A client that keeps committing frames on one display.
pub struct Committer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Committer {
    pub fn start(session: Arc<HwcSession>, display: DisplayId) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                let _ = session.commit_or_prepare(display, false);
                thread::sleep(Duration::from_millis(10));
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Committer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

//! Client notification sink.
//!
//! Exactly one sink is registered at a time; registering again replaces it.
//! Hotplug is special: the first connect events fire during bring-up, often
//! before the client has registered, so delivery waits a bounded time for a
//! sink to appear and drops the event afterwards.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HwcError, HwcResult};
use crate::locker::Locker;
use crate::types::{DisplayId, VsyncPeriodChangeTimeline};

/// Events the session reports to its client.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn on_hotplug(&self, display: DisplayId, connected: bool);
    fn on_refresh(&self, display: DisplayId);
    fn on_vsync(&self, display: DisplayId, timestamp_ns: i64, period_ns: u32);
    fn on_vsync_period_timing_changed(
        &self,
        display: DisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    );
}

pub struct Callbacks {
    sink: Locker<Option<Arc<dyn NotificationSink>>>,
    hotplug_wait: Duration,
}

impl Callbacks {
    pub fn new(hotplug_wait: Duration) -> Self {
        Self {
            sink: Locker::new(None),
            hotplug_wait,
        }
    }

    /// Install `sink`, replacing any previous one.
    pub fn register(&self, sink: Arc<dyn NotificationSink>) {
        let replaced = self.sink.update(|s| s.replace(sink).is_some());
        debug!("notification sink registered (replaced: {})", replaced);
    }

    pub fn unregister(&self) {
        self.sink.update(|s| s.take());
    }

    pub fn is_registered(&self) -> bool {
        self.sink.lock().is_some()
    }

    fn current(&self) -> HwcResult<Arc<dyn NotificationSink>> {
        self.sink.lock().clone().ok_or(HwcError::NoResources)
    }

    pub fn hotplug(&self, display: DisplayId, connected: bool) -> HwcResult<()> {
        let sink = {
            let mut guard = self.sink.lock();
            let outcome = self
                .sink
                .wait_until(&mut guard, self.hotplug_wait, |s| s.is_some());
            if !outcome.is_satisfied() {
                warn!(
                    "⚠️ No client registered after {:?}; dropping hotplug for display {}",
                    self.hotplug_wait, display
                );
                return Err(HwcError::NoResources);
            }
            guard.clone().ok_or(HwcError::NoResources)?
        };
        sink.on_hotplug(display, connected);
        Ok(())
    }

    pub fn refresh(&self, display: DisplayId) -> HwcResult<()> {
        self.current()?.on_refresh(display);
        Ok(())
    }

    pub fn vsync(&self, display: DisplayId, timestamp_ns: i64, period_ns: u32) -> HwcResult<()> {
        self.current()?.on_vsync(display, timestamp_ns, period_ns);
        Ok(())
    }

    pub fn vsync_period_timing_changed(
        &self,
        display: DisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    ) -> HwcResult<()> {
        self.current()?.on_vsync_period_timing_changed(display, timeline);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_refresh_without_sink_reports_no_resources() {
        let callbacks = Callbacks::new(Duration::from_millis(10));
        assert_eq!(callbacks.refresh(0), Err(HwcError::NoResources));
        assert_eq!(callbacks.vsync(0, 1, 2), Err(HwcError::NoResources));
    }

    #[test]
    fn test_register_replaces_previous_sink() {
        let callbacks = Callbacks::new(Duration::from_millis(10));

        let mut first = MockNotificationSink::new();
        first.expect_on_refresh().times(0);
        let mut second = MockNotificationSink::new();
        second.expect_on_refresh().with(eq(3)).times(1).return_const(());

        callbacks.register(Arc::new(first));
        callbacks.register(Arc::new(second));
        callbacks.refresh(3).unwrap();
    }

    #[test]
    fn test_hotplug_waits_for_late_registration() {
        let callbacks = Arc::new(Callbacks::new(Duration::from_secs(2)));
        let mut sink = MockNotificationSink::new();
        sink.expect_on_hotplug()
            .with(eq(1), eq(true))
            .times(1)
            .return_const(());

        let remote = Arc::clone(&callbacks);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.register(Arc::new(sink));
        });
        callbacks.hotplug(1, true).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_hotplug_dropped_after_wait() {
        let callbacks = Callbacks::new(Duration::from_millis(20));
        let start = Instant::now();
        assert_eq!(callbacks.hotplug(1, true), Err(HwcError::NoResources));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}

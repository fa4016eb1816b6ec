//! Concurrent writeback (CWB) capture pipeline.
//!
//! Clients capture composed frames of a display into their own buffers.
//! Requests are queued per display and handed to the composition core one at
//! a time; the hardware writeback block can only serve a single capture.
//!
//! # Request Flow
//!
//! 1. Client posts a buffer with a capture config and a callback
//! 2. Request is validated and appended to the display's FIFO
//! 3. The display's worker (started on demand) submits the front request
//! 4. The core reports completion through `notify_cwb_status`
//! 5. The request is marked terminal exactly once and its callback fires
//! 6. The worker moves on, or retires when the queue is empty
//!
//! # Features
//!
//! - Strict FIFO per display, independent across displays
//! - Exactly-once terminal notification; late or duplicate completions are
//!   ignored
//! - Bounded wait on every in-flight capture; a stuck capture fails only its
//!   own request
//! - Callbacks held weakly; a dropped client is skipped silently
//! - Teardown fails every outstanding request and stops the worker

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::error::{HwcError, HwcResult};
use crate::locker::Locker;
use crate::types::{BufferHandle, CwbConfig, DisplayId};

/// Terminal state of a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CwbStatus {
    Success,
    Failure,
}

impl CwbStatus {
    /// Map a status reported by the composition core; zero is success.
    pub fn from_core(status: i32) -> Self {
        if status == 0 {
            CwbStatus::Success
        } else {
            CwbStatus::Failure
        }
    }
}

/// Receives the outcome of a capture request.
pub trait CwbCallback: Send + Sync {
    fn on_cwb_done(&self, display: DisplayId, status: CwbStatus, buffer: &BufferHandle);
}

/// Hands a capture to the hardware of `display`.
pub trait CaptureTarget: Send + Sync {
    fn submit_capture(
        &self,
        display: DisplayId,
        config: &CwbConfig,
        buffer: &BufferHandle,
        handle_id: u64,
    ) -> HwcResult<()>;
}

struct QueueNode {
    callback: Weak<dyn CwbCallback>,
    config: CwbConfig,
    buffer: BufferHandle,
    display: DisplayId,
    handle_id: u64,
    notified: Option<CwbStatus>,
    request_completed: bool,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueueNode>,
    worker_running: bool,
}

struct DisplayCwbSession {
    display: DisplayId,
    state: Locker<QueueState>,
}

impl DisplayCwbSession {
    /// Move the node for `handle_id` to its terminal state and drop it from
    /// the queue. Returns false when no such node is waiting.
    fn complete(&self, handle_id: u64, status: CwbStatus) -> bool {
        let node = {
            let mut state = self.state.lock();
            let Some(pos) = state.queue.iter().position(|n| n.handle_id == handle_id) else {
                return false;
            };
            let node = &mut state.queue[pos];
            if node.notified.is_some() {
                return false;
            }
            node.notified = Some(status);
            node.request_completed = true;
            state.queue.remove(pos)
        };
        self.state.notify_all();

        if let Some(node) = node {
            deliver(&node);
        }
        true
    }

    /// Fail every queued request.
    fn fail_all(&self) -> usize {
        let drained: Vec<QueueNode> = {
            let mut state = self.state.lock();
            state
                .queue
                .drain(..)
                .filter_map(|mut n| {
                    if n.notified.is_some() {
                        return None;
                    }
                    n.notified = Some(CwbStatus::Failure);
                    n.request_completed = true;
                    Some(n)
                })
                .collect()
        };
        self.state.notify_all();
        for node in &drained {
            deliver(node);
        }
        drained.len()
    }

    fn is_active(&self) -> bool {
        let state = self.state.lock();
        !state.queue.is_empty() || state.worker_running
    }
}

fn deliver(node: &QueueNode) {
    debug_assert!(node.request_completed);
    let Some(status) = node.notified else {
        return;
    };
    match node.callback.upgrade() {
        Some(callback) => callback.on_cwb_done(node.display, status, &node.buffer),
        None => debug!(
            "capture {} on display {} finished after its client went away",
            node.handle_id, node.display
        ),
    }
}

pub struct CwbPipeline {
    sessions: Mutex<HashMap<DisplayId, Arc<DisplayCwbSession>>>,
    target: Weak<dyn CaptureTarget>,
    completion_timeout: Duration,
}

impl CwbPipeline {
    pub fn new(target: Weak<dyn CaptureTarget>, completion_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            target,
            completion_timeout,
        }
    }

    /// Queue a capture of `display` into `buffer`. The buffer id is the
    /// correlation id and must not already be queued anywhere.
    pub fn post_buffer(
        &self,
        display: DisplayId,
        config: &CwbConfig,
        buffer: &BufferHandle,
        callback: Weak<dyn CwbCallback>,
    ) -> HwcResult<()> {
        validate_request(config, buffer)?;

        let (session, start_worker) = {
            let mut sessions = self.sessions.lock();
            let duplicate = sessions.values().any(|s| {
                s.state
                    .lock()
                    .queue
                    .iter()
                    .any(|n| n.handle_id == buffer.id)
            });
            if duplicate {
                warn!("⚠️ Capture buffer {} is already queued", buffer.id);
                return Err(HwcError::BadParameter);
            }
            let session = Arc::clone(sessions.entry(display).or_insert_with(|| {
                Arc::new(DisplayCwbSession {
                    display,
                    state: Locker::default(),
                })
            }));

            let mut state = session.state.lock();
            state.queue.push_back(QueueNode {
                callback,
                config: config.clone(),
                buffer: buffer.clone(),
                display,
                handle_id: buffer.id,
                notified: None,
                request_completed: false,
            });
            let start = !state.worker_running;
            state.worker_running = true;
            drop(state);
            (session, start)
        };
        session.state.notify_all();

        if start_worker {
            self.spawn_worker(session)?;
        }
        debug!("queued capture {} on display {}", buffer.id, display);
        Ok(())
    }

    fn spawn_worker(&self, session: Arc<DisplayCwbSession>) -> HwcResult<()> {
        let target = self.target.clone();
        let timeout = self.completion_timeout;
        let display = session.display;
        let worker_session = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name(format!("hwc-cwb-{}", display))
            .spawn(move || run_worker(worker_session, target, timeout));
        if let Err(e) = spawned {
            warn!("⚠️ Could not start capture worker for display {}: {}", display, e);
            session.state.update(|s| s.worker_running = false);
            session.fail_all();
            return Err(HwcError::NoResources);
        }
        info!("📸 Capture worker started for display {}", display);
        Ok(())
    }

    /// Completion reported by the composition core.
    pub fn notify_cwb_status(&self, display: DisplayId, status: CwbStatus, handle_id: u64) {
        let session = self.sessions.lock().get(&display).cloned();
        let completed = session
            .map(|s| s.complete(handle_id, status))
            .unwrap_or(false);
        if !completed {
            debug!(
                "ignoring completion of capture {} on display {}: not pending",
                handle_id, display
            );
        }
    }

    pub fn is_cwb_active_on_display(&self, display: DisplayId) -> bool {
        self.sessions
            .lock()
            .get(&display)
            .map(|s| s.is_active())
            .unwrap_or(false)
    }

    /// Number of requests still queued on `display`.
    pub fn pending(&self, display: DisplayId) -> usize {
        self.sessions
            .lock()
            .get(&display)
            .map(|s| s.state.lock().queue.len())
            .unwrap_or(0)
    }

    /// Fail all outstanding requests on `display` and wait (bounded) for its
    /// worker to stop.
    pub fn teardown(&self, display: DisplayId) -> usize {
        let Some(session) = self.sessions.lock().get(&display).cloned() else {
            return 0;
        };
        let failed = session.fail_all();

        let mut state = session.state.lock();
        let stopped = session
            .state
            .wait_until(&mut state, self.completion_timeout, |s| !s.worker_running);
        if !stopped.is_satisfied() {
            warn!("⚠️ Capture worker on display {} did not stop in time", display);
        }
        if failed > 0 {
            info!("Tore down {} pending capture(s) on display {}", failed, display);
        }
        failed
    }

    /// Tear down every display.
    pub fn teardown_all(&self) {
        let displays: Vec<DisplayId> = self.sessions.lock().keys().copied().collect();
        for display in displays {
            self.teardown(display);
        }
    }
}

fn validate_request(config: &CwbConfig, buffer: &BufferHandle) -> HwcResult<()> {
    if !buffer.is_valid() {
        return Err(HwcError::BadParameter);
    }
    let roi = config.roi;
    if roi == Default::default() {
        return Ok(());
    }
    if roi.is_empty()
        || roi.left < 0
        || roi.top < 0
        || roi.right as u32 > buffer.width
        || roi.bottom as u32 > buffer.height
    {
        return Err(HwcError::BadParameter);
    }
    Ok(())
}

fn run_worker(session: Arc<DisplayCwbSession>, target: Weak<dyn CaptureTarget>, timeout: Duration) {
    let display = session.display;
    loop {
        let (handle_id, config, buffer) = {
            let mut state = session.state.lock();
            let front = state
                .queue
                .front()
                .map(|n| (n.handle_id, n.config.clone(), n.buffer.clone()));
            match front {
                Some(front) => front,
                None => {
                    state.worker_running = false;
                    drop(state);
                    session.state.notify_all();
                    debug!("capture worker for display {} idle, exiting", display);
                    return;
                }
            }
        };

        let submitted = match target.upgrade() {
            Some(t) => t.submit_capture(display, &config, &buffer, handle_id),
            None => Err(HwcError::NoResources),
        };
        if let Err(e) = submitted {
            warn!(
                "⚠️ Capture {} on display {} could not be submitted: {}",
                handle_id, display, e
            );
            session.complete(handle_id, CwbStatus::Failure);
            continue;
        }

        let finished = {
            let mut state = session.state.lock();
            session.state.wait_until(&mut state, timeout, |s| {
                !s.queue.iter().any(|n| n.handle_id == handle_id)
            })
        };
        if !finished.is_satisfied() {
            warn!(
                "⚠️ Capture {} on display {} timed out after {:?}",
                handle_id, display, timeout
            );
            session.complete(handle_id, CwbStatus::Failure);
        }
    }
}

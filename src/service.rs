//! Service shell
//!
//! Wires the process together: starts the process-scoped device event
//! listener, brings up the composition core and the display session, and
//! runs until SIGTERM or SIGINT. While running it drives the primary
//! display's vsync from a timer.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;

use crate::config::SessionConfig;
use crate::headless::HeadlessCore;
use crate::session::HwcSession;
use crate::uevent::{self, ChannelEventSource, UEventHub};

/// Fallback vsync period when the primary cannot report one.
const DEFAULT_VSYNC_PERIOD_NS: u32 = 16_666_666;

/// How often readiness is logged while nobody has registered.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

pub struct HwcService {
    session: Arc<HwcSession>,
    core: Arc<HeadlessCore>,
    hub: Arc<UEventHub>,
    started: Instant,
    /// Primary vsync period, refreshed with the status report.
    vsync_period_ns: u32,
    running: bool,
}

impl HwcService {
    /// Bring up the listener, the core and the session.
    pub fn new(config: SessionConfig) -> Result<Self> {
        info!("🏗️ Initializing display service...");
        if !config.general.null_display_mode {
            bail!("no display hardware backend is available; enable general.null_display_mode");
        }

        let core = HeadlessCore::new(config.display.builtin);
        let (source, sender) = ChannelEventSource::new();
        core.attach_uevents(sender);
        debug!("👂 Starting device event listener...");
        let hub = uevent::init(Box::new(source));

        let session = HwcSession::new(core.clone(), config)
            .context("Failed to start display session")?;
        session.attach_listener(&hub);

        let vsync_period_ns = query_vsync_period(&session);
        info!("✅ Display service initialized");
        Ok(Self {
            session,
            core,
            hub,
            started: Instant::now(),
            vsync_period_ns,
            running: false,
        })
    }

    pub fn session(&self) -> &Arc<HwcSession> {
        &self.session
    }

    pub fn core(&self) -> &Arc<HeadlessCore> {
        &self.core
    }

    /// Run until a termination signal arrives.
    pub async fn run(mut self) -> Result<()> {
        info!("🎬 Starting display service loop");
        self.running = true;

        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        let mut vsync = vsync_timer(self.vsync_period_ns);
        let mut status = tokio::time::interval(STATUS_INTERVAL);

        while self.running {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("📨 Received SIGTERM, shutting down gracefully");
                    self.shutdown();
                }
                _ = sigint.recv() => {
                    info!("📨 Received SIGINT (Ctrl+C), shutting down gracefully");
                    self.shutdown();
                }
                _ = vsync.tick() => self.tick(),
                _ = status.tick() => {
                    if self.refresh_vsync_period() {
                        vsync = vsync_timer(self.vsync_period_ns);
                    }
                    self.report_status();
                }
            }
        }

        info!("🛑 Display service loop finished");
        Ok(())
    }

    pub fn vsync_period(&self) -> u32 {
        self.vsync_period_ns
    }

    /// Re-read the primary's period; true when it changed.
    fn refresh_vsync_period(&mut self) -> bool {
        let period = query_vsync_period(&self.session);
        if period == self.vsync_period_ns {
            return false;
        }
        debug!("vsync period {} -> {} ns", self.vsync_period_ns, period);
        self.vsync_period_ns = period;
        true
    }

    /// One vsync edge on the primary display.
    fn tick(&self) {
        let primary = self.session.primary_display();
        let timestamp = self.started.elapsed().as_nanos() as i64;
        self.core.emit_vsync(primary, timestamp, self.vsync_period_ns);
    }

    fn report_status(&self) {
        if self.session.is_ready() {
            debug!(
                "primary {} ready, {} hotplug event(s) pending",
                self.session.primary_display(),
                self.session.pending_hotplug_count()
            );
        } else {
            warn!("⏳ Waiting for a client to register and commit on the primary display");
        }
    }

    fn shutdown(&mut self) {
        info!("🔽 Shutting down display service...");
        self.running = false;
        self.hub.unregister();
        self.session.shutdown();
        info!("✅ Display service shutdown complete");
    }
}

fn query_vsync_period(session: &HwcSession) -> u32 {
    session
        .get_display_vsync_period(session.primary_display())
        .unwrap_or(DEFAULT_VSYNC_PERIOD_NS)
}

fn vsync_timer(period_ns: u32) -> tokio::time::Interval {
    let mut timer = tokio::time::interval(Duration::from_nanos(period_ns as u64));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer
}

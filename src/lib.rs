//! # HWC Session Library
//!
//! Session layer of a hardware display-compositor service. It sits between
//! graphics clients and a composition engine and owns everything that spans
//! displays and threads.
//!
//! ## Architecture
//!
//! - `registry`: fixed slot table, per-slot power and operation lockers
//! - `session`: client entry point, lock routing and the cross-display
//!   coordinators (hotplug, power, secure session, commit, admin commands)
//! - `cwb`: per-display concurrent-writeback capture queues and workers
//! - `uevent`: process-scoped device event listener
//! - `callbacks`: client notification sink
//! - `display`, `layer`: per-display frame state and layer stacks
//! - `device`: traits implemented by the composition engine
//! - `headless`: in-process engine for null display mode and tests
//! - `config`: TOML configuration
//! - `service`: signal-driven service shell
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hwc_session::{headless::HeadlessCore, HwcSession, SessionConfig};
//! use hwc_session::types::PowerMode;
//!
//! fn main() -> anyhow::Result<()> {
//!     let core = HeadlessCore::new(1);
//!     let session = HwcSession::new(core, SessionConfig::default())?;
//!     session.set_power_mode(0, PowerMode::On)?;
//!     session.wait_for_power_transition(0)?;
//!     let outcome = session.commit_or_prepare(0, false)?;
//!     assert!(outcome.retire_fence.is_some());
//!     Ok(())
//! }
//! ```

pub mod callbacks;
pub mod config;
pub mod cwb;
pub mod device;
pub mod display;
pub mod error;
pub mod fence;
pub mod headless;
pub mod layer;
pub mod locker;
pub mod registry;
pub mod service;
pub mod session;
pub mod types;
pub mod uevent;

// Re-export main types for easy access
pub use callbacks::NotificationSink;
pub use config::SessionConfig;
pub use error::{HwcError, HwcResult};
pub use service::HwcService;
pub use session::HwcSession;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

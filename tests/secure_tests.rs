//! Secure session integration tests
//!
//! The four-phase trusted-UI protocol on a two-panel device: ordering,
//! process-wide exclusion, the VM hand-off and its interaction with power
//! changes and commits.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{fast_config, power_on, start};
use hwc_session::headless::HeadlessCore;
use hwc_session::session::SecurePhase;
use hwc_session::types::PowerMode;
use hwc_session::{HwcError, HwcSession, SessionConfig};
use serde_json::json;

fn dual_panel_config() -> SessionConfig {
    let mut config = fast_config();
    config.display.builtin = 2;
    config.display.pluggable = 0;
    config.display.virtual_displays = 0;
    config.display.max_virtual_displays = 0;
    config
}

fn dual_panel() -> (Arc<HwcSession>, Arc<HeadlessCore>) {
    let (session, core) = start(dual_panel_config());
    power_on(&session, 0);
    power_on(&session, 1);
    (session, core)
}

#[test]
fn test_full_secure_lifecycle() {
    let (session, _core) = dual_panel();
    assert!(!session.is_secure_session_active());

    session.prepare_secure_session(0).unwrap();
    assert_eq!(session.secure_session(), Some((0, SecurePhase::Prepared)));
    assert!(!session.is_secure_session_active());

    session.start_secure_session(0).unwrap();
    assert_eq!(session.secure_session(), Some((0, SecurePhase::Started)));
    assert!(session.is_secure_session_active());

    session.end_secure_session(0).unwrap();
    assert!(!session.is_secure_session_active());

    session.unprepare_secure_session(0).unwrap();
    assert_eq!(session.secure_session(), None);

    // The panel is usable again.
    let outcome = session.commit_or_prepare(0, false).unwrap();
    assert!(outcome.retire_fence.is_some());
}

#[test]
fn test_one_secure_session_at_a_time() {
    let (session, _core) = dual_panel();

    session.prepare_secure_session(0).unwrap();
    assert_eq!(
        session.prepare_secure_session(1),
        Err(HwcError::TransitionInProgress)
    );
    assert_eq!(
        session.start_secure_session(1),
        Err(HwcError::TransitionInProgress)
    );
    session.unprepare_secure_session(0).unwrap();

    session.prepare_secure_session(1).unwrap();
    session.unprepare_secure_session(1).unwrap();
}

#[test]
fn test_out_of_order_calls_are_rejected() {
    let (session, _core) = dual_panel();

    assert_eq!(session.start_secure_session(0), Err(HwcError::BadParameter));
    assert_eq!(session.end_secure_session(0), Err(HwcError::BadParameter));
    assert_eq!(session.unprepare_secure_session(0), Err(HwcError::BadParameter));

    session.prepare_secure_session(0).unwrap();
    assert_eq!(session.end_secure_session(0), Err(HwcError::BadParameter));
    assert_eq!(session.prepare_secure_session(0), Err(HwcError::TransitionInProgress));
    session.start_secure_session(0).unwrap();
    assert_eq!(session.unprepare_secure_session(0), Err(HwcError::BadParameter));
    session.end_secure_session(0).unwrap();
    session.unprepare_secure_session(0).unwrap();
}

#[test]
fn test_secure_session_needs_a_builtin() {
    let (session, _core) = start(fast_config());
    // Pluggable slot, virtual slot, dummy alias, out of range.
    assert!(session.prepare_secure_session(1).is_err());
    assert_eq!(session.prepare_secure_session(2), Err(HwcError::Unsupported));
    assert_eq!(session.prepare_secure_session(3), Err(HwcError::BadDisplay));
    assert_eq!(session.prepare_secure_session(42), Err(HwcError::BadDisplay));
}

#[test]
fn test_vm_release_timeout() {
    let (session, core) = dual_panel();
    core.set_vm_release_auto(false);

    session.prepare_secure_session(0).unwrap();
    let started = Instant::now();
    assert_eq!(session.start_secure_session(0), Err(HwcError::NoResources));
    // Three rounds of 20ms.
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(session.secure_session(), Some((0, SecurePhase::Prepared)));
    assert!(!session.is_secure_session_active());

    session.unprepare_secure_session(0).unwrap();
}

#[test]
fn test_vm_release_arrives_while_waiting() {
    let mut config = dual_panel_config();
    config.timeouts.vm_release_interval_ms = 50;
    config.timeouts.vm_release_retries = 20;
    let (session, core) = start(config);
    power_on(&session, 0);
    core.set_vm_release_auto(false);

    session.prepare_secure_session(0).unwrap();
    let releaser = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(120));
            core.release_vm(0);
        })
    };
    session.start_secure_session(0).unwrap();
    releaser.join().unwrap();
    assert!(session.is_secure_session_active());

    session.end_secure_session(0).unwrap();
    session.unprepare_secure_session(0).unwrap();
}

#[test]
fn test_secure_transition_blocks_power_and_commit() {
    let (session, _core) = dual_panel();

    session.prepare_secure_session(0).unwrap();
    assert_eq!(
        session.set_power_mode(0, PowerMode::Off),
        Err(HwcError::TransitionInProgress)
    );
    assert_eq!(
        session.commit_or_prepare(0, false).map(|_| ()),
        Err(HwcError::TransitionInProgress)
    );
    // The other panel is unaffected.
    assert!(session.commit_or_prepare(1, false).is_ok());

    session.unprepare_secure_session(0).unwrap();
    session.set_power_mode(0, PowerMode::Off).unwrap();
    session.wait_for_power_transition(0).unwrap();
    assert_eq!(session.get_power_mode(0), Ok(PowerMode::Off));
}

#[test]
fn test_prepare_refused_during_power_transition() {
    let (session, core) = dual_panel();
    core.set_power_delay(Duration::from_millis(200));

    session.set_power_mode(0, PowerMode::Off).unwrap();
    assert!(session.is_power_transition_pending(0).unwrap());
    assert_eq!(
        session.prepare_secure_session(1),
        Err(HwcError::TransitionInProgress)
    );

    session.wait_for_power_transition(0).unwrap();
    session.prepare_secure_session(1).unwrap();
    session.unprepare_secure_session(1).unwrap();
}

#[test]
fn test_transition_events_through_admin_channel() {
    let (session, _core) = dual_panel();

    for event in ["prepare", "start", "end", "unprepare"] {
        let params = json!({ "display": 0, "event": event }).to_string();
        let reply = session.notify_callback(9, params.as_bytes());
        assert!(reply.is_ok(), "{} failed with status {}", event, reply.status);
    }
    assert_eq!(session.secure_session(), None);

    let params = json!({ "display": 0, "event": "start" }).to_string();
    let reply = session.notify_callback(9, params.as_bytes());
    assert_eq!(reply.status, HwcError::BadParameter.status_code());

    let reply = session.notify_callback(10, b"");
    let status = reply.json().unwrap();
    assert_eq!(status["secure_session_active"], json!(false));
}

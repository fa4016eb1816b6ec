//! Hotplug integration tests
//!
//! Connect and disconnect of pluggable outputs on a headless core:
//! readiness gating, coalescing, enumeration timeouts and delivery through
//! the device event listener.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, power_on, start, wait_for, Committer, RecordingSink};
use hwc_session::headless::HeadlessCore;
use hwc_session::registry::SlotState;
use hwc_session::types::ConnectionType;
use hwc_session::uevent::{ChannelEventSource, HotplugEvent, UEventHub};
use hwc_session::{HwcError, HwcSession};

const PLUGGABLE: u64 = 1;
const SETTLE: Duration = Duration::from_secs(3);

/// Session with a registered client actively committing on the primary.
fn ready_session() -> (Arc<HwcSession>, Arc<HeadlessCore>, Arc<RecordingSink>, Committer) {
    let (session, core) = start(fast_config());
    let sink = RecordingSink::new();
    session.register_callback(sink.clone());
    power_on(&session, 0);
    let client = Committer::start(session.clone(), 0);
    assert!(wait_for(SETTLE, || session.is_ready()));
    (session, core, sink, client)
}

fn state(session: &HwcSession) -> SlotState {
    session.slot_state(PLUGGABLE).unwrap()
}

#[test]
fn test_connect_and_disconnect_pluggable() {
    let (session, core, sink, _client) = ready_session();

    let device = core.connect_pluggable();
    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Connected));
    assert!(sink.hotplugs().contains(&(PLUGGABLE, true)));
    assert_eq!(
        session.get_display_connection_type(PLUGGABLE),
        Ok(ConnectionType::External)
    );
    assert_eq!(session.get_display_name(PLUGGABLE).unwrap(), format!("hdmi-{}", device));

    core.disconnect_pluggable(device);
    session.handle_hotplug_event(HotplugEvent::pluggable(false));
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Disconnected));
    assert!(sink.hotplugs().contains(&(PLUGGABLE, false)));
    assert!(core.destroyed().contains(&device));
}

#[test]
fn test_hotplug_waits_for_first_primary_commit() {
    let (session, core) = start(fast_config());
    core.connect_pluggable();

    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    assert_eq!(session.pending_hotplug_count(), 1);
    assert_eq!(state(&session), SlotState::Disconnected);

    let sink = RecordingSink::new();
    session.register_callback(sink.clone());
    power_on(&session, 0);
    assert_eq!(session.pending_hotplug_count(), 1);

    let _client = Committer::start(session.clone(), 0);
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Connected));
    assert_eq!(session.pending_hotplug_count(), 0);
    assert!(sink.hotplugs().contains(&(PLUGGABLE, true)));
}

#[test]
fn test_latest_pending_event_wins() {
    let (session, core) = start(fast_config());
    core.connect_pluggable();

    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    session.handle_hotplug_event(HotplugEvent::pluggable(false));
    assert_eq!(session.pending_hotplug_count(), 1);

    let sink = RecordingSink::new();
    session.register_callback(sink.clone());
    power_on(&session, 0);
    let _client = Committer::start(session.clone(), 0);
    assert!(wait_for(SETTLE, || session.pending_hotplug_count() == 0));

    // Only the disconnect survived, and there was nothing to remove.
    assert_eq!(state(&session), SlotState::Disconnected);
    assert!(!sink.hotplugs().iter().any(|(d, _)| *d == PLUGGABLE));
}

#[test]
fn test_slow_enumeration_falls_back_to_placeholder() {
    let (session, core, sink, _client) = ready_session();
    core.set_pluggable_ready(false);

    let device = core.connect_pluggable();
    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Dummy));
    assert_eq!(session.get_display_name(PLUGGABLE).unwrap(), "external");
    assert!(sink.hotplugs().contains(&(PLUGGABLE, true)));

    // Once the device finishes enumerating, the placeholder slot is reused.
    core.mark_ready(device);
    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Connected));
    assert_eq!(session.get_display_name(PLUGGABLE).unwrap(), format!("hdmi-{}", device));
}

#[test]
fn test_spurious_connect_is_ignored() {
    let (session, _core, sink, _client) = ready_session();

    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    assert!(wait_for(SETTLE, || session.pending_hotplug_count() == 0));
    assert_eq!(state(&session), SlotState::Disconnected);
    assert!(!sink.hotplugs().iter().any(|(d, _)| *d == PLUGGABLE));
}

#[test]
fn test_device_creation_failure_degrades_slot() {
    let (session, core, _sink, _client) = ready_session();
    core.set_fail_create(true);

    core.connect_pluggable();
    session.handle_hotplug_event(HotplugEvent::pluggable(true));
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Dummy));

    // A degraded display still takes commits.
    let outcome = session.commit_or_prepare(PLUGGABLE, false).unwrap();
    assert!(outcome.retire_fence.is_some());
}

#[test]
fn test_events_flow_through_listener() {
    let (session, core, _sink, _client) = ready_session();
    let (source, sender) = ChannelEventSource::new();
    let hub = UEventHub::start(Box::new(source));
    core.attach_uevents(sender);
    session.attach_listener(&hub);

    core.connect_pluggable();
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Connected));
    assert!(hub.received() >= 1);
    assert!(hub.delivered() >= 1);
}

#[test]
fn test_test_pattern_request_is_tracked() {
    let (session, core, _sink, _client) = ready_session();

    let device = core.connect_pluggable();
    let event = HotplugEvent {
        hpd_bpp: 24,
        hpd_pattern: 1,
        ..HotplugEvent::pluggable(true)
    };
    session.handle_hotplug_event(event);
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Connected));
    assert_eq!(session.is_test_pattern(PLUGGABLE), Ok(true));
    assert_eq!(session.is_test_pattern(0), Ok(false));

    core.disconnect_pluggable(device);
    session.handle_hotplug_event(HotplugEvent::pluggable(false));
    assert!(wait_for(SETTLE, || state(&session) == SlotState::Disconnected));
    assert_eq!(session.is_test_pattern(PLUGGABLE), Ok(false));
    assert_eq!(session.is_test_pattern(99), Err(HwcError::BadDisplay));
}

#[test]
fn test_primary_moves_when_builtin_is_removed() {
    let mut config = fast_config();
    config.display.builtin = 2;
    config.display.pluggable = 0;
    config.display.virtual_displays = 0;
    config.display.max_virtual_displays = 0;
    let (session, core) = start(config);
    let sink = RecordingSink::new();
    session.register_callback(sink.clone());
    power_on(&session, 0);
    power_on(&session, 1);
    let client = Committer::start(session.clone(), 0);
    assert!(wait_for(SETTLE, || session.is_ready()));
    assert_eq!(session.primary_display(), 0);

    core.disconnect_builtin(0);
    session.handle_hotplug_event(HotplugEvent::builtin(false));
    assert!(wait_for(SETTLE, || session.slot_state(0) == Ok(SlotState::Disconnected)));
    drop(client);

    assert_eq!(session.primary_display(), 1);
    assert_eq!(session.slot_state(1), Ok(SlotState::Connected));
    assert!(sink.hotplugs().contains(&(0, false)));
    assert!(core.destroyed().contains(&0));

    // The surviving panel carries on as primary.
    let outcome = session.commit_or_prepare(1, false).unwrap();
    assert!(outcome.retire_fence.is_some());
}

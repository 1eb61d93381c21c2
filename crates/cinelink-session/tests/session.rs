//! Integration tests for the session against the emulator.

use std::time::Duration;

use cinelink_emulator::{Emulator, Fixture, Reply};
use cinelink_protocol::{Command, Request, RoutingId, Sequence};
use cinelink_session::{ConnectionState, Session, SessionConfig, SessionError, SessionEvent};
use tokio::sync::mpsc::UnboundedReceiver;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout_ms: 2_000,
        auto_reconnect: false,
        reconnect_delay_ms: 100,
    }
}

async fn connected(emulator: &Emulator, config: SessionConfig) -> Session {
    let session = Session::new(config);
    session
        .connect(&emulator.host(), emulator.port())
        .await
        .expect("connect should succeed");
    session
}

async fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("bus closed")
}

fn sleep_request(secs: &str) -> Request {
    Request::named(RoutingId::local(), "_SLEEP").with_field(secs)
}

// ---------------------------------------------------------------------------
// Connect / disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_and_disconnect_publish_lifecycle_events() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = Session::new(fast_config());
    let (_sub, mut rx) = session.bus().channel(|_| true);

    session.connect(&emulator.host(), emulator.port()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Connected));

    // Connecting again is a no-op.
    session.connect(&emulator.host(), emulator.port()).await.unwrap();

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Disconnected));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_refused_fails_even_with_auto_reconnect() {
    let mut emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    emulator.stop().await;

    let session = Session::new(SessionConfig {
        auto_reconnect: true,
        ..fast_config()
    });
    let err = session
        .connect(&emulator.host(), emulator.port())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)), "got {err:?}");
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_unresolvable_host_is_connection_error() {
    let session = Session::new(fast_config());
    let err = session.connect("no-such-host.invalid", 10000).await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_send_returns_single_response() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;

    let request = Request::new(RoutingId::local(), Command::GetDeviceInfo);
    let response = session.send_one(&request).await.unwrap();
    assert_eq!(response.name, "DEVICE_INFO");
    assert_eq!(response.field(1), "00000000123A");
    assert_eq!(response.field(2), "00");
    assert_eq!(session.in_flight(&RoutingId::local()), 0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_error_status_is_command_error() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;

    let request = Request::new(RoutingId::serial("123B"), Command::GetDeviceInfo);
    let err = session.send(&request).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::Command {
            status: 11,
            message: "Invalid device",
            request: request.to_string(),
        }
    );

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_multiline_collects_all_rows() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;

    let request = Request::new(RoutingId::local(), Command::GetContentDetails)
        .with_field("26-0.0-S_c446c8e2");
    let rows = session.send(&request).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].name, "CONTENT_DETAILS_OVERVIEW");
    assert_eq!(rows[1].fields, vec!["1", "Content_handle", "26-0.0-S_c446c8e2"]);
    assert_eq!(rows[2].fields, vec!["2", "Title", "Turtle Odyssey"]);

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_multiline_without_count_is_protocol_error() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    emulator.register(
        &["01"],
        "GET_CONTENT_DETAILS",
        vec![Reply::ok("CONTENT_DETAILS_OVERVIEW", &["lots", "x", "movies"])],
    );
    let session = connected(&emulator, fast_config()).await;

    let request = Request::new(RoutingId::local(), Command::GetContentDetails);
    let err = session.send(&request).await.unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)), "got {err:?}");

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_decodes_raw_newline_quirk() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    emulator.set_newline_quirk(true);
    emulator.register(
        &["01"],
        "GET_PLAYING_TITLE_NAME",
        vec![Reply::ok("TITLE_NAME", &["Part One\nPart Two"])],
    );
    let session = connected(&emulator, fast_config()).await;

    let request = Request::new(RoutingId::local(), Command::GetPlayingTitleName);
    let response = session.send_one(&request).await.unwrap();
    assert_eq!(response.field(0), "Part One\nPart Two");

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_twelve_concurrent_requests_reuse_lowest_slots() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;

    let request = sleep_request("0.05");
    let results =
        futures_util::future::join_all((0..12).map(|_| session.send(&request))).await;
    assert!(results.iter().all(Result::is_ok));

    let received = emulator.received();
    assert_eq!(received.len(), 12);
    let count = |slot| {
        received
            .iter()
            .filter(|r| r.sequence == Sequence::Slot(slot))
            .count()
    };
    assert_eq!(count(0), 2);
    assert_eq!(count(1), 2);
    assert_eq!(count(2), 1);
    assert_eq!(count(9), 1);
    assert_eq!(session.in_flight(&RoutingId::local()), 0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_slots_are_per_routing_id() {
    let emulator = Emulator::start(Fixture::MultiDeviceCpdid).await.unwrap();
    let session = connected(&emulator, fast_config()).await;

    let local = Request::new(RoutingId::local(), Command::GetDeviceInfo);
    let peer = Request::new(RoutingId::cpdid("03").unwrap(), Command::GetDeviceInfo);
    let (a, b) = tokio::join!(session.send_one(&local), session.send_one(&peer));
    assert_eq!(a.unwrap().field(1), "00000000123A");
    assert_eq!(b.unwrap().field(1), "00000000123B");

    // Both went out on slot 0 of their own routing id.
    let received = emulator.received();
    assert!(received.iter().all(|r| r.sequence == Sequence::Slot(0)));

    session.disconnect().await;
}

#[tokio::test]
async fn test_send_timeout_releases_slot() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(
        &emulator,
        SessionConfig {
            timeout_ms: 150,
            ..fast_config()
        },
    )
    .await;

    let err = session.send(&sleep_request("1")).await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout { .. }), "got {err:?}");
    assert_eq!(session.in_flight(&RoutingId::local()), 0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_fails_waiting_requests() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(&sleep_request("1")).await })
    };
    while emulator.received().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    session.disconnect().await;
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_events_are_published_with_routing_id() {
    let emulator = Emulator::start(Fixture::MultiDeviceCpdid).await.unwrap();
    let session = connected(&emulator, fast_config()).await;
    let (_sub, mut rx) = session.bus().channel(|e| e.message().is_some());

    emulator.send_event(&["02", "03"], 0, "DEVICE_POWER_STATE", &["1"]);

    let first = next_event(&mut rx).await;
    let second = next_event(&mut rx).await;
    let first = first.message().unwrap();
    let second = second.message().unwrap();
    assert_eq!(first.routing_id.as_str(), "02");
    assert_eq!(second.routing_id.as_str(), "03");
    assert_eq!(first.name, "DEVICE_POWER_STATE");
    assert!(first.is_event());

    session.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;
    let (_sub, mut rx) = session.bus().channel(|e| e.message().is_some());

    emulator.send_raw("this is not a frame");
    emulator.send_event(&["01"], 0, "SYSTEM_READINESS_STATE", &["0"]);

    let event = next_event(&mut rx).await;
    assert_eq!(event.message().unwrap().name, "SYSTEM_READINESS_STATE");
    assert!(session.is_connected());

    session.disconnect().await;
}

// ---------------------------------------------------------------------------
// Connection loss and reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connection_lost_without_reconnect_disconnects() {
    let mut emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(&emulator, fast_config()).await;
    let (_sub, mut rx) = session.bus().channel(|_| true);

    emulator.stop().await;
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Disconnected));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let request = Request::new(RoutingId::local(), Command::GetDeviceInfo);
    let err = session.send(&request).await.unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn test_reconnect_after_connection_lost() {
    let mut emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(
        &emulator,
        SessionConfig {
            auto_reconnect: true,
            ..fast_config()
        },
    )
    .await;
    let (_sub, mut rx) = session.bus().channel(|_| true);

    emulator.stop().await;
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Disconnected));
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    // A second connect while reconnecting is rejected.
    let err = session
        .connect(&emulator.host(), emulator.port())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)), "got {err:?}");

    emulator.restart().await.unwrap();
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Connected));
    assert_eq!(session.state(), ConnectionState::Connected);

    let request = Request::new(RoutingId::local(), Command::GetFriendlyName);
    assert_eq!(session.send_one(&request).await.unwrap().field(0), "Theater");

    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_cancels_reconnect() {
    let mut emulator = Emulator::start(Fixture::SingleDevice).await.unwrap();
    let session = connected(
        &emulator,
        SessionConfig {
            auto_reconnect: true,
            ..fast_config()
        },
    )
    .await;
    let (_sub, mut rx) = session.bus().channel(|_| true);

    emulator.stop().await;
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Disconnected));
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Disconnected));

    // Bringing the unit back must not revive the session.
    emulator.restart().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(rx.try_recv().is_err());
}

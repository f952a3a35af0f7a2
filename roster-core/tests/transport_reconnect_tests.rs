// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reconnect behavior of the client transport: handshake identity,
//! backoff schedule, restart detection, destroy semantics.

use std::time::{Duration, Instant};

use roster_core::{
    encode_frame, reconnect_delay, Envelope, EndpointConfig, Heartbeat, MockConnector,
    PresenceTransport, TransportError, TransportEvent, REASON_ATTEMPTS_EXCEEDED,
    REASON_LONG_AWAY, REASON_SERVER_REBOOT,
};

fn transport(connector: &MockConnector) -> PresenceTransport<MockConnector> {
    let endpoint = EndpointConfig {
        host: Some("localhost".into()),
        port: Some(8080),
        path: "/.roster-presence/server".into(),
        sid: Some("sid-1".into()),
        ..Default::default()
    };
    PresenceTransport::new(connector.clone(), endpoint)
}

fn assign(server_id: &str, id: &str) -> String {
    encode_frame(&Envelope::AssignId {
        id: id.into(),
        server_id: server_id.into(),
    })
    .unwrap()
}

#[test]
fn test_connect_guards() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();

    t.connect().unwrap();
    assert!(matches!(
        t.connect(),
        Err(TransportError::AlreadyConnecting { .. })
    ));

    t.handle_frame(&assign("s1", "p1"), now);
    assert!(matches!(
        t.connect(),
        Err(TransportError::AlreadyConnected { .. })
    ));
}

#[test]
fn test_handshake_adopts_proposed_id_once() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();

    t.connect().unwrap();
    let events = t.handle_frame(&assign("s1", "proposal-1"), now);
    assert_eq!(events, vec![TransportEvent::Connect]);
    assert_eq!(t.id(), Some("proposal-1"));

    // The announce echoes the adopted id, the directory sid and the serverId.
    let sent = connector.socket(0).unwrap().sent();
    assert_eq!(
        sent[0],
        encode_frame(&Envelope::AnnounceId {
            id: "proposal-1".into(),
            sid: Some("sid-1".into()),
            server_id: "s1".into(),
        })
        .unwrap()
    );

    // A later proposal from a reconnect never replaces the adopted id.
    t.handle_close("transport close", now);
    let retry = t.retry_at().unwrap();
    t.poll(retry);
    t.handle_frame(&assign("s1", "proposal-2"), retry);
    assert_eq!(t.id(), Some("proposal-1"));
}

#[test]
fn test_server_reboot_emits_disconnect_before_connect() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();

    t.connect().unwrap();
    t.handle_frame(&assign("s1", "p1"), now);

    // Socket churns; the new server instance answers the reconnect.
    t.handle_close("transport close", now);
    let retry = t.retry_at().unwrap();
    t.poll(retry);
    let events = t.handle_frame(&assign("s2", "p-new"), retry);
    assert_eq!(
        events,
        vec![
            TransportEvent::Disconnect(REASON_SERVER_REBOOT.into()),
            TransportEvent::Connect,
        ]
    );
    assert_eq!(t.server_id(), Some("s2"));
    assert_eq!(t.id(), Some("p1"));
}

#[test]
fn test_long_away_forces_full_reconnect_cycle() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let start = Instant::now();

    t.connect().unwrap();
    t.handle_frame(&assign("s1", "p1"), start);
    t.handle_close("transport close", start);

    let retry = t.retry_at().unwrap();
    t.poll(retry);
    // Handshake lands well past the hibernation threshold.
    let late = start + Duration::from_secs(31);
    let events = t.handle_frame(&assign("s1", "p1"), late);
    assert_eq!(
        events,
        vec![
            TransportEvent::Disconnect(REASON_LONG_AWAY.into()),
            TransportEvent::Connect,
        ]
    );
}

#[test]
fn test_backoff_schedule_and_one_time_exceeded_notice() {
    assert_eq!(reconnect_delay(1), Duration::from_millis(250));
    assert_eq!(reconnect_delay(3), Duration::from_millis(250));
    assert_eq!(reconnect_delay(4), Duration::from_secs(1));
    assert_eq!(reconnect_delay(5), Duration::from_secs(1));
    assert_eq!(reconnect_delay(6), Duration::from_secs(5));
    assert_eq!(reconnect_delay(10), Duration::from_secs(5));
    assert_eq!(reconnect_delay(11), Duration::from_secs(15));

    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();
    t.connect().unwrap();
    t.handle_frame(&assign("s1", "p1"), now);

    // Every further connect attempt fails, so the schedule walks the
    // whole backoff table.
    connector.fail_next_connects(12);
    t.handle_close("transport close", now);

    let expected = [
        Duration::from_millis(250), // attempt 2 scheduled after attempt 1 fails
        Duration::from_millis(250), // attempt 3
        Duration::from_secs(1),     // attempt 4
        Duration::from_secs(1),     // attempt 5
        Duration::from_secs(5),     // attempt 6
        Duration::from_secs(5),     // attempt 7
        Duration::from_secs(5),     // attempt 8
        Duration::from_secs(5),     // attempt 9
        Duration::from_secs(5),     // attempt 10
        Duration::from_secs(15),    // attempt 11
        Duration::from_secs(15),    // attempt 12
    ];
    assert_eq!(t.retry_at().unwrap() - now, Duration::from_millis(250));

    let mut exceeded = 0;
    for expected_delay in expected {
        let due = t.retry_at().unwrap();
        let events = t.poll(due);
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Reconnect(_))));
        exceeded += events
            .iter()
            .filter(|e| **e == TransportEvent::Disconnect(REASON_ATTEMPTS_EXCEEDED.into()))
            .count();
        assert_eq!(t.retry_at().unwrap() - due, expected_delay);
    }
    assert_eq!(exceeded, 1);
}

#[test]
fn test_retry_loop_never_stops_without_destroy() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();
    t.connect().unwrap();
    t.handle_frame(&assign("s1", "p1"), now);

    connector.fail_next_connects(30);
    t.handle_close("transport close", now);
    for _ in 0..30 {
        let due = t.retry_at().unwrap();
        t.poll(due);
    }
    // Still scheduled after 30 failures.
    assert!(t.retry_at().is_some());
}

#[test]
fn test_destroy_suppresses_scheduled_reconnects() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();
    t.connect().unwrap();
    t.handle_frame(&assign("s1", "p1"), now);
    t.handle_close("transport close", now);
    assert!(t.retry_at().is_some());

    let events = t.destroy();
    assert_eq!(events, vec![TransportEvent::Destroy]);
    assert!(t.retry_at().is_none());
    assert!(t
        .poll(now + Duration::from_secs(60))
        .is_empty());
    assert_eq!(connector.connect_count(), 1);
    assert!(matches!(t.connect(), Err(TransportError::Destroyed)));
}

#[test]
fn test_heartbeat_mismatch_closes_socket() {
    let connector = MockConnector::new();
    let mut t = transport(&connector);
    let now = Instant::now();
    t.connect().unwrap();
    t.handle_frame(&assign("s1", "p1"), now);

    let events = t.handle_heartbeat(&Heartbeat {
        server_id: "s1".into(),
    });
    assert_eq!(events, vec![TransportEvent::Heartbeat]);

    let events = t.handle_heartbeat(&Heartbeat {
        server_id: "s2".into(),
    });
    assert!(events.is_empty());
    assert!(connector.socket(0).unwrap().is_closed());

    // The close then runs the ordinary away/reconnect machinery.
    let events = t.handle_close("transport close", now);
    assert_eq!(events, vec![TransportEvent::Away]);
    assert!(t.retry_at().is_some());
}

#[test]
fn test_endpoint_url_used_for_connect() {
    let connector = MockConnector::new();
    let endpoint = EndpointConfig {
        base_url: Some("https://presence.example.com".into()),
        path: "/.roster-presence/server".into(),
        ..Default::default()
    };
    let mut t = PresenceTransport::new(connector.clone(), endpoint);
    t.connect().unwrap();
    assert_eq!(
        connector.connect_url(0).unwrap(),
        "wss://presence.example.com:443/.roster-presence/server"
    );
}

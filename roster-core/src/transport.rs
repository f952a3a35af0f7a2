// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reconnecting Client Transport
//!
//! Owns one underlying socket at a time and keeps a logical connection
//! alive across socket churn: handshake id adoption, away/back
//! detection, outbound buffering during outages, scheduled reconnects
//! with a stepped backoff, and server-restart detection via the
//! heartbeat payload.
//!
//! The state machine is driven explicitly: the host's event loop feeds
//! socket inputs into the `handle_*` methods and calls [`PresenceTransport::poll`]
//! when the scheduled retry deadline passes. Every method returns the
//! [`TransportEvent`]s it produced, in order — there is no listener
//! registration and nothing for a handler to unwind through.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::TransportError;
use crate::message::{
    Envelope, Heartbeat, REASON_ATTEMPTS_EXCEEDED, REASON_LONG_AWAY, REASON_SERVER_REBOOT,
};
use crate::protocol::{decode_frame, encode_frame};
use crate::socket::{EndpointConfig, Socket, SocketConnector};

/// An away gap longer than this is treated as hibernation: the resume
/// becomes a full disconnect/connect cycle instead of a silent `back`.
pub const LONG_AWAY: Duration = Duration::from_secs(30);

/// Attempt number at which the one-time degraded-connectivity notice fires.
pub const EXCEEDED_ATTEMPTS: u32 = 6;

/// Backoff delay before reconnect attempt `n` (1-indexed).
pub fn reconnect_delay(attempt: u32) -> Duration {
    if attempt > 10 {
        Duration::from_secs(15)
    } else if attempt > 5 {
        Duration::from_secs(5)
    } else if attempt > 3 {
        Duration::from_secs(1)
    } else {
        Duration::from_millis(250)
    }
}

/// Events surfaced to the layer above the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Logical connection established (first connect, or forced
    /// reconnect after server restart / hibernation).
    Connect,
    /// Short away gap resumed without losing the logical connection.
    Back,
    /// Underlying socket dropped; outbound traffic buffers from now on.
    Away,
    /// A reconnect attempt is about to run (attempt number).
    Reconnect(u32),
    /// Logical-level disconnect notice with a reason. Not terminal
    /// unless the transport was destroyed.
    Disconnect(String),
    /// Terminal: `destroy()` was called.
    Destroy,
    /// Keep-alive acknowledged by the current server instance.
    Heartbeat,
    /// Application-level envelope, delivered verbatim.
    Message(Envelope),
}

/// Client transport with a stable logical identity.
pub struct PresenceTransport<C: SocketConnector> {
    connector: C,
    endpoint: EndpointConfig,

    socket: Option<C::Socket>,
    /// close/error may both fire for one socket; handle the first only.
    socket_gone_handled: bool,

    /// Logical connection id: adopted from the first server proposal,
    /// never changed afterwards.
    id: Option<String>,
    /// Server instance id seen on the last handshake/heartbeat.
    server_id: Option<String>,

    connecting: bool,
    connected: bool,
    away_since: Option<Instant>,
    buffer: VecDeque<String>,

    reconnect_attempt: u32,
    /// Whether the next completed handshake emits `Connect` (true) or
    /// `Back` (false, short-away resume).
    fire_connect: bool,
    retry_at: Option<Instant>,

    destroyed: bool,
}

impl<C: SocketConnector> PresenceTransport<C> {
    pub fn new(connector: C, endpoint: EndpointConfig) -> Self {
        PresenceTransport {
            connector,
            endpoint,
            socket: None,
            socket_gone_handled: false,
            id: None,
            server_id: None,
            connecting: false,
            connected: false,
            away_since: None,
            buffer: VecDeque::new(),
            reconnect_attempt: 0,
            fire_connect: true,
            retry_at: None,
            destroyed: false,
        }
    }

    /// Opens the underlying socket. Usage error if already connected
    /// (and not away) or already mid-connect. A connector failure is
    /// returned to the caller; no retry is scheduled for an explicit
    /// connect.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        let uri = self.endpoint.url()?;
        if self.connected && self.away_since.is_none() {
            return Err(TransportError::AlreadyConnected { uri });
        }
        if self.connecting {
            return Err(TransportError::AlreadyConnecting { uri });
        }
        self.fire_connect = true;
        self.connecting = true;
        self.socket_gone_handled = false;
        match self.connector.connect(&uri) {
            Ok(socket) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(err) => {
                self.connecting = false;
                Err(err)
            }
        }
    }

    /// Sends an envelope. Errors if the logical connection was never
    /// established (or was torn down); buffers while away.
    pub fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let frame = encode_frame(envelope)?;
        if self.away_since.is_some() {
            debug!(frame = %frame, "away: buffering outbound frame");
            self.buffer.push_back(frame);
            return Ok(());
        }
        match self.socket.as_mut() {
            Some(socket) => socket.send(&frame),
            None => Err(TransportError::NotConnected),
        }
    }

    /// Permanently stops the transport: no further reconnect attempts,
    /// socket closed, terminal event emitted.
    pub fn destroy(&mut self) -> Vec<TransportEvent> {
        debug!("destroy requested");
        self.destroyed = true;
        self.retry_at = None;
        self.connecting = false;
        self.connected = false;
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        vec![TransportEvent::Destroy]
    }

    /// Socket open notification. The handshake proper starts when the
    /// server's `__ASSIGN-ID__` frame arrives.
    pub fn handle_open(&mut self) -> Vec<TransportEvent> {
        if self.destroyed {
            if let Some(mut socket) = self.socket.take() {
                socket.close();
            }
        }
        Vec::new()
    }

    /// Incoming text frame from the current socket.
    pub fn handle_frame(&mut self, text: &str, now: Instant) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.destroyed {
            return events;
        }
        let envelope = match decode_frame(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "dropping malformed frame");
                return events;
            }
        };
        match envelope {
            Envelope::AssignId { id, server_id } => {
                self.complete_handshake(id, server_id, now, &mut events)
            }
            other => events.push(TransportEvent::Message(other)),
        }
        events
    }

    /// Keep-alive payload from the current socket. A server-id change
    /// forces the socket closed so the reconnect machinery reconnects
    /// faster than a failed send would.
    pub fn handle_heartbeat(&mut self, heartbeat: &Heartbeat) -> Vec<TransportEvent> {
        if self.destroyed {
            return Vec::new();
        }
        if let Some(cached) = &self.server_id {
            if *cached != heartbeat.server_id {
                debug!("detected server reboot on heartbeat; closing socket");
                if let Some(socket) = self.socket.as_mut() {
                    socket.close();
                }
                return Vec::new();
            }
        }
        vec![TransportEvent::Heartbeat]
    }

    /// Socket close notification.
    pub fn handle_close(&mut self, reason: &str, now: Instant) -> Vec<TransportEvent> {
        self.on_socket_gone(reason, now)
    }

    /// Socket error notification. Equivalent to a close; whichever
    /// arrives first wins.
    pub fn handle_error(&mut self, reason: &str, now: Instant) -> Vec<TransportEvent> {
        self.on_socket_gone(reason, now)
    }

    /// Runs a due scheduled reconnect. Call whenever `retry_at()` has
    /// passed; a no-op otherwise.
    pub fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let due = matches!(self.retry_at, Some(at) if now >= at);
        if !due {
            return events;
        }
        self.retry_at = None;
        if self.destroyed {
            debug!("skipping scheduled reconnect: destroyed");
            return events;
        }
        if self.connected && self.away_since.is_none() {
            debug!("skipping scheduled reconnect: already connected");
            return events;
        }
        if self.connecting {
            debug!("skipping scheduled reconnect: already connecting");
            return events;
        }
        events.push(TransportEvent::Reconnect(self.reconnect_attempt));
        self.fire_connect = self.reconnect_attempt >= EXCEEDED_ATTEMPTS;
        self.connecting = true;
        self.socket_gone_handled = false;
        let url = match self.endpoint.url() {
            Ok(url) => url,
            Err(err) => {
                debug!(error = %err, "reconnect aborted: bad endpoint");
                self.connecting = false;
                return events;
            }
        };
        match self.connector.connect(&url) {
            Ok(socket) => self.socket = Some(socket),
            Err(err) => {
                debug!(error = %err, attempt = self.reconnect_attempt, "reconnect attempt failed");
                self.connecting = false;
                self.schedule_reconnect(now, &mut events);
            }
        }
        events
    }

    fn complete_handshake(
        &mut self,
        proposed_id: String,
        server_id: String,
        now: Instant,
        events: &mut Vec<TransportEvent>,
    ) {
        self.connecting = false;

        if let Some(cached) = &self.server_id {
            if *cached != server_id {
                debug!("detected server reboot on handshake");
                self.fire_connect = true;
                if self.connected {
                    self.connected = false;
                    events.push(TransportEvent::Disconnect(REASON_SERVER_REBOOT.into()));
                }
            }
        }
        self.server_id = Some(server_id.clone());

        if self.id.is_none() {
            self.id = Some(proposed_id);
        }
        let announce = Envelope::AnnounceId {
            // just set above when unset
            id: self.id.clone().unwrap_or_default(),
            sid: self.endpoint.sid.clone(),
            server_id,
        };
        self.send_raw(&announce);

        if let Some(away) = self.away_since {
            if now.duration_since(away) > LONG_AWAY {
                debug!("long away (hibernate) detected; forcing reconnect semantics");
                self.fire_connect = true;
                if self.connected {
                    self.connected = false;
                    events.push(TransportEvent::Disconnect(REASON_LONG_AWAY.into()));
                }
            }
        }
        self.away_since = None;
        self.connected = true;

        if self.fire_connect {
            events.push(TransportEvent::Connect);
        } else if self.reconnect_attempt > 0 {
            events.push(TransportEvent::Back);
        }
        self.fire_connect = false;
        self.reconnect_attempt = 0;
        self.retry_at = None;

        while let Some(frame) = self.buffer.pop_front() {
            if let Some(socket) = self.socket.as_mut() {
                if let Err(err) = socket.send(&frame) {
                    debug!(error = %err, "failed to flush buffered frame");
                }
            }
        }
    }

    fn on_socket_gone(&mut self, reason: &str, now: Instant) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        self.connecting = false;
        if self.socket_gone_handled {
            return events;
        }
        self.socket_gone_handled = true;
        self.socket = None;
        if self.destroyed {
            self.connected = false;
            return events;
        }
        debug!(reason, "socket gone");
        if self.connected {
            self.away_since = Some(now);
            events.push(TransportEvent::Away);
        }
        self.schedule_reconnect(now, &mut events);
        events
    }

    fn schedule_reconnect(&mut self, now: Instant, events: &mut Vec<TransportEvent>) {
        if self.destroyed {
            return;
        }
        self.reconnect_attempt += 1;
        if self.reconnect_attempt == EXCEEDED_ATTEMPTS {
            // One-time degraded signal; the retry loop keeps going.
            self.away_since = None;
            self.connected = false;
            events.push(TransportEvent::Disconnect(REASON_ATTEMPTS_EXCEEDED.into()));
        }
        let delay = reconnect_delay(self.reconnect_attempt);
        debug!(attempt = self.reconnect_attempt, ?delay, "scheduling reconnect");
        self.retry_at = Some(now + delay);
    }

    fn send_raw(&mut self, envelope: &Envelope) {
        let frame = match encode_frame(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "failed to encode frame");
                return;
            }
        };
        if let Some(socket) = self.socket.as_mut() {
            if let Err(err) = socket.send(&frame) {
                debug!(error = %err, "socket send failed");
            }
        }
    }

    /// Logical connection id, once adopted.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Server instance id from the last handshake.
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_away(&self) -> bool {
        self.away_since.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Deadline of the next scheduled reconnect, if any. The driver
    /// sleeps until this and then calls [`PresenceTransport::poll`].
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Frames waiting for the next successful reconnect.
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }
}

// INLINE_TEST_REQUIRED: Tests private fire_connect/socket_gone_handled state
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    fn transport() -> PresenceTransport<MockConnector> {
        let connector = MockConnector::new();
        let endpoint = EndpointConfig {
            host: Some("localhost".into()),
            port: Some(8080),
            path: "/.roster-presence/server".into(),
            sid: Some("sid-1".into()),
            ..Default::default()
        };
        PresenceTransport::new(connector, endpoint)
    }

    fn assign(server_id: &str, id: &str) -> String {
        encode_frame(&Envelope::AssignId {
            id: id.into(),
            server_id: server_id.into(),
        })
        .unwrap()
    }

    #[test]
    fn test_close_and_error_handled_once_per_socket() {
        let mut t = transport();
        let now = Instant::now();
        t.connect().unwrap();
        t.handle_frame(&assign("s1", "p1"), now);
        assert!(t.is_connected());

        let events = t.handle_close("transport close", now);
        assert_eq!(events, vec![TransportEvent::Away]);
        // duplicate error for the same socket is ignored
        assert!(t.handle_error("transport error", now).is_empty());
        assert_eq!(t.reconnect_attempt(), 1);
    }

    #[test]
    fn test_fire_connect_cleared_after_handshake() {
        let mut t = transport();
        let now = Instant::now();
        t.connect().unwrap();
        let events = t.handle_frame(&assign("s1", "p1"), now);
        assert_eq!(events, vec![TransportEvent::Connect]);
        assert!(!t.fire_connect);
    }

    #[test]
    fn test_short_away_resume_emits_back_not_connect() {
        let mut t = transport();
        let now = Instant::now();
        t.connect().unwrap();
        t.handle_frame(&assign("s1", "p1"), now);
        t.handle_close("transport close", now);

        let retry = t.retry_at().unwrap();
        t.poll(retry);
        let events = t.handle_frame(&assign("s1", "p1"), retry);
        assert_eq!(events, vec![TransportEvent::Back]);
    }
}

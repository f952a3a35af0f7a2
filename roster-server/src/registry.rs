//! Server Connection Registry
//!
//! Tracks one logical connection per announced client id across socket
//! churn. A closed socket starts a teardown grace period instead of
//! dropping the connection; outbound traffic buffers until the client
//! reconnects and re-announces, or the grace period elapses.
//!
//! The registry is a pure state machine: socket inputs go in, effects
//! (frames to write, timers to start or cancel) and events (lifecycle
//! notifications for the contact graph) come out. The tokio driver
//! executes the effects.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};
use uuid::Uuid;

use roster_core::{decode_frame, encode_frame, Envelope};

/// Driver-assigned id of one physical socket.
pub type SocketId = u64;

/// Side effects for the driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEffect {
    /// Write a frame to a live socket.
    SendFrame { socket: SocketId, frame: String },
    /// Start the reconnect-grace timer for a logical connection.
    StartTeardown { id: String },
    /// Abort a running reconnect-grace timer.
    CancelTeardown { id: String },
}

/// Lifecycle notifications for the contact graph.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A new logical connection announced itself.
    Connect { id: String, sid: Option<String> },
    /// A known logical connection came back on a fresh socket.
    Back { id: String },
    /// The current socket of a logical connection dropped.
    Away { id: String },
    /// Teardown elapsed; the logical connection is gone.
    Disconnect { id: String, reason: String },
    /// Application frame from an announced connection.
    Message { id: String, envelope: Envelope },
    /// Frame discarded (malformed, unannounced or stale).
    Dropped { socket: SocketId },
}

/// Combined output of one registry input.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RegistryOutput {
    pub effects: Vec<RegistryEffect>,
    pub events: Vec<RegistryEvent>,
}

#[derive(Debug)]
struct Entry {
    socket: SocketId,
    sid: Option<String>,
    buffer: VecDeque<String>,
    /// Close reason while the reconnect-grace timer runs.
    pending_teardown: Option<String>,
}

/// Connection registry keyed by announced logical id.
pub struct Registry {
    server_id: String,
    entries: HashMap<String, Entry>,
    /// Which logical id each socket announced as.
    announced: HashMap<SocketId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            server_id: format!("server-{}", Uuid::new_v4()),
            entries: HashMap::new(),
            announced: HashMap::new(),
        }
    }

    /// Server instance id; a restart produces a different one, which
    /// clients detect through the handshake and heartbeat payloads.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Logical connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether a logical connection is still registered.
    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Offers an id proposal to a freshly opened socket. The client
    /// may announce with this proposal or with an id it already holds.
    pub fn socket_opened(&mut self, socket: SocketId, now_unix_ms: u64) -> RegistryOutput {
        let mut out = RegistryOutput::default();
        let proposal = format!("{socket}-{now_unix_ms}");
        debug!(socket, proposal, "offering id to new socket");
        self.push_frame(
            &mut out,
            socket,
            &Envelope::AssignId {
                id: proposal,
                server_id: self.server_id.clone(),
            },
        );
        out
    }

    /// Incoming text frame from a socket.
    pub fn handle_frame(&mut self, socket: SocketId, text: &str) -> RegistryOutput {
        let mut out = RegistryOutput::default();
        let envelope = match decode_frame(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(socket, error = %err, "dropping malformed frame");
                out.events.push(RegistryEvent::Dropped { socket });
                return out;
            }
        };
        match envelope {
            Envelope::AnnounceId { id, sid, .. } => self.handle_announce(socket, id, sid, &mut out),
            other => {
                let id = match self.announced.get(&socket) {
                    Some(id) if self.entries.get(id).is_some_and(|e| e.socket == socket) => {
                        id.clone()
                    }
                    _ => {
                        debug!(socket, "dropping frame from unannounced socket");
                        out.events.push(RegistryEvent::Dropped { socket });
                        return out;
                    }
                };
                out.events.push(RegistryEvent::Message {
                    id,
                    envelope: other,
                });
            }
        }
        out
    }

    /// Sends an envelope to a logical connection: straight out when a
    /// socket is live, buffered while teardown is pending, dropped when
    /// the id is unknown.
    pub fn send(&mut self, id: &str, envelope: &Envelope) -> RegistryOutput {
        let mut out = RegistryOutput::default();
        let frame = match encode_frame(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(id, error = %err, "failed to encode outbound frame");
                return out;
            }
        };
        match self.entries.get_mut(id) {
            Some(entry) if entry.pending_teardown.is_some() => {
                debug!(id, "buffering frame for away connection");
                entry.buffer.push_back(frame);
            }
            Some(entry) => {
                out.effects.push(RegistryEffect::SendFrame {
                    socket: entry.socket,
                    frame,
                });
            }
            None => debug!(id, "dropping frame for unknown connection"),
        }
        out
    }

    /// Socket close notification.
    pub fn socket_closed(&mut self, socket: SocketId, reason: &str) -> RegistryOutput {
        let mut out = RegistryOutput::default();
        let Some(id) = self.announced.remove(&socket) else {
            return out;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return out;
        };
        if entry.socket != socket {
            // Superseded socket closing late; the connection moved on.
            debug!(socket, id, "ignoring close of stale socket");
            return out;
        }
        debug!(socket, id, reason, "socket closed; starting teardown");
        entry.pending_teardown = Some(reason.to_string());
        out.effects.push(RegistryEffect::StartTeardown { id: id.clone() });
        out.events.push(RegistryEvent::Away { id });
        out
    }

    /// Reconnect-grace timer fired for a logical connection.
    pub fn teardown_elapsed(&mut self, id: &str) -> RegistryOutput {
        let mut out = RegistryOutput::default();
        let pending = self
            .entries
            .get(id)
            .and_then(|entry| entry.pending_teardown.clone());
        let Some(reason) = pending else {
            // Reconnected in the meantime, or already gone.
            return out;
        };
        debug!(id, reason, "teardown elapsed; removing connection");
        self.entries.remove(id);
        out.events.push(RegistryEvent::Disconnect {
            id: id.to_string(),
            reason,
        });
        out
    }

    fn handle_announce(
        &mut self,
        socket: SocketId,
        id: String,
        sid: Option<String>,
        out: &mut RegistryOutput,
    ) {
        self.announced.insert(socket, id.clone());
        match self.entries.get_mut(&id) {
            Some(entry) => {
                debug!(socket, id, "connection re-announced");
                if entry.pending_teardown.take().is_some() {
                    out.effects
                        .push(RegistryEffect::CancelTeardown { id: id.clone() });
                }
                entry.socket = socket;
                if sid.is_some() {
                    entry.sid = sid;
                }
                let buffered: Vec<String> = entry.buffer.drain(..).collect();
                for frame in buffered {
                    out.effects.push(RegistryEffect::SendFrame { socket, frame });
                }
                out.events.push(RegistryEvent::Back { id });
            }
            None => {
                debug!(socket, id, "new connection announced");
                self.entries.insert(
                    id.clone(),
                    Entry {
                        socket,
                        sid: sid.clone(),
                        buffer: VecDeque::new(),
                        pending_teardown: None,
                    },
                );
                out.events.push(RegistryEvent::Connect { id, sid });
            }
        }
    }

    fn push_frame(&self, out: &mut RegistryOutput, socket: SocketId, envelope: &Envelope) {
        match encode_frame(envelope) {
            Ok(frame) => out.effects.push(RegistryEffect::SendFrame { socket, frame }),
            Err(err) => warn!(socket, error = %err, "failed to encode outbound frame"),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// INLINE_TEST_REQUIRED: Tests private announced/entry bookkeeping
#[cfg(test)]
mod tests {
    use super::*;

    fn announce(id: &str, sid: Option<&str>, server_id: &str) -> String {
        encode_frame(&Envelope::AnnounceId {
            id: id.into(),
            sid: sid.map(String::from),
            server_id: server_id.into(),
        })
        .unwrap()
    }

    #[test]
    fn test_stale_socket_close_is_ignored() {
        let mut registry = Registry::new();
        let server_id = registry.server_id().to_string();
        registry.socket_opened(1, 1000);
        registry.handle_frame(1, &announce("c1", Some("s1"), &server_id));

        // Fresh socket takes over before the old one reports closed.
        registry.socket_opened(2, 2000);
        registry.handle_frame(2, &announce("c1", Some("s1"), &server_id));

        let out = registry.socket_closed(1, "transport close");
        assert!(out.effects.is_empty());
        assert!(out.events.is_empty());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_frames_from_superseded_socket_are_dropped() {
        let mut registry = Registry::new();
        let server_id = registry.server_id().to_string();
        registry.socket_opened(1, 1000);
        registry.handle_frame(1, &announce("c1", None, &server_id));
        registry.socket_opened(2, 2000);
        registry.handle_frame(2, &announce("c1", None, &server_id));

        let frame = encode_frame(&Envelope::Away { from: "c1".into() }).unwrap();
        let out = registry.handle_frame(1, &frame);
        assert_eq!(out.events, vec![RegistryEvent::Dropped { socket: 1 }]);

        let out = registry.handle_frame(2, &frame);
        assert!(matches!(&out.events[0], RegistryEvent::Message { id, .. } if id == "c1"));
    }

    #[test]
    fn test_teardown_after_reconnect_is_noop() {
        let mut registry = Registry::new();
        let server_id = registry.server_id().to_string();
        registry.socket_opened(1, 1000);
        registry.handle_frame(1, &announce("c1", None, &server_id));
        registry.socket_closed(1, "transport close");

        registry.socket_opened(2, 2000);
        let out = registry.handle_frame(2, &announce("c1", None, &server_id));
        assert!(out
            .effects
            .contains(&RegistryEffect::CancelTeardown { id: "c1".into() }));

        // A timer that fired despite the abort changes nothing.
        let out = registry.teardown_elapsed("c1");
        assert!(out.events.is_empty());
        assert_eq!(registry.connection_count(), 1);
    }
}

//! Presence Server Actor
//!
//! One task owns the connection registry and the contact graph. Every
//! input (socket traffic, teardown timers, directory completions,
//! service-update notifications) arrives on a single channel, so all
//! state mutation is serialized without locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::directory::{Directory, DirectorySnapshot};
use crate::graph::{ContactGraph, Delivery};
use crate::metrics::PresenceMetrics;
use crate::registry::{Registry, RegistryEffect, RegistryEvent, RegistryOutput, SocketId};

/// Inputs to the actor.
#[derive(Debug)]
pub enum ServerEvent {
    SocketOpened {
        socket: SocketId,
        tx: mpsc::UnboundedSender<String>,
    },
    SocketFrame {
        socket: SocketId,
        text: String,
    },
    SocketClosed {
        socket: SocketId,
        reason: String,
    },
    TeardownElapsed {
        id: String,
    },
    /// The directory reports changed service state for a session.
    ServiceUpdated {
        sid: String,
    },
    ResyncReady {
        sid: String,
        conn_id: String,
        snapshot: DirectorySnapshot,
        update: bool,
    },
    ResyncFailed {
        sid: String,
    },
}

/// Cloneable handle feeding events into the actor.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerHandle {
    pub fn send(&self, event: ServerEvent) {
        // A send failure means the actor stopped; the process is going
        // down anyway.
        let _ = self.tx.send(event);
    }

    /// Notifies the server that the directory pushed new service state
    /// for a session.
    pub fn service_updated(&self, sid: &str) {
        self.send(ServerEvent::ServiceUpdated {
            sid: sid.to_string(),
        });
    }
}

/// The actor owning registry and graph state.
pub struct PresenceServer<D: Directory + 'static> {
    config: ServerConfig,
    directory: Arc<D>,
    metrics: PresenceMetrics,
    registry: Registry,
    graph: ContactGraph,

    rx: mpsc::UnboundedReceiver<ServerEvent>,
    tx: mpsc::UnboundedSender<ServerEvent>,

    socket_txs: HashMap<SocketId, mpsc::UnboundedSender<String>>,
    teardowns: HashMap<String, JoinHandle<()>>,
    /// Per-sid resync serialization: one in flight, later requests
    /// coalesce into a single follow-up (latest wins).
    resyncs_in_flight: HashSet<String>,
    resyncs_pending: HashMap<String, PendingResync>,
}

#[derive(Debug)]
struct PendingResync {
    conn_id: String,
    update: bool,
}

impl<D: Directory + 'static> PresenceServer<D> {
    pub fn new(config: ServerConfig, directory: Arc<D>, metrics: PresenceMetrics) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        PresenceServer {
            config,
            directory,
            metrics,
            registry: Registry::new(),
            graph: ContactGraph::new(),
            rx,
            tx,
            socket_txs: HashMap::new(),
            teardowns: HashMap::new(),
            resyncs_in_flight: HashSet::new(),
            resyncs_pending: HashMap::new(),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn server_id(&self) -> String {
        self.registry.server_id().to_string()
    }

    /// Runs the actor until every handle is dropped.
    pub async fn run(mut self) {
        let mut report = tokio::time::interval(self.config.report_interval);
        report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = report.tick() => self.report(),
                event = self.rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        info!("presence server actor stopped");
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SocketOpened { socket, tx } => {
                self.socket_txs.insert(socket, tx);
                let out = self.registry.socket_opened(socket, unix_ms());
                self.apply(out);
            }
            ServerEvent::SocketFrame { socket, text } => {
                let out = self.registry.handle_frame(socket, &text);
                self.apply(out);
            }
            ServerEvent::SocketClosed { socket, reason } => {
                self.socket_txs.remove(&socket);
                let out = self.registry.socket_closed(socket, &reason);
                self.apply(out);
            }
            ServerEvent::TeardownElapsed { id } => {
                self.teardowns.remove(&id);
                let out = self.registry.teardown_elapsed(&id);
                self.apply(out);
            }
            ServerEvent::ServiceUpdated { sid } => {
                let Some(conn_id) = self
                    .graph
                    .session(&sid)
                    .map(|session| session.conn_id.clone())
                else {
                    debug!(sid, "service update for offline session ignored");
                    return;
                };
                if self.resyncs_in_flight.contains(&sid) {
                    self.resyncs_pending.insert(
                        sid,
                        PendingResync {
                            conn_id,
                            update: true,
                        },
                    );
                } else {
                    self.start_resync(sid, conn_id, true);
                }
            }
            ServerEvent::ResyncReady {
                sid,
                conn_id,
                snapshot,
                update,
            } => {
                self.resyncs_in_flight.remove(&sid);
                if self.registry.has(&conn_id) {
                    let deliveries = self
                        .graph
                        .sync_from_services(&sid, &conn_id, &snapshot, update);
                    self.route(deliveries);
                } else {
                    // The connection was torn down while the directory
                    // lookup ran; installing now would leave a session
                    // nothing will ever disconnect.
                    debug!(sid, conn_id, "discarding resync for torn-down connection");
                }
                self.follow_up_resync(&sid);
            }
            ServerEvent::ResyncFailed { sid } => {
                self.resyncs_in_flight.remove(&sid);
                self.follow_up_resync(&sid);
            }
        }
        self.update_gauges();
    }

    fn apply(&mut self, out: RegistryOutput) {
        for effect in out.effects {
            self.execute(effect);
        }
        for event in out.events {
            self.on_registry_event(event);
        }
    }

    fn execute(&mut self, effect: RegistryEffect) {
        match effect {
            RegistryEffect::SendFrame { socket, frame } => {
                if let Some(tx) = self.socket_txs.get(&socket) {
                    if tx.send(frame).is_err() {
                        debug!(socket, "socket writer gone; frame dropped");
                    }
                } else {
                    debug!(socket, "no writer for socket; frame dropped");
                }
            }
            RegistryEffect::StartTeardown { id } => {
                let tx = self.tx.clone();
                let timeout = self.config.reconnect_timeout;
                let timer_id = id.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(ServerEvent::TeardownElapsed { id: timer_id });
                });
                if let Some(old) = self.teardowns.insert(id, handle) {
                    old.abort();
                }
            }
            RegistryEffect::CancelTeardown { id } => {
                if let Some(handle) = self.teardowns.remove(&id) {
                    handle.abort();
                }
            }
        }
    }

    fn on_registry_event(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Connect { id, sid } => {
                info!(id, ?sid, "logical connection established");
                let Some(sid) = sid else {
                    // Anonymous connections never get a session.
                    return;
                };
                if self.resyncs_in_flight.contains(&sid) {
                    self.resyncs_pending.insert(
                        sid,
                        PendingResync {
                            conn_id: id,
                            update: false,
                        },
                    );
                } else {
                    self.start_resync(sid, id, false);
                }
            }
            RegistryEvent::Back { id } => {
                let deliveries = self.graph.connection_back(&id);
                self.route(deliveries);
            }
            RegistryEvent::Away { id } => {
                let deliveries = self.graph.connection_away(&id);
                self.route(deliveries);
            }
            RegistryEvent::Disconnect { id, reason } => {
                info!(id, reason, "logical connection torn down");
                let deliveries = self.graph.connection_disconnected(&id);
                self.route(deliveries);
            }
            RegistryEvent::Message { id, envelope } => {
                let deliveries = self.graph.connection_message(&id, envelope);
                if deliveries.is_empty() {
                    self.metrics.frames_dropped.inc();
                } else {
                    self.metrics
                        .messages_forwarded
                        .inc_by(deliveries.len() as u64);
                }
                self.route(deliveries);
            }
            RegistryEvent::Dropped { socket } => {
                debug!(socket, "frame dropped by registry");
                self.metrics.frames_dropped.inc();
            }
        }
    }

    fn route(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let out = self.registry.send(&delivery.conn_id, &delivery.envelope);
            self.apply(out);
        }
    }

    fn start_resync(&mut self, sid: String, conn_id: String, update: bool) {
        self.resyncs_in_flight.insert(sid.clone());
        let directory = self.directory.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match directory.services_session(&sid).await {
                Ok(snapshot) => {
                    let _ = tx.send(ServerEvent::ResyncReady {
                        sid,
                        conn_id,
                        snapshot,
                        update,
                    });
                }
                Err(err) => {
                    warn!(sid, error = %err, "directory resync failed");
                    let _ = tx.send(ServerEvent::ResyncFailed { sid });
                }
            }
        });
    }

    /// Runs the coalesced follow-up resync queued while one was in
    /// flight.
    fn follow_up_resync(&mut self, sid: &str) {
        let Some(pending) = self.resyncs_pending.remove(sid) else {
            return;
        };
        if pending.update {
            // Re-resolve the connection; the session may have moved on
            // or gone away while the prior resync ran.
            let Some(conn_id) = self
                .graph
                .session(sid)
                .map(|session| session.conn_id.clone())
            else {
                return;
            };
            self.start_resync(sid.to_string(), conn_id, true);
        } else {
            self.start_resync(sid.to_string(), pending.conn_id, false);
        }
    }

    fn update_gauges(&self) {
        self.metrics
            .sessions_online
            .set(self.graph.session_count() as i64);
        self.metrics
            .contacts_online
            .set(self.graph.contact_count() as i64);
    }

    fn report(&self) {
        info!(
            sessions = self.graph.session_count(),
            contacts = self.graph.contact_count(),
            connections = self.registry.connection_count(),
            "presence report"
        );
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

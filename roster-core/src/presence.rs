// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Presence Client Facade
//!
//! Thin policy layer between the identity directory and the transport:
//! holds a server connection exactly while at least one directory
//! service is logged in, and translates transport events into
//! contact-presence events for application code.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::error::{DirectoryError, PresenceError};
use crate::message::{Envelope, ResolutionChange};
use crate::socket::{EndpointConfig, SocketConnector};
use crate::transport::{PresenceTransport, TransportEvent};

/// Client view of the identity directory.
pub trait Directory {
    /// Login state across all configured services.
    fn services(&self) -> Result<Vec<ServiceLogin>, DirectoryError>;

    /// Reloads contact metadata. Called before surfacing a presence
    /// event that carries an identity-resolution change, so local
    /// contact data is consistent when the event lands.
    fn refresh_contacts(&self) -> Result<(), DirectoryError>;
}

/// Per-service login state.
#[derive(Debug, Clone)]
pub struct ServiceLogin {
    pub service_id: String,
    pub sid: Option<String>,
    pub logged_in: bool,
}

/// Last known presence of a followed contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPresence {
    Online,
    Away,
}

/// Events surfaced to application code.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Connected to the presence server.
    Online,
    /// Lost the server connection (may come back).
    Offline,
    /// Connection is away; traffic buffers.
    Away,
    /// Away gap resumed.
    Back,
    /// Server ended the session; terminal until a fresh login.
    Logout,
    ContactOnline { from: String },
    ContactOffline { from: String },
    ContactAway { from: String },
    ContactBack { from: String },
    ContactMessage { from: String, body: String },
}

/// Facade configuration.
#[derive(Debug, Clone, Default)]
pub struct PresenceConfig {
    /// Base URL of the hosting server (`http(s)://...`); `None` means
    /// host/port come from deployment-specific connector defaults.
    pub base_url: Option<String>,
    /// Server socket route.
    pub server_path: String,
}

impl PresenceConfig {
    pub fn new(base_url: Option<String>) -> Self {
        PresenceConfig {
            base_url,
            server_path: "/.roster-presence/server".into(),
        }
    }
}

/// Presence client: at most one transport, driven by directory state.
pub struct Presence<C: SocketConnector + Clone, D: Directory> {
    connector: C,
    directory: D,
    config: PresenceConfig,
    transport: Option<PresenceTransport<C>>,
    online_contacts: HashMap<String, ContactPresence>,
    logged_out: bool,
}

impl<C: SocketConnector + Clone, D: Directory> Presence<C, D> {
    pub fn new(connector: C, directory: D, config: PresenceConfig) -> Self {
        Presence {
            connector,
            directory,
            config,
            transport: None,
            online_contacts: HashMap::new(),
            logged_out: false,
        }
    }

    /// Re-evaluates the connection policy. Call on startup and whenever
    /// the directory reports updated service state.
    pub fn services_updated(&mut self) -> Result<Vec<PresenceEvent>, PresenceError> {
        let mut events = Vec::new();
        if self.logged_out {
            return Ok(events);
        }
        let services = self.directory.services()?;
        let sid = services.iter().find_map(|s| s.sid.clone());
        let logged_in = services.iter().any(|s| s.logged_in);

        if !logged_in {
            // No logged-in services: we don't want a server connection.
            if let Some(mut transport) = self.transport.take() {
                debug!("no services logged in; destroying transport");
                for event in transport.destroy() {
                    self.translate(event, &mut events);
                }
            }
            return Ok(events);
        }

        if self.transport.is_some() {
            return Ok(events);
        }

        let endpoint = EndpointConfig {
            base_url: self.config.base_url.clone(),
            path: self.config.server_path.clone(),
            sid,
            ..Default::default()
        };
        let mut transport = PresenceTransport::new(self.connector.clone(), endpoint);
        match transport.connect() {
            Ok(()) => self.transport = Some(transport),
            Err(err) => {
                // Reported, not fatal; the next service update retries.
                error!(error = %err, "presence transport connect failed");
            }
        }
        Ok(events)
    }

    /// Translates transport events (produced by the host's socket
    /// driver) into presence events.
    pub fn process(&mut self, transport_events: Vec<TransportEvent>) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        for event in transport_events {
            self.translate(event, &mut events);
        }
        events
    }

    /// Sends a point-to-point message to a followed contact.
    pub fn send_message(&mut self, to: &str, body: &str) -> Result<(), PresenceError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(PresenceError::NotConnected)?;
        transport.send(&Envelope::Message {
            from: None,
            to: Some(to.to_string()),
            message: body.to_string(),
        })?;
        Ok(())
    }

    /// Followed contacts currently online or away.
    pub fn online_contacts(&self) -> &HashMap<String, ContactPresence> {
        &self.online_contacts
    }

    /// The transport currently held, if any. The host's socket driver
    /// feeds socket inputs into it and hands the resulting events to
    /// [`Presence::process`].
    pub fn transport(&self) -> Option<&PresenceTransport<C>> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut PresenceTransport<C>> {
        self.transport.as_mut()
    }

    fn translate(&mut self, event: TransportEvent, out: &mut Vec<PresenceEvent>) {
        match event {
            TransportEvent::Connect => out.push(PresenceEvent::Online),
            TransportEvent::Disconnect(_) => out.push(PresenceEvent::Offline),
            TransportEvent::Destroy => {
                self.transport = None;
                out.push(PresenceEvent::Offline);
            }
            TransportEvent::Away => out.push(PresenceEvent::Away),
            TransportEvent::Back => out.push(PresenceEvent::Back),
            TransportEvent::Reconnect(_) | TransportEvent::Heartbeat => {}
            TransportEvent::Message(envelope) => self.translate_message(envelope, out),
        }
    }

    fn translate_message(&mut self, envelope: Envelope, out: &mut Vec<PresenceEvent>) {
        match envelope {
            Envelope::Logout => {
                // Permanently disconnect.
                self.logged_out = true;
                if let Some(mut transport) = self.transport.take() {
                    for event in transport.destroy() {
                        if matches!(event, TransportEvent::Destroy) {
                            out.push(PresenceEvent::Offline);
                        }
                    }
                }
                out.push(PresenceEvent::Logout);
            }
            Envelope::Online { from, peer_contact } => {
                self.online_contacts
                    .insert(from.clone(), ContactPresence::Online);
                self.refresh_on_resolution(peer_contact);
                out.push(PresenceEvent::ContactOnline { from });
            }
            Envelope::Offline { from, peer_contact } => {
                self.online_contacts.remove(&from);
                self.refresh_on_resolution(peer_contact);
                out.push(PresenceEvent::ContactOffline { from });
            }
            Envelope::Away { from } => {
                self.online_contacts
                    .insert(from.clone(), ContactPresence::Away);
                out.push(PresenceEvent::ContactAway { from });
            }
            Envelope::Back { from } => {
                self.online_contacts
                    .insert(from.clone(), ContactPresence::Online);
                out.push(PresenceEvent::ContactBack { from });
            }
            Envelope::Message { from, message, .. } => match from {
                Some(from) => out.push(PresenceEvent::ContactMessage {
                    from,
                    body: message,
                }),
                None => debug!("dropping message without sender"),
            },
            other => debug!(?other, "ignoring unexpected envelope"),
        }
    }

    fn refresh_on_resolution(&mut self, change: Option<ResolutionChange>) {
        if change.is_none() {
            return;
        }
        // Identity resolution changed: reload contact metadata before
        // the event reaches application code.
        if let Err(err) = self.directory.refresh_contacts() {
            error!(error = %err, "contact refresh failed");
        }
    }
}

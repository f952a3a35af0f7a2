//! Session & Contact Graph
//!
//! Maps logical connections to directory identities and keeps the
//! directed follow graph. All presence and message fan-out funnels
//! through a single authorization gate: an envelope reaches a
//! peerContact only if that recipient's follow set contains the
//! sender's identity.
//!
//! Like the registry, this is a pure state machine. Every operation
//! returns the [`Delivery`] values it produced; the driver routes them
//! through the registry.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use roster_core::{Envelope, ResolutionChange};

use crate::directory::DirectorySnapshot;

/// Follow-set key: identity a session subscribes to. Pending entries
/// hold the raw service identity until the directory resolves a
/// peerContact; a resolution migrates the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FollowKey {
    Pending {
        service_id: String,
        contact_id: String,
    },
    Resolved(String),
}

/// One authenticated session.
#[derive(Debug)]
pub struct Session {
    /// Logical connection currently carrying this session.
    pub conn_id: String,
    pub sid: String,
    /// Globally addressable identity, if the directory resolved one.
    pub peer_contact: Option<String>,
    pub follow: HashSet<FollowKey>,
}

/// An envelope to route to a logical connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub conn_id: String,
    pub envelope: Envelope,
}

/// Sessions keyed by sid plus the global peerContact index.
pub struct ContactGraph {
    sessions: HashMap<String, Session>,
    /// peerContact -> sid of the one online session representing it.
    contacts: HashMap<String, String>,
    by_conn: HashMap<String, String>,
}

impl ContactGraph {
    pub fn new() -> Self {
        ContactGraph {
            sessions: HashMap::new(),
            contacts: HashMap::new(),
            by_conn: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    pub fn session(&self, sid: &str) -> Option<&Session> {
        self.sessions.get(sid)
    }

    /// Installs or resyncs the session for `sid` from a directory
    /// snapshot. `update` marks a directory-pushed service change for
    /// an existing session; a completion for a superseded connection
    /// is a no-op.
    pub fn sync_from_services(
        &mut self,
        sid: &str,
        conn_id: &str,
        snapshot: &DirectorySnapshot,
        update: bool,
    ) -> Vec<Delivery> {
        let mut out = Vec::new();

        if update {
            match self.sessions.get(sid) {
                Some(session) if session.conn_id == conn_id => {}
                _ => {
                    debug!(sid, conn_id, "dropping resync for superseded session");
                    return out;
                }
            }
        }

        // First service record exposing a peerContact wins.
        let peer_contact = snapshot
            .services
            .iter()
            .find_map(|s| s.peer_contact.clone());

        let (old_peer_contact, old_follow) = match self.sessions.get(sid) {
            Some(prev) if update => (prev.peer_contact.clone(), prev.follow.clone()),
            _ => (None, HashSet::new()),
        };
        let identity_changed = update && old_peer_contact != peer_contact;

        if !update {
            // A sid has one session; a lingering one is logged out.
            if let Some(prev) = self.sessions.remove(sid) {
                debug!(sid, "evicting previous session for sid");
                if prev.conn_id != conn_id {
                    out.push(Delivery {
                        conn_id: prev.conn_id.clone(),
                        envelope: Envelope::Logout,
                    });
                }
                self.by_conn.remove(&prev.conn_id);
                self.contacts.retain(|_, v| v.as_str() != sid);
            }
        }

        let mut follow = HashSet::new();
        for contact in &snapshot.contacts {
            match &contact.peer_contact {
                Some(pc) => follow.insert(FollowKey::Resolved(pc.clone())),
                None => follow.insert(FollowKey::Pending {
                    service_id: contact.service_id.clone(),
                    contact_id: contact.contact_id.clone(),
                }),
            };
        }

        self.sessions.insert(
            sid.to_string(),
            Session {
                conn_id: conn_id.to_string(),
                sid: sid.to_string(),
                peer_contact: peer_contact.clone(),
                follow: follow.clone(),
            },
        );
        self.by_conn.insert(conn_id.to_string(), sid.to_string());

        // Publish our identity; at most one online session per
        // peerContact, a prior occupant is shadowed out of the index.
        if let Some(pc) = &peer_contact {
            self.contacts.insert(pc.clone(), sid.to_string());
        }

        // Per-contact bookkeeping for every resolved, online contact.
        for key in &follow {
            let FollowKey::Resolved(other_pc) = key else {
                continue;
            };
            let Some(other_sid) = self.contacts.get(other_pc).cloned() else {
                continue;
            };
            if other_sid == sid {
                continue;
            }

            let newly_followed = !update || !old_follow.contains(key);
            if newly_followed {
                // Tell the new session which followed contacts are
                // already online.
                out.push(Delivery {
                    conn_id: conn_id.to_string(),
                    envelope: Envelope::Online {
                        from: other_pc.clone(),
                        peer_contact: None,
                    },
                });
            }

            if !(newly_followed || identity_changed) {
                continue;
            }
            let Some(our_pc) = &peer_contact else {
                // Anonymous sessions have nothing to announce.
                continue;
            };
            let Some(other) = self.sessions.get_mut(&other_sid) else {
                continue;
            };

            // Migration: the counterpart may still follow us by raw
            // service identity from before our resolution.
            let pending: Vec<FollowKey> = other
                .follow
                .iter()
                .filter(|k| {
                    matches!(k, FollowKey::Pending { service_id, contact_id }
                        if snapshot.services.iter().any(|s| {
                            s.service_id == *service_id && s.uid.as_deref() == Some(contact_id)
                        }))
                })
                .cloned()
                .collect();
            if !pending.is_empty() {
                for key in pending {
                    other.follow.remove(&key);
                }
                other.follow.insert(FollowKey::Resolved(our_pc.clone()));
                out.push(Delivery {
                    conn_id: other.conn_id.clone(),
                    envelope: Envelope::Online {
                        from: our_pc.clone(),
                        peer_contact: Some(ResolutionChange::Added),
                    },
                });
            } else if other.follow.contains(&FollowKey::Resolved(our_pc.clone())) {
                out.push(Delivery {
                    conn_id: other.conn_id.clone(),
                    envelope: Envelope::Online {
                        from: our_pc.clone(),
                        peer_contact: None,
                    },
                });
            }
        }

        // Identity change: retire the old identity with the
        // counterparts that still follow it, then drop its index entry.
        if identity_changed {
            if let Some(old_pc) = &old_peer_contact {
                let new_key = match &peer_contact {
                    Some(pc) => Some(FollowKey::Resolved(pc.clone())),
                    None => snapshot
                        .services
                        .iter()
                        .find_map(|s| {
                            s.uid.as_ref().map(|uid| FollowKey::Pending {
                                service_id: s.service_id.clone(),
                                contact_id: uid.clone(),
                            })
                        }),
                };
                for key in &follow {
                    let FollowKey::Resolved(other_pc) = key else {
                        continue;
                    };
                    let Some(other_sid) = self.contacts.get(other_pc).cloned() else {
                        continue;
                    };
                    let Some(other) = self.sessions.get_mut(&other_sid) else {
                        continue;
                    };
                    let old_key = FollowKey::Resolved(old_pc.clone());
                    if !other.follow.contains(&old_key) {
                        continue;
                    }
                    // Notify before re-keying so the gate still passes.
                    out.push(Delivery {
                        conn_id: other.conn_id.clone(),
                        envelope: Envelope::Offline {
                            from: old_pc.clone(),
                            peer_contact: Some(ResolutionChange::Removed),
                        },
                    });
                    other.follow.remove(&old_key);
                    if let Some(new_key) = &new_key {
                        other.follow.insert(new_key.clone());
                    }
                }
                if self.contacts.get(old_pc).map(String::as_str) == Some(sid) {
                    self.contacts.remove(old_pc);
                }
            }
        }

        out
    }

    /// The connection carrying a session dropped its socket.
    pub fn connection_away(&self, conn_id: &str) -> Vec<Delivery> {
        self.fan_out_presence(conn_id, |from| Envelope::Away { from })
    }

    /// The connection resumed on a fresh socket.
    pub fn connection_back(&self, conn_id: &str) -> Vec<Delivery> {
        self.fan_out_presence(conn_id, |from| Envelope::Back { from })
    }

    /// The connection timed out or logged out; the session is removed.
    pub fn connection_disconnected(&mut self, conn_id: &str) -> Vec<Delivery> {
        let out = self.fan_out_presence(conn_id, |from| Envelope::Offline {
            from,
            peer_contact: None,
        });
        let Some(sid) = self.by_conn.remove(conn_id) else {
            return out;
        };
        match self.sessions.get(&sid) {
            Some(session) if session.conn_id == conn_id => {
                debug!(sid, conn_id, "removing session");
                self.sessions.remove(&sid);
                self.contacts.retain(|_, v| *v != sid);
            }
            _ => {}
        }
        out
    }

    /// Application frame from a connection: a `message` is forwarded
    /// only when the sender follows the recipient, and delivered only
    /// when the recipient follows the sender.
    pub fn connection_message(&mut self, conn_id: &str, envelope: Envelope) -> Vec<Delivery> {
        let Some(session) = self.session_by_conn(conn_id) else {
            return Vec::new();
        };
        let Envelope::Message {
            to: Some(to),
            message,
            ..
        } = envelope
        else {
            debug!(conn_id, "ignoring unexpected frame");
            return Vec::new();
        };
        let Some(from) = session.peer_contact.clone() else {
            debug!(conn_id, "dropping message from anonymous session");
            return Vec::new();
        };
        if !session.follow.contains(&FollowKey::Resolved(to.clone())) {
            debug!(conn_id, to, "dropping message to unfollowed contact");
            return Vec::new();
        }
        self.send_message_to(
            &to,
            Envelope::Message {
                from: Some(from),
                to: Some(to.clone()),
                message,
            },
        )
        .into_iter()
        .collect()
    }

    /// The single authorization gate: deliver to `to`'s online session
    /// only if that recipient's follow set contains the envelope's
    /// sender.
    pub fn send_message_to(&self, to: &str, envelope: Envelope) -> Option<Delivery> {
        let from = envelope_from(&envelope)?;
        let sid = self.contacts.get(to)?;
        let session = self.sessions.get(sid)?;
        if !session.follow.contains(&FollowKey::Resolved(from.to_string())) {
            debug!(to, from, "gate: recipient does not follow sender");
            return None;
        }
        Some(Delivery {
            conn_id: session.conn_id.clone(),
            envelope,
        })
    }

    fn fan_out_presence<F>(&self, conn_id: &str, make: F) -> Vec<Delivery>
    where
        F: Fn(String) -> Envelope,
    {
        let mut out = Vec::new();
        let Some(session) = self.session_by_conn(conn_id) else {
            return out;
        };
        let Some(from) = session.peer_contact.clone() else {
            return out;
        };
        for key in &session.follow {
            if let FollowKey::Resolved(pc) = key {
                if let Some(delivery) = self.send_message_to(pc, make(from.clone())) {
                    out.push(delivery);
                }
            }
        }
        out
    }

    /// Current session for a connection; `None` if a newer connection
    /// superseded it for the same sid.
    fn session_by_conn(&self, conn_id: &str) -> Option<&Session> {
        let sid = self.by_conn.get(conn_id)?;
        self.sessions
            .get(sid)
            .filter(|session| session.conn_id == conn_id)
    }
}

impl Default for ContactGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope_from(envelope: &Envelope) -> Option<&str> {
    match envelope {
        Envelope::Online { from, .. }
        | Envelope::Offline { from, .. }
        | Envelope::Away { from }
        | Envelope::Back { from } => Some(from),
        Envelope::Message { from, .. } => from.as_deref(),
        _ => None,
    }
}

// INLINE_TEST_REQUIRED: Tests private by_conn/contacts index consistency
#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ContactRecord, ServiceRecord};

    fn snapshot(pc: Option<&str>, contacts: &[(&str, Option<&str>)]) -> DirectorySnapshot {
        DirectorySnapshot {
            services: vec![ServiceRecord {
                service_id: "svc-1".into(),
                uid: Some("uid-1".into()),
                peer_contact: pc.map(String::from),
            }],
            contacts: contacts
                .iter()
                .map(|(contact_id, pc)| ContactRecord {
                    service_id: "svc-1".into(),
                    contact_id: contact_id.to_string(),
                    peer_contact: pc.map(String::from),
                })
                .collect(),
        }
    }

    #[test]
    fn test_indexes_cleaned_on_disconnect() {
        let mut graph = ContactGraph::new();
        graph.sync_from_services("sid-a", "c1", &snapshot(Some("alice"), &[]), false);
        assert_eq!(graph.session_count(), 1);
        assert_eq!(graph.contact_count(), 1);

        graph.connection_disconnected("c1");
        assert_eq!(graph.session_count(), 0);
        assert_eq!(graph.contact_count(), 0);
        assert!(graph.session_by_conn("c1").is_none());
    }

    #[test]
    fn test_superseded_connection_is_guarded() {
        let mut graph = ContactGraph::new();
        graph.sync_from_services("sid-a", "c1", &snapshot(Some("alice"), &[]), false);
        graph.sync_from_services("sid-a", "c2", &snapshot(Some("alice"), &[]), false);

        // The old connection's handlers are no-ops now.
        assert!(graph.connection_away("c1").is_empty());
        let before = graph.session_count();
        graph.connection_disconnected("c1");
        assert_eq!(graph.session_count(), before);
        assert_eq!(graph.session("sid-a").map(|s| s.conn_id.as_str()), Some("c2"));
    }

    #[test]
    fn test_update_resync_announces_only_new_follows() {
        let mut graph = ContactGraph::new();
        graph.sync_from_services(
            "sid-a",
            "c1",
            &snapshot(Some("alice"), &[("bob-uid", Some("bob"))]),
            false,
        );
        graph.sync_from_services(
            "sid-b",
            "c2",
            &snapshot(Some("bob"), &[("alice-uid", Some("alice"))]),
            false,
        );
        graph.sync_from_services("sid-c", "c3", &snapshot(Some("carol"), &[]), false);

        // Unchanged snapshot: nothing to repeat.
        let out = graph.sync_from_services(
            "sid-a",
            "c1",
            &snapshot(Some("alice"), &[("bob-uid", Some("bob"))]),
            true,
        );
        assert!(out.is_empty());

        // A newly followed online contact is announced; the standing
        // follow of bob is not.
        let out = graph.sync_from_services(
            "sid-a",
            "c1",
            &snapshot(
                Some("alice"),
                &[("bob-uid", Some("bob")), ("carol-uid", Some("carol"))],
            ),
            true,
        );
        assert_eq!(
            out,
            vec![Delivery {
                conn_id: "c1".into(),
                envelope: Envelope::Online {
                    from: "carol".into(),
                    peer_contact: None,
                },
            }]
        );
    }

    #[test]
    fn test_stale_resync_completion_is_noop() {
        let mut graph = ContactGraph::new();
        graph.sync_from_services("sid-a", "c1", &snapshot(Some("alice"), &[]), false);
        graph.sync_from_services("sid-a", "c2", &snapshot(Some("alice"), &[]), false);

        // Update completion for the evicted connection must not apply.
        let out = graph.sync_from_services("sid-a", "c1", &snapshot(Some("zoe"), &[]), true);
        assert!(out.is_empty());
        assert_eq!(
            graph.session("sid-a").and_then(|s| s.peer_contact.clone()),
            Some("alice".into())
        );
    }
}

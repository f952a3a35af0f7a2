// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Message Types
//!
//! Typed envelopes exchanged between the presence client and server.
//! Frames are JSON text, tagged on `"type"` with the wire names the
//! deployed protocol uses (handshake types are the double-underscored
//! ones; everything else is application-level presence traffic).

use serde::{Deserialize, Serialize};

/// Disconnect reason sent when a handshake reveals a new server instance.
pub const REASON_SERVER_REBOOT: &str = "server reboot";

/// Disconnect reason sent when a connection resumes after hibernating.
pub const REASON_LONG_AWAY: &str = "long away (hibernate)";

/// Disconnect reason raised once when the away retry threshold is crossed.
pub const REASON_ATTEMPTS_EXCEEDED: &str = "away re-connect attempts exceeded";

/// Marker on `online`/`offline` notices signalling that the sending
/// contact's directory identity was resolved or dropped, so the
/// receiver should refresh its contact list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChange {
    Added,
    Removed,
}

/// Envelope for every frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Server -> client handshake offer. The client adopts the proposed
    /// id only if it has never chosen one.
    #[serde(rename = "__ASSIGN-ID__")]
    AssignId {
        id: String,
        #[serde(rename = "serverId")]
        server_id: String,
    },
    /// Client -> server handshake ack carrying the client's permanent
    /// logical id and its directory session id.
    #[serde(rename = "__ANNOUNCE-ID__")]
    AnnounceId {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sid: Option<String>,
        #[serde(rename = "serverId")]
        server_id: String,
    },
    #[serde(rename = "online")]
    Online {
        from: String,
        #[serde(
            rename = "peerContact",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        peer_contact: Option<ResolutionChange>,
    },
    #[serde(rename = "offline")]
    Offline {
        from: String,
        #[serde(
            rename = "peerContact",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        peer_contact: Option<ResolutionChange>,
    },
    #[serde(rename = "away")]
    Away { from: String },
    #[serde(rename = "back")]
    Back { from: String },
    /// Point-to-point payload. Clients send `{to, message}`; the server
    /// forwards `{from, message}`.
    #[serde(rename = "message")]
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        message: String,
    },
    /// Server -> client, terminal. No further reconnection is attempted.
    #[serde(rename = "logout")]
    Logout,
}

/// Payload riding on the transport's native keep-alive frames. Carries
/// the server instance id so clients detect a restart without waiting
/// for a failed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "serverId")]
    pub server_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_id_wire_names() {
        let env = Envelope::AssignId {
            id: "abc-123".into(),
            server_id: "server-1".into(),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"__ASSIGN-ID__\""));
        assert!(json.contains("\"serverId\":\"server-1\""));
    }

    #[test]
    fn test_resolution_change_lowercase() {
        let env = Envelope::Online {
            from: "peer-a".into(),
            peer_contact: Some(ResolutionChange::Added),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"peerContact\":\"added\""));
    }

    #[test]
    fn test_plain_online_omits_peer_contact() {
        let env = Envelope::Online {
            from: "peer-a".into(),
            peer_contact: None,
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("peerContact"));
    }

    #[test]
    fn test_logout_is_bare_type() {
        let json = serde_json::to_string(&Envelope::Logout).unwrap();
        assert_eq!(json, "{\"type\":\"logout\"}");
    }
}

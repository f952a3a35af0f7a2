// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Frame Codec
//!
//! JSON text frames over the socket's native message framing. Malformed
//! frames surface as [`ProtocolError`]; callers log and drop them — a
//! bad frame never tears down the connection.

use crate::error::ProtocolError;
use crate::message::{Envelope, Heartbeat};

/// Upper bound on a single frame. Presence traffic is tiny; anything
/// near this size is garbage or abuse.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Serializes an envelope into a wire frame.
pub fn encode_frame(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parses a wire frame into an envelope.
pub fn decode_frame(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: text.len() });
    }
    Ok(serde_json::from_str(text)?)
}

/// Serializes the keep-alive heartbeat payload.
pub fn encode_heartbeat(heartbeat: &Heartbeat) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(heartbeat)?)
}

/// Parses a keep-alive payload. Empty or foreign payloads are errors;
/// the transport treats those as heartbeats without restart info.
pub fn decode_heartbeat(bytes: &[u8]) -> Result<Heartbeat, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_announce() {
        let env = Envelope::AnnounceId {
            id: "sock1-17".into(),
            sid: Some("sid-9".into()),
            server_id: "server-x".into(),
        };
        let frame = encode_frame(&env).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), env);
    }

    #[test]
    fn test_malformed_frame() {
        assert!(matches!(
            decode_frame("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        assert!(decode_frame("{\"type\":\"__BOGUS__\"}").is_err());
    }

    #[test]
    fn test_oversized_frame() {
        let big = format!("{{\"type\":\"message\",\"message\":\"{}\"}}", "x".repeat(MAX_FRAME_SIZE));
        assert!(matches!(
            decode_frame(&big),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_heartbeat_payload() {
        let hb = Heartbeat {
            server_id: "server-abc".into(),
        };
        let bytes = encode_heartbeat(&hb).unwrap();
        assert_eq!(decode_heartbeat(&bytes).unwrap(), hb);
        assert!(decode_heartbeat(b"").is_err());
    }
}

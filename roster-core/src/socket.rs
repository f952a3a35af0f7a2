// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Socket Seam
//!
//! Abstraction over the underlying message-oriented socket. The
//! transport only ever needs two primitives (`send`, `close`) plus a
//! way to open fresh sockets on reconnect; everything the socket
//! reports back (open/frame/heartbeat/close/error) enters the
//! transport through its `handle_*` methods, driven by whatever event
//! loop the host runs.

use crate::error::TransportError;
use crate::message::Heartbeat;

/// An open underlying socket. One instance per connect attempt; the
/// transport discards it on close and asks the connector for a new one.
pub trait Socket {
    /// Transmits one text frame.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Closes the socket. Safe to call more than once.
    fn close(&mut self);
}

/// Opens underlying sockets. Implementations are cheap handles (the
/// facade clones one per transport it creates).
pub trait SocketConnector {
    type Socket: Socket;

    fn connect(&mut self, url: &str) -> Result<Self::Socket, TransportError>;
}

/// Inputs a driver feeds into the transport from the live socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// A text frame arrived.
    Frame(String),
    /// A native keep-alive carrying the server heartbeat payload.
    Heartbeat(Heartbeat),
    /// The socket closed or errored, with a reason.
    Closed(String),
}

/// Endpoint description; produces the socket URL with the scheme and
/// port inference the deployed clients rely on (`http`->`ws`,
/// `https`/port 443 -> `wss`:443).
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    /// Full base URL (`http(s)://` or `ws(s)://`). Takes precedence
    /// over `host`/`port`/`secure` when set.
    pub base_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: bool,
    /// Server socket route, e.g. `/.roster-presence/server`.
    pub path: String,
    /// Directory session id announced during the handshake.
    pub sid: Option<String>,
}

impl EndpointConfig {
    /// Builds the socket URL.
    pub fn url(&self) -> Result<String, TransportError> {
        if let Some(base) = &self.base_url {
            let (scheme, rest) = base
                .split_once("://")
                .ok_or_else(|| TransportError::InvalidEndpoint(base.clone()))?;
            let scheme = match scheme {
                "http" | "ws" => "ws",
                "https" | "wss" => "wss",
                other => {
                    return Err(TransportError::InvalidEndpoint(format!(
                        "unsupported scheme '{other}'"
                    )))
                }
            };
            let host_port = rest.split('/').next().unwrap_or(rest);
            if host_port.is_empty() {
                return Err(TransportError::InvalidEndpoint(base.clone()));
            }
            let (host, port) = match host_port.rsplit_once(':') {
                Some((host, port_str)) => {
                    let port: u16 = port_str.parse().map_err(|_| {
                        TransportError::InvalidEndpoint(format!("invalid port '{port_str}'"))
                    })?;
                    (host.to_string(), port)
                }
                None => {
                    let default_port = if scheme == "wss" { 443 } else { 80 };
                    (host_port.to_string(), default_port)
                }
            };
            Ok(format!("{scheme}://{host}:{port}{}", self.path))
        } else {
            let host = self
                .host
                .as_deref()
                .ok_or_else(|| TransportError::InvalidEndpoint("no host configured".into()))?;
            let secure = self.secure || self.port == Some(443);
            let scheme = if secure { "wss" } else { "ws" };
            match self.port {
                Some(port) => Ok(format!("{scheme}://{host}:{port}{}", self.path)),
                None => Ok(format!("{scheme}://{host}{}", self.path)),
            }
        }
    }
}

// INLINE_TEST_REQUIRED: URL inference rules are the module's whole contract
#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base: &str) -> EndpointConfig {
        EndpointConfig {
            base_url: Some(base.into()),
            path: "/.roster-presence/server".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_http_base_becomes_ws() {
        assert_eq!(
            endpoint("http://example.com:8080").url().unwrap(),
            "ws://example.com:8080/.roster-presence/server"
        );
    }

    #[test]
    fn test_https_base_infers_443() {
        assert_eq!(
            endpoint("https://example.com").url().unwrap(),
            "wss://example.com:443/.roster-presence/server"
        );
    }

    #[test]
    fn test_ws_base_infers_80() {
        assert_eq!(
            endpoint("ws://example.com").url().unwrap(),
            "ws://example.com:80/.roster-presence/server"
        );
    }

    #[test]
    fn test_base_path_suffix_ignored() {
        assert_eq!(
            endpoint("https://example.com:9000/anything").url().unwrap(),
            "wss://example.com:9000/.roster-presence/server"
        );
    }

    #[test]
    fn test_host_port_443_is_secure() {
        let cfg = EndpointConfig {
            host: Some("example.com".into()),
            port: Some(443),
            path: "/p".into(),
            ..Default::default()
        };
        assert_eq!(cfg.url().unwrap(), "wss://example.com:443/p");
    }

    #[test]
    fn test_missing_host_rejected() {
        let cfg = EndpointConfig {
            path: "/p".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.url(), Err(TransportError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_bad_scheme_rejected() {
        assert!(endpoint("ftp://example.com").url().is_err());
    }
}

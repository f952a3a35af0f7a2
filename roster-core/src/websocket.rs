// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Socket
//!
//! Production [`Socket`] implementation using tungstenite. Supports
//! both native-tls and rustls TLS backends.

use std::net::TcpStream;
use std::time::Duration;

#[cfg(all(feature = "network-native-tls", not(feature = "network-rustls")))]
use native_tls::TlsConnector;

#[cfg(feature = "network-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "network-rustls")]
use std::sync::Arc;

use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::TransportError;
use crate::protocol::decode_heartbeat;
use crate::socket::{Socket, SocketConnector, SocketEvent};

const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Opens [`WebSocketSocket`]s. Stateless; cloning is free.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        WebSocketConnector
    }

    /// Parses a socket URL into host and port.
    fn parse_url(url: &str) -> Result<(String, u16, bool), TransportError> {
        let is_tls = url.starts_with("wss://");
        let url_without_scheme = url
            .strip_prefix("wss://")
            .or_else(|| url.strip_prefix("ws://"))
            .ok_or_else(|| {
                TransportError::InvalidEndpoint("expected ws:// or wss:// scheme".into())
            })?;

        let host_port = url_without_scheme
            .split('/')
            .next()
            .unwrap_or(url_without_scheme);

        let (host, port) = if let Some(colon_pos) = host_port.rfind(':') {
            let host = &host_port[..colon_pos];
            let port_str = &host_port[colon_pos + 1..];
            let port: u16 = port_str
                .parse()
                .map_err(|_| TransportError::InvalidEndpoint(format!("invalid port: {port_str}")))?;
            (host.to_string(), port)
        } else {
            let default_port = if is_tls { 443 } else { 80 };
            (host_port.to_string(), default_port)
        };

        Ok((host, port, is_tls))
    }

    /// Create a TLS stream using native-tls
    #[cfg(all(feature = "network-native-tls", not(feature = "network-rustls")))]
    fn create_tls_stream(
        host: &str,
        tcp_stream: TcpStream,
    ) -> Result<MaybeTlsStream<TcpStream>, TransportError> {
        let connector = TlsConnector::new()
            .map_err(|e| TransportError::ConnectFailed(format!("TLS error: {e}")))?;
        let tls_stream = connector
            .connect(host, tcp_stream)
            .map_err(|e| TransportError::ConnectFailed(format!("TLS handshake failed: {e}")))?;
        Ok(MaybeTlsStream::NativeTls(tls_stream))
    }

    /// Create a TLS stream using rustls
    #[cfg(feature = "network-rustls")]
    fn create_tls_stream(
        host: &str,
        tcp_stream: TcpStream,
    ) -> Result<MaybeTlsStream<TcpStream>, TransportError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name: ServerName<'_> = host
            .try_into()
            .map_err(|_| TransportError::ConnectFailed(format!("invalid server name: {host}")))?;

        let tls_conn = rustls::ClientConnection::new(Arc::new(config), server_name.to_owned())
            .map_err(|e| TransportError::ConnectFailed(format!("TLS setup failed: {e}")))?;

        let tls_stream = rustls::StreamOwned::new(tls_conn, tcp_stream);
        Ok(MaybeTlsStream::Rustls(tls_stream))
    }
}

impl SocketConnector for WebSocketConnector {
    type Socket = WebSocketSocket;

    fn connect(&mut self, url: &str) -> Result<WebSocketSocket, TransportError> {
        let (host, port, is_tls) = Self::parse_url(url)?;
        let addr = format!("{host}:{port}");

        let tcp_stream =
            TcpStream::connect(&addr).map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        // Short read timeout so the driver's receive loop can interleave
        // with scheduled reconnect polling.
        tcp_stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tcp_stream
            .set_write_timeout(Some(IO_TIMEOUT))
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let stream: MaybeTlsStream<TcpStream> = if is_tls {
            Self::create_tls_stream(&host, tcp_stream)?
        } else {
            MaybeTlsStream::Plain(tcp_stream)
        };

        let request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(format!("invalid request: {e}")))?;

        let (socket, _response) = tungstenite::client(request, stream)
            .map_err(|e| TransportError::ConnectFailed(format!("handshake failed: {e}")))?;

        Ok(WebSocketSocket {
            socket: Some(socket),
        })
    }
}

/// One live WebSocket connection.
pub struct WebSocketSocket {
    socket: Option<WebSocket<MaybeTlsStream<TcpStream>>>,
}

impl WebSocketSocket {
    /// Reads the next socket input for the transport. `Ok(None)` means
    /// no input was available within the read timeout.
    pub fn receive(&mut self) -> Result<Option<SocketEvent>, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        match socket.read() {
            Ok(Message::Text(text)) => Ok(Some(SocketEvent::Frame(text))),
            Ok(Message::Ping(payload)) => {
                // tungstenite queues the Pong reply itself; the payload
                // carries the server heartbeat.
                match decode_heartbeat(&payload) {
                    Ok(heartbeat) => Ok(Some(SocketEvent::Heartbeat(heartbeat))),
                    Err(_) => Ok(None),
                }
            }
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "transport close".into());
                self.socket = None;
                Ok(Some(SocketEvent::Closed(reason)))
            }
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.socket = None;
                Ok(Some(SocketEvent::Closed("transport close".into())))
            }
            Err(e) => {
                self.socket = None;
                Ok(Some(SocketEvent::Closed(e.to_string())))
            }
        }
    }
}

impl Socket for WebSocketSocket {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        socket
            .send(Message::Text(frame.to_string()))
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::NotConnected
                }
                other => TransportError::SendFailed(other.to_string()),
            })?;
        socket
            .flush()
            .map_err(|e| TransportError::SendFailed(format!("flush failed: {e}")))
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None); // Ignore errors on close
        }
    }
}

// INLINE_TEST_REQUIRED: Tests private parse_url function for URL parsing logic
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_wss() {
        let (host, port, is_tls) =
            WebSocketConnector::parse_url("wss://presence.example.com").unwrap();
        assert_eq!(host, "presence.example.com");
        assert_eq!(port, 443);
        assert!(is_tls);
    }

    #[test]
    fn test_parse_url_ws_with_port() {
        let (host, port, is_tls) = WebSocketConnector::parse_url("ws://localhost:8080").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 8080);
        assert!(!is_tls);
    }

    #[test]
    fn test_parse_url_with_path() {
        let (host, port, is_tls) =
            WebSocketConnector::parse_url("wss://presence.example.com:9000/.roster-presence/server")
                .unwrap();
        assert_eq!(host, "presence.example.com");
        assert_eq!(port, 9000);
        assert!(is_tls);
    }

    #[test]
    fn test_parse_url_invalid_scheme() {
        assert!(WebSocketConnector::parse_url("http://example.com").is_err());
    }
}

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Roster Core Library
//!
//! Client side of the Roster presence protocol: typed wire envelopes,
//! a reconnecting transport with a stable logical identity, and a
//! presence facade driven by the identity directory.
//!
//! # Architecture
//!
//! - **Message types**: wire envelopes tagged on `"type"`
//! - **Protocol layer**: JSON frame codec with a size guard
//! - **Socket seam**: `Socket`/`SocketConnector` traits the transport
//!   opens fresh sockets through; mock for tests, tungstenite for
//!   production
//! - **Transport**: identity-stable reconnect, backoff, away buffering,
//!   heartbeat restart detection
//! - **Presence facade**: directory-driven connection policy and
//!   contact presence events
//!
//! # Example
//!
//! ```ignore
//! use roster_core::{Presence, PresenceConfig, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new();
//! let mut presence = Presence::new(connector, directory, PresenceConfig::new(None));
//! let events = presence.services_updated()?;
//! ```

#[cfg(feature = "testing")]
pub mod error;
#[cfg(not(feature = "testing"))]
mod error;

#[cfg(feature = "testing")]
pub mod message;
#[cfg(not(feature = "testing"))]
mod message;

#[cfg(feature = "testing")]
pub mod mock;
#[cfg(not(feature = "testing"))]
mod mock;

#[cfg(feature = "testing")]
pub mod presence;
#[cfg(not(feature = "testing"))]
mod presence;

#[cfg(feature = "testing")]
pub mod protocol;
#[cfg(not(feature = "testing"))]
mod protocol;

#[cfg(feature = "testing")]
pub mod socket;
#[cfg(not(feature = "testing"))]
mod socket;

#[cfg(feature = "testing")]
pub mod transport;
#[cfg(not(feature = "testing"))]
mod transport;

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
mod websocket;

// Error types
pub use error::{DirectoryError, PresenceError, ProtocolError, TransportError};

// Message types
pub use message::{
    Envelope, Heartbeat, ResolutionChange, REASON_ATTEMPTS_EXCEEDED, REASON_LONG_AWAY,
    REASON_SERVER_REBOOT,
};

// Protocol utilities
pub use protocol::{
    decode_frame, decode_heartbeat, encode_frame, encode_heartbeat, MAX_FRAME_SIZE,
};

// Socket seam
pub use socket::{EndpointConfig, Socket, SocketConnector, SocketEvent};

// Mock socket for testing
pub use mock::{MockConnector, MockSocket, MockSocketHandle};

// Reconnecting transport
pub use transport::{
    reconnect_delay, PresenceTransport, TransportEvent, EXCEEDED_ATTEMPTS, LONG_AWAY,
};

// Presence facade
pub use presence::{
    ContactPresence, Directory, Presence, PresenceConfig, PresenceEvent, ServiceLogin,
};

// WebSocket socket for production
#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
pub use websocket::{WebSocketConnector, WebSocketSocket};

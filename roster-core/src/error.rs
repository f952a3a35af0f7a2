// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error Types

use thiserror::Error;

/// Frame-level decode/encode failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame exceeds maximum size ({size} bytes)")]
    FrameTooLarge { size: usize },

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Client transport failures. `AlreadyConnected`/`AlreadyConnecting`/
/// `NotConnected` are usage errors surfaced synchronously to the
/// caller; the rest feed the reconnect machinery.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport '{uri}' is already connected")]
    AlreadyConnected { uri: String },

    #[error("transport '{uri}' is already connecting")]
    AlreadyConnecting { uri: String },

    #[error("cannot send while disconnected; sender should respect connect/disconnect states")]
    NotConnected,

    #[error("transport has been destroyed")]
    Destroyed,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("socket connect failed: {0}")]
    ConnectFailed(String),

    #[error("socket send failed: {0}")]
    SendFailed(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Failures reported by the identity directory collaborator.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

/// Facade-level failures.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("cannot send message: not connected to server")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

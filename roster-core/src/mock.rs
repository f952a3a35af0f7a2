// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock Socket
//!
//! In-memory connector/socket pair for tests. Records every frame the
//! transport sends and lets tests fail connect attempts on demand.

use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::socket::{Socket, SocketConnector};

#[derive(Debug, Default)]
struct SocketState {
    sent: Vec<String>,
    closed: bool,
}

#[derive(Debug, Default)]
struct ConnectorState {
    sockets: Vec<Arc<Mutex<SocketState>>>,
    fail_connects: u32,
    connect_urls: Vec<String>,
}

/// Connector handing out [`MockSocket`]s; cloning shares the recorded state.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Number of connect attempts seen (successful or not).
    pub fn connect_count(&self) -> usize {
        self.lock().connect_urls.len()
    }

    /// URL passed to the `i`-th connect attempt.
    pub fn connect_url(&self, i: usize) -> Option<String> {
        self.lock().connect_urls.get(i).cloned()
    }

    /// Inspection handle for the `i`-th successfully opened socket.
    pub fn socket(&self, i: usize) -> Option<MockSocketHandle> {
        self.lock()
            .sockets
            .get(i)
            .cloned()
            .map(|state| MockSocketHandle { state })
    }

    /// Inspection handle for the most recently opened socket.
    pub fn last_socket(&self) -> Option<MockSocketHandle> {
        self.lock()
            .sockets
            .last()
            .cloned()
            .map(|state| MockSocketHandle { state })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SocketConnector for MockConnector {
    type Socket = MockSocket;

    fn connect(&mut self, url: &str) -> Result<MockSocket, TransportError> {
        let mut state = self.lock();
        state.connect_urls.push(url.to_string());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::ConnectFailed("mock connect refused".into()));
        }
        let socket_state = Arc::new(Mutex::new(SocketState::default()));
        state.sockets.push(socket_state.clone());
        Ok(MockSocket {
            state: socket_state,
        })
    }
}

/// Socket owned by the transport under test.
pub struct MockSocket {
    state: Arc<Mutex<SocketState>>,
}

impl Socket for MockSocket {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(TransportError::SendFailed("mock socket closed".into()));
        }
        state.sent.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
    }
}

/// Read-only view of a mock socket's recorded traffic.
#[derive(Clone)]
pub struct MockSocketHandle {
    state: Arc<Mutex<SocketState>>,
}

impl MockSocketHandle {
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}

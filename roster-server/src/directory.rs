//! Identity Directory
//!
//! Server-side view of the identity directory: per-session service
//! logins and the contacts each session follows. Lookups are async so
//! a deployment can back them with a remote service; the bundled
//! implementations are a static JSON file and an in-memory mock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("directory lookup failed: {0}")]
    Lookup(String),

    #[error("directory data unreadable: {0}")]
    Unreadable(String),
}

/// One service login of a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub service_id: String,
    /// Service-scoped user id; present while logged in.
    pub uid: Option<String>,
    /// Resolved global identity, if the directory has one.
    pub peer_contact: Option<String>,
}

/// One followed contact of a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub service_id: String,
    /// Service-scoped contact id.
    pub contact_id: String,
    /// Resolved global identity, if known.
    pub peer_contact: Option<String>,
}

/// Everything the graph needs to (re)sync one session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub contacts: Vec<ContactRecord>,
}

/// Async directory lookup used by the server driver.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Service and contact records for one session.
    async fn services_session(&self, sid: &str) -> Result<DirectorySnapshot, DirectoryError>;
}

/// Directory backed by a JSON file mapping sid to snapshot. Suitable
/// for single-node deployments and demos.
pub struct StaticDirectory {
    sessions: HashMap<String, DirectorySnapshot>,
}

impl StaticDirectory {
    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Unreadable(format!("{}: {e}", path.display())))?;
        let sessions: HashMap<String, DirectorySnapshot> = serde_json::from_str(&data)
            .map_err(|e| DirectoryError::Unreadable(format!("{}: {e}", path.display())))?;
        Ok(StaticDirectory { sessions })
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn services_session(&self, sid: &str) -> Result<DirectorySnapshot, DirectoryError> {
        self.sessions
            .get(sid)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownSession(sid.to_string()))
    }
}

/// In-memory directory whose snapshots tests mutate between resyncs.
#[derive(Clone, Default)]
pub struct MockDirectory {
    sessions: Arc<Mutex<HashMap<String, DirectorySnapshot>>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, sid: &str, snapshot: DirectorySnapshot) {
        self.lock().insert(sid.to_string(), snapshot);
    }

    pub fn remove(&self, sid: &str) {
        self.lock().remove(sid);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DirectorySnapshot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn services_session(&self, sid: &str) -> Result<DirectorySnapshot, DirectoryError> {
        self.lock()
            .get(sid)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownSession(sid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_names() {
        let snapshot: DirectorySnapshot = serde_json::from_str(
            r#"{
                "services": [
                    {"serviceId": "svc-1", "uid": "alice@svc-1", "peerContact": "alice"}
                ],
                "contacts": [
                    {"serviceId": "svc-1", "contactId": "bob@svc-1", "peerContact": null}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.services[0].peer_contact.as_deref(), Some("alice"));
        assert_eq!(snapshot.contacts[0].contact_id, "bob@svc-1");
        assert!(snapshot.contacts[0].peer_contact.is_none());
    }

    #[tokio::test]
    async fn test_mock_directory_lookup() {
        let directory = MockDirectory::new();
        assert!(directory.services_session("s1").await.is_err());

        directory.set("s1", DirectorySnapshot::default());
        assert!(directory.services_session("s1").await.is_ok());
    }
}

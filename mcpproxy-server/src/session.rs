//! In-memory session store

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

/// One MCP client session, created on `initialize`
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub client_name: String,
    pub client_version: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub total_tokens: u64,
}

impl SessionInfo {
    pub fn new(session_id: impl Into<String>, client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            client_name: client_name.into(),
            client_version: client_version.into(),
            start_time: now,
            last_activity: now,
            status: SessionStatus::Active,
            total_tokens: 0,
        }
    }
}

/// Optional write-through sink for session persistence. The proxy itself
/// keeps sessions in memory only.
pub trait SessionSink: Send + Sync {
    fn persist(&self, session: &SessionInfo);
}

/// Read-heavy concurrent map of session ID to session info
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    sink: Option<Arc<dyn SessionSink>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn SessionSink>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sink: Some(sink),
        }
    }

    pub fn set(&self, session: SessionInfo) {
        if let Some(sink) = &self.sink {
            sink.persist(&session);
        }
        self.sessions
            .write()
            .insert(session.session_id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionInfo> {
        let mut removed = self.sessions.write().remove(session_id)?;
        removed.status = SessionStatus::Closed;
        if let Some(sink) = &self.sink {
            sink.persist(&removed);
        }
        Some(removed)
    }

    /// Bump activity time and token usage
    pub fn update_stats(&self, session_id: &str, tokens: u64) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity = Utc::now();
            session.total_tokens += tokens;
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = SessionStore::new();
        store.set(SessionInfo::new("s1", "client", "1.0"));

        assert_eq!(store.count(), 1);
        assert_eq!(store.get("s1").unwrap().client_name, "client");

        let removed = store.remove("s1").unwrap();
        assert_eq!(removed.status, SessionStatus::Closed);
        assert_eq!(store.count(), 0);
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn test_update_stats_accumulates() {
        let store = SessionStore::new();
        store.set(SessionInfo::new("s1", "client", "1.0"));

        store.update_stats("s1", 100);
        store.update_stats("s1", 50);
        assert_eq!(store.get("s1").unwrap().total_tokens, 150);
    }

    #[test]
    fn test_sink_sees_writes() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);
        impl SessionSink for Recorder {
            fn persist(&self, session: &SessionInfo) {
                self.0.lock().push(session.session_id.clone());
            }
        }

        let recorder = Arc::new(Recorder::default());
        let store = SessionStore::with_sink(recorder.clone());
        store.set(SessionInfo::new("s1", "client", "1.0"));
        store.remove("s1");

        assert_eq!(recorder.0.lock().len(), 2);
    }
}

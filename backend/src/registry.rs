use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lineup_core::{GameError, Session};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::hub::BroadcastHub;

/// One live session: the state behind its own mutex (the unit of mutual
/// exclusion for join / set-condition / guess) plus its broadcast hub.
#[derive(Debug)]
pub struct SessionEntry {
    pub session: tokio::sync::Mutex<Session>,
    pub hub: BroadcastHub,
    last_activity: Mutex<Instant>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            session: tokio::sync::Mutex::new(session),
            hub: BroadcastHub::default(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }
}

/// The only process-wide shared state: code -> session. Created at startup,
/// torn down at shutdown; sessions die by explicit removal or the idle reap.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session under a fresh short code, collision-free among the
    /// sessions currently alive.
    pub async fn create(&self, formation: Vec<u32>) -> Result<Arc<SessionEntry>, GameError> {
        let mut sessions = self.sessions.write().await;
        let code = loop {
            let candidate = short_code();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let entry = Arc::new(SessionEntry::new(Session::new(code.clone(), formation)?));
        sessions.insert(code, entry.clone());
        Ok(entry)
    }

    pub async fn get(&self, code: &str) -> Option<Arc<SessionEntry>> {
        let entry = self.sessions.read().await.get(code).cloned();
        if let Some(entry) = &entry {
            entry.touch();
        }
        entry
    }

    pub async fn remove(&self, code: &str) -> bool {
        self.sessions.write().await.remove(code).is_some()
    }

    /// Drops every session idle longer than `max_idle`; returns how many.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.idle_for() <= max_idle);
        let reaped = before - sessions.len();
        if reaped > 0 {
            tracing::info!(reaped, remaining = sessions.len(), "reaped idle sessions");
        }
        reaped
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn short_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

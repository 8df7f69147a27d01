//! In-memory registry of open review sessions.

use crate::review::ReviewSession;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub type SharedSession = Arc<Mutex<ReviewSession>>;

/// Sessions keyed by id. Each session has its own lock so edits to one
/// review never wait on another.
#[derive(Debug, Clone, Default)]
pub struct ReviewStore {
    inner: Arc<RwLock<HashMap<String, SharedSession>>>,
}

impl ReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: ReviewSession) -> SharedSession {
        let id = session.id.clone();
        let shared = Arc::new(Mutex::new(session));
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), shared.clone());
        tracing::debug!("ReviewStore: opened '{}'", id);
        shared
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SharedSession> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop sessions created more than `max_age` ago, except ones with an
    /// approval in flight. Returns how many were dropped.
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, shared| {
            let session = shared.lock().unwrap_or_else(PoisonError::into_inner);
            session.created_at > cutoff || session.is_saving()
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            tracing::debug!("ReviewStore: pruned {} stale sessions", pruned);
        }
        pruned
    }
}

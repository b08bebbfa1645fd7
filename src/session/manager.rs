// src/session/manager.rs

//! Registry of live sessions

use super::{InstallSession, SessionDeps, SessionOptions};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Creates sessions over shared collaborators and keeps them by id
pub struct SessionManager {
    deps: SessionDeps,
    sessions: RwLock<HashMap<Uuid, Arc<InstallSession>>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    pub fn create(&self, options: SessionOptions) -> Arc<InstallSession> {
        let id = Uuid::new_v4();
        let session = Arc::new(InstallSession::new(id, self.deps.clone(), options));
        self.sessions.write().insert(id, Arc::clone(&session));
        debug!("SessionManager: {} live session(s)", self.len());
        session
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<InstallSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close and forget a session
    pub fn remove(&self, id: &Uuid) -> Option<Arc<InstallSession>> {
        let session = self.sessions.write().remove(id)?;
        session.close();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.read().keys().copied().collect()
    }

    /// Close every session and shut the channel pools down
    pub fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        self.deps.pools.shutdown();
        debug!("SessionManager: closed {} session(s)", drained.len());
    }
}

//! Registry of live call sessions
//!
//! Indexes sessions by local session id and tracks which one is "current".
//! Callers pass `registry.current()` into [`CallSession::on_ended`] instead
//! of consulting any global state.

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{CallMonitorError, CallMonitorResult};
use crate::session::CallSession;
use crate::types::{CallId, LocalSessionId};

/// Session storage keyed by local session id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<LocalSessionId, CallSession>,
    current: RwLock<Option<LocalSessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; fails if its local id is already taken
    pub fn insert(&self, session: CallSession) -> CallMonitorResult<()> {
        let id = session.local_session_id().clone();
        match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CallMonitorError::SessionAlreadyRegistered(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                debug!("Registered session {}", id);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &LocalSessionId) -> Option<CallSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a session without destroying it
    pub fn remove(&self, id: &LocalSessionId) -> Option<CallSession> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            let mut current = self.current.write();
            if current.as_ref() == Some(id) {
                *current = None;
            }
        }
        removed
    }

    /// Mark a registered session as the active one
    pub fn set_current(&self, id: &LocalSessionId) -> bool {
        if !self.sessions.contains_key(id) {
            return false;
        }
        *self.current.write() = Some(id.clone());
        true
    }

    pub fn current(&self) -> Option<CallSession> {
        let id = self.current.read().clone()?;
        self.get(&id)
    }

    pub fn clear_current(&self) {
        *self.current.write() = None;
    }

    /// Find the session the remote side knows as `call_id`
    pub fn find_by_call_id(&self, call_id: &CallId) -> Option<CallSession> {
        self.sessions
            .iter()
            .find(|entry| entry.value().id().as_ref() == Some(call_id))
            .map(|entry| entry.value().clone())
    }

    /// Remove and destroy a session
    pub fn destroy(&self, id: &LocalSessionId) -> bool {
        match self.remove(id) {
            Some(session) => {
                session.destroy();
                info!("Destroyed session {}", id);
                true
            }
            None => false,
        }
    }

    /// Destroy every registered session
    pub fn destroy_all(&self) {
        let ids: Vec<LocalSessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.destroy(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

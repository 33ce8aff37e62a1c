//! In-memory collection of chat sessions.
//!
//! The store is the single owner and single writer of all session and
//! message state. The pipeline only ever sees cloned snapshots; its events
//! come back through the reconciler, which re-resolves every target by id.

use crate::core::message::ChatSession;

/// Notifications for the presentation layer. The store itself renders
/// nothing; a driver reacts to these however it likes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionListChanged,
    ActiveSessionChanged,
    MessageUpdated {
        session_id: String,
        message_id: String,
    },
    TurnFinished {
        session_id: String,
    },
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Vec<ChatSession>,
    active_id: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sessions(sessions: Vec<ChatSession>) -> Self {
        Self {
            sessions,
            active_id: None,
        }
    }

    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.active_id.as_deref().and_then(|id| self.session(id))
    }

    /// Sessions in display order: most recently updated first.
    pub fn sessions_by_recency(&self) -> Vec<&ChatSession> {
        let mut ordered: Vec<&ChatSession> = self.sessions.iter().collect();
        ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        ordered
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a session bound to a persona and make it active.
    pub fn create_session(&mut self, persona_id: &str) -> String {
        let session = ChatSession::new(persona_id);
        let id = session.id.clone();
        self.sessions.push(session);
        self.active_id = Some(id.clone());
        id
    }

    /// Returns true when the active selection changed.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.session(id).is_none() || self.active_id.as_deref() == Some(id) {
            return false;
        }
        self.active_id = Some(id.to_string());
        true
    }

    /// Remove a session. Deleting the active session clears the selection.
    /// Returns false when the id is unknown.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        true
    }

    /// Apply a mutation to one session as a whole-session replacement:
    /// the session is cloned, mutated, and swapped back in, so observers
    /// holding the previous snapshot stay internally consistent. Returns
    /// false (a benign no-op) when the session no longer exists.
    pub fn update_session(&mut self, id: &str, mutate: impl FnOnce(&mut ChatSession)) -> bool {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return false;
        };
        let mut replacement = self.sessions[index].clone();
        mutate(&mut replacement);
        self.sessions[index] = replacement;
        true
    }

    /// Owned copy of every session, in insertion order, for persistence.
    pub fn snapshot(&self) -> Vec<ChatSession> {
        self.sessions.clone()
    }
}

// src/session/registry.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{History, MixSession, SessionEvent, SessionSnapshot};
use crate::config::MixConfig;
use crate::error::{MixError, Result};
use crate::planner::PlannerOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SessionHandle {
    session: MixSession,
    history: History,
}

/// Live sessions by id. Each session has its own lock, so events on
/// different sessions never wait on each other.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionHandle>>>>,
    options: PlannerOptions,
    history_depth: usize,
}

fn lock(m: &Mutex<SessionHandle>) -> MutexGuard<'_, SessionHandle> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionRegistry {
    pub fn new(options: PlannerOptions, history_depth: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            options,
            history_depth,
        }
    }

    pub fn from_config(config: &MixConfig) -> Self {
        Self::new(PlannerOptions::from_config(config), config.history_depth)
    }

    pub fn create(&self) -> SessionId {
        let id = SessionId::new();
        let handle = SessionHandle {
            session: MixSession::new(self.options.clone()),
            history: History::new(self.history_depth),
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(handle)));
        log::info!("created session {}", id);
        id
    }

    fn handle(&self, id: SessionId) -> Result<Arc<Mutex<SessionHandle>>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(MixError::UnknownSession(id.0))
    }

    /// Applies `event` to session `id`. Edits are recorded for undo. A
    /// `Close` drops the session from the registry.
    pub fn apply(&self, id: SessionId, event: SessionEvent) -> Result<SessionSnapshot> {
        let handle = self.handle(id)?;
        let closing = matches!(event, SessionEvent::Close);
        let snapshot = {
            let mut h = lock(&handle);
            let is_edit = event.is_edit();
            let next = h.session.apply(event)?;
            if is_edit {
                let before = std::mem::replace(&mut h.session, next);
                h.history.record(before);
            } else {
                h.session = next;
            }
            h.session.snapshot()
        };
        if closing {
            self.remove(id);
        }
        Ok(snapshot)
    }

    /// `None` when there is nothing to undo.
    pub fn undo(&self, id: SessionId) -> Result<Option<SessionSnapshot>> {
        let handle = self.handle(id)?;
        let mut h = lock(&handle);
        let SessionHandle { session, history } = &mut *h;
        Ok(history.undo(session).map(|previous| {
            *session = previous;
            session.snapshot()
        }))
    }

    pub fn redo(&self, id: SessionId) -> Result<Option<SessionSnapshot>> {
        let handle = self.handle(id)?;
        let mut h = lock(&handle);
        let SessionHandle { session, history } = &mut *h;
        Ok(history.redo(session).map(|next| {
            *session = next;
            session.snapshot()
        }))
    }

    pub fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot> {
        let handle = self.handle(id)?;
        let h = lock(&handle);
        Ok(h.session.snapshot())
    }

    /// Runs `f` against the current session value.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&MixSession) -> R) -> Result<R> {
        let handle = self.handle(id)?;
        let h = lock(&handle);
        Ok(f(&h.session))
    }

    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            log::info!("closed session {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

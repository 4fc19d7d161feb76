//! Session registry.
//!
//! The registry maps each display name to the session holding it. All
//! access goes through one lock, so every read sees a state that existed at
//! some instant and no two sessions ever share a name. The lock is never
//! held while delivering to a sink.

use crate::sink::{Delivery, DeliveryError, Roster, Sink};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Source of process-unique session identifiers.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one registration. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0)
    }
}

/// A registered client.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    name: Arc<str>,
    sink: Arc<dyn Sink>,
}

impl Session {
    /// The registration identity.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push a payload to this session's client.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the client cannot be reached.
    pub async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        self.sink.deliver(delivery).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another live session holds the name.
    #[error("Name already taken: {0}")]
    DuplicateName(String),

    /// The registry holds its maximum number of sessions.
    #[error("Session limit of {0} reached")]
    CapacityReached(usize),
}

#[derive(Default)]
struct Inner {
    /// Sessions in registration order.
    sessions: IndexMap<String, Session>,
    /// Bumped on every successful mutation.
    revision: u64,
}

impl Inner {
    fn roster(&self) -> Roster {
        Roster {
            revision: self.revision,
            names: self.sessions.keys().cloned().collect(),
        }
    }
}

/// Process-wide map from display name to session.
pub struct Registry {
    inner: Mutex<Inner>,
    max_sessions: usize,
}

impl Registry {
    /// Create a registry with no session limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_sessions(usize::MAX)
    }

    /// Create a registry holding at most `max_sessions` sessions.
    #[must_use]
    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_sessions,
        }
    }

    /// Register `name` with its sink.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is live, or
    /// [`RegistryError::CapacityReached`] if the registry is full. Neither
    /// mutates the registry.
    pub fn register(&self, name: &str, sink: Arc<dyn Sink>) -> Result<Session, RegistryError> {
        let mut inner = self.inner.lock();

        if inner.sessions.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        if inner.sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityReached(self.max_sessions));
        }

        let session = Session {
            id: SessionId::next(),
            name: Arc::from(name),
            sink,
        };
        inner.sessions.insert(name.to_string(), session.clone());
        inner.revision += 1;

        debug!(
            session = %session.id,
            name = %name,
            sessions = inner.sessions.len(),
            "Registered"
        );
        Ok(session)
    }

    /// Remove whichever session holds `name`.
    ///
    /// Returns the removed session, or `None` if the name was not live.
    pub fn unregister(&self, name: &str) -> Option<Session> {
        let mut inner = self.inner.lock();
        let removed = inner.sessions.shift_remove(name)?;
        inner.revision += 1;

        debug!(session = %removed.id, name = %name, "Unregistered");
        Some(removed)
    }

    /// Remove `session` only if it still holds its name.
    ///
    /// A stale handle whose name has since been taken by a newer session
    /// leaves the registry untouched.
    pub fn unregister_session(&self, session: &Session) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get(session.name()) {
            Some(current) if current.id == session.id => {}
            _ => return false,
        }

        inner.sessions.shift_remove(session.name());
        inner.revision += 1;

        debug!(session = %session.id, name = %session.name(), "Unregistered session");
        true
    }

    /// Whether `session` is still the live holder of its name.
    #[must_use]
    pub fn holds(&self, session: &Session) -> bool {
        self.inner
            .lock()
            .sessions
            .get(session.name())
            .is_some_and(|current| current.id == session.id)
    }

    /// The live session holding `name`, if any.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Session> {
        self.inner.lock().sessions.get(name).cloned()
    }

    /// Whether `name` is currently registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().sessions.contains_key(name)
    }

    /// Consistent point-in-time roster.
    #[must_use]
    pub fn snapshot(&self) -> Roster {
        self.inner.lock().roster()
    }

    /// Every live session, in registration order.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    /// Roster and the sessions it names, taken at the same instant.
    #[must_use]
    pub fn roster_with_sessions(&self) -> (Roster, Vec<Session>) {
        let inner = self.inner.lock();
        (inner.roster(), inner.sessions.values().cloned().collect())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    /// Current mutation revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

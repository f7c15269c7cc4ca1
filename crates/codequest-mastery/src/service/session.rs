//! Session guard
//!
//! Every read or write goes through [`SessionGuard::require`]. A code the
//! store does not know is cleared so the client falls back to onboarding.

use parking_lot::RwLock;
use tracing::{debug, warn};

use codequest_common::{SessionError, SessionId};

/// Holds the current learner's session code
#[derive(Debug, Default)]
pub struct SessionGuard {
    current: RwLock<Option<SessionId>>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and adopt a raw code
    ///
    /// An empty code clears any previously held one.
    pub fn establish(&self, raw: &str) -> Result<SessionId, SessionError> {
        match SessionId::parse(raw) {
            Ok(id) => {
                debug!(session = %id, "Session code accepted");
                *self.current.write() = Some(id.clone());
                Ok(id)
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    /// The current code, or `Missing`
    pub fn require(&self) -> Result<SessionId, SessionError> {
        self.current.read().clone().ok_or(SessionError::Missing)
    }

    pub fn current(&self) -> Option<SessionId> {
        self.current.read().clone()
    }

    /// Drop the code after the store could not find it
    pub fn reject(&self, id: &SessionId) -> SessionError {
        warn!(session = %id, "Session code not found, returning to onboarding");
        self.clear();
        SessionError::NotFound(id.to_string())
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

//! The session persistence seam.

use async_trait::async_trait;

use super::types::{BuildSession, SessionUpdate};
use crate::error::StoreError;

/// Keyed document store for build sessions.
///
/// Documents are addressed by `(user_id, session_id)`, mirroring the
/// `users/{userId}/build-sessions/{sessionId}` layout. Updates overwrite
/// whole fields; there is no field-level merging inside `steps`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session. Fails with [`StoreError::AlreadyExists`] if the
    /// key is taken.
    async fn create(&self, session: &BuildSession) -> Result<(), StoreError>;

    async fn get(&self, user_id: &str, session_id: &str)
        -> Result<Option<BuildSession>, StoreError>;

    /// Applies `update` and returns the stored result.
    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<BuildSession, StoreError>;

    /// All sessions of `user_id`, oldest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<BuildSession>, StoreError>;
}

/// Rejects ids that could escape their place in a path-like key.
pub fn validate_key(user_id: &str, session_id: &str) -> Result<(), StoreError> {
    for (what, id) in [("user id", user_id), ("session id", session_id)] {
        if id.is_empty()
            || id == "."
            || id == ".."
            || id.contains(['/', '\\'])
            || id.chars().any(char::is_control)
        {
            return Err(StoreError::InvalidData(format!("invalid {}: {:?}", what, id)));
        }
    }
    Ok(())
}

pub(crate) fn not_found(user_id: &str, session_id: &str) -> StoreError {
    StoreError::NotFound {
        user_id: user_id.to_string(),
        session_id: session_id.to_string(),
    }
}

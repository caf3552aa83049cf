//! In-process session store with live subscriptions.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio_stream::wrappers::WatchStream;

use super::store::{not_found, validate_key, SessionStore};
use super::types::{BuildSession, SessionUpdate};
use crate::error::StoreError;

type Key = (String, String);

/// Session store kept in memory.
///
/// Each document lives in a `watch` channel, so observers see every write as
/// it happens; slow observers only ever see the latest version.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Key, watch::Sender<BuildSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver of the session's latest state, `None` for unknown sessions.
    pub async fn subscribe(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Option<watch::Receiver<BuildSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&(user_id.to_string(), session_id.to_string()))
            .map(watch::Sender::subscribe)
    }

    /// Stream of the session's states, starting with the current one.
    pub async fn watch(&self, user_id: &str, session_id: &str) -> Option<WatchStream<BuildSession>> {
        self.subscribe(user_id, session_id).await.map(WatchStream::new)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &BuildSession) -> Result<(), StoreError> {
        validate_key(&session.user_id, &session.session_id)?;
        let key = (session.user_id.clone(), session.session_id.clone());

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                user_id: key.0,
                session_id: key.1,
            });
        }
        let (tx, _rx) = watch::channel(session.clone());
        sessions.insert(key, tx);
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<BuildSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&(user_id.to_string(), session_id.to_string()))
            .map(|tx| tx.borrow().clone()))
    }

    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<BuildSession, StoreError> {
        let sessions = self.sessions.read().await;
        let tx = sessions
            .get(&(user_id.to_string(), session_id.to_string()))
            .ok_or_else(|| not_found(user_id, session_id))?;

        tx.send_modify(|session| update.apply(session));
        let updated = tx.borrow().clone();
        Ok(updated)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<BuildSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<BuildSession> = sessions
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, tx)| tx.borrow().clone())
            .collect();
        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(found)
    }
}

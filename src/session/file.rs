//! JSON-file session store.
//!
//! Layout: `<base>/users/<userId>/build-sessions/<sessionId>.json`. Writes
//! go through a temporary file and a rename so readers never observe a
//! half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::store::{not_found, validate_key, SessionStore};
use super::types::{BuildSession, SessionUpdate};
use crate::error::StoreError;

/// Session store writing one JSON file per session.
#[derive(Debug)]
pub struct FileSessionStore {
    base_path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.base_path
            .join("users")
            .join(user_id)
            .join("build-sessions")
    }

    fn session_file(&self, user_id: &str, session_id: &str) -> PathBuf {
        self.user_dir(user_id).join(format!("{}.json", session_id))
    }

    async fn read(&self, path: &Path) -> Result<Option<BuildSession>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, session: &BuildSession) -> Result<(), StoreError> {
        let dir = self.user_dir(&session.user_id);
        fs::create_dir_all(&dir).await?;

        let path = self.session_file(&session.user_id, &session.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, session: &BuildSession) -> Result<(), StoreError> {
        validate_key(&session.user_id, &session.session_id)?;
        let _guard = self.write_lock.lock().await;

        let path = self.session_file(&session.user_id, &session.session_id);
        if fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists {
                user_id: session.user_id.clone(),
                session_id: session.session_id.clone(),
            });
        }
        self.write(session).await
    }

    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<BuildSession>, StoreError> {
        validate_key(user_id, session_id)?;
        self.read(&self.session_file(user_id, session_id)).await
    }

    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<BuildSession, StoreError> {
        validate_key(user_id, session_id)?;
        let _guard = self.write_lock.lock().await;

        let mut session = self
            .read(&self.session_file(user_id, session_id))
            .await?
            .ok_or_else(|| not_found(user_id, session_id))?;
        update.apply(&mut session);
        self.write(&session).await?;
        Ok(session)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<BuildSession>, StoreError> {
        validate_key(user_id, "listing")?;
        let dir = self.user_dir(user_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file")
                }
            }
        }
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }
}

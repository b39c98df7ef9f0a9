//! Credential stores: one namespace per session.
//!
//! [`FileCredentialStore`] keeps each session's key material in its own
//! directory under a root, `<root>/<session_id>/`.  What goes inside is up to
//! the connector.  [`MemoryCredentialStore`] keeps only the set of ids and
//! is meant for tests.
//!
//! Session ids become directory names, so they are validated first: only
//! ASCII letters, digits, `.`, `_` and `-` are allowed, and `.`/`..` are
//! rejected.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pairlink_core::SessionId;
use parking_lot::Mutex;
use tracing::debug;

use crate::application::ports::{CredentialLocation, CredentialStore, StoreError};

/// Rejects ids that are not safe to use as a single path component.
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    let well_formed = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if well_formed {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(session_id.to_string()))
    }
}

// ── File system ───────────────────────────────────────────────────────────────

/// Directory-per-session store on the local file system.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        let dir = self.session_dir(session_id)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }

    async fn ensure(&self, session_id: &str) -> Result<CredentialLocation, StoreError> {
        let dir = self.session_dir(session_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(io_error(&dir))?;
        Ok(CredentialLocation(dir))
    }

    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root)(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.root))? {
            let is_dir = entry
                .file_type()
                .await
                .map_err(io_error(&entry.path()))?
                .is_dir();
            if !is_dir {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_session_id(&name).is_ok() => ids.push(name),
                Ok(name) => debug!("credential store: ignoring directory {name:?}"),
                Err(name) => debug!("credential store: ignoring non-UTF-8 directory {name:?}"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn purge(&self, session_id: &str) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }
}

// ── In memory ─────────────────────────────────────────────────────────────────

/// Keeps the set of known ids in memory.  Nothing is written anywhere.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    ids: Mutex<BTreeSet<SessionId>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates the store, as if these sessions had been paired before.
    pub fn with_saved<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SessionId>,
    {
        Self {
            ids: Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.ids.lock().contains(session_id)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        validate_session_id(session_id)?;
        Ok(self.contains(session_id))
    }

    async fn ensure(&self, session_id: &str) -> Result<CredentialLocation, StoreError> {
        validate_session_id(session_id)?;
        self.ids.lock().insert(session_id.to_string());
        Ok(CredentialLocation(PathBuf::from(session_id)))
    }

    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        Ok(self.ids.lock().iter().cloned().collect())
    }

    async fn purge(&self, session_id: &str) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        self.ids.lock().remove(session_id);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

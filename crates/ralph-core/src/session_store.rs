use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::session::Session;
use crate::STATE_DIR;

const SESSION_FILE: &str = "session.json";
const SESSION_TMP_FILE: &str = "session.json.tmp";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// File-system-backed session persistence rooted in one working directory.
///
/// The snapshot lives at `<cwd>/.ralph-tui/session.json` and is always
/// written atomically: serialize to a sibling temp file, fsync, rename over
/// the target. A concurrent reader sees either the previous snapshot or the
/// new one, never a partial file; a crash mid-save leaves the previous
/// snapshot intact (and possibly a stale temp file, which is garbage).
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store for the given working directory.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            dir: cwd.as_ref().join(STATE_DIR),
        }
    }

    /// Path of the canonical session snapshot.
    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(SESSION_TMP_FILE)
    }

    /// Whether a persisted session exists for this working directory.
    pub fn has_persisted(&self) -> bool {
        self.session_path().exists()
    }

    /// Load the persisted session. Returns `None` when no snapshot exists.
    pub fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let session: Session = serde_json::from_str(&data)?;
        debug!(session_id = %session.session_id, path = %path.display(), "session loaded");
        Ok(Some(session))
    }

    /// Atomically persist the session snapshot.
    pub fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        fs::create_dir_all(&self.dir)?;

        let tmp = self.tmp_path();
        let mut payload = serde_json::to_string_pretty(session)?;
        payload.push('\n');

        let mut file = File::create(&tmp)?;
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, self.session_path())?;
        debug!(
            session_id = %session.session_id,
            iteration = session.current_iteration,
            "session persisted"
        );
        Ok(())
    }

    /// Delete the persisted session. Missing file is not an error.
    pub fn delete(&self) -> Result<(), SessionStoreError> {
        let path = self.session_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Remove a temp file left behind by a crash mid-save.
    pub fn clean_stale_tmp(&self) {
        let tmp = self.tmp_path();
        if tmp.exists() {
            warn!(path = %tmp.display(), "removing stale session temp file");
            let _ = fs::remove_file(&tmp);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionParams, SessionStatus};
    use crate::types::Task;

    fn make_session(cwd: PathBuf) -> Session {
        Session::create(
            SessionParams {
                agent_plugin: "claude".into(),
                tracker_plugin: "json".into(),
                model: Some("opus".into()),
                epic_id: None,
                prd_path: None,
                max_iterations: 5,
                cwd,
            },
            vec![Task::new("t1", "First"), Task::new("t2", "Second")],
        )
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let session = make_session(dir.path().to_path_buf());

        store.save(&session).expect("save");
        let loaded = store.load().expect("load").expect("some");

        assert_eq!(loaded, session);
        assert!(store.has_persisted());
    }

    #[test]
    fn load_without_snapshot_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        assert!(store.load().expect("load").is_none());
        assert!(!store.has_persisted());
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let mut session = make_session(dir.path().to_path_buf());

        store.save(&session).expect("save");
        session.set_status(SessionStatus::Interrupted);
        session.current_iteration = 3;
        store.save(&session).expect("save again");

        let loaded = store.load().expect("load").expect("some");
        assert_eq!(loaded.status, SessionStatus::Interrupted);
        assert_eq!(loaded.current_iteration, 3);
    }

    #[test]
    fn stale_tmp_does_not_shadow_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let session = make_session(dir.path().to_path_buf());
        store.save(&session).expect("save");

        // Simulate a crash between temp write and rename.
        fs::write(store.tmp_path(), b"{ partial garbage").expect("write tmp");

        let loaded = store.load().expect("load").expect("some");
        assert_eq!(loaded.session_id, session.session_id);

        store.clean_stale_tmp();
        assert!(!store.tmp_path().exists());
        assert!(store.has_persisted());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let session = make_session(dir.path().to_path_buf());

        store.save(&session).expect("save");
        store.delete().expect("delete");
        store.delete().expect("delete again");
        assert!(!store.has_persisted());
    }
}

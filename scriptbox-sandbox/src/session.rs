//! Persistent per-session key/value storage
//!
//! Layout: `<root>/<session-token>/<key-token>.json`. Values are JSON only.
//! Binary object files left under a key (`.pkl`, `.pickle`) are never read;
//! they are deleted whenever the session directory is touched.

use crate::error::{SandboxError, SandboxResult};
use crate::sanitize::{resolve_within, sanitize};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const ENTRY_EXTENSION: &str = "json";
const LEGACY_EXTENSIONS: &[&str] = &["pkl", "pickle"];

/// Directory-backed session store
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> SandboxResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capability bound to exactly one session
    pub fn handle(&self, session_id: &str) -> SandboxResult<SessionHandle> {
        let token = sanitize(session_id)?;
        let dir = resolve_within(&self.root, &self.root.join(&token))?;
        Ok(SessionHandle {
            root: self.root.clone(),
            token,
            dir,
        })
    }

    /// Serialize `value` as JSON and store it under `key`
    pub fn save<T: Serialize + ?Sized>(
        &self,
        session_id: &str,
        key: &str,
        value: &T,
    ) -> SandboxResult<()> {
        let value = serde_json::to_value(value)?;
        self.handle(session_id)?.save(key, &value)
    }

    /// Stored value for `key`, or `default` when absent
    pub fn load(&self, session_id: &str, key: &str, default: Value) -> SandboxResult<Value> {
        Ok(self.handle(session_id)?.load(key)?.unwrap_or(default))
    }

    /// Sorted key names, excluding `_`-prefixed ones
    pub fn list_keys(&self, session_id: &str) -> SandboxResult<Vec<String>> {
        self.handle(session_id)?.list_keys()
    }

    /// Remove a session and everything in it. Returns whether it existed.
    pub fn clear_session(&self, session_id: &str) -> SandboxResult<bool> {
        let handle = self.handle(session_id)?;
        if !handle.dir.is_dir() {
            return Ok(false);
        }
        let dir = resolve_within(&self.root, &handle.dir)?;
        fs::remove_dir_all(&dir)?;
        tracing::info!(session = %handle.token, "Cleared session");
        Ok(true)
    }

    /// Delete sessions whose directory has not changed for `max_age`
    pub fn cleanup_old_sessions(&self, max_age: Duration) -> SandboxResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = entry.file_type()?;
            if !meta.is_dir() || meta.is_symlink() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            let dir = match resolve_within(&self.root, &entry.path()) {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping session directory during cleanup");
                    continue;
                }
            };
            match fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(error = %e, "Failed to remove expired session"),
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Removed expired sessions");
        }
        Ok(removed)
    }
}

/// One staged write from a sandboxed script
#[derive(Debug, Deserialize)]
struct JournalEntry {
    key: String,
    value: Value,
}

/// Access to a single session's entries
#[derive(Debug, Clone)]
pub struct SessionHandle {
    root: PathBuf,
    token: String,
    dir: PathBuf,
}

impl SessionHandle {
    /// Sanitized session token
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn save(&self, key: &str, value: &Value) -> SandboxResult<()> {
        let key = sanitize(key)?;
        fs::create_dir_all(&self.dir)?;
        let target = self.entry_path(&key)?;
        let tmp = resolve_within(
            &self.root,
            &self.dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple())),
        )?;

        let bytes = serde_json::to_vec(value)?;
        if let Err(e) = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, &target)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!(session = %self.token, key = %key, bytes = bytes.len(), "Saved session entry");
        Ok(())
    }

    pub fn load(&self, key: &str) -> SandboxResult<Option<Value>> {
        let key = sanitize(key)?;
        for ext in LEGACY_EXTENSIONS {
            let legacy = self.dir.join(format!("{}.{}", key, ext));
            if legacy.exists() {
                self.remove_legacy(&legacy);
            }
        }

        let path = self.entry_path(&key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(session = %self.token, key = %key, error = %e, "Unreadable session entry");
                Ok(None)
            }
        }
    }

    pub fn list_keys(&self) -> SandboxResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entry_names()?
            .into_iter()
            .filter(|k| !k.starts_with('_'))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Every readable entry, keyed by token
    pub fn snapshot(&self) -> SandboxResult<Map<String, Value>> {
        let mut entries = Map::new();
        for key in self.entry_names()? {
            if let Some(value) = self.load(&key)? {
                entries.insert(key, value);
            }
        }
        Ok(entries)
    }

    /// Apply the complete lines of a write journal, in order.
    ///
    /// A trailing partial line (the writer was killed mid-write) is ignored,
    /// as are lines that fail to parse. Returns the number of entries saved.
    pub fn commit_journal(&self, journal: &Path) -> SandboxResult<usize> {
        let content = match fs::read_to_string(journal) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let complete = match content.rfind('\n') {
            Some(end) => &content[..end],
            None => return Ok(0),
        };

        let mut committed = 0;
        for line in complete.lines().filter(|l| !l.trim().is_empty()) {
            let entry: JournalEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(session = %self.token, error = %e, "Skipping malformed session write");
                    continue;
                }
            };
            match self.save(&entry.key, &entry.value) {
                Ok(()) => committed += 1,
                Err(e) => {
                    tracing::warn!(session = %self.token, error = %e, "Failed to commit session write")
                }
            }
        }
        Ok(committed)
    }

    fn entry_path(&self, key: &str) -> SandboxResult<PathBuf> {
        resolve_within(
            &self.root,
            &self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION)),
        )
    }

    /// Key tokens with a JSON entry on disk; legacy files are purged on the way
    fn entry_names(&self) -> SandboxResult<Vec<String>> {
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in read {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if LEGACY_EXTENSIONS.contains(&ext) {
                self.remove_legacy(&path);
                continue;
            }
            if ext != ENTRY_EXTENSION {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        Ok(names)
    }

    fn remove_legacy(&self, path: &Path) {
        let outcome = resolve_within(&self.root, path)
            .and_then(|p| fs::remove_file(p).map_err(SandboxError::from));
        match outcome {
            Ok(()) => tracing::warn!(session = %self.token, "Deleted legacy binary session file"),
            Err(e) => tracing::warn!(session = %self.token, error = %e, "Failed to delete legacy session file"),
        }
    }
}

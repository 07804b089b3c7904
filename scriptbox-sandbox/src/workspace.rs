//! Ephemeral per-execution working directories

use crate::error::SandboxResult;
use crate::execution::ExecutionId;
use crate::sanitize::resolve_within;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const SCRIPT_FILE: &str = "script.py";
pub const RUNNER_FILE: &str = "__runner__.py";
pub const CAPABILITIES_FILE: &str = "__capabilities__.py";
pub const SESSION_SNAPSHOT_FILE: &str = "__session__.json";
pub const SESSION_JOURNAL_FILE: &str = "__session_writes__.jsonl";
pub const RESULT_FILE: &str = "__result__.json";

/// A directory owned by exactly one execution; removed on drop
#[derive(Debug)]
pub struct WorkDirectory {
    path: PathBuf,
}

impl WorkDirectory {
    /// Create `<work_root>/<execution-id>`
    pub fn create(work_root: &Path, id: ExecutionId) -> SandboxResult<Self> {
        fs::create_dir_all(work_root)?;
        let root = work_root.canonicalize()?;
        let path = resolve_within(&root, &root.join(id.simple()))?;
        fs::create_dir(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o700))?;
        }

        tracing::debug!(execution_id = %id, "Created work directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> SandboxResult<()> {
        fs::write(self.file(name), contents)?;
        Ok(())
    }
}

impl Drop for WorkDirectory {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "Failed to remove work directory");
            }
        }
    }
}

/// Remove work directories older than `grace`, left behind by crashed hosts
pub fn purge_stale(work_root: &Path, grace: Duration) -> SandboxResult<usize> {
    let root = match work_root.canonicalize() {
        Ok(root) => root,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if now.duration_since(modified).unwrap_or(Duration::ZERO) < grace {
            continue;
        }
        let Ok(path) = resolve_within(&root, &entry.path()) else {
            continue;
        };
        match fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(error = %e, "Failed to purge stale work directory"),
        }
    }
    Ok(removed)
}

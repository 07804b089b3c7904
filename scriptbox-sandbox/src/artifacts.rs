//! Artifact collection: publish files a script left in the scratch directory

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::sanitize::resolve_within;
use crate::types::{FileType, GeneratedFile};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PUBLISHABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").expect("static regex"));

/// Category for a recognized file extension
pub fn classify(name: &str) -> Option<FileType> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let kind = match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => FileType::Image,
        "csv" | "tsv" | "xlsx" | "xls" | "json" | "parquet" => FileType::Data,
        "pdf" | "html" | "md" | "txt" => FileType::Report,
        "zip" => FileType::File,
        _ => return None,
    };
    Some(kind)
}

/// Whether `token` appears in the file stem bounded by delimiters, so that
/// `chart_s10.png` names `s10` but not `s1`.
fn names_session(name: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let is_delimiter = |c: char| matches!(c, '_' | '-' | '.');
    stem.match_indices(token).any(|(start, _)| {
        let before = stem[..start].chars().next_back();
        let after = stem[start + token.len()..].chars().next();
        before.map_or(true, is_delimiter) && after.map_or(true, is_delimiter)
    })
}

/// Moves a session's generated files into the public directory
#[derive(Debug, Clone)]
pub struct ArtifactCollector {
    scratch_dir: PathBuf,
    public_dir: PathBuf,
    url_prefix: String,
}

impl ArtifactCollector {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        public_dir: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            public_dir: public_dir.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> SandboxResult<Self> {
        Ok(Self::new(
            config.scratch_path()?,
            config.public_path()?,
            config.public_url_prefix.clone(),
        ))
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Publish every recognized file naming `session_token` as a whole
    /// `_`, `-` or `.` delimited segment of its stem.
    ///
    /// Per-file failures are logged and the file skipped.
    pub fn collect(&self, session_token: &str) -> Vec<GeneratedFile> {
        let entries = match fs::read_dir(&self.scratch_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, "Cannot scan scratch directory");
                }
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !names_session(&name, session_token) {
                continue;
            }
            let Some(type_tag) = classify(&name) else {
                continue;
            };
            if !PUBLISHABLE_NAME.is_match(&name) {
                tracing::warn!(session = %session_token, "Skipping artifact with unsafe file name");
                continue;
            }

            match self.publish(&entry.path(), &name) {
                Ok(()) => files.push(GeneratedFile {
                    url: format!("{}/{}", self.url_prefix.trim_end_matches('/'), name),
                    name,
                    type_tag,
                }),
                Err(e) => tracing::warn!(session = %session_token, error = %e, "Skipping artifact"),
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        if !files.is_empty() {
            tracing::info!(session = %session_token, count = files.len(), "Collected artifacts");
        }
        files
    }

    fn publish(&self, source: &Path, name: &str) -> SandboxResult<()> {
        let failed = |reason: String| SandboxError::ArtifactCollection {
            name: name.to_string(),
            reason,
        };

        fs::create_dir_all(&self.public_dir).map_err(|e| failed(e.to_string()))?;
        let public = self.public_dir.canonicalize().map_err(|e| failed(e.to_string()))?;
        let target = resolve_within(&public, &public.join(name))?;

        if fs::rename(source, &target).is_ok() {
            return Ok(());
        }
        // Different filesystems: copy, then remove the original
        fs::copy(source, &target).map_err(|e| failed(e.to_string()))?;
        fs::remove_file(source).map_err(|e| failed(e.to_string()))?;
        Ok(())
    }
}

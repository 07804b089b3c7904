//! Identifier normalization and path containment
//!
//! Session ids and keys come straight from callers and scripts. Before any of
//! them is used as a path component it is reduced to `[A-Za-z0-9_-]{1,64}`;
//! anything that does not fit after stripping traversal material is replaced
//! by a hash of the original input. The sandbox preamble mirrors this
//! algorithm byte for byte, so both sides agree on file names.

use crate::error::{SandboxError, SandboxResult};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// Maximum length of a sanitized token.
pub const MAX_TOKEN_LEN: usize = 64;

/// Length of the hashed fallback token (hex characters).
pub const HASHED_TOKEN_LEN: usize = 32;

static SAFE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"));

/// Normalize a raw identifier into a filesystem-safe token.
pub fn sanitize(raw: &str) -> SandboxResult<String> {
    if raw.is_empty() {
        return Err(SandboxError::Identifier("identifier is empty".to_string()));
    }

    let cleaned = raw
        .replace('\0', "")
        .replace("..", "")
        .replace(['/', '\\'], "");

    if SAFE_TOKEN.is_match(&cleaned) {
        return Ok(cleaned);
    }

    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    Ok(digest[..HASHED_TOKEN_LEN].to_string())
}

/// Whether `token` already satisfies the safe charset.
pub fn is_safe_token(token: &str) -> bool {
    SAFE_TOKEN.is_match(token)
}

/// Resolve `candidate` and verify it stays under `base`.
///
/// `base` must already be canonical. The candidate may not exist yet; in that
/// case its parent is resolved instead and the file name re-attached.
pub fn resolve_within(base: &Path, candidate: &Path) -> SandboxResult<PathBuf> {
    let resolved = if candidate.exists() {
        candidate.canonicalize()?
    } else {
        let parent = candidate
            .parent()
            .ok_or_else(|| escape_error(candidate))?;
        let name = candidate.file_name().ok_or_else(|| escape_error(candidate))?;
        let parent = if parent.exists() {
            parent.canonicalize()?
        } else {
            lexical_normalize(parent)
        };
        parent.join(name)
    };

    if resolved.starts_with(base) && resolved != base {
        Ok(resolved)
    } else {
        Err(escape_error(candidate))
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn escape_error(path: &Path) -> SandboxError {
    // Only the final component is reported; the host layout stays private.
    let shown = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    SandboxError::PathEscape(shown)
}

//! Core types for sandbox execution

use crate::execution::ExecutionId;
use serde::{Deserialize, Serialize};

/// Request to execute a script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The script source
    pub code: String,

    /// Caller-chosen session identity (sanitized before use)
    pub session_id: String,

    /// Wall-clock budget in seconds (None = configured default)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Address-space ceiling in MiB (None = configured default)
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,

    /// Maximum characters of output returned (None = configured default)
    #[serde(default)]
    pub max_output_chars: Option<usize>,
}

impl ExecutionRequest {
    /// Create a request using the configured default limits
    pub fn new(code: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            session_id: session_id.into(),
            timeout_seconds: None,
            memory_limit_mb: None,
            max_output_chars: None,
        }
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    /// Set memory limit in MiB
    pub fn with_memory_limit(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Set the output size limit in characters
    pub fn with_max_output_chars(mut self, chars: usize) -> Self {
        self.max_output_chars = Some(chars);
        self
    }
}

/// Static analysis outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_safe: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// A report rejecting the script for a single reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            violations: vec![reason.into()],
            warnings: Vec::new(),
        }
    }
}

/// Category of a failed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by static analysis, nothing ran
    Validation,
    /// Killed after exceeding the wall-clock budget
    Timeout,
    /// The script raised or exited non-zero
    Runtime,
    /// The child died without writing its result record
    ResultProtocol,
    /// The sandbox itself failed (work directory, spawn, ...)
    Internal,
}

/// Artifact category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Data,
    Report,
    File,
}

/// A file produced by a script and published for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: FileType,
}

/// Normalized result of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,

    pub success: bool,

    /// Captured standard output, never longer than the requested limit
    pub output: String,

    /// Whether `output` was cut short
    #[serde(default)]
    pub output_truncated: bool,

    pub error: Option<String>,

    pub error_kind: Option<ErrorKind>,

    /// Status passed to an explicit exit, if the script called one
    pub exit_code: Option<i32>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default)]
    pub files: Vec<GeneratedFile>,

    /// Wall-clock duration in milliseconds
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// A failed result with nothing captured
    pub fn failure(execution_id: ExecutionId, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            execution_id,
            success: false,
            output: String::new(),
            output_truncated: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            exit_code: None,
            warnings: Vec::new(),
            files: Vec::new(),
            execution_time_ms: 0,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }
}

/// Cut `text` to at most `max_chars` characters.
///
/// Idempotent: truncating an already-truncated string is a no-op.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

//! Process-based runtime: one interpreter process per execution

use super::{RunOutcome, RunStatus, Runtime, SandboxJob};
use crate::config::SandboxConfig;
use crate::environment::{build_environment, EnvMode};
use crate::error::{SandboxError, SandboxResult};
use crate::execution::ExecutionPhase;
#[cfg(unix)]
use crate::limits::{apply_rlimits, RlimitCeilings};
use crate::types::{truncate_chars, ErrorKind};
use crate::workspace::{
    WorkDirectory, CAPABILITIES_FILE, RESULT_FILE, RUNNER_FILE, SCRIPT_FILE,
    SESSION_JOURNAL_FILE, SESSION_SNAPSHOT_FILE,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

const PREAMBLE: &str = include_str!("preamble.py");

/// Session helpers, executed by the preamble in a namespace without modules
const CAPABILITIES: &str = include_str!("capabilities.py");

/// Longest error message returned to callers
pub const MAX_ERROR_CHARS: usize = 2000;

/// How long to wait for pipes to close after the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// The record the preamble writes to `__result__.json`
#[derive(Debug, Deserialize)]
struct ResultRecord {
    status: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    output_truncated: bool,
    #[serde(default)]
    error: Option<String>,
    /// Any integer the script passed to `SystemExit`
    #[serde(default)]
    exit_code: Option<i64>,
}

/// Process-based runtime - runs each script in a fresh interpreter
pub struct ProcessRuntime {
    python_bin: String,
    work_root: PathBuf,
    scratch_dir: PathBuf,
    env_mode: EnvMode,
    env_allow: Vec<String>,
    redactor: Redactor,
}

impl ProcessRuntime {
    pub fn from_config(config: &SandboxConfig) -> SandboxResult<Self> {
        let work_root = config.work_path()?;
        let scratch_dir = config.scratch_path()?;
        std::fs::create_dir_all(&work_root)?;
        std::fs::create_dir_all(&scratch_dir)?;

        let redactor = Redactor::default()
            .with(&work_root, "<work>")
            .with(&scratch_dir, "<outputs>")
            .with(&config.sessions_path()?, "<sessions>")
            .with(&config.base_path()?, "<base>");

        Ok(Self {
            python_bin: config.python_bin.clone(),
            work_root,
            scratch_dir,
            env_mode: config.environment.mode,
            env_allow: config.environment.allow.clone(),
            redactor,
        })
    }

    fn command(&self, job: &SandboxJob, work: &WorkDirectory) -> Command {
        let env = build_environment(std::env::vars(), self.env_mode, &self.env_allow, work.path());

        let mut command = Command::new(&self.python_bin);
        command
            .args(["-B", "-E", "-s", "-u", "-X", "utf8", RUNNER_FILE])
            .arg(job.session.token())
            .arg(&self.scratch_dir)
            .arg(job.limits.max_output_chars.to_string())
            .current_dir(work.path())
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let ceilings = RlimitCeilings::from(&job.limits);
            command.process_group(0);
            // SAFETY: the hook runs between fork and exec and only calls setrlimit.
            unsafe {
                command.pre_exec(move || {
                    apply_rlimits(&ceilings);
                    Ok(())
                });
            }
        }

        command
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn run(&self, job: SandboxJob) -> SandboxResult<RunOutcome> {
        let work = WorkDirectory::create(&self.work_root, job.id)?;
        let redactor = self.redactor.clone().with(work.path(), "<workdir>");

        let snapshot = job.session.snapshot()?;
        work.write(SCRIPT_FILE, &job.code)?;
        work.write(RUNNER_FILE, PREAMBLE)?;
        work.write(CAPABILITIES_FILE, CAPABILITIES)?;
        work.write(SESSION_SNAPSHOT_FILE, serde_json::to_vec(&snapshot)?)?;

        let limits = job.limits.clone();
        tracing::info!(
            execution_id = %job.id,
            session = %job.session.token(),
            timeout_secs = limits.timeout.as_secs(),
            memory_mb = limits.memory_limit_mb,
            "Spawning sandbox process"
        );

        let mut child = self.command(&job, &work).spawn().map_err(|e| {
            SandboxError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start interpreter '{}': {}", self.python_bin, e),
            ))
        })?;
        let mut group = ProcessGroupGuard::new(child.id());
        job.phases.advance(ExecutionPhase::Running).await;

        let capture_bytes = limits
            .max_output_chars
            .saturating_mul(4)
            .saturating_add(4096);
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(drain(s, capture_bytes)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(drain(s, capture_bytes)));

        let (timed_out, exit_status) = match tokio::time::timeout(limits.timeout, child.wait()).await {
            Ok(Ok(status)) => (false, Some(status)),
            Ok(Err(e)) => {
                tracing::warn!(execution_id = %job.id, error = %e, "Failed to await sandbox process");
                (false, None)
            }
            Err(_) => {
                tracing::warn!(execution_id = %job.id, "Sandbox process exceeded its deadline, killing");
                group.kill();
                let _ = child.kill().await;
                (true, None)
            }
        };
        // Sweep anything the script left running in its group
        group.kill();

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;

        let session_writes = job
            .session
            .commit_journal(&work.file(SESSION_JOURNAL_FILE))
            .unwrap_or_else(|e| {
                tracing::warn!(execution_id = %job.id, error = %e, "Failed to commit session writes");
                0
            });

        let outcome = if timed_out {
            let (output, output_truncated) =
                truncate_chars(&String::from_utf8_lossy(&stdout), limits.max_output_chars);
            RunOutcome {
                status: RunStatus::TimedOut,
                success: false,
                output,
                output_truncated,
                error: Some(SandboxError::Timeout(limits.timeout.as_secs()).to_string()),
                error_kind: Some(ErrorKind::Timeout),
                exit_code: None,
                session_writes,
            }
        } else {
            match read_record(&work.file(RESULT_FILE)) {
                Some(record) => outcome_from_record(record, limits.max_output_chars, &redactor, session_writes),
                None => crashed_outcome(
                    exit_status,
                    &stdout,
                    &stderr,
                    limits.max_output_chars,
                    &redactor,
                    session_writes,
                ),
            }
        };

        let phase = match outcome.status {
            RunStatus::Completed => ExecutionPhase::Completed,
            RunStatus::TimedOut => ExecutionPhase::TimedOut,
            RunStatus::Crashed => ExecutionPhase::Crashed,
        };
        job.phases.advance(phase).await;

        tracing::info!(
            execution_id = %job.id,
            status = ?outcome.status,
            success = outcome.success,
            exit_code = ?outcome.exit_code,
            session_writes,
            "Sandbox process finished"
        );

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "process"
    }
}

fn read_record(path: &Path) -> Option<ResultRecord> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable result record");
            None
        }
    }
}

fn outcome_from_record(
    record: ResultRecord,
    max_output_chars: usize,
    redactor: &Redactor,
    session_writes: usize,
) -> RunOutcome {
    let exit_code = record
        .exit_code
        .map(|code| code.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32);
    let success = match record.status.as_str() {
        "ok" => true,
        "exit" => exit_code.unwrap_or(0) == 0,
        _ => false,
    };

    let error = if success {
        None
    } else {
        let message = record
            .error
            .unwrap_or_else(|| format!("script failed with status '{}'", record.status));
        Some(truncate_chars(&redactor.redact(&message), MAX_ERROR_CHARS).0)
    };

    let (output, cut) = truncate_chars(&record.output, max_output_chars);
    RunOutcome {
        status: RunStatus::Completed,
        success,
        output,
        output_truncated: record.output_truncated || cut,
        error,
        error_kind: (!success).then_some(ErrorKind::Runtime),
        exit_code,
        session_writes,
    }
}

fn crashed_outcome(
    exit_status: Option<ExitStatus>,
    stdout: &[u8],
    stderr: &[u8],
    max_output_chars: usize,
    redactor: &Redactor,
    session_writes: usize,
) -> RunOutcome {
    let mut detail = match exit_status {
        Some(status) => describe_exit(status),
        None => "process could not be awaited".to_string(),
    };
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        detail.push_str(": ");
        detail.push_str(tail_chars(stderr, 500));
    }
    let message = SandboxError::ResultProtocol(detail).to_string();

    let (output, output_truncated) =
        truncate_chars(&String::from_utf8_lossy(stdout), max_output_chars);
    RunOutcome {
        status: RunStatus::Crashed,
        success: false,
        output,
        output_truncated,
        error: Some(truncate_chars(&redactor.redact(&message), MAX_ERROR_CHARS).0),
        error_kind: Some(ErrorKind::ResultProtocol),
        exit_code: exit_status.and_then(|s| s.code()),
        session_writes,
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    "terminated abnormally".to_string()
}

fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Read a pipe to the end, keeping at most `limit` bytes
async fn drain<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    kept
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(bytes)) => bytes,
        _ => Vec::new(),
    }
}

/// Kills the child's whole process group when dropped
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0),
        }
    }

    fn kill(&mut self) {
        let pgid = self.pgid.take();
        #[cfg(unix)]
        {
            if let Some(pgid) = pgid {
                // SAFETY: killpg has no memory-safety preconditions.
                unsafe {
                    libc::killpg(pgid, libc::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Replaces host directory paths in user-visible messages with placeholders
#[derive(Debug, Clone, Default)]
struct Redactor {
    replacements: Vec<(String, &'static str)>,
}

impl Redactor {
    fn with(mut self, path: &Path, placeholder: &'static str) -> Self {
        let mut forms = vec![path.to_string_lossy().into_owned()];
        if let Ok(canonical) = path.canonicalize() {
            forms.push(canonical.to_string_lossy().into_owned());
        }
        for form in forms {
            if form.len() > 1 && !self.replacements.iter().any(|(p, _)| *p == form) {
                self.replacements.push((form, placeholder));
            }
        }
        // Longest first, so nested directories win over their parents
        self.replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    fn redact(&self, text: &str) -> String {
        self.replacements
            .iter()
            .fold(text.to_string(), |acc, (path, placeholder)| acc.replace(path.as_str(), placeholder))
    }
}

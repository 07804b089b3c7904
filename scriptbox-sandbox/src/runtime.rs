//! Runtime trait and implementations

mod process;

use crate::error::SandboxResult;
use crate::execution::{ExecutionId, PhaseReporter};
use crate::limits::ResourceLimits;
use crate::session::SessionHandle;
use crate::types::ErrorKind;
use async_trait::async_trait;

pub use process::ProcessRuntime;

/// Everything a runtime needs to run one validated script
#[derive(Debug, Clone)]
pub struct SandboxJob {
    pub id: ExecutionId,
    pub code: String,
    /// The only session the script can reach
    pub session: SessionHandle,
    pub limits: ResourceLimits,
    pub phases: PhaseReporter,
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Exited on its own and left a result record
    Completed,
    /// Killed at the wall-clock deadline
    TimedOut,
    /// Exited without a readable result record
    Crashed,
}

/// Result of running one job
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub success: bool,
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub exit_code: Option<i32>,
    /// Session writes committed after the run
    pub session_writes: usize,
}

/// Runtime abstraction for executing validated scripts
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Run the job to completion.
    ///
    /// `Err` means the sandbox could not be set up or the interpreter could
    /// not be started; anything the script does is reported in the outcome.
    async fn run(&self, job: SandboxJob) -> SandboxResult<RunOutcome>;

    /// Get runtime name
    fn name(&self) -> &str;
}

//! Executor - main entry point

use crate::artifacts::ArtifactCollector;
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::execution::{
    ExecutionId, ExecutionPhase, ExecutionRegistry, ExecutionState, PhaseReporter,
};
use crate::runtime::{ProcessRuntime, Runtime, SandboxJob};
use crate::session::SessionStore;
use crate::types::{ErrorKind, ExecutionRequest, ExecutionResult, ValidationReport};
use crate::validator::Validator;
use crate::workspace::purge_stale;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Validates, runs and collects results for untrusted scripts
pub struct Executor {
    config: SandboxConfig,
    validator: Validator,
    sessions: SessionStore,
    artifacts: ArtifactCollector,
    runtime: Arc<dyn Runtime>,
    /// In-flight executions
    registry: ExecutionRegistry,
}

impl Executor {
    /// Create an executor that runs scripts in local interpreter processes
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        config.check()?;
        let runtime = ProcessRuntime::from_config(&config)?;
        Self::with_runtime(config, runtime)
    }

    /// Create an executor with a custom runtime implementation
    pub fn with_runtime(config: SandboxConfig, runtime: impl Runtime + 'static) -> SandboxResult<Self> {
        let sessions = SessionStore::open(config.sessions_path()?)?;
        let artifacts = ArtifactCollector::from_config(&config)?;
        Ok(Self {
            validator: Validator::from_config(&config),
            sessions,
            artifacts,
            runtime: Arc::new(runtime),
            registry: ExecutionRegistry::new(),
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Direct access to the session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Get the runtime name
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Run static analysis only
    pub async fn validate(&self, code: &str) -> ValidationReport {
        self.validator.validate(code).await
    }

    /// List all in-flight executions
    pub async fn list_executions(&self) -> Vec<ExecutionState> {
        self.registry.list().await
    }

    /// Validate and run a script.
    ///
    /// Only a malformed session id is returned as `Err`; every other failure
    /// is described by the returned result.
    pub async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        let session = self.sessions.handle(&request.session_id)?;
        let id = ExecutionId::new();
        let start = Instant::now();
        let _registration = self.registry.register(id, session.token()).await;

        tracing::info!(
            execution_id = %id,
            session = %session.token(),
            runtime = self.runtime.name(),
            code_len = request.code.len(),
            "Executing script"
        );

        self.registry.advance(id, ExecutionPhase::Validating).await;
        let report = self.validator.validate(&request.code).await;
        if !report.is_safe {
            self.registry.advance(id, ExecutionPhase::Rejected).await;
            tracing::warn!(
                execution_id = %id,
                violations = ?report.violations,
                "Script rejected by validation"
            );
            let mut result = ExecutionResult::failure(
                id,
                ErrorKind::Validation,
                SandboxError::Validation(report.violations).to_string(),
            );
            result.warnings = report.warnings;
            result.execution_time_ms = start.elapsed().as_millis() as u64;
            return Ok(result);
        }

        self.registry.advance(id, ExecutionPhase::Spawning).await;
        let limits = self.config.resolve_limits(&request);
        let max_output_chars = limits.max_output_chars;
        let job = SandboxJob {
            id,
            code: request.code,
            session: session.clone(),
            limits,
            phases: PhaseReporter::new(id, self.registry.clone()),
        };

        let outcome = match self.runtime.run(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(execution_id = %id, error = %e, "Sandbox failure");
                self.registry.advance(id, ExecutionPhase::Crashed).await;
                self.registry.advance(id, ExecutionPhase::ResultCollected).await;
                let mut result =
                    ExecutionResult::failure(id, ErrorKind::Internal, format!("Sandbox failure: {}", e));
                result.warnings = report.warnings;
                result.execution_time_ms = start.elapsed().as_millis() as u64;
                return Ok(result);
            }
        };

        let files = if outcome.success {
            self.artifacts.collect(session.token())
        } else {
            Vec::new()
        };
        self.registry.advance(id, ExecutionPhase::ResultCollected).await;

        let mut warnings = report.warnings;
        if outcome.output_truncated {
            warnings.push(format!("Output truncated to {} characters", max_output_chars));
        }

        let result = ExecutionResult {
            execution_id: id,
            success: outcome.success,
            output: outcome.output,
            output_truncated: outcome.output_truncated,
            error: outcome.error,
            error_kind: outcome.error_kind,
            exit_code: outcome.exit_code,
            warnings,
            files,
            execution_time_ms: start.elapsed().as_millis() as u64,
        };

        tracing::info!(
            execution_id = %id,
            success = result.success,
            error_kind = ?result.error_kind,
            duration_ms = result.execution_time_ms,
            files = result.files.len(),
            "Execution finished"
        );
        Ok(result)
    }

    /// Purge orphaned work directories past the grace period and sessions
    /// idle for `max_age_hours`. Returns how many directories were removed.
    pub async fn cleanup(&self, max_age_hours: u64) -> SandboxResult<usize> {
        let grace = Duration::from_secs(self.config.work_dir_grace_secs);
        let work = purge_stale(&self.config.work_path()?, grace)?;
        let sessions = self
            .sessions
            .cleanup_old_sessions(Duration::from_secs(max_age_hours.saturating_mul(3600)))?;

        tracing::info!(work_dirs = work, sessions, "Cleanup finished");
        Ok(work + sessions)
    }
}

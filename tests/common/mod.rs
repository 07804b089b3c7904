//! Common test utilities shared across integration and E2E tests

use async_trait::async_trait;
use scriptbox_sandbox::{
    Executor, RunOutcome, Runtime, SandboxConfig, SandboxError, SandboxJob, SandboxResult,
    SecurityLevel,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Whether a `python3` interpreter can be started
pub fn python_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    })
}

/// Return early from a test when no interpreter is installed
#[macro_export]
macro_rules! require_python {
    () => {
        if !$crate::common::python_available() {
            eprintln!("skipping: python3 not available");
            return;
        }
    };
}

/// An executor rooted in its own temporary directory
pub struct TestSandbox {
    pub dir: tempfile::TempDir,
    pub executor: Executor,
}

impl TestSandbox {
    pub fn new() -> Self {
        Self::with_level(SecurityLevel::Moderate)
    }

    pub fn with_level(level: SecurityLevel) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = SandboxConfig::with_base_dir(dir.path());
        config.security_level = level;
        let executor = Executor::new(config).expect("Failed to create executor");
        Self { dir, executor }
    }

    pub fn config(&self) -> SandboxConfig {
        self.executor.config().clone()
    }
}

/// Runtime that records calls and never starts a process
#[derive(Default, Clone)]
pub struct CountingRuntime {
    pub calls: Arc<AtomicUsize>,
}

impl CountingRuntime {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runtime for CountingRuntime {
    async fn run(&self, _job: SandboxJob) -> SandboxResult<RunOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SandboxError::Config("counting runtime does not execute".to_string()))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

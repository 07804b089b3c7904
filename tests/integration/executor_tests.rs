//! Executor orchestration with a fake runtime

use crate::common::{setup_test_logging, CountingRuntime};
use crate::require_python;
use scriptbox_sandbox::{
    ErrorKind, ExecutionRequest, Executor, SandboxConfig, SandboxError, SecurityLevel,
};

fn executor_with(level: SecurityLevel) -> (tempfile::TempDir, Executor, CountingRuntime) {
    setup_test_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = SandboxConfig::with_base_dir(dir.path());
    config.security_level = level;
    let runtime = CountingRuntime::default();
    let executor =
        Executor::with_runtime(config, runtime.clone()).expect("Failed to create executor");
    (dir, executor, runtime)
}

#[tokio::test]
async fn test_rejected_script_never_reaches_runtime() {
    require_python!();
    let (_dir, executor, runtime) = executor_with(SecurityLevel::Moderate);

    let result = executor
        .execute(ExecutionRequest::new("import os\nos.system('ls')", "s1"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    let error = result.error.unwrap();
    assert!(error.starts_with("Security validation failed"), "{}", error);
    assert!(error.contains("'os'"), "{}", error);
    assert!(result.output.is_empty());
    assert_eq!(runtime.count(), 0);
}

#[tokio::test]
async fn test_runtime_failure_is_reported_not_raised() {
    require_python!();
    let (_dir, executor, runtime) = executor_with(SecurityLevel::Moderate);

    let result = executor
        .execute(ExecutionRequest::new("print(1 + 1)", "s1"))
        .await
        .unwrap();

    assert_eq!(runtime.count(), 1);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Internal));
    assert!(result.error.unwrap().starts_with("Sandbox failure"));
    assert!(result.files.is_empty());
    assert!(executor.list_executions().await.is_empty());
}

#[tokio::test]
async fn test_warnings_survive_into_the_result() {
    require_python!();
    let (_dir, executor, _runtime) = executor_with(SecurityLevel::Moderate);

    let code = "with open('x.txt', 'w') as fh:\n    fh.write('1')\n";
    let result = executor.execute(ExecutionRequest::new(code, "s1")).await.unwrap();

    assert_eq!(result.error_kind, Some(ErrorKind::Internal));
    assert!(result.warnings.iter().any(|w| w.contains("'open'")), "{:?}", result.warnings);
}

#[tokio::test]
async fn test_invalid_session_id_is_an_error() {
    let (_dir, executor, runtime) = executor_with(SecurityLevel::Moderate);

    let err = executor
        .execute(ExecutionRequest::new("print(1)", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Identifier(_)));
    assert_eq!(runtime.count(), 0);
}

#[tokio::test]
async fn test_oversized_script_is_rejected_without_parsing() {
    let (_dir, executor, runtime) = executor_with(SecurityLevel::Moderate);
    let limit = executor.config().limits.max_code_chars;

    let code = "#".repeat(limit + 1);
    let result = executor.execute(ExecutionRequest::new(code, "s1")).await.unwrap();

    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(result.error.unwrap().contains("maximum length"));
    assert_eq!(runtime.count(), 0);
}

#[test]
fn test_runtime_name_is_exposed() {
    let (_dir, executor, _runtime) = executor_with(SecurityLevel::Strict);
    assert_eq!(executor.runtime_name(), "counting");
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SandboxConfig::with_base_dir(dir.path());
    config.limits.default_timeout_secs = config.limits.max_timeout_secs + 1;

    let err = Executor::new(config).err().expect("config should be rejected");
    assert!(matches!(err, SandboxError::Config(_)));
}

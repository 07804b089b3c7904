//! Timeout and output limits

use crate::common::{setup_test_logging, TestSandbox};
use crate::require_python;
use scriptbox_sandbox::{ErrorKind, ExecutionRequest};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_infinite_loop_times_out() {
    require_python!();
    setup_test_logging();
    let sandbox = TestSandbox::new();

    let started = Instant::now();
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("while True: pass", "s1").with_timeout(2))
        .await
        .unwrap();
    let elapsed = started.elapsed().as_millis();

    assert!(!result.success);
    assert!(result.timed_out());
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.error.unwrap().contains("timed out"));
    assert!(elapsed >= 2000, "returned after {} ms", elapsed);
    assert!(elapsed < 8000, "returned after {} ms", elapsed);
}

#[tokio::test]
async fn test_output_printed_before_timeout_is_returned() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "print('started', flush=True)\nwhile True: pass\n";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1").with_timeout(1))
        .await
        .unwrap();

    assert!(result.timed_out());
    assert!(result.output.contains("started"), "{:?}", result.output);
}

#[tokio::test]
async fn test_session_writes_before_timeout_are_committed() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "save_session('step', 1)\nwhile True: pass\n";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1").with_timeout(1))
        .await
        .unwrap();

    assert!(result.timed_out());
    let stored = sandbox
        .executor
        .sessions()
        .load("s1", "step", serde_json::Value::Null)
        .unwrap();
    assert_eq!(stored, serde_json::json!(1));
}

#[tokio::test]
async fn test_large_output_is_truncated_with_warning() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "for i in range(5000):\n    print('line', i)\n";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1").with_max_output_chars(1000))
        .await
        .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.output_truncated);
    assert!(result.output.chars().count() <= 1000);
    assert!(result.output.starts_with("line 0"));
    assert!(result
        .warnings
        .iter()
        .any(|w| w == "Output truncated to 1000 characters"));
}

#[tokio::test]
async fn test_small_output_is_not_truncated() {
    require_python!();
    let sandbox = TestSandbox::new();

    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("print('x' * 10)", "s1").with_max_output_chars(1000))
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.output_truncated);
    assert!(result.warnings.is_empty());
    assert_eq!(result.output.trim_end(), "x".repeat(10));
}

#[tokio::test]
async fn test_dropping_execution_kills_child_and_removes_work_dir() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "\
import time
path = OUTPUT_DIR + '/marker_' + SESSION_ID + '.log'
while True:
    with open(path, 'a') as fh:
        fh.write('x')
    time.sleep(0.05)
";
    let request = ExecutionRequest::new(code, "cancelled").with_timeout(30);
    let dropped = tokio::time::timeout(Duration::from_secs(2), sandbox.executor.execute(request)).await;
    assert!(dropped.is_err(), "execution should still be running");

    let marker = sandbox
        .config()
        .scratch_path()
        .unwrap()
        .join("marker_cancelled.log");
    tokio::time::sleep(Duration::from_millis(300)).await;
    let size = std::fs::metadata(&marker).map(|m| m.len()).unwrap_or(0);
    assert!(size > 0, "script never started writing");
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(std::fs::metadata(&marker).unwrap().len(), size);

    let work = sandbox.config().work_path().unwrap();
    let leftovers = std::fs::read_dir(&work).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(sandbox.executor.list_executions().await.is_empty());
}

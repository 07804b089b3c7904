//! End-to-end executions through a real interpreter

use crate::common::{setup_test_logging, TestSandbox};
use crate::require_python;
use scriptbox_sandbox::{
    ErrorKind, ExecutionId, ExecutionRequest, FileType, PhaseReporter, ProcessRuntime,
    ResourceLimits, Runtime, SandboxJob, SecurityLevel,
};

#[tokio::test]
async fn test_simple_print() {
    require_python!();
    setup_test_logging();
    let sandbox = TestSandbox::new();

    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("print(1+1)", "s1").with_timeout(10))
        .await
        .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.output.contains('2'));
    assert!(result.error.is_none());
    assert!(result.error_kind.is_none());
    assert!(!result.output_truncated);
}

#[tokio::test]
async fn test_forbidden_module_is_named() {
    require_python!();
    let sandbox = TestSandbox::new();

    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("import os\nos.system('ls')", "s1"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(result.error.unwrap().contains("'os'"));
}

#[tokio::test]
async fn test_forbidden_callable_is_named() {
    require_python!();
    let sandbox = TestSandbox::new();

    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("eval('1+1')", "s1"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(result.error.unwrap().contains("'eval'"));
}

#[tokio::test]
async fn test_session_helpers_do_not_expose_modules() {
    require_python!();
    let sandbox = TestSandbox::with_level(SecurityLevel::Relaxed);

    let code = "\
import operator
g = operator.attrgetter('__globals__')
m = g(save_session)['os']
print(m.popen('echo escaped').read())
";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert!(result.error.unwrap().contains("'attrgetter'"));
    assert!(!result.output.contains("escaped"));

    // Skip validation and inspect what the helpers can reach
    let runtime = ProcessRuntime::from_config(&sandbox.config()).unwrap();
    let id = ExecutionId::new();
    let code = "\
modules = set()
for helper in (save_session, load_session):
    for name, value in helper.__globals__.items():
        if name != '__builtins__' and type(value).__name__ == 'module':
            modules.add(name)
print('modules:', sorted(modules))
";
    let outcome = runtime
        .run(SandboxJob {
            id,
            code: code.to_string(),
            session: sandbox.executor.sessions().handle("s1").unwrap(),
            limits: ResourceLimits::default(),
            phases: PhaseReporter::detached(id),
        })
        .await
        .unwrap();
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert!(outcome.output.contains("modules: []"), "{}", outcome.output);
}

#[tokio::test]
async fn test_runtime_error_carries_type_and_line() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "values = [1, 2]\nprint(values[5])\n";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Runtime));
    let error = result.error.unwrap();
    assert!(error.starts_with("IndexError"), "{}", error);
    assert!(error.ends_with("(line 2)"), "{}", error);
}

#[tokio::test]
async fn test_output_before_failure_is_kept() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "print('partial')\nraise ValueError('boom')\n";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.output.contains("partial"));
    assert!(result.error.unwrap().contains("ValueError: boom"));
}

#[tokio::test]
async fn test_exit_status_policy() {
    require_python!();
    let sandbox = TestSandbox::new();

    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("print('bye')\nraise SystemExit(3)", "s1"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.error.as_deref(), Some("script exited with status 3"));
    assert!(result.output.contains("bye"));

    let result = sandbox
        .executor
        .execute(ExecutionRequest::new("raise SystemExit(0)", "s1"))
        .await
        .unwrap();
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_error_messages_do_not_leak_host_paths() {
    require_python!();
    let sandbox = TestSandbox::with_level(SecurityLevel::Relaxed);

    let code = "open(OUTPUT_DIR + '/missing/x.csv')\n";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "s1"))
        .await
        .unwrap();

    assert!(!result.success);
    let error = result.error.unwrap();
    let base = sandbox.dir.path().to_string_lossy().into_owned();
    assert!(!error.contains(&base), "{}", error);
    assert!(error.contains("FileNotFoundError"), "{}", error);
}

#[tokio::test]
async fn test_generated_files_are_published() {
    require_python!();
    let sandbox = TestSandbox::new();

    let code = "\
path = OUTPUT_DIR + '/report_' + SESSION_ID + '.txt'
with open(path, 'w') as fh:
    fh.write('quarterly numbers')
with open(OUTPUT_DIR + '/unrelated.txt', 'w') as fh:
    fh.write('not mine')
print('done')
";
    let result = sandbox
        .executor
        .execute(ExecutionRequest::new(code, "analyst"))
        .await
        .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.files.len(), 1, "{:?}", result.files);
    let file = &result.files[0];
    assert_eq!(file.name, "report_analyst.txt");
    assert_eq!(file.type_tag, FileType::Report);
    assert!(file.url.ends_with("/report_analyst.txt"));

    let config = sandbox.config();
    assert!(config.public_path().unwrap().join("report_analyst.txt").exists());
    assert!(!config.scratch_path().unwrap().join("report_analyst.txt").exists());
    assert!(config.scratch_path().unwrap().join("unrelated.txt").exists());
}

#[tokio::test]
async fn test_work_directories_are_removed() {
    require_python!();
    let sandbox = TestSandbox::new();

    for code in ["print('ok')", "raise RuntimeError('x')"] {
        sandbox
            .executor
            .execute(ExecutionRequest::new(code, "s1"))
            .await
            .unwrap();
    }

    let work = sandbox.config().work_path().unwrap();
    let leftovers = std::fs::read_dir(&work).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(sandbox.executor.list_executions().await.is_empty());
}

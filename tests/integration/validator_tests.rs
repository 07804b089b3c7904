//! Static analysis against the real interpreter parser

use crate::common::setup_test_logging;
use crate::require_python;
use scriptbox_sandbox::{SandboxConfig, SecurityLevel, ValidationReport, Validator};

async fn validate_at(level: SecurityLevel, code: &str) -> ValidationReport {
    setup_test_logging();
    let mut config = SandboxConfig::default();
    config.security_level = level;
    Validator::from_config(&config).validate(code).await
}

async fn validate(code: &str) -> ValidationReport {
    validate_at(SecurityLevel::Moderate, code).await
}

fn mentions(report: &ValidationReport, needle: &str) -> bool {
    report.violations.iter().any(|v| v.contains(needle))
}

#[tokio::test]
async fn test_plain_analysis_script_is_safe() {
    require_python!();
    let code = "import json\nimport math\n\nvalues = [math.sqrt(x) for x in range(10)]\nprint(json.dumps({'total': sum(values)}))\n";
    let report = validate(code).await;
    assert!(report.is_safe, "unexpected violations: {:?}", report.violations);
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_forbidden_module_imports() {
    require_python!();
    for code in [
        "import os",
        "import os.path",
        "from subprocess import run",
        "import socket as s",
        "import ctypes",
        "import pickle",
    ] {
        let report = validate(code).await;
        assert!(!report.is_safe, "{} should be rejected", code);
        assert!(
            mentions(&report, "Import of forbidden module"),
            "{}: {:?}",
            code,
            report.violations
        );
    }
}

#[tokio::test]
async fn test_import_nested_in_function_is_found() {
    require_python!();
    let code = "def helper():\n    if True:\n        import subprocess\n    return 1\n";
    let report = validate(code).await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "'subprocess' (line 3)"), "{:?}", report.violations);
}

#[tokio::test]
async fn test_restricted_network_module_points_to_http_client() {
    require_python!();
    let report = validate("import urllib.request\nurllib.request.urlopen('http://x')").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "use 'requests'"), "{:?}", report.violations);

    let report = validate("import requests\nprint(1)").await;
    assert!(report.is_safe, "{:?}", report.violations);
}

#[tokio::test]
async fn test_dangerous_callables() {
    require_python!();
    let report = validate("eval('1+1')").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "'eval'"), "{:?}", report.violations);

    let report = validate("f = getattr\nf(object, 'x')").await;
    assert!(mentions(&report, "'getattr'"), "{:?}", report.violations);

    let report = validate("from builtins import exec").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "'exec'"), "{:?}", report.violations);
}

#[tokio::test]
async fn test_dunder_attribute_access() {
    require_python!();
    let report = validate("x = ().__class__.__bases__[0].__subclasses__()").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "dunder attribute '__class__'"), "{:?}", report.violations);

    let report = validate("if __name__ == '__main__':\n    print(1)\n").await;
    assert!(report.is_safe, "{:?}", report.violations);
}

#[tokio::test]
async fn test_reflection_helpers_cannot_reach_globals() {
    require_python!();
    let code = "\
import operator
g = operator.attrgetter('__globals__')
m = g(save_session)['os']
print(m.popen('echo escaped').read())
";
    let report = validate_at(SecurityLevel::Relaxed, code).await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "forbidden function 'attrgetter' (line 2)"), "{:?}", report.violations);
    assert!(mentions(&report, "dunder attribute '__globals__' (line 2)"), "{:?}", report.violations);

    let report = validate("from operator import methodcaller as mc\nmc('__reduce__')(1)\n").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "'methodcaller'"), "{:?}", report.violations);
}

#[tokio::test]
async fn test_syntax_error_reports_line() {
    require_python!();
    let report = validate("x = 1\nprint(x\n").await;
    assert!(!report.is_safe);
    assert!(
        report.violations.iter().any(|v| v.starts_with("Syntax error")),
        "{:?}",
        report.violations
    );
}

#[tokio::test]
async fn test_hex_escaped_literal() {
    require_python!();
    let report = validate("s = '\\x6f\\x73'\nprint(s)").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "Hex-escaped string literal (line 1)"), "{:?}", report.violations);

    let report = validate("s = r'\\x6f'\nt = '\\\\x6f'\nprint(s, t)").await;
    assert!(report.is_safe, "{:?}", report.violations);
}

#[tokio::test]
async fn test_fstring_contents_are_walked() {
    require_python!();
    let report = validate("x = 1\nprint(f\"{eval('x')}\")").await;
    assert!(!report.is_safe);
    assert!(mentions(&report, "'eval'"), "{:?}", report.violations);
}

#[tokio::test]
async fn test_file_operations_by_level() {
    require_python!();
    let code = "with open('data.csv') as fh:\n    print(fh.read())\n";

    let strict = validate_at(SecurityLevel::Strict, code).await;
    assert!(!strict.is_safe);
    assert!(mentions(&strict, "File operation 'open' is not allowed (line 1)"));

    let moderate = validate_at(SecurityLevel::Moderate, code).await;
    assert!(moderate.is_safe);
    assert!(moderate.warnings.iter().any(|w| w.contains("'open'")));

    let relaxed = validate_at(SecurityLevel::Relaxed, code).await;
    assert!(relaxed.is_safe);
    assert!(relaxed.warnings.is_empty());
}

#[tokio::test]
async fn test_aliased_open_is_rejected_when_strict() {
    require_python!();
    let code = "f = open\nprint(f('/etc/hostname').read())\n";

    let strict = validate_at(SecurityLevel::Strict, code).await;
    assert!(!strict.is_safe);
    assert!(mentions(&strict, "File operation 'open' is not allowed (line 1)"), "{:?}", strict.violations);

    let moderate = validate_at(SecurityLevel::Moderate, code).await;
    assert!(moderate.is_safe);
    assert!(moderate.warnings.iter().any(|w| w.contains("'open'")));
}

#[tokio::test]
async fn test_long_line_only_rejected_when_strict() {
    require_python!();
    let code = format!("x = '{}'\n", "a".repeat(600));

    let strict = validate_at(SecurityLevel::Strict, &code).await;
    assert!(!strict.is_safe);
    assert!(mentions(&strict, "Line exceeds 500 characters (line 1)"));

    let moderate = validate_at(SecurityLevel::Moderate, &code).await;
    assert!(moderate.is_safe);
    assert!(moderate.warnings.iter().any(|w| w.contains("Line exceeds")));
}

#[tokio::test]
async fn test_lambda_with_map_is_a_warning() {
    require_python!();
    let report = validate("print(list(map(lambda v: v * 2, [1, 2])))").await;
    assert!(report.is_safe, "{:?}", report.violations);
    assert!(report.warnings.iter().any(|w| w.starts_with("Lambda combined with")));
}

#[tokio::test]
async fn test_repeated_findings_are_reported_once_per_line() {
    require_python!();
    let report = validate("x = eval('1') + eval('2')\ny = eval('3')").await;
    let evals = report.violations.iter().filter(|v| v.contains("'eval'")).count();
    assert_eq!(evals, 2, "{:?}", report.violations);
}

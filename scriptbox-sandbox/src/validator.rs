//! Static security validation
//!
//! The script is parsed by the interpreter's own `ast` module in a short-lived
//! analysis process that only serializes the tree; every node of that tree is
//! then walked here. No part of the script is evaluated during analysis, and
//! any failure to obtain a tree rejects the script.

use crate::config::SandboxConfig;
use crate::policy::{
    dunder_in_attribute_path, is_allowed_dunder_name, is_dunder, ModuleClass, ModulePolicy,
    SecurityLevel, Verdict, HIGHER_ORDER_CALLS,
};
use crate::types::{truncate_chars, ValidationReport};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const AST_DUMPER: &str = include_str!("validator/ast_dump.py");

/// Source lines longer than this look like packed or generated payloads
pub const MAX_LINE_CHARS: usize = 500;

static HEX_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\\])(?:\\\\)*\\x[0-9A-Fa-f]{2}").expect("static regex")
});

/// A string literal token as written in the source
#[derive(Debug, Clone, Deserialize)]
pub struct StringLiteral {
    pub line: u64,
    pub raw: String,
    #[serde(default)]
    pub is_raw: bool,
}

#[derive(Debug, Deserialize)]
struct SyntaxErrorInfo {
    msg: String,
    lineno: Option<u64>,
}

/// What the analysis process prints
#[derive(Debug, Deserialize)]
struct SyntaxDump {
    #[serde(default)]
    tree: Option<Value>,
    #[serde(default)]
    strings: Vec<StringLiteral>,
    #[serde(default)]
    syntax_error: Option<SyntaxErrorInfo>,
    #[serde(default)]
    analysis_error: Option<String>,
}

/// Static analyzer for untrusted scripts
#[derive(Debug, Clone)]
pub struct Validator {
    level: SecurityLevel,
    policy: ModulePolicy,
    python_bin: String,
    analysis_timeout: Duration,
    max_code_chars: usize,
}

impl Validator {
    pub fn new(level: SecurityLevel, policy: ModulePolicy) -> Self {
        Self {
            level,
            policy,
            python_bin: "python3".to_string(),
            analysis_timeout: Duration::from_secs(10),
            max_code_chars: 100_000,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            level: config.security_level,
            policy: ModulePolicy::new(&config.allowed_http_client, &config.extra_forbidden_modules),
            python_bin: config.python_bin.clone(),
            analysis_timeout: config.analysis_timeout(),
            max_code_chars: config.limits.max_code_chars,
        }
    }

    pub fn with_python(mut self, python_bin: impl Into<String>) -> Self {
        self.python_bin = python_bin.into();
        self
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Parse and analyze `code`
    pub async fn validate(&self, code: &str) -> ValidationReport {
        if code.chars().count() > self.max_code_chars {
            return ValidationReport::rejected(format!(
                "Script exceeds the maximum length of {} characters",
                self.max_code_chars
            ));
        }

        let dump = match self.parse(code).await {
            Ok(dump) => dump,
            Err(reason) => {
                tracing::warn!(reason = %reason, "Static analysis failed, rejecting script");
                return ValidationReport::rejected(format!("Static analysis unavailable: {}", reason));
            }
        };

        if let Some(err) = dump.syntax_error {
            return ValidationReport::rejected(format!("Syntax error: {}{}", err.msg, at(err.lineno)));
        }
        if let Some(err) = dump.analysis_error {
            return ValidationReport::rejected(format!("Static analysis unavailable: {}", err));
        }
        match dump.tree {
            Some(tree) => self.analyze_tree(&tree, &dump.strings, code),
            None => ValidationReport::rejected("Static analysis unavailable: no syntax tree"),
        }
    }

    async fn parse(&self, code: &str) -> Result<SyntaxDump, String> {
        let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into());
        let mut child = Command::new(&self.python_bin)
            .args(["-I", "-B", "-c", AST_DUMPER])
            .env_clear()
            .env("PATH", path)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("cannot start '{}': {}", self.python_bin, e))?;

        let mut stdin = child.stdin.take().ok_or("analysis process has no stdin")?;
        let input = code.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.analysis_timeout, child.wait_with_output())
            .await
            .map_err(|_| "analysis timed out".to_string())?
            .map_err(|e| format!("analysis process failed: {}", e))?;
        let _ = writer.await;

        match serde_json::from_slice::<SyntaxDump>(&output.stdout) {
            Ok(dump) => Ok(dump),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let (stderr, _) = truncate_chars(stderr.trim(), 300);
                Err(format!("unreadable analysis output ({}): {}", e, stderr))
            }
        }
    }

    /// Walk a serialized syntax tree. Pure; performs no I/O.
    pub fn analyze_tree(
        &self,
        tree: &Value,
        literals: &[StringLiteral],
        source: &str,
    ) -> ValidationReport {
        let mut findings = Findings::default();
        let fs_verdict = self.level.filesystem_verdict();
        let mut lambda_line: Option<Option<u64>> = None;
        let mut saw_higher_order = false;

        let mut stack: Vec<(&Value, Option<u64>)> = vec![(tree, None)];
        while let Some((value, inherited_line)) = stack.pop() {
            let node = match value {
                Value::Array(items) => {
                    stack.extend(items.iter().rev().map(|item| (item, inherited_line)));
                    continue;
                }
                Value::Object(node) => node,
                _ => continue,
            };

            let line = node.get("lineno").and_then(Value::as_u64).or(inherited_line);
            let kind = node.get("_type").and_then(Value::as_str).unwrap_or_default();
            let mut skip_field: Option<&str> = None;

            match kind {
                "Import" => {
                    for alias in array_field(node, "names") {
                        if let Some(name) = alias.get("name").and_then(Value::as_str) {
                            self.check_module(name, line, &mut findings);
                        }
                    }
                }
                "ImportFrom" => {
                    let level = node.get("level").and_then(Value::as_u64).unwrap_or(0);
                    if level == 0 {
                        if let Some(module) = node.get("module").and_then(Value::as_str) {
                            self.check_module(module, line, &mut findings);
                        }
                    }
                    for alias in array_field(node, "names") {
                        if let Some(name) = alias.get("name").and_then(Value::as_str) {
                            if self.policy.is_dangerous_callable(name) {
                                findings.violation(format!(
                                    "Import of forbidden function '{}'{}",
                                    name,
                                    at(line)
                                ));
                            }
                        }
                    }
                }
                "Call" => {
                    let func = node.get("func");
                    match func.and_then(callee) {
                        Some(Callee::Name(name)) if self.policy.is_dangerous_callable(name) => {
                            findings.violation(format!(
                                "Call to forbidden function '{}'{}",
                                name,
                                at(line)
                            ));
                            skip_field = Some("func");
                        }
                        Some(Callee::Name(name)) => {
                            if HIGHER_ORDER_CALLS.contains(&name) {
                                saw_higher_order = true;
                            }
                        }
                        Some(Callee::Attribute(attr)) => {
                            if HIGHER_ORDER_CALLS.contains(&attr) {
                                saw_higher_order = true;
                            }
                        }
                        None => {}
                    }
                }
                "Name" => {
                    if let Some(id) = node.get("id").and_then(Value::as_str) {
                        if self.policy.is_dangerous_callable(id) {
                            findings.violation(format!(
                                "Reference to forbidden function '{}'{}",
                                id,
                                at(line)
                            ));
                        } else if is_dunder(id) && !is_allowed_dunder_name(id) {
                            findings.violation(format!("Access to dunder name '{}'{}", id, at(line)));
                        } else if id == "open" {
                            // Called or aliased
                            findings.filesystem(fs_verdict, "File operation 'open'", line);
                        }
                    }
                }
                "Attribute" => {
                    if let Some(attr) = node.get("attr").and_then(Value::as_str) {
                        if is_dunder(attr) {
                            findings.violation(format!(
                                "Access to dunder attribute '{}'{}",
                                attr,
                                at(line)
                            ));
                        } else if self.policy.is_reflective_attribute(attr) {
                            findings.violation(format!(
                                "Reference to forbidden function '{}'{}",
                                attr,
                                at(line)
                            ));
                        } else if self.policy.is_file_method(attr) {
                            findings.filesystem(
                                fs_verdict,
                                &format!("File operation '{}'", attr),
                                line,
                            );
                        }
                    }
                }
                "Constant" => {
                    if let Some(dunder) = node
                        .get("value")
                        .and_then(Value::as_str)
                        .and_then(dunder_in_attribute_path)
                    {
                        findings.violation(format!(
                            "String naming dunder attribute '{}'{}",
                            dunder,
                            at(line)
                        ));
                    }
                }
                "Lambda" => {
                    lambda_line.get_or_insert(line);
                }
                _ => {}
            }

            for (field, child) in node.iter() {
                if field == "_type" || Some(field.as_str()) == skip_field {
                    continue;
                }
                if child.is_object() || child.is_array() {
                    stack.push((child, line));
                }
            }
        }

        if let (Some(line), true) = (lambda_line, saw_higher_order) {
            findings.warning(format!("Lambda combined with map/filter/reduce{}", at(line)));
        }

        for literal in literals.iter().filter(|l| !l.is_raw) {
            if HEX_ESCAPE.is_match(&literal.raw) {
                findings.violation(format!("Hex-escaped string literal{}", at(Some(literal.line))));
            }
        }

        let long_line_verdict = self.level.long_line_verdict();
        for (idx, text) in source.lines().enumerate() {
            if text.chars().count() > MAX_LINE_CHARS {
                let message = format!(
                    "Line exceeds {} characters{}",
                    MAX_LINE_CHARS,
                    at(Some(idx as u64 + 1))
                );
                match long_line_verdict {
                    Verdict::Deny => findings.violation(message),
                    Verdict::Warn => findings.warning(message),
                    Verdict::Allow => {}
                }
            }
        }

        findings.into_report()
    }

    fn check_module(&self, module: &str, line: Option<u64>, findings: &mut Findings) {
        match self.policy.classify(module) {
            ModuleClass::Forbidden => {
                findings.violation(format!("Import of forbidden module '{}'{}", module, at(line)))
            }
            ModuleClass::Restricted => findings.violation(format!(
                "Import of restricted network module '{}'{}; use '{}' for HTTP requests",
                module,
                at(line),
                self.policy.allowed_http_client()
            )),
            ModuleClass::Filesystem => findings.filesystem(
                self.level.filesystem_verdict(),
                &format!("Filesystem module '{}'", module),
                line,
            ),
            ModuleClass::Permitted => {}
        }
    }
}

enum Callee<'a> {
    Name(&'a str),
    Attribute(&'a str),
}

fn callee(func: &Value) -> Option<Callee<'_>> {
    match func.get("_type")?.as_str()? {
        "Name" => func.get("id")?.as_str().map(Callee::Name),
        "Attribute" => func.get("attr")?.as_str().map(Callee::Attribute),
        _ => None,
    }
}

fn array_field<'a>(
    node: &'a serde_json::Map<String, Value>,
    field: &str,
) -> impl Iterator<Item = &'a Value> {
    node.get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn at(line: Option<u64>) -> String {
    match line {
        Some(line) => format!(" (line {})", line),
        None => String::new(),
    }
}

#[derive(Default)]
struct Findings {
    violations: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn violation(&mut self, message: String) {
        if !self.violations.contains(&message) {
            self.violations.push(message);
        }
    }

    fn warning(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn filesystem(&mut self, verdict: Verdict, subject: &str, line: Option<u64>) {
        match verdict {
            Verdict::Deny => self.violation(format!("{} is not allowed{}", subject, at(line))),
            Verdict::Warn => self.warning(format!("{}{}", subject, at(line))),
            Verdict::Allow => {}
        }
    }

    fn into_report(self) -> ValidationReport {
        ValidationReport {
            is_safe: self.violations.is_empty(),
            violations: self.violations,
            warnings: self.warnings,
        }
    }
}

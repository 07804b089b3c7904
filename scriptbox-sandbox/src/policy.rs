//! Security policy: levels and module/callable lists used by the validator

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How permissive the sandbox is about filesystem access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Filesystem operations are violations
    Strict,
    /// Filesystem operations are reported as warnings
    #[default]
    Moderate,
    /// Filesystem operations are allowed silently
    Relaxed,
}

impl std::str::FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(SecurityLevel::Strict),
            "moderate" => Ok(SecurityLevel::Moderate),
            "relaxed" => Ok(SecurityLevel::Relaxed),
            other => Err(format!("unknown security level: {}", other)),
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SecurityLevel::Strict => "strict",
            SecurityLevel::Moderate => "moderate",
            SecurityLevel::Relaxed => "relaxed",
        };
        f.write_str(name)
    }
}

/// Outcome of a filesystem check at a given level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deny,
    Warn,
    Allow,
}

impl SecurityLevel {
    pub fn filesystem_verdict(self) -> Verdict {
        match self {
            SecurityLevel::Strict => Verdict::Deny,
            SecurityLevel::Moderate => Verdict::Warn,
            SecurityLevel::Relaxed => Verdict::Allow,
        }
    }

    /// Long single lines are rejected only at the strictest level
    pub fn long_line_verdict(self) -> Verdict {
        match self {
            SecurityLevel::Strict => Verdict::Deny,
            _ => Verdict::Warn,
        }
    }
}

/// Process/OS control, raw sockets, native loading, spawning, interpreter
/// internals and every object-serialization format that can run code on load.
const FORBIDDEN_MODULES: &[&str] = &[
    // process / OS control
    "os", "sys", "subprocess", "signal", "pty", "posix", "nt", "resource", "fcntl",
    "termios", "pwd", "grp", "platform", "sysconfig", "atexit",
    // raw sockets
    "socket", "socketserver", "ssl", "select", "selectors", "asyncore", "asynchat",
    // native/dynamic loading
    "ctypes", "cffi", "importlib", "imp", "pkgutil", "runpy", "zipimport",
    // thread/process spawning
    "threading", "_thread", "multiprocessing", "concurrent",
    // interpreter internals
    "builtins", "__builtin__", "gc", "inspect", "code", "codeop", "pdb", "trace",
    "traceback", "mmap",
    // binary object serialization
    "pickle", "_pickle", "cPickle", "pickletools", "marshal", "shelve", "dill",
    "cloudpickle", "joblib", "copyreg",
];

/// Network transports other than the permitted HTTP client.
const RESTRICTED_MODULES: &[&str] = &[
    "urllib", "urllib2", "urllib3", "http", "httplib", "httpx", "aiohttp", "ftplib",
    "smtplib", "poplib", "imaplib", "telnetlib", "nntplib", "xmlrpc", "websocket",
    "websockets", "pycurl", "paramiko", "requests_toolbelt",
];

/// Modules whose whole purpose is filesystem manipulation.
const FILESYSTEM_MODULES: &[&str] = &["shutil", "pathlib", "tempfile", "glob", "fileinput"];

/// Builtins that evaluate code, reflect on objects, expose scopes or read input.
const DANGEROUS_CALLABLES: &[&str] = &[
    "eval", "exec", "compile", "__import__", "getattr", "setattr", "delattr", "hasattr",
    "globals", "locals", "vars", "input", "raw_input", "breakpoint", "memoryview",
    "attrgetter", "methodcaller",
];

/// Attribute lookups by string, flagged however they are reached
const REFLECTIVE_ATTRIBUTES: &[&str] = &["attrgetter", "methodcaller"];

/// Method names that open, read, write or remove files.
const FILE_METHODS: &[&str] = &[
    "open", "write_text", "write_bytes", "read_text", "read_bytes", "unlink", "rmdir",
    "mkdir", "touch", "symlink_to", "hardlink_to", "chmod",
];

/// Higher-order builtins that, paired with lambdas, hint at obfuscation
pub const HIGHER_ORDER_CALLS: &[&str] = &["map", "filter", "reduce"];

/// Dunder names that ordinary scripts need
const ALLOWED_DUNDER_NAMES: &[&str] = &["__name__"];

/// Dunder strings that ordinary scripts compare against
const ALLOWED_DUNDER_STRINGS: &[&str] = &["__name__", "__main__"];

/// Module and callable lists consulted by the validator
#[derive(Debug, Clone)]
pub struct ModulePolicy {
    forbidden: HashSet<String>,
    restricted: HashSet<String>,
    filesystem: HashSet<String>,
    dangerous_callables: HashSet<String>,
    file_methods: HashSet<String>,
    allowed_http_client: String,
}

/// How an import of a given top-level module is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleClass {
    Forbidden,
    Restricted,
    Filesystem,
    Permitted,
}

impl Default for ModulePolicy {
    fn default() -> Self {
        Self::new("requests", &[])
    }
}

impl ModulePolicy {
    /// Build the policy with the given permitted HTTP client and extra
    /// operator-forbidden modules.
    pub fn new(allowed_http_client: &str, extra_forbidden: &[String]) -> Self {
        let to_set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<HashSet<_>>();

        let mut forbidden = to_set(FORBIDDEN_MODULES);
        forbidden.extend(extra_forbidden.iter().cloned());

        let mut restricted = to_set(RESTRICTED_MODULES);
        restricted.remove(allowed_http_client);

        Self {
            forbidden,
            restricted,
            filesystem: to_set(FILESYSTEM_MODULES),
            dangerous_callables: to_set(DANGEROUS_CALLABLES),
            file_methods: to_set(FILE_METHODS),
            allowed_http_client: allowed_http_client.to_string(),
        }
    }

    /// Classify a dotted module path by its top-level package
    pub fn classify(&self, module: &str) -> ModuleClass {
        let root = module.split('.').next().unwrap_or(module);
        if self.forbidden.contains(root) {
            ModuleClass::Forbidden
        } else if self.restricted.contains(root) {
            ModuleClass::Restricted
        } else if self.filesystem.contains(root) {
            ModuleClass::Filesystem
        } else {
            ModuleClass::Permitted
        }
    }

    pub fn is_dangerous_callable(&self, name: &str) -> bool {
        self.dangerous_callables.contains(name)
    }

    /// `operator.attrgetter` style helpers that fetch attributes by string
    pub fn is_reflective_attribute(&self, name: &str) -> bool {
        REFLECTIVE_ATTRIBUTES.contains(&name)
    }

    pub fn is_file_method(&self, name: &str) -> bool {
        self.file_methods.contains(name)
    }

    pub fn allowed_http_client(&self) -> &str {
        &self.allowed_http_client
    }
}

/// `__x__` style names
pub fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

pub fn is_allowed_dunder_name(name: &str) -> bool {
    ALLOWED_DUNDER_NAMES.contains(&name)
}

/// The first dunder segment of a string that reads as an attribute path,
/// such as `"__globals__"` or `"f.__code__.co_consts"`.
///
/// Free text (docstrings, messages) never matches.
pub fn dunder_in_attribute_path(text: &str) -> Option<&str> {
    let text = text.trim();
    let is_identifier = |segment: &str| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
    };
    if text.is_empty() || !text.split('.').all(is_identifier) {
        return None;
    }
    text.split('.')
        .find(|segment| is_dunder(segment) && !ALLOWED_DUNDER_STRINGS.contains(segment))
}

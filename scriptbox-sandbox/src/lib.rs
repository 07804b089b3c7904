//! Scriptbox Sandbox - validated execution of untrusted analysis scripts
//!
//! Scripts are statically analyzed before anything runs, then executed in a
//! throwaway interpreter process with resource ceilings, a scrubbed
//! environment and access to exactly one persistent session.

mod artifacts;
mod config;
mod environment;
mod error;
mod execution;
mod limits;
mod policy;
mod runtime;
mod sanitize;
mod service;
mod session;
mod types;
mod validator;
mod workspace;

pub use artifacts::{classify, ArtifactCollector};
pub use config::{EnvironmentConfig, LimitsConfig, SandboxConfig};
pub use environment::{build_environment, is_sensitive, EnvMode};
pub use error::{SandboxError, SandboxResult};
pub use execution::{
    ExecutionId, ExecutionPhase, ExecutionRegistry, ExecutionState, PhaseReporter,
    RegistrationGuard,
};
pub use limits::ResourceLimits;
pub use policy::{ModuleClass, ModulePolicy, SecurityLevel, Verdict};
pub use runtime::{ProcessRuntime, RunOutcome, RunStatus, Runtime, SandboxJob};
pub use sanitize::{is_safe_token, resolve_within, sanitize};
pub use service::Executor;
pub use session::{SessionHandle, SessionStore};
pub use types::{
    truncate_chars, ErrorKind, ExecutionRequest, ExecutionResult, FileType, GeneratedFile,
    ValidationReport,
};
pub use validator::{StringLiteral, Validator};
pub use workspace::{purge_stale, WorkDirectory};

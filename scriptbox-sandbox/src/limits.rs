//! Resource limits configuration for sandboxed execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits applied to one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock budget before the process group is killed
    pub timeout: Duration,

    /// Address-space ceiling in MiB
    pub memory_limit_mb: u64,

    /// Maximum characters of captured output returned to the caller
    pub max_output_chars: usize,

    /// CPU-seconds ceiling (best effort, wall clock is the real backstop)
    pub cpu_seconds: u64,

    /// Open file descriptor ceiling
    pub max_open_files: u64,

    /// Largest file the script may write, in bytes
    pub max_file_size_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(30), 1024, 10_000)
    }
}

impl ResourceLimits {
    /// Derive the secondary ceilings from the three caller-facing limits
    pub fn with_timeout(timeout: Duration, memory_limit_mb: u64, max_output_chars: usize) -> Self {
        Self {
            timeout,
            memory_limit_mb,
            max_output_chars,
            cpu_seconds: timeout.as_secs().saturating_add(5),
            max_open_files: 256,
            max_file_size_bytes: 64 * 1024 * 1024,
        }
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// Apply best-effort `setrlimit` ceilings in the current process.
///
/// Runs between fork and exec, so it only calls async-signal-safe functions
/// and ignores failures: some platforms reject `RLIMIT_AS` outright. Process
/// and thread counts are left alone.
#[cfg(unix)]
pub(crate) fn apply_rlimits(ceilings: &RlimitCeilings) {
    set_rlimit(libc::RLIMIT_CPU, ceilings.cpu_seconds);
    set_rlimit(libc::RLIMIT_AS, ceilings.address_space_bytes);
    set_rlimit(libc::RLIMIT_NOFILE, ceilings.open_files);
    set_rlimit(libc::RLIMIT_FSIZE, ceilings.file_size_bytes);
    set_rlimit(libc::RLIMIT_CORE, 0);
}

/// Plain-value copy of the limits, safe to move into a `pre_exec` closure
#[derive(Debug, Clone, Copy)]
pub(crate) struct RlimitCeilings {
    pub cpu_seconds: u64,
    pub address_space_bytes: u64,
    pub open_files: u64,
    pub file_size_bytes: u64,
}

impl From<&ResourceLimits> for RlimitCeilings {
    fn from(limits: &ResourceLimits) -> Self {
        Self {
            cpu_seconds: limits.cpu_seconds,
            address_space_bytes: limits.memory_limit_bytes(),
            open_files: limits.max_open_files,
            file_size_bytes: limits.max_file_size_bytes,
        }
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type Resource = libc::c_int;

#[cfg(unix)]
fn set_rlimit(resource: Resource, limit: u64) {
    let rlim = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: limit as libc::rlim_t,
    };
    // SAFETY: rlim is a valid, initialized struct and resource is a libc constant.
    unsafe {
        libc::setrlimit(resource, &rlim);
    }
}

//! Configuration management for the script sandbox

use crate::environment::EnvMode;
use crate::error::{SandboxError, SandboxResult};
use crate::limits::ResourceLimits;
use crate::policy::SecurityLevel;
use crate::types::ExecutionRequest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// How filesystem access is treated by the validator
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Interpreter used both for analysis and execution
    #[serde(default = "SandboxConfig::default_python_bin")]
    pub python_bin: String,
    /// Root holding `sessions/` and `work/`
    #[serde(default = "SandboxConfig::default_base_dir")]
    pub base_dir: String,
    /// Where scripts drop generated files (defaults to `<base>/outputs`)
    #[serde(default)]
    pub scratch_dir: Option<String>,
    /// Where collected artifacts are served from (defaults to `<base>/public`)
    #[serde(default)]
    pub public_dir: Option<String>,
    /// URL prefix artifacts are published under
    #[serde(default = "SandboxConfig::default_public_url_prefix")]
    pub public_url_prefix: String,
    /// The one HTTP client scripts may import
    #[serde(default = "SandboxConfig::default_http_client")]
    pub allowed_http_client: String,
    /// Modules forbidden on top of the built-in list
    #[serde(default)]
    pub extra_forbidden_modules: Vec<String>,
    /// Orphaned work directories younger than this are left alone by cleanup
    #[serde(default = "SandboxConfig::default_work_dir_grace")]
    pub work_dir_grace_secs: u64,
    /// Budget for the syntax-tree analysis process
    #[serde(default = "SandboxConfig::default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

/// Default and maximum execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "LimitsConfig::max_timeout")]
    pub max_timeout_secs: u64,
    #[serde(default = "LimitsConfig::default_memory")]
    pub default_memory_limit_mb: u64,
    #[serde(default = "LimitsConfig::max_memory")]
    pub max_memory_limit_mb: u64,
    #[serde(default = "LimitsConfig::default_output")]
    pub default_max_output_chars: usize,
    #[serde(default = "LimitsConfig::max_output")]
    pub max_output_chars_ceiling: usize,
    /// Scripts longer than this are rejected unread
    #[serde(default = "LimitsConfig::max_code")]
    pub max_code_chars: usize,
    #[serde(default = "LimitsConfig::max_file_size")]
    pub max_file_size_mb: u64,
    #[serde(default = "LimitsConfig::max_open_files")]
    pub max_open_files: u64,
}

/// Child environment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub mode: EnvMode,
    /// Extra variable names copied through in allow-list mode
    #[serde(default)]
    pub allow: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::default(),
            python_bin: Self::default_python_bin(),
            base_dir: Self::default_base_dir(),
            scratch_dir: None,
            public_dir: None,
            public_url_prefix: Self::default_public_url_prefix(),
            allowed_http_client: Self::default_http_client(),
            extra_forbidden_modules: Vec::new(),
            work_dir_grace_secs: Self::default_work_dir_grace(),
            analysis_timeout_secs: Self::default_analysis_timeout(),
            limits: LimitsConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: Self::default_timeout(),
            max_timeout_secs: Self::max_timeout(),
            default_memory_limit_mb: Self::default_memory(),
            max_memory_limit_mb: Self::max_memory(),
            default_max_output_chars: Self::default_output(),
            max_output_chars_ceiling: Self::max_output(),
            max_code_chars: Self::max_code(),
            max_file_size_mb: Self::max_file_size(),
            max_open_files: Self::max_open_files(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mode: EnvMode::AllowList,
            allow: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Build a configuration rooted at `base`, everything else default
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    /// Load configuration from the default location, creating it if absent
    pub fn load() -> SandboxResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::from_file(&config_path)
    }

    /// Load configuration from an explicit TOML file
    pub fn from_file(path: &Path) -> SandboxResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SandboxError::Config(format!("Failed to read config: {}", e)))?;

        let config: SandboxConfig = toml::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config: {}", e)))?;

        config.check()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> SandboxResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SandboxError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SandboxError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> SandboxResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SandboxError::Config("Cannot determine home directory".to_string()))?;

        Ok(home.join(".config").join("scriptbox").join("config.toml"))
    }

    /// Reject configurations that cannot work
    pub fn check(&self) -> SandboxResult<()> {
        let limits = &self.limits;
        if limits.default_timeout_secs == 0 || limits.max_timeout_secs == 0 {
            return Err(SandboxError::Config("timeouts must be positive".to_string()));
        }
        if limits.default_timeout_secs > limits.max_timeout_secs {
            return Err(SandboxError::Config(
                "default_timeout_secs exceeds max_timeout_secs".to_string(),
            ));
        }
        if limits.default_max_output_chars > limits.max_output_chars_ceiling {
            return Err(SandboxError::Config(
                "default_max_output_chars exceeds max_output_chars_ceiling".to_string(),
            ));
        }
        if self.python_bin.trim().is_empty() {
            return Err(SandboxError::Config("python_bin is empty".to_string()));
        }
        Ok(())
    }

    pub fn base_path(&self) -> SandboxResult<PathBuf> {
        expand_path(&self.base_dir)
    }

    pub fn sessions_path(&self) -> SandboxResult<PathBuf> {
        Ok(self.base_path()?.join("sessions"))
    }

    pub fn work_path(&self) -> SandboxResult<PathBuf> {
        Ok(self.base_path()?.join("work"))
    }

    pub fn scratch_path(&self) -> SandboxResult<PathBuf> {
        match &self.scratch_dir {
            Some(dir) => expand_path(dir),
            None => Ok(self.base_path()?.join("outputs")),
        }
    }

    pub fn public_path(&self) -> SandboxResult<PathBuf> {
        match &self.public_dir {
            Some(dir) => expand_path(dir),
            None => Ok(self.base_path()?.join("public")),
        }
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    /// Resolve a request's optional limits against defaults and ceilings
    pub fn resolve_limits(&self, request: &ExecutionRequest) -> ResourceLimits {
        let l = &self.limits;
        let timeout = request
            .timeout_seconds
            .unwrap_or(l.default_timeout_secs)
            .min(l.max_timeout_secs)
            .max(1);
        let memory = request
            .memory_limit_mb
            .unwrap_or(l.default_memory_limit_mb)
            .min(l.max_memory_limit_mb)
            .max(16);
        let output = request
            .max_output_chars
            .unwrap_or(l.default_max_output_chars)
            .min(l.max_output_chars_ceiling);

        let mut limits = ResourceLimits::with_timeout(Duration::from_secs(timeout), memory, output);
        limits.max_open_files = l.max_open_files;
        limits.max_file_size_bytes = l.max_file_size_mb.saturating_mul(1024 * 1024);
        limits
    }

    fn default_python_bin() -> String {
        "python3".to_string()
    }

    fn default_base_dir() -> String {
        "~/.local/share/scriptbox".to_string()
    }

    fn default_public_url_prefix() -> String {
        "/files".to_string()
    }

    fn default_http_client() -> String {
        "requests".to_string()
    }

    fn default_work_dir_grace() -> u64 {
        600 // 10 minutes
    }

    fn default_analysis_timeout() -> u64 {
        10
    }
}

impl LimitsConfig {
    fn default_timeout() -> u64 {
        30
    }

    fn max_timeout() -> u64 {
        300 // 5 minutes
    }

    fn default_memory() -> u64 {
        1024
    }

    fn max_memory() -> u64 {
        4096
    }

    fn default_output() -> usize {
        10_000
    }

    fn max_output() -> usize {
        200_000
    }

    fn max_code() -> usize {
        100_000
    }

    fn max_file_size() -> u64 {
        64
    }

    fn max_open_files() -> u64 {
        256
    }
}

fn expand_path(path: &str) -> SandboxResult<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SandboxError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if path == "~" {
        dirs::home_dir()
            .ok_or_else(|| SandboxError::Config("Cannot determine home directory".to_string()))
    } else {
        Ok(PathBuf::from(path))
    }
}

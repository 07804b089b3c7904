//! CLI command implementations

use anyhow::{Context, Result};
use scriptbox_sandbox::{
    ExecutionRequest, ExecutionResult, Executor, SandboxConfig, SecurityLevel, SessionStore,
    Validator,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// Arguments for `scriptbox run`
pub struct RunArgs {
    pub script: PathBuf,
    pub session: String,
    pub timeout: Option<u64>,
    pub memory: Option<u64>,
    pub max_output: Option<usize>,
    pub json: bool,
}

/// Install the stderr subscriber, plus a file layer when requested.
///
/// `RUST_LOG` takes precedence over `--verbose`.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "scriptbox={},scriptbox_sandbox={}",
            log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Load configuration from an explicit file or the default location
pub fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    let config = match path {
        Some(path) => SandboxConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SandboxConfig::load().context("Failed to load default config")?,
    };
    Ok(config)
}

pub fn with_level(mut config: SandboxConfig, level: Option<SecurityLevel>) -> SandboxConfig {
    if let Some(level) = level {
        config.security_level = level;
    }
    config
}

async fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut code = String::new();
        tokio::io::stdin()
            .read_to_string(&mut code)
            .await
            .context("Failed to read script from stdin")?;
        return Ok(code);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read script {}", path.display()))
}

/// Execute `scriptbox run`. Returns whether the script succeeded.
pub async fn execute_run(config: SandboxConfig, args: RunArgs) -> Result<bool> {
    let code = read_script(&args.script).await?;
    let executor = Executor::new(config).context("Failed to initialize sandbox")?;

    let mut request = ExecutionRequest::new(code, args.session);
    request.timeout_seconds = args.timeout;
    request.memory_limit_mb = args.memory;
    request.max_output_chars = args.max_output;

    info!("Running {}", args.script.display());
    let result = executor.execute(request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(result.success)
}

fn print_result(result: &ExecutionResult) {
    if !result.output.is_empty() {
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    for file in &result.files {
        eprintln!("file: {} ({:?}) {}", file.name, file.type_tag, file.url);
    }
    if let Some(error) = &result.error {
        eprintln!("error: {}", error);
    }
    if let Some(code) = result.exit_code {
        eprintln!("exit code: {}", code);
    }
    eprintln!("({} ms)", result.execution_time_ms);
}

/// Execute `scriptbox validate`. Returns whether the script is safe.
pub async fn execute_validate(config: SandboxConfig, script: &Path) -> Result<bool> {
    let code = read_script(script).await?;
    let report = Validator::from_config(&config).validate(&code).await;

    for violation in &report.violations {
        println!("violation: {}", violation);
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    if report.is_safe {
        println!("OK ({} level)", config.security_level);
    }
    Ok(report.is_safe)
}

fn open_store(config: &SandboxConfig) -> Result<SessionStore> {
    let root = config.sessions_path()?;
    SessionStore::open(&root).context("Failed to open session store")
}

pub fn execute_session_keys(config: &SandboxConfig, session: &str) -> Result<()> {
    for key in open_store(config)?.list_keys(session)? {
        println!("{}", key);
    }
    Ok(())
}

pub fn execute_session_get(config: &SandboxConfig, session: &str, key: &str) -> Result<()> {
    let value = open_store(config)?.load(session, key, serde_json::Value::Null)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn execute_session_clear(config: &SandboxConfig, session: &str) -> Result<()> {
    if open_store(config)?.clear_session(session)? {
        println!("Cleared session {}", session);
    } else {
        println!("No such session: {}", session);
    }
    Ok(())
}

pub async fn execute_cleanup(config: SandboxConfig, max_age_hours: u64) -> Result<()> {
    let executor = Executor::new(config).context("Failed to initialize sandbox")?;
    let removed = executor.cleanup(max_age_hours).await?;
    println!("Removed {} director{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}

pub fn print_config(config: &SandboxConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

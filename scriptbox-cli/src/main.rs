mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scriptbox_sandbox::SecurityLevel;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "scriptbox")]
#[command(about = "Run untrusted analysis scripts in a validated sandbox")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ~/.config/scriptbox/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and execute a script
    Run {
        /// Script file, or '-' to read from stdin
        script: PathBuf,

        /// Session the script's saved values belong to
        #[arg(short, long)]
        session: String,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Memory limit in MiB
        #[arg(short, long)]
        memory: Option<u64>,

        /// Maximum characters of output to return
        #[arg(long)]
        max_output: Option<usize>,

        /// Override the configured security level
        #[arg(long)]
        level: Option<SecurityLevel>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Statically analyze a script without running it
    Validate {
        /// Script file, or '-' to read from stdin
        script: PathBuf,

        /// Override the configured security level
        #[arg(long)]
        level: Option<SecurityLevel>,
    },
    /// Inspect or clear stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Remove stale work directories and idle sessions
    Cleanup {
        /// Sessions idle for longer than this are removed
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List the keys stored in a session
    Keys { session: String },
    /// Print one stored value as JSON
    Get { session: String, key: String },
    /// Delete a session and all of its values
    Clear { session: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = commands::init_logging(cli.verbose, cli.log_file.as_deref())?;
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            script,
            session,
            timeout,
            memory,
            max_output,
            level,
            json,
        } => {
            let request = commands::RunArgs {
                script,
                session,
                timeout,
                memory,
                max_output,
                json,
            };
            let succeeded = commands::execute_run(commands::with_level(config, level), request).await?;
            Ok(exit_code(succeeded))
        }
        Commands::Validate { script, level } => {
            let safe = commands::execute_validate(commands::with_level(config, level), &script).await?;
            Ok(exit_code(safe))
        }
        Commands::Sessions { command } => {
            match command {
                SessionCommands::Keys { session } => {
                    commands::execute_session_keys(&config, &session)?
                }
                SessionCommands::Get { session, key } => {
                    commands::execute_session_get(&config, &session, &key)?
                }
                SessionCommands::Clear { session } => {
                    commands::execute_session_clear(&config, &session)?
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cleanup { max_age_hours } => {
            commands::execute_cleanup(config, max_age_hours).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            commands::print_config(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Exit status for a run or validation; returning it lets the log guard flush
fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

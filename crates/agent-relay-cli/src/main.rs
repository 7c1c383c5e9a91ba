// crates/agent-relay-cli/src/main.rs
// ============================================================================
// Module: Agent Relay CLI Entry Point
// Description: Command dispatcher for the relay server.
// Purpose: Load configuration and run the relay HTTP server.
// Dependencies: agent-relay-config, agent-relay-server, clap, tokio
// ============================================================================

//! ## Overview
//! The CLI loads and validates relay configuration, then runs the HTTP
//! server. Configuration errors exit non-zero with a readable message on
//! stderr; the server runs until interrupted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use agent_relay_config::RelayConfig;
use agent_relay_server::RelayServer;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "agent-relay", version, about = "Authorization-aware agent request relay")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay HTTP server.
    Serve(ServeCommand),
}

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Configuration file path (defaults to `AGENT_RELAY_CONFIG` or
    /// `./agent-relay.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failure with a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Message shown on stderr.
    message: String,
}

impl CliError {
    /// Builds a CLI error from a message.
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            write_stderr_line(&format!("error: {err}"));
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command()
            .print_help()
            .map_err(|err| CliError::new(format!("help output failed: {err}")))?;
        return Ok(ExitCode::SUCCESS);
    };
    match command {
        Commands::Serve(command) => command_serve(command).await,
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = RelayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    let server = RelayServer::from_config(config)
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    write_stderr_line(&format!("agent-relay listening on {}", server.bind_addr()));
    server
        .serve()
        .await
        .map_err(|err| CliError::new(format!("server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one line to stderr, ignoring output failures.
fn write_stderr_line(message: &str) {
    let _ = writeln!(io::stderr(), "{message}");
}

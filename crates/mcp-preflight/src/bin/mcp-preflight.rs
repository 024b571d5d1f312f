use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mcp_preflight::{Config, InspectError, Report, diagnostics, report};

/// Exit status of `diff --exit-code` when the reports differ.
const EXIT_CHANGED: u8 = 2;

#[derive(Parser)]
#[command(name = "mcp-preflight")]
#[command(about = "Inspect an MCP server's surface before trusting it, and diff two inspections")]
struct Cli {
    /// Directory searched for `.preflight.json` / `preflight.json`.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Override config path (absolute or relative to --root).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compact JSON output (default: pretty JSON).
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch a stdio MCP server, enumerate it read-only and print the report.
    Inspect {
        /// Also write the report to this file (absolute or relative to --root).
        #[arg(long)]
        save: Option<PathBuf>,

        /// Per-call timeout in milliseconds (overrides the config file).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Skip the signal scan.
        #[arg(long, default_value_t = false)]
        no_signals: bool,

        /// Protocol version offered in `initialize`.
        #[arg(long)]
        protocol_version: Option<String>,

        /// Server command. A single argument is split like a shell would.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Compare two saved reports.
    Diff {
        /// Paths are absolute or relative to --root.
        before: PathBuf,
        after: PathBuf,

        /// Exit with status 2 when the reports differ.
        #[arg(long, default_value_t = false)]
        exit_code: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match cli.command {
        Command::Inspect {
            save,
            timeout_ms,
            no_signals,
            protocol_version,
            command,
        } => {
            let mut config = Config::load(&root, cli.config).await?;
            if let Some(timeout_ms) = timeout_ms {
                config = config.with_request_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(protocol_version) = protocol_version {
                config = config.with_protocol_version(protocol_version);
            }
            if no_signals {
                config = config.with_signals_enabled(false);
            }
            let options = config.inspect_options().context("invalid preflight config")?;
            let argv = split_command(command)?;

            let snapshot = match mcp_preflight::inspect_command(&argv, &options).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    report_failure(&err);
                    return Err(err.into());
                }
            };

            let text = report::encode(&snapshot)?;
            if let Some(path) = save {
                let path = root.join(path);
                tokio::fs::write(&path, &text)
                    .await
                    .with_context(|| format!("write {}", path.display()))?;
                tracing::info!(path = %path.display(), "report saved");
            }
            if cli.json {
                let value: serde_json::Value = serde_json::from_str(&text)?;
                println!("{}", serde_json::to_string(&value)?);
            } else {
                print!("{text}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Diff {
            before,
            after,
            exit_code,
        } => {
            let before = read_report(&root.join(before)).await?;
            let after = read_report(&root.join(after)).await?;
            let result = mcp_preflight::diff_reports(&before, &after)?;

            let text = if cli.json {
                serde_json::to_string(&result)?
            } else {
                serde_json::to_string_pretty(&result)?
            };
            println!("{text}");
            if exit_code && !result.is_empty() {
                return Ok(ExitCode::from(EXIT_CHANGED));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `inspect -- "npx -y server"` and `inspect -- npx -y server` mean the same thing.
fn split_command(command: Vec<String>) -> anyhow::Result<Vec<String>> {
    match command.as_slice() {
        [single] if single.contains(char::is_whitespace) => {
            let argv = shell_words::split(single).context("parse server command")?;
            if argv.is_empty() {
                anyhow::bail!("server command must not be empty");
            }
            Ok(argv)
        }
        _ => Ok(command),
    }
}

async fn read_report(path: &Path) -> anyhow::Result<Report> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    report::decode(&text).with_context(|| format!("decode {}", path.display()))
}

fn report_failure(err: &InspectError) {
    let Some(stderr) = err.stderr() else {
        return;
    };
    let diagnostics = diagnostics::analyze_stderr(stderr);
    if let Some(hint) = diagnostics.failure_hint() {
        eprintln!("hint: {hint}");
    }
    if !stderr.trim().is_empty() {
        eprintln!("server stderr:\n{}", diagnostics::stderr_excerpt(stderr, 2000));
    }
}

//! Server process lifecycle: spawn over stdio, then close, wait and kill.

use std::time::Duration;

use mcp_jsonrpc::{SpawnOptions, WaitOnTimeout};
use tokio::process::Command;

use crate::LaunchError;

/// Time allowed for a killed child to be reaped and for stderr to drain.
const KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds a command from argv. The child inherits the caller's env and cwd.
pub fn command_from_argv(argv: &[String]) -> Result<Command, LaunchError> {
    let (program, args) = argv.split_first().ok_or(LaunchError::EmptyCommand)?;
    if program.trim().is_empty() {
        return Err(LaunchError::EmptyCommand);
    }
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Spawns `cmd` with piped stdio, keeping at most `stderr_capture_bytes` of its stderr.
pub async fn open(
    cmd: Command,
    stderr_capture_bytes: usize,
) -> Result<mcp_jsonrpc::Client, LaunchError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let client = mcp_jsonrpc::Client::spawn_command_with_options(
        cmd,
        SpawnOptions {
            stderr_capture_bytes: Some(stderr_capture_bytes),
        },
    )
    .await
    .map_err(|source| LaunchError::Spawn {
        program: program.clone(),
        source,
    })?;
    tracing::debug!(%program, pid = ?client.child_id(), "server started");
    Ok(client)
}

/// Closes stdin, waits `grace` for the server to exit, then kills it.
///
/// Returns whatever the server wrote to stderr.
pub async fn terminate(mut client: mcp_jsonrpc::Client, grace: Duration) -> String {
    let stderr = client.take_stderr();
    match client
        .wait_with_timeout(grace, WaitOnTimeout::Kill { kill_timeout: KILL_TIMEOUT })
        .await
    {
        Ok(Some(status)) => tracing::debug!(%status, "server exited"),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "server did not shut down cleanly"),
    }
    drop(client);
    match stderr {
        Some(stderr) => {
            if stderr.is_truncated() {
                tracing::debug!("server stderr exceeded the capture limit; keeping its tail");
            }
            stderr.finish(KILL_TIMEOUT).await
        }
        None => String::new(),
    }
}

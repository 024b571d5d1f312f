//! One preflight run: launch, handshake, enumerate, annotate, shut down.

use std::time::Duration;

use crate::handshake::{ClientInfo, HandshakeController};
use crate::protocol::MCP_PROTOCOL_VERSION;
use crate::session::Session;
use crate::signals::SignalScanner;
use crate::snapshot::Snapshot;
use crate::{InspectError, diagnostics, extract, launch, manifest};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub client_info: ClientInfo,
    /// Offered in `initialize`.
    pub protocol_version: String,
    /// Applies to `initialize` and to every later call on its own.
    pub call_timeout: Duration,
    pub shutdown_grace: Duration,
    pub stderr_capture_bytes: usize,
    /// `None` skips the signal scan.
    pub signals: Option<SignalScanner>,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stderr_capture_bytes: mcp_jsonrpc::DEFAULT_STDERR_CAPTURE_BYTES,
            signals: Some(SignalScanner::with_default_rules()),
        }
    }
}

/// Spawns `argv` and inspects it. The server is gone when this returns.
pub async fn inspect_command(
    argv: &[String],
    options: &InspectOptions,
) -> Result<Snapshot, InspectError> {
    let cmd = launch::command_from_argv(argv)?;
    let client = launch::open(cmd, options.stderr_capture_bytes).await?;
    let mut snapshot = inspect_client(client, options).await?;
    snapshot.scanned_command = argv.to_vec();
    Ok(snapshot)
}

/// Inspects an already connected server and then shuts the client down.
///
/// Only launch and handshake failures are errors. Anything that goes wrong
/// afterwards is recorded as a note on the returned snapshot.
pub async fn inspect_client(
    client: mcp_jsonrpc::Client,
    options: &InspectOptions,
) -> Result<Snapshot, InspectError> {
    let mut controller = HandshakeController::new(options.client_info.clone(), options.call_timeout)
        .with_protocol_version(options.protocol_version.clone());
    let ready = match controller.negotiate(&client).await {
        Ok(ready) => ready,
        Err(source) => {
            let stderr = launch::terminate(client, options.shutdown_grace).await;
            return Err(InspectError::Handshake { source, stderr });
        }
    };

    let session = Session::new(client, ready, options.call_timeout);
    let extract::Extraction {
        mut snapshot,
        listed_uris,
    } = extract::extract(&session).await;

    let resolution = manifest::resolve(&session, &snapshot, &listed_uris).await;
    snapshot.manifest = resolution.manifest;
    snapshot.notes.extend(resolution.notes);

    if let Some(scanner) = &options.signals {
        snapshot.signals = scanner.scan(&snapshot);
    }

    let stderr = launch::terminate(session.into_client(), options.shutdown_grace).await;
    diagnostics::apply(&mut snapshot, &diagnostics::analyze_stderr(&stderr));

    tracing::info!(
        server = %snapshot.server_name,
        status = ?snapshot.status,
        tools = snapshot.tools.len(),
        notes = snapshot.notes.len(),
        "inspection finished"
    );
    Ok(snapshot)
}

//! The `initialize` exchange that turns a raw connection into a usable session.

use std::time::Duration;

use crate::mcp::{Implementation, InitializeRequest, InitializeRequestParams, InitializeResult};
use crate::protocol::{MCP_PROTOCOL_VERSION, is_supported_protocol_version};
use crate::snapshot::DeclaredCapabilities;
use crate::{HandshakeError, McpRequest};

const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unopened,
    Negotiating,
    Ready,
    Failed,
}

/// What the server declared about itself in its `initialize` result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyState {
    pub server_name: String,
    pub server_version: Option<String>,
    /// The version the server answered with; one of the supported versions.
    pub protocol_version: String,
    pub capabilities: DeclaredCapabilities,
}

/// Drives a single `initialize` round. No retries.
#[derive(Debug)]
pub struct HandshakeController {
    client_info: ClientInfo,
    protocol_version: String,
    timeout: Duration,
    state: HandshakeState,
}

impl HandshakeController {
    pub fn new(client_info: ClientInfo, timeout: Duration) -> Self {
        Self {
            client_info,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            timeout,
            state: HandshakeState::Unopened,
        }
    }

    /// Overrides the version offered in `initialize`.
    pub fn with_protocol_version(mut self, protocol_version: impl Into<String>) -> Self {
        self.protocol_version = protocol_version.into();
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub async fn negotiate(
        &mut self,
        client: &mcp_jsonrpc::Client,
    ) -> Result<ReadyState, HandshakeError> {
        if self.state != HandshakeState::Unopened {
            return Err(HandshakeError::InvalidState(self.state));
        }
        self.state = HandshakeState::Negotiating;

        match self.run(client).await {
            Ok(ready) => {
                self.state = HandshakeState::Ready;
                tracing::debug!(
                    server = %ready.server_name,
                    protocol_version = %ready.protocol_version,
                    "handshake complete"
                );
                Ok(ready)
            }
            Err(err) => {
                self.state = HandshakeState::Failed;
                tracing::warn!(error = %err, "handshake failed");
                Err(err)
            }
        }
    }

    async fn run(&self, client: &mcp_jsonrpc::Client) -> Result<ReadyState, HandshakeError> {
        let params = InitializeRequestParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: self.client_info.name.clone(),
                version: self.client_info.version.clone(),
            },
        };
        let params = serde_json::to_value(&params)
            .map_err(|err| HandshakeError::Malformed(format!("encode initialize params: {err}")))?;

        let raw = client
            .request_with_timeout(InitializeRequest::METHOD, Some(params), self.timeout)
            .await
            .map_err(|err| match err {
                mcp_jsonrpc::Error::Timeout(after) => HandshakeError::Timeout(after),
                mcp_jsonrpc::Error::Rpc { code, message, .. } => {
                    HandshakeError::Rejected { code, message }
                }
                other => HandshakeError::Transport(other),
            })?;

        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|err| HandshakeError::Malformed(err.to_string()))?;

        let offered = result.protocol_version.trim();
        if offered.is_empty() {
            return Err(HandshakeError::Malformed(
                "protocolVersion is empty".to_string(),
            ));
        }
        if offered != self.protocol_version {
            if !is_supported_protocol_version(offered) {
                return Err(HandshakeError::UnsupportedProtocolVersion {
                    requested: self.protocol_version.clone(),
                    offered: offered.to_string(),
                });
            }
            tracing::info!(
                requested = %self.protocol_version,
                offered,
                "server negotiated a different protocol version"
            );
        }

        client
            .notify(INITIALIZED_NOTIFICATION, None)
            .await
            .map_err(HandshakeError::Transport)?;

        let capabilities = DeclaredCapabilities {
            tools: result.capabilities.tools.is_some(),
            resources: result.capabilities.resources.is_some(),
            prompts: result.capabilities.prompts.is_some(),
        };
        let (server_name, server_version) = match result.server_info {
            Some(info) if !info.name.trim().is_empty() => (
                info.name,
                Some(info.version).filter(|version| !version.is_empty()),
            ),
            _ => ("unknown".to_string(), None),
        };

        Ok(ReadyState {
            server_name,
            server_version,
            protocol_version: offered.to_string(),
            capabilities,
        })
    }
}

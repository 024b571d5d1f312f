use std::time::Duration;

/// The server command could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("no server command given")]
    EmptyCommand,
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: mcp_jsonrpc::Error,
    },
}

/// `initialize` did not produce a usable session.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("initialize timed out after {0:?}")]
    Timeout(Duration),
    #[error("server rejected initialize: json-rpc error {code}: {message}")]
    Rejected { code: i64, message: String },
    #[error("malformed initialize result: {0}")]
    Malformed(String),
    #[error("server answered with unsupported protocol version {offered} (requested {requested})")]
    UnsupportedProtocolVersion { requested: String, offered: String },
    #[error("initialize failed: {0}")]
    Transport(#[source] mcp_jsonrpc::Error),
    #[error("handshake cannot start from state {0:?}")]
    InvalidState(crate::handshake::HandshakeState),
}

/// A post-handshake call failed. Recovered into an empty result and a note by the callers.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("{method} failed: json-rpc error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("{method} failed: {source}")]
    Transport {
        method: String,
        #[source]
        source: mcp_jsonrpc::Error,
    },
    #[error("{method}: {source}")]
    Codec {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CallError {
    pub(crate) fn from_jsonrpc(method: &str, err: mcp_jsonrpc::Error) -> Self {
        let method = method.to_string();
        match err {
            mcp_jsonrpc::Error::Timeout(after) => Self::Timeout { method, after },
            mcp_jsonrpc::Error::Rpc { code, message, .. } => Self::Rpc {
                method,
                code,
                message,
            },
            source => Self::Transport { method, source },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("encode report: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("report is not valid: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("report has no schemaVersion")]
    MissingSchemaVersion,
    #[error("unsupported report schemaVersion {found} (this build reads {supported})")]
    UnsupportedSchemaVersion { found: u64, supported: u32 },
    #[error("report is inconsistent: {0}")]
    Inconsistent(String),
}

/// Fatal inspection failure. Nothing was enumerated.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("handshake failed: {source}")]
    Handshake {
        #[source]
        source: HandshakeError,
        /// Tail of the server's stderr, collected after it was shut down.
        stderr: String,
    },
}

impl InspectError {
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Launch(_) => None,
            Self::Handshake { stderr, .. } => Some(stderr),
        }
    }
}

/// Two reports cannot be compared.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffSchemaMismatch {
    #[error("report schema versions differ: {before} vs {after}")]
    SchemaVersion { before: u32, after: u32 },
    #[error("{side} report uses unsupported protocol version {version}")]
    ProtocolVersion { side: &'static str, version: String },
    #[error("{side} report is inconsistent: {reason}")]
    Inconsistent { side: &'static str, reason: String },
}

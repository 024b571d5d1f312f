use serde::Serialize;
use serde::de::DeserializeOwned;

/// MCP protocol version offered during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions the handshake accepts from a server, newest first.
///
/// Every revision in this list shares the `initialize` / `*/list` / `resources/read`
/// shapes used here, so a server answering with an older one is still readable.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Typed MCP request (method + params + result).
pub trait McpRequest {
    const METHOD: &'static str;
    type Params: Serialize;
    type Result: DeserializeOwned;
}

//! `mcp-preflight` shows what an MCP server exposes before anyone trusts it.
//!
//! A run launches the server over stdio, negotiates `initialize`, lists its
//! tools, resources, resource templates and prompts, reads the optional
//! `{scheme}://mcp/manifest` resource, and produces a [`Snapshot`]:
//! - every tool carries a heuristic risk label (`destructive`, `write`,
//!   `read-only`, or `unknown-resolved-to-write`) and the keyword behind it;
//! - suspicious phrasing in names and descriptions is reported as signals;
//! - anything that failed along the way is a note, not an error.
//!
//! Snapshots are persisted with [`report::encode`] and compared with
//! [`diff::diff`] to catch drift between two runs.
//!
//! ## Non-goals
//!
//! - Calling tools or writing to the server in any way
//! - Remote transports (HTTP/SSE)
//! - Proving a tool is safe; labels are keyword heuristics

pub mod classify;
mod config;
pub mod diagnostics;
pub mod diff;
mod error;
pub mod extract;
pub mod handshake;
pub mod inspect;
pub mod launch;
pub mod manifest;
pub mod mcp;
mod protocol;
pub mod report;
pub mod session;
pub mod signals;
pub mod snapshot;

pub use classify::{RiskClassification, classify};
pub use config::{ClientConfig, Config, SignalRuleConfig, SignalsConfig};
pub use diff::{DiffResult, diff, diff_reports};
pub use error::{
    CallError, DiffSchemaMismatch, HandshakeError, InspectError, LaunchError, ReportError,
};
pub use handshake::{ClientInfo, HandshakeController, HandshakeState, ReadyState};
pub use inspect::{InspectOptions, inspect_client, inspect_command};
pub use protocol::{
    MCP_PROTOCOL_VERSION, McpRequest, SUPPORTED_PROTOCOL_VERSIONS, is_supported_protocol_version,
};
pub use report::{REPORT_SCHEMA_VERSION, Report};
pub use session::Session;
pub use signals::{SignalRule, SignalScanner};
pub use snapshot::Snapshot;

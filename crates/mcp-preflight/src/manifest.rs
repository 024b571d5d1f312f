//! Reads the optional `{scheme}://mcp/manifest` resource that declares which
//! operations hide behind multi-purpose tools.
//!
//! Expected shape:
//!
//! ```json
//! { "version": "1", "tools": { "invoice": { "operations": ["list", "send"] } } }
//! ```
//!
//! A missing manifest is normal. Only unreadable or malformed ones leave a note.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::CallError;
use crate::session::Session;
use crate::snapshot::{Manifest, ManifestEntry, Note, NoteKind, NoteRule, Snapshot};

pub const MANIFEST_PATH: &str = "mcp/manifest";

/// JSON-RPC codes treated as "there is no manifest" rather than a failure.
const NOT_FOUND_CODES: [i64; 2] = [-32002, mcp_jsonrpc::METHOD_NOT_FOUND];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed manifest: {0}")]
pub struct MalformedManifest(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub manifest: Option<Manifest>,
    pub notes: Vec<Note>,
}

impl Resolution {
    fn absent() -> Self {
        Self::default()
    }

    fn failed(rule: NoteRule, detail: impl Into<String>) -> Self {
        Self {
            manifest: None,
            notes: vec![Note::new(NoteKind::Manifest, MANIFEST_PATH, rule, detail)],
        }
    }
}

/// The manifest URI for this server: scheme of the first resource in `listed_uris`
/// (server order, not snapshot order), else one derived from the server name.
pub fn manifest_uri(server_name: &str, listed_uris: &[String]) -> String {
    let scheme = listed_uris
        .iter()
        .find_map(|uri| uri_scheme(uri))
        .map(str::to_string)
        .unwrap_or_else(|| scheme_from_name(server_name));
    format!("{scheme}://{MANIFEST_PATH}")
}

pub async fn resolve(session: &Session, snapshot: &Snapshot, listed_uris: &[String]) -> Resolution {
    if !snapshot.capabilities.resources {
        tracing::debug!("server did not declare resources; no manifest read");
        return Resolution::absent();
    }

    let uri = manifest_uri(&snapshot.server_name, listed_uris);
    let read = match session.read_resource(&uri).await {
        Ok(read) => read,
        Err(err) if is_not_found(&err) => {
            tracing::debug!(%uri, error = %err, "no manifest resource");
            return Resolution::absent();
        }
        Err(err) => {
            tracing::warn!(%uri, error = %err, "manifest read failed");
            let rule = if err.is_timeout() {
                NoteRule::Timeout
            } else {
                NoteRule::Error
            };
            return Resolution::failed(rule, err.to_string());
        }
    };

    let Some(text) = read.first_text() else {
        return Resolution::failed(NoteRule::Malformed, "manifest resource has no text content");
    };
    let manifest = match parse_manifest(text) {
        Ok(manifest) => manifest,
        Err(err) => {
            tracing::warn!(%uri, error = %err, "ignoring malformed manifest");
            return Resolution::failed(NoteRule::Malformed, err.0);
        }
    };

    let (manifest, notes) = retain_listed_tools(manifest, snapshot);
    tracing::debug!(%uri, tools = manifest.tools.len(), "manifest resolved");
    Resolution {
        manifest: Some(manifest),
        notes,
    }
}

/// Parses and shape-checks manifest text. Tools without `operations` are single-purpose
/// and left out of the mapping.
pub fn parse_manifest(text: &str) -> Result<Manifest, MalformedManifest> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| MalformedManifest(format!("not valid JSON: {err}")))?;
    let Value::Object(root) = value else {
        return Err(MalformedManifest("top level is not an object".to_string()));
    };

    let version = match root.get("version") {
        None | Some(Value::Null) => None,
        Some(Value::String(version)) => Some(version.clone()),
        Some(Value::Number(version)) => Some(version.to_string()),
        Some(_) => {
            return Err(MalformedManifest("`version` is not a string".to_string()));
        }
    };

    let Some(tools) = root.get("tools") else {
        return Err(MalformedManifest("missing `tools` object".to_string()));
    };
    let Value::Object(tools) = tools else {
        return Err(MalformedManifest("`tools` is not an object".to_string()));
    };

    let mut entries = BTreeMap::new();
    for (tool, entry) in tools {
        let Value::Object(entry) = entry else {
            return Err(MalformedManifest(format!("entry for `{tool}` is not an object")));
        };
        let operations = match entry.get("operations") {
            None | Some(Value::Null) => continue,
            Some(Value::Array(operations)) => operations,
            Some(_) => {
                return Err(MalformedManifest(format!(
                    "`operations` for `{tool}` is not a list"
                )));
            }
        };

        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(operations.len());
        for operation in operations {
            let Value::String(operation) = operation else {
                return Err(MalformedManifest(format!(
                    "`operations` for `{tool}` contains a non-string"
                )));
            };
            if seen.insert(operation.as_str()) {
                names.push(operation.clone());
            }
        }
        entries.insert(tool.clone(), ManifestEntry { operations: names });
    }

    Ok(Manifest {
        version,
        tools: entries,
    })
}

/// Drops entries for tools the server did not list, one note per dropped entry.
pub fn retain_listed_tools(mut manifest: Manifest, snapshot: &Snapshot) -> (Manifest, Vec<Note>) {
    let mut notes = Vec::new();
    manifest.tools.retain(|tool, _| {
        let listed = snapshot.tool(tool).is_some();
        if !listed {
            notes.push(Note::new(
                NoteKind::Manifest,
                tool.clone(),
                NoteRule::UnknownTool,
                "manifest entry names a tool the server did not list",
            ));
        }
        listed
    });
    (manifest, notes)
}

/// Servers disagree on how to say "no such resource"; accept the common spellings.
fn is_not_found(err: &CallError) -> bool {
    match err {
        CallError::Rpc { code, message, .. } => {
            let message = message.to_ascii_lowercase();
            NOT_FOUND_CODES.contains(code)
                || message.contains("not found")
                || message.contains("unknown resource")
        }
        _ => false,
    }
}

fn uri_scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
    valid.then_some(scheme)
}

fn scheme_from_name(name: &str) -> String {
    let mut scheme = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '+' | '.') {
            scheme.push(ch.to_ascii_lowercase());
        } else if !scheme.is_empty() && !scheme.ends_with('-') {
            scheme.push('-');
        }
    }
    let scheme = scheme.trim_end_matches('-');
    match scheme.chars().next() {
        Some(first) if first.is_ascii_alphabetic() => scheme.to_string(),
        Some(_) => format!("mcp-{scheme}"),
        None => "mcp".to_string(),
    }
}

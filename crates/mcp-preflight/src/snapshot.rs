//! The point-in-time record of one inspected server.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{self, RiskClassification};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub scanned_command: Vec<String>,
    pub server_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: DeclaredCapabilities,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
    /// `null` when the server publishes no manifest.
    #[serde(default)]
    pub manifest: Option<Manifest>,
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Snapshot {
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn risk_summary(&self) -> RiskSummary {
        let mut summary = RiskSummary::default();
        for tool in &self.tools {
            match tool.risk_classification {
                RiskClassification::ReadOnly => summary.read_only += 1,
                RiskClassification::Write => summary.write += 1,
                RiskClassification::UnknownResolvedToWrite => {
                    summary.write += 1;
                    summary.defaulted += 1;
                }
                RiskClassification::Destructive => summary.destructive += 1,
            }
        }
        summary
    }

    /// Keys are unique per category and every manifest entry names a listed tool.
    /// Extraction guarantees this; decoded reports have to be checked.
    pub fn check_invariants(&self) -> Result<(), String> {
        unique_keys("tool", self.tools.iter().map(|tool| tool.name.as_str()))?;
        unique_keys("resource", self.resources.iter().map(|resource| resource.uri.as_str()))?;
        unique_keys("prompt", self.prompts.iter().map(|prompt| prompt.name.as_str()))?;
        if let Some(manifest) = &self.manifest {
            if let Some(tool) = manifest.tools.keys().find(|tool| self.tool(tool).is_none()) {
                return Err(format!("manifest entry `{tool}` names a tool that is not listed"));
            }
        }
        Ok(())
    }

    /// True when nothing at all was enumerated.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }
}

fn unique_keys<'a>(what: &str, keys: impl Iterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(format!("duplicate {what} `{key}`"));
        }
    }
    Ok(())
}

/// Which capability groups the server declared during `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Ok,
    /// At least one listing failed or timed out.
    Partial,
    /// Nothing was enumerated and the server's stderr points at missing credentials.
    AuthGated,
}

/// Tool counts per risk level. Defaulted tools are counted as `write` and again in `defaulted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub read_only: usize,
    pub write: usize,
    pub destructive: usize,
    pub defaulted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    pub risk_classification: RiskClassification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_keyword: Option<String>,
}

impl ToolDescriptor {
    /// Builds a descriptor and classifies it from its name and description.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Option<Value>,
    ) -> Self {
        let name = name.into();
        let description = description
            .map(|text| normalize_whitespace(&text))
            .filter(|text| !text.is_empty());
        let assessment = classify::classify(&name, description.as_deref());
        Self {
            name,
            description,
            input_schema,
            risk_classification: assessment.classification,
            matched_keyword: assessment.matched_keyword.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Concrete URI, or the URI template when `template` is set.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub template: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-tool operations declared by the server's self-description resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tools: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn operations(&self, tool: &str) -> Option<&[String]> {
        self.tools.get(tool).map(|entry| entry.operations.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Where a signal's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Tool,
    Resource,
    ResourceTemplate,
    Prompt,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::ResourceTemplate => "resource_template",
            Self::Prompt => "prompt",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// A pattern matched; nothing was verified.
    #[default]
    Heuristic,
}

/// A suspicious-text match. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub kind: SourceKind,
    pub name: String,
    pub rule: String,
    pub excerpt: String,
    #[serde(default)]
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// A protocol call.
    Mcp,
    Manifest,
    Snapshot,
    /// The server process itself (stderr).
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteRule {
    Timeout,
    Error,
    Malformed,
    UnknownTool,
    Duplicate,
    AuthHint,
    StartupStacktrace,
}

impl NoteRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Malformed => "malformed",
            Self::UnknownTool => "unknown_tool",
            Self::Duplicate => "duplicate",
            Self::AuthHint => "auth_hint",
            Self::StartupStacktrace => "startup_stacktrace",
        }
    }
}

/// A recovered problem recorded alongside the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub kind: NoteKind,
    pub name: String,
    pub rule: NoteRule,
    pub detail: String,
}

impl Note {
    pub fn new(kind: NoteKind, name: impl Into<String>, rule: NoteRule, detail: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            rule,
            detail: detail.into(),
        }
    }

    pub(crate) fn call_failed(name: &str, err: &crate::CallError) -> Self {
        let rule = if err.is_timeout() {
            NoteRule::Timeout
        } else {
            NoteRule::Error
        };
        Self::new(NoteKind::Mcp, name, rule, err.to_string())
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule.as_str(), self.name)
    }
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_false(value: &bool) -> bool {
    !*value
}

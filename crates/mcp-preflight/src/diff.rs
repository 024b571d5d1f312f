//! Structural comparison of two snapshots.
//!
//! Every category is keyed (tool name, resource uri, prompt name). Keys present on one
//! side only are added or removed; keys on both sides are compared field by field.
//! Manifest operations are compared per tool, so "operation added to an existing tool"
//! stays distinct from "tool added". Swapping the inputs swaps added/removed and old/new.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::DiffSchemaMismatch;
use crate::classify::RiskClassification;
use crate::protocol::is_supported_protocol_version;
use crate::report::Report;
use crate::snapshot::{
    Manifest, ManifestEntry, PromptDescriptor, ResourceDescriptor, Snapshot, ToolDescriptor,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

fn change<T: PartialEq + Clone>(old: &T, new: &T) -> Option<Change<T>> {
    (old != new).then(|| Change {
        old: old.clone(),
        new: new.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryDiff<A, C> {
    pub added: Vec<A>,
    pub removed: Vec<A>,
    pub changed: Vec<C>,
}

impl<A, C> CategoryDiff<A, C> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn count(&self) -> CategoryCount {
        CategoryCount {
            added: self.added.len(),
            removed: self.removed.len(),
            changed: self.changed.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolChange {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Change<Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Change<Option<Value>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Change<Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<Change<bool>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptChange {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Change<Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Change<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskEntry {
    pub name: String,
    pub classification: RiskClassification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskChange {
    pub name: String,
    pub classification: Change<RiskClassification>,
}

/// Operation-level change for a tool present in both manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationChange {
    pub tool: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCount {
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub tools: CategoryCount,
    pub resources: CategoryCount,
    pub prompts: CategoryCount,
    pub manifest: CategoryCount,
    pub operations: OperationCount,
    pub risk: CategoryCount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<Change<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<Change<String>>,
    pub tools: CategoryDiff<ToolDescriptor, ToolChange>,
    pub resources: CategoryDiff<ResourceDescriptor, ResourceChange>,
    pub prompts: CategoryDiff<PromptDescriptor, PromptChange>,
    /// Tools entering or leaving the manifest, plus per-tool operation changes.
    pub manifest: CategoryDiff<String, OperationChange>,
    pub risk: CategoryDiff<RiskEntry, RiskChange>,
    pub summary: DiffSummary,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.server_name.is_none()
            && self.protocol_version.is_none()
            && self.tools.is_empty()
            && self.resources.is_empty()
            && self.prompts.is_empty()
            && self.manifest.is_empty()
            && self.risk.is_empty()
    }
}

pub fn diff(before: &Snapshot, after: &Snapshot) -> DiffResult {
    let tools = diff_keyed(&before.tools, &after.tools, tool_key, |old, new| {
        let description = change(&old.description, &new.description);
        let input_schema = change(&old.input_schema, &new.input_schema);
        (description.is_some() || input_schema.is_some()).then(|| ToolChange {
            name: old.name.clone(),
            description,
            input_schema,
        })
    });

    let risk = diff_keyed(&before.tools, &after.tools, tool_key, |old, new| {
        change(&old.risk_classification, &new.risk_classification).map(|classification| {
            RiskChange {
                name: old.name.clone(),
                classification,
            }
        })
    });
    let risk = CategoryDiff {
        added: risk.added.iter().map(risk_entry).collect(),
        removed: risk.removed.iter().map(risk_entry).collect(),
        changed: risk.changed,
    };

    let resources = diff_keyed(&before.resources, &after.resources, resource_key, |old, new| {
        let description = change(&old.description, &new.description);
        let template = change(&old.template, &new.template);
        (description.is_some() || template.is_some()).then(|| ResourceChange {
            uri: old.uri.clone(),
            description,
            template,
        })
    });

    let prompts = diff_keyed(&before.prompts, &after.prompts, prompt_key, |old, new| {
        let args = change(&old.args, &new.args);
        let description = change(&old.description, &new.description);
        (args.is_some() || description.is_some()).then(|| PromptChange {
            name: old.name.clone(),
            args,
            description,
        })
    });

    let manifest = diff_manifest(before.manifest.as_ref(), after.manifest.as_ref());

    let summary = DiffSummary {
        tools: tools.count(),
        resources: resources.count(),
        prompts: prompts.count(),
        manifest: manifest.count(),
        operations: OperationCount {
            added: manifest.changed.iter().map(|change| change.added.len()).sum(),
            removed: manifest.changed.iter().map(|change| change.removed.len()).sum(),
        },
        risk: risk.count(),
    };

    DiffResult {
        server_name: change(&before.server_name, &after.server_name),
        protocol_version: change(&before.protocol_version, &after.protocol_version),
        tools,
        resources,
        prompts,
        manifest,
        risk,
        summary,
    }
}

/// Diffs two decoded reports after checking that they are comparable.
pub fn diff_reports(before: &Report, after: &Report) -> Result<DiffResult, DiffSchemaMismatch> {
    if before.schema_version != after.schema_version {
        return Err(DiffSchemaMismatch::SchemaVersion {
            before: before.schema_version,
            after: after.schema_version,
        });
    }
    for (side, report) in [("before", before), ("after", after)] {
        let version = &report.snapshot.protocol_version;
        if !is_supported_protocol_version(version) {
            return Err(DiffSchemaMismatch::ProtocolVersion {
                side,
                version: version.clone(),
            });
        }
        report
            .snapshot
            .check_invariants()
            .map_err(|reason| DiffSchemaMismatch::Inconsistent { side, reason })?;
    }
    Ok(diff(&before.snapshot, &after.snapshot))
}

fn tool_key(tool: &ToolDescriptor) -> &str {
    &tool.name
}

fn resource_key(resource: &ResourceDescriptor) -> &str {
    &resource.uri
}

fn prompt_key(prompt: &PromptDescriptor) -> &str {
    &prompt.name
}

fn risk_entry(tool: &ToolDescriptor) -> RiskEntry {
    RiskEntry {
        name: tool.name.clone(),
        classification: tool.risk_classification,
    }
}

/// Results come out in key order. A key listed twice on one side counts once,
/// using its first entry, so both directions agree.
fn diff_keyed<T, C>(
    before: &[T],
    after: &[T],
    key: fn(&T) -> &str,
    compare: impl Fn(&T, &T) -> Option<C>,
) -> CategoryDiff<T, C>
where
    T: Clone,
{
    let before = by_key(before, key);
    let after = by_key(after, key);

    let added = after
        .iter()
        .filter(|(name, _)| !before.contains_key(*name))
        .map(|(_, item)| (*item).clone())
        .collect();
    let removed = before
        .iter()
        .filter(|(name, _)| !after.contains_key(*name))
        .map(|(_, item)| (*item).clone())
        .collect();
    let changed = before
        .iter()
        .filter_map(|(name, old)| compare(old, after.get(name)?))
        .collect();

    CategoryDiff {
        added,
        removed,
        changed,
    }
}

fn by_key<T>(items: &[T], key: fn(&T) -> &str) -> BTreeMap<&str, &T> {
    let mut map = BTreeMap::new();
    for item in items {
        map.entry(key(item)).or_insert(item);
    }
    map
}

fn diff_manifest(
    before: Option<&Manifest>,
    after: Option<&Manifest>,
) -> CategoryDiff<String, OperationChange> {
    let empty = BTreeMap::new();
    let before: &BTreeMap<String, ManifestEntry> = before.map_or(&empty, |manifest| &manifest.tools);
    let after: &BTreeMap<String, ManifestEntry> = after.map_or(&empty, |manifest| &manifest.tools);

    let added = after
        .keys()
        .filter(|tool| !before.contains_key(*tool))
        .cloned()
        .collect();
    let removed = before
        .keys()
        .filter(|tool| !after.contains_key(*tool))
        .cloned()
        .collect();
    let changed = before
        .iter()
        .filter_map(|(tool, old)| {
            let new = after.get(tool)?;
            diff_operations(tool, &old.operations, &new.operations)
        })
        .collect();

    CategoryDiff {
        added,
        removed,
        changed,
    }
}

/// Operations keep their manifest order: added in `new` order, removed in `old` order.
fn diff_operations(tool: &str, old: &[String], new: &[String]) -> Option<OperationChange> {
    let added: Vec<String> = new.iter().filter(|op| !old.contains(op)).cloned().collect();
    let removed: Vec<String> = old.iter().filter(|op| !new.contains(op)).cloned().collect();
    (!added.is_empty() || !removed.is_empty()).then(|| OperationChange {
        tool: tool.to_string(),
        added,
        removed,
    })
}

//! Versioned JSON encoding of a [`Snapshot`].
//!
//! Keys are camelCase. `risk` is derived from the tools on encode and ignored on decode.

use serde::Serialize;
use serde_json::Value;

use crate::ReportError;
use crate::snapshot::{RiskSummary, Snapshot};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// A decoded report: the snapshot plus the schema version it was written with.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub schema_version: u32,
    pub snapshot: Snapshot,
}

impl Report {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            snapshot,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncodedReport<'a> {
    schema_version: u32,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    risk: RiskSummary,
}

/// Pretty JSON with a trailing newline.
pub fn encode(snapshot: &Snapshot) -> Result<String, ReportError> {
    let report = EncodedReport {
        schema_version: REPORT_SCHEMA_VERSION,
        snapshot,
        risk: snapshot.risk_summary(),
    };
    let mut text = serde_json::to_string_pretty(&report).map_err(ReportError::Encode)?;
    text.push('\n');
    Ok(text)
}

pub fn decode(text: &str) -> Result<Report, ReportError> {
    let value: Value = serde_json::from_str(text).map_err(ReportError::Decode)?;
    let found = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .ok_or(ReportError::MissingSchemaVersion)?;
    if found != u64::from(REPORT_SCHEMA_VERSION) {
        return Err(ReportError::UnsupportedSchemaVersion {
            found,
            supported: REPORT_SCHEMA_VERSION,
        });
    }

    let snapshot: Snapshot = serde_json::from_value(value).map_err(ReportError::Decode)?;
    snapshot
        .check_invariants()
        .map_err(ReportError::Inconsistent)?;
    Ok(Report {
        schema_version: REPORT_SCHEMA_VERSION,
        snapshot,
    })
}

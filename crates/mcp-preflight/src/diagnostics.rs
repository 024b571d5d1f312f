//! Reading a server's stderr for credential prompts and startup crashes.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::snapshot::{Note, NoteKind, NoteRule, RunStatus, Snapshot};

const AUTH_HINT_PATTERNS: &[&str] = &[
    r"\bno (authentication|auth) (token|credentials?)\b",
    r"\b(authenticate|authentication) (required|needed)\b",
    r"\bplease authenticate\b",
    r"\bauth_login\b",
    r"\blogin required\b",
    r"\bunauthorized\b",
];

// Case-sensitive: exception class names.
const STACKTRACE_PATTERNS: &[(&str, bool)] = &[
    (r"\bReferenceError:", false),
    (r"\bTypeError:", false),
    (r"\bUnhandledPromiseRejection\b", false),
    (r"\bunhandled errors? in a TaskGroup\b", true),
    (r"\bFatal error\b", true),
    (r"^Traceback \(most recent call last\):", false),
    (r"^thread '.+' panicked at", false),
];

static AUTH_HINTS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(AUTH_HINT_PATTERNS.iter().map(|pattern| (*pattern, true))));
static STACKTRACES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(STACKTRACE_PATTERNS.iter().copied()));

const AUTH_EXCERPT_CHARS: usize = 600;
const STACKTRACE_EXCERPT_CHARS: usize = 900;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StderrDiagnostics {
    pub auth_hint: bool,
    pub stacktrace: bool,
    pub notes: Vec<Note>,
}

impl StderrDiagnostics {
    /// One-line explanation for a failed run, if stderr suggests one.
    pub fn failure_hint(&self) -> Option<&'static str> {
        if self.auth_hint {
            Some("authentication required: the server asked for credentials it was not given")
        } else if self.stacktrace {
            Some("server crashed during startup")
        } else {
            None
        }
    }
}

pub fn analyze_stderr(stderr: &str) -> StderrDiagnostics {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return StderrDiagnostics::default();
    }

    let flattened = stderr.split_whitespace().collect::<Vec<_>>().join(" ");
    let auth_hint = AUTH_HINTS.iter().any(|pattern| pattern.is_match(&flattened));
    let stacktrace = STACKTRACES.iter().any(|pattern| pattern.is_match(stderr));

    let mut notes = Vec::new();
    if auth_hint {
        notes.push(Note::new(
            NoteKind::Server,
            "stderr",
            NoteRule::AuthHint,
            stderr_excerpt(stderr, AUTH_EXCERPT_CHARS),
        ));
    }
    if stacktrace {
        notes.push(Note::new(
            NoteKind::Server,
            "stderr",
            NoteRule::StartupStacktrace,
            stderr_excerpt(stderr, STACKTRACE_EXCERPT_CHARS),
        ));
    }

    StderrDiagnostics {
        auth_hint,
        stacktrace,
        notes,
    }
}

/// Merges stderr findings into a finished snapshot.
pub fn apply(snapshot: &mut Snapshot, diagnostics: &StderrDiagnostics) {
    snapshot.notes.extend(diagnostics.notes.iter().cloned());
    if diagnostics.auth_hint && snapshot.is_empty() {
        snapshot.status = RunStatus::AuthGated;
    }
}

/// The last `max_chars` characters of stderr, starting at a line boundary when one is near.
pub fn stderr_excerpt(stderr: &str, max_chars: usize) -> String {
    let stderr = stderr.trim();
    let total = stderr.chars().count();
    if total <= max_chars {
        return stderr.to_string();
    }

    let skip = total - max_chars;
    let start = stderr
        .char_indices()
        .nth(skip)
        .map_or(stderr.len(), |(idx, _)| idx);
    let mut tail = &stderr[start..];
    if let Some(newline) = tail.find('\n').filter(|idx| *idx <= 200) {
        tail = &tail[newline + 1..];
    }
    format!("...\n{tail}")
}

fn compile<'a>(patterns: impl Iterator<Item = (&'a str, bool)>) -> Vec<Regex> {
    patterns
        .filter_map(|(pattern, case_insensitive)| {
            match RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .multi_line(true)
                .build()
            {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::error!(pattern, error = %err, "stderr pattern does not compile");
                    None
                }
            }
        })
        .collect()
}

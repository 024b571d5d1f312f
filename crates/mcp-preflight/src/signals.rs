//! Advisory text-pattern matches over everything a server describes about itself.
//!
//! Matches are labelled heuristic and never feed back into risk classification.

use regex::{Regex, RegexBuilder};

use crate::snapshot::{Confidence, Signal, Snapshot, SourceKind};

/// Excerpts longer than this many characters are cut and suffixed with `...`.
pub const MAX_EXCERPT_CHARS: usize = 200;

/// Built-in rules: (label, case-insensitive pattern).
pub const DEFAULT_RULES: &[(&str, &str)] = &[
    (
        "prompt injection phrase",
        r"\b(ignore|disregard)\b.*\b(instructions|system|developer)\b",
    ),
    ("secret exfiltration", r"\b(exfiltrat|steal|leak)\w*\b"),
    (
        "do not tell user",
        r"\b(don't|do not)\b.*\b(tell|mention|reveal)\b.*\b(user)\b",
    ),
    ("system prompt mention", r"\b(system prompt|developer message)\b"),
    ("encoded secret material", r"\bBEGIN [A-Z ]+ KEY\b"),
    ("shell download hint", r"\b(curl|wget)\b\s+https?://"),
];

#[derive(Debug, Clone)]
pub struct SignalRule {
    label: String,
    pattern: Regex,
}

impl SignalRule {
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            label: label.into(),
            pattern,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalScanner {
    rules: Vec<SignalRule>,
}

impl SignalScanner {
    pub fn new(rules: Vec<SignalRule>) -> Self {
        Self { rules }
    }

    pub fn with_default_rules() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(label, pattern)| match SignalRule::new(*label, pattern) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    tracing::error!(label, error = %err, "built-in signal rule does not compile");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn push(&mut self, rule: SignalRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[SignalRule] {
        &self.rules
    }

    /// Every (source, rule) match, sorted by kind, name and rule label.
    pub fn scan(&self, snapshot: &Snapshot) -> Vec<Signal> {
        let mut signals = Vec::new();
        if self.rules.is_empty() {
            return signals;
        }

        for tool in &snapshot.tools {
            let text = join_text([tool.name.as_str(), tool.description.as_deref().unwrap_or("")]);
            self.scan_text(SourceKind::Tool, &tool.name, &text, &mut signals);
        }
        for resource in &snapshot.resources {
            let kind = if resource.template {
                SourceKind::ResourceTemplate
            } else {
                SourceKind::Resource
            };
            self.scan_text(kind, &resource.uri, &resource.uri, &mut signals);
        }
        for prompt in &snapshot.prompts {
            let args = prompt.args.join(" ");
            let text = join_text([
                prompt.name.as_str(),
                args.as_str(),
                prompt.description.as_deref().unwrap_or(""),
            ]);
            self.scan_text(SourceKind::Prompt, &prompt.name, &text, &mut signals);
        }

        signals.sort_by(|a, b| {
            (a.kind.as_str(), a.name.as_str(), a.rule.as_str())
                .cmp(&(b.kind.as_str(), b.name.as_str(), b.rule.as_str()))
        });
        signals
    }

    fn scan_text(&self, kind: SourceKind, name: &str, text: &str, out: &mut Vec<Signal>) {
        for rule in &self.rules {
            if rule.is_match(text) {
                out.push(Signal {
                    kind,
                    name: name.to_string(),
                    rule: rule.label.clone(),
                    excerpt: excerpt(text),
                    confidence: Confidence::Heuristic,
                });
            }
        }
    }
}

fn join_text<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

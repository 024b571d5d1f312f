//! Keyword-based risk labels for tools.
//!
//! A tool's name and description are split into lower-case words (camelCase and
//! snake_case both count as word boundaries) and checked against three lexicons in
//! precedence order: destructive, then write, then read-only. The first lexicon with a
//! whole-word hit wins. No hit at all is labelled write-by-default, never read-only.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DESTRUCTIVE_KEYWORDS: &[&str] =
    &["delete", "remove", "destroy", "drop", "purge", "clear", "reset"];

pub const WRITE_KEYWORDS: &[&str] = &["create", "add", "update", "set", "send", "write", "upload"];

pub const READ_ONLY_KEYWORDS: &[&str] =
    &["get", "list", "search", "read", "fetch", "find", "show", "view"];

const LEXICONS: [(RiskClassification, &[&str]); 3] = [
    (RiskClassification::Destructive, DESTRUCTIVE_KEYWORDS),
    (RiskClassification::Write, WRITE_KEYWORDS),
    (RiskClassification::ReadOnly, READ_ONLY_KEYWORDS),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskClassification {
    ReadOnly,
    Write,
    Destructive,
    /// No keyword matched; treated as write.
    UnknownResolvedToWrite,
}

impl RiskClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Write => "write",
            Self::Destructive => "destructive",
            Self::UnknownResolvedToWrite => "unknown-resolved-to-write",
        }
    }

    /// Sort key: most dangerous first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Destructive => 0,
            Self::Write | Self::UnknownResolvedToWrite => 1,
            Self::ReadOnly => 2,
        }
    }
}

impl fmt::Display for RiskClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label plus the word that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub classification: RiskClassification,
    pub matched_keyword: Option<&'static str>,
}

pub fn classify(name: &str, description: Option<&str>) -> RiskAssessment {
    let mut words = tokenize(name);
    if let Some(description) = description {
        words.extend(tokenize(description));
    }

    for (classification, lexicon) in LEXICONS {
        if let Some(keyword) = lexicon
            .iter()
            .copied()
            .find(|keyword| words.iter().any(|word| word == keyword))
        {
            return RiskAssessment {
                classification,
                matched_keyword: Some(keyword),
            };
        }
    }

    RiskAssessment {
        classification: RiskClassification::UnknownResolvedToWrite,
        matched_keyword: None,
    }
}

/// Lower-case alphanumeric words, split at punctuation and lower-to-upper transitions.
fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower_or_digit = false;

    for ch in text.chars() {
        if !ch.is_alphanumeric() {
            flush(&mut current, &mut words);
            prev_lower_or_digit = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower_or_digit {
            flush(&mut current, &mut words);
        }
        prev_lower_or_digit = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    flush(&mut current, &mut words);
    words
}

fn flush(current: &mut String, words: &mut Vec<String>) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str, description: Option<&str>) -> RiskClassification {
        classify(name, description).classification
    }

    #[test]
    fn read_only_tool_by_name() {
        let assessment = classify("get_user", Some("Fetch a user record by id"));
        assert_eq!(assessment.classification, RiskClassification::ReadOnly);
        assert_eq!(assessment.matched_keyword, Some("get"));
    }

    #[test]
    fn destructive_beats_write_and_read_only() {
        let assessment = classify("update_delete_item", Some("delete then update"));
        assert_eq!(assessment.classification, RiskClassification::Destructive);
        assert_eq!(assessment.matched_keyword, Some("delete"));

        assert_eq!(
            label("delete_item", Some("Permanently delete an item")),
            RiskClassification::Destructive
        );
        assert_eq!(label("delete-file", Some("remove it")), RiskClassification::Destructive);
    }

    #[test]
    fn write_beats_read_only() {
        assert_eq!(
            label("update_profile", Some("Get and update a profile")),
            RiskClassification::Write
        );
    }

    #[test]
    fn no_keyword_defaults_to_write() {
        let assessment = classify("frobnicate", Some(""));
        assert_eq!(
            assessment.classification,
            RiskClassification::UnknownResolvedToWrite
        );
        assert_eq!(assessment.matched_keyword, None);
        assert_eq!(assessment.classification.rank(), RiskClassification::Write.rank());
    }

    #[test]
    fn camel_case_names_are_split() {
        assert_eq!(label("deleteUser", None), RiskClassification::Destructive);
        assert_eq!(label("getFileInfo", None), RiskClassification::ReadOnly);
        assert_eq!(label("listUsers-v2", None), RiskClassification::ReadOnly);
    }

    #[test]
    fn keywords_only_match_whole_words() {
        assert_eq!(label("dataset_stats", None), RiskClassification::UnknownResolvedToWrite);
        assert_eq!(label("readme", Some("preset values")), RiskClassification::UnknownResolvedToWrite);
        assert_eq!(label("reset_password", None), RiskClassification::Destructive);
        assert_eq!(
            label("list_items", Some("List all items in the database")),
            RiskClassification::ReadOnly
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let first = classify("send_email", Some("Send an email to a user"));
        for _ in 0..10 {
            assert_eq!(classify("send_email", Some("Send an email to a user")), first);
        }
        assert_eq!(first.classification, RiskClassification::Write);
        assert_eq!(first.matched_keyword, Some("send"));
    }

    #[test]
    fn labels_serialize_in_kebab_case() {
        let value = serde_json::to_value(RiskClassification::UnknownResolvedToWrite).unwrap();
        assert_eq!(value, "unknown-resolved-to-write");
        let value = serde_json::to_value(RiskClassification::ReadOnly).unwrap();
        assert_eq!(value, "read-only");
    }
}

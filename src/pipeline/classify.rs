//! Filename classifier: numeric filename tokens → document type.
//!
//! Only the filename is inspected. A token run is a sequence of digit groups
//! joined by `-`, `_` or `.` that does not directly follow an ASCII letter
//! or digit, so the `100` of a `C100_2-24` case prefix never joins the run.
//! Each adjacent pair of groups is a candidate token, normalized without
//! leading zeros (`02_24` → `2-24`). The first candidate in scan order that
//! is registered or is a known duplicate decides the outcome.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ClassifierConfig, ConfigError};
use crate::models::enums::DocumentType;

static TOKEN_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9A-Za-z])(\d+(?:[-_.]\d+)+)").unwrap());

/// Normalize one raw token to canonical `digit-digit` form.
pub fn normalize_token(raw: &str) -> Option<String> {
    let mut groups = raw
        .split(['-', '_', '.'])
        .filter(|g| !g.is_empty())
        .map(|g| {
            let trimmed = g.trim_start_matches('0');
            if trimmed.is_empty() { "0" } else { trimmed }
        });
    let first = groups.next()?;
    let second = groups.next()?;
    if !first.chars().all(|c| c.is_ascii_digit()) || !second.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{first}-{second}"))
}

/// Normalized candidate tokens of a filename, in scan order, duplicates kept.
pub fn scan_tokens(filename: &str) -> Vec<String> {
    TOKEN_RUN
        .captures_iter(filename)
        .filter_map(|caps| caps.get(1))
        .flat_map(|run| {
            let groups: Vec<&str> = run.as_str().split(['-', '_', '.']).collect();
            groups
                .windows(2)
                .filter_map(|pair| normalize_token(&format!("{}-{}", pair[0], pair[1])))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Outcome of classifying one filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub document_type: Option<DocumentType>,
    pub matched_token: Option<String>,
    pub tokens_found: Vec<String>,
    pub reason: String,
}

/// A filename that could not be classified. Recoverable: the file is
/// excluded and the reason is reported to the uploader.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Cannot classify {filename}: {reason}")]
pub struct ClassificationRejected {
    pub filename: String,
    pub tokens_found: Vec<String>,
    pub allowed: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FileClassifier {
    registry: HashMap<String, DocumentType>,
    /// duplicate token → canonical token
    duplicates: HashMap<String, String>,
    allowed: Vec<String>,
}

impl FileClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        let mut registry: HashMap<String, DocumentType> = HashMap::new();
        for (doc_type, tokens) in &config.tokens {
            for raw in tokens {
                let token = normalize_token(raw).ok_or_else(|| {
                    ConfigError::invalid(format!("classifier.tokens.{doc_type}"), format!("bad token {raw:?}"))
                })?;
                if let Some(existing) = registry.insert(token.clone(), *doc_type) {
                    if existing != *doc_type {
                        return Err(ConfigError::TokenConflict {
                            token,
                            first: existing.to_string(),
                            second: doc_type.to_string(),
                        });
                    }
                }
            }
        }

        let mut duplicates = HashMap::new();
        for (canonical_raw, group) in &config.duplicate_groups {
            let canonical = normalize_token(canonical_raw).ok_or_else(|| {
                ConfigError::invalid("classifier.duplicate_groups", format!("bad token {canonical_raw:?}"))
            })?;
            let owner = registry.get(&canonical).ok_or_else(|| {
                ConfigError::invalid(
                    "classifier.duplicate_groups",
                    format!("canonical token {canonical} is not registered"),
                )
            })?;
            for raw in group {
                let dup = normalize_token(raw).ok_or_else(|| {
                    ConfigError::invalid("classifier.duplicate_groups", format!("bad token {raw:?}"))
                })?;
                if let Some(registered) = registry.get(&dup) {
                    return Err(ConfigError::TokenConflict {
                        token: dup,
                        first: registered.to_string(),
                        second: format!("duplicate of {owner}"),
                    });
                }
                duplicates.insert(dup, canonical.clone());
            }
        }

        let mut allowed: Vec<String> = registry.keys().cloned().collect();
        allowed.sort();

        Ok(Self {
            registry,
            duplicates,
            allowed,
        })
    }

    /// Registered canonical tokens, sorted.
    pub fn allowed_tokens(&self) -> &[String] {
        &self.allowed
    }

    pub fn classify(&self, filename: &str) -> Classification {
        let tokens_found = scan_tokens(filename);

        for token in &tokens_found {
            if let Some(canonical) = self.duplicates.get(token) {
                let owner = self
                    .registry
                    .get(canonical)
                    .map(|t| t.as_str())
                    .unwrap_or("unregistered");
                return Classification {
                    document_type: None,
                    matched_token: Some(token.clone()),
                    reason: format!("token {token} is a known duplicate of {canonical} ({owner})"),
                    tokens_found,
                };
            }
            if let Some(doc_type) = self.registry.get(token) {
                return Classification {
                    document_type: Some(*doc_type),
                    matched_token: Some(token.clone()),
                    reason: format!("token {token} is registered for {doc_type}"),
                    tokens_found,
                };
            }
        }

        let reason = if tokens_found.is_empty() {
            format!("no numeric token found; allowed: {}", self.allowed.join(", "))
        } else {
            format!(
                "tokens found [{}] match none of: {}",
                tokens_found.join(", "),
                self.allowed.join(", ")
            )
        };
        Classification {
            document_type: None,
            matched_token: None,
            tokens_found,
            reason,
        }
    }

    /// Classify and turn a rejection into an error.
    pub fn classify_or_reject(&self, filename: &str) -> Result<(DocumentType, String), ClassificationRejected> {
        let outcome = self.classify(filename);
        match (outcome.document_type, outcome.matched_token) {
            (Some(doc_type), Some(token)) => Ok((doc_type, token)),
            _ => {
                tracing::warn!(filename = %filename, reason = %outcome.reason, "Classification rejected");
                Err(ClassificationRejected {
                    filename: filename.to_string(),
                    tokens_found: outcome.tokens_found,
                    allowed: self.allowed.clone(),
                    reason: outcome.reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FileClassifier {
        FileClassifier::from_config(&ClassifierConfig::default()).unwrap()
    }

    #[test]
    fn normalizes_separators_and_leading_zeros() {
        assert_eq!(normalize_token("2-24").as_deref(), Some("2-24"));
        assert_eq!(normalize_token("02_24").as_deref(), Some("2-24"));
        assert_eq!(normalize_token("2.24.1").as_deref(), Some("2-24"));
        assert_eq!(normalize_token("00-0").as_deref(), Some("0-0"));
        assert_eq!(normalize_token("24"), None);
    }

    #[test]
    fn classifies_each_registered_token() {
        let c = classifier();
        let cases = [
            ("C100_2-24_控制价审批.pdf", DocumentType::ControlPriceApproval),
            ("C100_2-45.pdf", DocumentType::PurchaseRequestApproval),
            ("C100 2_47 公告.pdf", DocumentType::Announcement),
            ("2.49-C100.pdf", DocumentType::ResultApproval),
            ("C100-02-51.pdf", DocumentType::CandidatePublicity),
            ("C100_2-52.pdf", DocumentType::ResultPublicity),
        ];
        for (filename, expected) in cases {
            let outcome = c.classify(filename);
            assert_eq!(outcome.document_type, Some(expected), "{filename}: {}", outcome.reason);
        }
    }

    #[test]
    fn case_prefix_digits_do_not_join_token() {
        let c = classifier();
        let outcome = c.classify("C100_2-24.pdf");
        assert_eq!(outcome.tokens_found, vec!["2-24"]);
        assert_eq!(c.classify("ZB2024001-2-47.pdf").document_type, Some(DocumentType::Announcement));
    }

    #[test]
    fn first_registered_token_in_scan_order_wins() {
        let c = classifier();
        let outcome = c.classify("2-47_then_2-24.pdf");
        assert_eq!(outcome.document_type, Some(DocumentType::Announcement));
        assert_eq!(outcome.matched_token.as_deref(), Some("2-47"));
    }

    #[test]
    fn unregistered_tokens_are_skipped() {
        let c = classifier();
        let outcome = c.classify("2024.03.05_2-24.pdf");
        assert_eq!(outcome.document_type, Some(DocumentType::ControlPriceApproval));
        assert_eq!(outcome.tokens_found, vec!["2024-3", "3-5", "5-2", "2-24"]);
    }

    #[test]
    fn known_duplicate_is_rejected() {
        let c = classifier();
        let outcome = c.classify("C100_2-46.pdf");
        assert_eq!(outcome.document_type, None);
        assert_eq!(outcome.matched_token.as_deref(), Some("2-46"));
        assert!(outcome.reason.contains("duplicate of 2-45"));
    }

    #[test]
    fn rejection_names_found_and_allowed_tokens() {
        let c = classifier();
        let err = c.classify_or_reject("C100_3-99.pdf").unwrap_err();
        assert_eq!(err.tokens_found, vec!["3-99".to_string()]);
        assert!(err.allowed.contains(&"2-24".to_string()));
        assert!(err.reason.contains("3-99"));

        let err = c.classify_or_reject("scan.pdf").unwrap_err();
        assert!(err.tokens_found.is_empty());
        assert!(err.reason.contains("no numeric token"));
    }

    #[test]
    fn classification_is_pure() {
        let c = classifier();
        let names = ["a_2-24.pdf", "b_2-46.pdf", "c.pdf", "d_2-52_2-24.pdf"];
        let first: Vec<_> = names.iter().map(|n| c.classify(n)).collect();
        let second: Vec<_> = names.iter().rev().map(|n| c.classify(n)).collect();
        let second: Vec<_> = second.into_iter().rev().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn token_registered_twice_is_config_error() {
        let mut config = ClassifierConfig::default();
        config
            .tokens
            .insert(DocumentType::ResultPublicity, vec!["2-24".into()]);
        assert!(matches!(
            FileClassifier::from_config(&config),
            Err(ConfigError::TokenConflict { .. })
        ));
    }

    #[test]
    fn duplicate_that_is_also_registered_is_config_error() {
        let mut config = ClassifierConfig::default();
        config
            .duplicate_groups
            .insert("2-45".into(), vec!["2-47".into()]);
        assert!(FileClassifier::from_config(&config).is_err());
    }

    #[test]
    fn duplicate_groups_are_configurable() {
        let mut config = ClassifierConfig::default();
        config.duplicate_groups.clear();
        config
            .tokens
            .get_mut(&DocumentType::PurchaseRequestApproval)
            .unwrap()
            .push("2-46".into());
        let c = FileClassifier::from_config(&config).unwrap();
        assert_eq!(
            c.classify("C100_2-46.pdf").document_type,
            Some(DocumentType::PurchaseRequestApproval)
        );
    }
}

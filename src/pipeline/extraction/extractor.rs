//! Rule-driven field extraction.
//!
//! Each document type owns an ordered list of rules. A rule locates its
//! label in the sanitized text of the first pages, captures the span up to
//! the line break or the next label of another rule, and runs its parser.
//! Extraction never fails: every rule yields a field, possibly Missing.

use std::collections::{BTreeMap, HashSet};

use crate::config::{ConfigError, ExtractionConfig};
use crate::models::enums::{Confidence, DocumentType, ParserKind};
use crate::models::{ExtractedField, ExtractedFieldSet};

use super::parsers::{strip_leading_separator, ParseFailure, SpanParsers};
use super::sanitize::sanitize_extracted_text;

/// Widest bracketed unit between a label and its colon, e.g. `（万元）`.
const MAX_BRACKET_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub field: String,
    pub labels: Vec<String>,
    pub parser: ParserKind,
    pub required: bool,
    pub multiline: bool,
}

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    max_pages: usize,
    rules: BTreeMap<DocumentType, Vec<FieldRule>>,
    parsers: SpanParsers,
}

impl FieldExtractor {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        if config.max_pages == 0 {
            return Err(ConfigError::invalid("extraction.max_pages", "must be positive"));
        }

        let mut rules = BTreeMap::new();
        for (doc_type, rule_configs) in &config.rules {
            let mut seen = HashSet::new();
            let mut compiled = Vec::with_capacity(rule_configs.len());
            for rule in rule_configs {
                let field = rule.field.trim();
                if field.is_empty() {
                    return Err(ConfigError::invalid(format!("extraction.rules.{doc_type}"), "empty field name"));
                }
                if !seen.insert(field.to_string()) {
                    return Err(ConfigError::invalid(
                        format!("extraction.rules.{doc_type}"),
                        format!("field {field} declared twice"),
                    ));
                }
                let labels: Vec<String> = rule
                    .labels
                    .iter()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                if labels.is_empty() {
                    return Err(ConfigError::invalid(
                        format!("extraction.rules.{doc_type}.{field}"),
                        "at least one label is required",
                    ));
                }
                compiled.push(FieldRule {
                    field: field.to_string(),
                    labels,
                    parser: rule.parser,
                    required: rule.required,
                    multiline: rule.multiline,
                });
            }
            rules.insert(*doc_type, compiled);
        }

        Ok(Self {
            max_pages: config.max_pages,
            rules,
            parsers: SpanParsers::from_config(config)?,
        })
    }

    pub fn rules_for(&self, doc_type: DocumentType) -> &[FieldRule] {
        self.rules.get(&doc_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn required_fields(&self, doc_type: DocumentType) -> Vec<&str> {
        self.rules_for(doc_type)
            .iter()
            .filter(|r| r.required)
            .map(|r| r.field.as_str())
            .collect()
    }

    /// Extract every rule of `doc_type` from the first pages of `pages`.
    pub fn extract(&self, doc_type: DocumentType, pages: &[String]) -> ExtractedFieldSet {
        let text = pages
            .iter()
            .take(self.max_pages)
            .map(|p| sanitize_extracted_text(p))
            .collect::<Vec<_>>()
            .join("\n");

        let rules = self.rules_for(doc_type);
        let mut set = ExtractedFieldSet::new(doc_type);

        for (index, rule) in rules.iter().enumerate() {
            let stop_labels: Vec<&str> = rules
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .flat_map(|(_, r)| r.labels.iter().map(String::as_str))
                .filter(|l| !rule.labels.iter().any(|own| own.contains(l) || l.contains(own.as_str())))
                .collect();

            let field = match locate_span(&text, rule, &stop_labels) {
                None => ExtractedField::missing(doc_type),
                Some(span) => match self.parsers.parse(rule.parser, span) {
                    Ok(value) => ExtractedField::high(value, doc_type),
                    Err(ParseFailure::Empty) => ExtractedField::missing(doc_type),
                    Err(ParseFailure::Invalid) => ExtractedField::low(strip_leading_separator(span), doc_type),
                },
            };

            tracing::debug!(
                document_type = %doc_type,
                field = %rule.field,
                confidence = %field.confidence,
                "Field extracted"
            );
            if field.confidence == Confidence::Low {
                tracing::warn!(document_type = %doc_type, field = %rule.field, "Low-confidence field");
            }
            if rule.required {
                set.required.insert(rule.field.clone());
            }
            set.insert(rule.field.clone(), field);
        }

        set
    }
}

/// Captured span after the rule's label, or `None` when no label occurs.
///
/// Among all label occurrences the earliest one followed by a colon is
/// preferred, so a label repeated in a page title does not win over the
/// labelled value further down.
fn locate_span<'t>(text: &'t str, rule: &FieldRule, stop_labels: &[&str]) -> Option<&'t str> {
    let mut hits: Vec<(usize, usize)> = rule
        .labels
        .iter()
        .flat_map(|label| text.match_indices(label.as_str()).map(|(i, l)| (i, l.len())))
        .collect();
    // earliest first; longer label first on ties
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let (pos, len) = hits
        .iter()
        .copied()
        .find(|(pos, len)| followed_by_colon(&text[pos + len..]))
        .or_else(|| hits.first().copied())?;

    let rest = &text[pos + len..];
    let mut end = if rule.multiline {
        rest.len()
    } else {
        rest.find('\n').unwrap_or(rest.len())
    };
    for label in stop_labels {
        if let Some(i) = rest[..end].find(label) {
            end = end.min(i);
        }
    }
    Some(&rest[..end])
}

fn followed_by_colon(after_label: &str) -> bool {
    let mut rest = after_label.trim_start_matches([' ', '\t']);
    for (open, close) in [('（', '）'), ('(', ')')] {
        if let Some(inner) = rest.strip_prefix(open) {
            if let Some(close_at) = inner.find(close) {
                if inner[..close_at].chars().count() <= MAX_BRACKET_CHARS {
                    rest = inner[close_at + close.len_utf8()..].trim_start_matches([' ', '\t']);
                }
            }
        }
    }
    rest.starts_with([':', '：'])
}

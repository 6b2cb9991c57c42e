use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::enums::{Confidence, DocumentType};

// ═══════════════════════════════════════════════════════════
// Amount: fixed-point yuan with two decimal places
// ═══════════════════════════════════════════════════════════

/// Monetary amount stored as integer fen (1/100 yuan).
///
/// Serialized as a decimal string ("1234.50") so JSON clients never see
/// a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount {
    fen: i64,
}

impl Amount {
    pub fn from_fen(fen: i64) -> Self {
        Self { fen }
    }

    pub fn fen(&self) -> i64 {
        self.fen
    }

    /// Parse a plain decimal string ("1234", "1234.5", "-3.25").
    /// More than two decimal places are rounded half-up.
    pub fn parse_decimal(s: &str) -> Option<Self> {
        Self::parse_scaled(s, 1)
    }

    /// Parse a decimal string and multiply it by an integer unit
    /// (10_000 for 万元) without passing through floating point.
    pub fn parse_scaled(s: &str, multiplier: i64) -> Option<Self> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }

        // value = (int_part.frac_part) * multiplier * 100, as an exact rational
        let scale = 10i128.checked_pow(frac_part.len() as u32)?;
        let mantissa: i128 = format!("{int_part}{frac_part}").parse().ok()?;
        let numerator = mantissa.checked_mul(multiplier as i128)?.checked_mul(100)?;
        let mut fen = numerator / scale;
        if (numerator % scale) * 2 >= scale {
            fen += 1;
        }
        let fen = i64::try_from(fen).ok()?;
        Some(Self::from_fen(if negative { -fen } else { fen }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.fen < 0 { "-" } else { "" };
        let abs = self.fen.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

impl TryFrom<String> for Amount {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::parse_decimal(&value).ok_or_else(|| format!("invalid amount: {value}"))
    }
}

// ═══════════════════════════════════════════════════════════
// FieldValue
// ═══════════════════════════════════════════════════════════

/// A typed field value. `Raw` holds the captured span of a field whose
/// parser failed, kept so a reviewer can correct it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Amount(Amount),
    Date(NaiveDate),
    Text(String),
    List(Vec<String>),
    Raw(String),
}

impl FieldValue {
    /// Comparison key used by reconciliation. Two values agree when their
    /// keys are equal: text is whitespace/width-normalized and list order
    /// is ignored.
    pub fn normalized_key(&self) -> String {
        match self {
            Self::Amount(a) => format!("amount:{}", a.fen()),
            Self::Date(d) => format!("date:{d}"),
            Self::Text(t) => format!("text:{}", normalize_text(t)),
            Self::Raw(t) => format!("raw:{}", normalize_text(t)),
            Self::List(items) => {
                let mut normalized: Vec<String> = items.iter().map(|i| normalize_text(i)).collect();
                normalized.sort();
                normalized.dedup();
                format!("list:{}", normalized.join("\u{1f}"))
            }
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Plain display text, used for ledger columns and logs at debug level.
    pub fn display_text(&self) -> String {
        match self {
            Self::Amount(a) => a.to_string(),
            Self::Date(d) => d.to_string(),
            Self::Text(t) | Self::Raw(t) => t.clone(),
            Self::List(items) => items.join("、"),
        }
    }
}

/// Normalize free text for equality checks: full-width ASCII folded to
/// half-width, whitespace collapsed, trailing punctuation dropped, ASCII
/// lowercased.
pub fn normalize_text(s: &str) -> String {
    let folded: String = s
        .chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['。', '.', ',', '，', ';', '；', '、'])
        .to_ascii_lowercase()
}

// ═══════════════════════════════════════════════════════════
// ExtractedFieldSet
// ═══════════════════════════════════════════════════════════

/// One field as extracted from one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedField {
    /// Absent iff `confidence == Missing`.
    pub value: Option<FieldValue>,
    pub confidence: Confidence,
    pub source: DocumentType,
}

impl ExtractedField {
    pub fn high(value: FieldValue, source: DocumentType) -> Self {
        Self { value: Some(value), confidence: Confidence::High, source }
    }

    pub fn low(raw_span: &str, source: DocumentType) -> Self {
        Self {
            value: Some(FieldValue::Raw(raw_span.trim().to_string())),
            confidence: Confidence::Low,
            source,
        }
    }

    pub fn missing(source: DocumentType) -> Self {
        Self { value: None, confidence: Confidence::Missing, source }
    }

    pub fn is_missing(&self) -> bool {
        self.confidence == Confidence::Missing
    }
}

/// Field name → extracted field, produced once per uploaded document.
/// Every rule of the document type has an entry, Missing included.
/// `required` records the rule set in force at extraction time, so a later
/// config reload does not change what an existing draft needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFieldSet {
    pub document_type: DocumentType,
    pub fields: BTreeMap<String, ExtractedField>,
    #[serde(default)]
    pub required: BTreeSet<String>,
}

impl ExtractedFieldSet {
    pub fn new(document_type: DocumentType) -> Self {
        Self { document_type, fields: BTreeMap::new(), required: BTreeSet::new() }
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, field: ExtractedField) {
        self.fields.insert(name.into(), field);
    }

    pub fn count_by_confidence(&self, confidence: Confidence) -> usize {
        self.fields.values().filter(|f| f.confidence == confidence).count()
    }
}

//! Span parsers: amount, date, text, enumeration.
//!
//! Every parser receives the span captured after a label and returns either
//! a typed value or a `ParseFailure`. `Empty` means nothing followed the
//! label (the field is Missing); `Invalid` means text was there but did not
//! parse (the field is Low and the span is kept raw).

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::{ConfigError, ExtractionConfig};
use crate::models::enums::ParserKind;
use crate::models::{Amount, FieldValue};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

static DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}\s*[年\-/.]\s*\d{1,2}\s*[月\-/.]\s*\d{1,2}\s*日?").unwrap()
});

const TRAILING_PUNCTUATION: &[char] = &['。', '；', ';', '，', ',', '、', '.'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    Empty,
    Invalid,
}

/// Drop the separator between a label and its value.
pub fn strip_leading_separator(span: &str) -> &str {
    span.trim_start_matches(|c: char| c == ':' || c == '：' || c.is_whitespace())
        .trim_end()
}

#[derive(Debug, Clone)]
struct Unit {
    suffix: String,
    multiplier: i64,
}

#[derive(Debug, Clone)]
pub struct SpanParsers {
    noise: Vec<String>,
    /// Longest suffix first.
    units: Vec<Unit>,
    date_formats: Vec<String>,
    separators: Vec<String>,
    terminators: Vec<char>,
    max_items: usize,
}

impl SpanParsers {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        let mut units = Vec::with_capacity(config.amount.units.len());
        for unit in &config.amount.units {
            if unit.suffix.is_empty() || unit.multiplier <= 0 {
                return Err(ConfigError::invalid(
                    "extraction.amount.units",
                    format!("unit {:?} x{} is not usable", unit.suffix, unit.multiplier),
                ));
            }
            units.push(Unit {
                suffix: unit.suffix.clone(),
                multiplier: unit.multiplier,
            });
        }
        units.sort_by(|a, b| b.suffix.chars().count().cmp(&a.suffix.chars().count()));

        if config.date_formats.is_empty() {
            return Err(ConfigError::invalid("extraction.date_formats", "at least one format is required"));
        }
        if config.enumeration.max_items == 0 {
            return Err(ConfigError::invalid("extraction.enumeration.max_items", "must be positive"));
        }

        Ok(Self {
            noise: config.amount.noise.iter().filter(|n| !n.is_empty()).cloned().collect(),
            units,
            date_formats: config.date_formats.clone(),
            separators: config
                .enumeration
                .separators
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
            terminators: config.enumeration.terminators.clone(),
            max_items: config.enumeration.max_items,
        })
    }

    pub fn parse(&self, kind: ParserKind, span: &str) -> Result<FieldValue, ParseFailure> {
        match kind {
            ParserKind::Amount => self.parse_amount(span).map(FieldValue::Amount),
            ParserKind::Date => self.parse_date(span).map(FieldValue::Date),
            ParserKind::Text => parse_text(span).map(FieldValue::Text),
            ParserKind::Enumeration => self.parse_enumeration(span).map(FieldValue::List),
        }
    }

    // ── amount ──────────────────────────────────────────────

    /// Fixed-point amount in yuan. A unit directly after the number wins;
    /// otherwise a bracketed header unit such as `（万元）` applies. More
    /// than one distinct value in the span is ambiguous.
    pub fn parse_amount(&self, span: &str) -> Result<Amount, ParseFailure> {
        let raw = strip_leading_separator(span);
        let header_multiplier = self
            .units
            .iter()
            .find(|u| raw.contains(&format!("（{}）", u.suffix)) || raw.contains(&format!("({})", u.suffix)))
            .map(|u| u.multiplier);

        let mut cleaned = raw.to_string();
        for noise in &self.noise {
            cleaned = cleaned.replace(noise.as_str(), "");
        }
        let residue = self
            .units
            .iter()
            .fold(cleaned.clone(), |acc, u| acc.replace(u.suffix.as_str(), ""));
        if strip_leading_separator(&residue).is_empty() {
            return Err(ParseFailure::Empty);
        }

        let mut values = BTreeSet::new();
        for m in NUMBER.find_iter(&cleaned) {
            let rest = &cleaned[m.end()..];
            let multiplier = self
                .units
                .iter()
                .find(|u| rest.starts_with(u.suffix.as_str()))
                .map(|u| u.multiplier)
                .or(header_multiplier)
                .unwrap_or(1);
            let amount = Amount::parse_scaled(m.as_str(), multiplier).ok_or(ParseFailure::Invalid)?;
            values.insert(amount);
        }

        match values.len() {
            1 => values.into_iter().next().ok_or(ParseFailure::Invalid),
            _ => Err(ParseFailure::Invalid),
        }
    }

    // ── date ────────────────────────────────────────────────

    /// First configured format that fully parses the leading date wins.
    pub fn parse_date(&self, span: &str) -> Result<NaiveDate, ParseFailure> {
        let raw = strip_leading_separator(span).trim_end_matches(TRAILING_PUNCTUATION);
        if raw.is_empty() {
            return Err(ParseFailure::Empty);
        }

        let candidate: String = match DATE_PREFIX.find(raw) {
            Some(m) => m.as_str().chars().filter(|c| !c.is_whitespace()).collect(),
            None => raw.to_string(),
        };

        self.date_formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(&candidate, fmt).ok())
            .ok_or(ParseFailure::Invalid)
    }

    // ── enumeration ─────────────────────────────────────────

    /// Split on separator phrases, keep each segment's payload up to the
    /// first terminator. Falls back to the whole span as one value.
    pub fn parse_enumeration(&self, span: &str) -> Result<Vec<String>, ParseFailure> {
        let raw = strip_leading_separator(span);
        if raw.is_empty() {
            return Err(ParseFailure::Empty);
        }

        let mut items: Vec<String> = Vec::new();
        for segment in split_on_any(raw, &self.separators) {
            let segment = strip_leading_separator(segment);
            let payload = match segment.find(|c: char| self.terminators.contains(&c)) {
                Some(i) => &segment[..i],
                None => segment,
            };
            let payload = payload.trim().trim_end_matches(TRAILING_PUNCTUATION);
            if payload.is_empty() || items.iter().any(|i| i == payload) {
                continue;
            }
            items.push(payload.to_string());
            if items.len() == self.max_items {
                break;
            }
        }

        if items.is_empty() {
            items.push(raw.trim_end_matches(TRAILING_PUNCTUATION).to_string());
        }
        Ok(items)
    }
}

pub fn parse_text(span: &str) -> Result<String, ParseFailure> {
    let value = strip_leading_separator(span).trim_end_matches(TRAILING_PUNCTUATION).trim();
    if value.is_empty() {
        Err(ParseFailure::Empty)
    } else {
        Ok(value.to_string())
    }
}

/// Split `s` at every occurrence of any separator, earliest first.
fn split_on_any<'a>(s: &'a str, separators: &[String]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = s;
    loop {
        let next = separators
            .iter()
            .filter_map(|sep| rest.find(sep.as_str()).map(|i| (i, sep.len())))
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        match next {
            Some((i, len)) => {
                parts.push(&rest[..i]);
                rest = &rest[i + len..];
            }
            None => {
                parts.push(rest);
                return parts;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsers() -> SpanParsers {
        SpanParsers::from_config(&ExtractionConfig::default()).unwrap()
    }

    fn fen(span: &str) -> Result<i64, ParseFailure> {
        parsers().parse_amount(span).map(|a| a.fen())
    }

    #[test]
    fn amount_with_currency_and_separators() {
        assert_eq!(fen("：￥1,234,567.89元"), Ok(123_456_789));
        assert_eq!(fen(" 人民币 500 元"), Ok(50_000));
    }

    #[test]
    fn amount_unit_multiplier_after_number() {
        assert_eq!(fen("：128.5万元"), Ok(128_500_000));
        assert_eq!(fen("1.2亿元"), Ok(12_000_000_000));
    }

    #[test]
    fn amount_bracketed_header_unit() {
        assert_eq!(fen("（万元）：300"), Ok(300_000_000));
    }

    #[test]
    fn amount_with_uppercase_words_uses_digits() {
        assert_eq!(fen("：人民币壹佰万元整（小写：1,000,000元）"), Ok(100_000_000));
    }

    #[test]
    fn amount_repeated_same_value_is_not_ambiguous() {
        assert_eq!(fen("100万元（1000000元）"), Ok(100_000_000));
    }

    #[test]
    fn amount_ambiguous_is_invalid() {
        assert_eq!(fen("100万元，其中暂列金10万元"), Err(ParseFailure::Invalid));
    }

    #[test]
    fn amount_without_digits_is_invalid() {
        assert_eq!(fen("：详见附件"), Err(ParseFailure::Invalid));
    }

    #[test]
    fn amount_only_noise_is_empty() {
        assert_eq!(fen("：￥ 元"), Err(ParseFailure::Empty));
        assert_eq!(fen(""), Err(ParseFailure::Empty));
    }

    #[test]
    fn date_formats_in_order() {
        let p = parsers();
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(p.parse_date("：2024年3月5日"), Ok(d));
        assert_eq!(p.parse_date("2024-03-05"), Ok(d));
        assert_eq!(p.parse_date("2024/3/5。"), Ok(d));
        assert_eq!(p.parse_date("2024.03.05"), Ok(d));
    }

    #[test]
    fn date_takes_leading_date_of_datetime() {
        let p = parsers();
        assert_eq!(
            p.parse_date("：2024年3月20日9时30分（北京时间）"),
            Ok(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap())
        );
        assert_eq!(
            p.parse_date("2024 年 3 月 20 日"),
            Ok(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap())
        );
    }

    #[test]
    fn date_invalid_and_empty() {
        let p = parsers();
        assert_eq!(p.parse_date("：另行通知"), Err(ParseFailure::Invalid));
        assert_eq!(p.parse_date("2024-13-40"), Err(ParseFailure::Invalid));
        assert_eq!(p.parse_date("：  "), Err(ParseFailure::Empty));
    }

    #[test]
    fn text_trims_separator_and_punctuation() {
        assert_eq!(parse_text("：某某道路改造工程。"), Ok("某某道路改造工程".to_string()));
        assert_eq!(parse_text(" ： "), Err(ParseFailure::Empty));
    }

    #[test]
    fn enumeration_splits_ranked_candidates() {
        let p = parsers();
        let items = p
            .parse_enumeration("：甲建设有限公司，报价：100万元；第二中标候选人：乙工程有限公司；第三中标候选人：丙公司")
            .unwrap();
        assert_eq!(items, vec!["甲建设有限公司", "乙工程有限公司", "丙公司"]);
    }

    #[test]
    fn enumeration_splits_on_enumeration_comma() {
        let p = parsers();
        assert_eq!(p.parse_enumeration("甲公司、乙公司").unwrap(), vec!["甲公司", "乙公司"]);
    }

    #[test]
    fn enumeration_caps_item_count() {
        let mut config = ExtractionConfig::default();
        config.enumeration.max_items = 2;
        let p = SpanParsers::from_config(&config).unwrap();
        assert_eq!(p.parse_enumeration("甲、乙、丙").unwrap(), vec!["甲", "乙"]);
    }

    #[test]
    fn enumeration_single_value_without_separator() {
        let p = parsers();
        assert_eq!(p.parse_enumeration("：甲建设有限公司").unwrap(), vec!["甲建设有限公司"]);
    }

    #[test]
    fn enumeration_falls_back_to_whole_span() {
        let p = parsers();
        // Every segment payload is empty, so the span is kept whole
        assert_eq!(p.parse_enumeration("：，无").unwrap(), vec!["，无"]);
    }

    #[test]
    fn enumeration_empty_span() {
        assert_eq!(parsers().parse_enumeration(" ："), Err(ParseFailure::Empty));
    }

    #[test]
    fn zero_multiplier_rejected() {
        let mut config = ExtractionConfig::default();
        config.amount.units[0].multiplier = 0;
        assert!(SpanParsers::from_config(&config).is_err());
    }
}

//! Case-key resolution: uploader-supplied key, then filename pattern, then
//! an extracted case-number field.

use regex::Regex;
use serde::Serialize;

use crate::config::{CaseKeyConfig, ConfigError};
use crate::models::enums::Confidence;
use crate::models::{CaseKey, ExtractedFieldSet, FieldValue};

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKeySource {
    Explicit,
    Filename,
    ExtractedField,
}

#[derive(Debug, Clone)]
pub struct CaseKeyResolver {
    filename_pattern: Regex,
    text_fields: Vec<String>,
}

impl CaseKeyResolver {
    pub fn from_config(config: &CaseKeyConfig) -> Result<Self, ConfigError> {
        let filename_pattern = Regex::new(&config.filename_pattern).map_err(|e| ConfigError::Regex {
            field: "case_key.filename_pattern".into(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            filename_pattern,
            text_fields: config.text_fields.clone(),
        })
    }

    pub fn from_filename(&self, filename: &str) -> Option<CaseKey> {
        let caps = self.filename_pattern.captures(filename)?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        CaseKey::new(m.as_str())
    }

    /// First configured field extracted with High confidence.
    pub fn from_fields(&self, fields: &ExtractedFieldSet) -> Option<CaseKey> {
        self.text_fields.iter().find_map(|name| {
            let field = fields.get(name)?;
            if field.confidence != Confidence::High {
                return None;
            }
            match field.value.as_ref()? {
                FieldValue::Text(t) => CaseKey::new(t),
                _ => None,
            }
        })
    }

    pub fn resolve(
        &self,
        explicit: Option<&str>,
        filename: &str,
        fields: &ExtractedFieldSet,
    ) -> Option<(CaseKey, CaseKeySource)> {
        if let Some(key) = explicit.and_then(CaseKey::new) {
            return Some((key, CaseKeySource::Explicit));
        }
        if let Some(key) = self.from_filename(filename) {
            return Some((key, CaseKeySource::Filename));
        }
        self.from_fields(fields)
            .map(|key| (key, CaseKeySource::ExtractedField))
    }
}

//! Application constants, data-dir resolution and the intake configuration.
//!
//! `IntakeConfig` is plain data loaded from JSON. It is compiled into an
//! immutable `IntakeRuntime` (classifier, extractor, case-key resolver);
//! `ConfigHandle` swaps runtimes atomically on reload. Anything already
//! extracted or staged keeps the values it was produced with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drafts::DraftTtls;
use crate::models::enums::{DocumentType, ParserKind};
use crate::pipeline::case_key::CaseKeyResolver;
use crate::pipeline::classify::FileClassifier;
use crate::pipeline::extraction::FieldExtractor;

/// Application-level constants
pub const APP_NAME: &str = "ProcurementIntake";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var overriding the data directory.
pub const HOME_ENV: &str = "PROCUREMENT_INTAKE_HOME";
/// Env var pointing at the config file.
pub const CONFIG_ENV: &str = "PROCUREMENT_INTAKE_CONFIG";
pub const CONFIG_FILE_NAME: &str = "intake.json";
pub const DATABASE_FILE_NAME: &str = "intake.db";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "procurement_intake=info,tower_http=warn"
}

/// Get the application data directory: `$PROCUREMENT_INTAKE_HOME`, else
/// `~/ProcurementIntake/`. Falls back to the working directory when no
/// home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn database_path() -> PathBuf {
    app_data_dir().join(DATABASE_FILE_NAME)
}

/// Config file to load: `$PROCUREMENT_INTAKE_CONFIG`, else
/// `<data dir>/intake.json` when it exists.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let default = app_data_dir().join(CONFIG_FILE_NAME);
    default.exists().then_some(default)
}

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid regex for {field}: {reason}")]
    Regex { field: String, reason: String },

    #[error("Token {token} is registered for both {first} and {second}")]
    TokenConflict {
        token: String,
        first: String,
        second: String,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Configuration data
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub classifier: ClassifierConfig,
    pub case_key: CaseKeyConfig,
    pub extraction: ExtractionConfig,
    pub drafts: DraftConfig,
    pub allocator: AllocatorConfig,
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
}

impl IntakeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// Filename-token registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Canonical `digit-digit` tokens per document type.
    pub tokens: BTreeMap<DocumentType, Vec<String>>,
    /// Canonical token → tokens that are known duplicates of it and are
    /// rejected instead of being classified.
    pub duplicate_groups: BTreeMap<String, Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let tokens = [
            (DocumentType::ControlPriceApproval, "2-24"),
            (DocumentType::PurchaseRequestApproval, "2-45"),
            (DocumentType::Announcement, "2-47"),
            (DocumentType::ResultApproval, "2-49"),
            (DocumentType::CandidatePublicity, "2-51"),
            (DocumentType::ResultPublicity, "2-52"),
        ]
        .into_iter()
        .map(|(t, tok)| (t, vec![tok.to_string()]))
        .collect();

        let duplicate_groups = [("2-45".to_string(), vec!["2-46".to_string()])]
            .into_iter()
            .collect();

        Self {
            tokens,
            duplicate_groups,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseKeyConfig {
    /// Regex applied to the filename. Capture group 1 is used when present,
    /// else the whole match.
    pub filename_pattern: String,
    /// Extracted fields consulted, in order, when the filename has no key.
    pub text_fields: Vec<String>,
}

impl Default for CaseKeyConfig {
    fn default() -> Self {
        Self {
            filename_pattern: r"(?:^|[^A-Za-z])([A-Za-z]{1,8}\d{2,})".into(),
            text_fields: vec!["case_number".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Only the first N pages are scanned.
    pub max_pages: usize,
    pub amount: AmountConfig,
    /// chrono format strings, tried in order.
    pub date_formats: Vec<String>,
    pub enumeration: EnumerationConfig,
    pub rules: BTreeMap<DocumentType, Vec<FieldRuleConfig>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountConfig {
    /// Stripped before numeric parsing.
    pub noise: Vec<String>,
    /// Unit suffixes with their multiplier. Longest suffix is matched first.
    pub units: Vec<UnitConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub suffix: String,
    pub multiplier: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationConfig {
    pub separators: Vec<String>,
    /// Characters ending a segment payload.
    pub terminators: Vec<char>,
    pub max_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRuleConfig {
    pub field: String,
    /// Anchor labels; the earliest occurrence of any of them wins.
    pub labels: Vec<String>,
    pub parser: ParserKind,
    #[serde(default)]
    pub required: bool,
    /// Capture past line breaks, stopping only at the next label.
    #[serde(default)]
    pub multiline: bool,
}

impl FieldRuleConfig {
    fn new(field: &str, labels: &[&str], parser: ParserKind, required: bool) -> Self {
        Self {
            field: field.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            parser,
            required,
            multiline: false,
        }
    }
}

impl Default for AmountConfig {
    fn default() -> Self {
        Self {
            noise: ["￥", "¥", ",", "，", " ", "\u{3000}", "人民币", "RMB", "rmb", "(", ")", "（", "）", "大写", "小写"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            units: vec![
                UnitConfig { suffix: "亿元".into(), multiplier: 100_000_000 },
                UnitConfig { suffix: "万元".into(), multiplier: 10_000 },
                UnitConfig { suffix: "亿".into(), multiplier: 100_000_000 },
                UnitConfig { suffix: "万".into(), multiplier: 10_000 },
                UnitConfig { suffix: "元".into(), multiplier: 1 },
            ],
        }
    }
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            separators: ["第一中标候选人", "第二中标候选人", "第三中标候选人", "、", "；", ";"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            terminators: vec!['，', ',', '。', '\n', '(', '（', '；', ';'],
            max_items: 5,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        use DocumentType::*;
        use ParserKind::*;

        let project = |required| FieldRuleConfig::new("project_name", &["项目名称", "采购项目名称"], Text, required);
        let case_number = || FieldRuleConfig::new("case_number", &["项目编号", "采购编号"], Text, false);
        let winners = |required| {
            FieldRuleConfig::new("winning_bidders", &["中标单位", "成交供应商", "中标供应商"], Enumeration, required)
        };
        let winning_amount = |required| {
            FieldRuleConfig::new("winning_amount", &["中标金额", "成交金额", "中标价"], Amount, required)
        };
        let publicity_date = || FieldRuleConfig::new("publicity_date", &["公示日期", "发布日期"], Date, false);

        let mut rules = BTreeMap::new();
        rules.insert(
            ControlPriceApproval,
            vec![
                project(true),
                case_number(),
                FieldRuleConfig::new("control_price", &["控制价", "最高限价"], Amount, true),
                FieldRuleConfig::new("approval_date", &["审批日期"], Date, false),
            ],
        );
        rules.insert(
            PurchaseRequestApproval,
            vec![
                project(true),
                case_number(),
                FieldRuleConfig::new("budget_amount", &["预算金额", "采购预算"], Amount, true),
                FieldRuleConfig::new("procurement_method", &["采购方式"], Text, true),
                FieldRuleConfig::new("applicant_department", &["申请部门", "申请单位"], Text, false),
                FieldRuleConfig::new("approval_date", &["审批日期"], Date, false),
            ],
        );
        rules.insert(
            Announcement,
            vec![
                project(true),
                case_number(),
                FieldRuleConfig::new("announcement_date", &["公告日期", "发布日期"], Date, true),
                FieldRuleConfig::new("bid_deadline", &["投标截止时间", "响应文件递交截止时间"], Date, false),
                FieldRuleConfig::new("budget_amount", &["预算金额", "采购预算"], Amount, false),
            ],
        );
        rules.insert(
            ResultApproval,
            vec![
                project(true),
                case_number(),
                winners(true),
                winning_amount(true),
                FieldRuleConfig::new("approval_date", &["审批日期"], Date, false),
            ],
        );
        rules.insert(
            CandidatePublicity,
            vec![
                project(true),
                case_number(),
                FieldRuleConfig::new("candidates", &["中标候选人"], Enumeration, true),
                publicity_date(),
            ],
        );
        rules.insert(
            ResultPublicity,
            vec![
                project(true),
                case_number(),
                winners(true),
                winning_amount(false),
                publicity_date(),
            ],
        );

        Self {
            max_pages: 3,
            amount: AmountConfig::default(),
            date_formats: ["%Y年%m月%d日", "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            enumeration: EnumerationConfig::default(),
            rules,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// Inactivity limit for Open/ReadyForReview drafts.
    pub session_ttl_secs: u64,
    /// Absolute lifetime of any non-terminal draft.
    pub draft_ttl_secs: u64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 24 * 60 * 60,
            draft_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Longest accepted TTL for either draft lifetime: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn ttl_duration(secs: u64) -> chrono::Duration {
    // compile() rejects values above the cap; unchecked configs are clamped
    chrono::Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

impl DraftConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        ttl_duration(self.session_ttl_secs)
    }

    pub fn draft_ttl(&self) -> chrono::Duration {
        ttl_duration(self.draft_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in [
            ("drafts.session_ttl_secs", self.session_ttl_secs),
            ("drafts.draft_ttl_secs", self.draft_ttl_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
            if secs > MAX_TTL_SECS {
                return Err(ConfigError::invalid(field, format!("must not exceed {MAX_TTL_SECS}")));
            }
        }
        if self.draft_ttl_secs < self.session_ttl_secs {
            return Err(ConfigError::invalid(
                "drafts.draft_ttl_secs",
                "must not be shorter than drafts.session_ttl_secs",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub max_attempts: u32,
    pub busy_timeout_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            busy_timeout_ms: 2_000,
        }
    }
}

impl AllocatorConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub record_type: String,
    pub code_prefix: String,
    /// First present date field dates a committed record.
    pub date_fields: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            record_type: "procurement".into(),
            code_prefix: "CG".into(),
            date_fields: vec![
                "approval_date".into(),
                "announcement_date".into(),
                "publicity_date".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Seconds between background draft sweeps. Read once at startup.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8410".into(),
            sweep_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// ═══════════════════════════════════════════════════════════
// Runtime + hot reload
// ═══════════════════════════════════════════════════════════

/// Compiled, immutable view of one configuration.
#[derive(Debug)]
pub struct IntakeRuntime {
    pub config: IntakeConfig,
    pub classifier: FileClassifier,
    pub extractor: FieldExtractor,
    pub case_keys: CaseKeyResolver,
    pub loaded_at: DateTime<Utc>,
}

impl IntakeRuntime {
    /// Compile and validate. Any invalid part rejects the whole config.
    pub fn compile(config: IntakeConfig) -> Result<Self, ConfigError> {
        config.drafts.validate()?;
        if config.allocator.max_attempts == 0 {
            return Err(ConfigError::invalid("allocator.max_attempts", "must be positive"));
        }
        if config.ledger.record_type.trim().is_empty() {
            return Err(ConfigError::invalid("ledger.record_type", "must not be empty"));
        }

        let classifier = FileClassifier::from_config(&config.classifier)?;
        let extractor = FieldExtractor::from_config(&config.extraction)?;
        let case_keys = CaseKeyResolver::from_config(&config.case_key)?;

        Ok(Self {
            config,
            classifier,
            extractor,
            case_keys,
            loaded_at: Utc::now(),
        })
    }

    pub fn defaults() -> Result<Self, ConfigError> {
        Self::compile(IntakeConfig::default())
    }

    pub fn ttls(&self) -> DraftTtls {
        DraftTtls::from(&self.config.drafts)
    }
}

/// Shared handle to the current runtime.
#[derive(Debug)]
pub struct ConfigHandle {
    source: Option<PathBuf>,
    current: RwLock<Arc<IntakeRuntime>>,
}

impl ConfigHandle {
    pub fn new(runtime: IntakeRuntime, source: Option<PathBuf>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(runtime)),
        }
    }

    /// Load from `source` (or built-in defaults when `None`).
    pub fn load(source: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match &source {
            Some(path) => IntakeConfig::load(path)?,
            None => IntakeConfig::default(),
        };
        Ok(Self::new(IntakeRuntime::compile(config)?, source))
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn current(&self) -> Arc<IntakeRuntime> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the source file. On error the previous runtime stays active.
    pub fn reload(&self) -> Result<Arc<IntakeRuntime>, ConfigError> {
        let config = match &self.source {
            Some(path) => IntakeConfig::load(path)?,
            None => IntakeConfig::default(),
        };
        self.replace(config)
    }

    pub fn replace(&self, config: IntakeConfig) -> Result<Arc<IntakeRuntime>, ConfigError> {
        let runtime = match IntakeRuntime::compile(config) {
            Ok(runtime) => Arc::new(runtime),
            Err(e) => {
                tracing::warn!(error = %e, "Config rejected; keeping previous runtime");
                return Err(e);
            }
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = runtime.clone();
        tracing::info!(
            source = ?self.source,
            document_types = runtime.config.classifier.tokens.len(),
            "Config reloaded"
        );
        Ok(runtime)
    }
}

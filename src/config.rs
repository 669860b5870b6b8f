use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schedule::FailurePolicy;
use crate::store::{BLOCKS_CAPACITY, COLLECTION_CAPACITY, PAGE_INDEX_CAPACITY, RECORD_CAPACITY};

/// Key for the collection identifier.
pub const KEY_COLLECTION_ID: &str = "collection_id";
/// Key for the refresh interval (hours or minutes, depending on source kind).
pub const KEY_REFRESH_INTERVAL: &str = "refresh_interval";
/// Key for the bearer credential.
pub const KEY_CREDENTIAL: &str = "credential";

/// Key/value configuration lookup, as supplied by the host framework.
///
/// The scheduler re-reads its settings through this trait at every wake so a
/// host can change them between cycles.
pub trait ConfigSource {
    fn read_config(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Which remote shape the records come from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Flat table endpoint returning an array of records.
    Table,
    /// Authenticated database query followed by a page-content fetch.
    Database,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub refresh_interval: Option<i64>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub credential_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub sort: String,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default = "default_exclude_fields")]
    pub exclude_fields: Vec<String>,
    #[serde(default)]
    pub date_field: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_exclude_fields() -> Vec<String> {
    vec!["Created".to_string()]
}

impl SourceConfig {
    /// Field holding the creation timestamp used for the on-screen date.
    pub fn date_field(&self) -> &str {
        match (&self.date_field, self.kind) {
            (Some(field), _) => field,
            (None, SourceKind::Table) => "Created",
            (None, SourceKind::Database) => "created_time",
        }
    }

    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.kind) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, SourceKind::Table) => "https://notion-api.splitbee.io/v1/table",
            (None, SourceKind::Database) => "https://api.notion.com/v1",
        }
    }

    /// Explicit credential, falling back to the environment variable named
    /// by `credential_env`.
    pub fn resolve_credential(&self) -> Option<String> {
        if let Some(c) = self.credential.as_ref().filter(|c| !c.is_empty()) {
            return Some(c.clone());
        }
        self.credential_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("random-record-frame/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_collection_capacity")]
    pub collection_capacity: usize,
    #[serde(default = "default_record_capacity")]
    pub record_capacity: usize,
    #[serde(default = "default_page_index_capacity")]
    pub page_index_capacity: usize,
    #[serde(default = "default_blocks_capacity")]
    pub blocks_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            collection_capacity: COLLECTION_CAPACITY,
            record_capacity: RECORD_CAPACITY,
            page_index_capacity: PAGE_INDEX_CAPACITY,
            blocks_capacity: BLOCKS_CAPACITY,
        }
    }
}

fn default_collection_capacity() -> usize {
    COLLECTION_CAPACITY
}
fn default_record_capacity() -> usize {
    RECORD_CAPACITY
}
fn default_page_index_capacity() -> usize {
    PAGE_INDEX_CAPACITY
}
fn default_blocks_capacity() -> usize {
    BLOCKS_CAPACITY
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_full_refresh_after")]
    pub full_refresh_after: u32,
    #[serde(default)]
    pub on_failure: FailureMode,
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            full_refresh_after: default_full_refresh_after(),
            on_failure: FailureMode::default(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    #[default]
    Defer,
    Retry,
}

impl ScheduleConfig {
    pub fn failure_policy(&self) -> FailurePolicy {
        match self.on_failure {
            FailureMode::Defer => FailurePolicy::Defer,
            FailureMode::Retry => FailurePolicy::RetryAfter {
                secs: self.retry_after_secs,
            },
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/schedule.json")
}
fn default_full_refresh_after() -> u32 {
    20
}
fn default_retry_after_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_true_token")]
    pub true_token: String,
    #[serde(default = "default_false_token")]
    pub false_token: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            true_token: default_true_token(),
            false_token: default_false_token(),
        }
    }
}

fn default_title() -> String {
    "Random Record".to_string()
}
fn default_true_token() -> String {
    "yes".to_string()
}
fn default_false_token() -> String {
    "no".to_string()
}

impl ConfigSource for Config {
    fn read_config(&self, key: &str) -> Option<String> {
        match key {
            KEY_COLLECTION_ID => Some(self.source.collection_id.clone()),
            KEY_REFRESH_INTERVAL => self.source.refresh_interval.map(|i| i.to_string()),
            KEY_CREDENTIAL => self.source.resolve_credential(),
            _ => None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate memory
    let memory = &config.memory;
    if memory.collection_capacity == 0
        || memory.record_capacity == 0
        || memory.page_index_capacity == 0
        || memory.blocks_capacity == 0
    {
        bail!("memory capacities must be > 0");
    }
    if memory.record_capacity > memory.collection_capacity {
        bail!("memory.record_capacity must not exceed memory.collection_capacity");
    }

    // Validate http
    if config.http.timeout_secs == 0 {
        bail!("http.timeout_secs must be > 0");
    }

    // Validate schedule
    if config.schedule.on_failure == FailureMode::Retry && config.schedule.retry_after_secs == 0 {
        bail!("schedule.retry_after_secs must be > 0 when on_failure is 'retry'");
    }

    if config.display.true_token.is_empty() || config.display.false_token.is_empty() {
        bail!("display.true_token and display.false_token must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(
            r#"
[source]
kind = "table"
collection_id = "abc"
"#,
        )
        .unwrap();
        assert_eq!(config.source.kind, SourceKind::Table);
        assert_eq!(config.source.exclude_fields, vec!["Created".to_string()]);
        assert_eq!(config.source.date_field(), "Created");
        assert!(config.source.ascending);
        assert_eq!(config.memory.collection_capacity, COLLECTION_CAPACITY);
        assert_eq!(config.memory.record_capacity, RECORD_CAPACITY);
        assert_eq!(config.schedule.full_refresh_after, 20);
        assert_eq!(config.schedule.failure_policy(), FailurePolicy::Defer);
        assert_eq!(
            config.source.base_url(),
            "https://notion-api.splitbee.io/v1/table"
        );
    }

    #[test]
    fn test_database_defaults() {
        let config = parse_config(
            r#"
[source]
kind = "database"
collection_id = "db1"
credential = "secret"
base_url = "http://localhost:8888/v1/"
"#,
        )
        .unwrap();
        assert_eq!(config.source.date_field(), "created_time");
        assert_eq!(config.source.base_url(), "http://localhost:8888/v1");
        assert_eq!(
            config.read_config(KEY_CREDENTIAL).as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn test_retry_policy() {
        let config = parse_config(
            r#"
[source]
kind = "table"

[schedule]
on_failure = "retry"
retry_after_secs = 120
"#,
        )
        .unwrap();
        assert_eq!(
            config.schedule.failure_policy(),
            FailurePolicy::RetryAfter { secs: 120 }
        );
    }

    #[test]
    fn test_rejects_zero_retry() {
        let result = parse_config(
            r#"
[source]
kind = "table"

[schedule]
on_failure = "retry"
retry_after_secs = 0
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_record_larger_than_collection() {
        let result = parse_config(
            r#"
[source]
kind = "table"

[memory]
collection_capacity = 1024
record_capacity = 2048
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let result = parse_config(
            r#"
[source]
kind = "spreadsheet"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_read_config_keys() {
        let config = parse_config(
            r#"
[source]
kind = "table"
collection_id = "abc"
refresh_interval = 3
"#,
        )
        .unwrap();
        assert_eq!(config.read_config(KEY_COLLECTION_ID).as_deref(), Some("abc"));
        assert_eq!(config.read_config(KEY_REFRESH_INTERVAL).as_deref(), Some("3"));
        assert_eq!(config.read_config(KEY_CREDENTIAL), None);
        assert_eq!(config.read_config("unknown"), None);
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/frame.example.toml")).unwrap();
        assert_eq!(config.source.kind, SourceKind::Table);
        assert_eq!(config.source.refresh_interval, Some(2));
        assert_eq!(config.schedule.failure_policy(), FailurePolicy::Defer);
        assert_eq!(config.display.title, "Random Record");
    }
}

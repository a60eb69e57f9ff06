use crate::domain::model::{CompletenessRule, Language};
use crate::utils::error::{HarvestError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_selector, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_OUTLET_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_CEILING: u32 = 3;
const DEFAULT_BATCH_LIMIT: usize = 20;
const DEFAULT_USER_AGENT: &str = concat!("signal-harvest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub http: Option<HttpConfig>,
    pub aggregation: Option<AggregationConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    #[serde(default)]
    pub feed_groups: Vec<FeedGroupConfig>,
    #[serde(default)]
    pub feeds: Vec<FeedSourceConfig>,
    #[serde(default)]
    pub outlets: Vec<OutletConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// 排程呼叫端需帶上的密鑰
    pub caller_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub source_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub retry_ceiling: Option<u32>,
    pub default_batch_limit: Option<usize>,
}

/// 來源家族（例如某部門的新聞公報）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedGroupConfig {
    pub name: String,
    pub required_languages: Vec<Language>,
    pub mergeable: Option<bool>,
    /// 列表只提供英文版本
    pub english_only: Option<bool>,
    /// 語言 -> URL 路徑片段，例如 en = "/en/"、zh-Hant = "/tc/"
    pub url_patterns: Option<BTreeMap<Language, String>>,
    pub extractor: Option<ExtractorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub title_selector: Option<String>,
    pub body_selector: String,
    pub strip_selectors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    pub id: String,
    pub feed_group: String,
    pub kind: FeedKind,
    pub url: String,
    pub language: Language,
    pub enabled: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub max_items: Option<usize>,
    pub headers: Option<HashMap<String, String>>,
    /// JSON 來源：items 陣列所在的點號路徑，例如 "data.items"
    pub items_path: Option<String>,
    /// JSON 來源：欄位對應，key 為 title/link/body/published_at/external_id
    pub field_mapping: Option<HashMap<String, String>>,
}

impl FeedSourceConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn mapped_field<'a>(&'a self, field: &'a str) -> &'a str {
        self.field_mapping
            .as_ref()
            .and_then(|m| m.get(field))
            .map(String::as_str)
            .unwrap_or(field)
    }

    /// 單次 HTTP 請求的逾時；未設定時沿用 client 預設值
    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletConfig {
    pub name: String,
    pub category: String,
    pub index_url: String,
    pub link_selector: String,
    pub title_selector: Option<String>,
    pub body_selector: String,
    pub enabled: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub max_articles: Option<usize>,
    pub concurrent_requests: Option<usize>,
}

impl OutletConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_OUTLET_TIMEOUT_SECS))
    }
}

impl HarvestConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(HarvestError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| HarvestError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CRON_SECRET})
    fn substitute_env_vars(content: &str) -> String {
        static RE_ENV: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new(r"\$\{([^}]+)\}").unwrap());

        RE_ENV
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("service.name", &self.service.name)?;
        validate_path("storage.path", &self.storage.path)?;

        if let Some(secret) = &self.service.caller_secret {
            validate_non_empty_string("service.caller_secret", secret)?;
            if secret.starts_with("${") {
                return Err(HarvestError::InvalidConfigValueError {
                    field: "service.caller_secret".to_string(),
                    value: secret.clone(),
                    reason: "Environment variable was not set".to_string(),
                });
            }
        }

        validate_range("enrichment.retry_ceiling", self.retry_ceiling(), 0, 100)?;
        validate_positive_number("enrichment.default_batch_limit", self.default_batch_limit(), 1)?;

        let mut group_names = HashSet::new();
        for group in &self.feed_groups {
            validate_non_empty_string("feed_groups.name", &group.name)?;
            if !group_names.insert(group.name.as_str()) {
                return Err(HarvestError::InvalidConfigValueError {
                    field: "feed_groups.name".to_string(),
                    value: group.name.clone(),
                    reason: "Duplicate feed group".to_string(),
                });
            }
            if group.required_languages.is_empty() {
                return Err(HarvestError::InvalidConfigValueError {
                    field: format!("feed_groups.{}.required_languages", group.name),
                    value: "[]".to_string(),
                    reason: "At least one language is required".to_string(),
                });
            }
            if let Some(extractor) = &group.extractor {
                validate_selector("extractor.body_selector", &extractor.body_selector)?;
                if let Some(title) = &extractor.title_selector {
                    validate_selector("extractor.title_selector", title)?;
                }
                for strip in extractor.strip_selectors.iter().flatten() {
                    validate_selector("extractor.strip_selectors", strip)?;
                }
            }
        }

        let mut feed_ids = HashSet::new();
        for feed in &self.feeds {
            validate_non_empty_string("feeds.id", &feed.id)?;
            if !feed_ids.insert(feed.id.as_str()) {
                return Err(HarvestError::InvalidConfigValueError {
                    field: "feeds.id".to_string(),
                    value: feed.id.clone(),
                    reason: "Duplicate feed id".to_string(),
                });
            }
            validate_url(&format!("feeds.{}.url", feed.id), &feed.url)?;
            if !group_names.contains(feed.feed_group.as_str()) {
                return Err(HarvestError::InvalidConfigValueError {
                    field: format!("feeds.{}.feed_group", feed.id),
                    value: feed.feed_group.clone(),
                    reason: "Feed group is not declared in [[feed_groups]]".to_string(),
                });
            }
        }

        let mut outlet_names = HashSet::new();
        for outlet in &self.outlets {
            validate_non_empty_string("outlets.name", &outlet.name)?;
            if !outlet_names.insert(outlet.name.as_str()) {
                return Err(HarvestError::InvalidConfigValueError {
                    field: "outlets.name".to_string(),
                    value: outlet.name.clone(),
                    reason: "Duplicate outlet".to_string(),
                });
            }
            validate_non_empty_string(&format!("outlets.{}.category", outlet.name), &outlet.category)?;
            validate_url(&format!("outlets.{}.index_url", outlet.name), &outlet.index_url)?;
            validate_selector("outlets.link_selector", &outlet.link_selector)?;
            validate_selector("outlets.body_selector", &outlet.body_selector)?;
            if let Some(title) = &outlet.title_selector {
                validate_selector("outlets.title_selector", title)?;
            }
            if let Some(concurrency) = outlet.concurrent_requests {
                validate_range("outlets.concurrent_requests", concurrency, 1, 32)?;
            }
        }

        Ok(())
    }

    pub fn feed_group(&self, name: &str) -> Option<&FeedGroupConfig> {
        self.feed_groups.iter().find(|g| g.name == name)
    }

    /// 未宣告的 feed group 只以 meta_urls 判斷完成度
    pub fn completeness_rule(&self, feed_group: &str) -> CompletenessRule {
        match self.feed_group(feed_group) {
            Some(group) => CompletenessRule::new(
                group.required_languages.iter().copied(),
                group.english_only.unwrap_or(false),
            ),
            None => CompletenessRule::default(),
        }
    }

    pub fn is_mergeable(&self, feed_group: &str) -> bool {
        self.feed_group(feed_group)
            .and_then(|g| g.mergeable)
            .unwrap_or(true)
    }

    pub fn enabled_feeds(&self) -> impl Iterator<Item = &FeedSourceConfig> {
        self.feeds.iter().filter(|f| f.is_enabled())
    }

    pub fn caller_secret(&self) -> Option<&str> {
        self.service.caller_secret.as_deref()
    }

    pub fn retry_ceiling(&self) -> u32 {
        self.enrichment
            .as_ref()
            .and_then(|e| e.retry_ceiling)
            .unwrap_or(DEFAULT_RETRY_CEILING)
    }

    pub fn default_batch_limit(&self) -> usize {
        self.enrichment
            .as_ref()
            .and_then(|e| e.default_batch_limit)
            .unwrap_or(DEFAULT_BATCH_LIMIT)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.http
                .as_ref()
                .and_then(|h| h.timeout_seconds)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        )
    }

    pub fn user_agent(&self) -> &str {
        self.http
            .as_ref()
            .and_then(|h| h.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn source_timeout(&self, feed: &FeedSourceConfig) -> Duration {
        let default = self
            .aggregation
            .as_ref()
            .and_then(|a| a.source_timeout_seconds)
            .unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS);
        Duration::from_secs(feed.timeout_seconds.unwrap_or(default))
    }
}

impl Validate for HarvestConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r##"
[service]
name = "hk-signals"
caller_secret = "s3cret"

[storage]
path = "./data"

[enrichment]
retry_ceiling = 2

[[feed_groups]]
name = "td_press"
required_languages = ["en", "zh-Hant"]
url_patterns = { en = "/en/", "zh-Hant" = "/tc/" }

[feed_groups.extractor]
title_selector = "h1"
body_selector = "#pressrelease"

[[feeds]]
id = "td_press_en"
feed_group = "td_press"
kind = "rss"
url = "https://www.td.gov.hk/en/rss.xml"
language = "en"

[[outlets]]
name = "autoblog"
category = "cars"
index_url = "https://www.autoblog.example/news"
link_selector = "article a.headline"
body_selector = "div.article-body"
timeout_seconds = 120
"##;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = HarvestConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.service.name, "hk-signals");
        assert_eq!(config.caller_secret(), Some("s3cret"));
        assert_eq!(config.retry_ceiling(), 2);
        assert_eq!(config.default_batch_limit(), 20);
        assert_eq!(config.feeds[0].language, Language::En);
        assert_eq!(config.feeds[0].kind, FeedKind::Rss);
        assert!(config.is_mergeable("td_press"));
        assert_eq!(config.outlets[0].timeout(), Duration::from_secs(120));

        let patterns = config.feed_group("td_press").unwrap().url_patterns.as_ref().unwrap();
        assert_eq!(patterns.get(&Language::ZhHant).map(String::as_str), Some("/tc/"));

        let rule = config.completeness_rule("td_press");
        assert!(rule.required_languages.contains(&Language::ZhHant));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TEST_HARVEST_SECRET", "from-env");

        let content = BASIC.replace("\"s3cret\"", "\"${TEST_HARVEST_SECRET}\"");
        let config = HarvestConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.caller_secret(), Some("from-env"));

        std::env::remove_var("TEST_HARVEST_SECRET");
    }

    #[test]
    fn test_unset_secret_variable_fails_validation() {
        let content = BASIC.replace("\"s3cret\"", "\"${HARVEST_SECRET_THAT_IS_NOT_SET}\"");
        let config = HarvestConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_feed_with_undeclared_group_is_rejected() {
        let content = BASIC.replace("feed_group = \"td_press\"", "feed_group = \"nowhere\"");
        let config = HarvestConfig::from_toml_str(&content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidConfigValueError { .. }));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let content = BASIC.replace("#pressrelease", "div[[");
        let config = HarvestConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_language_fails_to_parse() {
        let content = BASIC.replace("\"zh-Hant\"]", "\"fr\"]");
        assert!(HarvestConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = HarvestConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.enabled_feeds().count(), 1);
    }
}

use crate::utils::error::{HarvestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// 內容語言。新語言加在這裡，序列化代碼由 `code()` 決定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Language {
    En,
    ZhHant,
    ZhHans,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::ZhHant, Language::ZhHans];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::ZhHant => "zh-Hant",
            Language::ZhHans => "zh-Hans",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "en" | "en-us" | "en-gb" | "en-hk" | "eng" => Ok(Language::En),
            "zh-hant" | "zh-hk" | "zh-tw" | "zh-mo" | "tc" => Ok(Language::ZhHant),
            "zh-hans" | "zh-cn" | "zh-sg" | "sc" => Ok(Language::ZhHans),
            other => Err(HarvestError::validation(format!(
                "unsupported language code: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Language {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Language> for &'static str {
    fn from(lang: Language) -> Self {
        lang.code()
    }
}

/// 多語內容的完成狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    ContentPartial,
    EnglishOnly,
    ContentComplete,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::ContentPartial => "content_partial",
            ProcessingStatus::EnglishOnly => "english_only",
            ProcessingStatus::ContentComplete => "content_complete",
        }
    }

    /// 仍需補抓內容的狀態
    pub fn is_incomplete(&self) -> bool {
        !matches!(self, ProcessingStatus::ContentComplete)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 單一來源、單一語言的原始項目，只存在於一次彙整之中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub language: Language,
    pub title: String,
    pub link: String,
    pub body: Option<String>,
    pub published_at: DateTime<Utc>,
    /// 來源沒給發佈時間，published_at 只是抓取時間
    #[serde(default)]
    pub published_at_estimated: bool,
    pub external_id: String,
}

impl RawItem {
    /// Adapter 輸出轉為型別化模型的驗證邊界
    pub fn new(
        source_id: impl Into<String>,
        language: Language,
        title: impl AsRef<str>,
        link: impl AsRef<str>,
        published_at: DateTime<Utc>,
    ) -> Result<Self> {
        let source_id = source_id.into();
        let title = title.as_ref().trim().to_string();
        if title.is_empty() {
            return Err(HarvestError::validation(format!(
                "item from '{}' has an empty title",
                source_id
            )));
        }

        let link = link.as_ref().trim();
        let parsed = Url::parse(link).map_err(|e| {
            HarvestError::validation(format!("item '{}' has invalid link '{}': {}", title, link, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HarvestError::validation(format!(
                "item '{}' has non-http link '{}'",
                title, link
            )));
        }

        Ok(Self {
            source_id,
            language,
            title,
            link: parsed.to_string(),
            body: None,
            published_at,
            published_at_estimated: false,
            external_id: String::new(),
        })
    }

    /// 沒有發佈時間的項目：以抓取時間代替並標記
    pub fn with_estimated_date(mut self) -> Self {
        self.published_at_estimated = true;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.trim().is_empty() { None } else { Some(body) };
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into().trim().to_string();
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.trim().is_empty())
    }

    pub fn link_host(&self) -> Option<String> {
        Url::parse(&self.link)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

/// Signal.languages[lang] 的值物件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageContent {
    pub title: String,
    pub body: String,
    pub link: String,
    pub scraped_at: Option<DateTime<Utc>>,
}

impl LanguageContent {
    /// 由列表項目建立；列表已附內文時才記錄抓取時間
    pub fn listing(
        title: impl Into<String>,
        link: impl Into<String>,
        body: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let body = body.map(str::trim).unwrap_or_default().to_string();
        let scraped_at = if body.is_empty() { None } else { Some(fetched_at) };
        Self {
            title: title.into(),
            body,
            link: link.into(),
            scraped_at,
        }
    }

    /// 補抓成功的內容；空內文不得帶有 scraped_at
    pub fn scraped(
        title: impl Into<String>,
        body: impl Into<String>,
        link: impl Into<String>,
        scraped_at: DateTime<Utc>,
    ) -> Result<Self> {
        let body = body.into().trim().to_string();
        if body.is_empty() {
            return Err(HarvestError::validation("scraped content has an empty body"));
        }
        Ok(Self {
            title: title.into(),
            body,
            link: link.into(),
            scraped_at: Some(scraped_at),
        })
    }

    pub fn has_body(&self) -> bool {
        !self.body.trim().is_empty()
    }
}

/// 判斷 processing_status 的規則，由 feed group 設定產生
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessRule {
    pub required_languages: BTreeSet<Language>,
    pub english_only_source: bool,
}

impl CompletenessRule {
    pub fn new(required_languages: impl IntoIterator<Item = Language>, english_only_source: bool) -> Self {
        Self {
            required_languages: required_languages.into_iter().collect(),
            english_only_source,
        }
    }

    /// 設定語言與 meta_urls 的聯集
    pub fn required_for(&self, signal: &Signal) -> BTreeSet<Language> {
        self.required_languages
            .iter()
            .copied()
            .chain(signal.meta_urls.keys().copied())
            .collect()
    }

    pub fn evaluate(&self, signal: &Signal) -> ProcessingStatus {
        let with_body = signal.content_languages();
        let required = self.required_for(signal);

        if !required.is_empty() && required.iter().all(|lang| with_body.contains(lang)) {
            return ProcessingStatus::ContentComplete;
        }

        let english_only_content =
            with_body.len() == 1 && with_body.contains(&Language::En);
        if english_only_content && self.english_only_source {
            ProcessingStatus::EnglishOnly
        } else {
            ProcessingStatus::ContentPartial
        }
    }
}

/// 去重後的標準紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source_identifier: String,
    pub feed_group: String,
    pub languages: BTreeMap<Language, LanguageContent>,
    pub meta_urls: BTreeMap<Language, String>,
    pub processing_status: ProcessingStatus,
    pub retry_count: u32,
    #[serde(default)]
    pub scrape_failures: BTreeMap<Language, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    /// 以 patch 建立新紀錄。沒有任何語言內容的 Signal 不合法
    pub fn from_patch(patch: &SignalPatch) -> Result<Self> {
        if patch.languages.is_empty() {
            return Err(HarvestError::validation(format!(
                "signal {} has no language content",
                patch.source_identifier
            )));
        }

        let mut signal = Self {
            source_identifier: patch.source_identifier.clone(),
            feed_group: patch.feed_group.clone(),
            languages: BTreeMap::new(),
            meta_urls: BTreeMap::new(),
            processing_status: ProcessingStatus::ContentPartial,
            retry_count: 0,
            scrape_failures: BTreeMap::new(),
            created_at: patch.at,
            updated_at: patch.at,
        };
        signal.apply_patch(patch);
        signal.updated_at = patch.at;
        Ok(signal)
    }

    /// 已有內文的語言
    pub fn content_languages(&self) -> BTreeSet<Language> {
        self.languages
            .iter()
            .filter(|(_, content)| content.has_body())
            .map(|(lang, _)| *lang)
            .collect()
    }

    pub fn has_body(&self, lang: Language) -> bool {
        self.languages.get(&lang).is_some_and(LanguageContent::has_body)
    }

    /// 需要補抓的語言：必要語言中尚無內文者
    pub fn missing_languages(&self, rule: &CompletenessRule) -> Vec<Language> {
        rule.required_for(self)
            .into_iter()
            .filter(|lang| !self.has_body(*lang))
            .collect()
    }

    /// 以加法方式套用 patch，回傳是否有任何欄位改變。
    /// 已有內文的語言永遠不會被清空或移除。
    pub fn apply_patch(&mut self, patch: &SignalPatch) -> bool {
        let mut changed = false;

        for (lang, incoming) in &patch.languages {
            match self.languages.get_mut(lang) {
                None => {
                    self.languages.insert(*lang, incoming.clone());
                    changed = true;
                }
                Some(existing) if existing.has_body() => {}
                Some(existing) => {
                    if incoming.has_body() {
                        *existing = incoming.clone();
                        changed = true;
                    } else if existing.title.is_empty() && !incoming.title.is_empty() {
                        existing.title = incoming.title.clone();
                        changed = true;
                    }
                }
            }
            if self.has_body(*lang) && self.scrape_failures.remove(lang).is_some() {
                changed = true;
            }
        }

        for (lang, url) in &patch.meta_urls {
            if !self.meta_urls.contains_key(lang) {
                self.meta_urls.insert(*lang, url.clone());
                changed = true;
            }
        }

        for (lang, reason) in &patch.failures {
            if self.has_body(*lang) {
                continue;
            }
            if self.scrape_failures.get(lang) != Some(reason) {
                self.scrape_failures.insert(*lang, reason.clone());
                changed = true;
            }
        }

        if patch.retry_increment > 0 {
            self.retry_count = self.retry_count.saturating_add(patch.retry_increment);
            changed = true;
        }

        let status = patch.rule.evaluate(self);
        if status != self.processing_status {
            self.processing_status = status;
            changed = true;
        }

        if changed {
            self.updated_at = patch.at;
        }
        changed
    }
}

/// 欄位範圍的更新，由儲存層以加法方式合併
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPatch {
    pub source_identifier: String,
    pub feed_group: String,
    pub languages: BTreeMap<Language, LanguageContent>,
    pub meta_urls: BTreeMap<Language, String>,
    pub retry_increment: u32,
    pub failures: BTreeMap<Language, String>,
    pub rule: CompletenessRule,
    pub at: DateTime<Utc>,
}

impl SignalPatch {
    pub fn new(
        source_identifier: impl Into<String>,
        feed_group: impl Into<String>,
        rule: CompletenessRule,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            feed_group: feed_group.into(),
            languages: BTreeMap::new(),
            meta_urls: BTreeMap::new(),
            retry_increment: 0,
            failures: BTreeMap::new(),
            rule,
            at,
        }
    }

    pub fn with_language(mut self, lang: Language, content: LanguageContent) -> Self {
        self.languages.insert(lang, content);
        self
    }

    pub fn with_meta_url(mut self, lang: Language, url: impl Into<String>) -> Self {
        self.meta_urls.insert(lang, url.into());
        self
    }

    /// 記錄一次失敗：retry_count +1 並保留原因
    pub fn record_failure(&mut self, lang: Language, reason: impl Into<String>) {
        self.retry_increment += 1;
        self.failures.insert(lang, reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
            && self.meta_urls.is_empty()
            && self.failures.is_empty()
            && self.retry_increment == 0
    }
}

/// 一次補抓嘗試的結果，不單獨持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeAttemptResult {
    pub source_identifier: String,
    pub success: bool,
    pub languages_processed: Vec<Language>,
    pub error: Option<String>,
    pub details: HashMap<String, serde_json::Value>,
}

impl ScrapeAttemptResult {
    pub fn failed(source_identifier: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            success: false,
            languages_processed: Vec::new(),
            error: Some(error.into()),
            details: HashMap::new(),
        }
    }
}

/// 單一 outlet 的執行結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutletScrapeResult {
    pub outlet: String,
    pub articles_found: usize,
    pub articles_saved: usize,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// OutletScraper::fetch_and_save 的回傳
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutletFetchSummary {
    pub articles_found: usize,
    pub articles_saved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArticleKey {
    pub category: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Outlet 抓回的文章，以 (category, source, created_at) 為鍵
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub category: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn key(&self) -> ArticleKey {
        ArticleKey {
            category: self.category.clone(),
            source: self.source.clone(),
            created_at: self.created_at,
        }
    }
}

/// process_all_feeds 的彙總
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSummary {
    pub processed: usize,
    pub grouped: usize,
    pub stored: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub sources_failed: usize,
    pub errors: Vec<String>,
}

/// process_incomplete_signals 的彙總
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub results: Vec<ScrapeAttemptResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub total_signals: usize,
    pub by_status: BTreeMap<ProcessingStatus, usize>,
    pub by_feed_group: BTreeMap<String, usize>,
    pub over_retry_ceiling: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCoverage {
    pub populated: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapingStatistics {
    pub total_signals: usize,
    pub incomplete: usize,
    pub eligible_for_enrichment: usize,
    pub over_retry_ceiling: usize,
    pub total_retries: u64,
    pub by_language: BTreeMap<Language, LanguageCoverage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
    }

    fn bilingual() -> CompletenessRule {
        CompletenessRule::new([Language::En, Language::ZhHant], false)
    }

    fn listing(title: &str, body: Option<&str>) -> LanguageContent {
        LanguageContent::listing(title, "https://www.info.gov.hk/gia/general/202406/03/P1.htm", body, at(8))
    }

    #[test]
    fn test_language_codes_parse_leniently() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("zh-HK".parse::<Language>().unwrap(), Language::ZhHant);
        assert_eq!("tc".parse::<Language>().unwrap(), Language::ZhHant);
        assert_eq!("zh_CN".parse::<Language>().unwrap(), Language::ZhHans);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serializes_as_code() {
        let json = serde_json::to_string(&Language::ZhHant).unwrap();
        assert_eq!(json, "\"zh-Hant\"");

        let mut map = BTreeMap::new();
        map.insert(Language::En, 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"en":1}"#);
        let back: BTreeMap<Language, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&Language::En), Some(&1));
    }

    #[test]
    fn test_raw_item_rejects_bad_input() {
        assert!(RawItem::new("td", Language::En, "  ", "https://td.gov.hk/a", at(1)).is_err());
        assert!(RawItem::new("td", Language::En, "Title", "not a url", at(1)).is_err());
        assert!(RawItem::new("td", Language::En, "Title", "ftp://td.gov.hk/a", at(1)).is_err());

        let item = RawItem::new("td", Language::En, " Title ", "https://TD.gov.hk/a", at(1))
            .unwrap()
            .with_body("   ");
        assert_eq!(item.title, "Title");
        assert!(!item.has_body());
        assert_eq!(item.link_host().as_deref(), Some("td.gov.hk"));
    }

    #[test]
    fn test_scraped_content_requires_body() {
        assert!(LanguageContent::scraped("t", "   ", "https://x.hk", at(1)).is_err());
        let content = LanguageContent::scraped("t", "body", "https://x.hk", at(1)).unwrap();
        assert_eq!(content.scraped_at, Some(at(1)));

        let empty_listing = listing("t", None);
        assert!(empty_listing.scraped_at.is_none());
    }

    #[test]
    fn test_signal_without_languages_is_rejected() {
        let patch = SignalPatch::new("td_press:abc", "td_press", bilingual(), at(1));
        assert!(Signal::from_patch(&patch).is_err());
    }

    #[test]
    fn test_apply_patch_never_downgrades_body() {
        let patch = SignalPatch::new("td_press:abc", "td_press", bilingual(), at(1))
            .with_language(Language::En, listing("Flood warning", Some("Heavy rain expected")))
            .with_meta_url(Language::En, "https://www.td.gov.hk/en/p1.htm");
        let mut signal = Signal::from_patch(&patch).unwrap();

        let downgrade = SignalPatch::new("td_press:abc", "td_press", bilingual(), at(2))
            .with_language(Language::En, listing("Flood warning (updated)", None));
        assert!(!signal.apply_patch(&downgrade));
        assert_eq!(signal.languages[&Language::En].body, "Heavy rain expected");
        assert_eq!(signal.updated_at, at(1));
    }

    #[test]
    fn test_apply_patch_fills_empty_body_and_clears_failure() {
        let patch = SignalPatch::new("td_press:abc", "td_press", bilingual(), at(1))
            .with_language(Language::En, listing("Flood warning", Some("Heavy rain")))
            .with_language(Language::ZhHant, listing("水浸警告", None))
            .with_meta_url(Language::En, "https://www.td.gov.hk/en/p1.htm")
            .with_meta_url(Language::ZhHant, "https://www.td.gov.hk/tc/p1.htm");
        let mut signal = Signal::from_patch(&patch).unwrap();
        assert_eq!(signal.processing_status, ProcessingStatus::ContentPartial);

        let mut failed = SignalPatch::new("td_press:abc", "td_press", bilingual(), at(2));
        failed.record_failure(Language::ZhHant, "HTTP 503");
        assert!(signal.apply_patch(&failed));
        assert_eq!(signal.retry_count, 1);
        assert_eq!(signal.scrape_failures[&Language::ZhHant], "HTTP 503");

        let filled = SignalPatch::new("td_press:abc", "td_press", bilingual(), at(3)).with_language(
            Language::ZhHant,
            LanguageContent::scraped("水浸警告", "預計有大雨", "https://www.td.gov.hk/tc/p1.htm", at(3))
                .unwrap(),
        );
        assert!(signal.apply_patch(&filled));
        assert!(signal.scrape_failures.is_empty());
        assert_eq!(signal.retry_count, 1);
        assert_eq!(signal.processing_status, ProcessingStatus::ContentComplete);
        assert_eq!(signal.updated_at, at(3));
    }

    #[test]
    fn test_completeness_counts_meta_urls_and_english_only() {
        let english_rule = CompletenessRule::new([Language::En], true);
        let patch = SignalPatch::new("hko:1", "hko", english_rule.clone(), at(1))
            .with_language(Language::En, listing("Typhoon", Some("Signal 8")))
            .with_meta_url(Language::En, "https://hko.gov.hk/en/1.htm");
        let signal = Signal::from_patch(&patch).unwrap();
        assert_eq!(signal.processing_status, ProcessingStatus::ContentComplete);

        // A Chinese URL appeared: the Chinese body is now required too.
        let mut signal = signal;
        let with_zh = SignalPatch::new("hko:1", "hko", english_rule.clone(), at(2))
            .with_meta_url(Language::ZhHant, "https://hko.gov.hk/tc/1.htm");
        signal.apply_patch(&with_zh);
        assert_eq!(signal.processing_status, ProcessingStatus::EnglishOnly);

        let bilingual_patch = SignalPatch::new("x:1", "x", bilingual(), at(1))
            .with_language(Language::En, listing("A", Some("body")));
        let partial = Signal::from_patch(&bilingual_patch).unwrap();
        assert_eq!(partial.processing_status, ProcessingStatus::ContentPartial);
        assert_eq!(partial.missing_languages(&bilingual()), vec![Language::ZhHant]);
    }
}

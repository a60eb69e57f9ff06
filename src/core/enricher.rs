use crate::adapters::html::HtmlContentExtractor;
use crate::config::toml_config::HarvestConfig;
use crate::domain::model::{
    EnrichmentSummary, Language, LanguageContent, ProcessingStatistics, ProcessingStatus, ScrapeAttemptResult,
    ScrapingStatistics, Signal, SignalPatch,
};
use crate::domain::ports::{ContentExtractor, SignalFilter, SignalOrder, SignalStore};
use crate::utils::error::{HarvestError, Result};
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// feed group -> 頁面 extractor
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_group: HashMap<String, Arc<dyn ContentExtractor>>,
    fallback: Option<Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 有 [feed_groups.extractor] 的群組用自己的 selector，其餘用通用版本
    pub fn from_config(config: &HarvestConfig, client: Client) -> Result<Self> {
        let mut registry = Self::new();
        for group in &config.feed_groups {
            if let Some(extractor) = &group.extractor {
                registry.register(
                    &group.name,
                    Arc::new(HtmlContentExtractor::new(client.clone(), &group.name, extractor)?),
                );
            }
        }
        registry.fallback = Some(Arc::new(HtmlContentExtractor::generic(client, "generic")?));
        Ok(registry)
    }

    pub fn register(&mut self, feed_group: impl Into<String>, extractor: Arc<dyn ContentExtractor>) {
        self.by_group.insert(feed_group.into(), extractor);
    }

    pub fn with_fallback(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.fallback = Some(extractor);
        self
    }

    pub fn get(&self, feed_group: &str) -> Option<Arc<dyn ContentExtractor>> {
        self.by_group
            .get(feed_group)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

/// 以其他語言的網址套用路徑片段規則推出目標語言網址，例如 /en/ -> /tc/
pub fn resolve_language_url(
    meta_urls: &BTreeMap<Language, String>,
    target: Language,
    patterns: &BTreeMap<Language, String>,
) -> Option<String> {
    let to = patterns.get(&target)?;
    meta_urls
        .iter()
        .filter(|(lang, _)| **lang != target)
        .find_map(|(lang, url)| {
            let from = patterns.get(lang)?;
            url.contains(from.as_str())
                .then(|| url.replacen(from.as_str(), to, 1))
        })
}

enum LanguageOutcome {
    Scraped(Language, LanguageContent),
    Failed(Language, String),
}

/// 補齊既有 Signal 缺少的語言內文
pub struct SignalsScraper {
    config: Arc<HarvestConfig>,
    store: Arc<dyn SignalStore>,
    extractors: ExtractorRegistry,
}

impl SignalsScraper {
    pub fn new(config: Arc<HarvestConfig>, store: Arc<dyn SignalStore>, extractors: ExtractorRegistry) -> Self {
        Self {
            config,
            store,
            extractors,
        }
    }

    /// 依 updated_at 由舊到新處理最多 limit 筆未完成且未超過重試上限的 Signal
    pub async fn process_incomplete_signals(&self, limit: usize) -> Result<EnrichmentSummary> {
        let ceiling = self.config.retry_ceiling();
        let signals = self
            .store
            .query_signals(&SignalFilter::incomplete(ceiling), Some(limit), SignalOrder::UpdatedAtAsc)
            .await?;

        tracing::info!("🔍 Enriching {} incomplete signals (limit {}, ceiling {})", signals.len(), limit, ceiling);

        let mut summary = EnrichmentSummary::default();
        for signal in signals {
            let result = self.enrich(signal).await;
            summary.processed += 1;
            if !result.languages_processed.is_empty() {
                summary.updated += 1;
            }
            if result.error.is_some() {
                summary.failed += 1;
            }
            summary.results.push(result);
        }

        tracing::info!(
            "✅ Enrichment done: {} processed, {} updated, {} with failures",
            summary.processed,
            summary.updated,
            summary.failed
        );
        Ok(summary)
    }

    /// 指定單筆，不受重試上限限制
    pub async fn process_single_signal_by_id(&self, id: &str) -> ScrapeAttemptResult {
        match self.store.find_signal_by_key(id).await {
            Ok(Some(signal)) => {
                if signal.retry_count > self.config.retry_ceiling() {
                    tracing::info!(signal = %id, "Manual retry past ceiling (retry_count {})", signal.retry_count);
                }
                self.enrich(signal).await
            }
            Ok(None) => ScrapeAttemptResult::failed(id, "signal not found"),
            Err(e) => ScrapeAttemptResult::failed(id, e.to_string()),
        }
    }

    async fn enrich(&self, signal: Signal) -> ScrapeAttemptResult {
        let id = signal.source_identifier.clone();
        let rule = self.config.completeness_rule(&signal.feed_group);
        let missing = signal.missing_languages(&rule);

        if missing.is_empty() {
            // 沒有缺漏仍要依目前規則重算一次狀態，避免舊狀態一直佔住批次
            let patch = SignalPatch::new(&id, &signal.feed_group, rule, Utc::now());
            let status = match self.store.upsert_signal(&patch).await {
                Ok(updated) => updated.processing_status,
                Err(e) => {
                    let e = HarvestError::persistence(format!("saving {}: {}", id, e));
                    tracing::error!(signal = %id, "❌ {}", e);
                    return ScrapeAttemptResult::failed(id, e.to_string());
                }
            };
            if status != signal.processing_status {
                tracing::info!(signal = %id, "📝 {} -> {} (nothing to enrich)", signal.processing_status, status);
            }
            let mut result = ScrapeAttemptResult {
                source_identifier: id,
                success: true,
                languages_processed: Vec::new(),
                error: None,
                details: HashMap::new(),
            };
            result.details.insert("status".to_string(), json!(status));
            result.details.insert("note".to_string(), json!("nothing to enrich"));
            return result;
        }

        let patterns = self
            .config
            .feed_group(&signal.feed_group)
            .and_then(|g| g.url_patterns.clone())
            .unwrap_or_default();
        let extractor = self.extractors.get(&signal.feed_group);

        let mut patch = SignalPatch::new(&id, &signal.feed_group, rule, Utc::now());
        let mut fetches = Vec::new();
        let mut outcomes = Vec::new();

        for lang in missing {
            let url = match signal.meta_urls.get(&lang) {
                Some(url) => url.clone(),
                None => match resolve_language_url(&signal.meta_urls, lang, &patterns) {
                    Some(url) => {
                        patch = patch.with_meta_url(lang, &url);
                        url
                    }
                    None => {
                        outcomes.push(LanguageOutcome::Failed(lang, format!("no url for {}", lang)));
                        continue;
                    }
                },
            };

            match &extractor {
                Some(extractor) => {
                    let fallback_title = signal
                        .languages
                        .get(&lang)
                        .map(|c| c.title.clone())
                        .unwrap_or_default();
                    fetches.push(Self::fetch_language(extractor.clone(), lang, url, fallback_title));
                }
                None => outcomes.push(LanguageOutcome::Failed(
                    lang,
                    format!("no extractor for feed group {}", signal.feed_group),
                )),
            }
        }

        // 同一 Signal 的各語言並行抓取，全部完成後才寫回一次
        outcomes.extend(join_all(fetches).await);

        let mut processed = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                LanguageOutcome::Scraped(lang, content) => {
                    patch = patch.with_language(lang, content);
                    processed.push(lang);
                }
                LanguageOutcome::Failed(lang, reason) => {
                    tracing::warn!(signal = %id, lang = %lang, "⚠️ Scrape failed: {}", reason);
                    patch.record_failure(lang, &reason);
                    failures.push(format!("{}: {}", lang, reason));
                }
            }
        }
        processed.sort();

        let mut result = ScrapeAttemptResult {
            source_identifier: id.clone(),
            success: failures.is_empty(),
            languages_processed: processed,
            error: (!failures.is_empty()).then(|| failures.join("; ")),
            details: HashMap::new(),
        };

        match self.store.upsert_signal(&patch).await {
            Ok(updated) => {
                result.details.insert("status".to_string(), json!(updated.processing_status));
                result.details.insert("retry_count".to_string(), json!(updated.retry_count));
                tracing::info!(
                    signal = %id,
                    "📝 {} -> {} (retry_count {})",
                    signal.processing_status,
                    updated.processing_status,
                    updated.retry_count
                );
                let ceiling = self.config.retry_ceiling();
                if updated.retry_count > ceiling && updated.processing_status != ProcessingStatus::ContentComplete {
                    let e = HarvestError::RetryCeilingExceeded {
                        source_identifier: id.clone(),
                        retry_count: updated.retry_count,
                        ceiling,
                    };
                    tracing::warn!(signal = %id, "⏸️ {}", e);
                    result.details.insert("retry_ceiling_exceeded".to_string(), json!(true));
                }
            }
            Err(e) => {
                let e = HarvestError::persistence(format!("saving {}: {}", id, e));
                tracing::error!(signal = %id, "❌ {}", e);
                result.success = false;
                result.error = Some(match result.error.take() {
                    Some(previous) => format!("{}; {}", previous, e),
                    None => e.to_string(),
                });
            }
        }
        result
    }

    async fn fetch_language(
        extractor: Arc<dyn ContentExtractor>,
        lang: Language,
        url: String,
        fallback_title: String,
    ) -> LanguageOutcome {
        let extracted = match extractor.fetch_content(&url, lang).await {
            Ok(extracted) => extracted,
            Err(e) => return LanguageOutcome::Failed(lang, e.to_string()),
        };

        let title = if extracted.title.is_empty() {
            fallback_title
        } else {
            extracted.title
        };
        match LanguageContent::scraped(title, extracted.body, &url, Utc::now()) {
            Ok(content) => LanguageOutcome::Scraped(lang, content),
            Err(_) => LanguageOutcome::Failed(lang, format!("empty body at {}", url)),
        }
    }

    pub async fn get_processing_statistics(&self) -> Result<ProcessingStatistics> {
        let ceiling = self.config.retry_ceiling();
        let signals = self
            .store
            .query_signals(&SignalFilter::all(), None, SignalOrder::UpdatedAtAsc)
            .await?;

        let mut stats = ProcessingStatistics {
            total_signals: signals.len(),
            ..Default::default()
        };
        for signal in &signals {
            *stats.by_status.entry(signal.processing_status).or_default() += 1;
            *stats.by_feed_group.entry(signal.feed_group.clone()).or_default() += 1;
            if signal.retry_count > ceiling {
                stats.over_retry_ceiling += 1;
            }
        }
        Ok(stats)
    }

    pub async fn get_scraping_statistics(&self) -> Result<ScrapingStatistics> {
        let ceiling = self.config.retry_ceiling();
        let eligible = SignalFilter::incomplete(ceiling);
        let signals = self
            .store
            .query_signals(&SignalFilter::all(), None, SignalOrder::UpdatedAtAsc)
            .await?;

        let mut stats = ScrapingStatistics {
            total_signals: signals.len(),
            ..Default::default()
        };
        for signal in &signals {
            if signal.processing_status.is_incomplete() {
                stats.incomplete += 1;
            }
            if eligible.matches(signal) {
                stats.eligible_for_enrichment += 1;
            }
            if signal.retry_count > ceiling {
                stats.over_retry_ceiling += 1;
            }
            stats.total_retries += u64::from(signal.retry_count);

            let rule = self.config.completeness_rule(&signal.feed_group);
            let mut languages = rule.required_for(signal);
            languages.extend(signal.languages.keys().copied());
            for lang in languages {
                let coverage = stats.by_language.entry(lang).or_default();
                if signal.has_body(lang) {
                    coverage.populated += 1;
                } else {
                    coverage.missing += 1;
                }
            }
        }
        Ok(stats)
    }
}

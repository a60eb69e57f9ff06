use crate::adapters::json_feed::JsonFeedAdapter;
use crate::adapters::rss::RssFeedAdapter;
use crate::config::toml_config::{FeedKind, FeedSourceConfig, HarvestConfig};
use crate::core::fingerprint::{FingerprintStrategy, GroupingEngine, GroupingPolicy};
use crate::domain::model::{AggregationSummary, RawItem};
use crate::domain::ports::{SignalStore, SourceAdapter};
use crate::utils::error::{HarvestError, Result};
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 一個已設定的來源與其 adapter
#[derive(Clone)]
pub struct FeedEntry {
    pub source: FeedSourceConfig,
    pub adapter: Arc<dyn SourceAdapter>,
    pub timeout: Duration,
}

/// 啟動時建立的來源登記表
#[derive(Clone, Default)]
pub struct FeedRegistry {
    entries: Vec<FeedEntry>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依 feed kind 配對 adapter；停用的來源不登記
    pub fn from_config(config: &HarvestConfig, client: Client) -> Self {
        let rss: Arc<dyn SourceAdapter> = Arc::new(RssFeedAdapter::new(client.clone()));
        let json: Arc<dyn SourceAdapter> = Arc::new(JsonFeedAdapter::new(client));

        let mut registry = Self::new();
        for feed in config.enabled_feeds() {
            let adapter = match feed.kind {
                FeedKind::Rss => rss.clone(),
                FeedKind::Json => json.clone(),
            };
            registry.register(feed.clone(), adapter, config.source_timeout(feed));
        }
        registry
    }

    pub fn register(&mut self, source: FeedSourceConfig, adapter: Arc<dyn SourceAdapter>, timeout: Duration) {
        self.entries.push(FeedEntry {
            source,
            adapter,
            timeout,
        });
    }

    pub fn enabled(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter().filter(|e| e.source.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 來源 -> 分組 -> 持久化
pub struct SignalsAggregator {
    config: Arc<HarvestConfig>,
    registry: FeedRegistry,
    engine: GroupingEngine,
    store: Arc<dyn SignalStore>,
}

impl SignalsAggregator {
    pub fn new(config: Arc<HarvestConfig>, registry: FeedRegistry, store: Arc<dyn SignalStore>) -> Self {
        let engine = GroupingEngine::new(GroupingPolicy::from_config(&config));
        Self {
            config,
            registry,
            engine,
            store,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn FingerprintStrategy>) -> Self {
        self.engine = GroupingEngine::with_strategy(GroupingPolicy::from_config(&self.config), strategy);
        self
    }

    /// 一次完整彙整。只有「沒有任何啟用來源」是致命錯誤，其餘錯誤記在 summary
    pub async fn process_all_feeds(&self) -> Result<AggregationSummary> {
        let entries: Vec<FeedEntry> = self.registry.enabled().cloned().collect();
        if entries.is_empty() {
            return Err(HarvestError::config("no enabled feed sources configured"));
        }

        let start = Instant::now();
        tracing::info!("🚀 Aggregating {} feed sources", entries.len());

        let mut summary = AggregationSummary::default();
        let items = self.fetch_all(entries, &mut summary).await;
        summary.processed = items.len();

        let updates = self.engine.group(items);
        summary.grouped = updates.len();

        for update in updates {
            let rule = self.config.completeness_rule(&update.feed_group);
            let patch = update.to_patch(rule, Utc::now());

            let existing = match self.store.find_signal_by_key(&update.key).await {
                Ok(existing) => existing,
                Err(e) => {
                    tracing::error!(signal = %update.key, "❌ Lookup failed: {}", e);
                    summary.errors.push(format!("{}: {}", update.key, e));
                    continue;
                }
            };

            match self.store.upsert_signal(&patch).await {
                Ok(signal) => match existing {
                    None => {
                        summary.created += 1;
                        summary.stored += 1;
                        tracing::debug!(signal = %signal.source_identifier, "🆕 Created ({})", signal.processing_status);
                    }
                    Some(previous) if previous.updated_at != signal.updated_at => {
                        summary.updated += 1;
                        summary.stored += 1;
                        tracing::debug!(signal = %signal.source_identifier, "🔄 Merged ({})", signal.processing_status);
                    }
                    Some(_) => summary.unchanged += 1,
                },
                Err(e) => {
                    tracing::error!(signal = %update.key, "❌ Persist failed: {}", e);
                    summary.errors.push(format!("{}: {}", update.key, e));
                }
            }
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "✅ Aggregation done: {} items, {} signals, {} created, {} updated, {} unchanged, {} errors",
            summary.processed,
            summary.grouped,
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// 所有來源並行抓取，逐一收集成功或失敗
    async fn fetch_all(&self, entries: Vec<FeedEntry>, summary: &mut AggregationSummary) -> Vec<RawItem> {
        let handles: Vec<_> = entries
            .into_iter()
            .map(|entry| {
                let source_id = entry.source.id.clone();
                let handle = tokio::spawn(async move {
                    let timeout = entry.timeout;
                    match tokio::time::timeout(timeout, entry.adapter.fetch_raw_items(&entry.source)).await {
                        Ok(result) => result,
                        Err(_) => Err(HarvestError::adapter(
                            &entry.source.id,
                            format!("timed out after {}s", timeout.as_secs()),
                        )),
                    }
                });
                (source_id, handle)
            })
            .collect();

        let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut items = Vec::new();
        for (source_id, joined) in ids.into_iter().zip(results) {
            let outcome = match joined {
                Ok(result) => result,
                Err(join_error) => Err(HarvestError::adapter(
                    &source_id,
                    format!("adapter task aborted: {}", join_error),
                )),
            };

            match outcome {
                Ok(mut fetched) => {
                    tracing::debug!(source = %source_id, "📥 {} items", fetched.len());
                    items.append(&mut fetched);
                }
                Err(e) => {
                    tracing::warn!(source = %source_id, "⚠️ Source failed: {}", e);
                    summary.sources_failed += 1;
                    summary.errors.push(e.to_string());
                }
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::config::toml_config::FeedKind;
    use crate::domain::model::{Language, ProcessingStatus};
    use crate::domain::ports::{SignalFilter, SignalOrder};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};

    const CONFIG: &str = r#"
[service]
name = "test"

[storage]
path = "./data"

[[feed_groups]]
name = "td_press"
required_languages = ["en", "zh-Hant"]
"#;

    struct StaticAdapter(Vec<RawItem>);

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        async fn fetch_raw_items(&self, _source: &FeedSourceConfig) -> Result<Vec<RawItem>> {
            Ok(self.0.clone())
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        async fn fetch_raw_items(&self, source: &FeedSourceConfig) -> Result<Vec<RawItem>> {
            Err(HarvestError::adapter(&source.id, "HTTP 503"))
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl SourceAdapter for SlowAdapter {
        async fn fetch_raw_items(&self, _source: &FeedSourceConfig) -> Result<Vec<RawItem>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
    }

    fn source(id: &str, language: Language) -> FeedSourceConfig {
        FeedSourceConfig {
            id: id.to_string(),
            feed_group: "td_press".to_string(),
            kind: FeedKind::Rss,
            url: format!("https://www.td.gov.hk/{}.xml", id),
            language,
            enabled: None,
            timeout_seconds: None,
            max_items: None,
            headers: None,
            items_path: None,
            field_mapping: None,
        }
    }

    fn config_with(sources: &[FeedSourceConfig]) -> Arc<HarvestConfig> {
        let mut config = HarvestConfig::from_toml_str(CONFIG).unwrap();
        config.feeds = sources.to_vec();
        Arc::new(config)
    }

    fn flood(lang: Language, source_id: &str, title: &str, body: Option<&str>) -> RawItem {
        let item = RawItem::new(source_id, lang, title, format!("https://www.td.gov.hk/{}/x1.htm", lang.code()), when())
            .unwrap()
            .with_external_id("x1");
        match body {
            Some(body) => item.with_body(body),
            None => item,
        }
    }

    #[tokio::test]
    async fn test_no_enabled_feed_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = SignalsAggregator::new(config_with(&[]), FeedRegistry::new(), store);
        let err = aggregator.process_all_feeds().await.unwrap_err();
        assert!(matches!(err, HarvestError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_failing_source_is_isolated_and_rerun_is_idempotent() {
        let en = source("td_press_en", Language::En);
        let tc = source("td_press_tc", Language::ZhHant);
        let broken = source("td_press_broken", Language::En);

        let mut registry = FeedRegistry::new();
        registry.register(
            en.clone(),
            Arc::new(StaticAdapter(vec![flood(Language::En, "td_press_en", "Flood warning", Some("Heavy rain"))])),
            Duration::from_secs(5),
        );
        registry.register(
            tc.clone(),
            Arc::new(StaticAdapter(vec![flood(Language::ZhHant, "td_press_tc", "水浸警告", Some("大雨"))])),
            Duration::from_secs(5),
        );
        registry.register(broken.clone(), Arc::new(FailingAdapter), Duration::from_secs(5));

        let store = Arc::new(MemoryStore::new());
        let aggregator = SignalsAggregator::new(config_with(&[en, tc, broken]), registry, store.clone());

        let first = aggregator.process_all_feeds().await.unwrap();
        assert_eq!(first.processed, 2);
        assert_eq!(first.grouped, 1);
        assert_eq!(first.created, 1);
        assert_eq!(first.sources_failed, 1);
        assert_eq!(first.errors.len(), 1);
        assert!(first.errors[0].contains("HTTP 503"));

        let signals = store
            .query_signals(&SignalFilter::all(), None, SignalOrder::UpdatedAtAsc)
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].processing_status, ProcessingStatus::ContentComplete);
        let stamped = signals[0].updated_at;

        let second = aggregator.process_all_feeds().await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 1);
        let again = store.find_signal_by_key(&signals[0].source_identifier).await.unwrap().unwrap();
        assert_eq!(again.updated_at, stamped);
    }

    #[tokio::test]
    async fn test_slow_source_times_out_without_blocking_others() {
        let en = source("td_press_en", Language::En);
        let slow = source("td_press_slow", Language::En);

        let mut registry = FeedRegistry::new();
        registry.register(
            en.clone(),
            Arc::new(StaticAdapter(vec![flood(Language::En, "td_press_en", "Flood warning", None)])),
            Duration::from_secs(5),
        );
        registry.register(slow.clone(), Arc::new(SlowAdapter), Duration::from_millis(100));

        let store = Arc::new(MemoryStore::new());
        let aggregator = SignalsAggregator::new(config_with(&[en, slow]), registry, store.clone());
        let summary = aggregator.process_all_feeds().await.unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.sources_failed, 1);
        assert!(summary.errors[0].contains("timed out"));

        let signal = &store
            .query_signals(&SignalFilter::all(), None, SignalOrder::UpdatedAtAsc)
            .await
            .unwrap()[0];
        assert_eq!(signal.processing_status, ProcessingStatus::ContentPartial);
    }
}

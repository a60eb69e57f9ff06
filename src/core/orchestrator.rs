use crate::adapters::outlet::HttpOutletScraper;
use crate::config::toml_config::HarvestConfig;
use crate::domain::model::{OutletFetchSummary, OutletScrapeResult};
use crate::domain::ports::{ArticleStore, OutletScraper};
use crate::utils::error::{HarvestError, Result};
use futures::future::join_all;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct OutletEntry {
    pub scraper: Arc<dyn OutletScraper>,
    pub timeout: Duration,
    pub enabled: bool,
}

/// outlet 名稱 -> 抓取器
#[derive(Clone, Default)]
pub struct OutletRegistry {
    entries: BTreeMap<String, OutletEntry>,
}

impl OutletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &HarvestConfig, client: Client, store: Arc<dyn ArticleStore>) -> Result<Self> {
        let mut registry = Self::new();
        for outlet in &config.outlets {
            let scraper = HttpOutletScraper::new(client.clone(), outlet.clone(), store.clone())?;
            registry.register(&outlet.name, Arc::new(scraper), outlet.timeout(), outlet.is_enabled());
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        scraper: Arc<dyn OutletScraper>,
        timeout: Duration,
        enabled: bool,
    ) {
        self.entries.insert(
            name.into(),
            OutletEntry {
                scraper,
                timeout,
                enabled,
            },
        );
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&OutletEntry> {
        self.entries.get(name)
    }
}

/// 各 outlet 互相隔離地執行，錯誤、逾時與 panic 都轉為失敗結果
pub struct OutletOrchestrator {
    registry: OutletRegistry,
    last_results: Mutex<BTreeMap<String, OutletScrapeResult>>,
}

impl OutletOrchestrator {
    pub fn new(registry: OutletRegistry) -> Self {
        Self {
            registry,
            last_results: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn outlets(&self) -> Vec<String> {
        self.registry.names()
    }

    pub async fn run_single_scraper(&self, outlet: &str, track_progress: bool) -> Result<OutletScrapeResult> {
        let entry = self
            .registry
            .get(outlet)
            .cloned()
            .ok_or_else(|| HarvestError::UnknownOutletError {
                outlet: outlet.to_string(),
            })?;

        if track_progress {
            tracing::info!(outlet = %outlet, "🚀 Starting outlet scraper");
        }
        let result = Self::run_entry(outlet.to_string(), entry).await;
        if track_progress {
            Self::log_result(&result);
            self.last_results
                .lock()
                .await
                .insert(outlet.to_string(), result.clone());
        }
        Ok(result)
    }

    /// 所有啟用的 outlet 並行執行，全部完成才回傳
    pub async fn run_all_scrapers(&self) -> BTreeMap<String, OutletScrapeResult> {
        let runs: Vec<_> = self
            .registry
            .entries
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, entry)| Self::run_entry(name.clone(), entry.clone()))
            .collect();

        tracing::info!("🚀 Running {} outlet scrapers", runs.len());
        let results = join_all(runs).await;

        let mut by_outlet = BTreeMap::new();
        for result in results {
            Self::log_result(&result);
            by_outlet.insert(result.outlet.clone(), result);
        }

        let succeeded = by_outlet.values().filter(|r| r.success).count();
        tracing::info!("📊 Outlets finished: {}/{} succeeded", succeeded, by_outlet.len());

        self.last_results.lock().await.extend(by_outlet.clone());
        by_outlet
    }

    pub async fn last_results(&self) -> BTreeMap<String, OutletScrapeResult> {
        self.last_results.lock().await.clone()
    }

    async fn run_entry(outlet: String, entry: OutletEntry) -> OutletScrapeResult {
        let start = Instant::now();
        let timeout = entry.timeout;
        let scraper = entry.scraper;

        // 在獨立 task 中執行，panic 只會變成 JoinError
        let handle = tokio::spawn(async move { tokio::time::timeout(timeout, scraper.fetch_and_save()).await });

        let outcome: std::result::Result<OutletFetchSummary, String> = match handle.await {
            Ok(Ok(Ok(summary))) => Ok(summary),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(_)) => Err(HarvestError::Timeout {
                operation: format!("outlet {}", outlet),
                seconds: timeout.as_secs(),
            }
            .to_string()),
            Err(join_error) => Err(format!("scraper panicked: {}", join_error)),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(summary) => OutletScrapeResult {
                outlet,
                articles_found: summary.articles_found,
                articles_saved: summary.articles_saved,
                duration_ms,
                success: true,
                error: None,
            },
            Err(error) => OutletScrapeResult {
                outlet,
                articles_found: 0,
                articles_saved: 0,
                duration_ms,
                success: false,
                error: Some(error),
            },
        }
    }

    fn log_result(result: &OutletScrapeResult) {
        if result.success {
            tracing::info!(
                outlet = %result.outlet,
                duration_ms = result.duration_ms,
                "✅ {} found, {} saved",
                result.articles_found,
                result.articles_saved
            );
        } else {
            tracing::error!(
                outlet = %result.outlet,
                duration_ms = result.duration_ms,
                "❌ {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

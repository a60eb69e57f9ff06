use crate::adapters::http::client_from_config;
use crate::config::toml_config::HarvestConfig;
use crate::core::aggregator::{FeedRegistry, SignalsAggregator};
use crate::core::enricher::{ExtractorRegistry, SignalsScraper};
use crate::core::orchestrator::{OutletOrchestrator, OutletRegistry};
use crate::domain::model::{
    AggregationSummary, EnrichmentSummary, OutletScrapeResult, ProcessingStatistics,
    ScrapeAttemptResult, ScrapingStatistics,
};
use crate::domain::ports::{ArticleStore, SignalStore};
use crate::utils::error::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// 每個入口的回應；呼叫端永遠拿到結構化結果，不會收到未處理的錯誤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryResponse<T> {
    Completed { result: T },
    Unauthorized { message: String },
    Failed { error: String },
}

impl<T> EntryResponse<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, EntryResponse::Completed { .. })
    }

    pub fn into_result(self) -> Option<T> {
        match self {
            EntryResponse::Completed { result } => Some(result),
            _ => None,
        }
    }
}

/// 排程觸發者的身分檢查
#[derive(Debug, Clone)]
pub struct CallerAuth {
    secret: Option<String>,
}

impl CallerAuth {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// 接受 `Authorization: Bearer <secret>` 或 `x-cron-secret: <secret>`；未設定密鑰時不檢查
    pub fn authorize(&self, headers: &HashMap<String, String>) -> Result<()> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };

        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim())
        };

        let presented = header("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").map(str::trim))
            .or_else(|| header(CRON_SECRET_HEADER));

        match presented {
            None => Err(HarvestError::Unauthorized {
                message: "missing caller credentials".to_string(),
            }),
            Some(token) if constant_time_eq(token, secret) => Ok(()),
            Some(_) => Err(HarvestError::Unauthorized {
                message: "invalid caller credentials".to_string(),
            }),
        }
    }

    /// 本機呼叫用的合法標頭
    pub fn local_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(secret) = &self.secret {
            headers.insert("authorization".to_string(), format!("Bearer {}", secret));
        }
        headers
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// 對外入口：驗證呼叫者後委派給 aggregator / scraper / orchestrator
pub struct HarvestService {
    config: Arc<HarvestConfig>,
    auth: CallerAuth,
    aggregator: SignalsAggregator,
    scraper: SignalsScraper,
    orchestrator: OutletOrchestrator,
}

impl HarvestService {
    /// 由設定建立所有協作者
    pub fn from_config(
        config: HarvestConfig,
        signal_store: Arc<dyn SignalStore>,
        article_store: Arc<dyn ArticleStore>,
    ) -> Result<Self> {
        config.validate_config()?;
        let client = client_from_config(&config)?;
        let config = Arc::new(config);

        let aggregator = SignalsAggregator::new(
            config.clone(),
            FeedRegistry::from_config(&config, client.clone()),
            signal_store.clone(),
        );
        let scraper = SignalsScraper::new(
            config.clone(),
            signal_store,
            ExtractorRegistry::from_config(&config, client.clone())?,
        );
        let orchestrator = OutletOrchestrator::new(OutletRegistry::from_config(&config, client, article_store)?);

        Ok(Self::from_parts(config, aggregator, scraper, orchestrator))
    }

    pub fn from_parts(
        config: Arc<HarvestConfig>,
        aggregator: SignalsAggregator,
        scraper: SignalsScraper,
        orchestrator: OutletOrchestrator,
    ) -> Self {
        let auth = CallerAuth::new(config.caller_secret().map(str::to_string));
        Self {
            config,
            auth,
            aggregator,
            scraper,
            orchestrator,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn local_headers(&self) -> HashMap<String, String> {
        self.auth.local_headers()
    }

    pub fn outlets(&self) -> Vec<String> {
        self.orchestrator.outlets()
    }

    pub async fn aggregate_signals(&self, headers: &HashMap<String, String>) -> EntryResponse<AggregationSummary> {
        self.guarded(headers, "aggregate_signals", self.aggregator.process_all_feeds())
            .await
    }

    pub async fn enrich_incomplete_signals(
        &self,
        headers: &HashMap<String, String>,
        limit: Option<usize>,
    ) -> EntryResponse<EnrichmentSummary> {
        if limit == Some(0) {
            return self
                .reject(headers, "enrich_incomplete_signals", "limit must be at least 1")
                .await;
        }
        let limit = limit.unwrap_or_else(|| self.config.default_batch_limit());
        self.guarded(
            headers,
            "enrich_incomplete_signals",
            self.scraper.process_incomplete_signals(limit),
        )
        .await
    }

    pub async fn enrich_signal_by_id(
        &self,
        headers: &HashMap<String, String>,
        id: &str,
    ) -> EntryResponse<ScrapeAttemptResult> {
        self.guarded(headers, "enrich_signal_by_id", async {
            Ok::<_, HarvestError>(self.scraper.process_single_signal_by_id(id).await)
        })
        .await
    }

    pub async fn run_outlet_scraper(
        &self,
        headers: &HashMap<String, String>,
        outlet: &str,
    ) -> EntryResponse<OutletScrapeResult> {
        self.guarded(
            headers,
            "run_outlet_scraper",
            self.orchestrator.run_single_scraper(outlet, true),
        )
        .await
    }

    pub async fn run_all_outlet_scrapers(
        &self,
        headers: &HashMap<String, String>,
    ) -> EntryResponse<BTreeMap<String, OutletScrapeResult>> {
        self.guarded(headers, "run_all_outlet_scrapers", async {
            Ok::<_, HarvestError>(self.orchestrator.run_all_scrapers().await)
        })
        .await
    }

    pub async fn processing_statistics(
        &self,
        headers: &HashMap<String, String>,
    ) -> EntryResponse<ProcessingStatistics> {
        self.guarded(
            headers,
            "processing_statistics",
            self.scraper.get_processing_statistics(),
        )
        .await
    }

    pub async fn scraping_statistics(&self, headers: &HashMap<String, String>) -> EntryResponse<ScrapingStatistics> {
        self.guarded(headers, "scraping_statistics", self.scraper.get_scraping_statistics())
            .await
    }

    /// 請求缺少必要欄位；仍先驗證呼叫者，未授權者看不到欄位錯誤
    pub async fn reject_incomplete_request<T>(
        &self,
        headers: &HashMap<String, String>,
        operation: &str,
        field: &str,
    ) -> EntryResponse<T> {
        self.reject(headers, operation, &format!("request is missing '{}'", field))
            .await
    }

    async fn reject<T>(&self, headers: &HashMap<String, String>, operation: &str, message: &str) -> EntryResponse<T> {
        self.guarded(headers, operation, async { Err(HarvestError::validation(message)) })
            .await
    }

    /// 先驗證再執行；future 在驗證通過前不會被 poll
    async fn guarded<T, F>(&self, headers: &HashMap<String, String>, operation: &str, work: F) -> EntryResponse<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Err(e) = self.auth.authorize(headers) {
            tracing::warn!("🔒 {} rejected: {}", operation, e);
            return EntryResponse::Unauthorized { message: e.to_string() };
        }

        match work.await {
            Ok(result) => EntryResponse::Completed { result },
            Err(e) => {
                tracing::error!("❌ {} failed: {}", operation, e.user_friendly_message());
                EntryResponse::Failed { error: e.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;

    fn service() -> HarvestService {
        let config = HarvestConfig::from_toml_str(
            r#"
[service]
name = "service-test"
caller_secret = "s3cret"

[storage]
path = "./unused"
"#,
        )
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        HarvestService::from_config(config, store.clone(), store).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bearer_and_cron_header_are_accepted() {
        let auth = CallerAuth::new(Some("s3cret".to_string()));
        assert!(auth.authorize(&headers(&[("Authorization", "Bearer s3cret")])).is_ok());
        assert!(auth.authorize(&headers(&[("X-Cron-Secret", "s3cret")])).is_ok());
        assert!(auth.authorize(&auth.local_headers()).is_ok());
    }

    #[test]
    fn test_missing_or_wrong_secret_is_rejected() {
        let auth = CallerAuth::new(Some("s3cret".to_string()));
        assert!(matches!(
            auth.authorize(&headers(&[])),
            Err(HarvestError::Unauthorized { .. })
        ));
        assert!(auth.authorize(&headers(&[("authorization", "Bearer nope")])).is_err());
        assert!(auth.authorize(&headers(&[("authorization", "s3cret")])).is_err());
    }

    #[test]
    fn test_open_when_no_secret_configured() {
        let auth = CallerAuth::new(None);
        assert!(auth.authorize(&headers(&[])).is_ok());
        assert!(auth.local_headers().is_empty());
    }

    #[test]
    fn test_entry_response_serializes_with_status_tag() {
        let done: EntryResponse<u32> = EntryResponse::Completed { result: 3 };
        assert_eq!(serde_json::to_string(&done).unwrap(), r#"{"status":"completed","result":3}"#);

        let denied: EntryResponse<u32> = EntryResponse::Unauthorized {
            message: "missing caller credentials".to_string(),
        };
        let json = serde_json::to_value(&denied).unwrap();
        assert_eq!(json["status"], "unauthorized");
        assert!(denied.into_result().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_request_is_authorized_first() {
        let service = service();

        let anonymous: EntryResponse<()> = service
            .reject_incomplete_request(&headers(&[]), "enrich_signal_by_id", "id")
            .await;
        assert!(matches!(anonymous, EntryResponse::Unauthorized { .. }));

        let caller: EntryResponse<()> = service
            .reject_incomplete_request(&service.local_headers(), "enrich_signal_by_id", "id")
            .await;
        match caller {
            EntryResponse::Failed { error } => assert!(error.contains("missing 'id'")),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_limit_is_a_validation_failure() {
        let service = service();

        match service.enrich_incomplete_signals(&service.local_headers(), Some(0)).await {
            EntryResponse::Failed { error } => {
                assert!(error.starts_with("Validation error"));
                assert!(error.contains("limit"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(matches!(
            service.enrich_incomplete_signals(&headers(&[]), Some(0)).await,
            EntryResponse::Unauthorized { .. }
        ));

        let summary = service
            .enrich_incomplete_signals(&service.local_headers(), Some(5))
            .await
            .into_result()
            .unwrap();
        assert_eq!(summary.processed, 0);
    }
}

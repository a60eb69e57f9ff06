use crate::config::toml_config::FeedSourceConfig;
use crate::domain::model::{
    Article, ArticleKey, Language, OutletFetchSummary, ProcessingStatus, RawItem, Signal,
    SignalPatch,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// 每種來源一個實作，負責取得並解析最基本的欄位
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_raw_items(&self, source: &FeedSourceConfig) -> Result<Vec<RawItem>>;
}

/// 從單一頁面抽出的標題與內文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub title: String,
    pub body: String,
}

/// 依 feed group 抓取並解析單一語言頁面
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn fetch_content(&self, url: &str, language: Language) -> Result<ExtractedContent>;
}

/// Outlet 文章抓取器，自行負責儲存
#[async_trait]
pub trait OutletScraper: Send + Sync {
    async fn fetch_and_save(&self) -> Result<OutletFetchSummary>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalFilter {
    /// 空集合代表不限狀態
    pub statuses: Vec<ProcessingStatus>,
    pub feed_group: Option<String>,
    pub max_retry_count: Option<u32>,
    pub min_retry_count: Option<u32>,
}

impl SignalFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn incomplete(retry_ceiling: u32) -> Self {
        Self {
            statuses: vec![ProcessingStatus::ContentPartial, ProcessingStatus::EnglishOnly],
            feed_group: None,
            max_retry_count: Some(retry_ceiling),
            min_retry_count: None,
        }
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&signal.processing_status) {
            return false;
        }
        if let Some(group) = &self.feed_group {
            if &signal.feed_group != group {
                return false;
            }
        }
        if let Some(max) = self.max_retry_count {
            if signal.retry_count > max {
                return false;
            }
        }
        if let Some(min) = self.min_retry_count {
            if signal.retry_count < min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalOrder {
    #[default]
    UpdatedAtAsc,
    UpdatedAtDesc,
    CreatedAtDesc,
}

/// Signal 的持久化協作者
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn find_signal_by_key(&self, key: &str) -> Result<Option<Signal>>;

    /// 不存在則建立，存在則以加法方式合併；對單一 Signal 為原子操作
    async fn upsert_signal(&self, patch: &SignalPatch) -> Result<Signal>;

    async fn query_signals(
        &self,
        filter: &SignalFilter,
        limit: Option<usize>,
        order: SignalOrder,
    ) -> Result<Vec<Signal>>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find_article(&self, key: &ArticleKey) -> Result<Option<Article>>;
    async fn article_exists(&self, source: &str, url: &str) -> Result<bool>;
    /// 單一 outlet 已儲存的文章網址；一次抓取只讀一次
    async fn known_article_urls(&self, category: &str, source: &str) -> Result<HashSet<String>>;
    async fn upsert_article(&self, article: &Article) -> Result<()>;
    async fn query_articles(&self, category: Option<&str>, limit: Option<usize>) -> Result<Vec<Article>>;
}

/// 鍵轉成檔名或 S3 路徑片段。小寫英數與 '-' 原樣保留，其餘位元組（含 '_'）寫成 `_XX`，
/// 因此不同的鍵永遠對應不同的路徑，大小寫不敏感的檔案系統也一樣。
pub fn storage_segment(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

/// 供各儲存實作共用的篩選、排序與截斷
pub fn select_signals(
    signals: impl IntoIterator<Item = Signal>,
    filter: &SignalFilter,
    limit: Option<usize>,
    order: SignalOrder,
) -> Vec<Signal> {
    let mut selected: Vec<Signal> = signals.into_iter().filter(|s| filter.matches(s)).collect();

    match order {
        SignalOrder::UpdatedAtAsc => selected.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.source_identifier.cmp(&b.source_identifier))
        }),
        SignalOrder::UpdatedAtDesc => selected.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.source_identifier.cmp(&b.source_identifier))
        }),
        SignalOrder::CreatedAtDesc => selected.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.source_identifier.cmp(&b.source_identifier))
        }),
    }

    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    selected
}

/// 合併 patch 至既有紀錄或建立新紀錄，回傳 (結果, 是否寫入)
pub fn merge_patch(existing: Option<Signal>, patch: &SignalPatch) -> Result<(Signal, bool)> {
    match existing {
        Some(mut signal) => {
            let changed = signal.apply_patch(patch);
            Ok((signal, changed))
        }
        None => Ok((Signal::from_patch(patch)?, true)),
    }
}

/// 文章依 created_at 新到舊
pub fn select_articles(
    articles: impl IntoIterator<Item = Article>,
    category: Option<&str>,
    limit: Option<usize>,
) -> Vec<Article> {
    let mut selected: Vec<Article> = articles
        .into_iter()
        .filter(|a| category.map_or(true, |c| a.category == c))
        .collect();
    selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_segment_keeps_distinct_keys_distinct() {
        assert_eq!(storage_segment("td-press"), "td-press");
        assert_eq!(storage_segment("td_press:abc"), "td_5Fpress_3Aabc");
        assert_ne!(storage_segment("td.press:abc"), storage_segment("td_press:abc"));
        assert_ne!(storage_segment("TD"), storage_segment("td"));
        assert_eq!(storage_segment("a/b"), "a_2Fb");
    }
}

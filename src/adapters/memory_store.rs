use crate::domain::model::{Article, ArticleKey, Signal, SignalPatch};
use crate::domain::ports::{
    merge_patch, select_articles, select_signals, ArticleStore, SignalFilter, SignalOrder,
    SignalStore,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

/// 行程內儲存，測試與嵌入式使用
#[derive(Debug, Default)]
pub struct MemoryStore {
    signals: Mutex<HashMap<String, Signal>>,
    articles: Mutex<BTreeMap<ArticleKey, Article>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接放入完整紀錄（測試用的初始資料）
    pub async fn seed_signal(&self, signal: Signal) {
        self.signals
            .lock()
            .await
            .insert(signal.source_identifier.clone(), signal);
    }

    pub async fn signal_count(&self) -> usize {
        self.signals.lock().await.len()
    }

    pub async fn article_count(&self) -> usize {
        self.articles.lock().await.len()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn find_signal_by_key(&self, key: &str) -> Result<Option<Signal>> {
        Ok(self.signals.lock().await.get(key).cloned())
    }

    async fn upsert_signal(&self, patch: &SignalPatch) -> Result<Signal> {
        let mut signals = self.signals.lock().await;
        let existing = signals.get(&patch.source_identifier).cloned();
        let (signal, changed) = merge_patch(existing, patch)?;
        if changed {
            signals.insert(signal.source_identifier.clone(), signal.clone());
        }
        Ok(signal)
    }

    async fn query_signals(
        &self,
        filter: &SignalFilter,
        limit: Option<usize>,
        order: SignalOrder,
    ) -> Result<Vec<Signal>> {
        let signals = self.signals.lock().await;
        Ok(select_signals(signals.values().cloned(), filter, limit, order))
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn find_article(&self, key: &ArticleKey) -> Result<Option<Article>> {
        Ok(self.articles.lock().await.get(key).cloned())
    }

    async fn article_exists(&self, source: &str, url: &str) -> Result<bool> {
        Ok(self
            .articles
            .lock()
            .await
            .values()
            .any(|a| a.source == source && a.url == url))
    }

    async fn known_article_urls(&self, category: &str, source: &str) -> Result<HashSet<String>> {
        Ok(self
            .articles
            .lock()
            .await
            .values()
            .filter(|a| a.category == category && a.source == source)
            .map(|a| a.url.clone())
            .collect())
    }

    async fn upsert_article(&self, article: &Article) -> Result<()> {
        self.articles
            .lock()
            .await
            .insert(article.key(), article.clone());
        Ok(())
    }

    async fn query_articles(&self, category: Option<&str>, limit: Option<usize>) -> Result<Vec<Article>> {
        let articles = self.articles.lock().await;
        Ok(select_articles(articles.values().cloned(), category, limit))
    }
}

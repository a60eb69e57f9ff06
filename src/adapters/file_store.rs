use crate::domain::model::{Article, ArticleKey, Signal, SignalPatch};
use crate::domain::ports::{
    merge_patch, select_articles, select_signals, storage_segment, ArticleStore, SignalFilter,
    SignalOrder, SignalStore,
};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SIGNALS_DIR: &str = "signals";
const ARTICLES_DIR: &str = "articles";

/// 以 JSON 檔案保存的本地儲存，一筆紀錄一個檔案
#[derive(Debug)]
pub struct FileStore {
    base_path: PathBuf,
    // 讀-改-寫需序列化，否則同一 Signal 的合併可能遺失
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn signal_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(SIGNALS_DIR)
            .join(format!("{}.json", storage_segment(key)))
    }

    fn article_path(&self, key: &ArticleKey) -> PathBuf {
        self.base_path
            .join(ARTICLES_DIR)
            .join(storage_segment(&key.category))
            .join(storage_segment(&key.source))
            .join(format!("{}.json", key.created_at.timestamp_micros()))
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(value)?;
        // 先寫暫存檔再改名，避免讀到寫一半的 JSON
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_signals(&self) -> Result<Vec<Signal>> {
        let dir = self.base_path.join(SIGNALS_DIR);
        let mut signals = Vec::new();
        for path in json_files(&dir).await? {
            if let Some(signal) = self.read_json::<Signal>(&path).await? {
                signals.push(signal);
            }
        }
        Ok(signals)
    }

    async fn load_articles(&self) -> Result<Vec<Article>> {
        let root = self.base_path.join(ARTICLES_DIR);
        let mut articles = Vec::new();
        for category in sub_dirs(&root).await? {
            for source in sub_dirs(&category).await? {
                for path in json_files(&source).await? {
                    if let Some(article) = self.read_json::<Article>(&path).await? {
                        articles.push(article);
                    }
                }
            }
        }
        Ok(articles)
    }
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            files.push(path);
        }
    }
    Ok(files)
}

async fn sub_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[async_trait]
impl SignalStore for FileStore {
    async fn find_signal_by_key(&self, key: &str) -> Result<Option<Signal>> {
        self.read_json(&self.signal_path(key)).await
    }

    async fn upsert_signal(&self, patch: &SignalPatch) -> Result<Signal> {
        let _guard = self.write_lock.lock().await;
        let path = self.signal_path(&patch.source_identifier);
        let existing = self.read_json::<Signal>(&path).await?;
        let (signal, changed) = merge_patch(existing, patch)?;
        if changed {
            self.write_json(&path, &signal).await.map_err(|e| {
                HarvestError::persistence(format!(
                    "writing signal {}: {}",
                    signal.source_identifier, e
                ))
            })?;
        }
        Ok(signal)
    }

    async fn query_signals(
        &self,
        filter: &SignalFilter,
        limit: Option<usize>,
        order: SignalOrder,
    ) -> Result<Vec<Signal>> {
        Ok(select_signals(self.load_signals().await?, filter, limit, order))
    }
}

#[async_trait]
impl ArticleStore for FileStore {
    async fn find_article(&self, key: &ArticleKey) -> Result<Option<Article>> {
        self.read_json(&self.article_path(key)).await
    }

    async fn article_exists(&self, source: &str, url: &str) -> Result<bool> {
        Ok(self
            .load_articles()
            .await?
            .iter()
            .any(|a| a.source == source && a.url == url))
    }

    async fn known_article_urls(&self, category: &str, source: &str) -> Result<HashSet<String>> {
        let dir = self
            .base_path
            .join(ARTICLES_DIR)
            .join(storage_segment(category))
            .join(storage_segment(source));
        let mut urls = HashSet::new();
        for path in json_files(&dir).await? {
            if let Some(article) = self.read_json::<Article>(&path).await? {
                urls.insert(article.url);
            }
        }
        Ok(urls)
    }

    async fn upsert_article(&self, article: &Article) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&self.article_path(&article.key()), article)
            .await
            .map_err(|e| HarvestError::persistence(format!("writing article {}: {}", article.url, e)))
    }

    async fn query_articles(&self, category: Option<&str>, limit: Option<usize>) -> Result<Vec<Article>> {
        Ok(select_articles(self.load_articles().await?, category, limit))
    }
}

use crate::adapters::http::fetch_text;
use crate::config::toml_config::OutletConfig;
use crate::domain::model::{Article, OutletFetchSummary};
use crate::domain::ports::{ArticleStore, OutletScraper};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

const DEFAULT_CONCURRENT_REQUESTS: usize = 4;
const DEFAULT_MAX_ARTICLES: usize = 30;

/// 由設定驅動的 outlet 抓取器：索引頁 -> 文章連結 -> 文章內容
pub struct HttpOutletScraper {
    client: Client,
    config: OutletConfig,
    store: Arc<dyn ArticleStore>,
    link_selector: Selector,
    title_selector: Selector,
    body_selector: Selector,
}

struct FetchedArticle {
    url: String,
    title: String,
    body: String,
}

fn parse_selector(field: &str, selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| HarvestError::InvalidConfigValueError {
        field: field.to_string(),
        value: selector.to_string(),
        reason: format!("invalid CSS selector: {}", e),
    })
}

impl HttpOutletScraper {
    pub fn new(client: Client, config: OutletConfig, store: Arc<dyn ArticleStore>) -> Result<Self> {
        let link_selector = parse_selector("outlets.link_selector", &config.link_selector)?;
        let title_selector = parse_selector(
            "outlets.title_selector",
            config.title_selector.as_deref().unwrap_or("h1"),
        )?;
        let body_selector = parse_selector("outlets.body_selector", &config.body_selector)?;

        Ok(Self {
            client,
            config,
            store,
            link_selector,
            title_selector,
            body_selector,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 從索引頁抽出去重後的絕對網址
    pub fn index_links(&self, html: &str) -> Result<Vec<String>> {
        let base = Url::parse(&self.config.index_url)
            .map_err(|e| HarvestError::adapter(&self.config.name, format!("bad index url: {}", e)))?;
        let document = Html::parse_document(html);

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for element in document.select(&self.link_selector) {
            if let Some(href) = element.value().attr("href") {
                if let Ok(resolved) = base.join(href) {
                    let resolved = resolved.to_string();
                    if seen.insert(resolved.clone()) {
                        links.push(resolved);
                    }
                }
            }
        }
        Ok(links)
    }

    fn parse_article(&self, url: &str, html: &str) -> FetchedArticle {
        let document = Html::parse_document(html);
        let text_of = |selector: &Selector| {
            document
                .select(selector)
                .map(|e| e.text().collect::<Vec<_>>().join(" "))
                .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        };

        FetchedArticle {
            url: url.to_string(),
            title: text_of(&self.title_selector).into_iter().next().unwrap_or_default(),
            body: text_of(&self.body_selector).join("\n\n"),
        }
    }

    async fn fetch_article(&self, url: String) -> Result<FetchedArticle> {
        let html = fetch_text(&self.client, &self.config.name, &url, None, None).await?;
        Ok(self.parse_article(&url, &html))
    }
}

#[async_trait]
impl OutletScraper for HttpOutletScraper {
    async fn fetch_and_save(&self) -> Result<OutletFetchSummary> {
        let outlet = &self.config.name;
        let index = fetch_text(&self.client, outlet, &self.config.index_url, None, None).await?;
        let links = self.index_links(&index)?;
        tracing::info!(outlet = %outlet, "🔗 Indexed {} article links", links.len());

        let known = self.store.known_article_urls(&self.config.category, outlet).await?;
        let fresh: Vec<String> = links
            .iter()
            .take(self.config.max_articles.unwrap_or(DEFAULT_MAX_ARTICLES))
            .filter(|link| !known.contains(*link))
            .cloned()
            .collect();
        tracing::debug!(outlet = %outlet, "{} new articles to fetch", fresh.len());

        let concurrency = self
            .config
            .concurrent_requests
            .unwrap_or(DEFAULT_CONCURRENT_REQUESTS)
            .max(1);
        let fetched: Vec<FetchedArticle> = stream::iter(fresh)
            .map(|url| self.fetch_article(url))
            .buffer_unordered(concurrency)
            .filter_map(|result| async move {
                match result {
                    Ok(article) if !article.body.is_empty() => Some(article),
                    Ok(article) => {
                        tracing::warn!(outlet = %outlet, "⚠️ No content at {}", article.url);
                        None
                    }
                    Err(e) => {
                        tracing::warn!(outlet = %outlet, "⚠️ Article fetch failed: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        // 同一批次的 created_at 以微秒遞增，避免鍵值相撞
        let base = Utc::now();
        let mut saved = 0;
        for (i, fetched) in fetched.into_iter().enumerate() {
            let article = Article {
                category: self.config.category.clone(),
                source: outlet.clone(),
                created_at: base + Duration::microseconds(i as i64),
                title: fetched.title,
                url: fetched.url,
                body: fetched.body,
                published_at: None,
            };
            self.store.upsert_article(&article).await?;
            saved += 1;
        }

        Ok(OutletFetchSummary {
            articles_found: links.len(),
            articles_saved: saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::build_client;
    use crate::adapters::memory_store::MemoryStore;
    use httpmock::prelude::*;

    fn config(index_url: String) -> OutletConfig {
        OutletConfig {
            name: "autoblog".to_string(),
            category: "cars".to_string(),
            index_url,
            link_selector: "a.headline".to_string(),
            title_selector: None,
            body_selector: "div.article-body".to_string(),
            enabled: None,
            timeout_seconds: None,
            max_articles: None,
            concurrent_requests: Some(2),
        }
    }

    fn index_html() -> &'static str {
        r#"<html><body>
            <a class="headline" href="/news/ev">EV</a>
            <a class="headline" href="/news/recall">Recall</a>
            <a class="headline" href="/news/ev">EV again</a>
            <a class="other" href="/about">About</a>
        </body></html>"#
    }

    #[tokio::test]
    async fn test_fetch_and_save_skips_known_articles() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/news");
            then.status(200).body(index_html());
        });
        server.mock(|when, then| {
            when.method(GET).path("/news/ev");
            then.status(200)
                .body("<h1>New EV</h1><div class='article-body'><p>Range 500km</p></div>");
        });
        let recall = server.mock(|when, then| {
            when.method(GET).path("/news/recall");
            then.status(200)
                .body("<h1>Recall</h1><div class='article-body'>Airbags</div>");
        });

        let store = Arc::new(MemoryStore::new());
        let scraper = HttpOutletScraper::new(
            build_client(std::time::Duration::from_secs(5), "test").unwrap(),
            config(server.url("/news")),
            store.clone(),
        )
        .unwrap();

        let summary = scraper.fetch_and_save().await.unwrap();
        assert_eq!(summary.articles_found, 2);
        assert_eq!(summary.articles_saved, 2);

        let again = scraper.fetch_and_save().await.unwrap();
        assert_eq!(again.articles_saved, 0);
        recall.assert_hits(1);

        let saved = store.query_articles(Some("cars"), None).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().any(|a| a.title == "New EV" && a.body == "Range 500km"));
    }

    #[tokio::test]
    async fn test_index_failure_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/news");
            then.status(500);
        });

        let scraper = HttpOutletScraper::new(
            build_client(std::time::Duration::from_secs(5), "test").unwrap(),
            config(server.url("/news")),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        assert!(scraper.fetch_and_save().await.is_err());
    }
}

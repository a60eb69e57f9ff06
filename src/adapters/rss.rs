use crate::adapters::html::normalize_text;
use crate::adapters::http::fetch_text;
use crate::config::toml_config::FeedSourceConfig;
use crate::domain::model::RawItem;
use crate::domain::ports::SourceAdapter;
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    guid: Option<Guid>,
}

// <guid isPermaLink="false">...</guid>
#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

/// RSS 2.0 列表
pub struct RssFeedAdapter {
    client: Client,
}

impl RssFeedAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 解析 RSS 文件；個別項目不合法時略過，不影響整個來源
    pub fn parse_items(
        source: &FeedSourceConfig,
        xml: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawItem>> {
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean)
            .map_err(|e| HarvestError::adapter(&source.id, format!("parsing rss xml: {}", e)))?;

        let max_items = source.max_items.unwrap_or(usize::MAX);
        let mut items = Vec::new();

        for item in rss.channel.items.into_iter().take(max_items) {
            let title = normalize_text(item.title.as_deref().unwrap_or_default());
            let link = item.link.as_deref().unwrap_or_default();
            let parsed_date = item.pub_date.as_deref().and_then(parse_pub_date);
            let published_at = parsed_date.unwrap_or(fetched_at);

            let raw = match RawItem::new(&source.id, source.language, &title, link, published_at) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(source = %source.id, "⚠️ Skipping rss item: {}", e);
                    continue;
                }
            };

            let body = item.description.as_deref().map(normalize_text).unwrap_or_default();
            let external_id = item.guid.map(|g| g.value).unwrap_or_default();
            let raw = raw.with_body(body).with_external_id(external_id);
            items.push(if parsed_date.is_some() { raw } else { raw.with_estimated_date() });
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for RssFeedAdapter {
    async fn fetch_raw_items(&self, source: &FeedSourceConfig) -> Result<Vec<RawItem>> {
        let xml = fetch_text(
            &self.client,
            &source.id,
            &source.url,
            source.headers.as_ref(),
            source.request_timeout(),
        )
        .await?;
        let items = Self::parse_items(source, &xml, Utc::now())?;
        tracing::info!(source = %source.id, "📡 Fetched {} rss items", items.len());
        Ok(items)
    }
}

fn parse_pub_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// quick-xml 不認得 HTML 專用的實體
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::build_client;
    use crate::config::toml_config::FeedKind;
    use crate::core::fingerprint::{DefaultFingerprint, FingerprintStrategy};
    use crate::domain::model::Language;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use std::time::Duration;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Transport Department</title>
    <item>
      <title>Temporary road closure&nbsp;in Central</title>
      <link>https://www.td.gov.hk/en/p1.htm</link>
      <pubDate>Mon, 03 Jun 2024 08:30:00 +0800</pubDate>
      <guid isPermaLink="false">x1</guid>
      <description><![CDATA[<p>Lane closed <b>tonight</b>.</p>]]></description>
    </item>
    <item>
      <title>Broken item</title>
      <link>not a link</link>
    </item>
    <item>
      <title>Special traffic arrangements</title>
      <link>https://www.td.gov.hk/en/p2.htm</link>
    </item>
  </channel>
</rss>"#;

    fn source(url: &str) -> FeedSourceConfig {
        FeedSourceConfig {
            id: "td_press_en".to_string(),
            feed_group: "td_press".to_string(),
            kind: FeedKind::Rss,
            url: url.to_string(),
            language: Language::En,
            enabled: None,
            timeout_seconds: None,
            max_items: None,
            headers: None,
            items_path: None,
            field_mapping: None,
        }
    }

    #[test]
    fn test_parse_items_skips_invalid_and_keeps_guid() {
        let fetched_at = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();
        let items = RssFeedAdapter::parse_items(&source("https://x"), FEED, fetched_at).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Temporary road closure in Central");
        assert_eq!(items[0].external_id, "x1");
        assert_eq!(items[0].body.as_deref(), Some("Lane closed tonight."));
        assert_eq!(
            items[0].published_at,
            Utc.with_ymd_and_hms(2024, 6, 3, 0, 30, 0).unwrap()
        );

        // 沒有 pubDate 時使用抓取時間
        assert_eq!(items[1].published_at, fetched_at);
        assert!(items[1].published_at_estimated);
        assert!(!items[0].published_at_estimated);
        assert!(items[1].external_id.is_empty());
        assert!(!items[1].has_body());
    }

    #[test]
    fn test_undated_item_keeps_its_key_across_midnight() {
        let xml = r#"<rss version="2.0"><channel><title>TD</title>
            <item><title>Special traffic arrangements</title>
            <link>https://www.td.gov.hk/en/sta.htm</link></item>
            </channel></rss>"#;
        let src = source("https://x");
        let before = RssFeedAdapter::parse_items(&src, xml, Utc.with_ymd_and_hms(2024, 6, 3, 23, 50, 0).unwrap())
            .unwrap();
        let after = RssFeedAdapter::parse_items(&src, xml, Utc.with_ymd_and_hms(2024, 6, 4, 0, 10, 0).unwrap())
            .unwrap();

        let strategy = DefaultFingerprint;
        assert_eq!(
            strategy.fingerprint(&before[0], "td_press", true),
            strategy.fingerprint(&after[0], "td_press", true)
        );
    }

    #[test]
    fn test_max_items_limits_listing() {
        let mut src = source("https://x");
        src.max_items = Some(1);
        let items = RssFeedAdapter::parse_items(&src, FEED, Utc::now()).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_malformed_xml_is_adapter_error() {
        let err = RssFeedAdapter::parse_items(&source("https://x"), "<rss><channel>", Utc::now())
            .unwrap_err();
        assert!(matches!(err, HarvestError::AdapterFetchError { .. }));
    }

    #[tokio::test]
    async fn test_fetch_raw_items_over_http() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/en/rss.xml");
            then.status(200)
                .header("content-type", "application/rss+xml")
                .body(FEED);
        });

        let adapter = RssFeedAdapter::new(build_client(Duration::from_secs(5), "test").unwrap());
        let items = adapter
            .fetch_raw_items(&source(&server.url("/en/rss.xml")))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.language == Language::En));
    }

    #[tokio::test]
    async fn test_source_timeout_applies_to_the_request() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow.xml");
            then.status(200).delay(Duration::from_millis(2500)).body(FEED);
        });

        let adapter = RssFeedAdapter::new(build_client(Duration::from_secs(30), "test").unwrap());
        let mut src = source(&server.url("/slow.xml"));
        src.timeout_seconds = Some(1);

        let started = std::time::Instant::now();
        let err = adapter.fetch_raw_items(&src).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            HarvestError::AdapterFetchError { source_id, .. } => assert_eq!(source_id, "td_press_en"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

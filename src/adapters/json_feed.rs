use crate::adapters::html::normalize_text;
use crate::adapters::http::fetch_text;
use crate::config::toml_config::FeedSourceConfig;
use crate::domain::model::RawItem;
use crate::domain::ports::SourceAdapter;
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

/// JSON API 列表；以 items_path 找到陣列、以 field_mapping 對應欄位
pub struct JsonFeedAdapter {
    client: Client,
}

impl JsonFeedAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn parse_items(
        source: &FeedSourceConfig,
        json: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawItem>> {
        let items = match source.items_path.as_deref() {
            Some(path) => lookup(json, path),
            None => Some(json),
        }
        .and_then(Value::as_array)
        .ok_or_else(|| {
            HarvestError::adapter(
                &source.id,
                format!(
                    "no item array at '{}'",
                    source.items_path.as_deref().unwrap_or("<root>")
                ),
            )
        })?;

        let max_items = source.max_items.unwrap_or(usize::MAX);
        let mut out = Vec::new();

        for item in items.iter().take(max_items) {
            let field = |name: &str| lookup(item, source.mapped_field(name));
            let title = field("title").and_then(value_to_string).unwrap_or_default();
            let link = field("link").and_then(value_to_string).unwrap_or_default();
            let parsed_date = field("published_at").and_then(parse_timestamp);
            let published_at = parsed_date.unwrap_or(fetched_at);

            let raw = match RawItem::new(&source.id, source.language, normalize_text(&title), &link, published_at) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(source = %source.id, "⚠️ Skipping json item: {}", e);
                    continue;
                }
            };

            let body = field("body")
                .and_then(value_to_string)
                .map(|b| normalize_text(&b))
                .unwrap_or_default();
            let external_id = field("external_id").and_then(value_to_string).unwrap_or_default();
            let raw = raw.with_body(body).with_external_id(external_id);
            out.push(if parsed_date.is_some() { raw } else { raw.with_estimated_date() });
        }

        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for JsonFeedAdapter {
    async fn fetch_raw_items(&self, source: &FeedSourceConfig) -> Result<Vec<RawItem>> {
        let text = fetch_text(
            &self.client,
            &source.id,
            &source.url,
            source.headers.as_ref(),
            source.request_timeout(),
        )
        .await?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| HarvestError::adapter(&source.id, format!("parsing json: {}", e)))?;
        let items = Self::parse_items(source, &json, Utc::now())?;
        tracing::info!(source = %source.id, "📡 Fetched {} json items", items.len());
        Ok(items)
    }
}

/// 點號路徑，例如 "data.items" 或 "meta.urls.en"
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(value, |current, key| match current {
            Value::Object(map) => map.get(key),
            Value::Array(list) => key.parse::<usize>().ok().and_then(|i| list.get(i)),
            _ => None,
        })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64()?;
            // 13 位數視為毫秒
            if secs > 10_000_000_000 {
                DateTime::from_timestamp_millis(secs)
            } else {
                DateTime::from_timestamp(secs, 0)
            }
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .or_else(|_| DateTime::parse_from_rfc2822(s.trim()))
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::FeedKind;
    use crate::domain::model::Language;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;

    fn source() -> FeedSourceConfig {
        let mut mapping = HashMap::new();
        mapping.insert("title".to_string(), "headline".to_string());
        mapping.insert("link".to_string(), "urls.tc".to_string());
        mapping.insert("published_at".to_string(), "publish_time".to_string());
        mapping.insert("external_id".to_string(), "id".to_string());
        FeedSourceConfig {
            id: "hko_tc".to_string(),
            feed_group: "hko".to_string(),
            kind: FeedKind::Json,
            url: "https://hko.example/api".to_string(),
            language: Language::ZhHant,
            enabled: None,
            timeout_seconds: None,
            max_items: None,
            headers: None,
            items_path: Some("data.items".to_string()),
            field_mapping: Some(mapping),
        }
    }

    #[test]
    fn test_parse_items_with_mapping() {
        let json = json!({
            "data": {
                "items": [
                    {
                        "id": 42,
                        "headline": "暴雨警告",
                        "urls": { "tc": "https://hko.example/tc/42" },
                        "publish_time": 1717372800,
                        "body": "<p>黃色暴雨警告信號</p>"
                    },
                    { "headline": "沒有連結" }
                ]
            }
        });

        let items = JsonFeedAdapter::parse_items(&source(), &json, Utc::now()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "42");
        assert_eq!(items[0].title, "暴雨警告");
        assert_eq!(items[0].body.as_deref(), Some("黃色暴雨警告信號"));
        assert_eq!(
            items[0].published_at,
            Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
        );
        assert_eq!(items[0].language, Language::ZhHant);
    }

    #[test]
    fn test_missing_items_path_is_adapter_error() {
        let err = JsonFeedAdapter::parse_items(&source(), &json!({"data": {}}), Utc::now()).unwrap_err();
        assert!(matches!(err, HarvestError::AdapterFetchError { .. }));
    }
}

use crate::config::toml_config::HarvestConfig;
use crate::domain::model::{Article, ArticleKey, Signal, SignalPatch};
use crate::domain::ports::{
    merge_patch, select_articles, select_signals, storage_segment, ArticleStore, SignalFilter,
    SignalOrder, SignalStore,
};
use crate::utils::error::{HarvestError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashSet;
use std::env;
use tokio::sync::Mutex;

/// Lambda 執行環境的設定，全部來自環境變數
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub s3_bucket: String,
    pub s3_prefix: String,
    pub s3_region: String,
    /// 內嵌 TOML（HARVEST_CONFIG），否則讀取 HARVEST_CONFIG_PATH
    pub harvest_config: HarvestConfig,
}

impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        let harvest_config = match env::var("HARVEST_CONFIG") {
            Ok(inline) => HarvestConfig::from_toml_str(&inline)?,
            Err(_) => {
                let path = env::var("HARVEST_CONFIG_PATH").unwrap_or_else(|_| "harvest.toml".to_string());
                HarvestConfig::from_file(path)?
            }
        };

        Ok(Self {
            s3_bucket: env::var("S3_BUCKET").map_err(|_| HarvestError::MissingConfigError {
                field: "S3_BUCKET".to_string(),
            })?,
            s3_prefix: env::var("S3_PREFIX").unwrap_or_else(|_| "signal-harvest".to_string()),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "ap-east-1".to_string()),
            harvest_config,
        })
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        validate_s3_bucket_name("s3_bucket", &self.s3_bucket)?;
        validate_non_empty_string("s3_prefix", &self.s3_prefix)?;
        validate_aws_region("s3_region", &self.s3_region)?;
        self.harvest_config.validate_config()?;

        tracing::info!("✅ Lambda configuration validation passed");
        Ok(())
    }
}

fn validate_s3_bucket_name(field_name: &str, bucket_name: &str) -> Result<()> {
    let invalid = |reason: &str| HarvestError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: bucket_name.to_string(),
        reason: reason.to_string(),
    };

    if bucket_name.len() < 3 || bucket_name.len() > 63 {
        return Err(invalid("S3 bucket name must be between 3 and 63 characters"));
    }
    if !bucket_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid(
            "S3 bucket name can only contain lowercase letters, numbers, hyphens, and dots",
        ));
    }
    if bucket_name.starts_with('-') || bucket_name.ends_with('-') {
        return Err(invalid("S3 bucket name cannot start or end with a hyphen"));
    }
    Ok(())
}

fn validate_aws_region(field_name: &str, region: &str) -> Result<()> {
    validate_non_empty_string(field_name, region)?;
    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(HarvestError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: region.to_string(),
            reason: "AWS region can only contain lowercase letters, numbers, and hyphens".to_string(),
        });
    }
    Ok(())
}

/// S3 上的儲存：一筆紀錄一個 JSON 物件。
/// 合併只在同一個行程內序列化；多個 Lambda 同時寫同一 Signal 時後寫者勝出。
pub struct S3Store {
    client: S3Client,
    bucket: String,
    prefix: String,
    write_lock: Mutex<()>,
}

impl S3Store {
    pub fn new(client: S3Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_end_matches('/').to_string(),
            write_lock: Mutex::new(()),
        }
    }

    fn signal_key(&self, source_identifier: &str) -> String {
        format!("{}/signals/{}.json", self.prefix, storage_segment(source_identifier))
    }

    fn article_key(&self, key: &ArticleKey) -> String {
        format!(
            "{}/articles/{}/{}/{}.json",
            self.prefix,
            storage_segment(&key.category),
            storage_segment(&key.source),
            key.created_at.timestamp_micros()
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let resp = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(resp) => resp,
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(HarvestError::persistence(format!(
                    "Failed to read s3://{}/{}: {}",
                    self.bucket, key, service_error
                )));
            }
        };

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| HarvestError::persistence(format!("Failed to collect S3 data: {}", e)))?;
        Ok(Some(serde_json::from_slice(&data.into_bytes())?))
    }

    async fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                HarvestError::persistence(format!(
                    "Failed to write s3://{}/{}: {}",
                    self.bucket,
                    key,
                    e.into_service_error()
                ))
            })?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| {
                    HarvestError::persistence(format!("Failed to list {}: {}", prefix, e.into_service_error()))
                })?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .filter(|k| k.ends_with(".json"))
                    .map(str::to_string),
            );

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn load_all<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for key in self.list_keys(prefix).await? {
            if let Some(record) = self.get_json(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl SignalStore for S3Store {
    async fn find_signal_by_key(&self, key: &str) -> Result<Option<Signal>> {
        self.get_json(&self.signal_key(key)).await
    }

    async fn upsert_signal(&self, patch: &SignalPatch) -> Result<Signal> {
        let _guard = self.write_lock.lock().await;
        let key = self.signal_key(&patch.source_identifier);
        let existing = self.get_json::<Signal>(&key).await?;
        let (signal, changed) = merge_patch(existing, patch)?;
        if changed {
            self.put_json(&key, &signal).await?;
        }
        Ok(signal)
    }

    async fn query_signals(
        &self,
        filter: &SignalFilter,
        limit: Option<usize>,
        order: SignalOrder,
    ) -> Result<Vec<Signal>> {
        let signals = self.load_all(&format!("{}/signals/", self.prefix)).await?;
        Ok(select_signals(signals, filter, limit, order))
    }
}

#[async_trait]
impl ArticleStore for S3Store {
    async fn find_article(&self, key: &ArticleKey) -> Result<Option<Article>> {
        self.get_json(&self.article_key(key)).await
    }

    async fn article_exists(&self, source: &str, url: &str) -> Result<bool> {
        let articles: Vec<Article> = self.load_all(&format!("{}/articles/", self.prefix)).await?;
        Ok(articles.iter().any(|a| a.source == source && a.url == url))
    }

    async fn known_article_urls(&self, category: &str, source: &str) -> Result<HashSet<String>> {
        let prefix = format!(
            "{}/articles/{}/{}/",
            self.prefix,
            storage_segment(category),
            storage_segment(source)
        );
        let articles: Vec<Article> = self.load_all(&prefix).await?;
        Ok(articles.into_iter().map(|a| a.url).collect())
    }

    async fn upsert_article(&self, article: &Article) -> Result<()> {
        self.put_json(&self.article_key(&article.key()), article).await
    }

    async fn query_articles(&self, category: Option<&str>, limit: Option<usize>) -> Result<Vec<Article>> {
        let prefix = match category {
            Some(category) => format!("{}/articles/{}/", self.prefix, storage_segment(category)),
            None => format!("{}/articles/", self.prefix),
        };
        let articles = self.load_all(&prefix).await?;
        Ok(select_articles(articles, category, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_rules() {
        assert!(validate_s3_bucket_name("s3_bucket", "harvest-data").is_ok());
        assert!(validate_s3_bucket_name("s3_bucket", "ab").is_err());
        assert!(validate_s3_bucket_name("s3_bucket", "Harvest").is_err());
        assert!(validate_s3_bucket_name("s3_bucket", "-harvest").is_err());
    }

    #[test]
    fn test_region_rules() {
        assert!(validate_aws_region("s3_region", "ap-east-1").is_ok());
        assert!(validate_aws_region("s3_region", "AP_EAST").is_err());
    }
}

use crate::config::toml_config::HarvestConfig;
use crate::utils::error::{HarvestError, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

/// 所有 HTTP adapter 共用的 client（連線池共享）
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()?)
}

pub fn client_from_config(config: &HarvestConfig) -> Result<Client> {
    build_client(config.request_timeout(), config.user_agent())
}

/// GET 並回傳文字內容；非 2xx 視為該來源的抓取失敗
pub async fn fetch_text(
    client: &Client,
    source_id: &str,
    url: &str,
    headers: Option<&HashMap<String, String>>,
    timeout: Option<Duration>,
) -> Result<String> {
    let mut request = client.get(url);

    // 添加自定義標頭
    if let Some(headers) = headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }

    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    tracing::debug!("📡 {}: GET {}", source_id, url);
    let response = request
        .send()
        .await
        .map_err(|e| HarvestError::adapter(source_id, format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::adapter(
            source_id,
            format!("HTTP {} from {}", status.as_u16(), url),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| HarvestError::adapter(source_id, format!("reading body of {}: {}", url, e)))
}

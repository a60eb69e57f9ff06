use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as S3Client;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Deserialize;
use signal_harvest::config::lambda::{LambdaConfig, S3Store};
use signal_harvest::utils::logger;
use signal_harvest::utils::validation::Validate;
use signal_harvest::{EntryResponse, HarvestService};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Aggregate,
    Enrich,
    EnrichOne,
    Outlet,
    Outlets,
    ProcessingStats,
    ScrapingStats,
}

/// 排程觸發的事件；headers 帶呼叫者身分
#[derive(Debug, Deserialize)]
pub struct Request {
    pub action: Action,
    pub limit: Option<usize>,
    pub id: Option<String>,
    pub outlet: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn to_json<T: serde::Serialize>(response: EntryResponse<T>) -> Result<serde_json::Value, Error> {
    Ok(serde_json::to_value(response)?)
}

async fn function_handler(service: &HarvestService, event: LambdaEvent<Request>) -> Result<serde_json::Value, Error> {
    let request = event.payload;
    let headers = &request.headers;
    tracing::info!("Handling {:?}", request.action);

    match request.action {
        Action::Aggregate => to_json(service.aggregate_signals(headers).await),
        Action::Enrich => to_json(service.enrich_incomplete_signals(headers, request.limit).await),
        Action::EnrichOne => match request.id.as_deref() {
            Some(id) => to_json(service.enrich_signal_by_id(headers, id).await),
            None => to_json::<()>(service.reject_incomplete_request(headers, "enrich_one", "id").await),
        },
        Action::Outlet => match request.outlet.as_deref() {
            Some(outlet) => to_json(service.run_outlet_scraper(headers, outlet).await),
            None => to_json::<()>(service.reject_incomplete_request(headers, "outlet", "outlet").await),
        },
        Action::Outlets => to_json(service.run_all_outlet_scrapers(headers).await),
        Action::ProcessingStats => to_json(service.processing_statistics(headers).await),
        Action::ScrapingStats => to_json(service.scraping_statistics(headers).await),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();

    let lambda_config = LambdaConfig::from_env()?;
    lambda_config.validate()?;

    // 創建AWS配置和S3客戶端
    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .region(Region::new(lambda_config.s3_region.clone()))
        .force_path_style(true)
        .build();
    let store = Arc::new(S3Store::new(
        S3Client::from_conf(s3_config),
        lambda_config.s3_bucket.clone(),
        lambda_config.s3_prefix.clone(),
    ));

    let service = Arc::new(HarvestService::from_config(
        lambda_config.harvest_config,
        store.clone(),
        store,
    )?);

    run(service_fn(move |event: LambdaEvent<Request>| {
        let service = service.clone();
        async move { function_handler(&service, event).await }
    }))
    .await
}

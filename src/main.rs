use clap::Parser;
use serde::Serialize;
use signal_harvest::adapters::csv_export::write_signals_csv;
use signal_harvest::domain::ports::{SignalFilter, SignalOrder, SignalStore};
use signal_harvest::utils::error::{ErrorSeverity, HarvestError};
use signal_harvest::utils::logger;
use signal_harvest::{Cli, Command, EntryResponse, FileStore, HarvestConfig, HarvestService};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 初始化日誌
    logger::init_cli_logger(cli.verbose);
    tracing::info!("Starting signal-harvest CLI");
    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    let config = match HarvestConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    let store = Arc::new(FileStore::new(config.storage.path.clone()));
    let service = match HarvestService::from_config(config, store.clone(), store.clone()) {
        Ok(service) => service,
        Err(e) => exit_with(&e),
    };
    let headers = service.local_headers();

    let ok = match cli.command {
        Command::Aggregate => report(service.aggregate_signals(&headers).await),
        Command::Enrich { limit } => report(service.enrich_incomplete_signals(&headers, limit).await),
        Command::EnrichOne { id } => {
            let response = service.enrich_signal_by_id(&headers, &id).await;
            let succeeded = matches!(&response, EntryResponse::Completed { result } if result.success);
            report(response) && succeeded
        }
        Command::Outlet { name } => {
            let response = service.run_outlet_scraper(&headers, &name).await;
            let succeeded = matches!(&response, EntryResponse::Completed { result } if result.success);
            report(response) && succeeded
        }
        Command::Outlets { list: true } => {
            for name in service.outlets() {
                println!("{}", name);
            }
            true
        }
        Command::Outlets { list: false } => report(service.run_all_outlet_scrapers(&headers).await),
        Command::Stats => {
            let processing = report(service.processing_statistics(&headers).await);
            let scraping = report(service.scraping_statistics(&headers).await);
            processing && scraping
        }
        Command::Export { output } => {
            let signals = match store
                .query_signals(&SignalFilter::all(), None, SignalOrder::CreatedAtDesc)
                .await
            {
                Ok(signals) => signals,
                Err(e) => exit_with(&e),
            };
            let file = match std::fs::File::create(&output) {
                Ok(file) => file,
                Err(e) => exit_with(&HarvestError::IoError(e)),
            };
            match write_signals_csv(&signals, file) {
                Ok(rows) => {
                    tracing::info!("📁 Exported {} rows to {}", rows, output.display());
                    println!("✅ Exported {} rows to {}", rows, output.display());
                    true
                }
                Err(e) => exit_with(&e),
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
}

/// 印出 JSON 結果，回傳是否為 completed
fn report<T: Serialize>(response: EntryResponse<T>) -> bool {
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("❌ Could not render result: {}", e),
    }
    response.is_completed()
}

fn exit_with(e: &HarvestError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}

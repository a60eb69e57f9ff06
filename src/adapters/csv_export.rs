use crate::domain::model::Signal;
use crate::utils::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct SignalRow<'a> {
    source_identifier: &'a str,
    feed_group: &'a str,
    processing_status: &'a str,
    retry_count: u32,
    language: &'static str,
    title: &'a str,
    link: &'a str,
    body_chars: usize,
    scraped_at: String,
    scrape_failure: &'a str,
    updated_at: String,
}

/// 每個 Signal × 語言輸出一列；沒有內容但有網址的語言也會列出
pub fn write_signals_csv<W: Write>(signals: &[Signal], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut rows = 0;

    for signal in signals {
        let mut languages: Vec<_> = signal.languages.keys().chain(signal.meta_urls.keys()).copied().collect();
        languages.sort();
        languages.dedup();

        for lang in languages {
            let content = signal.languages.get(&lang);
            csv_writer.serialize(SignalRow {
                source_identifier: &signal.source_identifier,
                feed_group: &signal.feed_group,
                processing_status: signal.processing_status.as_str(),
                retry_count: signal.retry_count,
                language: lang.code(),
                title: content.map(|c| c.title.as_str()).unwrap_or_default(),
                link: content
                    .map(|c| c.link.as_str())
                    .or_else(|| signal.meta_urls.get(&lang).map(String::as_str))
                    .unwrap_or_default(),
                body_chars: content.map(|c| c.body.chars().count()).unwrap_or_default(),
                scraped_at: content
                    .and_then(|c| c.scraped_at)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                scrape_failure: signal.scrape_failures.get(&lang).map(String::as_str).unwrap_or_default(),
                updated_at: signal.updated_at.to_rfc3339(),
            })?;
            rows += 1;
        }
    }

    csv_writer.flush()?;
    Ok(rows)
}

// Adapters layer: concrete implementations of the domain ports (http sources, page extraction, storage).

pub mod csv_export;
pub mod file_store;
pub mod html;
pub mod http;
pub mod json_feed;
pub mod memory_store;
pub mod outlet;
pub mod rss;

pub use file_store::FileStore;
pub use html::HtmlContentExtractor;
pub use json_feed::JsonFeedAdapter;
pub use memory_store::MemoryStore;
pub use outlet::HttpOutletScraper;
pub use rss::RssFeedAdapter;

pub mod toml_config;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "lambda")]
pub mod lambda;

pub use toml_config::{
    ExtractorConfig, FeedGroupConfig, FeedKind, FeedSourceConfig, HarvestConfig, OutletConfig,
};

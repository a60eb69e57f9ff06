pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::{Cli, Command};

#[cfg(feature = "lambda")]
pub use config::lambda::{LambdaConfig, S3Store};

pub use adapters::{FileStore, MemoryStore};
pub use config::HarvestConfig;
pub use core::{EntryResponse, HarvestService};
pub use domain::model::{Language, ProcessingStatus, Signal};
pub use utils::error::{HarvestError, Result};

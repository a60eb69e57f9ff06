pub mod aggregator;
pub mod enricher;
pub mod fingerprint;
pub mod orchestrator;
pub mod service;

pub use aggregator::{FeedRegistry, SignalsAggregator};
pub use enricher::{ExtractorRegistry, SignalsScraper};
pub use fingerprint::{DefaultFingerprint, FingerprintStrategy, GroupingEngine, GroupingPolicy, SignalUpdate};
pub use orchestrator::{OutletOrchestrator, OutletRegistry};
pub use service::{CallerAuth, EntryResponse, HarvestService};
pub use crate::utils::error::Result;

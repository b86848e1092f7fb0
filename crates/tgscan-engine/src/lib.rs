//! Discovery, backfill, and live ingestion engine for the group scanner.
//!
//! The engine talks to the messaging service only through
//! [`RemoteClient`] and delivers results only through [`MatchSink`]; both
//! are supplied by the embedding application.

pub mod backfill;
pub mod cache;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod rate_limit;
pub mod remote;
pub mod retry;
pub mod sink;

pub use backfill::{BackfillScanner, BackfillSummary, ScanResult};
pub use cache::GroupCache;
pub use controller::{ScannerController, ScannerStatus};
pub use discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryResult};
pub use error::{CacheError, ControlError, RemoteError, ScanError, SinkError};
pub use filter::{evaluate, evaluate_text, Criteria, CriteriaHandle, Verdict};
pub use pipeline::{IngestionPipeline, PipelineConfig, PipelineCounters, PipelineHandle, PipelineStats};
pub use rate_limit::{LimiterSnapshot, RateLimiter, RateLimiterConfig};
pub use remote::{Dialog, DialogCursor, DialogKind, DialogPage, RemoteClient, Subscription};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use sink::{ChannelSink, DedupSink, MatchSink};

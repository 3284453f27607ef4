//! Kindred-spirit overlap analysis.
//!
//! Given a wallet and a selection of assets it holds (NFT collections, POAP
//! events, ERC-20 tokens), fetch every asset's holders from the chain data
//! providers, count how many selected assets each other wallet shares, and
//! return the strongest overlaps. `api` exposes this over HTTP.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod compiler;
pub mod concurrency;
pub mod config;
pub mod constants;
pub mod error;
pub mod holders;
pub mod metrics;
pub mod overlap;
pub mod progress;
pub mod retry;
pub mod telemetry;
pub mod topk;
pub mod types;
pub mod validation;

pub use aggregator::{AggregatorConfig, OverlapAggregator};
pub use error::{AnalysisError, FetchError};
pub use types::{AnalyzeRequest, AnalyzeResult};

//! URLGuard Evaluation Engine
//!
//! Decides whether a URL is likely fraudulent by running a fixed set of
//! independent probes against it and reporting each verdict separately.
//!
//! # Features
//! - Cache-aside lookups keyed by normalized URL (moka or Redis, 1h TTL)
//! - Concurrent probe fan-out with per-probe deadlines
//! - Failure isolation: a broken probe becomes a labeled error entry
//! - Order-stable reports, independent of completion order
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          ORCHESTRATOR                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   raw URL ──► normalize ──► CacheStore::get ──► hit ──► report  │
//! │                                  │                              │
//! │                                 miss                            │
//! │                                  ▼                              │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌───────┐  │
//! │  │Reputation│ │ Content  │ │  WHOIS   │ │Classifier│ │ Model │..│
//! │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └────┬─────┘ └───┬───┘  │
//! │       └────────────┴─────┬──────┴────────────┴───────────┘      │
//! │                          ▼  ordered join, overall deadline      │
//! │               ┌─────────────────────┐                           │
//! │               │  build_report       │                           │
//! │               └──────────┬──────────┘                           │
//! │                          ▼                                      │
//! │                 CacheStore::put (TTL)                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod features;
pub mod normalize;
pub mod orchestrator;
pub mod probe;
pub mod probes;

pub use aggregator::{AggregateReport, EntryStatus, ReportEntry};
pub use cache::{build_cache, CacheStore};
pub use config::GuardConfig;
pub use error::{CacheError, GuardError, GuardResult, ProbeError};
pub use normalize::{normalize, NormalizedUrl};
pub use orchestrator::{EvaluationStats, Orchestrator};
pub use probe::{Probe, ProbeKind, ProbeOutcome, ProbeStatus, ProbeVerdict, Rating};
pub use probes::build_probes;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build an orchestrator from configuration
pub fn build_orchestrator(config: &GuardConfig) -> GuardResult<Orchestrator> {
    let probes = build_probes(&config.probes)?;
    let cache = build_cache(&config.cache);
    Ok(Orchestrator::new(probes, cache, config.cache.ttl()))
}

//! # Service Measure Library
//!
//! Concurrent measurement of serverless service instantiation latency.
//! For every service the library reconstructs the readiness chain of the
//! platform objects behind it and reports how long each stage took.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `platform`: Read-only platform abstraction and the JSON snapshot backend
//! - `enumerator`: Builds the ordered list of services to measure
//! - `resolver`: Per-service readiness chain and failure classification
//! - `engine`: Worker pool, dispatch and merge of per-worker results
//! - `metrics`: Classification counts, stage sums and worker accumulators
//! - `stats`: Averages, median, extrema and percentiles
//! - `results`: Final result record, row tables and console summary
//! - `report`: CSV, JSON and HTML writers
//! - `cli`: Command-line interface parsing and configuration management
//! - `logging`: Console formatter and subscriber setup
//! - `utils`: Formatting, validation and system information helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use service_measure::{EngineConfig, MeasureRunner, SnapshotPlatform, Target};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = SnapshotPlatform::from_path(Path::new("cluster.json"))?;
//!     let runner = MeasureRunner::new(EngineConfig::default(), Arc::new(platform));
//!
//!     let targets = vec![Target::new("ksvc-1", "perf"), Target::new("ksvc-2", "perf")];
//!     let outcome = runner.run(targets).await?;
//!
//!     println!("{}", outcome.results.summary());
//!     Ok(())
//! }
//! ```

/// Command-line interface and configuration
///
/// Provides argument parsing using clap and converts the flags into a
/// validated `MeasureConfig`:
/// - Explicit range and namespace discovery target sources
/// - Worker count validation
/// - Duration parsing for the lookup timeout (e.g., "500ms", "10s")
pub mod cli;

/// Worker pool and run orchestration
pub mod engine;

/// Target list construction
pub mod enumerator;

pub mod logging;

/// Classification counts, stage sums and per-worker accumulation
pub mod metrics;

/// Platform abstraction
///
/// The `Platform` trait is the only seam between the engine and the serving
/// platform. The bundled implementation reads a JSON snapshot.
pub mod platform;

/// Report file writers
pub mod report;

/// Per-service readiness chain resolution
pub mod resolver;

/// Result record, row tables and console rendering
pub mod results;

/// Summary statistics over the overall-ready durations
pub mod stats;

pub mod utils;

// Re-export key types for convenient library usage

pub use cli::{Args, MeasureConfig};
pub use engine::{EngineConfig, MeasureOutcome, MeasureRunner};
pub use platform::{Platform, PlatformError, PlatformSnapshot, SnapshotPlatform};
pub use report::ReportWriter;
pub use resolver::{Classification, Resolution, Resolver, Stage, Target};
pub use results::{MeasureResults, ResultTables};

/// The current version of the measurement tool
///
/// Populated from Cargo.toml and recorded in the JSON report for
/// reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default number of concurrent workers
    ///
    /// Ten workers keep a moderate number of lookups in flight against the
    /// platform API. Override with `--concurrency`.
    pub const CONCURRENCY: usize = 10;

    /// Default output directory for report files
    pub const OUTPUT_DIR: &str = ".";
}

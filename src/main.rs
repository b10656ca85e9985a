//! # Service Measure - Main Entry Point
//!
//! Measures the instantiation latency of serverless services from a platform
//! snapshot and writes the results as CSV, JSON and HTML reports.
//!
//! ## Run Overview
//!
//! 1. **Parse arguments**: Processes command-line configuration
//! 2. **Initialize logging**: Colorized console output, optional log file
//! 3. **Validate configuration**: Target sources, worker count, output location
//! 4. **Enumerate targets**: Explicit range and namespace discovery
//! 5. **Measure**: Resolves every target through the worker pool
//! 6. **Report**: Prints the summary and writes report files when any service was ready
//!
//! ## Error Handling
//!
//! Configuration, enumeration and output location errors end the run with a
//! non-zero exit status. Failures of individual services are classified and
//! counted instead, and only show up in the summary.

use anyhow::{Context, Result};
use clap::Parser;
use service_measure::{
    cli::{Args, MeasureConfig},
    engine::MeasureRunner,
    enumerator::enumerate_targets,
    logging,
    platform::SnapshotPlatform,
    report::ReportWriter,
};
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Starting Service Measure {}", service_measure::VERSION);
    debug!("Configuration: {:?}", args);

    let config = MeasureConfig::from_args(&args)?;

    // Fail on a bad output location before any service is measured.
    let writer = ReportWriter::prepare(&config.output_dir)
        .context("failed to check measure output location")?;

    let platform = Arc::new(SnapshotPlatform::from_path(&config.snapshot)?);

    let targets = enumerate_targets(platform.as_ref(), &config.sources).await?;

    let runner = MeasureRunner::new(config.engine.clone(), platform);
    let outcome = runner.run(targets).await?;

    println!("{}", outcome.results.summary());

    if outcome.results.has_samples() {
        let written = writer.write_all(&outcome.results, &outcome.tables);
        debug!("Wrote {} report files", written.len());
    }

    Ok(())
}

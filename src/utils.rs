//! # Utility Functions and Helper Module
//!
//! This module provides small helpers used throughout the measurement engine.
//! It includes formatters for report cells and console output, validation
//! functions for input parameters, and system information utilities.
//!
//! ## Key Functionality Categories
//!
//! - **Formatting**: Report timestamps, durations and percentages
//! - **Ordering**: Numeric suffix extraction for deterministic row order
//! - **Validation**: Input parameter validation with clear error messages
//! - **System Information**: Platform and hardware detection utilities
//!
//! ## Usage Examples
//!
//! ```rust
//! use service_measure::utils::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! // Rows are ordered by the numeric suffix of the service name
//! assert_eq!(numeric_suffix("ksvc-42"), 42);
//!
//! // Console durations use compact unit notation
//! assert_eq!(format_whole_seconds(95), "1m35s");
//!
//! validate_concurrency(10)?; // OK
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use uuid::Uuid;

/// Value printed for a timestamp that was never observed
pub const ZERO_TIME: &str = "0001-01-01 00:00:00 +0000 UTC";

/// Upper bound accepted for the worker count
pub const MAX_CONCURRENCY: usize = 1024;

/// Generate a unique identifier for a measurement run
///
/// Creates a UUID v4 string that identifies one run in the JSON report and
/// in log output, so several runs written to the same output directory can
/// be told apart.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Extract the numeric suffix of a service name
///
/// The suffix is the text after the last `-`. Names without a dash or with
/// a non-numeric suffix yield 0, so they sort ahead of numbered services.
///
/// ## Examples
///
/// ```rust
/// # use service_measure::utils::numeric_suffix;
/// assert_eq!(numeric_suffix("ksvc-10"), 10);
/// assert_eq!(numeric_suffix("my-app-3"), 3);
/// assert_eq!(numeric_suffix("frontend"), 0);
/// assert_eq!(numeric_suffix("svc-abc"), 0);
/// ```
pub fn numeric_suffix(name: &str) -> i64 {
    name.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse::<i64>().ok())
        .unwrap_or(0)
}

/// Share of `part` in `total` as a percentage
///
/// Returns 0.0 for an empty total rather than NaN.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Format a timestamp for the raw timestamps table
///
/// Timestamps are rendered in UTC with an explicit zone suffix, for example
/// `2024-05-01 10:00:04 +0000 UTC`. A missing timestamp renders as the zero
/// time so that every raw row has the same number of populated cells.
pub fn format_report_timestamp<Tz: TimeZone>(timestamp: Option<&DateTime<Tz>>) -> String {
    match timestamp {
        Some(ts) => ts
            .with_timezone(&chrono::Utc)
            .format("%Y-%m-%d %H:%M:%S +0000 UTC")
            .to_string(),
        None => ZERO_TIME.to_string(),
    }
}

/// File name prefix shared by every report of one run
///
/// ## Format
///
/// `YYYYMMDDHHMMSS` in local time, e.g. `20240501100000`.
pub fn report_prefix(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Format a whole number of seconds in compact unit notation
///
/// ## Examples
///
/// ```rust
/// # use service_measure::utils::format_whole_seconds;
/// assert_eq!(format_whole_seconds(0), "0s");
/// assert_eq!(format_whole_seconds(20), "20s");
/// assert_eq!(format_whole_seconds(60), "1m0s");
/// assert_eq!(format_whole_seconds(3661), "1h1m1s");
/// ```
pub fn format_whole_seconds(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let total = seconds.unsigned_abs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}{}h{}m{}s", sign, hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}{}m{}s", sign, minutes, secs)
    } else {
        format!("{}{}s", sign, secs)
    }
}

/// Validate worker count
///
/// Ensures the concurrency level is positive and within the supported
/// maximum. Each worker holds one in-flight resolution, so the upper bound
/// caps the number of simultaneous lookups against the platform.
///
/// ## Parameters
/// - `concurrency`: Number of workers to validate
///
/// ## Returns
/// - `Ok(())`: Concurrency level is valid
/// - `Err`: Concurrency is zero or exceeds `MAX_CONCURRENCY`
pub fn validate_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        anyhow::bail!("Concurrency cannot be zero");
    }
    if concurrency > MAX_CONCURRENCY {
        anyhow::bail!(
            "Concurrency {} is too high (maximum {})",
            concurrency,
            MAX_CONCURRENCY
        );
    }
    Ok(())
}

/// Get the number of CPU cores available
///
/// Returns the number of logical CPU cores available to the current process,
/// reported in the run metadata for reproducibility.
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

//! # Report Writers
//!
//! Persists one measurement run to the output directory. Every run writes up
//! to four files sharing a `YYYYMMDDHHMMSS_` prefix:
//!
//! - `raw_ksvc_creation_time.csv`: raw timestamps, one row per ready service
//! - `ksvc_creation_time.csv`: stage durations in whole seconds
//! - `ksvc_creation_time.json`: the full `MeasureResults` record
//! - `ksvc_creation_time.html`: the durations table as a standalone page
//!
//! Writers are independent. A failing writer is logged and the others still
//! run, so a single unwritable file never discards the rest of the run.

use crate::results::{MeasureResults, ResultTables, DURATION_HEADERS, RAW_HEADERS};
use crate::utils::report_prefix;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const RAW_CSV_FILE: &str = "raw_ksvc_creation_time.csv";
pub const CSV_FILE: &str = "ksvc_creation_time.csv";
pub const JSON_FILE: &str = "ksvc_creation_time.json";
pub const HTML_FILE: &str = "ksvc_creation_time.html";

/// Writes report files into a validated output directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    /// Validate the output location, creating it when missing
    ///
    /// Called before any target is dispatched so that a bad location fails
    /// the run up front instead of after the measurement.
    pub fn prepare(output_dir: &Path) -> Result<Self> {
        if output_dir.exists() {
            if !output_dir.is_dir() {
                anyhow::bail!(
                    "output location {} exists and is not a directory",
                    output_dir.display()
                );
            }
        } else {
            fs::create_dir_all(output_dir).with_context(|| {
                format!("failed to create output directory {}", output_dir.display())
            })?;
            debug!("Created output directory {}", output_dir.display());
        }

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn path_for(&self, prefix: &str, file: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{}", prefix, file))
    }

    /// Write every report for the run, stamped with the current local time
    pub fn write_all(&self, results: &MeasureResults, tables: &ResultTables) -> Vec<PathBuf> {
        self.write_all_at(results, tables, &Local::now())
    }

    /// Write every report using `now` for the file prefix
    ///
    /// Returns the paths that were written successfully.
    pub fn write_all_at(
        &self,
        results: &MeasureResults,
        tables: &ResultTables,
        now: &DateTime<Local>,
    ) -> Vec<PathBuf> {
        let prefix = report_prefix(now);
        let mut written = Vec::new();

        let raw_path = self.path_for(&prefix, RAW_CSV_FILE);
        match write_csv(&raw_path, &RAW_HEADERS, tables.raw()) {
            Ok(()) => {
                info!("Raw Timestamp saved in CSV file {}", raw_path.display());
                written.push(raw_path);
            }
            Err(e) => error!("failed to generate raw timestamp file and skip: {:#}", e),
        }

        let csv_path = self.path_for(&prefix, CSV_FILE);
        match write_csv(&csv_path, &DURATION_HEADERS, tables.durations()) {
            Ok(()) => {
                info!("Measurement saved in CSV file {}", csv_path.display());
                written.push(csv_path);
            }
            Err(e) => error!("failed to generate CSV file and skip: {:#}", e),
        }

        let json_path = self.path_for(&prefix, JSON_FILE);
        match write_json(&json_path, results) {
            Ok(()) => {
                info!("Measurement saved in JSON file {}", json_path.display());
                written.push(json_path);
            }
            Err(e) => error!("failed to generate JSON file and skip: {:#}", e),
        }

        let html_path = self.path_for(&prefix, HTML_FILE);
        match write_html(&html_path, results, tables) {
            Ok(()) => {
                info!(
                    "Visualized measurement saved in HTML file {}",
                    html_path.display()
                );
                written.push(html_path);
            }
            Err(e) => error!("failed to generate HTML file and skip: {:#}", e),
        }

        written
    }
}

/// Quote a CSV field when it contains a separator, quote or line break
fn csv_field(field: &str) -> String {
    let needs_quotes = field.contains(',')
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r')
        || field.starts_with(' ');
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_csv_line<W: Write>(out: &mut W, fields: &[&str]) -> std::io::Result<()> {
    let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(out, "{}", line.join(","))
}

/// Write a header row followed by data rows
pub fn write_csv(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    write_csv_line(&mut out, headers)?;
    for row in rows {
        let fields: Vec<&str> = row.iter().map(String::as_str).collect();
        write_csv_line(&mut out, &fields)?;
    }
    out.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Write the serialized results record
pub fn write_json(path: &Path, results: &MeasureResults) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Write the durations table as a standalone HTML page
pub fn write_html(path: &Path, results: &MeasureResults, tables: &ResultTables) -> Result<()> {
    let mut page = String::new();
    page.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    page.push_str("<title>Knative Service Creation Time</title>\n");
    page.push_str(
        "<style>table{border-collapse:collapse}td,th{border:1px solid #999;padding:2px 6px;text-align:right}</style>\n",
    );
    page.push_str("</head>\n<body>\n<h1>Knative Service Creation Time</h1>\n");

    let c = &results.service;
    page.push_str(&format!(
        "<p>Total: {} | Ready: {} NotReady: {} NotFound: {} Fail: {}</p>\n",
        c.total(),
        c.ready_count,
        c.not_ready_count,
        c.not_found_count,
        c.fail_count
    ));
    if let Some(overall) = &results.overall {
        page.push_str(&format!(
            "<p>Overall average: {:.6}s | Median: {:.6}s | P99: {:.6}s</p>\n",
            overall.overall_average, overall.overall_median, overall.p99
        ));
    }

    page.push_str("<table>\n<tr>");
    for header in DURATION_HEADERS {
        page.push_str(&format!("<th>{}</th>", escape_html(header)));
    }
    page.push_str("</tr>\n");
    for row in tables.durations() {
        page.push_str("<tr>");
        for cell in row {
            page.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        page.push_str("</tr>\n");
    }
    page.push_str("</table>\n</body>\n</html>\n");

    fs::write(path, page).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

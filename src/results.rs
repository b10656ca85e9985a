//! # Measurement Results
//!
//! The run-wide result record and the two per-target row tables.
//!
//! `MeasureResults` is built once, after every worker has been joined, from
//! the merged `Aggregate`. It is what the JSON report serializes and what the
//! console summary renders. `ResultTables` collects one durations row and one
//! raw timestamps row per `Ready` target while the pool is running.

use crate::metrics::{Aggregate, ClassificationCounts, StageSums};
use crate::platform::PlatformInfo;
use crate::resolver::{Sample, Stage, Target};
use crate::stats::{self, OverallStatistics, StageAverages};
use crate::utils::{
    format_report_timestamp, format_whole_seconds, numeric_suffix, percentage,
};
use serde::Serialize;
use std::fmt;

/// Header of the computed durations table
pub const DURATION_HEADERS: [&str; 2 + Stage::COUNT] = [
    "svc_name",
    "svc_namespace",
    "configuration_ready",
    "revision_ready",
    "deployment_created",
    "pod_scheduled",
    "containers_ready",
    "queue-proxy_started",
    "user-container_started",
    "route_ready",
    "kpa_active",
    "sks_ready",
    "sks_activator_endpoints_populated",
    "sks_endpoints_populated",
    "ingress_ready",
    "ingress_config_ready",
    "ingress_lb_ready",
    "overall_ready",
];

/// Header of the raw timestamps table
pub const RAW_HEADERS: [&str; 21] = [
    "svc_name",
    "svc_namespace",
    "svc_created",
    "configuration_ready",
    "revision_created",
    "revision_ready",
    "deployment_created",
    "pod_created",
    "pod_scheduled",
    "containers_ready",
    "queue-proxy_started",
    "user-container_started",
    "route_ready",
    "kpa_created",
    "kpa_active",
    "sks_created",
    "sks_activator_endpoints_populated",
    "sks_endpoints_populated",
    "ingress_created",
    "ingress_config_ready",
    "ingress_lb_ready",
];

/// Order in which the console tree lists the stages
const CONSOLE_ORDER: [Stage; Stage::COUNT - 1] = [
    Stage::ConfigurationReady,
    Stage::RevisionReady,
    Stage::DeploymentCreated,
    Stage::PodScheduled,
    Stage::ContainersReady,
    Stage::QueueProxyStarted,
    Stage::UserContainerStarted,
    Stage::AutoscalerActive,
    Stage::MeshReady,
    Stage::MeshActivatorEndpointsPopulated,
    Stage::MeshEndpointsPopulated,
    Stage::RouteReady,
    Stage::IngressReady,
    Stage::IngressNetworkConfigured,
    Stage::IngressLoadBalancerReady,
];

/// System information for reproducibility
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub measure_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            measure_version: crate::VERSION.to_string(),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub concurrency: usize,
    pub total_targets: usize,
    pub system_info: SystemInfo,
}

impl RunMetadata {
    pub fn new(concurrency: usize, total_targets: usize) -> Self {
        Self {
            run_id: crate::utils::generate_run_id(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            concurrency,
            total_targets,
            system_info: SystemInfo::default(),
        }
    }
}

/// Final result of one measurement run
#[derive(Debug, Clone, Serialize)]
pub struct MeasureResults {
    pub metadata: RunMetadata,
    pub platform: PlatformInfo,
    pub service: ClassificationCounts,
    /// Ready targets whose revision had no pod
    pub partial_samples: usize,
    pub sums: StageSums,
    /// Per-stage averages, absent when nothing was ready
    pub averages: Option<StageAverages>,
    /// Overall-ready statistics, absent when nothing was ready
    pub overall: Option<OverallStatistics>,
    /// Overall-ready seconds of every ready target, ascending
    pub overall_ready_seconds: Vec<f64>,
}

impl MeasureResults {
    pub fn new(aggregate: Aggregate, platform: PlatformInfo, metadata: RunMetadata) -> Self {
        let averages = StageAverages::compute(&aggregate.sums, &aggregate.counts);
        let overall = stats::summarize(
            &aggregate.overall_ready,
            aggregate.sums.get(Stage::OverallReady),
        );

        Self {
            metadata,
            platform,
            service: aggregate.counts,
            partial_samples: aggregate.partial_samples,
            sums: aggregate.sums,
            averages,
            overall,
            overall_ready_seconds: aggregate.overall_ready,
        }
    }

    /// Number of targets classified, across all buckets
    pub fn total(&self) -> usize {
        self.service.total()
    }

    /// Whether any target produced a sample
    pub fn has_samples(&self) -> bool {
        self.service.ready_count > 0
    }

    /// Console rendering of the run summary
    pub fn summary(&self) -> SummaryDisplay<'_> {
        SummaryDisplay { results: self }
    }
}

/// Console rendering of `MeasureResults`
pub struct SummaryDisplay<'a> {
    results: &'a MeasureResults,
}

impl<'a> SummaryDisplay<'a> {
    fn basic_information(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.results.platform;
        writeln!(f, "Basic Information:")?;
        writeln!(f, "  - Knative Versions:")?;
        writeln!(f, "    Serving: {}", info.serving_version)?;
        writeln!(f, "    Eventing: {}", info.eventing_version)?;
        writeln!(f, "  - Ingress Information:")?;
        writeln!(f, "    Controller: {}", info.ingress_controller)?;
        writeln!(f, "    Version: {}", info.ingress_version)
    }

    fn counts_line(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.results.service;
        writeln!(
            f,
            "Total: {} | Ready: {} NotReady: {} NotFound: {} Fail: {}",
            c.total(),
            c.ready_count,
            c.not_ready_count,
            c.not_found_count,
            c.fail_count
        )
    }

    fn percentages_line(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.results.service;
        let total = c.total();
        writeln!(
            f,
            "Total: {} | Ready: {} ({:.2}%)  NotReady: {} ({:.2}%)  \
             NotFound: {} ({:.2}%)  Fail: {} ({:.2}%)",
            total,
            c.ready_count,
            percentage(c.ready_count, total),
            c.not_ready_count,
            percentage(c.not_ready_count, total),
            c.not_found_count,
            percentage(c.not_found_count, total),
            c.fail_count,
            percentage(c.fail_count, total),
        )
    }
}

impl<'a> fmt::Display for SummaryDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let results = self.results;
        let (averages, overall) = match (&results.averages, &results.overall) {
            (Some(averages), Some(overall)) => (averages, overall),
            _ => {
                writeln!(f, "-----------------------------")?;
                self.basic_information(f)?;
                writeln!(f, "Service Ready Measurement:")?;
                return self.percentages_line(f);
            }
        };

        writeln!(f, "-------- Measurement --------")?;
        self.basic_information(f)?;
        self.counts_line(f)?;

        for stage in CONSOLE_ORDER {
            if stage == Stage::RouteReady {
                writeln!(f)?;
            }
            let depth = stage.depth();
            let heading = if depth == 0 {
                String::new()
            } else {
                format!("{}- ", "  ".repeat(depth - 1))
            };
            let body = "  ".repeat(depth);
            writeln!(f, "{}{} Duration:", heading, stage.label())?;
            writeln!(f, "{}Total: {:.6}s", body, results.sums.get(stage))?;
            writeln!(f, "{}Average: {:.6}s", body, averages.get(stage))?;
        }

        writeln!(f)?;
        writeln!(f, "-----------------------------")?;
        writeln!(f, "Overall Service Ready Measurement:")?;
        self.percentages_line(f)?;
        if results.partial_samples > 0 {
            writeln!(
                f,
                "Ready without pod: {} (pod stages counted as 0s)",
                results.partial_samples
            )?;
        }
        writeln!(f, "Total: {:.6}s", overall.overall_total)?;
        writeln!(f, "Average: {:.6}s", overall.overall_average)?;
        writeln!(f, "Median: {:.6}s", overall.overall_median)?;
        writeln!(f, "Min: {:.6}s", overall.overall_min)?;
        writeln!(f, "Max: {:.6}s", overall.overall_max)?;
        for (p, value) in overall.percentiles() {
            writeln!(f, "Percentile{}: {:.6}s", p as u32, value)?;
        }
        Ok(())
    }
}

/// Per-target stage breakdown, logged in verbose mode
pub struct TargetBreakdown<'a> {
    pub target: &'a Target,
    pub sample: &'a Sample,
}

impl<'a> fmt::Display for TargetBreakdown<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages = CONSOLE_ORDER.iter().chain(std::iter::once(&Stage::OverallReady));
        let mut first = true;
        for &stage in stages {
            if !first {
                writeln!(f)?;
            }
            first = false;
            let indent = if stage.depth() == 0 {
                String::new()
            } else {
                format!("{}- ", "  ".repeat(stage.depth() - 1))
            };
            write!(
                f,
                "[Verbose] Service {}: {}{} Duration is {}/{:.6}s",
                self.target.name,
                indent,
                stage.label(),
                format_whole_seconds(self.sample.durations.whole_seconds(stage)),
                self.sample.durations.seconds(stage)
            )?;
        }
        Ok(())
    }
}

/// Format the durations row and raw timestamps row of one ready target
pub fn rows_for(target: &Target, sample: &Sample) -> (Vec<String>, Vec<String>) {
    let mut durations = Vec::with_capacity(DURATION_HEADERS.len());
    durations.push(target.name.clone());
    durations.push(target.namespace.clone());
    for (stage, _) in sample.durations.iter() {
        durations.push(sample.durations.whole_seconds(stage).to_string());
    }

    let ts = &sample.timestamps;
    let pod = ts.pod.as_ref();
    let cell = |t: Option<&crate::platform::Timestamp>| format_report_timestamp(t);
    let raw = vec![
        target.name.clone(),
        target.namespace.clone(),
        cell(Some(&ts.service_created)),
        cell(Some(&ts.configurations_ready)),
        cell(Some(&ts.revision_created)),
        cell(Some(&ts.revision_ready)),
        cell(Some(&ts.deployment_created)),
        cell(pod.map(|p| &p.created)),
        cell(pod.map(|p| &p.scheduled)),
        cell(pod.map(|p| &p.containers_ready)),
        cell(pod.map(|p| &p.queue_proxy_started)),
        cell(pod.map(|p| &p.user_container_started)),
        cell(Some(&ts.routes_ready)),
        cell(Some(&ts.autoscaler_created)),
        cell(Some(&ts.autoscaler_active)),
        cell(Some(&ts.mesh_created)),
        cell(Some(&ts.mesh_activator_endpoints_populated)),
        cell(Some(&ts.mesh_endpoints_populated)),
        cell(Some(&ts.ingress_created)),
        cell(Some(&ts.ingress_network_configured)),
        cell(Some(&ts.ingress_load_balancer_ready)),
    ];

    (durations, raw)
}

/// Durations and raw timestamp rows, one pair per ready target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTables {
    durations: Vec<Vec<String>>,
    raw: Vec<Vec<String>>,
}

impl ResultTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append both rows of one target together
    ///
    /// Callers hold the table lock for this single call so the two tables
    /// always have the same targets.
    pub fn push_pair(&mut self, durations: Vec<String>, raw: Vec<String>) {
        self.durations.push(durations);
        self.raw.push(raw);
    }

    /// Stable sort of both tables by the numeric suffix of the service name
    pub fn sort_by_target_suffix(&mut self) {
        let key = |row: &Vec<String>| row.first().map(|name| numeric_suffix(name)).unwrap_or(0);
        self.durations.sort_by_key(key);
        self.raw.sort_by_key(key);
    }

    pub fn durations(&self) -> &[Vec<String>] {
        &self.durations
    }

    pub fn raw(&self) -> &[Vec<String>] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

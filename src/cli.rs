use crate::engine::EngineConfig;
use crate::enumerator::{ExplicitTargets, IndexRange, NamespaceDiscovery, TargetSources};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Service Measure - Instantiation latency of serverless services
///
/// Measures how long each service took to become ready, broken down by the
/// stages of its readiness chain.
///
/// Example: service-measure --snapshot cluster.json --svc-prefix ksvc --range 1,200 --namespace perf -c 20
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Desired service range, e.g. 1,500
    #[clap(short = 'r', long, help_heading = "Targets")]
    pub range: Option<String>,

    /// Service namespace for the explicit range
    #[clap(long, help_heading = "Targets")]
    pub namespace: Option<String>,

    /// Service name prefix
    #[clap(long, default_value = "", help_heading = "Targets")]
    pub svc_prefix: String,

    /// Namespace range to discover services in, e.g. 1,10
    #[clap(long, help_heading = "Targets")]
    pub namespace_range: Option<String>,

    /// Namespace prefix to discover services in
    #[clap(long, help_heading = "Targets")]
    pub namespace_prefix: Option<String>,

    /// Number of workers to do the measurement job
    #[clap(short = 'c', long, default_value_t = crate::defaults::CONCURRENCY)]
    pub concurrency: usize,

    /// Measure result location
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_DIR)]
    pub output: PathBuf,

    /// Print the per-service stage breakdown
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// Platform snapshot to measure (JSON)
    #[clap(long)]
    pub snapshot: PathBuf,

    /// Upper bound for a single platform lookup (e.g. 500ms, 10s)
    #[clap(long, value_parser = parse_duration)]
    pub lookup_timeout: Option<Duration>,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

/// Validated configuration of one measurement run
#[derive(Debug, Clone)]
pub struct MeasureConfig {
    pub sources: TargetSources,
    pub engine: EngineConfig,
    pub output_dir: PathBuf,
    pub snapshot: PathBuf,
}

impl MeasureConfig {
    /// Convert parsed arguments into a run configuration
    ///
    /// An explicit range requires `--namespace` and `--range`. Discovery
    /// requires both `--namespace-prefix` and `--namespace-range`. At least one
    /// source must be configured.
    pub fn from_args(args: &Args) -> Result<Self> {
        crate::utils::validate_concurrency(args.concurrency)?;

        let explicit = match (&args.namespace, &args.range) {
            (Some(namespace), Some(range)) => Some(ExplicitTargets {
                namespace: namespace.clone(),
                service_prefix: args.svc_prefix.clone(),
                range: range.parse::<IndexRange>().context("invalid --range")?,
            }),
            (Some(_), None) => anyhow::bail!("--namespace requires --range"),
            (None, Some(_)) => anyhow::bail!("--range requires --namespace"),
            (None, None) => None,
        };

        let discovery = match (&args.namespace_prefix, &args.namespace_range) {
            (Some(prefix), Some(range)) => Some(NamespaceDiscovery {
                namespace_prefix: prefix.clone(),
                range: range
                    .parse::<IndexRange>()
                    .context("invalid --namespace-range")?,
                service_prefix: args.svc_prefix.clone(),
            }),
            (Some(_), None) => anyhow::bail!("--namespace-prefix requires --namespace-range"),
            (None, Some(_)) => anyhow::bail!("--namespace-range requires --namespace-prefix"),
            (None, None) => None,
        };

        let sources = TargetSources {
            explicit,
            discovery,
        };
        if sources.is_empty() {
            anyhow::bail!(
                "no services selected: give --namespace and --range, \
                 or --namespace-prefix and --namespace-range"
            );
        }

        Ok(Self {
            sources,
            engine: EngineConfig {
                concurrency: args.concurrency,
                lookup_timeout: args.lookup_timeout,
            },
            output_dir: args.output.clone(),
            snapshot: args.snapshot.clone(),
        })
    }
}

/// Parse duration from string (e.g., "10s", "5m", "500ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if num <= 0.0 {
        return Err("Duration must be positive".to_string());
    }

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["service-measure", "--snapshot", "snap.json"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("invalid").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--namespace", "perf", "--range", "1,3"]);
        assert_eq!(args.concurrency, 10);
        assert_eq!(args.output, PathBuf::from("."));
        assert!(!args.verbose);
        assert!(args.lookup_timeout.is_none());
    }

    #[test]
    fn test_explicit_source() {
        let args = parse(&[
            "--namespace", "perf", "--svc-prefix", "ksvc", "-r", "1,3", "-c", "4",
        ]);
        let config = MeasureConfig::from_args(&args).unwrap();

        let explicit = config.sources.explicit.unwrap();
        assert_eq!(explicit.namespace, "perf");
        assert_eq!(explicit.service_prefix, "ksvc");
        assert_eq!(explicit.range, IndexRange::new(1, 3));
        assert!(config.sources.discovery.is_none());
        assert_eq!(config.engine.concurrency, 4);
    }

    #[test]
    fn test_discovery_source() {
        let args = parse(&[
            "--namespace-prefix", "ns", "--namespace-range", "1,2", "--svc-prefix", "ksvc",
        ]);
        let config = MeasureConfig::from_args(&args).unwrap();

        let discovery = config.sources.discovery.unwrap();
        assert_eq!(discovery.namespace_prefix, "ns");
        assert_eq!(discovery.range, IndexRange::new(1, 2));
        assert!(config.sources.explicit.is_none());
    }

    #[test]
    fn test_invalid_configurations() {
        let cases: &[&[&str]] = &[
            &[],
            &["--namespace", "perf"],
            &["--range", "1,3"],
            &["--namespace", "perf", "--range", "1-3"],
            &["--namespace-prefix", "ns"],
            &["--namespace-range", "1,2"],
            &["--namespace", "perf", "--range", "1,3", "-c", "0"],
            &["--namespace", "perf", "--range", "1,3", "-c", "1025"],
        ];
        for case in cases {
            let args = parse(case);
            assert!(
                MeasureConfig::from_args(&args).is_err(),
                "expected error for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_namespace_without_range_names_the_missing_flag() {
        let args = parse(&["--namespace", "perf"]);
        let err = MeasureConfig::from_args(&args).unwrap_err();
        assert_eq!(err.to_string(), "--namespace requires --range");
    }

    #[test]
    fn test_snapshot_is_required() {
        assert!(Args::try_parse_from(["service-measure", "--namespace", "perf"]).is_err());
    }
}

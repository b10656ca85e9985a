//! # Statistics Engine
//!
//! Summarizes the combined overall-ready durations of all `Ready` targets and
//! derives per-stage averages from the merged stage sums.
//!
//! ## Guarded Computation
//!
//! Both entry points return `None` when there is nothing to summarize. A run
//! with zero `Ready` targets reports classification counts only; no average
//! or percentile is ever derived from an empty sample.
//!
//! ## Percentile Method
//!
//! Percentiles use linear interpolation between the two nearest ranks:
//!
//! 1. **Sort**: the sample is ordered ascending
//! 2. **Rank**: for percentile P, rank = (P/100) * (N-1)
//! 3. **Interpolate**: between `sorted[floor(rank)]` and `sorted[ceil(rank)]`
//!
//! The median is the 50th percentile under the same method.

use crate::metrics::{ClassificationCounts, StageSums};
use crate::resolver::Stage;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Percentile ranks reported for the overall-ready duration
pub const PERCENTILES: [f64; 5] = [50.0, 90.0, 95.0, 98.0, 99.0];

/// Statistics of the overall-ready duration, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverallStatistics {
    pub overall_total: f64,
    pub overall_average: f64,
    pub overall_median: f64,
    pub overall_min: f64,
    pub overall_max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
}

impl OverallStatistics {
    /// Percentile values in the order of `PERCENTILES`
    pub fn percentiles(&self) -> [(f64, f64); 5] {
        [
            (50.0, self.p50),
            (90.0, self.p90),
            (95.0, self.p95),
            (98.0, self.p98),
            (99.0, self.p99),
        ]
    }
}

/// Interpolated percentile of an ascending, non-empty sample
fn interpolate(sorted: &[f64], percentile: f64) -> f64 {
    let rank = (percentile / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] + weight * (sorted[upper] - sorted[lower])
    }
}

/// Interpolated percentile of an arbitrary sample, `None` when empty
pub fn percentile(values: &[f64], percentile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(interpolate(&sorted, percentile.clamp(0.0, 100.0)))
}

/// Summarize the overall-ready sample
///
/// `total` is the overall stage sum and the mean is `total / count`, which
/// keeps the reported average identical to the per-stage averages.
pub fn summarize(values: &[f64], total: f64) -> Option<OverallStatistics> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let at = |p: f64| interpolate(&sorted, p);

    Some(OverallStatistics {
        overall_total: total,
        overall_average: total / sorted.len() as f64,
        overall_median: at(50.0),
        overall_min: sorted[0],
        overall_max: sorted[sorted.len() - 1],
        p50: at(PERCENTILES[0]),
        p90: at(PERCENTILES[1]),
        p95: at(PERCENTILES[2]),
        p98: at(PERCENTILES[3]),
        p99: at(PERCENTILES[4]),
    })
}

/// Average seconds per stage over all `Ready` targets
///
/// Serialized as an object keyed by stage column name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageAverages {
    averages: [f64; Stage::COUNT],
}

impl StageAverages {
    /// Stage sum divided by the ready count, `None` when nothing was ready
    pub fn compute(sums: &StageSums, counts: &ClassificationCounts) -> Option<Self> {
        if counts.ready_count == 0 {
            return None;
        }
        let ready = counts.ready_count as f64;
        let mut averages = [0.0; Stage::COUNT];
        for (stage, sum) in sums.iter() {
            averages[stage.index()] = sum / ready;
        }
        Some(Self { averages })
    }

    pub fn get(&self, stage: Stage) -> f64 {
        self.averages[stage.index()]
    }
}

impl Serialize for StageAverages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Stage::COUNT))?;
        for stage in Stage::ALL {
            map.serialize_entry(stage.column(), &self.get(stage))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_monotonic(values: &[f64]) {
        let total: f64 = values.iter().sum();
        let stats = summarize(values, total).unwrap();
        assert!(stats.p50 <= stats.p90, "{:?}", stats);
        assert!(stats.p90 <= stats.p95, "{:?}", stats);
        assert!(stats.p95 <= stats.p98, "{:?}", stats);
        assert!(stats.p98 <= stats.p99, "{:?}", stats);
        assert!(stats.overall_min <= stats.overall_median);
        assert!(stats.overall_median <= stats.overall_max);
    }

    #[test]
    fn test_interpolated_percentiles() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert!((percentile(&values, 95.0).unwrap() - 4.8).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_summary_of_unsorted_sample() {
        let values = vec![10.0, 2.0, 4.0, 8.0];
        let stats = summarize(&values, 24.0).unwrap();

        assert_eq!(stats.overall_total, 24.0);
        assert_eq!(stats.overall_average, 6.0);
        assert_eq!(stats.overall_median, 6.0);
        assert_eq!(stats.overall_min, 2.0);
        assert_eq!(stats.overall_max, 10.0);
        assert!((stats.p90 - 9.4).abs() < 1e-9);
        assert!((stats.p99 - 9.94).abs() < 1e-9);
    }

    #[test]
    fn test_single_value_sample() {
        let stats = summarize(&[5.0], 5.0).unwrap();
        for (_, value) in stats.percentiles() {
            assert_eq!(value, 5.0);
        }
        assert_eq!(stats.overall_average, 5.0);
        assert_eq!(stats.overall_median, 5.0);
        assert_eq!(stats.overall_min, 5.0);
        assert_eq!(stats.overall_max, 5.0);
    }

    #[test]
    fn test_percentiles_are_monotonic() {
        assert_monotonic(&[1.0]);
        assert_monotonic(&[3.0, 1.0]);
        assert_monotonic(&[7.0, 7.0, 7.0, 0.0, 120.0]);
        let spread: Vec<f64> = (0..257).map(|i| ((i * 37) % 101) as f64).collect();
        assert_monotonic(&spread);
    }

    #[test]
    fn test_empty_sample_is_not_summarized() {
        assert!(summarize(&[], 0.0).is_none());

        let counts = ClassificationCounts {
            not_ready_count: 3,
            ..Default::default()
        };
        assert!(StageAverages::compute(&StageSums::default(), &counts).is_none());
    }

    #[test]
    fn test_stage_averages() {
        let mut sums = StageSums::default();
        sums.add(Stage::RevisionReady, 9.0);
        sums.add(Stage::OverallReady, 30.0);
        let counts = ClassificationCounts {
            ready_count: 3,
            fail_count: 2,
            ..Default::default()
        };

        let averages = StageAverages::compute(&sums, &counts).unwrap();
        assert_eq!(averages.get(Stage::RevisionReady), 3.0);
        assert_eq!(averages.get(Stage::OverallReady), 10.0);
        assert_eq!(averages.get(Stage::PodScheduled), 0.0);

        let json = serde_json::to_value(averages).unwrap();
        assert_eq!(json["revision_ready"], 3.0);
    }
}

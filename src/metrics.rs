use crate::resolver::{Classification, Sample, Stage};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Number of targets per classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCounts {
    pub ready_count: usize,
    pub not_ready_count: usize,
    pub not_found_count: usize,
    pub fail_count: usize,
}

impl ClassificationCounts {
    pub fn record(&mut self, classification: Classification) {
        match classification {
            Classification::Ready => self.ready_count += 1,
            Classification::NotReady => self.not_ready_count += 1,
            Classification::NotFound => self.not_found_count += 1,
            Classification::Fail => self.fail_count += 1,
        }
    }

    pub fn get(&self, classification: Classification) -> usize {
        match classification {
            Classification::Ready => self.ready_count,
            Classification::NotReady => self.not_ready_count,
            Classification::NotFound => self.not_found_count,
            Classification::Fail => self.fail_count,
        }
    }

    pub fn total(&self) -> usize {
        self.ready_count + self.not_ready_count + self.not_found_count + self.fail_count
    }

    pub fn merge(&mut self, other: &ClassificationCounts) {
        self.ready_count += other.ready_count;
        self.not_ready_count += other.not_ready_count;
        self.not_found_count += other.not_found_count;
        self.fail_count += other.fail_count;
    }
}

/// Running sum of seconds per stage
///
/// Serialized as an object keyed by stage column name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSums {
    sums: [f64; Stage::COUNT],
}

impl Default for StageSums {
    fn default() -> Self {
        Self {
            sums: [0.0; Stage::COUNT],
        }
    }
}

impl StageSums {
    pub fn get(&self, stage: Stage) -> f64 {
        self.sums[stage.index()]
    }

    pub fn add(&mut self, stage: Stage, seconds: f64) {
        self.sums[stage.index()] += seconds;
    }

    pub fn add_sample(&mut self, sample: &Sample) {
        for stage in Stage::ALL {
            self.add(stage, sample.durations.seconds(stage));
        }
    }

    pub fn merge(&mut self, other: &StageSums) {
        for stage in Stage::ALL {
            self.add(stage, other.get(stage));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, f64)> + '_ {
        Stage::ALL.iter().map(move |&stage| (stage, self.get(stage)))
    }
}

impl Serialize for StageSums {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Stage::COUNT))?;
        for (stage, sum) in self.iter() {
            map.serialize_entry(stage.column(), &sum)?;
        }
        map.end()
    }
}

/// Partial result owned by exactly one worker task
///
/// A worker creates its accumulator when it starts and hands it back by value
/// when its queue drains, so no other task can observe or mutate it while the
/// pool is running.
#[derive(Debug, Clone, Default)]
pub struct WorkerAccumulator {
    worker_id: usize,
    counts: ClassificationCounts,
    sums: StageSums,
    overall_ready: Vec<f64>,
    partial_samples: usize,
}

impl WorkerAccumulator {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Count a target that did not produce a sample
    pub fn record_classification(&mut self, classification: Classification) {
        self.counts.record(classification);
    }

    /// Count a `Ready` target and add its durations
    pub fn record_sample(&mut self, sample: &Sample) {
        self.counts.record(Classification::Ready);
        self.sums.add_sample(sample);
        self.overall_ready.push(sample.durations.seconds(Stage::OverallReady));
        if !sample.pod_observed() {
            self.partial_samples += 1;
        }
    }

    pub fn counts(&self) -> &ClassificationCounts {
        &self.counts
    }

    pub fn sums(&self) -> &StageSums {
        &self.sums
    }

    pub fn overall_ready(&self) -> &[f64] {
        &self.overall_ready
    }

    pub fn partial_samples(&self) -> usize {
        self.partial_samples
    }
}

/// Run-wide merge of every worker's accumulator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub counts: ClassificationCounts,
    pub sums: StageSums,
    /// Overall-ready seconds of every `Ready` target, ascending
    pub overall_ready: Vec<f64>,
    /// Ready samples whose revision had no pod
    pub partial_samples: usize,
}

impl Aggregate {
    /// Merge accumulators by field-wise summation
    ///
    /// The combined duration sample is sorted, so any traversal order of the
    /// workers yields the same aggregate.
    pub fn merge<I>(accumulators: I) -> Self
    where
        I: IntoIterator<Item = WorkerAccumulator>,
    {
        let mut aggregate = Aggregate::default();
        for acc in accumulators {
            aggregate.counts.merge(&acc.counts);
            aggregate.sums.merge(&acc.sums);
            aggregate.overall_ready.extend(acc.overall_ready);
            aggregate.partial_samples += acc.partial_samples;
        }
        aggregate.overall_ready.sort_by(f64::total_cmp);
        aggregate
    }
}

//! # Measurement Engine Module
//!
//! This module contains the worker pool that fans target resolutions out over
//! a bounded queue and merges the per-worker partial results into the final
//! `MeasureResults`.
//!
//! ## Key Components
//!
//! - **MeasureRunner**: Owns the platform handle and drives one run
//! - **EngineConfig**: Worker count and lookup timeout
//! - **MeasureOutcome**: Final results plus the sorted row tables
//!
//! ## Run Lifecycle
//!
//! 1. **Precondition**: An empty target list is rejected before any worker starts
//! 2. **Spawn**: `concurrency` workers start, each owning a `WorkerAccumulator`
//! 3. **Dispatch**: The coordinator feeds every target into the bounded queue
//! 4. **Drain**: Closing the queue lets each worker finish and return its accumulator
//! 5. **Merge**: Accumulators are merged, tables sorted, platform info attached
//!
//! ## Concurrency Model
//!
//! - A target is received by exactly one worker, since all workers share one receiver
//! - A worker's accumulator is moved into its task and moved back out through
//!   its `JoinHandle`, so no two tasks ever write the same accumulator
//! - The two row tables sit behind one mutex and both rows of a target are
//!   appended under a single acquisition
//! - A completion counter is checked against the dispatched count after all
//!   workers have been joined

use crate::metrics::{Aggregate, WorkerAccumulator};
use crate::platform::Platform;
use crate::resolver::{Resolution, Resolver, Target};
use crate::results::{rows_for, MeasureResults, ResultTables, RunMetadata, TargetBreakdown};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Engine parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks, at least one
    pub concurrency: usize,
    /// Upper bound for every single platform lookup
    pub lookup_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::defaults::CONCURRENCY,
            lookup_timeout: None,
        }
    }
}

/// Result of one completed run
#[derive(Debug, Clone)]
pub struct MeasureOutcome {
    pub results: MeasureResults,
    pub tables: ResultTables,
}

/// Drives one measurement run against a platform
pub struct MeasureRunner {
    config: EngineConfig,
    platform: Arc<dyn Platform>,
}

impl MeasureRunner {
    pub fn new(config: EngineConfig, platform: Arc<dyn Platform>) -> Self {
        Self { config, platform }
    }

    /// Measure every target and return the merged results
    ///
    /// Per-target failures are classified and counted, never returned. The
    /// only errors are an empty target list, an invalid worker count and a
    /// worker task that panicked.
    pub async fn run(&self, targets: Vec<Target>) -> Result<MeasureOutcome> {
        if targets.is_empty() {
            anyhow::bail!("no service found to measure");
        }
        crate::utils::validate_concurrency(self.config.concurrency)?;

        let concurrency = self.config.concurrency;
        let dispatched = targets.len();
        info!("Measuring {} services with {} workers", dispatched, concurrency);

        let resolver = Resolver::new(self.platform.clone(), self.config.lookup_timeout);
        let (tx, rx) = mpsc::channel::<Target>(concurrency);
        let rx = Arc::new(Mutex::new(rx));
        let tables = Arc::new(parking_lot::Mutex::new(ResultTables::new()));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let resolver = resolver.clone();
            let rx = rx.clone();
            let tables = tables.clone();
            let completed = completed.clone();
            workers.push(tokio::spawn(async move {
                run_worker(worker_id, resolver, rx, tables, completed).await
            }));
        }

        for target in targets {
            // Send only fails once every receiver is gone, which means the
            // workers have died; the join below reports why.
            if tx.send(target).await.is_err() {
                warn!("All workers exited before dispatch completed");
                break;
            }
        }
        drop(tx);

        let mut accumulators = Vec::with_capacity(concurrency);
        for (worker_id, handle) in workers.into_iter().enumerate() {
            let acc = handle
                .await
                .with_context(|| format!("measurement worker {} failed", worker_id))?;
            accumulators.push(acc);
        }

        let completed = completed.load(Ordering::SeqCst);
        if completed != dispatched {
            anyhow::bail!(
                "measured {} of {} dispatched services",
                completed,
                dispatched
            );
        }

        let aggregate = Aggregate::merge(accumulators);
        let mut tables = match Arc::try_unwrap(tables) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().clone(),
        };
        tables.sort_by_target_suffix();

        let platform = self.platform.platform_info().await;
        let results = MeasureResults::new(
            aggregate,
            platform,
            RunMetadata::new(concurrency, dispatched),
        );
        info!(
            "Measurement complete: {} ready of {} services",
            results.service.ready_count,
            results.total()
        );

        Ok(MeasureOutcome { results, tables })
    }
}

/// Worker loop: resolve queued targets until the queue closes
async fn run_worker(
    worker_id: usize,
    resolver: Resolver,
    rx: Arc<Mutex<mpsc::Receiver<Target>>>,
    tables: Arc<parking_lot::Mutex<ResultTables>>,
    completed: Arc<AtomicUsize>,
) -> WorkerAccumulator {
    let mut acc = WorkerAccumulator::new(worker_id);

    loop {
        // The receiver lock is released before resolution starts.
        let next = rx.lock().await.recv().await;
        let Some(target) = next else {
            break;
        };

        match resolver.resolve(&target).await {
            Resolution::Ready(sample) => {
                debug!(
                    "{}",
                    TargetBreakdown {
                        target: &target,
                        sample: &sample,
                    }
                );
                let (durations, raw) = rows_for(&target, &sample);
                tables.lock().push_pair(durations, raw);
                acc.record_sample(&sample);
            }
            Resolution::NotReady { reason } => {
                info!("{}", reason);
                acc.record_classification(crate::resolver::Classification::NotReady);
            }
            Resolution::NotFound { reason } => {
                info!("{}", reason);
                acc.record_classification(crate::resolver::Classification::NotFound);
            }
            Resolution::Fail { reason } => {
                warn!("{}", reason);
                acc.record_classification(crate::resolver::Classification::Fail);
            }
        }
        completed.fetch_add(1, Ordering::SeqCst);
    }

    debug!(
        "Worker {} finished after {} services",
        worker_id,
        acc.counts().total()
    );
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::snapshot::fixtures::*;
    use crate::platform::{ObjectKind, PlatformSnapshot, SnapshotPlatform};
    use crate::resolver::Stage;

    fn runner(snapshot: PlatformSnapshot, concurrency: usize) -> MeasureRunner {
        MeasureRunner::new(
            EngineConfig {
                concurrency,
                lookup_timeout: None,
            },
            Arc::new(SnapshotPlatform::new(snapshot)),
        )
    }

    #[tokio::test]
    async fn test_empty_target_list_is_rejected() {
        let err = runner(PlatformSnapshot::default(), 4)
            .run(Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no service found to measure");
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let result = runner(PlatformSnapshot::default(), 0)
            .run(vec![Target::new("svc-1", "ns")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mixed_classifications() {
        let mut snapshot = PlatformSnapshot::default();
        insert_chain(&mut snapshot, "svc-1", "ns", t0(), &ChainTimes::uniform(5));
        insert_chain(&mut snapshot, "svc-3", "ns", t0(), &ChainTimes::uniform(5));
        snapshot.configurations.retain(|c| c.metadata.name != "svc-3");
        let mut platform = SnapshotPlatform::new(snapshot);
        platform.inject_failure(ObjectKind::Service, "ns", "svc-4", "connection refused");

        let runner = MeasureRunner::new(
            EngineConfig {
                concurrency: 2,
                lookup_timeout: None,
            },
            Arc::new(platform),
        );
        let targets = vec![
            Target::new("svc-1", "ns"),
            Target::new("svc-2", "ns"),
            Target::new("svc-3", "ns"),
            Target::new("svc-4", "ns"),
        ];
        let outcome = runner.run(targets).await.unwrap();
        let counts = outcome.results.service;

        assert_eq!(counts.ready_count, 1);
        assert_eq!(counts.not_found_count, 1);
        assert_eq!(counts.not_ready_count, 1);
        assert_eq!(counts.fail_count, 1);
        assert_eq!(outcome.tables.len(), 1);
        assert_eq!(outcome.tables.raw().len(), 1);

        let overall = outcome.results.overall.unwrap();
        assert_eq!(overall.overall_average, 5.0);
        assert_eq!(overall.overall_min, 5.0);
        assert_eq!(overall.overall_max, 5.0);
    }

    #[tokio::test]
    async fn test_tables_are_sorted_independent_of_completion() {
        let mut snapshot = PlatformSnapshot::default();
        for i in [7, 2, 11, 1, 5] {
            insert_chain(
                &mut snapshot,
                &format!("svc-{}", i),
                "ns",
                t0(),
                &ChainTimes::uniform(i),
            );
        }
        let targets = [7, 2, 11, 1, 5]
            .iter()
            .map(|i| Target::new(format!("svc-{}", i), "ns"))
            .collect();

        let outcome = runner(snapshot, 3).run(targets).await.unwrap();
        let names: Vec<&str> = outcome
            .tables
            .durations()
            .iter()
            .map(|row| row[0].as_str())
            .collect();
        assert_eq!(names, vec!["svc-1", "svc-2", "svc-5", "svc-7", "svc-11"]);
        assert_eq!(
            outcome.results.overall_ready_seconds,
            vec![1.0, 2.0, 5.0, 7.0, 11.0]
        );
        assert_eq!(outcome.results.sums.get(Stage::OverallReady), 26.0);
    }

    #[tokio::test]
    async fn test_more_workers_than_targets() {
        let mut snapshot = PlatformSnapshot::default();
        insert_chain(&mut snapshot, "svc-1", "ns", t0(), &ChainTimes::uniform(3));

        let outcome = runner(snapshot, 16)
            .run(vec![Target::new("svc-1", "ns")])
            .await
            .unwrap();
        assert_eq!(outcome.results.service.ready_count, 1);
        assert_eq!(outcome.results.metadata.concurrency, 16);
        assert_eq!(outcome.results.metadata.total_targets, 1);
    }

    #[tokio::test]
    async fn test_all_unready_reports_counts_only() {
        let outcome = runner(PlatformSnapshot::default(), 2)
            .run(vec![Target::new("svc-1", "ns"), Target::new("svc-2", "ns")])
            .await
            .unwrap();

        assert_eq!(outcome.results.service.not_found_count, 2);
        assert!(outcome.results.overall.is_none());
        assert!(outcome.results.averages.is_none());
        assert!(outcome.tables.is_empty());
    }
}

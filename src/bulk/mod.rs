//! Bulk mode: fan a directory of pages out over a pool of workers.
//!
//! The distributor queues one job per page followed by one stop marker per
//! worker. Each worker is an OS thread with its own pipeline and its own
//! single-threaded runtime, so pages are processed in parallel while a
//! single worker never has more than one page in flight. A monitor thread
//! collects status updates and drives the progress display.

mod failures;
mod progress;
mod worker;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::unbounded;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use failures::{FailedJob, FailureCollector, persist_failures};
pub use progress::{
    BarDisplay, HiddenDisplay, ProgressCounter, ProgressDisplay, StatusUpdate, Tally, WorkerState,
};

use crate::pipeline::Pipeline;
use progress::Aggregator;
use worker::{Shared, run_worker};

pub const OUTPUT_EXTENSION: &str = "webp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub source_path: PathBuf,
    pub name: String,
}

#[derive(Debug)]
pub(crate) enum WorkUnit {
    Job(Job),
    Stop,
}

/// Builds the per-worker context. Called once on each worker thread before
/// it takes any job; an error ends that worker.
pub trait PipelineFactory: Sync {
    fn build(&self, worker_id: usize) -> Result<Box<dyn Pipeline>>;
}

impl<F> PipelineFactory for F
where
    F: Fn(usize) -> Result<Box<dyn Pipeline>> + Sync,
{
    fn build(&self, worker_id: usize) -> Result<Box<dyn Pipeline>> {
        self(worker_id)
    }
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub failure_report: PathBuf,
    pub status_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub jobs: usize,
    pub stop_received: bool,
    pub startup_error: Option<String>,
}

impl WorkerReport {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            jobs: 0,
            stop_received: false,
            startup_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolReport {
    pub total: usize,
    pub tally: Tally,
    pub failures: Vec<FailedJob>,
    pub workers: Vec<WorkerReport>,
    /// Queue units (jobs and stop markers) taken and acknowledged.
    pub acknowledged: usize,
    /// Units still queued after every worker exited.
    pub unclaimed: usize,
    pub report_path: Option<PathBuf>,
}

impl PoolReport {
    pub fn summary(&self) -> String {
        let failures = match &self.report_path {
            Some(path) => format!(
                "Saved {} failed tasks to {}",
                self.failures.len(),
                path.display()
            ),
            None => "No failed tasks".to_string(),
        };
        format!(
            "{}/{} items fully cached\n{}",
            self.tally.fully_cached, self.total, failures
        )
    }

    fn startup_error(&self) -> Option<anyhow::Error> {
        let failed = self
            .workers
            .iter()
            .filter_map(|worker| {
                worker
                    .startup_error
                    .as_ref()
                    .map(|err| format!("worker {}: {}", worker.worker_id, err))
            })
            .collect::<Vec<_>>();
        if failed.is_empty() {
            None
        } else {
            Some(anyhow!(
                "{} of {} workers failed to start ({} queue items unprocessed): {}",
                failed.len(),
                self.workers.len(),
                self.unclaimed,
                failed.join("; ")
            ))
        }
    }
}

/// Every regular, non-hidden file in `input_dir`, sorted by name.
pub fn enumerate_jobs(input_dir: &Path) -> Result<Vec<Job>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("failed to read input dir: {}", input_dir.display()))?;
    let mut jobs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if name.starts_with('.') || !path.is_file() {
            continue;
        }
        jobs.push(Job {
            source_path: path,
            name,
        });
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}

/// Processes every job and returns once the queue is drained and all worker
/// threads have been joined. Per-job failures never abort the batch; they
/// are collected and written to the failure report. A worker that fails to
/// start turns into an error after the pool has shut down.
pub fn run_bulk(
    jobs: Vec<Job>,
    factory: &dyn PipelineFactory,
    options: &BulkOptions,
    mut display: Box<dyn ProgressDisplay>,
) -> Result<PoolReport> {
    let report = run_pool(jobs, factory, options, display.as_mut())?;
    match report.startup_error() {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

fn run_pool(
    jobs: Vec<Job>,
    factory: &dyn PipelineFactory,
    options: &BulkOptions,
    display: &mut dyn ProgressDisplay,
) -> Result<PoolReport> {
    if options.workers == 0 {
        return Err(anyhow!("worker count must be at least 1"));
    }
    let total = jobs.len();
    let (queue_tx, queue_rx) = unbounded();
    for (idx, job) in jobs.into_iter().enumerate() {
        debug!("Queueing: #{} - {}", idx, job.name);
        queue_tx
            .send(WorkUnit::Job(job))
            .map_err(|_| anyhow!("job queue closed"))?;
    }
    for _ in 0..options.workers {
        queue_tx
            .send(WorkUnit::Stop)
            .map_err(|_| anyhow!("job queue closed"))?;
    }
    drop(queue_tx);

    let counter = ProgressCounter::new();
    let failures = FailureCollector::new();
    let acknowledged = AtomicUsize::new(0);
    let shared = Shared {
        queue: &queue_rx,
        counter: &counter,
        failures: &failures,
        acknowledged: &acknowledged,
        output_dir: &options.output_dir,
        extension: OUTPUT_EXTENSION,
    };

    info!("processing {} items with {} workers", total, options.workers);
    let (status_tx, status_rx) = unbounded::<StatusUpdate>();
    let workers = thread::scope(|scope| {
        let aggregator = Aggregator::new(
            total,
            options.workers,
            &counter,
            status_rx,
            options.status_interval,
        );
        let monitor = scope.spawn(move || aggregator.run(display));

        let handles = (0..options.workers)
            .map(|worker_id| {
                let status = status_tx.clone();
                let shared = &shared;
                thread::Builder::new()
                    .name(format!("worker-{}", worker_id))
                    .spawn_scoped(scope, move || run_worker(worker_id, factory, shared, status))
                    .map_err(|err| (worker_id, err))
            })
            .collect::<Vec<_>>();
        drop(status_tx);

        let reports = handles
            .into_iter()
            .enumerate()
            .map(|(worker_id, handle)| match handle {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    let mut report = WorkerReport::new(worker_id);
                    report.startup_error = Some("worker thread panicked".to_string());
                    report
                }),
                Err((worker_id, err)) => {
                    let mut report = WorkerReport::new(worker_id);
                    report.startup_error = Some(format!("failed to spawn worker thread: {}", err));
                    report
                }
            })
            .collect::<Vec<_>>();
        if monitor.join().is_err() {
            warn!("progress monitor panicked");
        }
        reports
    });
    info!("all tasks completed");

    let unclaimed = queue_rx.try_iter().count();
    if !failures.is_empty() {
        warn!("{} of {} tasks failed", failures.len(), total);
    }
    let failures = failures.into_failures();
    let report_path = if persist_failures(&failures, &options.failure_report)? {
        Some(options.failure_report.clone())
    } else {
        None
    };

    Ok(PoolReport {
        total,
        tally: counter.snapshot(),
        failures,
        workers,
        acknowledged: acknowledged.load(Ordering::SeqCst),
        unclaimed,
        report_path,
    })
}

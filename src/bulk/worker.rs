use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::failures::{FailedJob, FailureCollector};
use super::progress::{ProgressCounter, StatusUpdate, WorkerState};
use super::{Job, PipelineFactory, WorkUnit, WorkerReport};
use crate::pipeline::Pipeline;
use crate::runtime::current_thread_runtime;

/// Everything the workers share. Each field is either read-only, a channel
/// end, or internally synchronised.
pub(super) struct Shared<'a> {
    pub(super) queue: &'a Receiver<WorkUnit>,
    pub(super) counter: &'a ProgressCounter,
    pub(super) failures: &'a FailureCollector,
    pub(super) acknowledged: &'a AtomicUsize,
    pub(super) output_dir: &'a Path,
    pub(super) extension: &'a str,
}

/// Built once at worker startup and reused for every job the worker takes.
struct WorkerContext {
    runtime: Runtime,
    pipeline: Box<dyn Pipeline>,
}

fn build_context(worker_id: usize, factory: &dyn PipelineFactory) -> Result<WorkerContext> {
    let runtime = current_thread_runtime()?;
    let pipeline = catch_unwind(AssertUnwindSafe(|| factory.build(worker_id)))
        .map_err(|payload| anyhow!("panicked: {}", panic_message(payload.as_ref())))??;
    Ok(WorkerContext { runtime, pipeline })
}

pub(super) fn output_path(output_dir: &Path, name: &str, extension: &str) -> PathBuf {
    let stem = Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    output_dir.join(format!("{}.{}", stem, extension))
}

/// Dequeues until this worker's stop marker. One job is in flight at a time;
/// a failing or panicking job is recorded and the loop carries on.
pub(super) fn run_worker(
    worker_id: usize,
    factory: &dyn PipelineFactory,
    shared: &Shared<'_>,
    status: Sender<StatusUpdate>,
) -> WorkerReport {
    let notify = |state: WorkerState| {
        let _ = status.send(StatusUpdate { worker_id, state });
    };
    let mut report = WorkerReport::new(worker_id);

    notify(WorkerState::Starting);
    notify(WorkerState::Loading);
    let context = match build_context(worker_id, factory) {
        Ok(context) => context,
        Err(err) => {
            let message = format!("{:#}", err);
            warn!("worker {} failed to start: {}", worker_id, message);
            notify(WorkerState::Crashed(message.clone()));
            report.startup_error = Some(message);
            return report;
        }
    };

    while let Ok(unit) = shared.queue.recv() {
        let job = match unit {
            WorkUnit::Stop => {
                shared.acknowledged.fetch_add(1, Ordering::SeqCst);
                report.stop_received = true;
                notify(WorkerState::Finished);
                break;
            }
            WorkUnit::Job(job) => job,
        };

        notify(WorkerState::Processing(job.name.clone()));
        match process_job(&context, &job, shared.output_dir, shared.extension) {
            Ok(fully_cached) => {
                debug!("worker {} finished {}", worker_id, job.name);
                shared.counter.record(fully_cached);
                notify(WorkerState::Completed(job.name.clone()));
            }
            Err(err) => {
                let message = format!("{:#}", err);
                warn!("worker {} failed {}: {}", worker_id, job.name, message);
                shared.failures.record(FailedJob::new(&job, message));
                shared.counter.record(false);
                notify(WorkerState::Failed(job.name.clone()));
            }
        }
        report.jobs += 1;
        shared.acknowledged.fetch_add(1, Ordering::SeqCst);
    }
    report
}

/// A pipeline panic is caught inside the polled future so it never unwinds
/// through the runtime; the outer guard covers decoding and encoding.
fn process_job(context: &WorkerContext, job: &Job, output_dir: &Path, extension: &str) -> Result<bool> {
    catch_unwind(AssertUnwindSafe(|| -> Result<bool> {
        let image = image::open(&job.source_path)
            .with_context(|| format!("failed to open image: {}", job.source_path.display()))?;
        let run = AssertUnwindSafe(context.pipeline.run_expanded(image)).catch_unwind();
        let output = context
            .runtime
            .block_on(run)
            .map_err(|payload| anyhow!("panicked: {}", panic_message(payload.as_ref())))??;
        let target = output_path(output_dir, &job.name, extension);
        output
            .image
            .to_rgba8()
            .save(&target)
            .with_context(|| format!("failed to write output: {}", target.display()))?;
        Ok(output.cache_info.all)
    }))
    .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

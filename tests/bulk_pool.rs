use anyhow::{Result, anyhow};
use cookie_translator::bulk::{
    BulkOptions, FailedJob, HiddenDisplay, Job, PoolReport, ProgressCounter, enumerate_jobs,
    run_bulk,
};
use cookie_translator::pipeline::StageFuture;
use cookie_translator::{CacheInfo, Pipeline, PipelineOutput};
use image::{DynamicImage, Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const FAIL_MARK: [u8; 4] = [255, 0, 0, 255];
const PANIC_MARK: [u8; 4] = [0, 0, 255, 255];
const CACHED_MARK: [u8; 4] = [0, 255, 0, 255];

/// Fails pages whose first pixel is red, panics on blue ones and reports
/// green ones as fully cached. Tracks how many instances are alive.
struct MarkedPipeline {
    live: Arc<AtomicUsize>,
}

impl Drop for MarkedPipeline {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Pipeline for MarkedPipeline {
    fn run_expanded<'a>(&'a self, image: DynamicImage) -> StageFuture<'a, PipelineOutput> {
        Box::pin(async move {
            let mark = image.to_rgba8().get_pixel(0, 0).0;
            if mark == FAIL_MARK {
                return Err(anyhow!("no text could be read"));
            }
            if mark == PANIC_MARK {
                panic!("renderer exploded");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            let cached = mark == CACHED_MARK;
            Ok(PipelineOutput {
                image,
                boxes: Vec::new(),
                cache_info: CacheInfo::new(cached, cached, cached),
            })
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    report: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("pages");
    let output = dir.path().join("out");
    fs::create_dir(&input).expect("pages dir");
    fs::create_dir(&output).expect("out dir");
    let report = dir.path().join("failed_tasks.json");
    Fixture {
        _dir: dir,
        input,
        output,
        report,
    }
}

fn write_page(dir: &Path, name: &str, mark: [u8; 4]) {
    let mut page = RgbaImage::from_pixel(8, 8, Rgba([200, 200, 200, 255]));
    page.put_pixel(0, 0, Rgba(mark));
    page.save(dir.join(name)).expect("write page");
}

fn options(fixture: &Fixture, workers: usize) -> BulkOptions {
    BulkOptions {
        output_dir: fixture.output.clone(),
        workers,
        failure_report: fixture.report.clone(),
        status_interval: Duration::from_millis(5),
    }
}

fn run(jobs: Vec<Job>, fixture: &Fixture, workers: usize, live: &Arc<AtomicUsize>) -> Result<PoolReport> {
    let factory = |_worker_id: usize| -> Result<Box<dyn Pipeline>> {
        live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MarkedPipeline { live: live.clone() }))
    };
    run_bulk(jobs, &factory, &options(fixture, workers), Box::new(HiddenDisplay))
}

fn outputs(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .expect("read out dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn every_job_is_counted_and_failures_are_isolated() {
    let fixture = fixture();
    for idx in 0..9 {
        let mark = if idx % 4 == 1 { FAIL_MARK } else { [9, 9, 9, 255] };
        write_page(&fixture.input, &format!("{:03}.png", idx), mark);
    }
    fs::write(fixture.input.join("009.png"), b"not an image").expect("corrupt page");

    let jobs = enumerate_jobs(&fixture.input).expect("jobs");
    assert_eq!(jobs.len(), 10);
    let live = Arc::new(AtomicUsize::new(0));
    let report = run(jobs, &fixture, 3, &live).expect("pool");

    assert_eq!(report.tally.completed, 10);
    assert_eq!(report.failures.len(), 3);
    let failed = report
        .failures
        .iter()
        .map(|failure| failure.name.as_str())
        .collect::<std::collections::BTreeSet<_>>();
    assert_eq!(
        failed.into_iter().collect::<Vec<_>>(),
        vec!["001.png", "005.png", "009.png"]
    );
    assert_eq!(outputs(&fixture.output).len(), 7);
    assert!(outputs(&fixture.output).iter().all(|name| name.ends_with(".webp")));

    let persisted: Vec<FailedJob> =
        serde_json::from_str(&fs::read_to_string(&fixture.report).expect("report"))
            .expect("parse report");
    assert_eq!(persisted.len(), 3);
    assert_eq!(report.report_path.as_deref(), Some(fixture.report.as_path()));
    assert!(
        report
            .summary()
            .ends_with(&format!("Saved 3 failed tasks to {}", fixture.report.display()))
    );
}

#[test]
fn each_worker_takes_exactly_one_stop_marker() {
    let fixture = fixture();
    for idx in 0..12 {
        write_page(&fixture.input, &format!("{:02}.png", idx), [1, 2, 3, 255]);
    }
    let jobs = enumerate_jobs(&fixture.input).expect("jobs");
    let live = Arc::new(AtomicUsize::new(0));

    let report = run(jobs, &fixture, 4, &live).expect("pool");

    assert_eq!(report.workers.len(), 4);
    assert!(report.workers.iter().all(|worker| worker.stop_received));
    assert_eq!(report.workers.iter().map(|worker| worker.jobs).sum::<usize>(), 12);
    assert_eq!(report.acknowledged, 12 + 4);
    assert_eq!(report.unclaimed, 0);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(!fixture.report.exists());
    assert_eq!(report.summary(), "0/12 items fully cached\nNo failed tasks");
}

#[test]
fn panicking_job_is_recorded_and_the_worker_keeps_going() {
    let fixture = fixture();
    write_page(&fixture.input, "a.png", [1, 1, 1, 255]);
    write_page(&fixture.input, "b.png", PANIC_MARK);
    write_page(&fixture.input, "c.png", [1, 1, 1, 255]);
    let jobs = enumerate_jobs(&fixture.input).expect("jobs");
    let live = Arc::new(AtomicUsize::new(0));

    let report = run(jobs, &fixture, 1, &live).expect("pool");

    assert_eq!(report.tally.completed, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "b.png");
    assert!(report.failures[0].error.contains("panicked: renderer exploded"));
    assert_eq!(outputs(&fixture.output), vec!["a.webp", "c.webp"]);
    assert_eq!(report.workers[0].jobs, 3);
}

#[test]
fn fully_cached_pages_are_tallied() {
    let fixture = fixture();
    write_page(&fixture.input, "1.png", CACHED_MARK);
    write_page(&fixture.input, "2.png", [5, 5, 5, 255]);
    write_page(&fixture.input, "3.png", CACHED_MARK);
    let jobs = enumerate_jobs(&fixture.input).expect("jobs");
    let live = Arc::new(AtomicUsize::new(0));

    let report = run(jobs, &fixture, 2, &live).expect("pool");

    assert_eq!(report.tally.fully_cached, 2);
    assert!(report.summary().starts_with("2/3 items fully cached"));
}

#[test]
fn empty_batch_still_stops_every_worker() {
    let fixture = fixture();
    let live = Arc::new(AtomicUsize::new(0));
    let report = run(Vec::new(), &fixture, 2, &live).expect("pool");
    assert_eq!(report.total, 0);
    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.summary(), "0/0 items fully cached\nNo failed tasks");
}

#[test]
fn worker_startup_failure_is_reported_after_the_pool_drains() {
    let fixture = fixture();
    for idx in 0..5 {
        write_page(&fixture.input, &format!("{}.png", idx), [7, 7, 7, 255]);
    }
    let jobs = enumerate_jobs(&fixture.input).expect("jobs");
    let live = Arc::new(AtomicUsize::new(0));
    let factory = |worker_id: usize| -> Result<Box<dyn Pipeline>> {
        if worker_id == 0 {
            return Err(anyhow!("failed to connect to redis: connection refused"));
        }
        live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MarkedPipeline { live: live.clone() }))
    };

    let err = run_bulk(jobs, &factory, &options(&fixture, 2), Box::new(HiddenDisplay))
        .expect_err("startup failure");

    let message = format!("{:#}", err);
    assert!(message.contains("1 of 2 workers failed to start"));
    assert!(message.contains("connection refused"));
    assert_eq!(outputs(&fixture.output).len(), 5);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn counter_is_exact_under_contention() {
    for _ in 0..20 {
        let counter = ProgressCounter::new();
        thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        counter.record(false);
                    }
                });
            }
        });
        assert_eq!(counter.snapshot().completed, 1500);
    }
}

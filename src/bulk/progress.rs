use crossbeam_channel::{Receiver, RecvTimeoutError};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Jobs processed so far, and how many of them were served entirely from
/// the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub completed: usize,
    pub fully_cached: usize,
}

/// Incremented exactly once per job, success or failure. The read-modify-
/// write happens under the lock and nothing awaits while holding it.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    tally: Mutex<Tally>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, fully_cached: bool) -> Tally {
        let mut tally = self
            .tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tally.completed += 1;
        if fully_cached {
            tally.fully_cached += 1;
        }
        *tally
    }

    pub fn snapshot(&self) -> Tally {
        *self
            .tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Waiting,
    Starting,
    Loading,
    Processing(String),
    Completed(String),
    Failed(String),
    Finished,
    Crashed(String),
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Finished | WorkerState::Crashed(_))
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Waiting => write!(f, "Waiting..."),
            WorkerState::Starting => write!(f, "Starting..."),
            WorkerState::Loading => write!(f, "Loading pipeline"),
            WorkerState::Processing(name) => write!(f, "Processing {}", name),
            WorkerState::Completed(name) => write!(f, "Completed {}", name),
            WorkerState::Failed(name) => write!(f, "Failed {}", name),
            WorkerState::Finished => write!(f, "Finished"),
            WorkerState::Crashed(reason) => write!(f, "Stopped: {}", reason),
        }
    }
}

/// Sent by a worker whenever its state changes. Each update replaces the
/// worker's previous state as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub worker_id: usize,
    pub state: WorkerState,
}

pub trait ProgressDisplay: Send {
    fn start(&mut self, total: usize, workers: usize);
    fn update(&mut self, tally: Tally, statuses: &[WorkerState]);
    fn finish(&mut self, tally: Tally);
}

/// For non-interactive runs and tests.
#[derive(Debug, Default)]
pub struct HiddenDisplay;

impl ProgressDisplay for HiddenDisplay {
    fn start(&mut self, _total: usize, _workers: usize) {}
    fn update(&mut self, _tally: Tally, _statuses: &[WorkerState]) {}
    fn finish(&mut self, _tally: Tally) {}
}

/// An overall bar plus one status line per worker.
#[derive(Default)]
pub struct BarDisplay {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
    lines: Vec<ProgressBar>,
}

impl BarDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressDisplay for BarDisplay {
    fn start(&mut self, total: usize, workers: usize) {
        let overall = self.multi.add(ProgressBar::new(total as u64));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} {msg}",
        ) {
            overall.set_style(style.progress_chars("#>-"));
        }
        overall.set_message("Overall progress");
        self.overall = Some(overall);

        let line_style = ProgressStyle::with_template("{prefix}: {msg}").ok();
        self.lines = (0..workers)
            .map(|idx| {
                let line = self.multi.add(ProgressBar::new_spinner());
                if let Some(style) = &line_style {
                    line.set_style(style.clone());
                }
                line.set_prefix(format!("Worker {}", idx));
                line.set_message(WorkerState::Waiting.to_string());
                line
            })
            .collect();
    }

    fn update(&mut self, tally: Tally, statuses: &[WorkerState]) {
        if let Some(overall) = &self.overall {
            overall.set_position(tally.completed as u64);
        }
        for (line, state) in self.lines.iter().zip(statuses) {
            line.set_message(state.to_string());
        }
    }

    fn finish(&mut self, tally: Tally) {
        if let Some(overall) = &self.overall {
            overall.set_position(tally.completed as u64);
            overall.finish();
        }
        for line in &self.lines {
            line.finish();
        }
    }
}

/// Runs on the monitor thread and owns the status map. Stops when every job
/// is counted, when every worker has reported a final state, or when all
/// workers have hung up.
pub(super) struct Aggregator<'a> {
    total: usize,
    counter: &'a ProgressCounter,
    updates: Receiver<StatusUpdate>,
    statuses: Vec<WorkerState>,
    interval: Duration,
}

impl<'a> Aggregator<'a> {
    pub(super) fn new(
        total: usize,
        workers: usize,
        counter: &'a ProgressCounter,
        updates: Receiver<StatusUpdate>,
        interval: Duration,
    ) -> Self {
        Self {
            total,
            counter,
            updates,
            statuses: vec![WorkerState::Waiting; workers],
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    fn apply(&mut self, update: StatusUpdate) {
        if let Some(slot) = self.statuses.get_mut(update.worker_id) {
            *slot = update.state;
        }
    }

    pub(super) fn run(mut self, display: &mut dyn ProgressDisplay) -> Vec<WorkerState> {
        display.start(self.total, self.statuses.len());
        loop {
            let disconnected = match self.updates.recv_timeout(self.interval) {
                Ok(update) => {
                    self.apply(update);
                    while let Ok(update) = self.updates.try_recv() {
                        self.apply(update);
                    }
                    false
                }
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => true,
            };
            let tally = self.counter.snapshot();
            display.update(tally, &self.statuses);
            let all_stopped = self.statuses.iter().all(WorkerState::is_terminal);
            if disconnected || all_stopped || tally.completed >= self.total {
                break;
            }
        }
        display.finish(self.counter.snapshot());
        self.statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;

    #[test]
    fn counter_keeps_every_increment() {
        let counter = ProgressCounter::new();
        thread::scope(|scope| {
            for worker in 0..8 {
                let counter = &counter;
                scope.spawn(move || {
                    for idx in 0..500 {
                        counter.record((worker + idx) % 2 == 0);
                    }
                });
            }
        });
        assert_eq!(
            counter.snapshot(),
            Tally {
                completed: 4000,
                fully_cached: 2000
            }
        );
    }

    #[test]
    fn aggregator_stops_when_workers_hang_up() {
        let counter = ProgressCounter::new();
        let (tx, rx) = unbounded();
        tx.send(StatusUpdate {
            worker_id: 1,
            state: WorkerState::Processing("a.png".to_string()),
        })
        .expect("send");
        tx.send(StatusUpdate {
            worker_id: 7,
            state: WorkerState::Finished,
        })
        .expect("send");
        drop(tx);

        let statuses = Aggregator::new(3, 2, &counter, rx, Duration::from_millis(5))
            .run(&mut HiddenDisplay);

        assert_eq!(
            statuses,
            vec![
                WorkerState::Waiting,
                WorkerState::Processing("a.png".to_string())
            ]
        );
    }

    #[test]
    fn aggregator_stops_once_all_jobs_are_counted() {
        let counter = ProgressCounter::new();
        counter.record(false);
        counter.record(true);
        let (_tx, rx) = unbounded();
        let statuses = Aggregator::new(2, 1, &counter, rx, Duration::from_millis(5))
            .run(&mut HiddenDisplay);
        assert_eq!(statuses, vec![WorkerState::Waiting]);
    }

    #[test]
    fn aggregator_stops_when_every_worker_has_stopped() {
        let counter = ProgressCounter::new();
        let (tx, rx) = unbounded();
        for worker_id in 0..2 {
            tx.send(StatusUpdate {
                worker_id,
                state: WorkerState::Crashed("failed to connect to redis".to_string()),
            })
            .expect("send");
        }
        let statuses = Aggregator::new(3, 2, &counter, rx, Duration::from_millis(5))
            .run(&mut HiddenDisplay);
        drop(tx);
        assert!(statuses.iter().all(WorkerState::is_terminal));
        assert_eq!(counter.snapshot().completed, 0);
    }

    #[test]
    fn status_text_matches_the_worker_lines() {
        assert_eq!(
            WorkerState::Processing("003.jpg".to_string()).to_string(),
            "Processing 003.jpg"
        );
        assert_eq!(WorkerState::Finished.to_string(), "Finished");
        assert!(WorkerState::Crashed("no cache".to_string()).is_terminal());
    }
}

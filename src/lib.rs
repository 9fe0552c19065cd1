use anyhow::{Result, anyhow};
use std::path::PathBuf;
use tracing::debug;

pub mod bulk;
pub mod cache;
pub mod logging;
pub mod ocr;
mod paths;
pub mod pipeline;
pub mod providers;
mod runtime;
pub mod settings;
pub mod single;

pub use cache::CacheMode;
pub use pipeline::{CacheInfo, Pipeline, PipelineOutput};

use bulk::{BarDisplay, BulkOptions, HiddenDisplay, ProgressDisplay};
use settings::Settings;

const DEFAULT_SINGLE_OUTPUT: &str = "./out.png";
const DEFAULT_BULK_OUTPUT: &str = "./out/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    Bulk,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    /// `None` means no cache was asked for, which bulk mode accepts.
    pub cache_mode: Option<CacheMode>,
    pub cache_url: Option<String>,
    pub workers: usize,
    pub font_size: Option<f32>,
    pub lang: Option<String>,
    pub debug: bool,
    pub settings_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl Config {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| match self.mode {
            Mode::Single => PathBuf::from(DEFAULT_SINGLE_OUTPUT),
            Mode::Bulk => PathBuf::from(DEFAULT_BULK_OUTPUT),
        })
    }
}

/// Rejects a configuration before any work is queued.
pub fn validate(config: &Config) -> Result<()> {
    validate_with_cores(config, num_cpus::get())
}

fn validate_with_cores(config: &Config, cores: usize) -> Result<()> {
    let has_url = config
        .cache_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    if config.cache_mode == Some(CacheMode::Shared) && !has_url {
        return Err(anyhow!(
            "--cache-url is required when --cache-type is 'shared'"
        ));
    }

    let output = config.output_path();
    match config.mode {
        Mode::Bulk => {
            if let Some(mode @ (CacheMode::Disabled | CacheMode::File)) = config.cache_mode {
                return Err(anyhow!(
                    "in bulk mode, cache type can only be 'shared' for process safety (got '{}')",
                    mode.as_str()
                ));
            }
            if !config.input.is_dir() {
                return Err(anyhow!("in bulk mode, the input path must be a directory"));
            }
            if !output.is_dir() {
                return Err(anyhow!("in bulk mode, the output path must be a directory"));
            }
            if config.workers < 1 || config.workers > cores {
                return Err(anyhow!(
                    "the number of workers must be between 1 and {}",
                    cores
                ));
            }
        }
        Mode::Single => {
            if !config.input.is_file() {
                return Err(anyhow!(
                    "input image not found: {}",
                    config.input.display()
                ));
            }
            if output.is_dir() {
                return Err(anyhow!(
                    "output path is a directory: {}",
                    output.display()
                ));
            }
        }
    }
    Ok(())
}

/// Validates, loads settings and runs the requested mode. Returns the text
/// summary to print.
pub fn run(config: Config) -> Result<String> {
    validate(&config)?;
    let mut settings = settings::load_settings(config.settings_path.as_deref())?;
    apply_overrides(&config, &mut settings);
    match config.mode {
        Mode::Single => single::run_single(&config, &settings),
        Mode::Bulk => run_bulk_mode(&config, &settings),
    }
}

fn apply_overrides(config: &Config, settings: &mut Settings) {
    if let Some(size) = config.font_size {
        settings.font_size = size;
    }
    if let Some(lang) = config.lang.as_deref().map(str::trim)
        && !lang.is_empty()
    {
        settings.target_language = lang.to_string();
    }
}

fn run_bulk_mode(config: &Config, settings: &Settings) -> Result<String> {
    let jobs = bulk::enumerate_jobs(&config.input)?;
    let cache_mode = config.cache_mode.unwrap_or(CacheMode::Disabled);
    let cache_dir = settings.cache_dir();
    let factory = |worker_id: usize| -> Result<Box<dyn Pipeline>> {
        debug!("worker {} building pipeline", worker_id);
        let cache = cache::open_cache(cache_mode, config.cache_url.as_deref(), &cache_dir)?;
        let pipeline = pipeline::standard_pipeline(settings, cache, config.debug)?;
        Ok(Box::new(pipeline))
    };
    let options = BulkOptions {
        output_dir: config.output_path(),
        workers: config.workers,
        failure_report: settings.failure_report.clone(),
        status_interval: settings.status_interval,
    };
    let display: Box<dyn ProgressDisplay> = if config.show_progress {
        Box::new(BarDisplay::new())
    } else {
        Box::new(HiddenDisplay)
    };
    let report = bulk::run_bulk(jobs, &factory, &options, display)?;
    Ok(report.summary())
}

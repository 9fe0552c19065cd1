use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::Path;
use tracing::info;

use crate::cache::{CacheMode, open_cache};
use crate::pipeline::{Pipeline, standard_pipeline};
use crate::runtime::current_thread_runtime;
use crate::settings::Settings;
use crate::Config;

pub fn run_single(config: &Config, settings: &Settings) -> Result<String> {
    let output = config.output_path();
    let cache_mode = config.cache_mode.unwrap_or(CacheMode::Disabled);
    let cache = open_cache(cache_mode, config.cache_url.as_deref(), &settings.cache_dir())?;
    let pipeline = standard_pipeline(settings, cache, config.debug)?;
    translate_file(&pipeline, &config.input, &output)
}

/// Runs one page through `pipeline` and writes the result as PNG.
pub fn translate_file(pipeline: &dyn Pipeline, input: &Path, output: &Path) -> Result<String> {
    let image = image::open(input)
        .with_context(|| format!("failed to open image: {}", input.display()))?;
    let runtime = current_thread_runtime()?;
    let result = runtime.block_on(pipeline.run_expanded(image))?;
    result
        .image
        .to_rgba8()
        .save_with_format(output, ImageFormat::Png)
        .with_context(|| format!("failed to write output: {}", output.display()))?;
    info!("saved {}", output.display());

    let cached = if result.cache_info.all {
        ", fully cached"
    } else {
        ""
    };
    Ok(format!(
        "Saved {} ({} text regions{})",
        output.display(),
        result.boxes.len(),
        cached
    ))
}

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cookie_translator::{CacheMode, Config, Mode};

#[derive(Parser, Debug)]
#[command(
    name = "cookie-translator",
    version,
    about = "Translate the text in comic pages using OCR and LLM tool calls"
)]
struct Cli {
    /// Input image (or directory in bulk mode)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output image (or directory in bulk mode), default: ./out.png or ./out/
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Translate every image in the input directory
    #[arg(short = 'b', long = "bulk")]
    bulk: bool,

    /// Cache type (bulk mode only accepts shared)
    #[arg(short = 't', long = "cache-type", value_enum)]
    cache_type: Option<CacheMode>,

    /// Shared cache connection string (redis://... or a directory path)
    #[arg(short = 'r', long = "cache-url", alias = "redis-url")]
    cache_url: Option<String>,

    /// Number of parallel workers for bulk mode
    #[arg(long = "workers", visible_alias = "processes", default_value_t = 4)]
    workers: usize,

    /// Font size for the translated text (default: 25, or [render] font_size)
    #[arg(long = "font-size")]
    font_size: Option<f32>,

    /// Target language (default: [translation] target_language)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Draw box outlines and log every pipeline step
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Hide the bulk progress display
    #[arg(long = "no-progress")]
    no_progress: bool,

    /// Read extra settings from a local TOML file
    #[arg(long = "read-settings")]
    read_settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cookie_translator::logging::init(cli.verbose, cli.debug)?;

    let summary = cookie_translator::run(Config {
        mode: if cli.bulk { Mode::Bulk } else { Mode::Single },
        input: cli.input,
        output: cli.output,
        cache_mode: cli.cache_type,
        cache_url: cli.cache_url,
        workers: cli.workers,
        font_size: cli.font_size,
        lang: cli.lang,
        debug: cli.debug,
        settings_path: cli.read_settings,
        show_progress: !cli.no_progress && io::stderr().is_terminal(),
    })?;

    println!("{}", summary);
    Ok(())
}

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub target_language: String,
    pub source_language: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout: Duration,
    pub ocr_languages: String,
    pub max_boxes: usize,
    pub merge_tolerance: i64,
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub cache_dir: Option<PathBuf>,
    pub failure_report: PathBuf,
    pub status_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            source_language: "ja".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout: Duration::from_secs(120),
            ocr_languages: "jpn".to_string(),
            max_boxes: 512,
            merge_tolerance: 0,
            font_path: None,
            font_size: 25.0,
            cache_dir: None,
            failure_report: PathBuf::from("./failed_tasks.json"),
            status_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    translation: Option<TranslationSettings>,
    ocr: Option<OcrSettings>,
    render: Option<RenderSettings>,
    cache: Option<CacheSettings>,
    bulk: Option<BulkSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSettings {
    target_language: Option<String>,
    source_language: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key_env: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    max_boxes: Option<usize>,
    merge_tolerance: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSettings {
    font_path: Option<String>,
    font_size: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSettings {
    directory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkSettings {
    failure_report: Option<String>,
    status_interval_ms: Option<u64>,
}

/// Loads the embedded defaults, then every settings file that exists, in
/// increasing precedence. An explicitly requested file must exist.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_settings_from(&ordered_paths)
}

pub fn load_settings_from(ordered_paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(paths::cache_dir)
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(translation) = incoming.translation {
            merge_string(&mut self.target_language, translation.target_language);
            merge_string(&mut self.source_language, translation.source_language);
            merge_string(&mut self.model, translation.model);
            merge_string(&mut self.base_url, translation.base_url);
            merge_string(&mut self.api_key_env, translation.api_key_env);
            if let Some(secs) = translation.request_timeout_secs {
                if secs > 0 {
                    self.request_timeout = Duration::from_secs(secs);
                }
            }
        }
        if let Some(ocr) = incoming.ocr {
            merge_string(&mut self.ocr_languages, ocr.languages);
            if let Some(limit) = ocr.max_boxes {
                if limit > 0 {
                    self.max_boxes = limit;
                }
            }
            if let Some(tolerance) = ocr.merge_tolerance {
                self.merge_tolerance = tolerance.max(0);
            }
        }
        if let Some(render) = incoming.render {
            if let Some(path) = render.font_path {
                if !path.trim().is_empty() {
                    self.font_path = Some(paths::expand_path(&path));
                }
            }
            if let Some(size) = render.font_size {
                if size > 0.0 {
                    self.font_size = size;
                }
            }
        }
        if let Some(cache) = incoming.cache {
            if let Some(dir) = cache.directory {
                if !dir.trim().is_empty() {
                    self.cache_dir = Some(paths::expand_path(&dir));
                }
            }
        }
        if let Some(bulk) = incoming.bulk {
            if let Some(path) = bulk.failure_report {
                if !path.trim().is_empty() {
                    self.failure_report = paths::expand_path(&path);
                }
            }
            if let Some(ms) = bulk.status_interval_ms {
                if ms > 0 {
                    self.status_interval = Duration::from_millis(ms);
                }
            }
        }
    }
}

fn merge_string(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *target = trimmed.to_string();
        }
    }
}

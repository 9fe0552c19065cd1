use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "COOKIE_TRANSLATOR_DIR";
const DEFAULT_DIR_NAME: &str = ".cookie-translator";

pub(crate) fn settings_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(DEFAULT_DIR_NAME)
}

pub(crate) fn cache_dir() -> PathBuf {
    if let Some(dir) = base_dir_override() {
        return dir.join(".cache");
    }
    home_join(".cookie-translator/.cache")
        .unwrap_or_else(|| PathBuf::from(".cookie-translator/.cache"))
}

/// Expands a leading `~` and normalises separators.
pub(crate) fn expand_path(value: &str) -> PathBuf {
    normalize_path(PathBuf::from(expand_tilde(value.trim())))
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| expand_path(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    home().map(|home| Path::new(&home).join(suffix))
}

fn home() -> Option<String> {
    std::env::var("HOME")
        .ok()
        .map(|home| home.trim().to_string())
        .filter(|home| !home.is_empty())
}

fn normalize_path(path: PathBuf) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        normalized.push(component.as_os_str());
    }
    normalized
}

fn expand_tilde(value: &str) -> String {
    if value == "~" || value.starts_with("~/") {
        if let Some(home) = home() {
            if value == "~" {
                return home;
            }
            return format!("{}{}", home, &value[1..]);
        }
    }
    value.to_string()
}

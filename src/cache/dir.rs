use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{CacheStore, decode_entry};

/// One JSON file per key. Writes go through a temp file in the same
/// directory and a rename, so readers never see a partial entry and any
/// number of workers can share the directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create cache dir: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name = key
            .chars()
            .map(|ch| match ch {
                ':' | '/' | '\\' => '_',
                other => other,
            })
            .collect::<String>();
        self.root.join(format!("{}.json", name))
    }
}

impl CacheStore for DirStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read cache entry: {}", path.display()))?;
        Ok(decode_entry(&raw, &path.display().to_string()))
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.entry_path(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .with_context(|| format!("failed to create temp file in {}", self.root.display()))?;
        serde_json::to_writer(&mut tmp, value)?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write cache entry: {}", path.display()))?;
        Ok(())
    }
}

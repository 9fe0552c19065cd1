use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::warn;

use super::BoundingBox;
use super::parse::{join_text_lines, parse_tsv_boxes};
use crate::pipeline::{BoxDetector, TextReader};

/// Sparse text: finds as much text as possible in no particular order,
/// which suits speech bubbles scattered over a page.
const DETECT_PSM: u32 = 11;
/// A single uniform block of text, i.e. one cropped bubble.
const READ_PSM: u32 = 6;

fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(trimmed.to_string()),
    };

    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in trimmed.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

fn run_tesseract(path: &Path, languages: &str, psm: u32, format: Option<&str>) -> Result<String> {
    let mut command = Command::new("tesseract");
    command
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string());
    if let Some(format) = format {
        command.arg(format);
    }
    let output = command
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn with_temp_png<T>(image: &DynamicImage, run: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    image
        .write_to(&mut tmp, image::ImageFormat::Png)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush()
        .with_context(|| "failed to flush temp image for OCR")?;
    run(tmp.path())
}

#[derive(Debug, Clone)]
pub struct TesseractDetector {
    languages: String,
}

impl TesseractDetector {
    pub fn new(languages: &str) -> Result<Self> {
        Ok(Self {
            languages: normalize_ocr_languages(languages)?,
        })
    }
}

impl BoxDetector for TesseractDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        let tsv = with_temp_png(image, |path| {
            run_tesseract(path, &self.languages, DETECT_PSM, Some("tsv"))
        })?;
        Ok(parse_tsv_boxes(&tsv))
    }
}

#[derive(Debug, Clone)]
pub struct TesseractReader {
    languages: String,
}

impl TesseractReader {
    pub fn new(languages: &str) -> Result<Self> {
        Ok(Self {
            languages: normalize_ocr_languages(languages)?,
        })
    }
}

impl TextReader for TesseractReader {
    fn read(&self, region: &DynamicImage) -> Result<String> {
        let raw = with_temp_png(region, |path| {
            run_tesseract(path, &self.languages, READ_PSM, None)
        })?;
        Ok(join_text_lines(&raw))
    }
}

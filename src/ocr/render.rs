use anyhow::{Context, Result, anyhow};
use image::{Rgba, RgbaImage, imageops};
use resvg::render;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::warn;
use usvg::{Options, Tree, fontdb};

use super::BoundingBox;
use super::font::{FontMetrics, load_font_metrics, measure_text_width_px};

const BACKGROUND_BLUR_SIGMA: f32 = 20.0;
const BACKGROUND_BRIGHTNESS: f32 = 1.4;
/// Mean of R+G+B above which a region counts as light (half of 3 * 255).
const LIGHT_THRESHOLD: f64 = 382.5;
const LINE_HEIGHT: f32 = 1.2;
const DEBUG_LABEL_SIZE: f32 = 20.0;

/// Clamps a box to the image, returning `(x, y, w, h)` with a non-zero size
/// whenever the image itself is non-empty.
fn clamp_region(bbox: &BoundingBox, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (x1, y1, x2, y2) = bbox.rect();
    let max_x = width.saturating_sub(1) as i64;
    let max_y = height.saturating_sub(1) as i64;
    let x = (x1 as i64).clamp(0, max_x) as u32;
    let y = (y1 as i64).clamp(0, max_y) as u32;
    let right = (x2 as i64).clamp(x as i64 + 1, width.max(1) as i64) as u32;
    let bottom = (y2 as i64).clamp(y as i64 + 1, height.max(1) as i64) as u32;
    (x, y, right - x, bottom - y)
}

/// One sub-image per box, cut from the untouched source.
pub fn crop_regions(image: &RgbaImage, boxes: &[BoundingBox]) -> Vec<RgbaImage> {
    boxes
        .iter()
        .map(|bbox| {
            let (x, y, w, h) = clamp_region(bbox, image.width(), image.height());
            imageops::crop_imm(image, x, y, w, h).to_image()
        })
        .collect()
}

/// Covers each box with a blurred, brightened copy of its own pixels so the
/// original lettering no longer competes with the overlay.
pub fn paste_background(image: &mut RgbaImage, crops: &[RgbaImage], boxes: &[BoundingBox]) {
    for (crop, bbox) in crops.iter().zip(boxes) {
        let (x, y, _, _) = clamp_region(bbox, image.width(), image.height());
        let mut blurred = imageops::blur(crop, BACKGROUND_BLUR_SIGMA);
        for pixel in blurred.pixels_mut() {
            brighten(pixel, BACKGROUND_BRIGHTNESS);
        }
        imageops::replace(image, &blurred, x as i64, y as i64);
    }
}

fn brighten(pixel: &mut Rgba<u8>, factor: f32) {
    for channel in pixel.0.iter_mut().take(3) {
        *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
    }
}

/// Black text on light regions, white text on dark ones.
pub(crate) fn text_fill(crop: &RgbaImage) -> &'static str {
    let pixels = crop.pixels().len().max(1) as f64;
    let mut sum = [0f64; 3];
    for pixel in crop.pixels() {
        for (acc, value) in sum.iter_mut().zip(pixel.0.iter()) {
            *acc += *value as f64;
        }
    }
    let brightness: f64 = sum.iter().map(|channel| (channel / pixels).floor()).sum();
    if brightness > LIGHT_THRESHOLD {
        "black"
    } else {
        "white"
    }
}

/// Greedy word wrap against the box width. A word wider than the box gets a
/// line of its own rather than being split.
pub(crate) fn wrap_text(
    text: &str,
    box_width: f32,
    font_size: f32,
    font: Option<&FontMetrics>,
) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut allowance = box_width;
    for word in text.split(' ').filter(|word| !word.is_empty()) {
        let word_width = measure_text_width_px(word, font_size, font);
        match lines.last_mut() {
            Some(line) if allowance - word_width > 0.0 => {
                line.push(' ');
                line.push_str(word);
                allowance -= word_width;
            }
            _ => {
                lines.push(word.to_string());
                allowance = box_width - word_width;
            }
        }
    }
    lines
}

/// Draws translated text (and optional debug outlines) over a page. Fonts are
/// loaded once per renderer; workers keep one for their whole lifetime.
pub struct OverlayRenderer {
    font_size: f32,
    font: Option<FontMetrics>,
    fontdb: Arc<fontdb::Database>,
}

impl OverlayRenderer {
    pub fn new(font_size: f32, font_path: Option<&Path>) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let font = font_path.and_then(|path| match load_font_metrics(path) {
            Ok(metrics) => {
                db.load_font_data(metrics.data().to_vec());
                Some(metrics)
            }
            Err(err) => {
                warn!("overlay font unavailable, using system fonts: {:#}", err);
                None
            }
        });
        Self {
            font_size,
            font,
            fontdb: Arc::new(db),
        }
    }

    pub fn render(
        &self,
        image: &mut RgbaImage,
        boxes: &[BoundingBox],
        texts: &[String],
        fills: &[&str],
        debug: bool,
    ) -> Result<()> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }
        let svg = self.build_svg(width, height, boxes, texts, fills, debug);
        let overlay = self.rasterize(&svg, width, height)?;
        imageops::overlay(image, &overlay, 0, 0);
        Ok(())
    }

    fn build_svg(
        &self,
        width: u32,
        height: u32,
        boxes: &[BoundingBox],
        texts: &[String],
        fills: &[&str],
        debug: bool,
    ) -> String {
        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = width,
            h = height
        ));
        let family = self
            .font
            .as_ref()
            .and_then(FontMetrics::family)
            .map(escape_xml)
            .unwrap_or_else(|| "sans-serif".to_string());
        let line_height = self.font_size * LINE_HEIGHT;

        for ((bbox, text), fill) in boxes.iter().zip(texts).zip(fills) {
            let lines = wrap_text(text, bbox.width() as f32, self.font_size, self.font.as_ref());
            if lines.is_empty() {
                continue;
            }
            let center_x = bbox.top_left().x as f32 + bbox.width() as f32 / 2.0;
            let center_y = bbox.top_left().y as f32 + bbox.height() as f32 / 2.0;
            let first_baseline = center_y - (lines.len() - 1) as f32 * line_height / 2.0
                + self.font_size * 0.35;
            svg.push_str(&format!(
                r#"<text font-family="{family}" font-size="{size}" fill="{fill}" text-anchor="middle">"#,
                family = family,
                size = self.font_size,
                fill = fill
            ));
            for (idx, line) in lines.iter().enumerate() {
                svg.push_str(&format!(
                    r#"<tspan x="{x}" y="{y}">{text}</tspan>"#,
                    x = center_x,
                    y = first_baseline + idx as f32 * line_height,
                    text = escape_xml(line)
                ));
            }
            svg.push_str("</text>");
        }

        if debug {
            for (idx, bbox) in boxes.iter().enumerate() {
                let (x1, y1, _, y2) = bbox.rect();
                svg.push_str(&format!(
                    r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="none" stroke="red" stroke-width="1"/>"#,
                    x = x1,
                    y = y1,
                    w = bbox.width(),
                    h = bbox.height()
                ));
                svg.push_str(&format!(
                    r#"<text x="{x}" y="{y}" font-family="{family}" font-size="{size}" fill="green">{idx}</text>"#,
                    x = x1,
                    y = y2,
                    family = family,
                    size = DEBUG_LABEL_SIZE,
                    idx = idx
                ));
            }
        }

        svg.push_str("</svg>");
        svg
    }

    fn rasterize(&self, svg: &str, width: u32, height: u32) -> Result<RgbaImage> {
        let options = Options {
            fontdb: self.fontdb.clone(),
            ..Options::default()
        };
        let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse overlay SVG")?;
        let mut pixmap =
            Pixmap::new(width, height).ok_or_else(|| anyhow!("empty overlay size"))?;
        render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let mut overlay = RgbaImage::new(width, height);
        for (target, source) in overlay.pixels_mut().zip(pixmap.pixels()) {
            let color = source.demultiply();
            *target = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Ok(overlay)
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

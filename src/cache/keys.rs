use anyhow::Result;
use image::DynamicImage;

use crate::ocr::BoundingBox;

fn hex_digest(parts: &[&[u8]]) -> String {
    let mut ctx = md5::Context::new();
    for part in parts {
        ctx.consume(part);
    }
    format!("{:x}", ctx.compute())
}

/// Content hash of the decoded pixels. Re-encoding a page in another file
/// format keeps the hash as long as the pixels are unchanged.
pub fn image_hash(image: &DynamicImage) -> String {
    let rgba = image.to_rgba8();
    hex_digest(&[
        &rgba.width().to_le_bytes(),
        &rgba.height().to_le_bytes(),
        rgba.as_raw(),
    ])
}

/// Identifies one page together with the merged box layout found on it.
pub fn layout_hash(image_hash: &str, boxes: &[BoundingBox]) -> Result<String> {
    let layout = serde_json::to_string(boxes)?;
    Ok(hex_digest(&[image_hash.as_bytes(), layout.as_bytes()]))
}

pub fn region_key(layout_hash: &str, index: usize) -> String {
    format!("{}:{}", layout_hash, index)
}

/// Key for one translation batch. Order matters: the same texts in another
/// order are a different batch.
pub fn batch_key(texts: &[String]) -> Result<String> {
    let encoded = serde_json::to_string(texts)?;
    Ok(hex_digest(&[encoded.as_bytes()]))
}

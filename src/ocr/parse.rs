use std::collections::BTreeMap;

use super::BoundingBox;

#[derive(Default)]
struct LineAccumulator {
    rect: Option<(i32, i32, i32, i32)>,
    conf_sum: f32,
    weight: f32,
}

impl LineAccumulator {
    fn push(&mut self, rect: (i32, i32, i32, i32), conf: f32, weight: f32) {
        self.rect = Some(match self.rect {
            Some((x1, y1, x2, y2)) => (
                x1.min(rect.0),
                y1.min(rect.1),
                x2.max(rect.2),
                y2.max(rect.3),
            ),
            None => rect,
        });
        self.conf_sum += conf * weight;
        self.weight += weight;
    }

    fn finish(self) -> Option<BoundingBox> {
        let (x1, y1, x2, y2) = self.rect?;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        let confidence = if self.weight > 0.0 {
            self.conf_sum / self.weight / 100.0
        } else {
            0.0
        };
        Some(BoundingBox::from_rect(x1, y1, x2, y2, confidence.clamp(0.0, 1.0)))
    }
}

/// Groups tesseract TSV word rows (level 5) into one box per text line,
/// ordered by page/block/paragraph/line. Confidence is the character
/// weighted word confidence scaled to `0..=1`.
pub(super) fn parse_tsv_boxes(tsv: &str) -> Vec<BoundingBox> {
    let mut lines: BTreeMap<(i32, i32, i32, i32), LineAccumulator> = BTreeMap::new();

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let text = cols[11].trim();
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        let left: i32 = cols[6].parse().unwrap_or(0);
        let top: i32 = cols[7].parse().unwrap_or(0);
        let width: i32 = cols[8].parse().unwrap_or(0);
        let height: i32 = cols[9].parse().unwrap_or(0);
        let weight = text.chars().count().max(1) as f32;
        lines
            .entry(key)
            .or_default()
            .push((left, top, left + width, top + height), conf, weight);
    }

    lines
        .into_values()
        .filter_map(LineAccumulator::finish)
        .collect()
}

/// Joins the lines of a plain-text tesseract result. Latin words get a
/// space between lines, CJK runs are concatenated directly.
pub(super) fn join_text_lines(raw: &str) -> String {
    let mut out = String::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if !out.is_empty() && needs_space(&out, line) {
            out.push(' ');
        }
        out.push_str(line);
    }
    out
}

fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => a.is_ascii() && b.is_ascii(),
        _ => false,
    }
}

use tracing::trace;

use super::BoundingBox;
use super::geom::{intersect_area, union_box};

/// Any positive-area intersection merges.
pub const DEFAULT_TOLERANCE: i64 = 0;

/// Consolidates overlapping boxes until no pair intersects by more than
/// `tolerance` pixels of area.
///
/// Each pass takes the first overlapping pair in list order, replaces the
/// first box with the bounding rectangle of both and drops the second, then
/// rescans from the start since the grown box may now reach a third one.
pub fn merge_boxes(boxes: Vec<BoundingBox>, tolerance: i64) -> Vec<BoundingBox> {
    let mut result = boxes;
    let mut passes = 0usize;
    while let Some((first, second)) = find_mergeable_pair(&result, tolerance) {
        passes += 1;
        let merged = union_box(&result[first], &result[second]);
        result[first] = merged;
        result.remove(second);
    }
    trace!("box merge finished after {} merges", passes);
    result
}

fn find_mergeable_pair(boxes: &[BoundingBox], tolerance: i64) -> Option<(usize, usize)> {
    for first in 0..boxes.len() {
        for second in (first + 1)..boxes.len() {
            if intersect_area(&boxes[first], &boxes[second]) > tolerance {
                return Some((first, second));
            }
        }
    }
    None
}

/// Keeps the `max` most confident boxes, preserving their detection order.
/// Bounds the cubic worst case of [`merge_boxes`] on pathological pages.
pub fn cap_boxes(boxes: Vec<BoundingBox>, max: usize) -> Vec<BoundingBox> {
    if boxes.len() <= max {
        return boxes;
    }
    let mut ranked = boxes.iter().enumerate().collect::<Vec<_>>();
    ranked.sort_by(|(_, a), (_, b)| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = ranked
        .into_iter()
        .take(max)
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    keep.sort_unstable();
    keep.into_iter().map(|idx| boxes[idx].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rects(boxes: &[BoundingBox]) -> Vec<(i32, i32, i32, i32)> {
        let mut out = boxes.iter().map(BoundingBox::rect).collect::<Vec<_>>();
        out.sort_unstable();
        out
    }

    fn fixture() -> Vec<BoundingBox> {
        vec![
            BoundingBox::from_rect(0, 0, 10, 10, 0.8),
            BoundingBox::from_rect(8, 8, 20, 20, 0.6),
            BoundingBox::from_rect(18, 0, 30, 9, 0.4),
            BoundingBox::from_rect(50, 50, 60, 60, 0.9),
            BoundingBox::from_rect(59, 40, 70, 52, 0.5),
            BoundingBox::from_rect(200, 0, 210, 10, 0.3),
            BoundingBox::from_rect(10, 30, 20, 40, 0.2),
        ]
    }

    fn permutations(items: &[BoundingBox]) -> Vec<Vec<BoundingBox>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for idx in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(idx);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn merges_overlapping_pair_and_keeps_distant_box() {
        let boxes = vec![
            BoundingBox::from_rect(0, 0, 10, 10, 0.9),
            BoundingBox::from_rect(5, 5, 15, 15, 0.5),
            BoundingBox::from_rect(100, 100, 110, 110, 0.7),
        ];
        let merged = merge_boxes(boxes, DEFAULT_TOLERANCE);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].rect(), (0, 0, 15, 15));
        assert!((merged[0].confidence - 0.7).abs() < 1e-6);
        assert_eq!(merged[1].rect(), (100, 100, 110, 110));
    }

    #[test]
    fn grown_box_picks_up_a_third_box() {
        let boxes = vec![
            BoundingBox::from_rect(0, 0, 10, 10, 1.0),
            BoundingBox::from_rect(20, 0, 30, 10, 1.0),
            BoundingBox::from_rect(8, 2, 22, 8, 1.0),
        ];
        let merged = merge_boxes(boxes, DEFAULT_TOLERANCE);
        assert_eq!(rects(&merged), vec![(0, 0, 30, 10)]);
    }

    #[test]
    fn merging_is_a_fixpoint() {
        let once = merge_boxes(fixture(), DEFAULT_TOLERANCE);
        let twice = merge_boxes(once.clone(), DEFAULT_TOLERANCE);
        assert_eq!(once, twice);
    }

    #[test]
    fn result_does_not_depend_on_input_order() {
        let expected = vec![
            (0, 0, 30, 20),
            (10, 30, 20, 40),
            (50, 40, 70, 60),
            (200, 0, 210, 10),
        ];
        for order in permutations(&fixture()) {
            let merged = merge_boxes(order, DEFAULT_TOLERANCE);
            assert_eq!(rects(&merged), expected);
        }
    }

    #[test]
    fn touching_boxes_stay_separate() {
        let boxes = vec![
            BoundingBox::from_rect(0, 0, 10, 10, 1.0),
            BoundingBox::from_rect(10, 0, 20, 10, 1.0),
        ];
        assert_eq!(merge_boxes(boxes, DEFAULT_TOLERANCE).len(), 2);
    }

    #[test]
    fn tolerance_is_an_exclusive_area_threshold() {
        let boxes = vec![
            BoundingBox::from_rect(0, 0, 10, 10, 1.0),
            BoundingBox::from_rect(5, 5, 15, 15, 1.0),
        ];
        assert_eq!(merge_boxes(boxes.clone(), 25).len(), 2);
        assert_eq!(merge_boxes(boxes, 24).len(), 1);
    }

    #[test]
    fn extreme_coordinates_merge_without_overflow() {
        let boxes = vec![
            BoundingBox::from_rect(i32::MIN, i32::MIN, i32::MAX, 10, 0.4),
            BoundingBox::from_rect(0, 0, i32::MAX, i32::MAX, 0.8),
            BoundingBox::from_rect(i32::MIN, 20, -10, 30, 0.6),
        ];
        let merged = merge_boxes(boxes, DEFAULT_TOLERANCE);
        assert_eq!(rects(&merged), vec![(i32::MIN, i32::MIN, i32::MAX, i32::MAX)]);
    }

    #[test]
    fn no_boxes_in_no_boxes_out() {
        assert!(merge_boxes(Vec::new(), DEFAULT_TOLERANCE).is_empty());
    }

    #[test]
    fn cap_keeps_most_confident_in_input_order() {
        let boxes = vec![
            BoundingBox::from_rect(0, 0, 1, 1, 0.1),
            BoundingBox::from_rect(2, 2, 3, 3, 0.9),
            BoundingBox::from_rect(4, 4, 5, 5, 0.5),
            BoundingBox::from_rect(6, 6, 7, 7, 0.7),
        ];
        let capped = cap_boxes(boxes, 2);
        assert_eq!(
            capped.iter().map(BoundingBox::rect).collect::<Vec<_>>(),
            vec![(2, 2, 3, 3), (6, 6, 7, 7)]
        );
    }
}

use super::BoundingBox;

/// Area of the rectangular intersection; zero when the boxes only touch or
/// are disjoint.
pub(super) fn intersect_area(a: &BoundingBox, b: &BoundingBox) -> i64 {
    let (ax1, ay1, ax2, ay2) = a.rect();
    let (bx1, by1, bx2, by2) = b.rect();

    let ix1 = ax1.max(bx1);
    let iy1 = ay1.max(by1);
    let ix2 = ax2.min(bx2);
    let iy2 = ay2.min(by2);

    if ix2 < ix1 || iy2 < iy1 {
        return 0;
    }
    (ix2 as i64 - ix1 as i64).saturating_mul(iy2 as i64 - iy1 as i64)
}

/// Bounding rectangle of both boxes, confidence averaged.
pub(super) fn union_box(a: &BoundingBox, b: &BoundingBox) -> BoundingBox {
    let (ax1, ay1, ax2, ay2) = a.rect();
    let (bx1, by1, bx2, by2) = b.rect();
    BoundingBox::from_rect(
        ax1.min(bx1),
        ay1.min(by1),
        ax2.max(bx2),
        ay2.max(by2),
        (a.confidence + b.confidence) / 2.0,
    )
}

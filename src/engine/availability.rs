use crate::model::*;

// ── Interval arithmetic ───────────────────────────────────────────

/// `base` minus `to_remove`; both sorted by start, `base` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Intersection of two sorted, disjoint interval lists.
pub fn intersect_intervals(a: &[Span], b: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if let Some(common) = a[i].intersection(&b[j]) {
            result.push(common);
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Free sub-ranges of `window` once `occupied` (sorted, disjoint) is removed.
pub fn free_within(window: &Span, occupied: &[Span]) -> Vec<Span> {
    subtract_intervals(&[*window], occupied)
}

/// Milliseconds of `window` covered by `occupied` (sorted, disjoint).
pub fn covered_ms(window: &Span, occupied: &[Span]) -> Ms {
    occupied
        .iter()
        .filter_map(|s| s.intersection(window))
        .map(|s| s.duration_ms())
        .sum()
}

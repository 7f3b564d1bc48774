//! Weighted range partitioning
//!
//! Slot boundaries are placed at `start + round(len * cumulative_weight / total)`,
//! so adjacent slots share a boundary and the last non-zero slot always ends
//! exactly at `end`. Ranges are half-open.

/// Split `[start, end)` into one sub-range per weight
///
/// A slot is `None` when its weight is zero or when its rounded share of the
/// extent is empty. When all weights are zero, or the extent is empty, every
/// slot is `None`.
pub fn split_weighted_range(weights: &[u32], start: i64, end: i64) -> Vec<Option<(i64, i64)>> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 || end <= start {
        return vec![None; weights.len()];
    }

    let len = i128::from(end) - i128::from(start);
    let total = i128::from(total);
    let mut cumulative: i128 = 0;
    let mut lower = start;
    let mut ranges = Vec::with_capacity(weights.len());

    for &w in weights {
        cumulative += i128::from(w);
        let upper = if cumulative == total {
            end
        } else {
            // round half up
            let offset = (2 * len * cumulative + total) / (2 * total);
            (i128::from(start) + offset) as i64
        };

        if w == 0 || upper == lower {
            ranges.push(None);
        } else {
            ranges.push(Some((lower, upper)));
        }
        lower = upper;
    }

    debug_assert_eq!(lower, end, "weighted ranges must end at the extent end");
    ranges
}

/// Split an in-memory sequence proportionally to `weights`
///
/// Returns one (possibly empty) vector per weight; concatenating them yields
/// `items` in their original order.
pub fn split_weighted<T>(weights: &[u32], items: Vec<T>) -> Vec<Vec<T>> {
    let ranges = split_weighted_range(weights, 0, items.len() as i64);
    let mut items = items.into_iter();
    ranges
        .into_iter()
        .map(|range| match range {
            Some((lo, hi)) => items.by_ref().take((hi - lo) as usize).collect(),
            None => Vec::new(),
        })
        .collect()
}

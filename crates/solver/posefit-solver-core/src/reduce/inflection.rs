//! Inflection point detection on scalar series.

use std::collections::BTreeSet;

/// Differences below `tolerance * NON_MOVE_SCALE` count as standing still.
const NON_MOVE_SCALE: f64 = 1e-3;

/// Breakpoints of one series plus its near-constant spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inflections {
    /// Sample indices that must carry a keyframe, always including both ends.
    pub breakpoints: BTreeSet<usize>,
    /// Inclusive `(start, end)` index spans with no meaningful motion.
    pub non_moves: Vec<(usize, usize)>,
}

/// Find the indices of `values` that must become keyframes.
///
/// - Both endpoints are always breakpoints.
/// - Maximal runs of at least `max(space, 2)` steps whose consecutive
///   differences stay within `tolerance * 1e-3` are non-move spans; both ends
///   of a span become breakpoints.
/// - A local extremum (the slope changes sign) becomes a breakpoint when it is
///   at least `space` samples after the previous breakpoint and deviates from
///   the chord between that breakpoint and the next candidate (or the last
///   sample) by more than `tolerance`.
pub fn find_inflection_points(values: &[f64], tolerance: f64, space: usize) -> Inflections {
    let mut result = Inflections::default();
    let n = values.len();
    if n == 0 {
        return result;
    }
    result.breakpoints.insert(0);
    result.breakpoints.insert(n - 1);
    if n < 3 {
        return result;
    }

    let still = tolerance * NON_MOVE_SCALE;
    let min_run = space.max(2);
    let mut run_start = 0;
    for i in 1..=n {
        let moving = i == n || (values[i] - values[i - 1]).abs() > still;
        if moving {
            if i - 1 - run_start >= min_run {
                result.non_moves.push((run_start, i - 1));
                result.breakpoints.insert(run_start);
                result.breakpoints.insert(i - 1);
            }
            run_start = i;
        }
    }

    let candidates: Vec<usize> = (1..n - 1)
        .filter(|&i| (values[i] - values[i - 1]) * (values[i + 1] - values[i]) < 0.0)
        .collect();
    let mut last = 0;
    for (k, &i) in candidates.iter().enumerate() {
        if i - last < space {
            continue;
        }
        let next = candidates.get(k + 1).copied().unwrap_or(n - 1);
        if chord_deviation(values, last, next, i) > tolerance {
            result.breakpoints.insert(i);
            last = i;
        }
    }
    result
}

/// Distance of `values[i]` from the straight line through `values[a]` and `values[b]`.
pub fn chord_deviation(values: &[f64], a: usize, b: usize, i: usize) -> f64 {
    if b <= a {
        return (values[i] - values[a]).abs();
    }
    let x = (i - a) as f64 / (b - a) as f64;
    let chord = values[a] + (values[b] - values[a]) * x;
    (values[i] - chord).abs()
}

/// Union of several breakpoint sets; one bone keeps one set of segment boundaries.
pub fn merge_breakpoints<'a>(sets: impl IntoIterator<Item = &'a BTreeSet<usize>>) -> BTreeSet<usize> {
    sets.into_iter().flatten().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_series_keeps_only_ends() {
        let values: Vec<f64> = (0..50).map(|i| 10.0 - 10.0 * i as f64 / 49.0).collect();
        let found = find_inflection_points(&values, 0.05, 2);
        assert_eq!(found.breakpoints.into_iter().collect::<Vec<_>>(), vec![0, 49]);
        assert!(found.non_moves.is_empty());
    }

    #[test]
    fn constant_series_is_one_non_move() {
        let found = find_inflection_points(&[5.0; 100], 0.05, 2);
        assert_eq!(found.non_moves, vec![(0, 99)]);
        assert_eq!(found.breakpoints.len(), 2);
    }

    #[test]
    fn peak_beyond_tolerance_is_kept() {
        let mut values: Vec<f64> = (0..=20).map(|i| i as f64 * 0.5).collect();
        values.extend((1..=30).map(|i| 10.0 - i as f64 * 0.25));
        let found = find_inflection_points(&values, 0.05, 2);
        assert!(found.breakpoints.contains(&20));
    }

    #[test]
    fn small_wobble_is_ignored() {
        let mut values: Vec<f64> = (0..30).map(|i| i as f64).collect();
        values[10] += 0.01;
        let found = find_inflection_points(&values, 0.05, 2);
        assert_eq!(found.breakpoints.len(), 2);
    }

    #[test]
    fn merge_is_union() {
        let a: BTreeSet<usize> = [0, 5, 9].into();
        let b: BTreeSet<usize> = [0, 7, 9].into();
        let merged = merge_breakpoints([&a, &b]);
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![0, 5, 7, 9]);
    }
}

//! Small numeric helpers shared by the profiler, the comparator and the
//! reason rules.

/// Linear-interpolated quantile of an already sorted slice; `0.0` when empty.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let pos = (len - 1) as f64 * q;
            let low = pos.floor() as usize;
            let high = pos.ceil() as usize;
            if low == high {
                return sorted[low];
            }
            let weight = pos - low as f64;
            sorted[low] * (1.0 - weight) + sorted[high] * weight
        }
    }
}

/// Share of values outside Tukey's fences `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
///
/// Needs at least four values; a zero IQR yields `0.0`.
pub fn outlier_ratio(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    if iqr == 0.0 {
        return 0.0;
    }
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;
    let outliers = sorted.iter().filter(|v| **v < low || **v > high).count();
    round_to(outliers as f64 / sorted.len() as f64, 6)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// `max - min` over the values, `0.0` for an empty slice.
pub fn range(values: &[f64]) -> f64 {
    let mut iter = values.iter().copied();
    let Some(first) = iter.next() else {
        return 0.0;
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    max - min
}

pub fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 / whole as f64, 6)
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

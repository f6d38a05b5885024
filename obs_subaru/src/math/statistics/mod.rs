//! NaN-aware robust statistics: medians, clipped means, rolling means.
//!
//! Masked pixels are carried as NaN throughout the correction engines, so
//! every function here skips non-finite samples instead of propagating them.

#[cfg(test)]
mod tests;

/// MAD to standard deviation conversion factor for a normal distribution.
pub const MAD_TO_SIGMA: f32 = 1.4826022;

/// Interquartile range to standard deviation for a normal distribution.
pub const IQR_TO_SIGMA: f64 = 0.741301109252801;

#[inline]
pub fn mad_to_sigma(mad: f32) -> f32 {
    mad * MAD_TO_SIGMA
}

/// Median of finite-valued data, reordering it in place.
///
/// # Panics
/// On empty input.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    assert!(!data.is_empty(), "median of empty slice");
    let len = data.len();
    let mid = len / 2;
    let (left, upper, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        upper
    } else {
        let lower = left.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lower + upper) * 0.5
    }
}

/// f64 counterpart of [`median_f32_mut`].
pub fn median_f64_mut(data: &mut [f64]) -> f64 {
    assert!(!data.is_empty(), "median of empty slice");
    let len = data.len();
    let mid = len / 2;
    let (left, upper, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        upper
    } else {
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) * 0.5
    }
}

/// Median of the finite values in `values`; NaN when there are none.
///
/// `scratch` is reused between calls to avoid reallocating per row.
pub fn nan_median_f32(values: &[f32], scratch: &mut Vec<f32>) -> f32 {
    scratch.clear();
    scratch.extend(values.iter().copied().filter(|v| v.is_finite()));
    if scratch.is_empty() {
        return f32::NAN;
    }
    median_f32_mut(scratch)
}

/// Median and MAD-derived sigma of finite data, reordering it in place.
pub fn median_and_sigma_f32_mut(data: &mut [f32]) -> (f32, f32) {
    let median = median_f32_mut(data);
    for v in data.iter_mut() {
        *v = (*v - median).abs();
    }
    (median, mad_to_sigma(median_f32_mut(data)))
}

/// Iteratively clipped median: samples further than `kappa` MAD-sigmas from
/// the median are dropped, up to `iterations` times. NaN for no finite input.
pub fn sigma_clipped_median_f32(values: &mut Vec<f32>, kappa: f32, iterations: usize) -> f32 {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return f32::NAN;
    }
    let mut deviations = Vec::with_capacity(values.len());
    let mut median = median_f32_mut(values);

    for _ in 0..iterations {
        if values.len() < 3 {
            break;
        }
        deviations.clear();
        deviations.extend(values.iter().map(|v| (v - median).abs()));
        let sigma = mad_to_sigma(median_f32_mut(&mut deviations));
        if sigma < f32::EPSILON {
            break;
        }
        let threshold = kappa * sigma;
        let before = values.len();
        values.retain(|v| (v - median).abs() <= threshold);
        if values.len() == before || values.is_empty() {
            break;
        }
        median = median_f32_mut(values);
    }
    median
}

/// Linear-interpolated quantile of sorted data.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Sigma-clipped mean of the finite values; `None` when there are none.
///
/// The first pass centres on the median with an IQR-based width; each of
/// `iterations` passes keeps samples within `kappa` sigma of the current
/// centre and replaces centre and width with their mean and standard
/// deviation.
pub fn clipped_mean(values: &[f64], kappa: f64, iterations: usize) -> Option<f64> {
    let mut kept: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return None;
    }
    kept.sort_unstable_by(f64::total_cmp);
    let mut center = quantile_sorted(&kept, 0.5);
    let mut sigma = IQR_TO_SIGMA * (quantile_sorted(&kept, 0.75) - quantile_sorted(&kept, 0.25));

    for _ in 0..iterations {
        let threshold = kappa * sigma;
        let next: Vec<f64> = kept
            .iter()
            .copied()
            .filter(|v| (v - center).abs() <= threshold)
            .collect();
        if next.is_empty() {
            break;
        }
        let converged = next.len() == kept.len();
        (center, sigma) = mean_and_std(&next);
        kept = next;
        if converged {
            break;
        }
    }
    Some(center)
}

/// Centred moving average over `window` samples (odd), ignoring NaN.
///
/// The window is truncated at the array ends. An output sample is NaN only
/// when its window holds no finite input.
pub fn rolling_nan_mean(values: &[f64], window: usize) -> Vec<f64> {
    debug_assert!(window % 2 == 1, "window must be odd");
    let half = window / 2;
    let n = values.len();

    let mut sums = Vec::with_capacity(n + 1);
    let mut counts = Vec::with_capacity(n + 1);
    sums.push(0.0f64);
    counts.push(0usize);
    for &v in values {
        let (s, c) = (sums[sums.len() - 1], counts[counts.len() - 1]);
        if v.is_finite() {
            sums.push(s + v);
            counts.push(c + 1);
        } else {
            sums.push(s);
            counts.push(c);
        }
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let count = counts[hi] - counts[lo];
            if count == 0 {
                f64::NAN
            } else {
                (sums[hi] - sums[lo]) / count as f64
            }
        })
        .collect()
}

/// Fraction of finite samples; 0 for empty input.
pub fn finite_fraction(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| v.is_finite()).count() as f64 / values.len() as f64
}

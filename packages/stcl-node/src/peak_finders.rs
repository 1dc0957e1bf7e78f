//! Peak localization within a sub-range of an acquired trace.
//!
//! Three algorithms, in increasing refinement: raw `maximum`, Savitzky-Golay
//! smoothed `sg_maximum`, and Savitzky-Golay derivative zero-crossing
//! `sg_deriv`. Savitzky-Golay kernels are derived from the pseudoinverse of a
//! small Vandermonde-like design matrix; the pseudoinverse is computed with a
//! plain Gauss-Jordan solve over the normal equations rather than a
//! general-purpose linear algebra crate, since the system is always a few
//! rows square.

use stcl_types::model::{PeakFinderConfig, PeakFinderKind, Range};

/// Locate the start/end sample indices (inclusive) of `range` within `times`.
fn range_indices(times: &[f64], range: Range) -> Option<(usize, usize)> {
    let [lo, hi] = range;
    let start = times.iter().position(|&t| t >= lo)?;
    let end = times.iter().rposition(|&t| t <= hi)?;
    if start > end {
        return None;
    }
    Some((start, end))
}

fn argmax_index(y: &[f64], lo: usize, hi: usize) -> Option<usize> {
    (lo..=hi).max_by(|&a, &b| y[a].partial_cmp(&y[b]).unwrap())
}

/// Gauss-Jordan inversion of a small square matrix, with partial pivoting.
fn invert_square(mut a: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    let n = a.len();
    let mut inv = vec![vec![0.0; n]; n];
    for i in 0..n {
        inv[i][i] = 1.0;
    }
    for col in 0..n {
        let mut pivot_row = col;
        let mut max_val = a[col][col].abs();
        for r in (col + 1)..n {
            if a[r][col].abs() > max_val {
                max_val = a[r][col].abs();
                pivot_row = r;
            }
        }
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);
        let pivot = a[col][col];
        for j in 0..n {
            a[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for r in 0..n {
            if r != col {
                let factor = a[r][col];
                if factor != 0.0 {
                    for j in 0..n {
                        a[r][j] -= factor * a[col][j];
                        inv[r][j] -= factor * inv[col][j];
                    }
                }
            }
        }
    }
    inv
}

/// Precompute the length-`window_size` Savitzky-Golay convolution kernel for
/// the given polynomial `order` and derivative index `deriv`, at unit sample
/// rate scaling `rate`.
pub fn sg_kernel(window_size: usize, order: usize, deriv: usize, rate: f64) -> Vec<f64> {
    let h = (window_size as isize - 1) / 2;
    let m = order + 1;

    let mut b = vec![vec![0.0; m]; window_size];
    for (row, k) in (-h..=h).enumerate() {
        for i in 0..m {
            b[row][i] = (k as f64).powi(i as i32);
        }
    }

    let mut btb = vec![vec![0.0; m]; m];
    for i in 0..m {
        for j in 0..m {
            btb[i][j] = (0..window_size).map(|row| b[row][i] * b[row][j]).sum();
        }
    }
    let btb_inv = invert_square(btb);

    let factorial: f64 = (1..=deriv).product::<usize>() as f64;
    let mut kernel = vec![0.0; window_size];
    for (col, k_row) in kernel.iter_mut().enumerate() {
        let s: f64 = (0..m).map(|k| btb_inv[deriv][k] * b[col][k]).sum();
        *k_row = s * rate.powi(deriv as i32) * factorial;
    }
    kernel
}

/// Raw argmax within `range`.
pub fn maximum(times: &[f64], y: &[f64], range: Range) -> Option<(f64, f64)> {
    let (lo, hi) = range_indices(times, range)?;
    let j = argmax_index(y, lo, hi)?;
    Some((times[j], y[j]))
}

/// Argmax refined by re-locating the maximum of the SG-smoothed signal in a
/// window twice as wide as the smoothing kernel, centered on the raw argmax.
pub fn sg_maximum(
    times: &[f64],
    y: &[f64],
    range: Range,
    window_size: usize,
    order: usize,
) -> Option<(f64, f64)> {
    let (lo, hi) = range_indices(times, range)?;
    let j = argmax_index(y, lo, hi)?;
    let h = (window_size as isize - 1) / 2;
    let kernel = sg_kernel(window_size, order, 0, 1.0);

    let lower = (j as isize - 2 * h).max(h) as usize;
    let upper = ((j as isize + 2 * h) as usize).min(y.len().saturating_sub(1 + h as usize));

    let mut best_idx = j;
    let mut best_val = f64::NEG_INFINITY;
    for p in lower..=upper.max(lower) {
        if (p as isize) < h {
            continue;
        }
        let mut s = 0.0;
        for (ki, k) in (-h..=h).enumerate() {
            let idx = (p as isize + k) as usize;
            if idx >= y.len() {
                continue;
            }
            s += kernel[ki] * y[idx];
        }
        if s > best_val {
            best_val = s;
            best_idx = p;
        }
    }
    Some((times[best_idx], y[best_idx]))
}

/// Refine the raw argmax by finding the zero crossing of the SG first
/// derivative between the raw peak index and its neighbor, linearly
/// interpolated. Falls back to the raw argmax when the interpolated point
/// strays further from the raw index than half the smoothing window — a
/// sanity guard against a noisy, unreliable derivative estimate.
pub fn sg_deriv(
    times: &[f64],
    y: &[f64],
    range: Range,
    window_size: usize,
    order: usize,
) -> Option<(f64, f64)> {
    let (lo, hi) = range_indices(times, range)?;
    let j = argmax_index(y, lo, hi)?;
    let h = (window_size as isize - 1) / 2;
    let kernel = sg_kernel(window_size, order, 1, 1.0);

    let conv_at = |p: usize| -> Option<f64> {
        if (p as isize) < h || p as isize + h >= y.len() as isize {
            return None;
        }
        let s: f64 = (-h..=h)
            .enumerate()
            .map(|(ki, k)| kernel[ki] * y[(p as isize + k) as usize])
            .sum();
        Some(s)
    };

    let raw = (times[j], y[j]);
    if j + 1 >= times.len() {
        return Some(raw);
    }
    let (dv0, dv1) = match (conv_at(j), conv_at(j + 1)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Some(raw),
    };
    if (dv1 - dv0).abs() < f64::EPSILON {
        return Some(raw);
    }

    let x_p = times[j] - dv0 * (times[j + 1] - times[j]) / (dv1 - dv0);
    let h_idx = ((j as isize + h).max(0) as usize).min(times.len() - 1);
    if (x_p - times[j]).abs() >= (times[h_idx] - times[j]).abs() {
        return Some(raw);
    }

    let frac = if times[j + 1] != times[j] {
        (x_p - times[j]) / (times[j + 1] - times[j])
    } else {
        0.0
    };
    let y_p = y[j] + frac * (y[j + 1] - y[j]);
    Some((x_p, y_p))
}

/// Dispatch to the configured algorithm, filling in defaults as needed.
pub fn find_peak(times: &[f64], y: &[f64], range: Range, cfg: &PeakFinderConfig) -> Option<(f64, f64)> {
    let cfg = cfg.clone().with_defaults();
    match cfg.name {
        PeakFinderKind::Maximum => maximum(times, y, range),
        PeakFinderKind::SgMaximum => {
            sg_maximum(times, y, range, cfg.window_size.unwrap_or(21), cfg.order.unwrap_or(2))
        }
        PeakFinderKind::SgDeriv => {
            sg_deriv(times, y, range, cfg.window_size.unwrap_or(21), cfg.order.unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_trace(center: f64, sigma: f64, n: usize, span: f64) -> (Vec<f64>, Vec<f64>) {
        let times: Vec<f64> = (0..n).map(|i| i as f64 * span / (n as f64 - 1.0)).collect();
        let y = times.iter().map(|&t| (-((t - center) / sigma).powi(2)).exp()).collect();
        (times, y)
    }

    #[test]
    fn maximum_finds_gaussian_peak() {
        let (times, y) = gaussian_trace(1.2, 0.05, 4000, 2.0);
        let (t, _) = maximum(&times, &y, [1.0, 1.4]).unwrap();
        assert!((t - 1.2).abs() < 1e-3);
    }

    #[test]
    fn sg_maximum_matches_raw_on_clean_gaussian() {
        let (times, y) = gaussian_trace(1.2, 0.05, 4000, 2.0);
        let (t, _) = sg_maximum(&times, &y, [1.0, 1.4], 21, 2).unwrap();
        assert!((t - 1.2).abs() < 2e-3);
    }

    #[test]
    fn sg_deriv_refines_beyond_sample_spacing() {
        let (times, y) = gaussian_trace(1.2, 0.05, 400, 2.0);
        let dt = times[1] - times[0];
        let (t, _) = sg_deriv(&times, &y, [1.0, 1.4], 21, 2).unwrap();
        assert!((t - 1.2).abs() < dt);
    }

    #[test]
    fn sg_kernel_smoothing_sums_to_one() {
        let kernel = sg_kernel(21, 2, 0, 1.0);
        let sum: f64 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}

//! A collection of array utilities needed in this library.
//! These are the robust statistics and index searches shared by the stages;
//! NaN entries mark failed spaxels and are skipped wherever that makes sense.

use std::cmp::Ordering;

use itertools::Itertools;
use ndarray::{Array1, ArrayView1};

use crate::Float;

/// Index of the largest non-NaN value. Ties resolve to the earliest index.
pub(crate) fn argmax<F: Float>(arr: ArrayView1<'_, F>) -> Option<usize> {
    arr.indexed_iter()
        .filter(|(_, v)| v.partial_cmp(v).is_some())
        .reduce(|acc, f| if acc.1 >= f.1 { acc } else { f })
        .map(|(i, _)| i)
}

/// Relative maxima: indices whose value is strictly larger than every value up to `order`
/// positions away. Out-of-range neighbours are clipped to the edge, so the first and last
/// samples are never reported.
pub(crate) fn local_maxima<F: Float>(arr: ArrayView1<'_, F>, order: usize) -> Vec<usize> {
    let n = arr.len();
    let order = order.max(1);
    (0..n)
        .filter(|&i| {
            (1..=order).all(|k| {
                let left = i.saturating_sub(k);
                let right = (i + k).min(n - 1);
                arr[i] > arr[left] && arr[i] > arr[right]
            })
        })
        .collect()
}

/// Relative minima, the mirror of [`local_maxima`].
pub(crate) fn local_minima<F: Float>(arr: ArrayView1<'_, F>, order: usize) -> Vec<usize> {
    let negated = arr.mapv(|v| -v);
    local_maxima(negated.view(), order)
}

fn sorted_finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .sorted_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .collect_vec()
}

fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = (q / 100.).clamp(0., 1.) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Percentile `q` (0-100) with linear interpolation between order statistics.
/// Returns `None` if no finite value is present.
pub(crate) fn percentile(values: impl IntoIterator<Item = f64>, q: f64) -> Option<f64> {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        return None;
    }
    Some(percentile_sorted(&sorted, q))
}

pub(crate) fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    percentile(values, 50.)
}

/// Mean and population standard deviation of the finite values.
pub(crate) fn mean_std(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let finite = values.into_iter().filter(|v| v.is_finite()).collect_vec();
    if finite.is_empty() {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Most populated histogram bin, reported as the bin center.
/// Uses `sqrt(n)` equal-width bins between the extreme values.
pub(crate) fn histogram_mode(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let sorted = sorted_finite(values);
    let (&lo, &hi) = (sorted.first()?, sorted.last()?);
    if hi <= lo {
        return Some(lo);
    }
    let bins = ((sorted.len() as f64).sqrt().round() as usize).max(1);
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in &sorted {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    let best = counts
        .iter()
        .enumerate()
        .max_by(|(i, a), (j, b)| a.cmp(b).then(j.cmp(i)))
        .map(|(i, _)| i)?;
    Some(lo + (best as f64 + 0.5) * width)
}

/// Circular shift, `out[(i + shift) mod n] = arr[i]`.
pub(crate) fn roll<F: Float>(arr: ArrayView1<'_, F>, shift: isize) -> Array1<F> {
    let n = arr.len();
    if n == 0 {
        return Array1::from_vec(Vec::new());
    }
    let shift = shift.rem_euclid(n as isize) as usize;
    Array1::from_shape_fn(n, |i| arr[(i + n - shift) % n])
}

/// Cross-correlation of `arr` with a kernel, output aligned with `arr` (numpy's `"same"` mode).
pub(crate) fn correlate_same(arr: ArrayView1<'_, f64>, kernel: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = arr.len() as isize;
    let half = (kernel.len() / 2) as isize;
    Array1::from_shape_fn(arr.len(), |i| {
        kernel
            .indexed_iter()
            .map(|(j, k)| (i as isize + j as isize - half, k))
            .filter(|(idx, _)| *idx >= 0 && *idx < n)
            .map(|(idx, k)| arr[idx as usize] * k)
            .sum()
    })
}

/// `n` evenly spaced values from `start` to `stop`, both included.
pub(crate) fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

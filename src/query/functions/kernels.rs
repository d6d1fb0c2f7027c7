//! Numeric kernels of the function library
//!
//! Every kernel maps one [`FunctionArgs`] (the look-back window of one series
//! at one step plus scalar arguments) to a single output [`Point`] stamped
//! with the step time, or to [`Point::INVALID`] when there is no result.
//!
//! Accumulating kernels use Neumaier-compensated summation via
//! [`kahan_sum_inc`]; the order of floating-point operations here is part of
//! the contract and must not be rearranged.

use super::FunctionArgs;
use crate::types::Point;

/// One step of Neumaier-compensated summation
///
/// Adds `inc` to the running `sum` and folds the rounding residual of the
/// smaller-magnitude operand into the compensation `c`. The final value of a
/// summation is `sum + c`.
///
/// Returns `(new_sum, new_c)`.
pub fn kahan_sum_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
    let t = sum + inc;
    let c = if sum.abs() >= inc.abs() {
        c + ((sum - t) + inc)
    } else {
        c + ((inc - t) + sum)
    };
    (t, c)
}

#[inline]
fn sample(f: &FunctionArgs<'_>, v: f64) -> Point {
    Point::new(f.step_time, v)
}

// ============================================================================
// Aggregation over time
// ============================================================================

pub(crate) fn sum_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    sample(f, sum(f.points))
}

pub(crate) fn avg_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    sample(f, avg(f.points))
}

pub(crate) fn max_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    let mut max = f.points[0].v;
    for p in f.points {
        if p.v > max || max.is_nan() {
            max = p.v;
        }
    }
    sample(f, max)
}

pub(crate) fn min_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    let mut min = f.points[0].v;
    for p in f.points {
        if p.v < min || min.is_nan() {
            min = p.v;
        }
    }
    sample(f, min)
}

pub(crate) fn count_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    sample(f, f.points.len() as f64)
}

pub(crate) fn stddev_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    sample(f, variance(f.points).sqrt())
}

pub(crate) fn stdvar_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    sample(f, variance(f.points))
}

pub(crate) fn last_over_time(f: &FunctionArgs<'_>) -> Point {
    match f.points.last() {
        Some(last) => sample(f, last.v),
        None => Point::INVALID,
    }
}

pub(crate) fn present_over_time(f: &FunctionArgs<'_>) -> Point {
    if f.points.is_empty() {
        return Point::INVALID;
    }
    sample(f, 1.0)
}

fn sum(points: &[Point]) -> f64 {
    let (mut sum, mut c) = (0.0, 0.0);
    for p in points {
        (sum, c) = kahan_sum_inc(p.v, sum, c);
    }
    if sum.is_infinite() {
        return sum;
    }
    sum + c
}

fn avg(points: &[Point]) -> f64 {
    let (mut mean, mut count, mut c) = (0.0f64, 0.0, 0.0);
    for p in points {
        count += 1.0;
        if mean.is_infinite() {
            // Same-signed infinities cannot be subtracted; the mean is already right
            if p.v.is_infinite() && (mean > 0.0) == (p.v > 0.0) {
                continue;
            }
            // Any finite value leaves an infinite mean unchanged
            if !p.v.is_infinite() && !p.v.is_nan() {
                continue;
            }
        }
        (mean, c) = kahan_sum_inc(p.v / count - mean / count, mean, c);
    }
    if mean.is_infinite() {
        return mean;
    }
    mean + c
}

/// Population variance, one pass (Welford) with compensated accumulators
fn variance(points: &[Point]) -> f64 {
    let mut count = 0.0;
    let (mut mean, mut c_mean) = (0.0, 0.0);
    let (mut aux, mut c_aux) = (0.0, 0.0);
    for p in points {
        count += 1.0;
        let delta = p.v - (mean + c_mean);
        (mean, c_mean) = kahan_sum_inc(delta / count, mean, c_mean);
        (aux, c_aux) = kahan_sum_inc(delta * (p.v - (mean + c_mean)), aux, c_aux);
    }
    (aux + c_aux) / count
}

// ============================================================================
// Counter and gauge analysis
// ============================================================================

pub(crate) fn changes(f: &FunctionArgs<'_>) -> Point {
    let Some((first, rest)) = f.points.split_first() else {
        return Point::INVALID;
    };
    let mut count = 0.0;
    let mut prev = first.v;
    for p in rest {
        let current = p.v;
        if current != prev && !(current.is_nan() && prev.is_nan()) {
            count += 1.0;
        }
        prev = current;
    }
    sample(f, count)
}

pub(crate) fn resets(f: &FunctionArgs<'_>) -> Point {
    let Some((first, rest)) = f.points.split_first() else {
        return Point::INVALID;
    };
    let mut count = 0usize;
    let mut prev = first.v;
    for p in rest {
        if p.v < prev {
            count += 1;
        }
        prev = p.v;
    }
    sample(f, count as f64)
}

pub(crate) fn deriv(f: &FunctionArgs<'_>) -> Point {
    if f.points.len() < 2 {
        return Point::INVALID;
    }
    // Regress around the first timestamp to keep x values small
    let (slope, _) = linear_regression(f.points, f.points[0].t);
    sample(f, slope)
}

/// Least-squares fit of value against seconds since `intercept_time`
///
/// Returns `(slope, intercept)`.
pub fn linear_regression(points: &[Point], intercept_time: i64) -> (f64, f64) {
    let mut n = 0.0;
    let (mut sum_x, mut c_x) = (0.0, 0.0);
    let (mut sum_y, mut c_y) = (0.0, 0.0);
    let (mut sum_xy, mut c_xy) = (0.0, 0.0);
    let (mut sum_x2, mut c_x2) = (0.0, 0.0);
    let init_y = points.first().map_or(0.0, |p| p.v);
    let mut const_y = true;

    for (i, p) in points.iter().enumerate() {
        if const_y && i > 0 && p.v != init_y {
            const_y = false;
        }
        n += 1.0;
        let x = (p.t - intercept_time) as f64 / 1e3;
        (sum_x, c_x) = kahan_sum_inc(x, sum_x, c_x);
        (sum_y, c_y) = kahan_sum_inc(p.v, sum_y, c_y);
        (sum_xy, c_xy) = kahan_sum_inc(x * p.v, sum_xy, c_xy);
        (sum_x2, c_x2) = kahan_sum_inc(x * x, sum_x2, c_x2);
    }

    if const_y {
        if init_y.is_infinite() {
            return (f64::NAN, f64::NAN);
        }
        return (0.0, init_y);
    }

    let sum_x = sum_x + c_x;
    let sum_y = sum_y + c_y;
    let sum_xy = sum_xy + c_xy;
    let sum_x2 = sum_x2 + c_x2;

    let cov_xy = sum_xy - sum_x * sum_y / n;
    let var_x = sum_x2 - sum_x * sum_x / n;

    let slope = cov_xy / var_x;
    let intercept = sum_y / n - slope * sum_x / n;
    (slope, intercept)
}

pub(crate) fn irate(f: &FunctionArgs<'_>) -> Point {
    instant_value(f, true)
}

pub(crate) fn idelta(f: &FunctionArgs<'_>) -> Point {
    instant_value(f, false)
}

/// Difference of the last two points, per second for `is_rate`
fn instant_value(f: &FunctionArgs<'_>, is_rate: bool) -> Point {
    let [.., previous, last] = f.points else {
        return Point::INVALID;
    };

    let mut result = if is_rate && last.v < previous.v {
        // Counter reset
        last.v
    } else {
        last.v - previous.v
    };

    let sampled_interval = last.t - previous.t;
    if sampled_interval == 0 {
        return Point::INVALID;
    }
    if is_rate {
        result /= sampled_interval as f64 / 1000.0;
    }
    sample(f, result)
}

pub(crate) fn rate(f: &FunctionArgs<'_>) -> Point {
    if f.points.len() < 2 {
        return Point::INVALID;
    }
    sample(f, extrapolated_rate(f, true, true))
}

pub(crate) fn increase(f: &FunctionArgs<'_>) -> Point {
    if f.points.len() < 2 {
        return Point::INVALID;
    }
    sample(f, extrapolated_rate(f, true, false))
}

pub(crate) fn delta(f: &FunctionArgs<'_>) -> Point {
    if f.points.len() < 2 {
        return Point::INVALID;
    }
    sample(f, extrapolated_rate(f, false, false))
}

/// Shared body of `rate`, `increase` and `delta`
///
/// Computes the change over the window (adding back counter resets for
/// counters), then extrapolates towards the window edges: fully when the
/// first/last sample lies within 1.1 average sample intervals of the edge,
/// by half an interval otherwise. Counter extrapolation never reaches back
/// past the point where the counter would have been zero. `is_rate` divides
/// the result by the window length in whole seconds.
///
/// Requires at least two points.
fn extrapolated_rate(f: &FunctionArgs<'_>, is_counter: bool, is_rate: bool) -> f64 {
    let samples = f.points;
    let first = samples[0];
    let last = samples[samples.len() - 1];
    let range_start = f.step_time - (f.select_range + f.offset);
    let range_end = f.step_time - f.offset;

    let mut result = last.v - first.v;
    if is_counter {
        let mut last_value = 0.0;
        for p in samples {
            if p.v < last_value {
                result += last_value;
            }
            last_value = p.v;
        }
    }

    let mut duration_to_start = (first.t - range_start) as f64 / 1000.0;
    let duration_to_end = (range_end - last.t) as f64 / 1000.0;

    let sampled_interval = (last.t - first.t) as f64 / 1000.0;
    let average_duration_between_samples = sampled_interval / (samples.len() - 1) as f64;

    if is_counter && result > 0.0 && first.v >= 0.0 {
        let duration_to_zero = sampled_interval * (first.v / result);
        if duration_to_zero < duration_to_start {
            duration_to_start = duration_to_zero;
        }
    }

    let extrapolation_threshold = average_duration_between_samples * 1.1;
    let mut extrapolate_to_interval = sampled_interval;

    if duration_to_start < extrapolation_threshold {
        extrapolate_to_interval += duration_to_start;
    } else {
        extrapolate_to_interval += average_duration_between_samples / 2.0;
    }
    if duration_to_end < extrapolation_threshold {
        extrapolate_to_interval += duration_to_end;
    } else {
        extrapolate_to_interval += average_duration_between_samples / 2.0;
    }

    result *= extrapolate_to_interval / sampled_interval;
    if is_rate {
        // Whole seconds, as the window is specified
        result /= (f.select_range / 1000) as f64;
    }
    result
}

// ============================================================================
// Instant-vector functions
// ============================================================================

pub(crate) fn vector(f: &FunctionArgs<'_>) -> Point {
    match f.points.first() {
        Some(p) => sample(f, p.v),
        None => Point::INVALID,
    }
}

/// Placeholder; `scalar` is evaluated by the function operator itself
pub(crate) fn scalar(_f: &FunctionArgs<'_>) -> Point {
    Point::new(0, 0.0)
}

pub(crate) fn clamp(f: &FunctionArgs<'_>) -> Point {
    let (Some(p), [min, max, ..]) = (f.points.first(), f.scalar_points) else {
        return Point::INVALID;
    };
    if max < min {
        return Point::INVALID;
    }
    sample(f, nan_max(*min, nan_min(*max, p.v)))
}

pub(crate) fn clamp_min(f: &FunctionArgs<'_>) -> Point {
    let (Some(p), [min, ..]) = (f.points.first(), f.scalar_points) else {
        return Point::INVALID;
    };
    sample(f, nan_max(*min, p.v))
}

pub(crate) fn clamp_max(f: &FunctionArgs<'_>) -> Point {
    let (Some(p), [max, ..]) = (f.points.first(), f.scalar_points) else {
        return Point::INVALID;
    };
    sample(f, nan_min(*max, p.v))
}

// `f64::max`/`min` return the non-NaN operand; clamping propagates NaN
#[inline]
fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

#[inline]
fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Labels;

    fn args<'a>(
        labels: &'a Labels,
        points: &'a [Point],
        step_time: i64,
        range: i64,
    ) -> FunctionArgs<'a> {
        FunctionArgs {
            labels,
            points,
            step_time,
            select_range: range,
            scalar_points: &[],
            offset: 0,
        }
    }

    fn values(vs: &[f64]) -> Vec<Point> {
        vs.iter()
            .enumerate()
            .map(|(i, v)| Point::new(i as i64 * 1000, *v))
            .collect()
    }

    fn eval(kernel: fn(&FunctionArgs<'_>) -> Point, points: &[Point]) -> Point {
        let labels = Labels::empty();
        kernel(&args(&labels, points, 10_000, 10_000))
    }

    #[test]
    fn test_kahan_sum_inc_branches() {
        // |sum| >= |inc|
        let (sum, c) = kahan_sum_inc(1.0, 1e16, 0.0);
        assert_eq!(sum + c, 1e16 + 1.0);
        // |sum| < |inc|
        let (sum, c) = kahan_sum_inc(1e16, 1.0, 0.0);
        assert_eq!(sum + c, 1e16 + 1.0);

        // Plain summation loses the small terms entirely
        let (mut sum, mut c) = (0.0, 0.0);
        for v in [1e16, 1.0, 1.0, -1e16] {
            (sum, c) = kahan_sum_inc(v, sum, c);
        }
        assert_eq!(sum + c, 2.0);
    }

    #[test]
    fn test_empty_window_is_invalid() {
        let kernels: [fn(&FunctionArgs<'_>) -> Point; 13] = [
            sum_over_time,
            avg_over_time,
            max_over_time,
            min_over_time,
            count_over_time,
            stddev_over_time,
            stdvar_over_time,
            last_over_time,
            present_over_time,
            changes,
            resets,
            vector,
            clamp_min,
        ];
        for kernel in kernels {
            assert!(eval(kernel, &[]).is_invalid());
        }
    }

    #[test]
    fn test_two_point_kernels_need_two_points() {
        let one = values(&[1.0]);
        for kernel in [deriv, irate, idelta, rate, increase, delta] {
            assert!(eval(kernel, &[]).is_invalid());
            assert!(eval(kernel, &one).is_invalid());
        }
    }

    #[test]
    fn test_over_time_aggregates() {
        let points = values(&[1.0, 5.0, 3.0]);
        assert_eq!(eval(sum_over_time, &points).v, 9.0);
        assert_eq!(eval(avg_over_time, &points).v, 3.0);
        assert_eq!(eval(max_over_time, &points).v, 5.0);
        assert_eq!(eval(min_over_time, &points).v, 1.0);
        assert_eq!(eval(count_over_time, &points).v, 3.0);
        assert_eq!(eval(last_over_time, &points).v, 3.0);
        assert_eq!(eval(present_over_time, &points).v, 1.0);
        assert!((eval(stdvar_over_time, &points).v - 8.0 / 3.0).abs() < 1e-12);
        assert!((eval(stddev_over_time, &points).v - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(eval(sum_over_time, &points).t, 10_000);
    }

    #[test]
    fn test_max_min_replace_leading_nan() {
        let points = values(&[f64::NAN, 2.0, 1.0]);
        assert_eq!(eval(max_over_time, &points).v, 2.0);
        assert_eq!(eval(min_over_time, &points).v, 1.0);
    }

    #[test]
    fn test_avg_infinite_mean() {
        let points = values(&[f64::INFINITY, 1.0, f64::INFINITY]);
        assert_eq!(eval(avg_over_time, &points).v, f64::INFINITY);

        let points = values(&[f64::INFINITY, f64::NEG_INFINITY]);
        assert!(eval(avg_over_time, &points).v.is_nan());
    }

    #[test]
    fn test_sum_compensated() {
        let points = values(&[1e16, 1.0, 1.0, -1e16]);
        assert_eq!(eval(sum_over_time, &points).v, 2.0);
    }

    #[test]
    fn test_changes_nan_pairs() {
        let points = values(&[f64::NAN, f64::NAN, 1.0]);
        assert_eq!(eval(changes, &points).v, 1.0);
        let points = values(&[1.0, 1.0, 2.0, 1.0]);
        assert_eq!(eval(changes, &points).v, 2.0);
    }

    #[test]
    fn test_resets() {
        let points = values(&[5.0, 3.0, 3.0, 7.0, 2.0]);
        assert_eq!(eval(resets, &points).v, 2.0);
        assert_eq!(eval(resets, &values(&[4.0])).v, 0.0);
    }

    #[test]
    fn test_deriv() {
        // 2 per second
        let points: Vec<Point> = (0..5)
            .map(|i| Point::new(1_700_000_000_000 + i * 1000, 2.0 * i as f64))
            .collect();
        assert!((eval(deriv, &points).v - 2.0).abs() < 1e-9);

        let flat = values(&[3.0, 3.0, 3.0]);
        assert_eq!(eval(deriv, &flat).v, 0.0);

        let inf = values(&[f64::INFINITY, f64::INFINITY]);
        assert!(eval(deriv, &inf).v.is_nan());
    }

    #[test]
    fn test_irate_idelta() {
        let points = vec![Point::new(0, 10.0), Point::new(10_000, 20.0), Point::new(20_000, 5.0)];
        // Reset: last value counts as the increase
        assert_eq!(eval(irate, &points).v, 0.5);
        assert_eq!(eval(idelta, &points).v, -15.0);

        let same_time = vec![Point::new(0, 1.0), Point::new(1000, 2.0), Point::new(1000, 3.0)];
        assert!(eval(irate, &same_time).is_invalid());
        assert!(eval(idelta, &same_time).is_invalid());
    }

    #[test]
    fn test_rate_aligned_window() {
        let labels = Labels::empty();
        let points = [Point::new(0, 0.0), Point::new(60_000, 100.0)];
        let f = args(&labels, &points, 60_000, 60_000);
        assert!((rate(&f).v - 100.0 / 60.0).abs() < 1e-12);
        assert!((increase(&f).v - 100.0).abs() < 1e-12);
        assert!((delta(&f).v - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_rate_extrapolates_to_wider_window() {
        let labels = Labels::empty();
        let points = [Point::new(0, 50.0), Point::new(60_000, 150.0)];
        // Window [-30s, 90s]: 30s gap on both sides, below 1.1 * 60s
        // extrapolated interval = 60 + 30 + 30 = 120s -> increase = 100 * 120 / 60
        let f = args(&labels, &points, 90_000, 120_000);
        assert!((increase(&f).v - 200.0).abs() < 1e-9);
        assert!((rate(&f).v - 200.0 / 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_half_interval_extrapolation() {
        let labels = Labels::empty();
        let points = [Point::new(0, 50.0), Point::new(60_000, 150.0)];
        // Window [-150s, 150s]: both gaps exceed 66s, so only 30s is added per side
        let f = args(&labels, &points, 150_000, 300_000);
        assert!((delta(&f).v - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_zero_point_cap() {
        let labels = Labels::empty();
        let points = [Point::new(0, 10.0), Point::new(60_000, 70.0)];
        // Window [-60s, 60s]; zero point is 10s before the first sample
        // extrapolated = 60 + 10 + 0 = 70s -> increase = 60 * 70 / 60
        let f = args(&labels, &points, 60_000, 120_000);
        assert!((increase(&f).v - 70.0).abs() < 1e-9);
        // Gauge: no cap, full 60s extrapolation on the start side
        assert!((delta(&f).v - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_counter_reset() {
        let labels = Labels::empty();
        let points = [
            Point::new(0, 90.0),
            Point::new(30_000, 100.0),
            Point::new(60_000, 10.0),
        ];
        // raw 10 - 90 = -80, plus 100 lost at the reset = 20
        let f = args(&labels, &points, 60_000, 60_000);
        assert!((increase(&f).v - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_family() {
        let labels = Labels::empty();
        let points = [Point::new(0, 7.0)];
        let mut f = args(&labels, &points, 0, 0);

        f.scalar_points = &[0.0, 5.0];
        assert_eq!(clamp(&f).v, 5.0);
        f.scalar_points = &[10.0, 5.0];
        assert!(clamp(&f).is_invalid());
        f.scalar_points = &[1.0];
        assert!(clamp(&f).is_invalid());

        f.scalar_points = &[9.0];
        assert_eq!(clamp_min(&f).v, 9.0);
        assert_eq!(clamp_max(&f).v, 7.0);
        f.scalar_points = &[];
        assert!(clamp_max(&f).is_invalid());

        f.scalar_points = &[0.0, f64::NAN];
        assert!(clamp(&f).v.is_nan());
        f.scalar_points = &[f64::NAN];
        assert!(clamp_min(&f).v.is_nan());
    }
}

//! Solar wind coupling and smoothing helpers.

use crate::config::tuning::{NEWELL_SCALE, SOUTH_BZ_NT, SUSTAINED_SOUTH_FRACTION};
use crate::domain::{MagneticFieldSample, Sample};
use crate::utils::{minutes_between, MS_PER_MINUTE};
use std::collections::HashMap;

/// Newell et al. (2007) coupling function dPhi/dt, scaled by `NEWELL_SCALE`.
///
/// `v` is the solar wind speed in km/s, `by`/`bz` are GSM components in nT.
/// Maximal for due-south IMF (clock angle pi), zero for due-north.
pub fn newell_coupling(v: f64, by: f64, bz: f64) -> f64 {
    let bt = (by * by + bz * bz).sqrt();
    let theta = by.atan2(bz);
    let v = v.max(0.0);
    v.powf(4.0 / 3.0) * bt.powf(2.0 / 3.0) * (theta / 2.0).sin().abs().powf(8.0 / 3.0) / NEWELL_SCALE
}

/// Trailing moving average. The first outputs average over fewer samples.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        let n = (i + 1).min(window);
        out.push(sum / n as f64);
    }
    out
}

/// Mean of the last `n` values, `None` for an empty input.
pub fn trailing_mean(values: &[f64], n: usize) -> Option<f64> {
    if values.is_empty() || n == 0 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(n)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Samples whose timestamp lies within `minutes` of the last sample.
pub fn last_minutes(samples: &[Sample], minutes: f64) -> &[Sample] {
    let Some(last) = samples.last() else {
        return samples;
    };
    let cutoff = last.timestamp_ms - (minutes * MS_PER_MINUTE as f64) as i64;
    let start = samples.partition_point(|s| s.timestamp_ms < cutoff);
    &samples[start..]
}

/// Rate of change per minute against the earliest sample at least
/// `minutes - 0.5` minutes before the latest one.
///
/// `None` means "no opinion": callers must not read it as zero.
pub fn slope_per_minute(window: &[Sample], minutes: f64) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let latest = window.last()?;
    let min_gap = minutes - 0.5;
    let anchor = window
        .iter()
        .find(|s| minutes_between(s.timestamp_ms, latest.timestamp_ms) >= min_gap)?;
    let elapsed = minutes_between(anchor.timestamp_ms, latest.timestamp_ms);
    if elapsed <= 0.0 {
        return None;
    }
    Some((latest.value - anchor.value) / elapsed)
}

/// Fraction of Bz samples in the trailing window at or below -3 nT.
pub fn south_fraction(bz: &[Sample], minutes: f64) -> Option<f64> {
    let window = last_minutes(bz, minutes);
    if window.is_empty() {
        return None;
    }
    let south = window.iter().filter(|s| s.value <= SOUTH_BZ_NT).count();
    Some(south as f64 / window.len() as f64)
}

pub fn sustained_south(bz: &[Sample], minutes: f64) -> bool {
    south_fraction(bz, minutes).is_some_and(|f| f >= SUSTAINED_SOUTH_FRACTION)
}

/// Rate of change (units per minute) between consecutive samples.
pub fn rate_of_change(series: &[Sample]) -> Vec<Sample> {
    series
        .windows(2)
        .filter_map(|w| {
            let dt = minutes_between(w[0].timestamp_ms, w[1].timestamp_ms);
            (dt > 0.0).then(|| Sample {
                timestamp_ms: w[1].timestamp_ms,
                value: (w[1].value - w[0].value) / dt,
            })
        })
        .collect()
}

/// Coupling series from speed and IMF samples that fall in the same UTC minute.
pub fn join_coupling(speed: &[Sample], field: &[MagneticFieldSample]) -> Vec<Sample> {
    let by_minute: HashMap<i64, f64> = speed
        .iter()
        .map(|s| (s.timestamp_ms.div_euclid(MS_PER_MINUTE), s.value))
        .collect();

    field
        .iter()
        .filter_map(|f| {
            let v = by_minute.get(&f.timestamp_ms.div_euclid(MS_PER_MINUTE))?;
            Some(Sample {
                timestamp_ms: f.timestamp_ms,
                value: newell_coupling(*v, f.by, f.bz),
            })
        })
        .collect()
}

pub fn values(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|s| s.value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(points: &[(i64, f64)]) -> Vec<Sample> {
        points
            .iter()
            .map(|&(minute, value)| Sample {
                timestamp_ms: minute * MS_PER_MINUTE,
                value,
            })
            .collect()
    }

    #[test]
    fn test_newell_non_negative_and_monotonic() {
        let mut prev_v = -1.0;
        for v in [250.0, 400.0, 600.0, 900.0] {
            let c = newell_coupling(v, 0.0, -5.0);
            assert!(c >= 0.0);
            assert!(c > prev_v);
            prev_v = c;
        }
        let mut prev_bz = -1.0;
        for bz in [-1.0, -5.0, -10.0, -25.0] {
            let c = newell_coupling(450.0, 0.0, bz);
            assert!(c > prev_bz);
            prev_bz = c;
        }
    }

    #[test]
    fn test_newell_north_is_zero_south_is_max() {
        assert!(newell_coupling(500.0, 0.0, 10.0).abs() < 1e-9);
        let south = newell_coupling(500.0, 0.0, -10.0);
        let dawn = newell_coupling(500.0, 10.0, 0.0);
        assert!(south > dawn);
    }

    #[test]
    fn test_moving_average_constant() {
        let values = vec![4.2; 12];
        for window in 1..=12 {
            assert!(moving_average(&values, window)
                .iter()
                .all(|v| (v - 4.2).abs() < 1e-12));
        }
    }

    #[test]
    fn test_moving_average_short_start() {
        let out = moving_average(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_trailing_mean() {
        assert_eq!(trailing_mean(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(trailing_mean(&[], 5), None);
    }

    #[test]
    fn test_slope_of_linear_series() {
        let s = series(&(0..20).map(|m| (m, 3.0 + 1.75 * m as f64)).collect::<Vec<_>>());
        let slope = slope_per_minute(&s, 5.0).unwrap();
        assert!((slope - 1.75).abs() < 1e-9);
    }

    #[test]
    fn test_slope_undefined_without_history() {
        assert_eq!(slope_per_minute(&series(&[(0, 1.0)]), 2.0), None);
        assert_eq!(slope_per_minute(&series(&[(0, 1.0), (1, 2.0)]), 5.0), None);
    }

    #[test]
    fn test_sustained_south() {
        let mostly_south = series(&[(0, -4.0), (1, -5.0), (2, -3.0), (3, -6.0), (4, 1.0)]);
        assert_eq!(south_fraction(&mostly_south, 15.0), Some(0.8));
        assert!(sustained_south(&mostly_south, 15.0));

        let mixed = series(&[(0, -4.0), (1, 2.0), (2, -3.0), (3, 1.0)]);
        assert!(!sustained_south(&mixed, 15.0));
        assert!(!sustained_south(&[], 15.0));
    }

    #[test]
    fn test_south_fraction_uses_trailing_window() {
        let s = series(&[(0, 5.0), (1, 5.0), (30, -5.0), (31, -5.0)]);
        assert_eq!(south_fraction(&s, 15.0), Some(1.0));
    }

    #[test]
    fn test_rate_of_change() {
        let roc = rate_of_change(&series(&[(0, 10.0), (1, 16.0), (3, 12.0)]));
        assert_eq!(roc.len(), 2);
        assert_eq!(roc[0].value, 6.0);
        assert_eq!(roc[1].value, -2.0);
    }

    #[test]
    fn test_join_coupling_by_minute() {
        let speed = series(&[(0, 500.0), (1, 520.0)]);
        let field = vec![
            MagneticFieldSample {
                timestamp_ms: MS_PER_MINUTE + 30_000,
                bt: 10.0,
                bz: -10.0,
                by: 0.0,
            },
            MagneticFieldSample {
                timestamp_ms: 5 * MS_PER_MINUTE,
                bt: 10.0,
                bz: -10.0,
                by: 0.0,
            },
        ];
        let joined = join_coupling(&speed, &field);
        assert_eq!(joined.len(), 1);
        assert!((joined[0].value - newell_coupling(520.0, 0.0, -10.0)).abs() < 1e-12);
    }
}

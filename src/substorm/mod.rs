//! Substorm likelihood classifier and the per-cycle fusion context.
//!
//! The classifier is a heuristic severity ladder, not a validated physical
//! model. Its thresholds come from operational experience; leave them alone
//! unless someone who owns the forecast signs off.
//!
//! The status is re-derived from scratch every cycle. Nothing is remembered
//! between cycles, so a status can drop from `ONSET` straight to `QUIET`
//! once the onset flags clear.

use crate::config::{FusionTuning, GroundSeries, SubstormThresholds};
use crate::coupling::{
    join_coupling, last_minutes, moving_average, rate_of_change, slope_per_minute,
    sustained_south, trailing_mean, values,
};
use crate::domain::{
    AuroraForecast, MagneticFieldSample, NzMagEvent, Sample, ShockEvent, SubstormStatus,
    TimeSeriesPoint,
};
use crate::events::segment_events;
use crate::normalize::present;
use crate::utils::MS_PER_MINUTE;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstormInputs {
    pub dphi_now: f64,
    pub dphi_mean15: f64,
    /// Moving average of dPhi over the trailing baseline window.
    pub dphi_baseline: f64,
    pub bz_mean15: f64,
    pub sustained_south: bool,
    pub goes_onset: bool,
    pub ground_onset: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstormAssessment {
    pub status: SubstormStatus,
    pub p30: f64,
    pub p60: f64,
    pub likelihood_pct: u8,
}

/// Onset probabilities within 30 and 60 minutes.
pub fn probabilities(dphi_mean15: f64, dphi_now: f64, bz_mean15: f64) -> (f64, f64) {
    let base = (0.015 * dphi_mean15 + 0.01 * dphi_now).tanh();
    let boost = if bz_mean15 < -3.0 {
        0.10
    } else if bz_mean15 < -1.0 {
        0.05
    } else {
        0.0
    };
    let p30 = (0.15 + 0.7 * base + boost).clamp(0.01, 0.9);
    let p60 = (0.25 + 0.6 * base + boost).clamp(0.01, 0.9);
    (p30, p60)
}

/// Classify the current cycle. First matching rule wins.
pub fn evaluate(inputs: &SubstormInputs, thresholds: &SubstormThresholds) -> SubstormAssessment {
    let (p30, p60) = probabilities(inputs.dphi_mean15, inputs.dphi_now, inputs.bz_mean15);

    let status = if inputs.ground_onset || inputs.goes_onset {
        SubstormStatus::Onset
    } else if inputs.sustained_south
        && p30 >= thresholds.imminent_p30
        && inputs.score >= thresholds.imminent_score
    {
        SubstormStatus::Imminent30
    } else if inputs.sustained_south
        && p60 >= thresholds.likely_p60
        && inputs.score >= thresholds.likely_score
    {
        SubstormStatus::Likely60
    } else if inputs.sustained_south
        && inputs.dphi_now >= inputs.dphi_baseline
        && inputs.score >= thresholds.watch_score
    {
        SubstormStatus::Watch
    } else {
        SubstormStatus::Quiet
    };

    let likelihood_pct = (100.0 * (0.4 * p30 + 0.6 * p60)).round().clamp(0.0, 100.0) as u8;

    SubstormAssessment {
        status,
        p30,
        p60,
        likelihood_pct,
    }
}

/// GOES dipolarization: Hp rising at least `slope` nT/min over a trailing
/// `window_minutes` window that ends within the lookback.
pub fn goes_onset(hp: &[Sample], now_ms: i64, tuning: &FusionTuning) -> bool {
    let lookback_start = now_ms - tuning.goes_onset_lookback_minutes * MS_PER_MINUTE;
    let window_ms = (tuning.goes_onset_window_minutes * MS_PER_MINUTE as f64) as i64;

    hp.iter().enumerate().any(|(i, end)| {
        if end.timestamp_ms < lookback_start || end.timestamp_ms > now_ms {
            return false;
        }
        let start = hp[..=i].partition_point(|s| s.timestamp_ms < end.timestamp_ms - window_ms);
        slope_per_minute(&hp[start..=i], tuning.goes_onset_window_minutes)
            .is_some_and(|slope| slope >= tuning.goes_onset_slope)
    })
}

/// Ground magnetometer onset: any |dH/dt| above the volatility threshold
/// within the lookback.
pub fn ground_onset(rate: &[Sample], now_ms: i64, tuning: &FusionTuning) -> bool {
    let cutoff = now_ms - tuning.ground_onset_lookback_minutes * MS_PER_MINUTE;
    rate.iter()
        .any(|s| s.timestamp_ms >= cutoff && s.value.abs() > tuning.volatility_nt_per_min)
}

/// Raw feeds collected for one cycle. Missing feeds are simply empty.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub speed: Vec<TimeSeriesPoint>,
    pub density: Vec<TimeSeriesPoint>,
    pub field: Vec<MagneticFieldSample>,
    pub goes_primary: Vec<TimeSeriesPoint>,
    pub goes_secondary: Vec<TimeSeriesPoint>,
    pub ground: Vec<TimeSeriesPoint>,
    pub xray: Vec<TimeSeriesPoint>,
    pub forecast: Option<AuroraForecast>,
    pub shocks: Vec<ShockEvent>,
}

/// Which feeds produced data this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedAvailability {
    pub solar_wind: bool,
    pub goes: bool,
    pub ground: bool,
    pub xray: bool,
    pub forecast: bool,
}

/// Everything derived in one refresh cycle. Rebuilt from the raw feeds each
/// time and handed around explicitly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionContext {
    pub generated_at_ms: i64,
    pub coupling: Vec<Sample>,
    pub bz: Vec<Sample>,
    pub goes_hp: Vec<Sample>,
    pub ground: Vec<TimeSeriesPoint>,
    pub ground_rate: Vec<Sample>,
    pub events: Vec<NzMagEvent>,
    pub xray: Vec<Sample>,
    pub shocks: Vec<ShockEvent>,
    pub aurora_score: Option<f64>,
    pub inputs: SubstormInputsView,
    pub assessment: SubstormAssessment,
    pub availability: FeedAvailability,
}

/// Serializable copy of the classifier inputs for the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstormInputsView {
    pub dphi_now: Option<f64>,
    pub dphi_mean15: Option<f64>,
    pub bz_mean15: Option<f64>,
    pub sustained_south: bool,
    pub goes_onset: bool,
    pub ground_onset: bool,
}

impl FusionContext {
    pub fn assemble(feeds: FeedSnapshot, now_ms: i64, tuning: &FusionTuning) -> Self {
        let speed = present(&feeds.speed);
        let coupling = join_coupling(&speed, &feeds.field);
        let bz: Vec<Sample> = feeds
            .field
            .iter()
            .map(|f| Sample {
                timestamp_ms: f.timestamp_ms,
                value: f.bz,
            })
            .collect();

        let mean_minutes = tuning.coupling_mean_minutes as f64;
        let dphi_values = values(&coupling);
        let dphi_now = dphi_values.last().copied();
        let dphi_mean15 = trailing_mean(&values(last_minutes(&coupling, mean_minutes)), usize::MAX);
        let dphi_baseline = moving_average(&dphi_values, tuning.coupling_baseline_samples)
            .last()
            .copied();
        let bz_mean15 = trailing_mean(&values(last_minutes(&bz, mean_minutes)), usize::MAX);
        let south = sustained_south(&bz, tuning.sustained_south_minutes);

        let primary = present(&feeds.goes_primary);
        let secondary = present(&feeds.goes_secondary);
        let goes = goes_onset(&primary, now_ms, tuning) || goes_onset(&secondary, now_ms, tuning);
        let goes_hp = if primary.is_empty() { secondary } else { primary };

        let ground_samples = present(&feeds.ground);
        let ground_rate = match tuning.ground_series {
            GroundSeries::Rate => ground_samples,
            GroundSeries::Field => rate_of_change(&ground_samples),
        };
        let events = segment_events(
            &ground_rate,
            tuning.volatility_nt_per_min,
            tuning.event_cooldown_minutes * MS_PER_MINUTE,
        );
        let ground = ground_onset(&ground_rate, now_ms, tuning);

        let aurora_score = feeds.forecast.as_ref().map(|f| f.score);

        let inputs = SubstormInputs {
            dphi_now: dphi_now.unwrap_or(0.0),
            dphi_mean15: dphi_mean15.unwrap_or(0.0),
            dphi_baseline: dphi_baseline.unwrap_or(f64::INFINITY),
            bz_mean15: bz_mean15.unwrap_or(0.0),
            sustained_south: south,
            goes_onset: goes,
            ground_onset: ground,
            score: aurora_score.unwrap_or(0.0),
        };
        let assessment = evaluate(&inputs, &tuning.substorm);

        let availability = FeedAvailability {
            solar_wind: !coupling.is_empty(),
            goes: !goes_hp.is_empty(),
            ground: !feeds.ground.is_empty(),
            xray: !feeds.xray.is_empty(),
            forecast: aurora_score.is_some(),
        };

        Self {
            generated_at_ms: now_ms,
            coupling,
            bz,
            goes_hp,
            ground: feeds.ground,
            ground_rate,
            events,
            xray: present(&feeds.xray),
            shocks: feeds.shocks,
            aurora_score,
            inputs: SubstormInputsView {
                dphi_now,
                dphi_mean15,
                bz_mean15,
                sustained_south: south,
                goes_onset: goes,
                ground_onset: ground,
            },
            assessment,
            availability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong() -> SubstormInputs {
        SubstormInputs {
            dphi_now: 60.0,
            dphi_mean15: 50.0,
            dphi_baseline: 20.0,
            bz_mean15: -8.0,
            sustained_south: true,
            goes_onset: false,
            ground_onset: false,
            score: 40.0,
        }
    }

    fn minutes(points: &[(i64, f64)]) -> Vec<Sample> {
        points
            .iter()
            .map(|&(m, value)| Sample {
                timestamp_ms: m * MS_PER_MINUTE,
                value,
            })
            .collect()
    }

    #[test]
    fn test_probabilities_clamped() {
        let (p30, p60) = probabilities(1e6, 1e6, -20.0);
        assert_eq!(p30, 0.9);
        assert_eq!(p60, 0.9);
        let (p30, p60) = probabilities(0.0, 0.0, 5.0);
        assert!((p30 - 0.15).abs() < 1e-12);
        assert!((p60 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_bz_boost() {
        let (quiet, _) = probabilities(0.0, 0.0, 0.0);
        let (mild, _) = probabilities(0.0, 0.0, -2.0);
        let (south, _) = probabilities(0.0, 0.0, -4.0);
        assert!((mild - quiet - 0.05).abs() < 1e-12);
        assert!((south - quiet - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_not_sustained_is_always_quiet() {
        let thresholds = SubstormThresholds::default();
        for score in [0.0, 20.0, 50.0, 100.0] {
            let inputs = SubstormInputs {
                sustained_south: false,
                score,
                ..strong()
            };
            assert_eq!(evaluate(&inputs, &thresholds).status, SubstormStatus::Quiet);
        }
    }

    #[test]
    fn test_onset_flags_win() {
        let thresholds = SubstormThresholds::default();
        let quiet_goes = SubstormInputs {
            goes_onset: true,
            sustained_south: false,
            score: 0.0,
            ..Default::default()
        };
        assert_eq!(evaluate(&quiet_goes, &thresholds).status, SubstormStatus::Onset);
        let ground = SubstormInputs {
            ground_onset: true,
            ..strong()
        };
        assert_eq!(evaluate(&ground, &thresholds).status, SubstormStatus::Onset);
    }

    #[test]
    fn test_ladder() {
        let thresholds = SubstormThresholds::default();
        assert_eq!(evaluate(&strong(), &thresholds).status, SubstormStatus::Imminent30);

        let low_score = SubstormInputs {
            score: 22.0,
            ..strong()
        };
        assert_eq!(evaluate(&low_score, &thresholds).status, SubstormStatus::Likely60);

        let weak_coupling = SubstormInputs {
            dphi_now: 5.0,
            dphi_mean15: 5.0,
            dphi_baseline: 4.0,
            bz_mean15: -3.5,
            score: 16.0,
            ..strong()
        };
        assert_eq!(evaluate(&weak_coupling, &thresholds).status, SubstormStatus::Watch);

        let below_baseline = SubstormInputs {
            dphi_baseline: 6.0,
            ..weak_coupling
        };
        assert_eq!(evaluate(&below_baseline, &thresholds).status, SubstormStatus::Quiet);
    }

    #[test]
    fn test_likelihood_pct() {
        let a = evaluate(&SubstormInputs::default(), &SubstormThresholds::default());
        // 0.4 * 0.15 + 0.6 * 0.25 = 0.21
        assert_eq!(a.likelihood_pct, 21);
    }

    #[test]
    fn test_goes_onset_detects_recent_jump() {
        let tuning = FusionTuning::default();
        let hp = minutes(&[(0, 100.0), (1, 100.5), (2, 101.0), (3, 110.0), (4, 121.0)]);
        assert!(goes_onset(&hp, 5 * MS_PER_MINUTE, &tuning));
        // Same jump, but long ago.
        assert!(!goes_onset(&hp, 60 * MS_PER_MINUTE, &tuning));
        let flat = minutes(&[(0, 100.0), (1, 101.0), (2, 102.0), (3, 103.0)]);
        assert!(!goes_onset(&flat, 4 * MS_PER_MINUTE, &tuning));
    }

    #[test]
    fn test_ground_onset_lookback() {
        let tuning = FusionTuning::default();
        let rate = minutes(&[(0, 7.0), (40, 1.0), (41, -2.0)]);
        assert!(!ground_onset(&rate, 45 * MS_PER_MINUTE, &tuning));
        assert!(ground_onset(&rate, 20 * MS_PER_MINUTE, &tuning));
    }

    #[test]
    fn test_assemble_empty_feeds_is_quiet() {
        let ctx = FusionContext::assemble(FeedSnapshot::default(), 0, &FusionTuning::default());
        assert_eq!(ctx.assessment.status, SubstormStatus::Quiet);
        assert!(!ctx.availability.solar_wind);
        assert!(ctx.aurora_score.is_none());
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn test_assemble_ground_burst_forces_onset() {
        let ground = (0..10)
            .map(|m| TimeSeriesPoint::new(m * MS_PER_MINUTE, if m == 5 { 40.0 } else { 0.0 }))
            .collect();
        let feeds = FeedSnapshot {
            ground,
            ..Default::default()
        };
        let tuning = FusionTuning {
            ground_series: GroundSeries::Field,
            ..FusionTuning::default()
        };
        let ctx = FusionContext::assemble(feeds, 10 * MS_PER_MINUTE, &tuning);
        assert!(ctx.inputs.ground_onset);
        assert_eq!(ctx.assessment.status, SubstormStatus::Onset);
        assert_eq!(ctx.events.len(), 1);
    }

    #[test]
    fn test_assemble_rate_feed_used_as_is() {
        // Sustained 12 nT/min from the rate-of-change product.
        let ground: Vec<TimeSeriesPoint> = (0..20)
            .map(|m| TimeSeriesPoint::new(m * MS_PER_MINUTE, 12.0))
            .collect();
        let feeds = FeedSnapshot {
            ground: ground.clone(),
            ..Default::default()
        };
        let ctx = FusionContext::assemble(feeds, 20 * MS_PER_MINUTE, &FusionTuning::default());
        assert!(ctx.ground_rate.iter().all(|s| s.value == 12.0));
        assert!(ctx.inputs.ground_onset);
        assert_eq!(ctx.assessment.status, SubstormStatus::Onset);
        assert_eq!(ctx.events.len(), 1);

        // The same numbers read as a raw field are flat.
        let tuning = FusionTuning {
            ground_series: GroundSeries::Field,
            ..FusionTuning::default()
        };
        let feeds = FeedSnapshot {
            ground,
            ..Default::default()
        };
        let ctx = FusionContext::assemble(feeds, 20 * MS_PER_MINUTE, &tuning);
        assert!(!ctx.inputs.ground_onset);
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn test_ground_series_parse() {
        assert_eq!(GroundSeries::parse("Rate"), Some(GroundSeries::Rate));
        assert_eq!(GroundSeries::parse(" field "), Some(GroundSeries::Field));
        assert_eq!(GroundSeries::parse("dH"), None);
    }
}

//! Heuristic constants for the fusion engine and notification pipeline.
//!
//! These values are empirical. They are exposed as named constants and grouped
//! into overridable structs; changing them changes alert behaviour for every
//! subscriber.

/// Upstream feeds mark missing readings with -9999 (or lower).
pub const MISSING_SENTINEL: f64 = -9999.0;

/// Divisor bringing Newell coupling into a display-friendly range.
pub const NEWELL_SCALE: f64 = 1000.0;

/// Bz at or below this counts as southward for the sustained-south check (nT).
pub const SOUTH_BZ_NT: f64 = -3.0;
/// Fraction of southward samples required to call the IMF "sustained south".
pub const SUSTAINED_SOUTH_FRACTION: f64 = 0.8;
pub const SUSTAINED_SOUTH_MINUTES: f64 = 15.0;

/// Ground magnetometer volatility threshold (nT/min).
pub const VOLATILITY_NT_PER_MIN: f64 = 5.0;
/// Silence required before an open ground event is closed.
pub const EVENT_COOLDOWN_MINUTES: i64 = 10;
pub const GROUND_ONSET_LOOKBACK_MINUTES: i64 = 30;

/// GOES Hp slope that counts as a dipolarization onset (nT/min).
pub const GOES_ONSET_SLOPE_NT_PER_MIN: f64 = 8.0;
pub const GOES_ONSET_WINDOW_MINUTES: f64 = 2.0;
pub const GOES_ONSET_LOOKBACK_MINUTES: i64 = 15;

pub const COUPLING_MEAN_MINUTES: i64 = 15;
/// Trailing sample count for the dPhi moving average used by WATCH.
pub const COUPLING_BASELINE_SAMPLES: usize = 60;

/// Reference latitude for the per-subscriber score adjustment (Wellington).
pub const DEFAULT_REFERENCE_LATITUDE: f64 = -41.3;
/// Score points added per 10 km poleward of the reference latitude.
pub const SCORE_POINTS_PER_10KM: f64 = 0.2;
/// Subscribers at or equatorward of this |latitude| are skipped.
pub const PLAUSIBLE_MIN_ABS_LATITUDE: f64 = 30.0;

/// Continuous decline after a rise before a flare peak is declared.
pub const FLARE_PEAK_DECLINE_MINUTES: i64 = 5;

pub const HEALTH_STALE_AFTER_MS: i64 = 10 * 60 * 1000;

/// VAPID token lifetime.
pub const VAPID_TOKEN_HOURS: i64 = 12;

/// What the ground magnetometer feed carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroundSeries {
    /// dH/dt in nT/min, as served by the GeoNet rate-of-change product.
    #[default]
    Rate,
    /// Raw H component in nT. Differentiated before use.
    Field,
}

impl GroundSeries {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rate" => Some(Self::Rate),
            "field" => Some(Self::Field),
            _ => None,
        }
    }
}

/// Window and threshold knobs for assembling a fusion context.
#[derive(Clone, Debug)]
pub struct FusionTuning {
    pub volatility_nt_per_min: f64,
    pub event_cooldown_minutes: i64,
    pub ground_onset_lookback_minutes: i64,
    pub goes_onset_slope: f64,
    pub goes_onset_window_minutes: f64,
    pub goes_onset_lookback_minutes: i64,
    pub sustained_south_minutes: f64,
    pub coupling_mean_minutes: i64,
    pub coupling_baseline_samples: usize,
    pub ground_series: GroundSeries,
    pub substorm: SubstormThresholds,
}

impl Default for FusionTuning {
    fn default() -> Self {
        Self {
            volatility_nt_per_min: VOLATILITY_NT_PER_MIN,
            event_cooldown_minutes: EVENT_COOLDOWN_MINUTES,
            ground_onset_lookback_minutes: GROUND_ONSET_LOOKBACK_MINUTES,
            goes_onset_slope: GOES_ONSET_SLOPE_NT_PER_MIN,
            goes_onset_window_minutes: GOES_ONSET_WINDOW_MINUTES,
            goes_onset_lookback_minutes: GOES_ONSET_LOOKBACK_MINUTES,
            sustained_south_minutes: SUSTAINED_SOUTH_MINUTES,
            coupling_mean_minutes: COUPLING_MEAN_MINUTES,
            coupling_baseline_samples: COUPLING_BASELINE_SAMPLES,
            ground_series: GroundSeries::default(),
            substorm: SubstormThresholds::default(),
        }
    }
}

/// Gates of the substorm classifier.
#[derive(Clone, Debug)]
pub struct SubstormThresholds {
    pub imminent_p30: f64,
    pub imminent_score: f64,
    pub likely_p60: f64,
    pub likely_score: f64,
    pub watch_score: f64,
}

impl Default for SubstormThresholds {
    fn default() -> Self {
        Self {
            imminent_p30: 0.60,
            imminent_score: 25.0,
            likely_p60: 0.60,
            likely_score: 20.0,
            watch_score: 15.0,
        }
    }
}

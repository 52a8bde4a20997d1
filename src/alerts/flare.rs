use crate::domain::Sample;
use serde::Serialize;
use std::fmt;

/// GOES X-ray class from the 0.1-0.8 nm flux (W/m²), decade bands A..X.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlareClass {
    pub letter: char,
    /// Multiplier of the band base, e.g. 2.4 for M2.4.
    pub magnitude: f64,
}

impl FlareClass {
    const BANDS: [(char, f64); 5] = [('X', 1e-4), ('M', 1e-5), ('C', 1e-6), ('B', 1e-7), ('A', 1e-8)];

    pub fn from_flux(flux: f64) -> Self {
        let (letter, base) = Self::BANDS
            .iter()
            .copied()
            .find(|(_, base)| flux >= *base)
            .unwrap_or(('A', 1e-8));
        Self {
            letter,
            magnitude: flux.max(0.0) / base,
        }
    }
}

impl fmt::Display for FlareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:.1}", self.letter, self.magnitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlarePeak {
    pub timestamp_ms: i64,
    pub flux: f64,
    pub class: FlareClass,
}

/// Most recent flux maximum that was preceded by a rise and has been followed
/// by a strictly declining flux for at least `min_decline_ms`.
pub fn detect_flare_peak(series: &[Sample], min_decline_ms: i64) -> Option<FlarePeak> {
    let last = series.len().checked_sub(1)?;
    let mut peak = last;
    while peak > 0 && series[peak - 1].value > series[peak].value {
        peak -= 1;
    }
    if peak == last || peak == 0 {
        return None;
    }
    if series[peak - 1].value >= series[peak].value {
        return None;
    }
    if series[last].timestamp_ms - series[peak].timestamp_ms < min_decline_ms {
        return None;
    }
    let flux = series[peak].value;
    Some(FlarePeak {
        timestamp_ms: series[peak].timestamp_ms,
        flux,
        class: FlareClass::from_flux(flux),
    })
}

//! Signal normalization: upstream JSON shapes into ascending `{time, value}` series.
//!
//! Every entry point is total. A payload that does not have the expected shape
//! yields an empty series and a warning, so one broken feed never aborts the
//! refresh of the others.

use crate::config::tuning::MISSING_SENTINEL;
use crate::domain::{AuroraForecast, MagneticFieldSample, Sample, ShockEvent, TimeSeriesPoint};
use crate::errors::{ApiError, ApiResult};
use crate::utils::{n_pick, num, s_pick, t_pick, time_of};
use serde_json::Value;
use tracing::{debug, warn};

/// Numeric reading with sentinels, NaN and infinities mapped to `None`.
pub fn clean_value(v: &Value) -> Option<f64> {
    num(v).filter(|x| x.is_finite() && *x > MISSING_SENTINEL)
}

/// Drop missing readings for the fusion/notification path.
pub fn present(series: &[TimeSeriesPoint]) -> Vec<Sample> {
    series
        .iter()
        .filter_map(|p| {
            p.value.map(|value| Sample {
                timestamp_ms: p.timestamp_ms,
                value,
            })
        })
        .collect()
}

/// Resolve header names of a `[header, ...rows]` table to column indexes.
fn columns(header: &Value, names: &[&str]) -> ApiResult<Vec<usize>> {
    let header = header
        .as_array()
        .ok_or_else(|| ApiError::MalformedSample("header row is not an array".into()))?;
    names
        .iter()
        .map(|name| {
            header
                .iter()
                .position(|h| h.as_str() == Some(*name))
                .ok_or_else(|| ApiError::MalformedSample(format!("missing column {name}")))
        })
        .collect()
}

fn table_rows<'a>(raw: &'a Value, names: &[&str]) -> ApiResult<(Vec<usize>, &'a [Value])> {
    let rows = raw
        .as_array()
        .ok_or_else(|| ApiError::MalformedSample("table payload is not an array".into()))?;
    let Some((header, body)) = rows.split_first() else {
        return Ok((Vec::new(), &[]));
    };
    Ok((columns(header, names)?, body))
}

fn sort_by_time(series: &mut [TimeSeriesPoint]) {
    series.sort_by_key(|p| p.timestamp_ms);
}

/// Tabular feed (NOAA solar wind products) keyed by named columns.
pub fn normalize_table(raw: &Value, time_col: &str, value_col: &str) -> Vec<TimeSeriesPoint> {
    let (idx, body) = match table_rows(raw, &[time_col, value_col]) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("table feed ({}) unparseable: {}", value_col, e);
            return Vec::new();
        }
    };
    if idx.is_empty() {
        return Vec::new();
    }

    let mut series: Vec<TimeSeriesPoint> = body
        .iter()
        .filter_map(|row| {
            let ts = row.get(idx[0]).and_then(time_of)?;
            Some(TimeSeriesPoint {
                timestamp_ms: ts.timestamp_millis(),
                value: row.get(idx[1]).and_then(clean_value),
            })
        })
        .collect();
    sort_by_time(&mut series);
    series
}

/// Object-array feed such as the GOES magnetometers (`time_tag`, `Hp`).
pub fn normalize_objects(raw: &Value, time_field: &str, value_field: &str) -> Vec<TimeSeriesPoint> {
    let Some(items) = raw.as_array() else {
        warn!("object feed ({}) is not an array", value_field);
        return Vec::new();
    };

    let mut series: Vec<TimeSeriesPoint> = items
        .iter()
        .filter_map(|item| {
            let ts = t_pick(item, &[time_field])?;
            Some(TimeSeriesPoint {
                timestamp_ms: ts.timestamp_millis(),
                value: item.get(value_field).and_then(clean_value),
            })
        })
        .collect();
    sort_by_time(&mut series);
    series
}

/// GOES X-ray flux in the long (0.1-0.8 nm) band, the one flare classes use.
pub fn xray_long_band(raw: &Value) -> Vec<TimeSeriesPoint> {
    let Some(items) = raw.as_array() else {
        warn!("xray feed is not an array");
        return Vec::new();
    };
    let long: Vec<Value> = items
        .iter()
        .filter(|item| item.get("energy").and_then(Value::as_str) == Some("0.1-0.8nm"))
        .cloned()
        .collect();
    normalize_objects(&Value::Array(long), "time_tag", "flux")
}

/// Vendor time-series API: `{data: [{ts, val}], ...}`.
pub fn normalize_vendor_series(raw: &Value) -> Vec<TimeSeriesPoint> {
    match raw.get("data") {
        Some(data) => normalize_objects(data, "ts", "val"),
        None => {
            warn!("vendor series payload has no data field");
            Vec::new()
        }
    }
}

fn field_row(row: &Value, idx: &[usize]) -> ApiResult<MagneticFieldSample> {
    let ts = row
        .get(idx[0])
        .and_then(time_of)
        .ok_or_else(|| ApiError::MalformedSample("bad time_tag".into()))?;
    let pick = |i: usize, name: &str| {
        row.get(idx[i])
            .and_then(clean_value)
            .ok_or_else(|| ApiError::MalformedSample(format!("missing {name}")))
    };
    let bt = pick(1, "bt")?;
    if bt < 0.0 {
        return Err(ApiError::MalformedSample(format!("negative bt {bt}")));
    }
    Ok(MagneticFieldSample {
        timestamp_ms: ts.timestamp_millis(),
        bt,
        bz: pick(2, "bz_gsm")?,
        by: pick(3, "by_gsm")?,
    })
}

/// IMF samples from the NOAA mag table. Rows with missing or invalid
/// components are dropped.
pub fn magnetic_samples(raw: &Value) -> Vec<MagneticFieldSample> {
    let (idx, body) = match table_rows(raw, &["time_tag", "bt", "bz_gsm", "by_gsm"]) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("magnetic field feed unparseable: {}", e);
            return Vec::new();
        }
    };
    if idx.is_empty() {
        return Vec::new();
    }

    let mut samples: Vec<MagneticFieldSample> = body
        .iter()
        .filter_map(|row| match field_row(row, &idx) {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!("dropping IMF row: {}", e);
                None
            }
        })
        .collect();
    samples.sort_by_key(|s| s.timestamp_ms);
    samples
}

/// Aurora forecast endpoint. The score format is owned upstream; we only
/// look for a handful of known keys.
pub fn parse_forecast(raw: &Value) -> Option<AuroraForecast> {
    let current = raw.get("currentForecast")?;
    let score = n_pick(current, &["spotTheAuroraScore", "score", "finalScore"])
        .filter(|s| s.is_finite())?;

    let history = raw
        .get("historicalData")
        .and_then(Value::as_array)
        .map(|items| {
            let mut series: Vec<TimeSeriesPoint> = items
                .iter()
                .filter_map(|item| {
                    let ts = t_pick(item, &["timestamp", "time", "ts"])?;
                    Some(TimeSeriesPoint {
                        timestamp_ms: ts.timestamp_millis(),
                        value: n_pick(item, &["finalScore", "score", "value"])
                            .filter(|v| v.is_finite() && *v > MISSING_SENTINEL),
                    })
                })
                .collect();
            sort_by_time(&mut series);
            series
        })
        .unwrap_or_default();

    Some(AuroraForecast { score, history })
}

/// DONKI interplanetary shock list.
pub fn parse_shocks(raw: &Value) -> Vec<ShockEvent> {
    let Some(items) = raw.as_array() else {
        warn!("IPS feed is not an array");
        return Vec::new();
    };

    let mut shocks: Vec<ShockEvent> = items
        .iter()
        .filter_map(|item| {
            let ts = t_pick(item, &["eventTime"])?;
            let instruments = item
                .get("instruments")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|i| s_pick(i, &["displayName"]))
                        .collect()
                })
                .unwrap_or_default();
            Some(ShockEvent {
                event_time_ms: ts.timestamp_millis(),
                location: s_pick(item, &["location"]),
                instruments,
            })
        })
        .collect();
    shocks.sort_by_key(|s| s.event_time_ms);
    shocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plasma() -> Value {
        json!([
            ["time_tag", "density", "speed", "temperature"],
            ["2024-05-10 18:02:00.000", "3.1", "712.4", "400000"],
            ["2024-05-10 18:00:00.000", "3.0", "700.0", "400000"],
            ["2024-05-10 18:01:00.000", "3.2", "-99999.9", "400000"],
            ["garbage", "1", "1", "1"]
        ])
    }

    #[test]
    fn test_table_sorted_with_gaps() {
        let series = normalize_table(&plasma(), "time_tag", "speed");
        assert_eq!(series.len(), 3);
        assert!(series.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
        assert_eq!(series[0].value, Some(700.0));
        assert_eq!(series[1].value, None);
        assert_eq!(series[2].value, Some(712.4));
    }

    #[test]
    fn test_present_drops_missing() {
        let series = normalize_table(&plasma(), "time_tag", "speed");
        let samples = present(&series);
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_missing_column_yields_empty() {
        assert!(normalize_table(&plasma(), "time_tag", "bz_gsm").is_empty());
        assert!(normalize_table(&json!({"oops": true}), "time_tag", "speed").is_empty());
    }

    #[test]
    fn test_magnetic_samples_drop_bad_rows() {
        let raw = json!([
            ["time_tag", "bx_gsm", "by_gsm", "bz_gsm", "lon_gsm", "lat_gsm", "bt"],
            ["2024-05-10 18:00:00.000", "1", "2.0", "-8.0", "0", "0", "9.0"],
            ["2024-05-10 18:01:00.000", "1", "2.0", "-8.0", "0", "0", "-1.0"],
            ["2024-05-10 18:02:00.000", "1", "NaN", "-8.0", "0", "0", "9.0"],
            ["2024-05-10 18:03:00.000", "1", "-9999", "-8.0", "0", "0", "9.0"]
        ]);
        let samples = magnetic_samples(&raw);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].bz, -8.0);
        assert_eq!(samples[0].by, 2.0);
    }

    #[test]
    fn test_goes_objects() {
        let raw = json!([
            {"time_tag": "2024-05-10T18:01:00Z", "satellite": 16, "Hp": 101.5},
            {"time_tag": "2024-05-10T18:00:00Z", "satellite": 16, "Hp": 100.0}
        ]);
        let series = normalize_objects(&raw, "time_tag", "Hp");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, Some(100.0));
    }

    #[test]
    fn test_xray_keeps_long_band() {
        let raw = json!([
            {"time_tag": "2024-05-10T18:00:00Z", "flux": 2.1e-7, "energy": "0.05-0.4nm"},
            {"time_tag": "2024-05-10T18:00:00Z", "flux": 2.4e-5, "energy": "0.1-0.8nm"}
        ]);
        let series = xray_long_band(&raw);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, Some(2.4e-5));
    }

    #[test]
    fn test_vendor_series() {
        let raw = json!({"domain": "geomag", "data": [
            {"ts": "2024-05-10T18:00:00Z", "val": 1.5},
            {"ts": "2024-05-10T18:01:00Z", "val": null}
        ]});
        let series = normalize_vendor_series(&raw);
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].value, None);
        assert!(normalize_vendor_series(&json!({})).is_empty());
    }

    #[test]
    fn test_forecast_score_and_history() {
        let raw = json!({
            "currentForecast": {"spotTheAuroraScore": 52.0},
            "historicalData": [
                {"timestamp": 1715364000000i64, "finalScore": 40.0},
                {"timestamp": 1715364060000i64, "finalScore": 44.0}
            ],
            "dailyHistory": [],
            "owmDailyForecast": [],
            "rawHistory": []
        });
        let forecast = parse_forecast(&raw).unwrap();
        assert_eq!(forecast.score, 52.0);
        assert_eq!(forecast.history.len(), 2);
        assert!(parse_forecast(&json!({"historicalData": []})).is_none());
    }

    #[test]
    fn test_shocks_sorted() {
        let raw = json!([
            {"eventTime": "2024-05-10T16:36Z", "location": "Earth", "instruments": [{"displayName": "DSCOVR: PLASMAG"}]},
            {"eventTime": "2024-05-09T10:00Z", "location": "Earth", "instruments": []}
        ]);
        let shocks = parse_shocks(&raw);
        assert_eq!(shocks.len(), 2);
        assert!(shocks[0].event_time_ms < shocks[1].event_time_ms);
        assert_eq!(shocks[1].instruments, vec!["DSCOVR: PLASMAG".to_string()]);
    }
}

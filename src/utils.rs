/// Utility functions
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    if let Some(x) = v.as_f64() {
        return Some(x);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<f64>().ok();
    }
    None
}

/// Pick the first numeric value from JSON by trying multiple keys
pub fn n_pick(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k).and_then(num))
}

/// Pick string value from JSON by trying multiple keys
pub fn s_pick(v: &Value, keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Some(x) = v.get(*k) {
            if let Some(s) = x.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            } else if x.is_number() {
                return Some(x.to_string());
            }
        }
    }
    None
}

/// Parse a timestamp string. Strings without a zone suffix are UTC.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // DONKI style: 2024-01-15T10:30Z
    if let Some(stripped) = s.strip_suffix('Z') {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M") {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Interpret a JSON value as a timestamp (string, epoch seconds or epoch millis)
pub fn time_of(v: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = v.as_str() {
        return parse_time(s);
    }
    let n = v.as_i64()?;
    // Anything past ~2286 in seconds is certainly milliseconds.
    if n.abs() >= 10_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

/// Pick timestamp value from JSON by trying multiple keys
pub fn t_pick(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| v.get(*k).and_then(time_of))
}

/// Calculate distance between two coordinates using Haversine formula
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let rlat1 = lat1.to_radians();
    let rlat2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + rlat1.cos() * rlat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    6371.0 * c
}

pub const MS_PER_MINUTE: i64 = 60_000;

pub fn minutes_between(from_ms: i64, to_ms: i64) -> f64 {
    (to_ms - from_ms) as f64 / MS_PER_MINUTE as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_haversine_km_zero_distance() {
        let distance = haversine_km(0.0, 0.0, 0.0, 0.0);
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let distance = haversine_km(-41.0, 174.0, -42.0, 174.0);
        assert!((distance - 111.2).abs() < 0.5);
    }

    #[test]
    fn test_num_from_float() {
        let json = serde_json::json!(42.5);
        assert_eq!(num(&json), Some(42.5));
    }

    #[test]
    fn test_num_from_string() {
        let json = serde_json::json!("42.5");
        assert_eq!(num(&json), Some(42.5));
    }

    #[test]
    fn test_num_from_invalid() {
        let json = serde_json::json!("invalid");
        assert_eq!(num(&json), None);
    }

    #[test]
    fn test_n_pick_second_key() {
        let json = serde_json::json!({"score": "31.5"});
        assert_eq!(n_pick(&json, &["spotTheAuroraScore", "score"]), Some(31.5));
    }

    #[test]
    fn test_s_pick_not_found() {
        let json = serde_json::json!({"other": "value"});
        assert_eq!(s_pick(&json, &["name", "title"]), None);
    }

    #[test]
    fn test_parse_time_noaa_format_is_utc() {
        let dt = parse_time("2024-01-15 10:30:00.000").unwrap();
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn test_parse_time_rfc3339_offset() {
        let dt = parse_time("2024-01-15T23:30:00+13:00").unwrap();
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn test_parse_time_donki_minutes() {
        let dt = parse_time("2024-01-15T10:31Z").unwrap();
        assert_eq!(dt.minute(), 31);
    }

    #[test]
    fn test_time_of_epoch_seconds_and_millis() {
        let secs = time_of(&serde_json::json!(1705315800)).unwrap();
        let millis = time_of(&serde_json::json!(1705315800000i64)).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_t_pick_not_found() {
        let json = serde_json::json!({"other": "value"});
        assert_eq!(t_pick(&json, &["timestamp"]), None);
    }
}

/// Domain models for the application
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One time-tagged reading. `value` is `None` for upstream sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp_ms: i64,
    pub value: Option<f64>,
}

impl TimeSeriesPoint {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value: Some(value),
        }
    }
}

/// A present reading, as used on the fusion/notification path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Interplanetary magnetic field reading. `bt >= 0` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagneticFieldSample {
    pub timestamp_ms: i64,
    pub bt: f64,
    pub bz: f64,
    pub by: f64,
}

/// Substorm severity, ordered from quiet to onset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubstormStatus {
    Quiet,
    Watch,
    #[serde(rename = "LIKELY_60")]
    Likely60,
    #[serde(rename = "IMMINENT_30")]
    Imminent30,
    Onset,
}

impl SubstormStatus {
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Quiet => "Quiet",
            Self::Watch => "Watch",
            Self::Likely60 => "Substorm likely within 60 minutes",
            Self::Imminent30 => "Substorm imminent within 30 minutes",
            Self::Onset => "Substorm onset detected",
        }
    }
}

/// A burst of ground magnetometer volatility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NzMagEvent {
    pub start_ms: i64,
    pub end_ms: i64,
    pub max_delta: f64,
}

/// Persisted per-topic record, mutated only by the scheduled evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTopicState {
    pub topic: String,
    pub last_value: Option<f64>,
    pub last_fired_at_ms: Option<i64>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// A browser push subscription plus the subscriber's preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    #[serde(default)]
    pub preferences: HashMap<String, bool>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn wants(&self, topic: &str) -> bool {
        self.preferences.get(topic).copied().unwrap_or(false)
    }
}

/// Notification body delivered to the service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

/// Latest aurora visibility forecast, treated as an opaque upstream score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuroraForecast {
    pub score: f64,
    pub history: Vec<TimeSeriesPoint>,
}

/// Interplanetary shock reported by DONKI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockEvent {
    pub event_time_ms: i64,
    pub location: Option<String>,
    pub instruments: Vec<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub ok: bool,
    pub last_run: Option<i64>,
    pub age_ms: Option<i64>,
    pub threshold_ms: i64,
}

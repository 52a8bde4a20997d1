//! Threshold crossing detection for the scheduled notification run.
//!
//! Firing is edge-triggered against the value persisted by the previous run:
//! a quantity that stays above a rung fires once. A topic with no persisted
//! value only records a baseline on its first run. Every firing then passes a
//! per-topic cooldown.

use crate::config::tuning::{
    FLARE_PEAK_DECLINE_MINUTES, PLAUSIBLE_MIN_ABS_LATITUDE, SCORE_POINTS_PER_10KM,
};
use crate::domain::{
    NotificationTopicState, PushPayload, Sample, ShockEvent, Subscription, SubstormStatus,
};
use crate::errors::ApiResult;
use crate::repo::{get_json, put_json, KvStore, StateRepo, COOLDOWN_PREFIX};
use crate::substorm::SubstormAssessment;
use crate::utils::{haversine_km, MS_PER_MINUTE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

mod flare;

pub use flare::{detect_flare_peak, FlareClass, FlarePeak};

pub const FLARE_PEAK_TOPIC: &str = "flare-peak";
pub const SUBSTORM_TOPIC: &str = "substorm-forecast";
pub const IPS_SHOCK_TOPIC: &str = "ips-shock";

pub fn aurora_topic(percent: f64) -> String {
    format!("aurora-{}percent", percent.round() as i64)
}

pub fn flare_topic(label: &str) -> String {
    format!("flare-{label}")
}

/// One rung of the X-ray flux ladder, e.g. `M1` at 1e-5 W/m².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxRung {
    pub label: String,
    pub flux: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownMinutes {
    pub aurora: i64,
    pub flare: i64,
    pub flare_peak: i64,
    pub substorm: i64,
    pub ips_shock: i64,
}

impl Default for CooldownMinutes {
    fn default() -> Self {
        Self {
            aurora: 60,
            flare: 30,
            flare_peak: 30,
            substorm: 45,
            ips_shock: 60,
        }
    }
}

/// Threshold ladder persisted under `CONFIG_THRESHOLDS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub aurora_percent: Vec<f64>,
    pub flare_flux: Vec<FluxRung>,
    /// Smallest peak flux that produces a `flare-peak` notification.
    pub flare_peak_min_flux: f64,
    pub substorm_min_status: SubstormStatus,
    pub cooldown_minutes: CooldownMinutes,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            aurora_percent: vec![40.0, 50.0, 80.0],
            flare_flux: vec![
                FluxRung {
                    label: "M1".into(),
                    flux: 1e-5,
                },
                FluxRung {
                    label: "X1".into(),
                    flux: 1e-4,
                },
            ],
            flare_peak_min_flux: 1e-5,
            substorm_min_status: SubstormStatus::Likely60,
            cooldown_minutes: CooldownMinutes::default(),
        }
    }
}

/// Edge trigger: previous value below the rung, current value at or above it.
pub fn crossed(previous: Option<f64>, current: f64, threshold: f64) -> bool {
    previous.is_some_and(|p| p < threshold) && current >= threshold
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Suppressed { remaining_ms: i64 },
}

impl fmt::Display for CooldownDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownDecision::Allowed => write!(f, "allowed"),
            CooldownDecision::Suppressed { remaining_ms } => {
                write!(f, "suppressed ({}s left)", remaining_ms / 1000)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CooldownRecord {
    last_fired_at_ms: i64,
}

/// Read-then-write cooldown per topic. Overlapping runs can both pass the
/// check; the window is best-effort deduplication.
#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn KvStore>,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn last_fired(&self, topic: &str) -> ApiResult<Option<i64>> {
        let record: Option<CooldownRecord> =
            get_json(self.store.as_ref(), &format!("{COOLDOWN_PREFIX}{topic}")).await?;
        Ok(record.map(|r| r.last_fired_at_ms))
    }

    pub async fn check_and_set(
        &self,
        topic: &str,
        now_ms: i64,
        cooldown_minutes: i64,
    ) -> ApiResult<CooldownDecision> {
        let window_ms = cooldown_minutes * MS_PER_MINUTE;
        if let Some(last) = self.last_fired(topic).await? {
            let elapsed = now_ms - last;
            if elapsed < window_ms {
                return Ok(CooldownDecision::Suppressed {
                    remaining_ms: window_ms - elapsed,
                });
            }
        }
        put_json(
            self.store.as_ref(),
            &format!("{COOLDOWN_PREFIX}{topic}"),
            &CooldownRecord {
                last_fired_at_ms: now_ms,
            },
        )
        .await?;
        Ok(CooldownDecision::Allowed)
    }
}

/// Aurora score seen from a subscriber's latitude: +0.2 points per 10 km
/// poleward of the reference, minus the same equatorward.
pub fn adjusted_score(base: f64, latitude: f64, reference_latitude: f64) -> f64 {
    let km = haversine_km(latitude, 0.0, reference_latitude, 0.0);
    let poleward = if reference_latitude < 0.0 {
        latitude < reference_latitude
    } else {
        latitude > reference_latitude
    };
    let shift = SCORE_POINTS_PER_10KM * km / 10.0;
    if poleward {
        base + shift
    } else {
        base - shift
    }
}

/// Latitudes within 30 degrees of the equator are almost always a default or
/// failed geolocation for this audience.
pub fn plausible_location(latitude: f64) -> bool {
    latitude.abs() > PLAUSIBLE_MIN_ABS_LATITUDE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuroraGate {
    pub base_score: f64,
    pub threshold: f64,
    pub reference_latitude: f64,
}

/// Per-subscriber delivery filter carried with each broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceFilter {
    /// Subscriber must have opted into this topic.
    pub topic: Option<String>,
    pub require_plausible_location: bool,
    pub aurora: Option<AuroraGate>,
}

impl AudienceFilter {
    pub fn for_topic(topic: &str) -> Self {
        Self {
            topic: Some(topic.to_string()),
            require_plausible_location: true,
            aurora: None,
        }
    }

    pub fn admits(&self, subscription: &Subscription) -> bool {
        if let Some(topic) = &self.topic {
            if !subscription.wants(topic) {
                return false;
            }
        }
        let Some(location) = subscription.location else {
            return true;
        };
        if self.require_plausible_location && !plausible_location(location.lat) {
            return false;
        }
        match &self.aurora {
            Some(gate) => {
                adjusted_score(gate.base_score, location.lat, gate.reference_latitude)
                    >= gate.threshold
            }
            None => true,
        }
    }
}

/// A notification that passed the edge trigger and its cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub topic: String,
    pub value: f64,
    pub payload: PushPayload,
    pub filter: AudienceFilter,
}

/// Current values the engine compares against persisted state.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub now_ms: i64,
    pub aurora_score: Option<f64>,
    pub xray: Vec<Sample>,
    pub substorm: Option<SubstormAssessment>,
    pub latest_shock: Option<ShockEvent>,
}

/// What the previous run persisted for a topic.
#[derive(Default)]
struct Previous {
    value: Option<f64>,
    fired_at_ms: Option<i64>,
}

struct Candidate {
    topic: String,
    value: f64,
    fires: bool,
    previous_fired_at_ms: Option<i64>,
    cooldown_minutes: i64,
    payload: PushPayload,
    filter: AudienceFilter,
}

pub struct ThresholdEngine {
    states: StateRepo,
    cooldowns: CooldownGate,
    reference_latitude: f64,
}

impl ThresholdEngine {
    pub fn new(states: StateRepo, cooldowns: CooldownGate, reference_latitude: f64) -> Self {
        Self {
            states,
            cooldowns,
            reference_latitude,
        }
    }

    async fn previous(&self, topic: &str) -> ApiResult<Previous> {
        Ok(self
            .states
            .topic_state(topic)
            .await?
            .map(|s| Previous {
                value: s.last_value,
                fired_at_ms: s.last_fired_at_ms,
            })
            .unwrap_or_default())
    }

    async fn aurora_candidates(&self, score: f64, config: &ThresholdConfig) -> ApiResult<Vec<Candidate>> {
        let mut out = Vec::new();
        for &threshold in &config.aurora_percent {
            let topic = aurora_topic(threshold);
            let prev = self.previous(&topic).await?;
            out.push(Candidate {
                fires: crossed(prev.value, score, threshold),
                previous_fired_at_ms: prev.fired_at_ms,
                value: score,
                cooldown_minutes: config.cooldown_minutes.aurora,
                payload: PushPayload {
                    title: format!("Aurora alert: {:.0}% visibility score", score),
                    body: format!(
                        "The aurora score has reached {:.0}%, above your {:.0}% alert level.",
                        score, threshold
                    ),
                    tag: topic.clone(),
                    data: json!({"topic": topic, "score": score, "threshold": threshold, "url": "/"}),
                },
                filter: AudienceFilter {
                    aurora: Some(AuroraGate {
                        base_score: score,
                        threshold,
                        reference_latitude: self.reference_latitude,
                    }),
                    ..AudienceFilter::for_topic(&topic)
                },
                topic,
            });
        }
        Ok(out)
    }

    async fn flare_candidates(
        &self,
        xray: &[Sample],
        config: &ThresholdConfig,
        now_ms: i64,
    ) -> ApiResult<Vec<Candidate>> {
        let mut out = Vec::new();
        let Some(latest) = xray.last() else {
            return Ok(out);
        };
        let class = FlareClass::from_flux(latest.value);

        for rung in &config.flare_flux {
            let topic = flare_topic(&rung.label);
            let prev = self.previous(&topic).await?;
            out.push(Candidate {
                fires: crossed(prev.value, latest.value, rung.flux),
                previous_fired_at_ms: prev.fired_at_ms,
                value: latest.value,
                cooldown_minutes: config.cooldown_minutes.flare,
                payload: PushPayload {
                    title: format!("Solar flare in progress: {class}"),
                    body: format!("X-ray flux has reached {class}, above the {} level.", rung.label),
                    tag: topic.clone(),
                    data: json!({"topic": topic, "flux": latest.value, "class": class.to_string()}),
                },
                filter: AudienceFilter::for_topic(&topic),
                topic,
            });
        }

        let decline_ms = FLARE_PEAK_DECLINE_MINUTES * MS_PER_MINUTE;
        if let Some(peak) = detect_flare_peak(xray, decline_ms) {
            let prev = self.previous(FLARE_PEAK_TOPIC).await?;
            let new_peak = prev.value.is_some_and(|p| (peak.timestamp_ms as f64) > p);
            let fresh = now_ms - peak.timestamp_ms <= 3 * 60 * MS_PER_MINUTE;
            out.push(Candidate {
                topic: FLARE_PEAK_TOPIC.to_string(),
                value: peak.timestamp_ms as f64,
                fires: new_peak && fresh && peak.flux >= config.flare_peak_min_flux,
                previous_fired_at_ms: prev.fired_at_ms,
                cooldown_minutes: config.cooldown_minutes.flare_peak,
                payload: PushPayload {
                    title: format!("Solar flare peaked at {}", peak.class),
                    body: format!(
                        "A {} flare has peaked and X-ray flux has been declining for {} minutes.",
                        peak.class, FLARE_PEAK_DECLINE_MINUTES
                    ),
                    tag: FLARE_PEAK_TOPIC.to_string(),
                    data: json!({
                        "topic": FLARE_PEAK_TOPIC,
                        "peakTime": peak.timestamp_ms,
                        "flux": peak.flux,
                        "class": peak.class.to_string(),
                    }),
                },
                filter: AudienceFilter::for_topic(FLARE_PEAK_TOPIC),
            });
        }
        Ok(out)
    }

    async fn substorm_candidate(
        &self,
        assessment: &SubstormAssessment,
        config: &ThresholdConfig,
    ) -> ApiResult<Candidate> {
        let rank = assessment.status.rank() as f64;
        let prev = self.previous(SUBSTORM_TOPIC).await?;
        Ok(Candidate {
            topic: SUBSTORM_TOPIC.to_string(),
            value: rank,
            fires: crossed(prev.value, rank, config.substorm_min_status.rank() as f64),
            previous_fired_at_ms: prev.fired_at_ms,
            cooldown_minutes: config.cooldown_minutes.substorm,
            payload: PushPayload {
                title: assessment.status.label().to_string(),
                body: format!(
                    "Substorm likelihood is {}%. Get somewhere dark with a clear view south.",
                    assessment.likelihood_pct
                ),
                tag: SUBSTORM_TOPIC.to_string(),
                data: json!({
                    "topic": SUBSTORM_TOPIC,
                    "status": assessment.status,
                    "likelihood": assessment.likelihood_pct,
                }),
            },
            filter: AudienceFilter::for_topic(SUBSTORM_TOPIC),
        })
    }

    async fn shock_candidate(&self, shock: &ShockEvent, config: &ThresholdConfig) -> ApiResult<Candidate> {
        let at = shock.event_time_ms as f64;
        let prev = self.previous(IPS_SHOCK_TOPIC).await?;
        Ok(Candidate {
            topic: IPS_SHOCK_TOPIC.to_string(),
            value: at,
            fires: prev.value.is_some_and(|p| at > p),
            previous_fired_at_ms: prev.fired_at_ms,
            cooldown_minutes: config.cooldown_minutes.ips_shock,
            payload: PushPayload {
                title: "Interplanetary shock detected".to_string(),
                body: format!(
                    "A solar wind shock arrived at {}. Aurora activity may pick up over the next hour.",
                    shock.location.as_deref().unwrap_or("L1")
                ),
                tag: IPS_SHOCK_TOPIC.to_string(),
                data: json!({
                    "topic": IPS_SHOCK_TOPIC,
                    "eventTime": shock.event_time_ms,
                    "instruments": shock.instruments,
                }),
            },
            filter: AudienceFilter::for_topic(IPS_SHOCK_TOPIC),
        })
    }

    /// Compare the observation against persisted state, gate firings by
    /// cooldown and persist the new values.
    pub async fn evaluate(&self, obs: &Observation, config: &ThresholdConfig) -> ApiResult<Vec<Alert>> {
        let mut candidates = Vec::new();
        if let Some(score) = obs.aurora_score {
            candidates.extend(self.aurora_candidates(score, config).await?);
        }
        candidates.extend(self.flare_candidates(&obs.xray, config, obs.now_ms).await?);
        if let Some(assessment) = &obs.substorm {
            candidates.push(self.substorm_candidate(assessment, config).await?);
        }
        if let Some(shock) = &obs.latest_shock {
            candidates.push(self.shock_candidate(shock, config).await?);
        }

        let mut alerts = Vec::new();
        for candidate in candidates {
            let mut fired_at = candidate.previous_fired_at_ms;

            if candidate.fires {
                match self
                    .cooldowns
                    .check_and_set(&candidate.topic, obs.now_ms, candidate.cooldown_minutes)
                    .await?
                {
                    CooldownDecision::Allowed => {
                        info!("{} fired at value {}", candidate.topic, candidate.value);
                        fired_at = Some(obs.now_ms);
                        alerts.push(Alert {
                            topic: candidate.topic.clone(),
                            value: candidate.value,
                            payload: candidate.payload,
                            filter: candidate.filter,
                        });
                    }
                    decision => debug!("{} crossing {}", candidate.topic, decision),
                }
            }

            self.states
                .put_topic_state(&NotificationTopicState {
                    topic: candidate.topic,
                    last_value: Some(candidate.value),
                    last_fired_at_ms: fired_at,
                    updated_at_ms: obs.now_ms,
                })
                .await?;
        }
        Ok(alerts)
    }
}

/// Business logic services layer
use crate::alerts::{Alert, AudienceFilter, Observation, ThresholdConfig, ThresholdEngine};
use crate::clients::FeedClient;
use crate::config::tuning::HEALTH_STALE_AFTER_MS;
use crate::config::FusionTuning;
use crate::domain::{Health, NotificationTopicState, PushPayload, Subscription};
use crate::errors::{ApiError, ApiResult};
use crate::normalize::{
    magnetic_samples, normalize_objects, normalize_table, normalize_vendor_series,
    parse_forecast, parse_shocks, xray_long_band,
};
use crate::push::{BroadcastJob, BroadcastMode, BroadcastSummary, Broadcaster};
use crate::repo::{LatestAlert, StateRepo};
use crate::substorm::{FeedSnapshot, FusionContext};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Parse a feed result, or log and fall back to an empty value.
async fn feed_or_default<T: Default>(
    name: &str,
    fetch: impl Future<Output = ApiResult<Value>>,
    parse: impl FnOnce(&Value) -> T,
) -> T {
    match fetch.await {
        Ok(raw) => parse(&raw),
        Err(e) => {
            warn!("{} feed unavailable this cycle: {}", name, e);
            T::default()
        }
    }
}

/// Multi-source fusion refresh
pub struct FusionService {
    feeds: FeedClient,
    tuning: FusionTuning,
    latest: RwLock<Option<Arc<FusionContext>>>,
}

impl FusionService {
    pub fn new(feeds: FeedClient, tuning: FusionTuning) -> Self {
        Self {
            feeds,
            tuning,
            latest: RwLock::new(None),
        }
    }

    /// Fetch every feed concurrently. A failing feed comes back empty.
    pub async fn collect(&self) -> FeedSnapshot {
        let f = &self.feeds;
        let (plasma, field, goes_primary, goes_secondary, ground, xray, forecast, shocks) = tokio::join!(
            feed_or_default("plasma", f.plasma(), |raw| {
                (
                    normalize_table(raw, "time_tag", "speed"),
                    normalize_table(raw, "time_tag", "density"),
                )
            }),
            feed_or_default("magnetic field", f.magnetic_field(), magnetic_samples),
            feed_or_default("GOES primary", f.goes_primary(), |raw| {
                normalize_objects(raw, "time_tag", "Hp")
            }),
            feed_or_default("GOES secondary", f.goes_secondary(), |raw| {
                normalize_objects(raw, "time_tag", "Hp")
            }),
            feed_or_default("ground magnetometer", f.ground_magnetometer(), normalize_vendor_series),
            feed_or_default("xray", f.xray_flux(), xray_long_band),
            feed_or_default("forecast", f.forecast(), parse_forecast),
            feed_or_default("IPS", f.ips_shocks(), parse_shocks),
        );
        let (speed, density) = plasma;

        FeedSnapshot {
            speed,
            density,
            field,
            goes_primary,
            goes_secondary,
            ground,
            xray,
            forecast,
            shocks,
        }
    }

    /// Run one cycle and publish it as the latest snapshot.
    pub async fn refresh(&self, now_ms: i64) -> Arc<FusionContext> {
        let feeds = self.collect().await;
        let ctx = Arc::new(FusionContext::assemble(feeds, now_ms, &self.tuning));
        info!(
            "fusion cycle: status {:?}, likelihood {}%, score {:?}, {} events",
            ctx.assessment.status,
            ctx.assessment.likelihood_pct,
            ctx.aurora_score,
            ctx.events.len()
        );
        *self.latest.write().await = Some(ctx.clone());
        ctx
    }

    pub async fn latest(&self) -> Option<Arc<FusionContext>> {
        self.latest.read().await.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub topic: String,
    pub value: f64,
    pub summary: BroadcastSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub ran_at_ms: i64,
    pub deliveries: Vec<Delivery>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatus {
    #[serde(flatten)]
    pub state: NotificationTopicState,
    pub latest_alert: Option<LatestAlert>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub last_run: Option<i64>,
    pub thresholds: Option<ThresholdConfig>,
    pub topics: Vec<TopicStatus>,
}

/// Scheduled threshold evaluation and delivery
pub struct NotificationService {
    fusion: Arc<FusionService>,
    states: StateRepo,
    engine: ThresholdEngine,
    broadcaster: Broadcaster,
}

impl NotificationService {
    pub fn new(
        fusion: Arc<FusionService>,
        states: StateRepo,
        engine: ThresholdEngine,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            fusion,
            states,
            engine,
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    async fn load_thresholds(&self) -> ApiResult<ThresholdConfig> {
        match self.states.thresholds().await? {
            Some(config) => Ok(config),
            None => {
                error!("critical: CONFIG_THRESHOLDS missing, skipping notification checks");
                Err(ApiError::ConfigMissing("CONFIG_THRESHOLDS".into()))
            }
        }
    }

    /// One scheduled run: refresh feeds, evaluate thresholds, deliver.
    pub async fn run_cycle(&self, now_ms: i64) -> ApiResult<CycleReport> {
        let config = self.load_thresholds().await?;
        let ctx = self.fusion.refresh(now_ms).await;

        let substorm_inputs = ctx.availability.solar_wind || ctx.availability.goes || ctx.availability.ground;
        let observation = Observation {
            now_ms,
            aurora_score: ctx.aurora_score,
            xray: ctx.xray.clone(),
            substorm: substorm_inputs.then_some(ctx.assessment),
            latest_shock: ctx.shocks.last().cloned(),
        };
        self.dispatch(&observation, &config).await
    }

    /// Evaluate an observation and broadcast every alert that fires.
    pub async fn dispatch(&self, observation: &Observation, config: &ThresholdConfig) -> ApiResult<CycleReport> {
        let alerts = self.engine.evaluate(observation, config).await?;
        let mut report = CycleReport {
            ran_at_ms: observation.now_ms,
            deliveries: Vec::with_capacity(alerts.len()),
        };

        for Alert {
            topic,
            value,
            payload,
            filter,
        } in alerts
        {
            let job = BroadcastJob::for_topic(&topic, payload.clone(), filter.clone());
            let summary = self.broadcaster.drive(job).await?;
            self.states
                .put_latest_alert(
                    &topic,
                    &LatestAlert {
                        fired_at_ms: observation.now_ms,
                        payload,
                        filter: Some(filter),
                    },
                )
                .await?;
            report.deliveries.push(Delivery {
                topic,
                value,
                summary,
            });
        }

        self.states.mark_successful_run(observation.now_ms).await?;
        Ok(report)
    }

    /// Synthetic broadcast to everyone subscribed to `topic`.
    pub async fn test_broadcast(&self, topic: &str, now_ms: i64) -> ApiResult<BroadcastSummary> {
        let job = BroadcastJob {
            mode: BroadcastMode::Topic,
            topic: Some(topic.to_string()),
            cursor: None,
            chain: 0,
            payload: test_payload(topic, now_ms),
            filter: AudienceFilter {
                require_plausible_location: false,
                ..AudienceFilter::for_topic(topic)
            },
        };
        self.broadcaster.drive(job).await
    }

    /// Single-subscriber test, no topic fan-out.
    pub async fn test_single(&self, subscription: &Subscription, now_ms: i64) -> ApiResult<()> {
        self.broadcaster
            .deliver_one(subscription, &test_payload("test", now_ms))
            .await
    }

    pub async fn status(&self) -> ApiResult<StatusView> {
        let mut topics = Vec::new();
        for state in self.states.all_topic_states().await? {
            let latest_alert = self.states.latest_alert(&state.topic).await?;
            topics.push(TopicStatus {
                state,
                latest_alert,
            });
        }
        Ok(StatusView {
            last_run: self.states.last_successful_run().await?,
            thresholds: self.states.thresholds().await?,
            topics,
        })
    }

    pub async fn health(&self, now_ms: i64) -> ApiResult<Health> {
        let last_run = self.states.last_successful_run().await?;
        let age_ms = last_run.map(|t| now_ms - t);
        Ok(Health {
            ok: age_ms.is_some_and(|age| age <= HEALTH_STALE_AFTER_MS),
            last_run,
            age_ms,
            threshold_ms: HEALTH_STALE_AFTER_MS,
        })
    }
}

pub fn test_payload(topic: &str, now_ms: i64) -> PushPayload {
    PushPayload {
        title: "Test notification".to_string(),
        body: format!("This is a test of the {topic} alert."),
        tag: format!("test-{topic}"),
        data: serde_json::json!({"topic": topic, "test": true, "sentAt": now_ms}),
    }
}

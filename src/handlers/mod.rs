/// HTTP request handlers
use crate::alerts::AudienceFilter;
use crate::domain::{Location, PushPayload, Subscription, SubscriptionKeys};
use crate::errors::{ApiError, ApiResult};
use crate::push::crypto::SubscriberKeys;
use crate::push::vapid::audience;
use crate::push::{BroadcastJob, BroadcastMode, BroadcastSummary};
use crate::repo::{StateRepo, SubscriptionRepo};
use crate::services::{FusionService, NotificationService, StatusView};
use crate::substorm::FusionContext;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub fusion: Arc<FusionService>,
    pub notifier: Arc<NotificationService>,
    pub subscriptions: SubscriptionRepo,
    pub states: StateRepo,
    pub admin_secret: Arc<str>,
}

impl AppState {
    fn authorize(&self, provided: Option<&str>) -> ApiResult<()> {
        let provided = provided.unwrap_or_default();
        if !provided.is_empty() && bool::from(provided.as_bytes().ct_eq(self.admin_secret.as_bytes())) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| ApiError::InvalidInput(e.body_text()))
}

/// Browser `PushSubscription.toJSON()` shape.
#[derive(Debug, Deserialize)]
pub struct PushSubscriptionJson {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

impl PushSubscriptionJson {
    /// Check the endpoint and key material before anything is stored or sent.
    fn validate(&self) -> ApiResult<()> {
        audience(&self.endpoint)?;
        SubscriberKeys::from_subscription(&self.keys)?;
        Ok(())
    }

    fn into_subscription(
        self,
        preferences: HashMap<String, bool>,
        location: Option<Location>,
        timezone: Option<String>,
    ) -> Subscription {
        Subscription {
            endpoint: self.endpoint,
            keys: self.keys,
            preferences,
            location,
            timezone,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveSubscriptionRequest {
    pub subscription: PushSubscriptionJson,
    #[serde(default)]
    pub preferences: HashMap<String, bool>,
    pub location: Option<Location>,
    pub timezone: Option<String>,
}

/// POST /save-subscription
pub async fn save_subscription(
    State(state): State<AppState>,
    payload: Result<Json<SaveSubscriptionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<serde_json::Value>>)> {
    let req = body(payload)?;
    req.subscription.validate()?;
    if let Some(location) = req.location {
        if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lon) {
            return Err(ApiError::InvalidInput("location out of range".into()));
        }
    }

    let subscription = req
        .subscription
        .into_subscription(req.preferences, req.location, req.timezone);
    state.subscriptions.save(&subscription).await?;
    info!(
        "saved subscription with {} topics enabled",
        subscription.preferences.values().filter(|on| **on).count()
    );
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(serde_json::json!({"saved": true}))),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SecretQuery {
    pub secret: Option<String>,
    #[serde(rename = "type")]
    pub topic: Option<String>,
}

/// GET /status
pub async fn status(
    State(state): State<AppState>,
    Query(q): Query<SecretQuery>,
) -> ApiResult<Json<SuccessResponse<StatusView>>> {
    state.authorize(q.secret.as_deref())?;
    Ok(Json(SuccessResponse::new(state.notifier.status().await?)))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<crate::domain::Health>)> {
    let health = state.notifier.health(Utc::now().timestamp_millis()).await?;
    let code = if health.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((code, Json(health)))
}

/// GET /trigger-test-push
pub async fn trigger_test_push(
    State(state): State<AppState>,
    Query(q): Query<SecretQuery>,
) -> ApiResult<Json<SuccessResponse<BroadcastSummary>>> {
    state.authorize(q.secret.as_deref())?;
    let topic = q
        .topic
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidInput("type is required".into()))?;
    let summary = state
        .notifier
        .test_broadcast(topic.trim(), Utc::now().timestamp_millis())
        .await?;
    Ok(Json(SuccessResponse::new(summary)))
}

#[derive(Debug, Deserialize)]
pub struct TestForMeRequest {
    pub subscription: PushSubscriptionJson,
}

/// POST /trigger-test-push-for-me
pub async fn trigger_test_push_for_me(
    State(state): State<AppState>,
    payload: Result<Json<TestForMeRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse<serde_json::Value>>> {
    let req = body(payload)?;
    req.subscription.validate()?;
    let subscription = req.subscription.into_subscription(HashMap::new(), None, None);
    state
        .notifier
        .test_single(&subscription, Utc::now().timestamp_millis())
        .await?;
    Ok(Json(SuccessResponse::new(serde_json::json!({"sent": true}))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub secret: Option<String>,
    #[serde(default)]
    pub mode: BroadcastMode,
    pub topic: Option<String>,
    pub cursor: Option<String>,
    #[serde(default)]
    pub chain: u32,
    pub override_payload: Option<PushPayload>,
}

/// POST /broadcast-batch
///
/// Resumes or starts a paginated broadcast. Without `overridePayload` the
/// topic's latest alert is re-sent.
pub async fn broadcast_batch(
    State(state): State<AppState>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<serde_json::Value>>)> {
    let req = body(payload)?;
    state.authorize(req.secret.as_deref())?;

    if req.mode == BroadcastMode::Topic && req.topic.is_none() {
        return Err(ApiError::InvalidInput("topic mode needs a topic".into()));
    }
    let broadcaster = state.notifier.broadcaster().clone();
    let max_chain = broadcaster.limits().max_chain;
    if req.chain >= max_chain {
        return Err(ApiError::InvalidInput(format!(
            "chain {} has reached the limit of {max_chain}",
            req.chain
        )));
    }

    let topic_filter = || {
        req.topic
            .as_deref()
            .map(AudienceFilter::for_topic)
            .unwrap_or_default()
    };
    let (payload, filter) = match (req.override_payload, &req.topic) {
        (Some(payload), _) => (payload, topic_filter()),
        (None, Some(topic)) => {
            let alert = state
                .states
                .latest_alert(topic)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("no latest alert for {topic}")))?;
            let filter = alert.filter.unwrap_or_else(topic_filter);
            (alert.payload, filter)
        }
        (None, None) => return Err(ApiError::InvalidInput("overridePayload is required".into())),
    };

    let job = BroadcastJob {
        mode: req.mode,
        filter,
        topic: req.topic,
        cursor: req.cursor,
        chain: req.chain,
        payload,
    };

    tokio::spawn(async move {
        if let Err(e) = broadcaster.drive(job).await {
            error!("broadcast batch failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SuccessResponse::new(serde_json::json!({"accepted": true}))),
    ))
}

/// GET /fusion
pub async fn fusion(State(state): State<AppState>) -> ApiResult<Json<SuccessResponse<FusionContext>>> {
    let ctx = state
        .fusion
        .latest()
        .await
        .ok_or_else(|| ApiError::NotFound("no fusion cycle has completed yet".into()))?;
    Ok(Json(SuccessResponse::new(FusionContext::clone(&ctx))))
}

//! Push delivery: encrypt, sign and POST to each subscriber's push service,
//! one page of subscribers at a time.

use crate::alerts::AudienceFilter;
use crate::config::BroadcastLimits;
use crate::domain::{PushPayload, Subscription};
use crate::errors::{ApiError, ApiResult};
use crate::repo::SubscriptionRepo;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod crypto;
pub mod vapid;

use crypto::{encrypt, SubscriberKeys};
use vapid::VapidSigner;

/// Anything that can hand a payload to one subscriber.
///
/// `Err(ApiError::PushGone)` means the subscription is permanently dead;
/// every other error is transient.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, subscription: &Subscription, payload: &PushPayload) -> ApiResult<()>;
}

/// Web Push over HTTP with VAPID authentication and aes128gcm bodies.
pub struct PushSender {
    client: Client,
    vapid: VapidSigner,
    ttl_seconds: u32,
}

impl PushSender {
    pub fn new(vapid: VapidSigner) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("aurora-watch/1.0")
            .build()?;
        Ok(Self {
            client,
            vapid,
            ttl_seconds: 3600,
        })
    }

    pub fn public_key(&self) -> &str {
        self.vapid.public_key()
    }
}

/// Map a push service response status onto the delivery taxonomy.
pub fn classify_status(status: u16) -> ApiResult<()> {
    match status {
        200..=299 => Ok(()),
        404 | 410 => Err(ApiError::PushGone(status)),
        other => Err(ApiError::PushTransient(other)),
    }
}

#[async_trait]
impl PushTransport for PushSender {
    async fn deliver(&self, subscription: &Subscription, payload: &PushPayload) -> ApiResult<()> {
        let keys = SubscriberKeys::from_subscription(&subscription.keys)?;
        let body = encrypt(&serde_json::to_vec(payload)?, &keys)?;
        let authorization = self.vapid.authorization(&subscription.endpoint, Utc::now())?;

        let resp = self
            .client
            .post(&subscription.endpoint)
            .header(header::AUTHORIZATION, authorization)
            .header(header::CONTENT_ENCODING, "aes128gcm")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("TTL", self.ttl_seconds.to_string())
            .header("Urgency", "high")
            .body(body)
            .send()
            .await?;

        classify_status(resp.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastMode {
    /// Respect topic preferences and location filters.
    #[default]
    Topic,
    /// Every stored subscription (admin/test use).
    All,
}

/// A resumable sweep over the subscription store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastJob {
    #[serde(default)]
    pub mode: BroadcastMode,
    pub topic: Option<String>,
    pub cursor: Option<String>,
    /// Number of pages already processed in this sweep.
    #[serde(default)]
    pub chain: u32,
    pub payload: PushPayload,
    #[serde(default)]
    pub filter: AudienceFilter,
}

impl BroadcastJob {
    pub fn for_topic(topic: &str, payload: PushPayload, filter: AudienceFilter) -> Self {
        Self {
            mode: BroadcastMode::Topic,
            topic: Some(topic.to_string()),
            cursor: None,
            chain: 0,
            payload,
            filter,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sent: usize,
    pub gone: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSummary {
    pub pages: u32,
    pub sent: usize,
    pub gone: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when the chain ceiling stopped the sweep early.
    pub resume_cursor: Option<String>,
}

impl BroadcastSummary {
    fn absorb(&mut self, report: BatchReport) {
        self.pages += 1;
        self.sent += report.sent;
        self.gone += report.gone;
        self.failed += report.failed;
        self.skipped += report.skipped;
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    subscriptions: SubscriptionRepo,
    transport: Arc<dyn PushTransport>,
    limits: BroadcastLimits,
}

impl Broadcaster {
    pub fn new(
        subscriptions: SubscriptionRepo,
        transport: Arc<dyn PushTransport>,
        limits: BroadcastLimits,
    ) -> Self {
        Self {
            subscriptions,
            transport,
            limits,
        }
    }

    pub fn limits(&self) -> BroadcastLimits {
        self.limits
    }

    /// Deliver to one subscriber, removing it if the push service says it is gone.
    pub async fn deliver_one(&self, subscription: &Subscription, payload: &PushPayload) -> ApiResult<()> {
        match self.transport.deliver(subscription, payload).await {
            Err(ApiError::PushGone(status)) => {
                info!("push endpoint gone ({}), removing subscription", status);
                self.subscriptions.delete(&subscription.endpoint).await?;
                Err(ApiError::PushGone(status))
            }
            other => other,
        }
    }

    /// Process one page. Returns the continuation job when more pages exist.
    pub async fn run_batch(&self, job: &BroadcastJob) -> ApiResult<(BatchReport, Option<BroadcastJob>)> {
        let (subs, next_cursor) = self
            .subscriptions
            .page(job.cursor.as_deref(), self.limits.batch_size)
            .await?;

        let mut report = BatchReport::default();
        for sub in &subs {
            if job.mode == BroadcastMode::Topic && !job.filter.admits(sub) {
                report.skipped += 1;
                continue;
            }
            match self.deliver_one(sub, &job.payload).await {
                Ok(()) => report.sent += 1,
                Err(ApiError::PushGone(_)) => report.gone += 1,
                Err(e) => {
                    warn!("push to subscriber failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "broadcast page {} ({:?}): {:?}",
            job.chain,
            job.topic.as_deref().unwrap_or("-"),
            report
        );

        let next = next_cursor.map(|cursor| BroadcastJob {
            cursor: Some(cursor),
            chain: job.chain + 1,
            ..job.clone()
        });
        Ok((report, next))
    }

    /// Drive a job page by page until the store is exhausted or the chain
    /// ceiling is reached.
    pub async fn drive(&self, mut job: BroadcastJob) -> ApiResult<BroadcastSummary> {
        let mut summary = BroadcastSummary::default();
        loop {
            let (report, next) = self.run_batch(&job).await?;
            summary.absorb(report);
            match next {
                Some(next) if next.chain < self.limits.max_chain => job = next,
                Some(next) => {
                    warn!(
                        "broadcast for {:?} hit the chain ceiling of {} pages",
                        next.topic, self.limits.max_chain
                    );
                    summary.resume_cursor = next.cursor;
                    break;
                }
                None => break,
            }
        }
        info!(
            "broadcast {:?} done: {} sent, {} gone, {} failed, {} skipped over {} pages",
            job.topic, summary.sent, summary.gone, summary.failed, summary.skipped, summary.pages
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AuroraGate;
    use crate::domain::{Location, SubscriptionKeys};
    use crate::repo::{KvStore, MemoryKvStore};
    use axum::{
        body::Bytes,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        delivered: Mutex<Vec<String>>,
        gone: Vec<String>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn deliver(&self, subscription: &Subscription, _: &PushPayload) -> ApiResult<()> {
            if self.gone.contains(&subscription.endpoint) {
                return Err(ApiError::PushGone(410));
            }
            self.delivered.lock().await.push(subscription.endpoint.clone());
            Ok(())
        }
    }

    fn payload() -> PushPayload {
        PushPayload {
            title: "Aurora alert".into(),
            body: "Score 52%".into(),
            tag: "aurora-50percent".into(),
            data: json!({"score": 52.0}),
        }
    }

    fn subscription(endpoint: &str, keys: SubscriptionKeys, lat: f64) -> Subscription {
        Subscription {
            endpoint: endpoint.to_string(),
            keys,
            preferences: HashMap::from([("aurora-50percent".to_string(), true)]),
            location: Some(Location { lat, lon: 170.5 }),
            timezone: None,
            created_at: Utc::now(),
        }
    }

    fn dummy_keys() -> SubscriptionKeys {
        SubscriptionKeys {
            p256dh: "p".into(),
            auth: "a".into(),
        }
    }

    async fn seeded(count: usize) -> SubscriptionRepo {
        let repo = SubscriptionRepo::new(Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>);
        for i in 0..count {
            repo.save(&subscription(&format!("https://push.example/{i}"), dummy_keys(), -45.0))
                .await
                .unwrap();
        }
        repo
    }

    fn limits(batch_size: usize, max_chain: u32) -> BroadcastLimits {
        BroadcastLimits {
            batch_size,
            max_chain,
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(201).is_ok());
        assert!(matches!(classify_status(410), Err(ApiError::PushGone(410))));
        assert!(matches!(classify_status(404), Err(ApiError::PushGone(404))));
        assert!(matches!(classify_status(429), Err(ApiError::PushTransient(429))));
    }

    #[tokio::test]
    async fn test_drive_visits_every_page() {
        let transport = Arc::new(RecordingTransport::default());
        let broadcaster = Broadcaster::new(seeded(7).await, transport.clone(), limits(3, 20));
        let job = BroadcastJob::for_topic(
            "aurora-50percent",
            payload(),
            AudienceFilter::for_topic("aurora-50percent"),
        );
        let summary = broadcaster.drive(job).await.unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.sent, 7);
        assert_eq!(summary.resume_cursor, None);
        assert_eq!(transport.delivered.lock().await.len(), 7);
    }

    #[tokio::test]
    async fn test_chain_ceiling_stops_sweep() {
        let transport = Arc::new(RecordingTransport::default());
        let broadcaster = Broadcaster::new(seeded(10).await, transport.clone(), limits(2, 3));
        let job = BroadcastJob::for_topic("aurora-50percent", payload(), AudienceFilter::default());
        let summary = broadcaster.drive(job).await.unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.sent, 6);
        assert!(summary.resume_cursor.is_some());
    }

    #[tokio::test]
    async fn test_gone_subscription_is_deleted() {
        let repo = seeded(3).await;
        let transport = Arc::new(RecordingTransport {
            gone: vec!["https://push.example/1".to_string()],
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(repo.clone(), transport, limits(10, 5));
        let job = BroadcastJob::for_topic("aurora-50percent", payload(), AudienceFilter::default());
        let summary = broadcaster.drive(job).await.unwrap();
        assert_eq!(summary.gone, 1);
        assert_eq!(summary.sent, 2);
        assert!(repo.get("https://push.example/1").await.unwrap().is_none());
        assert!(repo.get("https://push.example/0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_filter_skips_implausible_and_far_north() {
        let repo = seeded(0).await;
        for (i, lat) in [(0, -46.0), (1, 0.0), (2, -36.8)] {
            repo.save(&subscription(&format!("https://push.example/{i}"), dummy_keys(), lat))
                .await
                .unwrap();
        }
        let transport = Arc::new(RecordingTransport::default());
        let broadcaster = Broadcaster::new(repo, transport.clone(), limits(10, 5));
        let filter = AudienceFilter {
            aurora: Some(AuroraGate {
                base_score: 51.0,
                threshold: 50.0,
                reference_latitude: -41.3,
            }),
            ..AudienceFilter::for_topic("aurora-50percent")
        };
        let summary = broadcaster
            .drive(BroadcastJob::for_topic("aurora-50percent", payload(), filter))
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(
            *transport.delivered.lock().await,
            vec!["https://push.example/0".to_string()]
        );
    }

    #[derive(Clone, Default)]
    struct PushServiceLog {
        requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    }

    async fn fake_push_service(
        State(log): State<PushServiceLog>,
        Path(id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        log.requests.lock().await.push((headers, body));
        match id.as_str() {
            "gone" => StatusCode::GONE,
            "busy" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::CREATED,
        }
    }

    async fn spawn_push_service() -> (String, PushServiceLog) {
        let log = PushServiceLog::default();
        let app = Router::new()
            .route("/push/:id", post(fake_push_service))
            .with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), log)
    }

    #[tokio::test]
    async fn test_sender_posts_decryptable_body() {
        let (base, log) = spawn_push_service().await;
        let sender = PushSender::new(vapid::tests::signer()).unwrap();
        let (secret, auth, keys) = crypto::tests::subscriber();
        let sub = subscription(&format!("{base}/push/ok"), keys, -45.0);

        sender.deliver(&sub, &payload()).await.unwrap();

        let requests = log.requests.lock().await;
        let (headers, body) = &requests[0];
        assert_eq!(headers["content-encoding"], "aes128gcm");
        let authorization = headers["authorization"].to_str().unwrap();
        assert!(authorization.starts_with("vapid t="));
        assert!(authorization.contains(sender.public_key()));

        let plaintext = crypto::tests::decrypt(body, &secret, &auth);
        assert_eq!(plaintext, serde_json::to_vec(&payload()).unwrap());
    }

    #[tokio::test]
    async fn test_sender_maps_gone_and_transient() {
        let (base, _log) = spawn_push_service().await;
        let sender = PushSender::new(vapid::tests::signer()).unwrap();
        let (_, _, keys) = crypto::tests::subscriber();

        let gone = subscription(&format!("{base}/push/gone"), keys.clone(), -45.0);
        assert!(matches!(
            sender.deliver(&gone, &payload()).await,
            Err(ApiError::PushGone(410))
        ));
        let busy = subscription(&format!("{base}/push/busy"), keys, -45.0);
        assert!(matches!(
            sender.deliver(&busy, &payload()).await,
            Err(ApiError::PushTransient(503))
        ));
    }
}

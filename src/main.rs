/// Aurora alert service: feed fusion, threshold notifications and Web Push
mod alerts;
mod clients;
mod config;
mod coupling;
mod domain;
mod errors;
mod events;
mod handlers;
mod normalize;
mod push;
mod repo;
mod routes;
mod services;
mod substorm;
mod utils;

use crate::alerts::{CooldownGate, ThresholdConfig, ThresholdEngine};
use crate::clients::FeedClient;
use crate::config::{AppConfig, FusionTuning};
use crate::handlers::AppState;
use crate::push::vapid::VapidSigner;
use crate::push::{Broadcaster, PushSender};
use crate::repo::{init_db, KvStore, MemoryKvStore, PgKvStore, StateRepo, SubscriptionRepo};
use crate::routes::build_router;
use crate::services::{FusionService, NotificationService};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    let store: Arc<dyn KvStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            init_db(&pool).await?;
            info!("Postgres KV store ready");
            Arc::new(PgKvStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, state is kept in memory only");
            Arc::new(MemoryKvStore::new())
        }
    };

    let subscriptions = SubscriptionRepo::new(store.clone());
    let states = StateRepo::new(store.clone());
    if states.seed_thresholds(&ThresholdConfig::default()).await? {
        info!("Seeded default threshold configuration");
    }

    // Push delivery
    let signer = VapidSigner::from_base64(&config.vapid.private_key, &config.vapid.subject)?;
    let sender = PushSender::new(signer)?;
    info!("VAPID public key: {}", sender.public_key());
    let broadcaster = Broadcaster::new(subscriptions.clone(), Arc::new(sender), config.broadcast);

    // Services
    let feeds = FeedClient::new(config.feeds.clone(), config.retry)?;
    let tuning = FusionTuning {
        ground_series: config.ground_series,
        ..FusionTuning::default()
    };
    let fusion = Arc::new(FusionService::new(feeds, tuning));
    let engine = ThresholdEngine::new(
        states.clone(),
        CooldownGate::new(store.clone()),
        config.reference_latitude,
    );
    let notifier = Arc::new(NotificationService::new(
        fusion.clone(),
        states.clone(),
        engine,
        broadcaster,
    ));

    let state = AppState {
        fusion: fusion.clone(),
        notifier: notifier.clone(),
        subscriptions,
        states,
        admin_secret: Arc::from(config.admin_secret.as_str()),
    };

    start_background_tasks(&config, fusion, notifier);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("aurora_watch listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Start the fusion refresh and notification loops
fn start_background_tasks(
    config: &AppConfig,
    fusion: Arc<FusionService>,
    notifier: Arc<NotificationService>,
) {
    let intervals = config.fetch_intervals.clone();

    // Background task: dashboard fusion snapshot
    {
        let interval = intervals.fusion_seconds;
        tokio::spawn(async move {
            info!("Starting fusion refresh task (interval: {}s)", interval);
            loop {
                fusion.refresh(Utc::now().timestamp_millis()).await;
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        });
    }

    // Background task: threshold checks and delivery
    {
        let interval = intervals.notify_seconds;
        tokio::spawn(async move {
            info!("Starting notification task (interval: {}s)", interval);
            loop {
                match notifier.run_cycle(Utc::now().timestamp_millis()).await {
                    Ok(report) if !report.deliveries.is_empty() => {
                        info!("notification cycle delivered {} alerts", report.deliveries.len())
                    }
                    Ok(_) => {}
                    Err(e) => error!("notification cycle error: {:?}", e),
                }
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        });
    }

    info!("All background tasks started successfully");
}

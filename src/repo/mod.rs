/// Repository layer over a small key-value store
use crate::alerts::{AudienceFilter, ThresholdConfig};
use crate::domain::{NotificationTopicState, PushPayload, Subscription};
use crate::errors::ApiResult;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;

mod memory;

pub use memory::MemoryKvStore;

pub const STATE_PREFIX: &str = "STATE_";
pub const COOLDOWN_PREFIX: &str = "COOLDOWN_";
pub const LATEST_ALERT_PREFIX: &str = "LATEST_ALERT_";
pub const SUBSCRIPTION_PREFIX: &str = "SUB_";
pub const CONFIG_THRESHOLDS_KEY: &str = "CONFIG_THRESHOLDS";
pub const LAST_RUN_KEY: &str = "LAST_SUCCESSFUL_RUN_TIMESTAMP";

/// One page of a prefix scan. `next_cursor` is set when more keys follow.
#[derive(Debug, Clone, Default)]
pub struct KvPage {
    pub entries: Vec<(String, Value)>,
    pub next_cursor: Option<String>,
}

/// Minimal storage contract: any embedded, SQL or cloud KV can back it.
///
/// Writes are last-writer-wins with no locking. Callers that read, decide and
/// write (the cooldown gate) are best-effort under concurrency.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> ApiResult<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> ApiResult<()>;

    async fn delete(&self, key: &str) -> ApiResult<()>;

    /// Keys starting with `prefix`, ascending, strictly after `cursor`.
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> ApiResult<KvPage>;
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> ApiResult<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> ApiResult<()> {
    store.put(key, serde_json::to_value(value)?).await
}

/// Build a page from rows fetched with `limit + 1`.
pub(crate) fn page_from(mut rows: Vec<(String, Value)>, limit: usize) -> KvPage {
    let more = rows.len() > limit;
    rows.truncate(limit);
    let next_cursor = if more {
        rows.last().map(|(k, _)| k.clone())
    } else {
        None
    };
    KvPage {
        entries: rows,
        next_cursor,
    }
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> ApiResult<Option<Value>> {
        let row = sqlx::query_as::<_, (Value,)>("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: Value) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO kv_store(key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> ApiResult<KvPage> {
        let rows = sqlx::query_as::<_, (String, Value)>(
            "SELECT key, value FROM kv_store
             WHERE starts_with(key, $1) AND key > $2
             ORDER BY key
             LIMIT $3",
        )
        .bind(prefix)
        .bind(cursor.unwrap_or(""))
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(page_from(rows, limit))
    }
}

/// Initialize database tables
pub async fn init_db(pool: &PgPool) -> ApiResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS kv_store(
            key TEXT PRIMARY KEY,
            value JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Records are keyed by a digest of the endpoint so URLs never become keys.
pub fn subscription_key(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{SUBSCRIPTION_PREFIX}{hex}")
}

/// Push subscription repository
#[derive(Clone)]
pub struct SubscriptionRepo {
    store: Arc<dyn KvStore>,
}

impl SubscriptionRepo {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, subscription: &Subscription) -> ApiResult<()> {
        put_json(
            self.store.as_ref(),
            &subscription_key(&subscription.endpoint),
            subscription,
        )
        .await
    }

    pub async fn get(&self, endpoint: &str) -> ApiResult<Option<Subscription>> {
        get_json(self.store.as_ref(), &subscription_key(endpoint)).await
    }

    pub async fn delete(&self, endpoint: &str) -> ApiResult<()> {
        self.store.delete(&subscription_key(endpoint)).await
    }

    /// One page of subscriptions. Undecodable records are skipped.
    pub async fn page(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> ApiResult<(Vec<Subscription>, Option<String>)> {
        let page = self.store.list(SUBSCRIPTION_PREFIX, cursor, limit).await?;
        let subs = page
            .entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!("skipping unreadable subscription {}: {}", key, e);
                    None
                }
            })
            .collect();
        Ok((subs, page.next_cursor))
    }
}

/// Last alert delivered for a topic, kept for the status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestAlert {
    pub fired_at_ms: i64,
    pub payload: PushPayload,
    /// Audience the alert went to, so a resumed batch reaches the same people.
    /// Absent on records written before it was stored.
    #[serde(default)]
    pub filter: Option<AudienceFilter>,
}

/// Topic state, thresholds and run bookkeeping
#[derive(Clone)]
pub struct StateRepo {
    store: Arc<dyn KvStore>,
}

impl StateRepo {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub async fn topic_state(&self, topic: &str) -> ApiResult<Option<NotificationTopicState>> {
        get_json(self.store(), &format!("{STATE_PREFIX}{topic}")).await
    }

    pub async fn put_topic_state(&self, state: &NotificationTopicState) -> ApiResult<()> {
        put_json(self.store(), &format!("{STATE_PREFIX}{}", state.topic), state).await
    }

    pub async fn all_topic_states(&self) -> ApiResult<Vec<NotificationTopicState>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.store.list(STATE_PREFIX, cursor.as_deref(), 100).await?;
            for (_, value) in page.entries {
                if let Ok(state) = serde_json::from_value(value) {
                    out.push(state);
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    pub async fn latest_alert(&self, topic: &str) -> ApiResult<Option<LatestAlert>> {
        get_json(self.store(), &format!("{LATEST_ALERT_PREFIX}{topic}")).await
    }

    pub async fn put_latest_alert(&self, topic: &str, alert: &LatestAlert) -> ApiResult<()> {
        put_json(self.store(), &format!("{LATEST_ALERT_PREFIX}{topic}"), alert).await
    }

    pub async fn thresholds(&self) -> ApiResult<Option<ThresholdConfig>> {
        get_json(self.store(), CONFIG_THRESHOLDS_KEY).await
    }

    pub async fn put_thresholds(&self, config: &ThresholdConfig) -> ApiResult<()> {
        put_json(self.store(), CONFIG_THRESHOLDS_KEY, config).await
    }

    /// Seed the default ladder when none is stored yet.
    pub async fn seed_thresholds(&self, defaults: &ThresholdConfig) -> ApiResult<bool> {
        if self.thresholds().await?.is_some() {
            return Ok(false);
        }
        self.put_thresholds(defaults).await?;
        Ok(true)
    }

    pub async fn last_successful_run(&self) -> ApiResult<Option<i64>> {
        get_json(self.store(), LAST_RUN_KEY).await
    }

    pub async fn mark_successful_run(&self, at_ms: i64) -> ApiResult<()> {
        put_json(self.store(), LAST_RUN_KEY, &at_ms).await
    }
}

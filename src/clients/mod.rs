/// Upstream feed clients
use crate::config::{FeedUrls, RetryPolicy};
use crate::errors::{ApiError, ApiResult};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// HTTP client wrapper with common configuration
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(retry: RetryPolicy) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("aurora-watch/1.0")
            .build()?;
        Ok(Self { client, retry })
    }

    async fn get_json_once(&self, url: &str, query: &[(&str, String)]) -> ApiResult<Value> {
        let resp = self.client.get(url).query(query).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::UpstreamUnavailable(format!(
                "{} answered {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    /// GET JSON, retrying with linear backoff (`backoff * attempt`).
    pub async fn get_json_with_retry(&self, url: &str, query: &[(&str, String)]) -> ApiResult<Value> {
        let attempts = self.retry.attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.get_json_once(url, query).await {
                Ok(json) => return Ok(json),
                Err(e) => {
                    warn!("fetch {} failed (attempt {}/{}): {}", url, attempt, attempts, e);
                    last_err = Some(e);
                    if attempt < attempts {
                        let wait = self.retry.backoff_ms * attempt as u64;
                        tokio::time::sleep(Duration::from_millis(wait)).await;
                    }
                }
            }
        }
        Err(ApiError::UpstreamUnavailable(format!(
            "{} unavailable after {} attempts: {}",
            url,
            attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

/// Space weather feeds (NOAA SWPC, GOES, ground magnetometer, forecast, DONKI)
#[derive(Clone)]
pub struct FeedClient {
    http: HttpClient,
    urls: FeedUrls,
}

impl FeedClient {
    pub fn new(urls: FeedUrls, retry: RetryPolicy) -> ApiResult<Self> {
        Ok(Self {
            http: HttpClient::new(retry)?,
            urls,
        })
    }

    /// Solar wind plasma table (`time_tag`, `density`, `speed`, `temperature`)
    pub async fn plasma(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.plasma, &[]).await
    }

    /// IMF table (`time_tag`, `bx_gsm`, `by_gsm`, `bz_gsm`, `bt`, ...)
    pub async fn magnetic_field(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.magnetic_field, &[]).await
    }

    pub async fn goes_primary(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.goes_primary, &[]).await
    }

    pub async fn goes_secondary(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.goes_secondary, &[]).await
    }

    /// GOES X-ray flux, both energy bands interleaved
    pub async fn xray_flux(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.xray_flux, &[]).await
    }

    pub async fn ground_magnetometer(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.ground_magnetometer, &[]).await
    }

    pub async fn forecast(&self) -> ApiResult<Value> {
        self.http.get_json_with_retry(&self.urls.forecast, &[]).await
    }

    /// DONKI interplanetary shocks over the last three days
    pub async fn ips_shocks(&self) -> ApiResult<Value> {
        let to = Utc::now().date_naive();
        let from = to - chrono::Days::new(3);
        let mut query = vec![
            ("startDate", from.to_string()),
            ("endDate", to.to_string()),
        ];
        if !self.urls.nasa_api_key.is_empty() {
            query.push(("api_key", self.urls.nasa_api_key.clone()));
        }
        self.http.get_json_with_retry(&self.urls.ips_shocks, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn flaky(State(hits): State<Arc<AtomicU32>>) -> Result<Json<Value>, StatusCode> {
        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(StatusCode::SERVICE_UNAVAILABLE)
        } else {
            Ok(Json(serde_json::json!([["time_tag", "speed"]])))
        }
    }

    async fn serve(hits: Arc<AtomicU32>) -> String {
        let app = Router::new().route("/feed", get(flaky)).with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/feed")
    }

    #[tokio::test]
    async fn test_retry_recovers_on_third_attempt() {
        let hits = Arc::new(AtomicU32::new(0));
        let url = serve(hits.clone()).await;
        let http = HttpClient::new(RetryPolicy {
            attempts: 3,
            backoff_ms: 1,
        })
        .unwrap();
        assert!(http.get_json_with_retry(&url, &[]).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let hits = Arc::new(AtomicU32::new(0));
        let url = serve(hits.clone()).await;
        let http = HttpClient::new(RetryPolicy {
            attempts: 2,
            backoff_ms: 1,
        })
        .unwrap();
        assert!(matches!(
            http.get_json_with_retry(&url, &[]).await,
            Err(ApiError::UpstreamUnavailable(_))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}

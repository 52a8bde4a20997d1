/// Application configuration module
use anyhow::Context;
use std::env;

pub mod tuning;

pub use tuning::{FusionTuning, GroundSeries, SubstormThresholds};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub admin_secret: String,
    pub vapid: VapidConfig,
    pub feeds: FeedUrls,
    pub fetch_intervals: FetchIntervals,
    pub broadcast: BroadcastLimits,
    pub retry: RetryPolicy,
    pub reference_latitude: f64,
    /// Shape of `GROUND_MAG_URL`'s series; must match the product it points at.
    pub ground_series: GroundSeries,
}

#[derive(Clone, Debug)]
pub struct VapidConfig {
    /// Base64url-encoded P-256 private scalar
    pub private_key: String,
    /// Contact claim (`mailto:` or https URL)
    pub subject: String,
}

#[derive(Clone, Debug)]
pub struct FeedUrls {
    pub plasma: String,
    pub magnetic_field: String,
    pub goes_primary: String,
    pub goes_secondary: String,
    pub xray_flux: String,
    pub ground_magnetometer: String,
    pub forecast: String,
    pub ips_shocks: String,
    pub nasa_api_key: String,
}

#[derive(Clone, Debug)]
pub struct FetchIntervals {
    pub fusion_seconds: u64,
    pub notify_seconds: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct BroadcastLimits {
    pub batch_size: usize,
    pub max_chain: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let admin_secret = env::var("ADMIN_SECRET").context("ADMIN_SECRET is required")?;

        let vapid = VapidConfig {
            private_key: env::var("VAPID_PRIVATE_KEY").context("VAPID_PRIVATE_KEY is required")?,
            subject: env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:alerts@example.org".to_string()),
        };

        let feeds = FeedUrls {
            plasma: env_str(
                "NOAA_PLASMA_URL",
                "https://services.swpc.noaa.gov/products/solar-wind/plasma-1-day.json",
            ),
            magnetic_field: env_str(
                "NOAA_MAG_URL",
                "https://services.swpc.noaa.gov/products/solar-wind/mag-1-day.json",
            ),
            goes_primary: env_str(
                "GOES_PRIMARY_URL",
                "https://services.swpc.noaa.gov/json/goes/primary/magnetometers-6-hour.json",
            ),
            goes_secondary: env_str(
                "GOES_SECONDARY_URL",
                "https://services.swpc.noaa.gov/json/goes/secondary/magnetometers-6-hour.json",
            ),
            xray_flux: env_str(
                "NOAA_XRAY_URL",
                "https://services.swpc.noaa.gov/json/goes/primary/xrays-6-hour.json",
            ),
            ground_magnetometer: env_str(
                "GROUND_MAG_URL",
                "https://tilde.geonet.org.nz/v4/data/magnetic/EYWM/magnetic-field-rate-of-change/50/60s/dH/latest/1d",
            ),
            forecast: env_str("FORECAST_URL", "http://127.0.0.1:8787/forecast"),
            ips_shocks: env_str("DONKI_IPS_URL", "https://api.nasa.gov/DONKI/IPS"),
            nasa_api_key: env::var("NASA_API_KEY").unwrap_or_default(),
        };

        let fetch_intervals = FetchIntervals {
            fusion_seconds: env_u64("FUSION_EVERY_SECONDS", 60),
            notify_seconds: env_u64("NOTIFY_EVERY_SECONDS", 60),
        };

        let broadcast = BroadcastLimits {
            batch_size: env_u64("BROADCAST_BATCH_SIZE", 50).max(1) as usize,
            max_chain: env_u64("BROADCAST_MAX_CHAIN", 20).max(1) as u32,
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            attempts: env_u64("FEED_RETRY_ATTEMPTS", defaults.attempts as u64).max(1) as u32,
            backoff_ms: env_u64("FEED_RETRY_BACKOFF_MS", defaults.backoff_ms),
        };

        let reference_latitude = env::var("REFERENCE_LATITUDE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(tuning::DEFAULT_REFERENCE_LATITUDE);

        let ground_series = match env::var("GROUND_MAG_SERIES") {
            Ok(raw) => GroundSeries::parse(&raw)
                .with_context(|| format!("GROUND_MAG_SERIES must be rate or field, got {raw}"))?,
            Err(_) => GroundSeries::default(),
        };

        Ok(Self {
            database_url,
            bind_addr,
            admin_secret,
            vapid,
            feeds,
            fetch_intervals,
            broadcast,
            retry,
            reference_latitude,
            ground_series,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

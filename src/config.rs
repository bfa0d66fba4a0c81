//! Environment-driven configuration.
//!
//! Every knob has a default matching the constants in
//! [`crate::constants`]; only the credentials and the Redis location are
//! genuinely deployment-specific. `.env` files are honoured via `dotenvy`.

use std::env;
use std::time::Duration;

use crate::constants;
use crate::error::{FeedError, Result};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream streaming endpoint.
    pub ws_url: String,
    /// Vendor API key, sent as `x-api-key` on dial.
    pub api_key: String,
    /// Vendor client code, sent as `x-client-code` on dial and in the auth frame.
    pub client_code: String,
    /// TOTP seed or otpauth URI, handed to the external session issuer.
    pub totp_secret: Option<String>,

    /// Redis host.
    pub redis_host: String,
    /// Redis port.
    pub redis_port: u16,
    /// Redis logical database.
    pub redis_db: i64,
    /// Redis password, if the server requires one.
    pub redis_password: Option<String>,

    /// Base delay of the reconnect backoff schedule.
    pub reconnect_base: Duration,
    /// Multiplier applied after each failed reconnect attempt.
    pub reconnect_multiplier: f64,
    /// Reconnect attempts per epoch before giving up.
    pub reconnect_max_attempts: u32,

    /// Reconnect when no frame has arrived for this long.
    pub stale_frame_timeout: Duration,
    /// Reconnect when no pong has arrived for this long.
    pub stale_pong_timeout: Duration,
    /// Interval between full market-data request nudges.
    pub data_request_interval: Duration,
    /// Interval between connection health evaluations.
    pub health_check_interval: Duration,
    /// Delay between the auth frame and declaring the connection READY.
    pub post_auth_delay: Duration,

    /// Dispatcher worker-pool size.
    pub dispatch_workers: usize,
    /// Per-worker tick queue capacity.
    pub dispatch_queue_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: constants::WS_FEED_URL.to_owned(),
            api_key: String::new(),
            client_code: String::new(),
            totp_secret: None,
            redis_host: "127.0.0.1".to_owned(),
            redis_port: 6379,
            redis_db: 0,
            redis_password: None,
            reconnect_base: constants::RECONNECT_BASE_DELAY,
            reconnect_multiplier: constants::RECONNECT_MULTIPLIER,
            reconnect_max_attempts: constants::RECONNECT_MAX_ATTEMPTS,
            stale_frame_timeout: constants::STALE_FRAME_TIMEOUT,
            stale_pong_timeout: constants::STALE_PONG_TIMEOUT,
            data_request_interval: constants::DATA_REQUEST_INTERVAL,
            health_check_interval: constants::HEALTH_CHECK_INTERVAL,
            post_auth_delay: constants::POST_AUTH_DELAY,
            dispatch_workers: constants::DISPATCH_WORKERS,
            dispatch_queue_cap: constants::DISPATCH_QUEUE_CAP,
        }
    }
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    ///
    /// Required: `SMARTSTREAM_API_KEY`, `SMARTSTREAM_CLIENT_CODE`.
    /// Everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let api_key = require("SMARTSTREAM_API_KEY")?;
        let client_code = require("SMARTSTREAM_CLIENT_CODE")?;

        let ws_url = env_or("SMARTSTREAM_WS_URL", constants::WS_FEED_URL);
        url::Url::parse(&ws_url)?;

        Ok(Self {
            ws_url,
            api_key,
            client_code,
            totp_secret: env::var("SMARTSTREAM_TOTP_SECRET").ok(),
            redis_host: env_or("SMARTSTREAM_REDIS_HOST", "127.0.0.1"),
            redis_port: parse_or("SMARTSTREAM_REDIS_PORT", 6379)?,
            redis_db: parse_or("SMARTSTREAM_REDIS_DB", 0)?,
            redis_password: env::var("SMARTSTREAM_REDIS_PASSWORD").ok(),
            reconnect_base: Duration::from_secs(parse_or("SMARTSTREAM_RECONNECT_BASE_SECS", 5)?),
            reconnect_multiplier: parse_or("SMARTSTREAM_RECONNECT_MULTIPLIER", 1.5)?,
            reconnect_max_attempts: parse_or("SMARTSTREAM_RECONNECT_MAX_ATTEMPTS", 10)?,
            stale_frame_timeout: Duration::from_secs(parse_or(
                "SMARTSTREAM_STALE_FRAME_SECS",
                300,
            )?),
            stale_pong_timeout: Duration::from_secs(parse_or("SMARTSTREAM_STALE_PONG_SECS", 120)?),
            data_request_interval: Duration::from_secs(parse_or(
                "SMARTSTREAM_DATA_REQUEST_SECS",
                60,
            )?),
            health_check_interval: Duration::from_secs(parse_or(
                "SMARTSTREAM_HEALTH_CHECK_SECS",
                60,
            )?),
            post_auth_delay: Duration::from_secs(parse_or("SMARTSTREAM_POST_AUTH_SECS", 5)?),
            dispatch_workers: parse_or("SMARTSTREAM_DISPATCH_WORKERS", constants::DISPATCH_WORKERS)?,
            dispatch_queue_cap: parse_or(
                "SMARTSTREAM_DISPATCH_QUEUE_CAP",
                constants::DISPATCH_QUEUE_CAP,
            )?,
        })
    }

    /// Assemble the Redis connection URL from its parts.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(pw) => format!(
                "redis://:{}@{}:{}/{}",
                pw, self.redis_host, self.redis_port, self.redis_db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis_host, self.redis_port, self.redis_db
            ),
        }
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FeedError::Config(format!("{key} is not set")))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_owned())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| FeedError::Config(format!("{key} has an unparseable value: {raw}"))),
        _ => Ok(default),
    }
}

//! The session-issuer seam.
//!
//! Feed credentials (JWT + feed token) are minted per user by an external
//! issuer that owns TOTP and credential storage. The engine only needs a
//! fresh [`FeedSession`] before every dial, so the seam is a single-method
//! trait. [`StaticSessionProvider`] covers deployments where tokens are
//! provisioned out-of-band (and the mock servers used in tests).

use async_trait::async_trait;

use crate::error::{FeedError, Result};

/// Credentials for one streaming connection attempt.
#[derive(Debug, Clone)]
pub struct FeedSession {
    /// JWT sent as `Authorization: Bearer …`.
    pub jwt: String,
    /// Vendor API key (`x-api-key`).
    pub api_key: String,
    /// Client code (`x-client-code`), also echoed in the auth frame.
    pub client_code: String,
    /// Feed token (`x-feed-token`).
    pub feed_token: String,
}

/// Issues fresh feed sessions.
///
/// Called before every dial, including re-dials — implementations should
/// return a session that is valid *now* rather than a cached token that may
/// have expired during the reconnect backoff.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Produce a session for the next connection attempt.
    async fn session(&self) -> Result<FeedSession>;
}

/// A provider that hands out the same pre-issued session every time.
#[derive(Debug, Clone)]
pub struct StaticSessionProvider {
    session: FeedSession,
}

impl StaticSessionProvider {
    /// Wrap a ready-made session.
    pub fn new(session: FeedSession) -> Self {
        Self { session }
    }

    /// Build from `SMARTSTREAM_JWT`, `SMARTSTREAM_API_KEY`,
    /// `SMARTSTREAM_CLIENT_CODE`, and `SMARTSTREAM_FEED_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let var = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| FeedError::Session(format!("{key} is not set")))
        };
        Ok(Self::new(FeedSession {
            jwt: var("SMARTSTREAM_JWT")?,
            api_key: var("SMARTSTREAM_API_KEY")?,
            client_code: var("SMARTSTREAM_CLIENT_CODE")?,
            feed_token: var("SMARTSTREAM_FEED_TOKEN")?,
        }))
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn session(&self) -> Result<FeedSession> {
        Ok(self.session.clone())
    }
}

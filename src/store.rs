//! Redis-backed key/value store, pub/sub bus, and order-plan store.
//!
//! The engine treats the store as linearizable per key and best-effort
//! overall: a failed write or publish is logged by the caller and never
//! stops tick processing. The traits exist so the dispatcher and evaluator
//! can be driven by in-memory fakes in tests.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use crate::constants::{self, PLAN_DELETE_CHANNEL, PLAN_NEW_CHANNEL};
use crate::error::Result;
use crate::types::OrderPlan;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Key/value writes and pub/sub publishes for tick snapshots.
#[async_trait]
pub trait MarketBus: Send + Sync + 'static {
    /// Overwrite `key` with a JSON payload.
    async fn put(&self, key: &str, json: &str) -> Result<()>;
    /// Publish a JSON payload on `channel`.
    async fn publish(&self, channel: &str, json: &str) -> Result<()>;
}

/// Read/write access to the external order-plan store.
#[async_trait]
pub trait PlanStore: Send + Sync + 'static {
    /// Fetch one plan by id. `Ok(None)` when the plan does not exist.
    async fn fetch(&self, plan_id: &str) -> Result<Option<OrderPlan>>;
    /// Persist a plan record.
    async fn save(&self, plan: &OrderPlan) -> Result<()>;
    /// Enumerate every stored plan. Used for the initial registry fill.
    async fn all(&self) -> Result<Vec<OrderPlan>>;
}

// ---------------------------------------------------------------------------
// Plan lifecycle events
// ---------------------------------------------------------------------------

/// An external plan-lifecycle announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEvent {
    /// A plan was created; payload is the plan id.
    Created(String),
    /// A plan was deleted; payload is the plan id.
    Deleted(String),
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis client wrapper implementing [`MarketBus`] and [`PlanStore`].
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis and establish the managed command connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(%url, "connected to redis");
        Ok(Self { client, conn })
    }

    /// Spawn the two control-plane listener loops (`orderplan:new`,
    /// `orderplan:delete`). Each loop forwards plan ids on `tx` and retries
    /// its subscription after transient pub/sub failures.
    pub fn spawn_plan_listeners(&self, tx: mpsc::Sender<PlanEvent>) {
        for channel in [PLAN_NEW_CHANNEL, PLAN_DELETE_CHANNEL] {
            let client = self.client.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    match Self::listen(&client, channel, &tx).await {
                        Ok(()) => break, // receiver dropped, engine is shutting down
                        Err(e) => {
                            tracing::warn!(channel, error = %e, "plan listener failed; retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }
    }

    async fn listen(
        client: &redis::Client,
        channel: &'static str,
        tx: &mpsc::Sender<PlanEvent>,
    ) -> Result<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::info!(channel, "control-plane listener subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let plan_id: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    // Malformed payloads are no-ops.
                    tracing::warn!(channel, error = %e, "unreadable plan event payload");
                    continue;
                }
            };
            if plan_id.is_empty() {
                continue;
            }
            let event = match channel {
                PLAN_NEW_CHANNEL => PlanEvent::Created(plan_id),
                _ => PlanEvent::Deleted(plan_id),
            };
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        Err(crate::error::FeedError::Session(format!(
            "pub/sub stream for {channel} ended"
        )))
    }
}

#[async_trait]
impl MarketBus for RedisBus {
    async fn put(&self, key: &str, json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, json).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, json: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, json).await?;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for RedisBus {
    async fn fetch(&self, plan_id: &str) -> Result<Option<OrderPlan>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(constants::plan_key(plan_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, plan: &OrderPlan) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(plan)?;
        let _: () = conn.set(constants::plan_key(&plan.id), json).await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<OrderPlan>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>("orderplan:*").await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                // Channels share the orderplan: prefix; only bare ids are keys.
                if key.matches(':').count() == 1 {
                    keys.push(key);
                }
            }
            keys
        };

        let mut plans = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            let Some(json) = raw else { continue };
            match serde_json::from_str(&json) {
                Ok(plan) => plans.push(plan),
                Err(e) => tracing::warn!(%key, error = %e, "skipping undecodable plan record"),
            }
        }
        Ok(plans)
    }
}

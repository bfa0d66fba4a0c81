//! The feed manager: owns the two upstream connections, translates registry
//! changes into subscribe/unsubscribe frames, and consumes control-plane
//! events.
//!
//! All registry mutations and outgoing subscribe frames are serialised
//! through the manager's single control loop; decoded ticks never pass
//! through here — connections push them straight into the dispatch pool.
//!
//! [`Engine`] is the construction facade: config → store → registry →
//! connections → manager, with a health surface and shutdown.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::Config;
use crate::constants::{action, ACK_STATUS_RESUBSCRIBE, RESUBSCRIBE_DELAY};
use crate::error::{FeedError, Result};
use crate::session::SessionProvider;
use crate::store::{MarketBus, PlanEvent, PlanStore, RedisBus};
use crate::types::enums::ExchangeSegment;
use crate::ws::connection::{
    ConnCommand, ConnConfig, ConnEvent, ConnState, ConnStats, Connection, FeedMode,
};
use crate::ws::dispatcher::{DispatchPool, Dispatcher};
use crate::ws::frames::token_frame;
use crate::ws::registry::{SubscriptionChange, SubscriptionRegistry};

// ---------------------------------------------------------------------------
// Connection handle
// ---------------------------------------------------------------------------

struct ConnHandle {
    mode: FeedMode,
    cmd_tx: mpsc::Sender<ConnCommand>,
    /// Highest epoch seen from this connection; events tagged with an older
    /// epoch are stale and dropped.
    last_epoch: u64,
    /// A post-307 resubscribe timer is already running.
    resub_armed: bool,
}

impl ConnHandle {
    async fn send(&self, frame: String) {
        if self.cmd_tx.send(ConnCommand::Send(frame)).await.is_err() {
            tracing::warn!(conn = self.mode.label(), "command channel closed");
        }
    }

    async fn set_nudge(&self, frame: Option<String>) {
        let _ = self.cmd_tx.send(ConnCommand::SetNudge(frame)).await;
    }
}

// ---------------------------------------------------------------------------
// Feed manager
// ---------------------------------------------------------------------------

/// Owns both connections and the registry; single writer for both.
pub struct FeedManager<P> {
    registry: Arc<SubscriptionRegistry>,
    plans: Arc<P>,
    ltp: ConnHandle,
    depth: ConnHandle,
    fatal_tx: mpsc::Sender<FeedError>,
}

impl<P: PlanStore> FeedManager<P> {
    /// Run the control loop until the plan-event or connection-event channel
    /// closes.
    async fn run(
        mut self,
        mut plan_rx: mpsc::Receiver<PlanEvent>,
        mut conn_rx: mpsc::Receiver<ConnEvent>,
        mut orphan_rx: mpsc::Receiver<String>,
    ) {
        if let Err(e) = self.initial_fill().await {
            tracing::error!(error = %e, "initial plan fill failed; starting empty");
        }

        // Post-307 resubscribes arrive here after their 2 s delay.
        let (resub_tx, mut resub_rx) = mpsc::channel::<FeedMode>(8);

        loop {
            tokio::select! {
                event = plan_rx.recv() => match event {
                    Some(event) => self.handle_plan_event(event).await,
                    None => break,
                },

                event = conn_rx.recv() => match event {
                    Some(event) => self.handle_conn_event(event, &resub_tx).await,
                    None => break,
                },

                Some(plan_id) = orphan_rx.recv() => {
                    self.drop_plan(&plan_id).await;
                }

                Some(mode) = resub_rx.recv() => {
                    self.handle_mut(mode).resub_armed = false;
                    self.full_resubscribe(mode).await;
                }
            }
        }
        tracing::info!("feed manager control loop stopped");
    }

    /// Rebuild the registry from the external plan store. Runs before either
    /// connection reaches READY, so the READY flush picks everything up in
    /// one grouped subscribe.
    async fn initial_fill(&self) -> Result<()> {
        let plans = self.plans.all().await?;
        let count = plans.len();
        for plan in plans {
            let exchange = ExchangeSegment::detect(&plan.exchange);
            // Side-effects are intentionally ignored: nothing is subscribed
            // until a connection reports READY.
            let _ = self
                .registry
                .add(&plan.id, plan.token, &plan.symbol, exchange);
        }
        tracing::info!(plans = count, tokens = self.registry.len(), "initial registry fill");
        Ok(())
    }

    async fn handle_plan_event(&self, event: PlanEvent) {
        match event {
            PlanEvent::Created(plan_id) => match self.plans.fetch(&plan_id).await {
                Ok(Some(plan)) => {
                    let exchange = ExchangeSegment::detect(&plan.exchange);
                    let changes = self
                        .registry
                        .add(&plan.id, plan.token, &plan.symbol, exchange);
                    tracing::info!(
                        plan = %plan_id,
                        token = plan.token,
                        symbol = %plan.symbol,
                        "plan added"
                    );
                    self.apply_changes(changes).await;
                }
                Ok(None) => {
                    tracing::warn!(plan = %plan_id, "announced plan not found in store");
                }
                Err(e) => {
                    tracing::warn!(plan = %plan_id, error = %e, "plan fetch failed");
                }
            },
            PlanEvent::Deleted(plan_id) => {
                tracing::info!(plan = %plan_id, "plan deleted");
                self.drop_plan(&plan_id).await;
            }
        }
    }

    async fn drop_plan(&self, plan_id: &str) {
        let changes = self.registry.remove(plan_id);
        self.apply_changes(changes).await;
    }

    async fn handle_conn_event(&mut self, event: ConnEvent, resub_tx: &mpsc::Sender<FeedMode>) {
        match event {
            ConnEvent::Ready { mode, epoch } => {
                self.handle_mut(mode).last_epoch = epoch;
                self.full_resubscribe(mode).await;
            }
            ConnEvent::Ack { mode, epoch, ack } => {
                if epoch < self.handle(mode).last_epoch {
                    tracing::debug!(conn = mode.label(), epoch, "stale ack dropped");
                    return;
                }
                if ack.status == ACK_STATUS_RESUBSCRIBE && !self.handle(mode).resub_armed {
                    tracing::warn!(
                        conn = mode.label(),
                        message_id = %ack.message_id,
                        "vendor requested resubscribe"
                    );
                    self.handle_mut(mode).resub_armed = true;
                    let resub_tx = resub_tx.clone();
                    tokio::spawn(async move {
                        sleep(RESUBSCRIBE_DELAY).await;
                        let _ = resub_tx.send(mode).await;
                    });
                }
            }
            ConnEvent::Unrecoverable { mode, error } => {
                tracing::error!(conn = mode.label(), %error, "connection unrecoverable");
                let _ = self.fatal_tx.send(error).await;
            }
        }
    }

    /// Translate registry side-effects into per-token frames on both
    /// connections, then refresh the periodic data-request nudges.
    async fn apply_changes(&self, changes: Vec<SubscriptionChange>) {
        if changes.is_empty() {
            return;
        }
        for change in &changes {
            let (act, token, exchange) = match *change {
                SubscriptionChange::Subscribe { token, exchange } => {
                    (action::SUBSCRIBE, token, exchange)
                }
                SubscriptionChange::Unsubscribe { token, exchange } => {
                    (action::UNSUBSCRIBE, token, exchange)
                }
            };
            for handle in [&self.ltp, &self.depth] {
                match token_frame(act, handle.mode.wire_code(), [(exchange, vec![token])]) {
                    Ok(frame) => handle.send(frame).await,
                    Err(e) => tracing::error!(error = %e, "frame composition failed"),
                }
            }
        }
        self.refresh_nudges().await;
    }

    /// Send the full grouped subscribe for one connection and refresh its
    /// nudge. Used on READY and after a 307 acknowledgement.
    async fn full_resubscribe(&self, mode: FeedMode) {
        let snapshot = self.registry.snapshot();
        let handle = self.handle(mode);
        if snapshot.is_empty() {
            handle.set_nudge(None).await;
            return;
        }
        let groups: Vec<_> = snapshot.into_iter().collect();
        match token_frame(action::SUBSCRIBE, mode.wire_code(), groups.clone()) {
            Ok(frame) => {
                tracing::info!(conn = mode.label(), groups = groups.len(), "full resubscribe");
                handle.send(frame).await;
            }
            Err(e) => tracing::error!(error = %e, "subscribe composition failed"),
        }
        match token_frame(action::DATA_REQUEST, mode.wire_code(), groups) {
            Ok(frame) => handle.set_nudge(Some(frame)).await,
            Err(e) => tracing::error!(error = %e, "data-request composition failed"),
        }
    }

    async fn refresh_nudges(&self) {
        let snapshot = self.registry.snapshot();
        for handle in [&self.ltp, &self.depth] {
            if snapshot.is_empty() {
                handle.set_nudge(None).await;
                continue;
            }
            let groups: Vec<_> = snapshot.clone().into_iter().collect();
            match token_frame(action::DATA_REQUEST, handle.mode.wire_code(), groups) {
                Ok(frame) => handle.set_nudge(Some(frame)).await,
                Err(e) => tracing::error!(error = %e, "data-request composition failed"),
            }
        }
    }

    fn handle(&self, mode: FeedMode) -> &ConnHandle {
        match mode {
            FeedMode::Ltp => &self.ltp,
            FeedMode::SnapQuote => &self.depth,
        }
    }

    fn handle_mut(&mut self, mode: FeedMode) -> &mut ConnHandle {
        match mode {
            FeedMode::Ltp => &mut self.ltp,
            FeedMode::SnapQuote => &mut self.depth,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine facade
// ---------------------------------------------------------------------------

/// Health snapshot for one upstream connection.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub mode: &'static str,
    pub state: ConnState,
    pub epoch: u64,
    pub reconnects: u64,
    pub frames: u64,
    pub decode_errors: u64,
}

/// Aggregate engine health.
#[derive(Debug, Clone)]
pub struct EngineHealth {
    pub connections: Vec<ConnectionHealth>,
    /// Live tokens in the registry.
    pub subscribed_tokens: usize,
    /// Ticks evicted from full dispatch queues.
    pub dropped_ticks: u64,
}

/// The running engine: both connections, the dispatch pool, the control
/// loop, and the control-plane listeners.
pub struct Engine {
    registry: Arc<SubscriptionRegistry>,
    pool: Arc<DispatchPool>,
    conn_stats: Vec<(FeedMode, Arc<ConnStats>)>,
    tasks: Vec<JoinHandle<()>>,
    fatal_rx: mpsc::Receiver<FeedError>,
}

impl Engine {
    /// Start the engine against Redis, with control-plane events consumed
    /// from the `orderplan:new` / `orderplan:delete` channels.
    pub async fn start(cfg: Config, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let bus = Arc::new(RedisBus::connect(&cfg.redis_url()).await?);
        let (plan_tx, plan_rx) = mpsc::channel(64);
        bus.spawn_plan_listeners(plan_tx);
        Ok(Self::start_with(cfg, session, Arc::clone(&bus), bus, plan_rx).await)
    }

    /// Start the engine over explicit store implementations and an external
    /// plan-event feed. This is the seam the integration tests drive.
    pub async fn start_with<P: PlanStore, B: MarketBus>(
        cfg: Config,
        session: Arc<dyn SessionProvider>,
        plans: Arc<P>,
        bus: Arc<B>,
        plan_rx: mpsc::Receiver<PlanEvent>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (orphan_tx, orphan_rx) = mpsc::channel(64);
        let (conn_tx, conn_rx) = mpsc::channel(64);
        let (fatal_tx, fatal_rx) = mpsc::channel(4);

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&plans),
            bus,
            orphan_tx,
        ));
        let pool = Arc::new(DispatchPool::start(
            dispatcher,
            cfg.dispatch_workers,
            cfg.dispatch_queue_cap,
        ));

        let conn_cfg = ConnConfig {
            ws_url: cfg.ws_url.clone(),
            reconnect_base: cfg.reconnect_base,
            reconnect_multiplier: cfg.reconnect_multiplier,
            reconnect_max_attempts: cfg.reconnect_max_attempts,
            stale_frame_timeout: cfg.stale_frame_timeout,
            stale_pong_timeout: cfg.stale_pong_timeout,
            data_request_interval: cfg.data_request_interval,
            health_check_interval: cfg.health_check_interval,
            post_auth_delay: cfg.post_auth_delay,
            auth_reject_limit: crate::constants::AUTH_REJECT_LIMIT,
            auth_reject_window: crate::constants::AUTH_REJECT_WINDOW,
        };

        let mut tasks = Vec::new();
        let mut conn_stats = Vec::new();
        let mut handles = Vec::new();
        for mode in [FeedMode::Ltp, FeedMode::SnapQuote] {
            let (cmd_tx, cmd_rx) = mpsc::channel(64);
            let stats = Arc::new(ConnStats::default());
            let connection = Connection::new(
                mode,
                conn_cfg.clone(),
                Arc::clone(&session),
                conn_tx.clone(),
                Arc::clone(&pool),
                Arc::clone(&stats),
            );
            tasks.push(tokio::spawn(connection.run(cmd_rx)));
            conn_stats.push((mode, Arc::clone(&stats)));
            handles.push(ConnHandle {
                mode,
                cmd_tx,
                last_epoch: 0,
                resub_armed: false,
            });
        }
        let depth = handles.pop().expect("two handles");
        let ltp = handles.pop().expect("two handles");

        let manager = FeedManager {
            registry: Arc::clone(&registry),
            plans,
            ltp,
            depth,
            fatal_tx,
        };
        tasks.push(tokio::spawn(manager.run(plan_rx, conn_rx, orphan_rx)));

        tracing::info!("engine started");
        Self {
            registry,
            pool,
            conn_stats,
            tasks,
            fatal_rx,
        }
    }

    /// Wait for an unrecoverable error. The process lifecycle on return is
    /// the host's decision.
    pub async fn wait(&mut self) -> Option<FeedError> {
        self.fatal_rx.recv().await
    }

    /// Per-connection and registry health.
    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            connections: self
                .conn_stats
                .iter()
                .map(|(mode, stats)| ConnectionHealth {
                    mode: mode.label(),
                    state: stats.state(),
                    epoch: stats.epoch(),
                    reconnects: stats.reconnects(),
                    frames: stats.frames(),
                    decode_errors: stats.decode_errors(),
                })
                .collect(),
            subscribed_tokens: self.registry.len(),
            dropped_ticks: self.pool.dropped(),
        }
    }

    /// Stop every task.
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

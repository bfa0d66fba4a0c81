//! Tick dispatch: bounded per-worker queues feeding the store writes,
//! pub/sub publishes, and plan evaluation for every decoded tick.
//!
//! Ticks are sharded across workers by token so that ticks for one token
//! are always handled in arrival order; there is no ordering guarantee
//! across tokens. Each shard queue is bounded and drops its oldest entry
//! for the incoming token on overflow — a live feed has no use for stale
//! prices.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::constants::{
    depth_update_channel, latest_price_key, market_depth_key, price_update_channel,
};
use crate::evaluator::{EvalOutcome, Evaluator};
use crate::store::{MarketBus, PlanStore};
use crate::types::ticks::{DepthSnapshot, PriceSnapshot, Tick};
use crate::ws::registry::SubscriptionRegistry;

// ---------------------------------------------------------------------------
// Bounded tick queue
// ---------------------------------------------------------------------------

/// A bounded single-consumer queue of decoded ticks.
pub struct TickQueue {
    deque: Mutex<VecDeque<Tick>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            deque: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a tick. On overflow the oldest queued tick for the same
    /// token is evicted, falling back to the queue head.
    pub fn push(&self, tick: Tick) {
        {
            let mut deque = self.deque.lock().expect("tick queue mutex poisoned");
            if deque.len() >= self.capacity {
                let token = tick.token();
                let victim = deque
                    .iter()
                    .position(|t| t.token() == token)
                    .unwrap_or(0);
                deque.remove(victim);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(token, total_dropped = dropped, "tick queue overflow");
                }
            }
            deque.push_back(tick);
        }
        self.notify.notify_one();
    }

    /// Dequeue the next tick, waiting if the queue is empty.
    pub async fn pop(&self) -> Tick {
        loop {
            if let Some(tick) = self.deque.lock().expect("tick queue mutex poisoned").pop_front() {
                return tick;
            }
            self.notify.notified().await;
        }
    }

    /// Total ticks evicted on overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Performs the per-tick side-effects: latest-price snapshot, pub/sub
/// publishes, and plan evaluation. Every step is best-effort — a store or
/// publish failure is logged and the remaining steps still run.
pub struct Dispatcher<P, B> {
    registry: Arc<SubscriptionRegistry>,
    bus: Arc<B>,
    evaluator: Evaluator<P, B>,
    orphans: mpsc::Sender<String>,
}

impl<P: PlanStore, B: MarketBus> Dispatcher<P, B> {
    /// `orphans` receives plan ids found missing in the external store so
    /// the control loop can drop their registry bindings.
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        plans: Arc<P>,
        bus: Arc<B>,
        orphans: mpsc::Sender<String>,
    ) -> Self {
        Self {
            registry,
            evaluator: Evaluator::new(plans, Arc::clone(&bus)),
            bus,
            orphans,
        }
    }

    /// Route one decoded tick to the store, pub/sub, and the evaluator.
    pub async fn dispatch(&self, tick: Tick) {
        let token = tick.token();
        let Some(symbol) = self.registry.symbol_for(token) else {
            // Ticks can trail an unsubscribe; nothing to do for them.
            tracing::debug!(token, "tick for unsubscribed token ignored");
            return;
        };

        self.publish_snapshots(&symbol, &tick).await;

        for plan_id in self.registry.plans_for(token) {
            match self.evaluator.evaluate(&plan_id, tick.last_price()).await {
                Ok(EvalOutcome::PlanMissing) => {
                    tracing::warn!(plan = %plan_id, "plan missing from store; dropping binding");
                    let _ = self.orphans.send(plan_id).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(plan = %plan_id, error = %e, "plan evaluation failed");
                }
            }
        }
    }

    async fn publish_snapshots(&self, symbol: &str, tick: &Tick) {
        match serde_json::to_string(&PriceSnapshot::from_tick(symbol, tick)) {
            Ok(json) => {
                if let Err(e) = self.bus.put(&latest_price_key(symbol), &json).await {
                    tracing::warn!(symbol, error = %e, "latest-price write failed");
                }
                if let Err(e) = self.bus.publish(&price_update_channel(symbol), &json).await {
                    tracing::warn!(symbol, error = %e, "price update publish failed");
                }
            }
            Err(e) => tracing::warn!(symbol, error = %e, "price snapshot serialization failed"),
        }

        let Tick::SnapQuote(snap) = tick else { return };
        match serde_json::to_string(&DepthSnapshot::from_tick(symbol, snap)) {
            Ok(json) => {
                if let Err(e) = self.bus.put(&market_depth_key(symbol), &json).await {
                    tracing::warn!(symbol, error = %e, "depth write failed");
                }
                if let Err(e) = self.bus.publish(&depth_update_channel(symbol), &json).await {
                    tracing::warn!(symbol, error = %e, "depth update publish failed");
                }
            }
            Err(e) => tracing::warn!(symbol, error = %e, "depth snapshot serialization failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// The dispatcher worker pool: one task and one bounded queue per shard.
pub struct DispatchPool {
    queues: Vec<Arc<TickQueue>>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Spawn `workers` shard tasks over the given dispatcher.
    pub fn start<P: PlanStore, B: MarketBus>(
        dispatcher: Arc<Dispatcher<P, B>>,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        let workers = workers.max(1);
        let queues: Vec<_> = (0..workers)
            .map(|_| Arc::new(TickQueue::new(queue_capacity)))
            .collect();
        let handles = queues
            .iter()
            .map(|queue| {
                let queue = Arc::clone(queue);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    loop {
                        let tick = queue.pop().await;
                        dispatcher.dispatch(tick).await;
                    }
                })
            })
            .collect();
        Self {
            queues,
            workers: handles,
        }
    }

    /// Enqueue a tick on its token's shard.
    pub fn route(&self, tick: Tick) {
        let shard = tick.token() as usize % self.queues.len();
        self.queues[shard].push(tick);
    }

    /// Total ticks evicted across all shards.
    pub fn dropped(&self) -> u64 {
        self.queues.iter().map(|q| q.dropped()).sum()
    }

    /// Abort the worker tasks.
    pub fn shutdown(&mut self) {
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

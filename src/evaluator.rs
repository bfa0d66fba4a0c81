//! Order-plan evaluation: deterministic status transitions driven by the
//! last-traded price of incoming ticks.
//!
//! The transition rules themselves are a pure function ([`next_status`]);
//! [`Evaluator`] wraps them with plan-store persistence and the
//! `orderplan:update:{id}` publish.

use std::sync::Arc;

use chrono::Utc;

use crate::constants::plan_update_channel;
use crate::error::Result;
use crate::store::{MarketBus, PlanStore};
use crate::types::enums::{PlanStatus, TransactionType};
use crate::types::OrderPlan;

/// Compute the status a plan moves to when the market trades at
/// `last_price`, or `None` when it stays put.
///
/// BUY plans enter when price falls to the entry and exit when it rises to
/// the exit; SELL plans are the mirror image. The exit rule also applies
/// directly from `CREATED`, so a single tick can carry a plan straight to
/// `EXIT_TRIGGERED`. Terminal statuses never move.
pub fn next_status(plan: &OrderPlan, last_price: f64) -> Option<PlanStatus> {
    if plan.status.is_terminal() {
        return None;
    }
    let mut status = plan.status;

    let entry_hit = match plan.transaction_type {
        TransactionType::BUY => last_price <= plan.entry_price,
        TransactionType::SELL => last_price >= plan.entry_price,
    };
    if status == PlanStatus::CREATED && entry_hit {
        status = PlanStatus::ENTRY_TRIGGERED;
    }

    let exit_hit = match plan.transaction_type {
        TransactionType::BUY => last_price >= plan.exit_price,
        TransactionType::SELL => last_price <= plan.exit_price,
    };
    if matches!(status, PlanStatus::CREATED | PlanStatus::ENTRY_TRIGGERED) && exit_hit {
        status = PlanStatus::EXIT_TRIGGERED;
    }

    (status != plan.status).then_some(status)
}

/// Outcome of evaluating one plan against one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    /// Price and timestamp refreshed, status unchanged.
    Updated,
    /// The plan advanced to a new status.
    Transitioned(PlanStatus),
    /// The plan no longer exists in the external store; the caller should
    /// drop its registry binding.
    PlanMissing,
}

/// Applies [`next_status`] to stored plans and persists the result.
pub struct Evaluator<P, B> {
    plans: Arc<P>,
    bus: Arc<B>,
}

impl<P: PlanStore, B: MarketBus> Evaluator<P, B> {
    pub fn new(plans: Arc<P>, bus: Arc<B>) -> Self {
        Self { plans, bus }
    }

    /// Evaluate one plan against the given last-traded price.
    ///
    /// Always refreshes `current_price` / `last_updated`. A store write
    /// failure surfaces as `Err` — the caller logs it and keeps the
    /// subscription alive.
    pub async fn evaluate(&self, plan_id: &str, last_price: f64) -> Result<EvalOutcome> {
        let Some(mut plan) = self.plans.fetch(plan_id).await? else {
            return Ok(EvalOutcome::PlanMissing);
        };

        let transition = next_status(&plan, last_price);
        plan.current_price = last_price;
        plan.last_updated = Utc::now();
        if let Some(status) = transition {
            plan.status = status;
        }
        self.plans.save(&plan).await?;

        let Some(status) = transition else {
            return Ok(EvalOutcome::Updated);
        };

        tracing::info!(
            plan = plan_id,
            symbol = %plan.symbol,
            ?status,
            price = last_price,
            "order plan transitioned"
        );
        let payload = serde_json::to_string(&plan)?;
        if let Err(e) = self.bus.publish(&plan_update_channel(plan_id), &payload).await {
            // Best-effort: the persisted transition is the source of truth.
            tracing::warn!(plan = plan_id, error = %e, "failed to publish plan update");
        }
        Ok(EvalOutcome::Transitioned(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn plan(txn: TransactionType, status: PlanStatus, entry: f64, exit: f64) -> OrderPlan {
        OrderPlan {
            id: "p1".into(),
            symbol: "X".into(),
            token: 101,
            exchange: "NSE".into(),
            transaction_type: txn,
            entry_price: entry,
            exit_price: exit,
            status,
            current_price: 0.0,
            last_updated: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn buy_enters_when_price_falls_to_entry() {
        let p = plan(TransactionType::BUY, PlanStatus::CREATED, 100.0, 110.0);
        assert_eq!(next_status(&p, 99.50), Some(PlanStatus::ENTRY_TRIGGERED));
        assert_eq!(next_status(&p, 100.0), Some(PlanStatus::ENTRY_TRIGGERED));
        assert_eq!(next_status(&p, 100.05), None);
    }

    #[test]
    fn buy_exits_when_price_reaches_exit() {
        let p = plan(TransactionType::BUY, PlanStatus::ENTRY_TRIGGERED, 100.0, 110.0);
        assert_eq!(next_status(&p, 110.0), Some(PlanStatus::EXIT_TRIGGERED));
        assert_eq!(next_status(&p, 109.99), None);
    }

    #[test]
    fn buy_exit_applies_straight_from_created() {
        let p = plan(TransactionType::BUY, PlanStatus::CREATED, 100.0, 110.0);
        assert_eq!(next_status(&p, 115.0), Some(PlanStatus::EXIT_TRIGGERED));
    }

    #[test]
    fn sell_rules_mirror_buy() {
        let p = plan(TransactionType::SELL, PlanStatus::CREATED, 100.0, 90.0);
        assert_eq!(next_status(&p, 101.0), Some(PlanStatus::ENTRY_TRIGGERED));
        assert_eq!(next_status(&p, 99.0), None);

        let p = plan(TransactionType::SELL, PlanStatus::ENTRY_TRIGGERED, 100.0, 90.0);
        assert_eq!(next_status(&p, 90.0), Some(PlanStatus::EXIT_TRIGGERED));
    }

    #[test]
    fn terminal_statuses_never_move() {
        for status in [PlanStatus::EXECUTED, PlanStatus::CANCELLED, PlanStatus::FAILED] {
            let p = plan(TransactionType::BUY, status, 100.0, 110.0);
            assert_eq!(next_status(&p, 50.0), None);
            assert_eq!(next_status(&p, 150.0), None);
        }
    }

    #[test]
    fn exit_triggered_does_not_retrigger() {
        let p = plan(TransactionType::BUY, PlanStatus::EXIT_TRIGGERED, 100.0, 110.0);
        assert_eq!(next_status(&p, 120.0), None);
        assert_eq!(next_status(&p, 95.0), None);
    }
}

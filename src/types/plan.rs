//! The order-plan record.
//!
//! Plans are created and deleted by the external HTTP API; the engine only
//! reads them, advances `status`, and refreshes `current_price` /
//! `last_updated` as ticks arrive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{PlanStatus, TransactionType};

/// A user-defined conditional intent to buy or sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlan {
    /// Plan identifier assigned by the external store.
    pub id: String,
    /// Trading symbol.
    pub symbol: String,
    /// Venue-assigned instrument token.
    pub token: u32,
    /// Free-form exchange string as the user entered it (`"NSE"`, `"NFO"`, …).
    pub exchange: String,
    /// Buy or sell.
    pub transaction_type: TransactionType,
    /// Entry trigger price.
    pub entry_price: f64,
    /// Exit (target / stop) trigger price.
    pub exit_price: f64,
    /// Current lifecycle status.
    pub status: PlanStatus,
    /// Last traded price observed for the plan's instrument.
    #[serde(default)]
    pub current_price: f64,
    /// Time of the last engine update.
    pub last_updated: DateTime<Utc>,
    /// Time the plan was created.
    pub created_at: DateTime<Utc>,
}

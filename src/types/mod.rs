//! Strongly-typed records shared across the engine.
//!
//! - [`enums`] — exchange segments, transaction type, plan status
//! - [`ticks`] — decoded tick records and store/pub-sub snapshots
//! - [`plan`] — the order-plan record
//!
//! All enums are re-exported at the module root via `pub use enums::*`.

pub mod enums;
pub mod plan;
pub mod ticks;

pub use enums::*;
pub use plan::OrderPlan;
pub use ticks::{DepthLevel, DepthSide, DepthSnapshot, LtpTick, PriceSnapshot, QuoteTick, SnapQuoteTick, Tick};

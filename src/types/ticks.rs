//! Decoded tick records and the snapshots derived from them.
//!
//! One struct per subscription mode, nested by extension: a quote tick is an
//! LTP tick plus OHLC/volume fields, a snap-quote tick is a quote tick plus
//! OI, best-five depth, and circuit limits. The decoder in
//! [`crate::ws::decoder`] produces these; nothing in here touches I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::ExchangeSegment;

// ---------------------------------------------------------------------------
// Tick records
// ---------------------------------------------------------------------------

/// A mode-1 (LTP) tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LtpTick {
    /// Venue-assigned instrument token.
    pub token: u32,
    /// Exchange segment the tick belongs to.
    pub exchange: ExchangeSegment,
    /// Vendor sequence number.
    pub sequence: u64,
    /// Exchange timestamp, epoch milliseconds.
    pub exchange_ts: u64,
    /// Last traded price, divisor-scaled.
    pub last_price: f64,
    /// Set when one or more fields could not be extracted and were defaulted.
    pub truncated: bool,
}

/// A mode-2 (quote) tick: LTP plus intraday aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteTick {
    pub ltp: LtpTick,
    /// Last traded quantity.
    pub last_qty: u64,
    /// Average traded price, divisor-scaled.
    pub avg_price: f64,
    /// Total traded volume for the day.
    pub volume: u64,
    /// Total pending buy quantity.
    pub total_buy_qty: f64,
    /// Total pending sell quantity.
    pub total_sell_qty: f64,
    /// Day open price.
    pub open: f64,
    /// Day high price.
    pub high: f64,
    /// Day low price.
    pub low: f64,
    /// Previous close price.
    pub close: f64,
}

/// A mode-3 (snap-quote) tick: quote plus OI, depth, and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapQuoteTick {
    pub quote: QuoteTick,
    /// Last traded timestamp, epoch seconds.
    pub last_traded_ts: u64,
    /// Open interest.
    pub open_interest: u64,
    /// Open interest change, percent.
    pub oi_change_pct: f64,
    /// Best five buy levels, price-descending.
    pub best_five_buy: Vec<DepthLevel>,
    /// Best five sell levels, price-ascending.
    pub best_five_sell: Vec<DepthLevel>,
    /// Upper circuit limit.
    pub upper_circuit: f64,
    /// Lower circuit limit.
    pub lower_circuit: f64,
    /// 52-week high.
    pub high_52w: f64,
    /// 52-week low.
    pub low_52w: f64,
}

/// One price level of the best-five order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Side of the book.
    pub side: DepthSide,
    /// Quantity resting at this level.
    pub quantity: i64,
    /// Level price, divisor-scaled.
    pub price: f64,
    /// Number of orders at this level.
    pub orders: i16,
}

/// Buy or sell side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthSide {
    Buy,
    Sell,
}

/// A decoded tick of any mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Ltp(LtpTick),
    Quote(QuoteTick),
    SnapQuote(SnapQuoteTick),
}

impl Tick {
    /// Instrument token of the tick.
    pub fn token(&self) -> u32 {
        self.ltp().token
    }

    /// Exchange segment of the tick.
    pub fn exchange(&self) -> ExchangeSegment {
        self.ltp().exchange
    }

    /// Last traded price.
    pub fn last_price(&self) -> f64 {
        self.ltp().last_price
    }

    /// Vendor sequence number.
    pub fn sequence(&self) -> u64 {
        self.ltp().sequence
    }

    /// The LTP core shared by every mode.
    pub fn ltp(&self) -> &LtpTick {
        match self {
            Tick::Ltp(t) => t,
            Tick::Quote(t) => &t.ltp,
            Tick::SnapQuote(t) => &t.quote.ltp,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots written to the store / published on pub/sub
// ---------------------------------------------------------------------------

/// The latest-price snapshot kept per symbol. Overwritten on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub token: u32,
    pub exchange: ExchangeSegment,
    pub sequence: u64,
    pub last_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_buy_qty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sell_qty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_five_buy: Option<Vec<DepthLevel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_five_sell: Option<Vec<DepthLevel>>,
    pub updated_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Build a snapshot from a decoded tick and its resolved symbol.
    pub fn from_tick(symbol: &str, tick: &Tick) -> Self {
        let ltp = tick.ltp();
        let mut snap = Self {
            symbol: symbol.to_owned(),
            token: ltp.token,
            exchange: ltp.exchange,
            sequence: ltp.sequence,
            last_price: ltp.last_price,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            avg_price: None,
            total_buy_qty: None,
            total_sell_qty: None,
            open_interest: None,
            best_five_buy: None,
            best_five_sell: None,
            updated_at: Utc::now(),
        };
        let quote = match tick {
            Tick::Ltp(_) => return snap,
            Tick::Quote(q) => q,
            Tick::SnapQuote(s) => &s.quote,
        };
        snap.open = Some(quote.open);
        snap.high = Some(quote.high);
        snap.low = Some(quote.low);
        snap.close = Some(quote.close);
        snap.volume = Some(quote.volume);
        snap.avg_price = Some(quote.avg_price);
        snap.total_buy_qty = Some(quote.total_buy_qty);
        snap.total_sell_qty = Some(quote.total_sell_qty);
        if let Tick::SnapQuote(s) = tick {
            snap.open_interest = Some(s.open_interest);
            snap.best_five_buy = Some(s.best_five_buy.clone());
            snap.best_five_sell = Some(s.best_five_sell.clone());
        }
        snap
    }
}

/// The market-depth snapshot published for snap-quote ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub token: u32,
    pub exchange: ExchangeSegment,
    pub buy: Vec<DepthLevel>,
    pub sell: Vec<DepthLevel>,
    pub updated_at: DateTime<Utc>,
}

impl DepthSnapshot {
    /// Build a depth snapshot from a snap-quote tick and its symbol.
    pub fn from_tick(symbol: &str, tick: &SnapQuoteTick) -> Self {
        Self {
            symbol: symbol.to_owned(),
            token: tick.quote.ltp.token,
            exchange: tick.quote.ltp.exchange,
            buy: tick.best_five_buy.clone(),
            sell: tick.best_five_sell.clone(),
            updated_at: Utc::now(),
        }
    }
}

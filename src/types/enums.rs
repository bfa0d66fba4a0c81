//! Shared enum types that map directly to the vendor's wire values.
//!
//! Variant names use `SCREAMING_SNAKE_CASE` to match the JSON wire format
//! expected by the vendor, so we suppress the Rust naming convention lint.
#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Exchange Segment
// ---------------------------------------------------------------------------

/// Exchange and segment identifier used in subscribe frames and carried in
/// byte 1 of every binary feed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// NSE Equity Cash (wire code 1).
    NSE_CM,
    /// NSE Futures & Options (wire code 2).
    NSE_FO,
    /// BSE Equity Cash (wire code 3).
    BSE_CM,
    /// BSE Futures & Options (wire code 4).
    BSE_FO,
    /// MCX Commodity Futures (wire code 5).
    MCX_FO,
    /// NCDEX Commodity Futures (wire code 7).
    NCX_FO,
    /// Currency Derivatives (wire code 13).
    CDE_FO,
}

impl ExchangeSegment {
    /// Returns the numeric code used in binary packets and subscribe frames.
    pub fn wire_code(self) -> u8 {
        match self {
            Self::NSE_CM => 1,
            Self::NSE_FO => 2,
            Self::BSE_CM => 3,
            Self::BSE_FO => 4,
            Self::MCX_FO => 5,
            Self::NCX_FO => 7,
            Self::CDE_FO => 13,
        }
    }

    /// Construct from a numeric wire code (as found in binary feed packets).
    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::NSE_CM),
            2 => Some(Self::NSE_FO),
            3 => Some(Self::BSE_CM),
            4 => Some(Self::BSE_FO),
            5 => Some(Self::MCX_FO),
            7 => Some(Self::NCX_FO),
            13 => Some(Self::CDE_FO),
            _ => None,
        }
    }

    /// Price divisor for this segment. Currency derivatives quote with seven
    /// implied decimals; everything else quotes in paise.
    pub fn price_divisor(self) -> f64 {
        match self {
            Self::CDE_FO => 10_000_000.0,
            _ => 100.0,
        }
    }

    /// Map a free-form exchange string to a segment.
    ///
    /// Accepts venue names (`"NSE"`, `"NFO"`, `"BFO"`, …) as well as raw
    /// trading symbols: a symbol that looks like a derivative contract
    /// (`…CE`, `…PE`, `…FUT`) maps to NSE F&O. Anything unrecognised
    /// defaults to NSE cash.
    pub fn detect(value: &str) -> Self {
        let v = value.trim().to_ascii_uppercase();
        match v.as_str() {
            "NSE" | "NSE_CM" | "NSECM" | "NSE_EQ" => Self::NSE_CM,
            "NFO" | "NSE_FO" | "NSEFO" | "NSE_FNO" => Self::NSE_FO,
            "BSE" | "BSE_CM" | "BSECM" | "BSE_EQ" => Self::BSE_CM,
            "BFO" | "BSE_FO" | "BSEFO" | "BSE_FNO" => Self::BSE_FO,
            "MCX" | "MCX_FO" | "MCXFO" => Self::MCX_FO,
            "NCDEX" | "NCX" | "NCX_FO" => Self::NCX_FO,
            "CDS" | "CDE" | "CDE_FO" => Self::CDE_FO,
            _ => {
                if v.ends_with("CE") || v.ends_with("PE") || v.contains("FUT") {
                    Self::NSE_FO
                } else {
                    Self::NSE_CM
                }
            }
        }
    }
}

impl std::fmt::Display for ExchangeSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NSE_CM => "NSE",
            Self::NSE_FO => "NFO",
            Self::BSE_CM => "BSE",
            Self::BSE_FO => "BFO",
            Self::MCX_FO => "MCX",
            Self::NCX_FO => "NCDEX",
            Self::CDE_FO => "CDS",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Transaction Type
// ---------------------------------------------------------------------------

/// Buy or sell side of an order plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    BUY,
    SELL,
}

// ---------------------------------------------------------------------------
// Plan Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an order plan.
///
/// The engine only drives `CREATED → ENTRY_TRIGGERED → EXIT_TRIGGERED`;
/// the remaining statuses are set by external collaborators and treated
/// as terminal here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    /// Freshly created, entry condition not yet met.
    CREATED,
    /// Entry price touched; waiting on the exit condition.
    ENTRY_TRIGGERED,
    /// Exit price touched.
    EXIT_TRIGGERED,
    /// Order placed and executed by the order-submission client.
    EXECUTED,
    /// Cancelled by the user.
    CANCELLED,
    /// Order submission failed.
    FAILED,
}

impl PlanStatus {
    /// Terminal statuses are never transitioned out of by the evaluator.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EXECUTED | Self::CANCELLED | Self::FAILED)
    }
}

//! Binary frame decoder for the streaming feed.
//!
//! Every inbound binary frame carries its subscription mode in byte 0 and is
//! otherwise position-dependent, little-endian throughout. Acknowledgement
//! frames are 51 bytes with `0x37` at offset 2 and are classified before any
//! mode dispatch.
//!
//! The decoder is a pure function from bytes to records: it never touches
//! shared state, and a field that cannot be extracted is defaulted and
//! flagged via [`LtpTick::truncated`] rather than aborting the connection.

use serde::Deserialize;

use crate::constants::{ACK_FRAME_LEN, ACK_SIGNATURE, mode};
use crate::error::{FeedError, Result};
use crate::types::enums::ExchangeSegment;
use crate::types::ticks::{DepthLevel, DepthSide, LtpTick, QuoteTick, SnapQuoteTick, Tick};

// ---------------------------------------------------------------------------
// Frame layout (byte offsets)
// ---------------------------------------------------------------------------

/// Byte offsets of the wire layout. Shared fields first, then the mode-2
/// extension, then the mode-3 extension.
mod layout {
    pub const MODE: usize = 0;
    pub const EXCHANGE: usize = 1;
    /// Token as a null-terminated ASCII string.
    pub const TOKEN: usize = 2;
    pub const TOKEN_LEN: usize = 24;
    pub const SEQUENCE: usize = 27;
    pub const EXCHANGE_TS: usize = 35;
    /// Signed int32, divided by the segment divisor.
    pub const LAST_PRICE: usize = 43;

    // Mode 2 extension.
    pub const LAST_QTY: usize = 51;
    pub const AVG_PRICE: usize = 59;
    pub const VOLUME: usize = 67;
    pub const TOTAL_BUY_QTY: usize = 75;
    pub const TOTAL_SELL_QTY: usize = 83;
    pub const OPEN: usize = 91;
    pub const HIGH: usize = 99;
    pub const LOW: usize = 107;
    pub const CLOSE: usize = 115;

    // Mode 3 extension.
    pub const LAST_TRADED_TS: usize = 123;
    pub const OPEN_INTEREST: usize = 131;
    pub const OI_CHANGE_PCT: usize = 139;
    pub const BEST_FIVE: usize = 147;
    pub const BEST_FIVE_ENTRIES: usize = 10;
    pub const BEST_FIVE_ENTRY_LEN: usize = 20;
    pub const UPPER_CIRCUIT: usize = 347;
    pub const LOWER_CIRCUIT: usize = 355;
    pub const HIGH_52W: usize = 363;
    pub const LOW_52W: usize = 371;

    // Acknowledgement frame.
    pub const ACK_MESSAGE_ID: usize = 3;
    pub const ACK_MESSAGE_ID_LEN: usize = 4;
    pub const ACK_STATUS: usize = 38;
}

/// Best-five level prices are always quoted in paise.
const BEST_FIVE_PRICE_DIVISOR: f64 = 100.0;

/// Full frame length per mode.
pub const LTP_FRAME_LEN: usize = 51;
pub const QUOTE_FRAME_LEN: usize = 123;
pub const SNAP_QUOTE_FRAME_LEN: usize = 379;

/// Expected length of a frame, keyed off its mode byte. `None` for
/// acknowledgement frames and unrecognised modes. Used by the connection to
/// hold a split packet for reassembly instead of decoding it short.
pub fn min_frame_len(data: &[u8]) -> Option<usize> {
    if data.len() == ACK_FRAME_LEN && data[2] == ACK_SIGNATURE {
        return None;
    }
    match data.first()? {
        &mode::LTP => Some(LTP_FRAME_LEN),
        &mode::QUOTE => Some(QUOTE_FRAME_LEN),
        &mode::SNAP_QUOTE => Some(SNAP_QUOTE_FRAME_LEN),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Bounds-checked field reader
// ---------------------------------------------------------------------------

/// Reads fixed-offset fields out of a frame, defaulting on short reads and
/// remembering that it did so.
struct FieldReader<'a> {
    data: &'a [u8],
    truncated: bool,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            truncated: false,
        }
    }

    fn slice(&mut self, offset: usize, len: usize) -> Option<&'a [u8]> {
        match self.data.get(offset..offset + len) {
            Some(s) => Some(s),
            None => {
                self.truncated = true;
                None
            }
        }
    }

    fn u8_at(&mut self, offset: usize) -> u8 {
        self.slice(offset, 1).map_or(0, |s| s[0])
    }

    fn i16_at(&mut self, offset: usize) -> i16 {
        self.slice(offset, 2)
            .map_or(0, |s| i16::from_le_bytes([s[0], s[1]]))
    }

    fn u16_at(&mut self, offset: usize) -> u16 {
        self.slice(offset, 2)
            .map_or(0, |s| u16::from_le_bytes([s[0], s[1]]))
    }

    fn i32_at(&mut self, offset: usize) -> i32 {
        self.slice(offset, 4)
            .map_or(0, |s| i32::from_le_bytes(s.try_into().expect("4-byte slice")))
    }

    fn u64_at(&mut self, offset: usize) -> u64 {
        self.slice(offset, 8)
            .map_or(0, |s| u64::from_le_bytes(s.try_into().expect("8-byte slice")))
    }

    fn i64_at(&mut self, offset: usize) -> i64 {
        self.slice(offset, 8)
            .map_or(0, |s| i64::from_le_bytes(s.try_into().expect("8-byte slice")))
    }

    fn f64_at(&mut self, offset: usize) -> f64 {
        self.slice(offset, 8)
            .map_or(0.0, |s| f64::from_le_bytes(s.try_into().expect("8-byte slice")))
    }

    /// Null-terminated ASCII integer token.
    fn token_at(&mut self, offset: usize, len: usize) -> u32 {
        let Some(raw) = self.slice(offset, len) else {
            return 0;
        };
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        match std::str::from_utf8(&raw[..end])
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            Some(token) => token,
            None => {
                self.truncated = true;
                0
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// A decoded inbound binary frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A market tick of any mode.
    Tick(Tick),
    /// A vendor acknowledgement.
    Ack(AckFrame),
}

/// A 51-byte acknowledgement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// Four-character ASCII message id.
    pub message_id: String,
    /// Vendor status code. `307` demands a full resubscribe.
    pub status: u16,
}

/// Classify and decode an inbound binary frame.
///
/// Returns an error for empty frames and unknown mode bytes; the caller
/// logs and discards those without touching the connection.
pub fn decode_frame(data: &[u8]) -> Result<Frame> {
    if data.len() == ACK_FRAME_LEN && data[2] == ACK_SIGNATURE {
        return Ok(Frame::Ack(parse_ack(data)));
    }
    match data.first().copied() {
        Some(mode::LTP) => Ok(Frame::Tick(Tick::Ltp(decode_ltp(data)))),
        Some(mode::QUOTE) => Ok(Frame::Tick(Tick::Quote(decode_quote(data)))),
        Some(mode::SNAP_QUOTE) => Ok(Frame::Tick(Tick::SnapQuote(decode_snap_quote(data)))),
        Some(other) => Err(FeedError::InvalidArgument(format!(
            "unknown frame mode byte: {other}"
        ))),
        None => Err(FeedError::InvalidArgument("empty binary frame".into())),
    }
}

/// Parse a 51-byte acknowledgement frame.
pub fn parse_ack(data: &[u8]) -> AckFrame {
    let mut r = FieldReader::new(data);
    let message_id = r
        .slice(layout::ACK_MESSAGE_ID, layout::ACK_MESSAGE_ID_LEN)
        .map(|s| String::from_utf8_lossy(s).trim_end_matches('\0').to_owned())
        .unwrap_or_default();
    let status = r.u16_at(layout::ACK_STATUS);
    AckFrame { message_id, status }
}

// ---------------------------------------------------------------------------
// Mode decoders
// ---------------------------------------------------------------------------

/// Decode the shared LTP core of any frame.
pub fn decode_ltp(data: &[u8]) -> LtpTick {
    let mut r = FieldReader::new(data);
    let exchange = ExchangeSegment::from_wire_code(r.u8_at(layout::EXCHANGE))
        .unwrap_or(ExchangeSegment::NSE_CM);
    let token = r.token_at(layout::TOKEN, layout::TOKEN_LEN);
    let sequence = r.u64_at(layout::SEQUENCE);
    let exchange_ts = r.u64_at(layout::EXCHANGE_TS);
    let last_price = f64::from(r.i32_at(layout::LAST_PRICE)) / exchange.price_divisor();
    LtpTick {
        token,
        exchange,
        sequence,
        exchange_ts,
        last_price,
        truncated: r.truncated,
    }
}

/// Decode a mode-2 quote frame.
pub fn decode_quote(data: &[u8]) -> QuoteTick {
    let mut ltp = decode_ltp(data);
    let divisor = ltp.exchange.price_divisor();
    let mut r = FieldReader::new(data);
    let last_qty = r.u64_at(layout::LAST_QTY);
    let avg_price = r.u64_at(layout::AVG_PRICE) as f64 / divisor;
    let volume = r.u64_at(layout::VOLUME);
    let total_buy_qty = r.f64_at(layout::TOTAL_BUY_QTY);
    let total_sell_qty = r.f64_at(layout::TOTAL_SELL_QTY);
    let open = r.u64_at(layout::OPEN) as f64 / divisor;
    let high = r.u64_at(layout::HIGH) as f64 / divisor;
    let low = r.u64_at(layout::LOW) as f64 / divisor;
    let close = r.u64_at(layout::CLOSE) as f64 / divisor;
    ltp.truncated |= r.truncated;
    QuoteTick {
        ltp,
        last_qty,
        avg_price,
        volume,
        total_buy_qty,
        total_sell_qty,
        open,
        high,
        low,
        close,
    }
}

/// Decode a mode-3 snap-quote frame.
pub fn decode_snap_quote(data: &[u8]) -> SnapQuoteTick {
    let mut quote = decode_quote(data);
    let divisor = quote.ltp.exchange.price_divisor();
    let mut r = FieldReader::new(data);

    let last_traded_ts = r.u64_at(layout::LAST_TRADED_TS);
    let open_interest = r.u64_at(layout::OPEN_INTEREST);
    let oi_change_pct = r.f64_at(layout::OI_CHANGE_PCT);
    let (best_five_buy, best_five_sell) = decode_best_five(&mut r);
    let upper_circuit = r.u64_at(layout::UPPER_CIRCUIT) as f64 / divisor;
    let lower_circuit = r.u64_at(layout::LOWER_CIRCUIT) as f64 / divisor;
    let high_52w = r.u64_at(layout::HIGH_52W) as f64 / divisor;
    let low_52w = r.u64_at(layout::LOW_52W) as f64 / divisor;
    quote.ltp.truncated |= r.truncated;
    SnapQuoteTick {
        quote,
        last_traded_ts,
        open_interest,
        oi_change_pct,
        best_five_buy,
        best_five_sell,
        upper_circuit,
        lower_circuit,
        high_52w,
        low_52w,
    }
}

/// Walk the 10-entry best-five table. Entries whose side flag is neither 0
/// nor 1 are skipped; buy levels sort price-descending, sell levels
/// price-ascending, and each side keeps at most five.
fn decode_best_five(r: &mut FieldReader<'_>) -> (Vec<DepthLevel>, Vec<DepthLevel>) {
    let mut buy = Vec::new();
    let mut sell = Vec::new();
    for i in 0..layout::BEST_FIVE_ENTRIES {
        let base = layout::BEST_FIVE + i * layout::BEST_FIVE_ENTRY_LEN;
        let side = match r.i16_at(base) {
            1 => DepthSide::Buy,
            0 => DepthSide::Sell,
            _ => continue,
        };
        let level = DepthLevel {
            side,
            quantity: r.i64_at(base + 2),
            price: r.i64_at(base + 10) as f64 / BEST_FIVE_PRICE_DIVISOR,
            orders: r.i16_at(base + 18),
        };
        match side {
            DepthSide::Buy => buy.push(level),
            DepthSide::Sell => sell.push(level),
        }
    }
    buy.sort_by(|a, b| b.price.total_cmp(&a.price));
    sell.sort_by(|a, b| a.price.total_cmp(&b.price));
    buy.truncate(5);
    sell.truncate(5);
    (buy, sell)
}

// ---------------------------------------------------------------------------
// Inbound text frames
// ---------------------------------------------------------------------------

/// JSON status envelope the vendor sends on the text channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TextEnvelope {
    /// Whether the request the envelope answers succeeded.
    #[serde(default)]
    pub success: Option<bool>,
    /// Human-readable status message.
    #[serde(default)]
    pub message: Option<String>,
    /// Vendor error code, when present.
    #[serde(default, rename = "errorCode")]
    pub error_code: Option<String>,
    /// Per-request response details, shape varies by request.
    #[serde(default)]
    pub responses: Option<serde_json::Value>,
}

impl TextEnvelope {
    /// Parse a text frame; `None` when it is not a status envelope.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

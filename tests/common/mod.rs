//! Shared test fixtures: an in-memory store, a mock vendor WebSocket
//! server, and binary frame builders matching the wire layout.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use smartstream::error::{FeedError, Result};
use smartstream::store::{MarketBus, PlanStore};
use smartstream::types::{OrderPlan, PlanStatus, TransactionType};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory [`MarketBus`] + [`PlanStore`] recording every write.
#[derive(Default)]
pub struct MemoryStore {
    pub kv: Mutex<HashMap<String, String>>,
    pub published: Mutex<Vec<(String, String)>>,
    pub plans: Mutex<HashMap<String, OrderPlan>>,
    pub fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn insert_plan(&self, plan: OrderPlan) {
        self.plans.lock().unwrap().insert(plan.id.clone(), plan);
    }

    pub fn plan(&self, id: &str) -> Option<OrderPlan> {
        self.plans.lock().unwrap().get(id).cloned()
    }

    pub fn kv_get(&self, key: &str) -> Option<String> {
        self.kv.lock().unwrap().get(key).cloned()
    }

    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl MarketBus for MemoryStore {
    async fn put(&self, key: &str, json: &str) -> Result<()> {
        self.kv.lock().unwrap().insert(key.to_owned(), json.to_owned());
        Ok(())
    }

    async fn publish(&self, channel: &str, json: &str) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_owned(), json.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn fetch(&self, plan_id: &str) -> Result<Option<OrderPlan>> {
        Ok(self.plans.lock().unwrap().get(plan_id).cloned())
    }

    async fn save(&self, plan: &OrderPlan) -> Result<()> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(FeedError::InvalidArgument("injected save failure".into()));
        }
        self.plans
            .lock()
            .unwrap()
            .insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<OrderPlan>> {
        Ok(self.plans.lock().unwrap().values().cloned().collect())
    }
}

/// A plan in CREATED state with the given prices.
pub fn plan(
    id: &str,
    symbol: &str,
    token: u32,
    exchange: &str,
    txn: TransactionType,
    entry: f64,
    exit: f64,
) -> OrderPlan {
    OrderPlan {
        id: id.to_owned(),
        symbol: symbol.to_owned(),
        token,
        exchange: exchange.to_owned(),
        transaction_type: txn,
        entry_price: entry,
        exit_price: exit,
        status: PlanStatus::CREATED,
        current_price: 0.0,
        last_updated: Utc::now(),
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Mock vendor server
// ---------------------------------------------------------------------------

/// One accepted connection from the engine. Dropping the handle closes the
/// socket, which the engine sees as a disconnect.
pub struct VendorClient {
    to_client: mpsc::Sender<Message>,
    from_client: mpsc::Receiver<String>,
}

impl VendorClient {
    /// Push a binary frame to the engine.
    pub async fn send_binary(&self, data: Vec<u8>) {
        self.to_client
            .send(Message::Binary(data.into()))
            .await
            .expect("mock client pump alive");
    }

    /// Push a text frame to the engine.
    pub async fn send_text(&self, text: &str) {
        self.to_client
            .send(Message::Text(text.to_owned().into()))
            .await
            .expect("mock client pump alive");
    }

    /// Next text frame the engine wrote, as JSON.
    pub async fn next_frame(&mut self) -> serde_json::Value {
        let text = timeout(Duration::from_secs(10), self.from_client.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed");
        serde_json::from_str(&text).expect("engine frames are JSON")
    }

    /// Next frame carrying a token list (skips auth frames and nudges with
    /// a different action).
    pub async fn next_token_frame(&mut self, action: u8) -> serde_json::Value {
        loop {
            let frame = self.next_frame().await;
            if frame["params"]["tokenList"].is_array() && frame["action"] == action {
                return frame;
            }
        }
    }
}

/// A WebSocket server standing in for the vendor endpoint.
pub struct MockVendor {
    addr: SocketAddr,
    clients: mpsc::Receiver<VendorClient>,
}

impl MockVendor {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (clients_tx, clients) = mpsc::channel(8);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut sink, mut source) = ws.split();
                let (to_tx, mut to_rx) = mpsc::channel::<Message>(64);
                let (from_tx, from_rx) = mpsc::channel::<String>(64);

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            out = to_rx.recv() => match out {
                                Some(msg) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                // Test dropped the handle: close the socket.
                                None => break,
                            },
                            inbound = source.next() => match inbound {
                                Some(Ok(Message::Text(text))) => {
                                    if from_tx.send(text.to_string()).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = sink.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(_)) | None => break,
                            },
                        }
                    }
                });

                let client = VendorClient {
                    to_client: to_tx,
                    from_client: from_rx,
                };
                if clients_tx.send(client).await.is_err() {
                    break;
                }
            }
        });

        Self { addr, clients }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the engine to dial in.
    pub async fn next_client(&mut self) -> VendorClient {
        timeout(Duration::from_secs(10), self.clients.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("listener alive")
    }
}

// ---------------------------------------------------------------------------
// Binary frame builders
// ---------------------------------------------------------------------------

fn write_common(buf: &mut [u8], mode: u8, exchange: u8, token: u32, seq: u64, ts: u64, raw_price: i32) {
    buf[0] = mode;
    buf[1] = exchange;
    let token_ascii = token.to_string();
    buf[2..2 + token_ascii.len()].copy_from_slice(token_ascii.as_bytes());
    buf[27..35].copy_from_slice(&seq.to_le_bytes());
    buf[35..43].copy_from_slice(&ts.to_le_bytes());
    buf[43..47].copy_from_slice(&raw_price.to_le_bytes());
}

/// A 51-byte mode-1 frame.
pub fn ltp_frame(exchange: u8, token: u32, seq: u64, ts: u64, raw_price: i32) -> Vec<u8> {
    let mut buf = vec![0u8; 51];
    write_common(&mut buf, 1, exchange, token, seq, ts, raw_price);
    buf
}

/// Mode-2 quote field values, raw as on the wire.
#[derive(Clone, Copy, Default)]
pub struct QuoteFields {
    pub last_qty: u64,
    pub raw_avg_price: u64,
    pub volume: u64,
    pub total_buy_qty: f64,
    pub total_sell_qty: f64,
    pub raw_open: u64,
    pub raw_high: u64,
    pub raw_low: u64,
    pub raw_close: u64,
}

fn write_quote(buf: &mut [u8], q: &QuoteFields) {
    buf[51..59].copy_from_slice(&q.last_qty.to_le_bytes());
    buf[59..67].copy_from_slice(&q.raw_avg_price.to_le_bytes());
    buf[67..75].copy_from_slice(&q.volume.to_le_bytes());
    buf[75..83].copy_from_slice(&q.total_buy_qty.to_le_bytes());
    buf[83..91].copy_from_slice(&q.total_sell_qty.to_le_bytes());
    buf[91..99].copy_from_slice(&q.raw_open.to_le_bytes());
    buf[99..107].copy_from_slice(&q.raw_high.to_le_bytes());
    buf[107..115].copy_from_slice(&q.raw_low.to_le_bytes());
    buf[115..123].copy_from_slice(&q.raw_close.to_le_bytes());
}

/// A 123-byte mode-2 frame.
pub fn quote_frame(
    exchange: u8,
    token: u32,
    seq: u64,
    ts: u64,
    raw_price: i32,
    q: &QuoteFields,
) -> Vec<u8> {
    let mut buf = vec![0u8; 123];
    write_common(&mut buf, 2, exchange, token, seq, ts, raw_price);
    write_quote(&mut buf, q);
    buf
}

/// One raw best-five table entry.
#[derive(Clone, Copy)]
pub struct RawLevel {
    pub flag: i16,
    pub qty: i64,
    pub raw_price: i64,
    pub orders: i16,
}

impl RawLevel {
    pub fn buy(raw_price: i64) -> Self {
        Self {
            flag: 1,
            qty: 100,
            raw_price,
            orders: 3,
        }
    }

    pub fn sell(raw_price: i64) -> Self {
        Self {
            flag: 0,
            qty: 100,
            raw_price,
            orders: 3,
        }
    }

    pub fn invalid() -> Self {
        Self {
            flag: -1,
            qty: 0,
            raw_price: 0,
            orders: 0,
        }
    }
}

/// A 379-byte mode-3 frame. `levels` fills the 10-entry best-five table in
/// order; missing entries are marked invalid.
pub fn snap_quote_frame(
    exchange: u8,
    token: u32,
    seq: u64,
    ts: u64,
    raw_price: i32,
    q: &QuoteFields,
    levels: &[RawLevel],
    last_traded_ts: u64,
    oi: u64,
    oi_change_pct: f64,
    raw_circuits: [u64; 4],
) -> Vec<u8> {
    let mut buf = vec![0u8; 379];
    write_common(&mut buf, 3, exchange, token, seq, ts, raw_price);
    write_quote(&mut buf, q);
    buf[123..131].copy_from_slice(&last_traded_ts.to_le_bytes());
    buf[131..139].copy_from_slice(&oi.to_le_bytes());
    buf[139..147].copy_from_slice(&oi_change_pct.to_le_bytes());
    for i in 0..10 {
        let level = levels.get(i).copied().unwrap_or_else(RawLevel::invalid);
        let base = 147 + i * 20;
        buf[base..base + 2].copy_from_slice(&level.flag.to_le_bytes());
        buf[base + 2..base + 10].copy_from_slice(&level.qty.to_le_bytes());
        buf[base + 10..base + 18].copy_from_slice(&level.raw_price.to_le_bytes());
        buf[base + 18..base + 20].copy_from_slice(&level.orders.to_le_bytes());
    }
    buf[347..355].copy_from_slice(&raw_circuits[0].to_le_bytes());
    buf[355..363].copy_from_slice(&raw_circuits[1].to_le_bytes());
    buf[363..371].copy_from_slice(&raw_circuits[2].to_le_bytes());
    buf[371..379].copy_from_slice(&raw_circuits[3].to_le_bytes());
    buf
}

/// A 51-byte acknowledgement frame.
pub fn ack_frame(message_id: &str, status: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 51];
    buf[0] = 1;
    buf[2] = 0x37;
    buf[3..3 + message_id.len().min(4)]
        .copy_from_slice(&message_id.as_bytes()[..message_id.len().min(4)]);
    buf[38..40].copy_from_slice(&status.to_le_bytes());
    buf
}

/// Poll `check` until it passes or the deadline lapses.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}

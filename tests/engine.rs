//! End-to-end scenarios: the full engine against a mock vendor server and
//! the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    ack_frame, ltp_frame, plan, snap_quote_frame, wait_until, MemoryStore, MockVendor, QuoteFields,
    RawLevel,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use smartstream::config::Config;
use smartstream::session::{FeedSession, StaticSessionProvider};
use smartstream::store::PlanEvent;
use smartstream::types::{PlanStatus, TransactionType};
use smartstream::Engine;
use smartstream::FeedError;

fn test_config(url: &str) -> Config {
    Config {
        ws_url: url.to_owned(),
        api_key: "test-key".into(),
        client_code: "C123".into(),
        post_auth_delay: Duration::from_millis(200),
        reconnect_base: Duration::from_millis(100),
        reconnect_multiplier: 1.0,
        dispatch_workers: 2,
        ..Config::default()
    }
}

fn session() -> Arc<StaticSessionProvider> {
    Arc::new(StaticSessionProvider::new(FeedSession {
        jwt: "test-jwt".into(),
        api_key: "test-key".into(),
        client_code: "C123".into(),
        feed_token: "test-feed-token".into(),
    }))
}

fn tokens_of(frame: &serde_json::Value, exchange_type: u64) -> Vec<u64> {
    frame["params"]["tokenList"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|g| g["exchangeType"] == exchange_type)
        .flat_map(|g| g["tokens"].as_array().unwrap())
        .map(|t| t.as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn ltp_tick_triggers_buy_entry_and_publishes() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());
    store.insert_plan(plan("p1", "X", 101, "NSE", TransactionType::BUY, 100.0, 110.0));

    let (_plan_tx, plan_rx) = mpsc::channel(8);
    let engine = Engine::start_with(
        test_config(&vendor.url()),
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut c1 = vendor.next_client().await;
    let mut c2 = vendor.next_client().await;

    // Both connections authenticate first.
    let auth = c1.next_frame().await;
    assert_eq!(auth["action"], 1);
    assert_eq!(auth["params"]["clientCode"], "C123");

    // READY flushes the initial-fill subscription on both connections.
    let sub = c1.next_token_frame(1).await;
    assert_eq!(tokens_of(&sub, 1), vec![101]);
    let sub = c2.next_token_frame(1).await;
    assert_eq!(tokens_of(&sub, 1), vec![101]);

    // Raw 9950 on NSE → 99.50, which touches the BUY entry at 100.
    c1.send_binary(ltp_frame(1, 101, 1, 1_722_500_000_000, 9_950))
        .await;

    wait_until("plan entry trigger", || {
        store
            .plan("p1")
            .is_some_and(|p| p.status == PlanStatus::ENTRY_TRIGGERED)
    })
    .await;
    let saved = store.plan("p1").unwrap();
    assert_eq!(saved.current_price, 99.50);

    wait_until("snapshot + publishes", || {
        store.kv_get("latest-price:X").is_some()
            && !store.published_on("price:update:X").is_empty()
            && !store.published_on("orderplan:update:p1").is_empty()
    })
    .await;
    let snap: serde_json::Value =
        serde_json::from_str(&store.kv_get("latest-price:X").unwrap()).unwrap();
    assert_eq!(snap["last_price"], 99.5);
    assert_eq!(snap["token"], 101);

    engine.shutdown().await;
}

#[tokio::test]
async fn snap_quote_publishes_ordered_depth() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());
    store.insert_plan(plan(
        "p2",
        "NIFTYFUT",
        71933,
        "NFO",
        TransactionType::SELL,
        150.0,
        140.0,
    ));

    let (_plan_tx, plan_rx) = mpsc::channel(8);
    let engine = Engine::start_with(
        test_config(&vendor.url()),
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut c1 = vendor.next_client().await;
    let _c2 = vendor.next_client().await;
    let sub = c1.next_token_frame(1).await;
    assert_eq!(tokens_of(&sub, 2), vec![71933]);

    let levels = vec![
        RawLevel::buy(14_500),
        RawLevel::buy(14_495),
        RawLevel::buy(14_490),
        RawLevel::sell(14_510),
        RawLevel::sell(14_515),
    ];
    c1.send_binary(snap_quote_frame(
        2,
        71933,
        5,
        1_722_500_000_000,
        14_505,
        &QuoteFields::default(),
        &levels,
        1_722_500_000,
        1_000,
        0.5,
        [15_000, 14_000, 16_000, 12_000],
    ))
    .await;

    wait_until("depth publish", || {
        !store.published_on("marketdepth:update:NIFTYFUT").is_empty()
    })
    .await;
    let payload: serde_json::Value =
        serde_json::from_str(&store.published_on("marketdepth:update:NIFTYFUT")[0]).unwrap();
    let buy_prices: Vec<f64> = payload["buy"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["price"].as_f64().unwrap())
        .collect();
    assert_eq!(buy_prices, vec![145.00, 144.95, 144.90]);
    let sell_prices: Vec<f64> = payload["sell"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["price"].as_f64().unwrap())
        .collect();
    assert_eq!(sell_prices, vec![145.10, 145.15]);

    assert!(store.kv_get("marketdepth:NIFTYFUT").is_some());
    assert!(!store.published_on("price:update:NIFTYFUT").is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn reconnect_preserves_subscriptions() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());
    store.insert_plan(plan("p1", "X", 101, "NSE", TransactionType::BUY, 100.0, 110.0));
    store.insert_plan(plan("p2", "Y", 202, "NFO", TransactionType::SELL, 50.0, 40.0));

    let (_plan_tx, plan_rx) = mpsc::channel(8);
    let engine = Engine::start_with(
        test_config(&vendor.url()),
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut c1 = vendor.next_client().await;
    let mut c2 = vendor.next_client().await;
    let _ = c1.next_token_frame(1).await;
    let _ = c2.next_token_frame(1).await;

    // Kill both sockets; the engine must come back with the same tokens.
    drop(c1);
    drop(c2);

    let mut r1 = vendor.next_client().await;
    let mut r2 = vendor.next_client().await;
    for client in [&mut r1, &mut r2] {
        let sub = client.next_token_frame(1).await;
        assert_eq!(tokens_of(&sub, 1), vec![101]);
        assert_eq!(tokens_of(&sub, 2), vec![202]);
    }

    let health = engine.health();
    assert!(health.connections.iter().all(|c| c.reconnects >= 1));
    assert_eq!(health.subscribed_tokens, 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn plan_lifecycle_subscribes_and_unsubscribes() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());

    let (plan_tx, plan_rx) = mpsc::channel(8);
    let engine = Engine::start_with(
        test_config(&vendor.url()),
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut c1 = vendor.next_client().await;
    let mut c2 = vendor.next_client().await;

    store.insert_plan(plan("p3", "Z", 303, "NSE", TransactionType::BUY, 10.0, 20.0));
    plan_tx.send(PlanEvent::Created("p3".into())).await.unwrap();

    for client in [&mut c1, &mut c2] {
        let sub = client.next_token_frame(1).await;
        assert_eq!(tokens_of(&sub, 1), vec![303]);
    }

    plan_tx.send(PlanEvent::Deleted("p3".into())).await.unwrap();
    for client in [&mut c1, &mut c2] {
        let unsub = client.next_token_frame(0).await;
        assert_eq!(tokens_of(&unsub, 1), vec![303]);
    }

    assert_eq!(engine.health().subscribed_tokens, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn ack_307_forces_full_resubscribe_after_delay() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());
    store.insert_plan(plan("p1", "X", 101, "NSE", TransactionType::BUY, 100.0, 110.0));

    let (_plan_tx, plan_rx) = mpsc::channel(8);
    let engine = Engine::start_with(
        test_config(&vendor.url()),
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut c1 = vendor.next_client().await;
    let _c2 = vendor.next_client().await;
    let _ = c1.next_token_frame(1).await;

    let sent_at = Instant::now();
    c1.send_binary(ack_frame("msg1", 307)).await;

    let resub = c1.next_token_frame(1).await;
    let elapsed = sent_at.elapsed();
    assert_eq!(tokens_of(&resub, 1), vec![101]);
    assert!(
        elapsed >= Duration::from_millis(1_800) && elapsed < Duration::from_secs(5),
        "resubscribe after {elapsed:?}, expected ≈2 s"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn stale_feed_forces_health_reconnect() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());
    store.insert_plan(plan("p1", "X", 101, "NSE", TransactionType::BUY, 100.0, 110.0));

    let mut cfg = test_config(&vendor.url());
    cfg.stale_frame_timeout = Duration::from_millis(300);
    cfg.health_check_interval = Duration::from_millis(500);
    cfg.post_auth_delay = Duration::from_millis(100);

    let (_plan_tx, plan_rx) = mpsc::channel(8);
    let engine = Engine::start_with(
        cfg,
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut c1 = vendor.next_client().await;
    let mut c2 = vendor.next_client().await;
    let _ = c1.next_token_frame(1).await;
    let _ = c2.next_token_frame(1).await;

    // Send nothing: the sockets stay open but the frame clock goes stale,
    // so the health timer must tear both connections down.
    let mut r1 = vendor.next_client().await;
    let auth = r1.next_frame().await;
    assert_eq!(auth["params"]["clientCode"], "C123");
    let _r2 = vendor.next_client().await;

    wait_until("reconnect counted", || {
        engine.health().connections.iter().all(|c| c.reconnects >= 1)
    })
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn repeated_auth_rejections_surface_unrecoverable() {
    let mut vendor = MockVendor::start().await;
    let store = Arc::new(MemoryStore::default());

    let mut cfg = test_config(&vendor.url());
    // Keep the READY timer far away so the rejection always lands first.
    cfg.post_auth_delay = Duration::from_secs(5);

    let (_plan_tx, plan_rx) = mpsc::channel(8);
    let mut engine = Engine::start_with(
        cfg,
        session(),
        Arc::clone(&store),
        Arc::clone(&store),
        plan_rx,
    )
    .await;

    let mut rejected = Vec::new();
    let fatal = timeout(Duration::from_secs(15), async {
        loop {
            tokio::select! {
                client = vendor.next_client() => {
                    client
                        .send_text(r#"{"success":false,"message":"invalid token"}"#)
                        .await;
                    rejected.push(client);
                }
                err = engine.wait() => return err,
            }
        }
    })
    .await
    .expect("engine should give up within the window");

    assert!(matches!(fatal, Some(FeedError::AuthRejected(_))));
    engine.shutdown().await;
}

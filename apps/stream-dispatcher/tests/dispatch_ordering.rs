//! Dispatch Ordering Integration Tests
//!
//! Tests before / normal / after precedence, execution modes and failure
//! isolation end to end: registry, resolution, planning and the category
//! dispatch loop over the in-memory transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use stream_dispatcher::domain::streaming::{Trade, TradeDirection};
use stream_dispatcher::{
    AsyncHandler, BlockingHandler, Category, Declaration, DeclaredHandler, DispatchEngine,
    EngineConfig, HandlerRegistry, HandlerResult, InMemoryTransport, InstrumentInfo,
    InstrumentRef, InstrumentSelector, InstrumentType, RegistrationBuilder, RunningEngine,
    StaticInstrumentLookup, StreamEvent, async_fn, blocking_fn,
};
use tokio::sync::Barrier;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<String>>>;

fn catalog() -> Vec<InstrumentInfo> {
    [
        ("SiH4", "SPBFUT", "FUTSI0324000", "uid-sih4", InstrumentType::Future),
        ("SBER", "TQBR", "BBG004730N88", "uid-sber", InstrumentType::Share),
        ("LKOH", "TQBR", "BBG004731032", "uid-lkoh", InstrumentType::Share),
    ]
    .into_iter()
    .map(|(ticker, class_code, figi, uid, instrument_type)| InstrumentInfo {
        ticker: ticker.to_string(),
        class_code: class_code.to_string(),
        figi: figi.to_string(),
        instrument_uid: uid.to_string(),
        instrument_type,
    })
    .collect()
}

fn trade(ticker: &str) -> StreamEvent {
    let info = catalog()
        .into_iter()
        .find(|info| info.ticker == ticker)
        .unwrap();
    StreamEvent::Trade(Trade {
        instrument: InstrumentRef::new(info.figi, info.instrument_uid),
        direction: TradeDirection::Buy,
        price: Decimal::new(9_150_000, 2),
        quantity: 1,
        time: Utc::now(),
    })
}

fn uid_of(event: &StreamEvent) -> String {
    event
        .as_trade()
        .and_then(|trade| trade.instrument.instrument_uid.clone())
        .unwrap_or_default()
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn recording(log: &Log, label: &'static str) -> impl AsyncHandler {
    let log = Arc::clone(log);
    async_fn(move |_event| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(label.to_string());
            anyhow::Ok(())
        }
    })
}

fn recording_blocking(log: &Log, label: &'static str) -> impl BlockingHandler {
    let log = Arc::clone(log);
    blocking_fn(move |_event| {
        log.lock().push(label.to_string());
        Ok(())
    })
}

struct Harness {
    lookup: Arc<StaticInstrumentLookup>,
    transport: Arc<InMemoryTransport>,
    running: RunningEngine,
}

async fn start(registry: HandlerRegistry) -> Harness {
    let lookup = Arc::new(StaticInstrumentLookup::new(catalog()));
    let transport = Arc::new(InMemoryTransport::new());

    let engine = DispatchEngine::new(lookup.clone(), transport.clone(), &EngineConfig::default());
    let prepared = engine.prepare(&registry.freeze()).await.unwrap();
    let running = engine.start(prepared, CancellationToken::new());

    timeout(
        Duration::from_secs(5),
        transport.wait_for_open(Category::Trades, 1),
    )
    .await
    .expect("trades stream should open");

    Harness {
        lookup,
        transport,
        running,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Declared handlers
// =============================================================================

struct BlockingDollar {
    log: Log,
}

impl DeclaredHandler for BlockingDollar {
    fn declaration(&self) -> Declaration {
        Declaration::trade(InstrumentSelector::ticker("SiH4").with_type(InstrumentType::Future))
    }
}

impl BlockingHandler for BlockingDollar {
    fn handle_blocking(&self, _event: &StreamEvent) -> HandlerResult {
        self.log.lock().push("blocking-dollar".to_string());
        Ok(())
    }
}

struct AsyncDollar {
    log: Log,
}

impl DeclaredHandler for AsyncDollar {
    fn declaration(&self) -> Declaration {
        Declaration::trade("SiH4")
    }
}

#[async_trait]
impl AsyncHandler for AsyncDollar {
    async fn handle(&self, _event: Arc<StreamEvent>) -> HandlerResult {
        self.log.lock().push("async-dollar".to_string());
        Ok(())
    }
}

struct CommonBefore {
    log: Log,
}

impl DeclaredHandler for CommonBefore {
    fn declaration(&self) -> Declaration {
        Declaration::all_trades().before_each()
    }
}

#[async_trait]
impl AsyncHandler for CommonBefore {
    async fn handle(&self, _event: Arc<StreamEvent>) -> HandlerResult {
        self.log.lock().push("before".to_string());
        Ok(())
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn before_handler_sees_trade_before_both_dollar_handlers() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();
    registry
        .declare_blocking(BlockingDollar { log: log.clone() })
        .unwrap()
        .declare_async(AsyncDollar { log: log.clone() })
        .unwrap()
        .declare_async(CommonBefore { log: log.clone() })
        .unwrap();

    let harness = start(registry).await;
    assert_eq!(harness.lookup.lookup_count(), 2);

    assert!(harness.transport.publish(trade("SiH4")));
    wait_until(|| log.lock().len() == 3).await;

    let seen = log.lock().clone();
    assert_eq!(seen[0], "before");
    assert!(seen.contains(&"blocking-dollar".to_string()));
    assert!(seen.contains(&"async-dollar".to_string()));

    harness.running.shutdown().await;
}

#[tokio::test]
async fn after_handler_waits_for_every_normal_handler() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();

    for (label, delay_ms) in [("slow", 80_u64), ("medium", 40), ("fast", 0)] {
        let log = Arc::clone(&log);
        registry.register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .named(label)
                .create_async_handler(async_fn(move |_event| {
                    let log = Arc::clone(&log);
                    async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        log.lock().push(label.to_string());
                        anyhow::Ok(())
                    }
                }))
                .unwrap(),
        );
    }
    registry.register(
        RegistrationBuilder::trades()
            .run_after_each()
            .create_async_handler(recording(&log, "after"))
            .unwrap(),
    );
    registry.register(
        RegistrationBuilder::trades()
            .run_before_each()
            .create_blocking_handler(recording_blocking(&log, "before"))
            .unwrap(),
    );

    let harness = start(registry).await;
    harness.transport.publish(trade("SBER"));
    wait_until(|| log.lock().len() == 5).await;

    let seen = log.lock().clone();
    assert_eq!(seen.first().unwrap(), "before");
    assert_eq!(seen.last().unwrap(), "after");

    harness.running.shutdown().await;
}

#[tokio::test]
async fn sequential_blocking_handlers_keep_registration_order() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();
    for label in ["first", "second", "third"] {
        registry.register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .create_blocking_handler(recording_blocking(&log, label))
                .unwrap(),
        );
    }

    let harness = start(registry).await;
    harness.transport.publish(trade("SBER"));
    harness.transport.publish(trade("SBER"));
    wait_until(|| log.lock().len() == 6).await;

    let seen = log.lock().clone();
    assert_eq!(&seen[..3], ["first", "second", "third"]);
    assert_eq!(&seen[3..], ["first", "second", "third"]);

    harness.running.shutdown().await;
}

#[tokio::test]
async fn async_handlers_run_concurrently() {
    // Each handler waits for the others; sequential execution would stall.
    let barrier = Arc::new(Barrier::new(3));
    let log = new_log();
    let mut registry = HandlerRegistry::new();

    for label in ["a", "b", "c"] {
        let barrier = Arc::clone(&barrier);
        let log = Arc::clone(&log);
        registry.register(
            RegistrationBuilder::trades()
                .with_tickers(["LKOH"])
                .create_async_handler(async_fn(move |_event| {
                    let barrier = Arc::clone(&barrier);
                    let log = Arc::clone(&log);
                    async move {
                        barrier.wait().await;
                        log.lock().push(label.to_string());
                        anyhow::Ok(())
                    }
                }))
                .unwrap(),
        );
    }

    let harness = start(registry).await;
    harness.transport.publish(trade("LKOH"));
    wait_until(|| log.lock().len() == 3).await;

    harness.running.shutdown().await;
}

#[tokio::test]
async fn parallel_blocking_handlers_do_not_wait_for_each_other() {
    let barrier = Arc::new(std::sync::Barrier::new(2));
    let log = new_log();
    let mut registry = HandlerRegistry::new();

    for label in ["left", "right"] {
        let barrier = Arc::clone(&barrier);
        let log = Arc::clone(&log);
        registry.register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .parallel_blocking()
                .create_blocking_handler(blocking_fn(move |_event| {
                    barrier.wait();
                    log.lock().push(label.to_string());
                    Ok(())
                }))
                .unwrap(),
        );
    }

    let harness = start(registry).await;
    harness.transport.publish(trade("SBER"));
    wait_until(|| log.lock().len() == 2).await;

    harness.running.shutdown().await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn failing_and_panicking_handlers_do_not_affect_siblings() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .create_async_handler(async_fn(|_event| async {
                    Err::<(), _>(anyhow::anyhow!("order service unavailable"))
                }))
                .unwrap(),
        )
        .register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .create_blocking_handler(blocking_fn(|_event| panic!("bad handler")))
                .unwrap(),
        )
        .register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .create_async_handler(recording(&log, "healthy"))
                .unwrap(),
        );

    let harness = start(registry).await;
    let status = harness.running.status().get(Category::Trades).unwrap();

    harness.transport.publish(trade("SBER"));
    harness.transport.publish(trade("SBER"));
    wait_until(|| log.lock().len() == 2 && status.handler_failures() == 4).await;

    assert_eq!(status.events_dispatched(), 2);

    harness.running.shutdown().await;
}

#[tokio::test]
async fn failing_before_handler_with_halt_skips_the_event() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            RegistrationBuilder::trades()
                .run_before_each()
                .halt_on_failure()
                .create_blocking_handler(blocking_fn(|event| {
                    if uid_of(event) == "uid-sber" {
                        anyhow::bail!("rejected");
                    }
                    Ok(())
                }))
                .unwrap(),
        )
        .register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER", "LKOH"])
                .create_blocking_handler({
                    let log = Arc::clone(&log);
                    blocking_fn(move |event| {
                        log.lock().push(uid_of(event));
                        Ok(())
                    })
                })
                .unwrap(),
        );

    let harness = start(registry).await;
    harness.transport.publish(trade("SBER"));
    harness.transport.publish(trade("LKOH"));
    wait_until(|| !log.lock().is_empty()).await;

    // The stream is ordered, so the SBER trade was handled before LKOH.
    assert_eq!(log.lock().clone(), vec!["uid-lkoh".to_string()]);
    let status = harness.running.status().get(Category::Trades).unwrap();
    assert_eq!(status.handler_failures(), 1);

    harness.running.shutdown().await;
}

#[tokio::test]
async fn failing_before_handler_without_halt_lets_the_event_through() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            RegistrationBuilder::trades()
                .run_before_each()
                .create_async_handler(async_fn(|_event| async {
                    Err::<(), _>(anyhow::anyhow!("audit failed"))
                }))
                .unwrap(),
        )
        .register(
            RegistrationBuilder::trades()
                .with_tickers(["SBER"])
                .create_async_handler(recording(&log, "normal"))
                .unwrap(),
        );

    let harness = start(registry).await;
    harness.transport.publish(trade("SBER"));
    wait_until(|| log.lock().len() == 1).await;

    harness.running.shutdown().await;
}

#[tokio::test]
async fn unsubscribed_instruments_are_not_routed() {
    let log = new_log();
    let mut registry = HandlerRegistry::new();
    registry.register(
        RegistrationBuilder::trades()
            .with_tickers(["SBER"])
            .create_async_handler(recording(&log, "sber"))
            .unwrap(),
    );

    let harness = start(registry).await;
    let status = harness.running.status().get(Category::Trades).unwrap();

    harness.transport.publish(trade("LKOH"));
    harness.transport.publish(trade("SBER"));
    wait_until(|| log.lock().len() == 1).await;

    assert_eq!(status.events_received(), 2);
    assert_eq!(status.events_dispatched(), 1);

    harness.running.shutdown().await;
}

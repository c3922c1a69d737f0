//! End-to-end passes over in-memory exchanges, daemons and sinks.

use std::collections::HashMap;
use std::time::Duration;

use profitswitch::control::{DirectiveSink, TcpControlClient};
use profitswitch::daemon::DaemonInfo;
use profitswitch::engine::aggregator::{AggregatorSettings, MarketAggregator};
use profitswitch::engine::metrics::NetworkMetricsCollector;
use profitswitch::engine::profitability::mining_rates;
use profitswitch::engine::scheduler::Pipeline;
use profitswitch::exchanges::MarketSource;
use profitswitch::registry::CoinRegistry;
use profitswitch::types::*;

use crate::mock_source::{MockDaemon, MockSource, RecordingSink};

/// Reference unit 2000 for both test algorithms, so target "2" is
/// difficulty 1000 and target "1" is difficulty 2000.
const UNIT: &str = "7d0";
const DIFF_1000: &str = "2";
const DIFF_2000: &str = "1";

fn build(
    coins: &[(&str, &str, &str)],
    sources: Vec<Box<dyn MarketSource>>,
    daemons: HashMap<String, Box<dyn DaemonInfo>>,
    sink: Box<dyn DirectiveSink>,
) -> Pipeline {
    build_with_timeout(coins, sources, daemons, sink, Duration::from_secs(2))
}

fn build_with_timeout(
    coins: &[(&str, &str, &str)],
    sources: Vec<Box<dyn MarketSource>>,
    daemons: HashMap<String, Box<dyn DaemonInfo>>,
    sink: Box<dyn DirectiveSink>,
    timeout: Duration,
) -> Pipeline {
    let registry = CoinRegistry::new(
        coins
            .iter()
            .map(|(name, symbol, algo)| CoinStatus::new(name, symbol, algo)),
    );
    let units = HashMap::from([
        ("x".to_string(), UNIT.to_string()),
        ("y".to_string(), UNIT.to_string()),
    ]);

    Pipeline::new(
        registry,
        sources,
        daemons,
        sink,
        MarketAggregator::new(AggregatorSettings {
            depth_factor: 0.8,
            request_timeout: timeout,
            max_concurrent_requests: 4,
        }),
        NetworkMetricsCollector::new(&units, &HashMap::new(), timeout, 4).unwrap(),
    )
}

fn daemons(list: &[(&str, &MockDaemon)]) -> HashMap<String, Box<dyn DaemonInfo>> {
    list.iter()
        .map(|(symbol, d)| (symbol.to_string(), d.boxed()))
        .collect()
}

fn same_daemons(symbols: &[&str]) -> HashMap<String, Box<dyn DaemonInfo>> {
    symbols
        .iter()
        .map(|s| (s.to_string(), MockDaemon::new(DIFF_1000, 10.0).boxed()))
        .collect()
}

#[tokio::test]
async fn test_end_to_end_picks_higher_yield() {
    let source = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0001)
        .with_market("BBB", QuoteCurrency::Btc, 0.00012);
    let a = MockDaemon::new(DIFF_1000, 10.0);
    let b = MockDaemon::new(DIFF_2000, 25.0);
    let sink = RecordingSink::new();

    let mut p = build(
        &[("coin-a", "AAA", "x"), ("coin-b", "BBB", "x")],
        vec![source.boxed()],
        daemons(&[("AAA", &a), ("BBB", &b)]),
        sink.boxed(),
    );
    let report = p.run_pass().await.unwrap();

    let coin_a = p.registry().coin("AAA").unwrap();
    let coin_b = p.registry().coin("BBB").unwrap();
    assert_eq!(coin_a.difficulty, 1000.0);
    assert_eq!(coin_b.difficulty, 2000.0);
    assert!((coin_b.reward - 25.0).abs() < 1e-9);

    let score_a = 0.0001 * mining_rates(1000.0, 10.0).unwrap().coins_per_hash_per_hour;
    let score_b = 0.00012 * mining_rates(2000.0, 25.0).unwrap().coins_per_hash_per_hour;
    assert!(score_b > score_a);
    assert!((coin_a.best_score.unwrap() - score_a).abs() < 1e-15);
    assert!((coin_b.best_score.unwrap() - score_b).abs() < 1e-15);

    assert_eq!(report.decisions.len(), 1);
    assert!((report.decisions[0].score - score_b).abs() < 1e-15);
    assert_eq!(sink.switches(), vec![("coin-b".to_string(), "x".to_string())]);
    assert_eq!(
        sink.attempts()[0].to_line().unwrap(),
        "{\"command\":\"coinswitch\",\"params\":[\"coin-b\"],\"options\":{\"algorithm\":\"x\"}}\n"
    );
}

#[tokio::test]
async fn test_failed_exchange_keeps_stale_data_and_other_groups() {
    let poloniex = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0002)
        .with_market("BBB", QuoteCurrency::Btc, 0.0001);
    let bittrex = MockSource::new(ExchangeKind::Bittrex)
        .with_market("BBB", QuoteCurrency::Btc, 0.00015)
        .with_market("CCC", QuoteCurrency::Btc, 0.0001)
        .with_market("DDD", QuoteCurrency::Btc, 0.00005);
    let sink = RecordingSink::new();

    let mut p = build(
        &[
            ("coin-a", "AAA", "x"),
            ("coin-b", "BBB", "x"),
            ("coin-c", "CCC", "y"),
            ("coin-d", "DDD", "y"),
        ],
        vec![poloniex.boxed(), bittrex.boxed()],
        same_daemons(&["AAA", "BBB", "CCC", "DDD"]),
        sink.boxed(),
    );

    let first = p.run_pass().await.unwrap();
    assert_eq!(first.sources_ok(), 2);
    assert!(first.decisions.iter().all(|d| !d.stale));

    poloniex.fail_ticker("HTTP 503 Service Unavailable");
    let second = p.run_pass().await.unwrap();

    assert_eq!(second.sources_failed(), 1);
    assert_eq!(second.decisions.len(), 2);

    // The stale Poloniex cell is still scored at its old price, not as 0,
    // so AAA keeps beating BBB's fresh Bittrex price.
    let x = second.decisions.iter().find(|d| d.algorithm == "x").unwrap();
    assert_eq!(x.symbol, "AAA");
    assert_eq!(x.exchange, ExchangeKind::Poloniex);
    assert!(x.stale);

    let cell = p
        .registry()
        .coin("AAA")
        .unwrap()
        .market(ExchangeKind::Poloniex, QuoteCurrency::Btc)
        .unwrap();
    assert_eq!(cell.pass, 1);
    assert!((cell.weighted_bid.unwrap() - 0.0002).abs() < 1e-15);

    let y = second.decisions.iter().find(|d| d.algorithm == "y").unwrap();
    assert_eq!(y.symbol, "CCC");
    assert!(!y.stale);

    poloniex.recover();
    let third = p.run_pass().await.unwrap();
    assert_eq!(third.sources_failed(), 0);
    assert!(third.decisions.iter().all(|d| !d.stale));

    assert_eq!(sink.attempts().len(), 6);
}

#[tokio::test]
async fn test_single_coin_algorithm_is_never_considered() {
    let source = MockSource::new(ExchangeKind::Stex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0001)
        .with_market("BBB", QuoteCurrency::Btc, 0.0001)
        .with_market("ZZZ", QuoteCurrency::Btc, 5.0);
    let sink = RecordingSink::new();

    let mut p = build(
        &[
            ("coin-a", "AAA", "x"),
            ("coin-z", "ZZZ", "solo"),
            ("coin-b", "BBB", "x"),
        ],
        vec![source.boxed()],
        same_daemons(&["AAA", "BBB", "ZZZ"]),
        sink.boxed(),
    );

    assert_eq!(p.registry().groups().len(), 1);
    assert!(p.registry().algorithm_of("ZZZ").is_none());

    let report = p.run_pass().await.unwrap();
    assert_eq!(report.decisions.len(), 1);
    assert_eq!(sink.switches(), vec![("coin-a".to_string(), "x".to_string())]);
    assert!(source.book_requests().iter().all(|(_, s)| s != "ZZZ"));
}

#[tokio::test]
async fn test_no_market_data_means_no_directive() {
    let source = MockSource::new(ExchangeKind::Crex24).with_market("AAA", QuoteCurrency::Btc, 0.0001);
    source.fail_ticker("connection reset");
    let sink = RecordingSink::new();

    let mut p = build(
        &[("coin-a", "AAA", "x"), ("coin-b", "BBB", "x")],
        vec![source.boxed()],
        same_daemons(&["AAA", "BBB"]),
        sink.boxed(),
    );
    let report = p.run_pass().await.unwrap();

    assert_eq!(report.sources_failed(), 1);
    assert_eq!(report.rated_coins, 2);
    assert!(report.decisions.is_empty());
    assert_eq!(report.groups_without_data, 1);
    assert!(sink.attempts().is_empty());
}

#[tokio::test]
async fn test_shallow_book_is_skipped_not_zeroed() {
    // BBB's only bid level sits below bid × depth, so it has no weighted
    // bid and must not be scored at all.
    let source = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0000001)
        .with_book(
            "BBB",
            QuoteCurrency::Btc,
            0.001,
            vec![BidLevel { price: 0.0001, quantity: 10.0 }],
        );
    let sink = RecordingSink::new();

    let mut p = build(
        &[("coin-a", "AAA", "x"), ("coin-b", "BBB", "x")],
        vec![source.boxed()],
        same_daemons(&["AAA", "BBB"]),
        sink.boxed(),
    );
    p.run_pass().await.unwrap();

    let bbb = p.registry().coin("BBB").unwrap();
    assert_eq!(
        bbb.market(ExchangeKind::Poloniex, QuoteCurrency::Btc).unwrap().weighted_bid,
        None
    );
    assert_eq!(bbb.best_score, None);
    assert_eq!(sink.switches(), vec![("coin-a".to_string(), "x".to_string())]);
}

#[tokio::test]
async fn test_secondary_quote_scored_through_cross_rate() {
    // AAA trades only against LTC; LTC/BTC on the same exchange is 0.01.
    let source = MockSource::new(ExchangeKind::Bittrex)
        .with_market("LTC", QuoteCurrency::Btc, 0.01)
        .with_market("AAA", QuoteCurrency::Ltc, 0.05)
        .with_market("BBB", QuoteCurrency::Btc, 0.0004);
    let sink = RecordingSink::new();

    let mut p = build(
        &[("coin-a", "AAA", "x"), ("coin-b", "BBB", "x")],
        vec![source.boxed()],
        same_daemons(&["AAA", "BBB"]),
        sink.boxed(),
    );
    let report = p.run_pass().await.unwrap();

    let cell = p
        .registry()
        .coin("AAA")
        .unwrap()
        .market(ExchangeKind::Bittrex, QuoteCurrency::Ltc)
        .unwrap();
    assert_eq!(cell.cross_rate, Some(0.01));

    // 0.05 LTC × 0.01 = 0.0005 BTC beats BBB's 0.0004 BTC.
    assert_eq!(report.decisions[0].symbol, "AAA");
    assert_eq!(report.decisions[0].quote, QuoteCurrency::Ltc);
}

#[tokio::test]
async fn test_daemon_failure_keeps_last_metrics() {
    let source = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0001)
        .with_market("BBB", QuoteCurrency::Btc, 0.0001);
    let a = MockDaemon::new(DIFF_2000, 10.0);
    let b = MockDaemon::new(DIFF_1000, 10.0);
    let sink = RecordingSink::new();

    let mut p = build(
        &[("coin-a", "AAA", "x"), ("coin-b", "BBB", "x")],
        vec![source.boxed()],
        daemons(&[("AAA", &a), ("BBB", &b)]),
        sink.boxed(),
    );
    p.run_pass().await.unwrap();

    a.fail();
    let report = p.run_pass().await.unwrap();

    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.updated, 1);
    assert_eq!(p.registry().coin("AAA").unwrap().difficulty, 2000.0);
    assert_eq!(report.rated_coins, 2);
    assert_eq!(report.decisions[0].symbol, "BBB");
}

#[tokio::test]
async fn test_refused_directive_does_not_block_other_groups() {
    let source = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0001)
        .with_market("CCC", QuoteCurrency::Btc, 0.0001);
    let sink = RecordingSink::new();
    sink.refuse("x");

    let mut p = build(
        &[
            ("coin-a", "AAA", "x"),
            ("coin-b", "BBB", "x"),
            ("coin-c", "CCC", "y"),
            ("coin-d", "DDD", "y"),
        ],
        vec![source.boxed()],
        same_daemons(&["AAA", "BBB", "CCC", "DDD"]),
        sink.boxed(),
    );
    let report = p.run_pass().await.unwrap();

    assert_eq!(report.directives.failed, 1);
    assert_eq!(report.directives.sent, 1);
    assert_eq!(
        sink.switches(),
        vec![
            ("coin-a".to_string(), "x".to_string()),
            ("coin-c".to_string(), "y".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_directive_reaches_tcp_coordinator() {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let coordinator = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut line = String::new();
        socket.read_to_string(&mut line).await.unwrap();
        line
    });

    let source = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0001)
        .with_market("BBB", QuoteCurrency::Btc, 0.0002);
    let sink = TcpControlClient::new("127.0.0.1", port, Duration::from_secs(2));

    let mut p = build(
        &[("coin-a", "AAA", "x"), ("coin-b", "BBB", "x")],
        vec![source.boxed()],
        same_daemons(&["AAA", "BBB"]),
        Box::new(sink),
    );
    let report = p.run_pass().await.unwrap();
    assert_eq!(report.directives.sent, 1);

    assert_eq!(
        coordinator.await.unwrap(),
        "{\"command\":\"coinswitch\",\"params\":[\"coin-b\"],\"options\":{\"algorithm\":\"x\"}}\n"
    );
}

#[tokio::test]
async fn test_unresponsive_exchange_and_daemon_time_out_softly() {
    let poloniex = MockSource::new(ExchangeKind::Poloniex)
        .with_market("AAA", QuoteCurrency::Btc, 0.0002)
        .with_market("BBB", QuoteCurrency::Btc, 0.0001);
    let bittrex = MockSource::new(ExchangeKind::Bittrex)
        .with_market("CCC", QuoteCurrency::Btc, 0.0001)
        .with_market("DDD", QuoteCurrency::Btc, 0.00005);
    let aaa = MockDaemon::new(DIFF_1000, 10.0);
    let mut all = same_daemons(&["BBB", "CCC", "DDD"]);
    all.insert("AAA".to_string(), aaa.boxed());
    let sink = RecordingSink::new();

    let mut p = build_with_timeout(
        &[
            ("coin-a", "AAA", "x"),
            ("coin-b", "BBB", "x"),
            ("coin-c", "CCC", "y"),
            ("coin-d", "DDD", "y"),
        ],
        vec![poloniex.boxed(), bittrex.boxed()],
        all,
        sink.boxed(),
        Duration::from_millis(50),
    );
    p.run_pass().await.unwrap();

    poloniex.stall_ticker();
    aaa.stall();
    let report = p.run_pass().await.unwrap();

    assert_eq!(report.sources_ok(), 1);
    assert!(!report.sources[0].ticker_ok);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.updated, 3);

    // AAA keeps its pass-1 price and difficulty, flagged stale.
    let coin_a = p.registry().coin("AAA").unwrap();
    assert_eq!(coin_a.difficulty, 1000.0);
    assert_eq!(coin_a.market(ExchangeKind::Poloniex, QuoteCurrency::Btc).unwrap().pass, 1);

    assert_eq!(report.decisions.len(), 2);
    let x = report.decisions.iter().find(|d| d.algorithm == "x").unwrap();
    assert_eq!(x.symbol, "AAA");
    assert!(x.stale);
    let y = report.decisions.iter().find(|d| d.algorithm == "y").unwrap();
    assert_eq!(y.symbol, "CCC");
    assert!(!y.stale);
}

//! 对账器与幽灵订单防护：模拟盘网关 + 内存库的端到端收敛测试

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use coin_quant::app_config::AppConfig;
use coin_quant::exchange::dto::{OrderRequest, OrderUpdate, Product, Side, WireOrderKind};
use coin_quant::exchange::signer::Credentials;
use coin_quant::exchange::ExchangeGateway;
use coin_quant::trading::model::order::{OrderEntity, OrderStatus};
use coin_quant::trading::model::Store;
use coin_quant::trading::services::{OrderService, Reconciler, RiskService};

fn product() -> Product {
    Product {
        product_id: "BTC-USD".into(),
        base_currency: "BTC".into(),
        quote_currency: "USD".into(),
        base_increment: dec!(0.00000001),
        quote_increment: dec!(0.01),
        base_min_size: dec!(0.0001),
        quote_min_size: dec!(1),
        view_only: false,
        trading_disabled: false,
        status: "online".into(),
    }
}

struct Harness {
    store: Store,
    gateway: Arc<ExchangeGateway>,
    orders: Arc<OrderService>,
    reconciler: Arc<Reconciler>,
}

/// 模拟盘环境：order_max_age 给 0 表示"超过一秒即超龄"
async fn harness(fill_delay_ms: i64, order_max_age_secs: i64) -> Harness {
    let cfg = AppConfig::default_for_test();
    let store = Store::connect(":memory:").await.unwrap();
    let gateway = Arc::new(
        ExchangeGateway::new(Credentials::paper(), true, 30).with_paper_fill_delay(fill_delay_ms),
    );
    let risk = Arc::new(RiskService::new(cfg.risk.clone()));
    let orders = Arc::new(OrderService::new(
        store.clone(),
        gateway.clone(),
        risk,
        cfg.order.clone(),
        cfg.risk.clone(),
        Arc::new(AtomicBool::new(false)),
        "momentum".into(),
    ));
    let catalog = Arc::new(DashMap::new());
    catalog.insert("BTC-USD".to_string(), product());
    let reconciler = Arc::new(Reconciler::new(
        orders.clone(),
        catalog,
        order_max_age_secs,
    ));
    Harness {
        store,
        gateway,
        orders,
        reconciler,
    }
}

/// 模拟买入路径的"写库 → 发单 → 回执"前半段，然后人为崩溃
async fn submit_entry(h: &Harness, client_id: &str, size: Decimal) -> String {
    let mut order = OrderEntity::new_submitted(
        client_id.to_string(),
        "BTC-USD".into(),
        Side::Buy,
        WireOrderKind::LimitGtcPostOnly,
        Some(dec!(50000)),
        size,
    );
    order.limit_price = Some(dec!(50000));
    order.metadata = serde_json::json!({
        "stop_loss": "49250.00",
        "take_profit": "51500.00",
        "strategy": "momentum",
    });
    h.store.upsert_order(&order).await.unwrap();

    let ack = h
        .gateway
        .place_order(&OrderRequest {
            client_order_id: client_id.to_string(),
            product_id: "BTC-USD".into(),
            side: Side::Buy,
            kind: WireOrderKind::LimitGtcPostOnly,
            base_size: size,
            limit_price: Some(dec!(50000)),
            stop_price: None,
            post_only: true,
        })
        .await
        .unwrap();
    h.store
        .mark_order_accepted(client_id, &ack.exchange_order_id)
        .await
        .unwrap();
    ack.exchange_order_id
}

#[tokio::test]
async fn ghost_order_cancelled_after_timeout() {
    // 限价单一直不成交：超龄后对账器撤单并确认，不产生持仓
    let h = harness(3_600_000, 0).await; // 1 小时成交延迟 ≈ 永不成交
    submit_entry(&h, "ghost-1", dec!(0.01)).await;
    // 让订单年龄超过 0 秒的对账上限
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

    h.reconciler.sweep().await.unwrap();

    let order = h.store.get_order("ghost-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(h.store.get_open_position("BTC-USD").await.unwrap().is_none());

    // "崩溃后重启再对账"：再次扫描收敛到同样的状态（幂等）
    h.reconciler.sweep().await.unwrap();
    let order = h.store.get_order("ghost-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(h.store.get_open_position("BTC-USD").await.unwrap().is_none());
}

#[tokio::test]
async fn filled_entry_opens_position_and_brackets() {
    // 入场单成交后（即便主路径已崩溃），对账器补开仓并安装括号单
    let h = harness(10, 3600).await;
    let exchange_id = submit_entry(&h, "entry-1", dec!(0.01)).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    h.reconciler.sweep().await.unwrap();

    let order = h.store.get_order("entry-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_size, dec!(0.01));

    let position = h
        .store
        .get_open_position("BTC-USD")
        .await
        .unwrap()
        .expect("应补开仓");
    assert_eq!(position.entry_order_id, "entry-1");
    assert!(position.stop_order_id.is_some(), "止损括号单应已安装");
    assert!(position.take_profit_order_id.is_some(), "止盈括号单应已安装");
    assert!(!position.unprotected);

    // 幂等：重复扫描不产生第二个持仓或重复成交
    h.reconciler.sweep().await.unwrap();
    let order2 = h.store.get_order("entry-1").await.unwrap().unwrap();
    assert_eq!(order2.filled_size, dec!(0.01));
    assert_eq!(h.store.list_open_positions().await.unwrap().len(), 1);

    // user 频道重复推送同样幂等
    h.reconciler
        .handle_update(&OrderUpdate {
            exchange_order_id: exchange_id,
            client_order_id: Some("entry-1".into()),
            product_id: "BTC-USD".into(),
            status: "FILLED".into(),
            cumulative_filled_size: dec!(0.01),
            average_filled_price: dec!(50000),
        })
        .await
        .unwrap();
    assert_eq!(h.store.list_open_positions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn sell_path_cancels_brackets_and_closes() {
    // 离场：撤括号单 → 市价卖 → 平仓落库
    let h = harness(10, 3600).await;
    submit_entry(&h, "entry-2", dec!(0.01)).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    h.reconciler.sweep().await.unwrap();

    let position = h.store.get_open_position("BTC-USD").await.unwrap().unwrap();
    h.orders
        .execute_sell(
            &position,
            coin_quant::trading::services::ExitReason::SignalProfitExit,
        )
        .await
        .unwrap();

    assert!(h.store.get_open_position("BTC-USD").await.unwrap().is_none());
    let trades = h.store.list_trades_since(1).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(
        trades[0].exit_reason.as_deref(),
        Some("signal_profit_exit")
    );

    // 括号单应已不再处于非终态
    let stop = h
        .store
        .get_order(position.stop_order_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stop.status.is_terminal());
}

#[tokio::test]
async fn never_sent_order_is_rejected_by_sweep() {
    // 写库后、发单前崩溃：交易所没有该 client_id，超龄后安全作废
    let h = harness(10, 0).await;
    let order = OrderEntity::new_submitted(
        "never-sent".into(),
        "BTC-USD".into(),
        Side::Buy,
        WireOrderKind::LimitGtcPostOnly,
        Some(dec!(50000)),
        dec!(0.01),
    );
    h.store.upsert_order(&order).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

    h.reconciler.sweep().await.unwrap();

    let order = h.store.get_order("never-sent").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(h.store.get_open_position("BTC-USD").await.unwrap().is_none());
}

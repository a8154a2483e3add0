//! 存储层不变量测试：终态单调性、单品种单持仓、成交幂等、平仓事务

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use coin_quant::exchange::dto::{Liquidity, Side, WireOrderKind};
use coin_quant::trading::model::order::{FillEntity, OrderEntity, OrderStatus};
use coin_quant::trading::model::{cost_basis, Store};

async fn memory_store() -> Store {
    Store::connect(":memory:").await.expect("内存库初始化失败")
}

fn limit_buy(client_id: &str, product: &str, price: Decimal, size: Decimal) -> OrderEntity {
    OrderEntity::new_submitted(
        client_id.to_string(),
        product.to_string(),
        Side::Buy,
        WireOrderKind::LimitGtcPostOnly,
        Some(price),
        size,
    )
}

fn fill(id: &str, order_id: &str, price: Decimal, size: Decimal, fee: Decimal) -> FillEntity {
    FillEntity {
        fill_id: id.to_string(),
        client_order_id: order_id.to_string(),
        price,
        size,
        fee,
        liquidity: Liquidity::Maker,
        trade_time: 1_700_000_000_000 + id.len() as i64,
    }
}

#[tokio::test]
async fn client_id_is_unique_key() {
    let store = memory_store().await;
    let order = limit_buy("c1", "BTC-USD", dec!(100), dec!(1));
    store.upsert_order(&order).await.unwrap();
    // 同 client_id 再写是更新而不是第二行
    let mut updated = order.clone();
    updated.status = OrderStatus::Open;
    updated.exchange_order_id = Some("ex-1".into());
    store.upsert_order(&updated).await.unwrap();

    let open = store.list_open_orders().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, OrderStatus::Open);
    assert_eq!(open[0].exchange_order_id.as_deref(), Some("ex-1"));
}

#[tokio::test]
async fn terminal_orders_never_reopen() {
    let store = memory_store().await;
    let order = limit_buy("c2", "BTC-USD", dec!(100), dec!(1));
    store.upsert_order(&order).await.unwrap();
    store
        .transition_order("c2", OrderStatus::Cancelled)
        .await
        .unwrap();

    // 终态后任何回退都是一致性错误
    assert!(store
        .transition_order("c2", OrderStatus::Open)
        .await
        .is_err());
    let mut reopened = order.clone();
    reopened.status = OrderStatus::Open;
    assert!(store.upsert_order(&reopened).await.is_err());

    // 同态迁移是幂等的
    store
        .transition_order("c2", OrderStatus::Cancelled)
        .await
        .unwrap();
}

#[tokio::test]
async fn record_fill_promotes_and_is_idempotent() {
    let store = memory_store().await;
    store
        .upsert_order(&limit_buy("c3", "ETH-USD", dec!(2000), dec!(2)))
        .await
        .unwrap();

    store
        .record_fill(&fill("f1", "c3", dec!(2000), dec!(1), dec!(1)))
        .await
        .unwrap();
    let order = store.get_order("c3").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.filled_size, dec!(1));

    // 重复推送同一笔成交不得重复计量
    store
        .record_fill(&fill("f1", "c3", dec!(2000), dec!(1), dec!(1)))
        .await
        .unwrap();
    let order = store.get_order("c3").await.unwrap().unwrap();
    assert_eq!(order.filled_size, dec!(1));

    store
        .record_fill(&fill("f2", "c3", dec!(2010), dec!(1), dec!(1)))
        .await
        .unwrap();
    let order = store.get_order("c3").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_size, dec!(2));
    // 均价 = (2000 + 2010) / 2
    assert_eq!(order.avg_fill_price, dec!(2005));
    assert!(order.terminal_at.is_some());
}

#[tokio::test]
async fn monetary_round_trip_within_one_increment() {
    // 成交求和后的均价与逐笔重算一致
    let store = memory_store().await;
    store
        .upsert_order(&limit_buy("c4", "DOGE-USD", dec!(0.007), dec!(3000)))
        .await
        .unwrap();
    let fills = vec![
        fill("g1", "c4", dec!(0.007000), dec!(1000), dec!(0.05)),
        fill("g2", "c4", dec!(0.008000), dec!(500), dec!(0.03)),
        fill("g3", "c4", dec!(0.006900), dec!(1500), dec!(0.07)),
    ];
    for f in &fills {
        store.record_fill(f).await.unwrap();
    }
    let order = store.get_order("c4").await.unwrap().unwrap();

    let notional: Decimal = fills.iter().map(|f| f.price * f.size).sum();
    let size: Decimal = fills.iter().map(|f| f.size).sum();
    let naive = notional / size;
    let quote_increment = dec!(0.000001);
    assert!((order.avg_fill_price - naive).abs() <= quote_increment);
    assert_eq!(order.fees, dec!(0.15));
}

#[tokio::test]
async fn one_open_position_per_product() {
    let store = memory_store().await;
    store
        .upsert_order(&limit_buy("c5", "BTC-USD", dec!(100), dec!(1)))
        .await
        .unwrap();

    store
        .open_position("BTC-USD", "c5", Some("momentum"))
        .await
        .unwrap();
    // 第二次开仓被一致性约束拒绝
    let err = store
        .open_position("BTC-USD", "c5", Some("momentum"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("BTC-USD"));

    // 其他品种不受影响
    store
        .upsert_order(&limit_buy("c6", "ETH-USD", dec!(2000), dec!(1)))
        .await
        .unwrap();
    store
        .open_position("ETH-USD", "c6", None)
        .await
        .unwrap();
    assert_eq!(store.list_open_positions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn close_position_writes_trade_record_atomically() {
    let store = memory_store().await;

    // 入场：1000 @ 0.007 + 费 0.05
    store
        .upsert_order(&limit_buy("entry", "XYZ-USD", dec!(0.007), dec!(1000)))
        .await
        .unwrap();
    store
        .record_fill(&fill("e1", "entry", dec!(0.007), dec!(1000), dec!(0.05)))
        .await
        .unwrap();
    store
        .open_position("XYZ-USD", "entry", Some("momentum"))
        .await
        .unwrap();

    // 离场：1000 @ 0.008 + 费 0.06
    let mut exit_order = limit_buy("exit", "XYZ-USD", dec!(0.008), dec!(1000));
    exit_order.side = Side::Sell;
    exit_order.order_kind = WireOrderKind::Market;
    store.upsert_order(&exit_order).await.unwrap();
    store
        .record_fill(&fill("x1", "exit", dec!(0.008), dec!(1000), dec!(0.06)))
        .await
        .unwrap();

    let net = store
        .close_position("XYZ-USD", "exit", "signal_profit_exit")
        .await
        .unwrap();
    // gross = 8 - 7 = 1, fees = 0.11
    assert_eq!(net, dec!(0.89));

    assert!(store.get_open_position("XYZ-USD").await.unwrap().is_none());
    let trades = store.list_trades_since(1).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason.as_deref(), Some("signal_profit_exit"));
    assert_eq!(trades[0].net_pnl, dec!(0.89));
    assert_eq!(trades[0].fees, dec!(0.11));

    // 没有持仓可平时拒绝
    assert!(store
        .close_position("XYZ-USD", "exit", "manual")
        .await
        .is_err());
}

#[tokio::test]
async fn cost_basis_matches_naive_recompute() {
    // cost_basis 与逐笔重算一致
    let store = memory_store().await;
    store
        .upsert_order(&limit_buy("cb", "ABC-USD", dec!(0.007), dec!(3000)))
        .await
        .unwrap();
    for f in [
        fill("h1", "cb", dec!(0.007000), dec!(1000), dec!(0.05)),
        fill("h2", "cb", dec!(0.008000), dec!(500), dec!(0.03)),
        fill("h3", "cb", dec!(0.006900), dec!(1500), dec!(0.07)),
    ] {
        store.record_fill(&f).await.unwrap();
    }
    let pos_id = store.open_position("ABC-USD", "cb", None).await.unwrap();
    assert!(pos_id > 0);

    let position = store.get_open_position("ABC-USD").await.unwrap().unwrap();
    let fills = store.entry_fills(&position).await.unwrap();
    let basis = cost_basis(&fills).unwrap();

    let naive = (dec!(0.007) * dec!(1000) + dec!(0.008) * dec!(500) + dec!(0.0069) * dec!(1500)
        + dec!(0.15))
        / dec!(3000);
    assert_eq!(basis, naive);
    // ≈ 0.0071667
    assert!(basis > dec!(0.007166) && basis < dec!(0.007167));
}

#[tokio::test]
async fn bot_state_round_trip() {
    let store = memory_store().await;
    store.put_state("peak_equity", "10000").await.unwrap();
    store.put_state("peak_equity", "10500").await.unwrap();
    assert_eq!(
        store.get_state("peak_equity").await.unwrap().as_deref(),
        Some("10500")
    );
    assert_eq!(store.get_state("missing").await.unwrap(), None);
}

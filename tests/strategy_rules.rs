//! 策略规则测试：直接构造指标行验证打分规则与前置条件

use coin_quant::trading::indicator::IndicatorRow;
use coin_quant::trading::strategy::breakout::{self, BreakoutParams};
use coin_quant::trading::strategy::hybrid::{self, HybridParams};
use coin_quant::trading::strategy::mean_reversion::{self, MeanReversionParams};
use coin_quant::trading::strategy::momentum::{self, MomentumParams};
use coin_quant::trading::strategy::SignalAction;

/// 一行"平静市况"的指标快照
fn base_row(i: usize) -> IndicatorRow {
    IndicatorRow {
        start_time: i as i64 * 900_000,
        open: 100.0,
        high: 100.5,
        low: 99.5,
        close: 100.0,
        volume: 1_000.0,
        ema_fast: Some(100.0),
        ema_slow: Some(100.0),
        ema_long: Some(100.0),
        rsi: Some(50.0),
        macd: Some(0.0),
        macd_signal: Some(0.0),
        macd_hist: Some(0.0),
        bb_upper: Some(102.0),
        bb_middle: Some(100.0),
        bb_lower: Some(98.0),
        bb_width: Some(4.0),
        adx: Some(18.0),
        di_plus: Some(20.0),
        di_minus: Some(20.0),
        stoch_k: Some(50.0),
        stoch_d: Some(50.0),
        atr: Some(1.0),
        rolling_high: Some(101.0),
        rolling_low: Some(99.0),
        volume_ma: Some(1_000.0),
        volume_ma_short: Some(1_000.0),
    }
}

fn rows(n: usize) -> Vec<IndicatorRow> {
    (0..n).map(base_row).collect()
}

#[test]
fn momentum_full_confluence_is_full_confidence_buy() {
    let mut data = rows(200);
    {
        let prev = &mut data[198];
        prev.macd = Some(-0.1);
        prev.macd_signal = Some(0.0);
    }
    {
        let last = &mut data[199];
        last.adx = Some(30.0);
        last.ema_fast = Some(102.0);
        last.ema_slow = Some(101.0);
        last.ema_long = Some(100.0);
        last.macd = Some(0.2);
        last.macd_signal = Some(0.1);
        last.rsi = Some(60.0);
        last.close = 100.5; // 距中轨 0.5%，回踩成立
        last.bb_middle = Some(100.0);
        last.bb_upper = Some(104.0);
        last.volume = 3_000.0; // 3x 均量
    }

    let signal = momentum::analyze(&data, "BTC-USD", &MomentumParams::default());
    assert_eq!(signal.action, SignalAction::Buy);
    assert!((signal.confidence - 1.0).abs() < 1e-9, "满分共振应为满置信度");
    assert!(!signal.reasons.is_empty());
}

#[test]
fn momentum_requires_trend_regime() {
    let mut data = rows(200);
    {
        let last = &mut data[199];
        last.adx = Some(20.0); // 低于 25：无趋势
        last.ema_fast = Some(102.0);
        last.ema_slow = Some(101.0);
        last.ema_long = Some(100.0);
        last.macd = Some(0.2);
        last.macd_signal = Some(0.1);
        last.close = 100.2;
    }
    let signal = momentum::analyze(&data, "BTC-USD", &MomentumParams::default());
    assert_eq!(signal.action, SignalAction::Hold);
}

#[test]
fn momentum_never_buys_above_upper_band() {
    let mut data = rows(200);
    {
        let prev = &mut data[198];
        prev.macd = Some(-0.1);
        prev.macd_signal = Some(0.0);
    }
    {
        let last = &mut data[199];
        last.adx = Some(30.0);
        last.ema_fast = Some(102.0);
        last.ema_slow = Some(101.0);
        last.ema_long = Some(100.0);
        last.macd = Some(0.2);
        last.macd_signal = Some(0.1);
        last.rsi = Some(60.0);
        // 价格贴着中轨算回踩，但同时越过上轨
        last.close = 100.5;
        last.bb_middle = Some(100.0);
        last.bb_upper = Some(100.4);
    }
    let signal = momentum::analyze(&data, "BTC-USD", &MomentumParams::default());
    assert_ne!(signal.action, SignalAction::Buy, "上轨之上禁止追买");
}

#[test]
fn momentum_insufficient_history_holds() {
    let data = rows(100);
    let signal = momentum::analyze(&data, "BTC-USD", &MomentumParams::default());
    assert_eq!(signal.action, SignalAction::Hold);
    assert_eq!(signal.confidence, 0.0);
}

#[test]
fn mean_reversion_downtrend_penalty_blocks_buy() {
    let mut data = rows(200);
    {
        let prev = &mut data[198];
        prev.stoch_k = Some(10.0);
        prev.stoch_d = Some(15.0);
    }
    {
        let last = &mut data[199];
        last.close = 97.0; // 跌破下轨
        last.bb_lower = Some(98.0);
        last.rsi = Some(15.0);
        last.stoch_k = Some(18.0);
        last.stoch_d = Some(16.0);
        last.ema_long = Some(120.0); // 远低于 EMA200：长期下行
    }
    let in_downtrend = mean_reversion::analyze(&data, "X-USD", &MeanReversionParams::default());
    assert_ne!(in_downtrend.action, SignalAction::Buy, "EMA200 之下重罚买入分");

    // 同样的极端超卖，处于长期上行趋势中则应给出 BUY
    data[199].ema_long = Some(90.0);
    let in_uptrend = mean_reversion::analyze(&data, "X-USD", &MeanReversionParams::default());
    assert_eq!(in_uptrend.action, SignalAction::Buy);
    assert!(in_uptrend.confidence > 0.5);
}

#[test]
fn mean_reversion_upper_band_sell() {
    let mut data = rows(200);
    {
        let prev = &mut data[198];
        prev.stoch_k = Some(90.0);
        prev.stoch_d = Some(85.0);
    }
    {
        let last = &mut data[199];
        last.close = 103.0;
        last.bb_upper = Some(102.0);
        last.rsi = Some(85.0);
        last.stoch_k = Some(82.0);
        last.stoch_d = Some(84.0);
    }
    let signal = mean_reversion::analyze(&data, "X-USD", &MeanReversionParams::default());
    assert_eq!(signal.action, SignalAction::Sell);
}

#[test]
fn breakout_needs_prior_consolidation() {
    let mut data = rows(60);
    {
        let prev = &mut data[58];
        prev.adx = Some(15.0); // 盘整
        prev.rolling_high = Some(101.0);
        prev.volume_ma_short = Some(700.0); // 量能枯竭
        prev.volume_ma = Some(1_000.0);
        prev.atr = Some(0.5); // 压缩到窗口最低
    }
    {
        let last = &mut data[59];
        last.close = 101.5; // 放量突破滚动高点
        last.bb_width = Some(3.0);
        last.volume = 3_500.0;
        last.volume_ma = Some(1_000.0);
    }
    let signal = breakout::analyze(&data, "X-USD", &BreakoutParams::default());
    assert_eq!(signal.action, SignalAction::Buy);
    assert!((signal.confidence - 1.0).abs() < 1e-9);

    // 同样的突破形态，但突破前已在趋势中（ADX 30）→ 放弃
    data[58].adx = Some(30.0);
    let signal = breakout::analyze(&data, "X-USD", &BreakoutParams::default());
    assert_eq!(signal.action, SignalAction::Hold);
}

#[test]
fn breakout_without_level_break_holds() {
    let mut data = rows(60);
    data[58].adx = Some(15.0);
    // 挤压、放量都在，但价格没有突破滚动高点
    data[59].bb_width = Some(3.0);
    data[59].volume = 3_500.0;
    let signal = breakout::analyze(&data, "X-USD", &BreakoutParams::default());
    assert_eq!(signal.action, SignalAction::Hold);
}

#[test]
fn hybrid_requires_k_agreement() {
    // 构造动量与突破同时看多的行情
    let mut data = rows(200);
    {
        let prev = &mut data[198];
        prev.macd = Some(-0.1);
        prev.macd_signal = Some(0.0);
        prev.adx = Some(15.0);
        prev.rolling_high = Some(100.3);
        prev.volume_ma_short = Some(700.0);
        prev.volume_ma = Some(1_000.0);
        prev.atr = Some(0.5);
    }
    {
        let last = &mut data[199];
        last.adx = Some(30.0);
        last.ema_fast = Some(102.0);
        last.ema_slow = Some(101.0);
        last.ema_long = Some(100.0);
        last.macd = Some(0.2);
        last.macd_signal = Some(0.1);
        last.rsi = Some(60.0);
        last.close = 100.5;
        last.bb_middle = Some(100.0);
        last.bb_upper = Some(104.0);
        last.bb_width = Some(3.0);
        last.volume = 3_500.0;
        last.volume_ma = Some(1_000.0);
    }

    // 动量 BUY；突破的盘整前置在 prev.adx=15 下成立且收盘破 100.3 → BUY
    let k2 = hybrid::analyze(&data, "X-USD", &HybridParams::with_k(2));
    assert_eq!(k2.action, SignalAction::Buy);
    assert!(k2.confidence > 0.0);
    assert!(k2.reasons.iter().any(|r| r.contains("agree")));

    // K=3 时均值回归不同向，达不到票数
    let k3 = hybrid::analyze(&data, "X-USD", &HybridParams::with_k(3));
    assert_eq!(k3.action, SignalAction::Hold);
}

#[test]
fn signals_are_deterministic() {
    // 同一输入必须产出逐字节相同的信号
    let mut data = rows(200);
    data[199].adx = Some(30.0);
    data[199].ema_fast = Some(102.0);
    data[199].ema_slow = Some(101.0);
    data[199].ema_long = Some(100.0);
    data[199].close = 100.4;

    let a = momentum::analyze(&data, "X-USD", &MomentumParams::default());
    let b = momentum::analyze(&data, "X-USD", &MomentumParams::default());
    assert_eq!(
        serde_json::to_vec(&a).unwrap(),
        serde_json::to_vec(&b).unwrap()
    );
}

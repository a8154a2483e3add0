use tracing::debug;

use super::signal::{resolve_signal, Scorer, Signal};
use crate::trading::indicator::series::IndicatorRow;

/// 动量策略参数
#[derive(Debug, Clone)]
pub struct MomentumParams {
    /// 趋势存在的 ADX 门槛
    pub adx_threshold: f64,
    /// 回踩中轨的接近度（占价格比例）
    pub pullback_proximity: f64,
    /// RSI 动能区间
    pub rsi_buy_lower: f64,
    pub rsi_buy_upper: f64,
    pub rsi_sell_upper: f64,
    /// 量能确认倍数（相对 20 根均量）
    pub volume_multiplier: f64,
    pub score_threshold: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            adx_threshold: 25.0,
            pullback_proximity: 0.015,
            rsi_buy_lower: 50.0,
            rsi_buy_upper: 70.0,
            rsi_sell_upper: 75.0,
            volume_multiplier: 2.5,
            score_threshold: 3.0,
        }
    }
}

const BUY_MAX_SCORE: f64 = 8.0;
const SELL_MAX_SCORE: f64 = 8.0;
pub const MIN_CANDLES: usize = 200;

/// 动量策略：仅在趋势确立（ADX≥25）时顺势进出
///
/// 买入强制要求回踩中轨——在上轨之上追高被明确禁止。
pub fn analyze(rows: &[IndicatorRow], product_id: &str, params: &MomentumParams) -> Signal {
    let produced_at = rows.last().map(|r| r.start_time).unwrap_or(0);
    if rows.len() < MIN_CANDLES {
        return Signal::hold(produced_at);
    }
    let latest = &rows[rows.len() - 1];
    let previous = &rows[rows.len() - 2];

    // 必需列齐备才有资格给信号
    let (adx, ema_fast, ema_slow, ema_long, macd, macd_sig, rsi, bb_upper, bb_middle) = match (
        latest.adx,
        latest.ema_fast,
        latest.ema_slow,
        latest.ema_long,
        latest.macd,
        latest.macd_signal,
        latest.rsi,
        latest.bb_upper,
        latest.bb_middle,
    ) {
        (
            Some(adx),
            Some(ef),
            Some(es),
            Some(el),
            Some(m),
            Some(ms),
            Some(r),
            Some(bu),
            Some(bm),
        ) => (adx, ef, es, el, m, ms, r, bu, bm),
        _ => {
            debug!("{} 指标未就绪，动量策略跳过", product_id);
            return Signal::hold(produced_at);
        }
    };

    // 趋势前置条件
    if adx < params.adx_threshold {
        return Signal::hold(produced_at);
    }

    let bullish_trend = ema_fast > ema_slow && ema_slow > ema_long;
    let bearish_trend = ema_fast < ema_slow && ema_slow < ema_long;

    let macd_crossed_up = macd > macd_sig
        && matches!(
            (previous.macd, previous.macd_signal),
            (Some(pm), Some(ps)) if pm <= ps
        );
    let macd_crossed_down = macd < macd_sig
        && matches!(
            (previous.macd, previous.macd_signal),
            (Some(pm), Some(ps)) if pm >= ps
        );

    let volume_spike = latest
        .volume_ma
        .map(|ma| latest.volume > ma * params.volume_multiplier)
        .unwrap_or(false);

    let pullback_to_middle =
        (latest.close - bb_middle).abs() / latest.close < params.pullback_proximity;

    let mut buy = Scorer::new();
    if bullish_trend {
        buy.add(2.0, "EMA bullish alignment (20>50>200)");
    }
    if macd_crossed_up {
        buy.add(2.0, "MACD bullish crossover");
    }
    if rsi > params.rsi_buy_lower && rsi < params.rsi_buy_upper {
        buy.add(1.0, format!("RSI in momentum zone ({:.1})", rsi));
    }
    if pullback_to_middle && bullish_trend {
        buy.add(2.0, "Pullback to middle band in uptrend");
    }
    if volume_spike {
        buy.add(
            1.0,
            format!("Volume {}x above average", params.volume_multiplier),
        );
    }

    // 回踩条款是硬性要求：不在中轨附近、或已越过上轨，买入分直接作废
    if !pullback_to_middle || latest.close > bb_upper {
        buy.score = 0.0;
    }

    let mut sell = Scorer::new();
    if bearish_trend {
        sell.add(2.0, "EMA bearish alignment (20<50<200)");
    }
    if macd_crossed_down {
        sell.add(2.0, "MACD bearish crossover");
    }
    if rsi > params.rsi_sell_upper {
        sell.add(1.0, format!("RSI overbought ({:.1})", rsi));
    }
    if latest.close < bb_middle && bearish_trend {
        sell.add(2.0, "Break of middle band in downtrend");
    }
    if volume_spike && bearish_trend {
        sell.add(1.0, "Volume spike on breakdown");
    }

    resolve_signal(
        buy,
        sell,
        BUY_MAX_SCORE,
        SELL_MAX_SCORE,
        params.score_threshold,
        produced_at,
    )
}

use super::signal::{resolve_signal, Scorer, Signal};
use crate::trading::indicator::series::IndicatorRow;

/// 均值回归策略参数
#[derive(Debug, Clone)]
pub struct MeanReversionParams {
    pub rsi_extreme_oversold: f64,
    pub rsi_extreme_overbought: f64,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    /// 偏离均值的 z 分阈值（σ 倍数）
    pub z_threshold: f64,
    /// 长期趋势过滤失败时的惩罚分
    pub downtrend_penalty: f64,
    pub score_threshold: f64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            rsi_extreme_oversold: 20.0,
            rsi_extreme_overbought: 80.0,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            z_threshold: 2.0,
            downtrend_penalty: 3.0,
            score_threshold: 3.0,
        }
    }
}

const BUY_MAX_SCORE: f64 = 7.0;
const SELL_MAX_SCORE: f64 = 7.0;
pub const MIN_CANDLES: usize = 200;

/// 均值回归：极端偏离 + 超卖/超买共振时逆势入场
///
/// 长期下行趋势（价格低于 EMA200）中不做多，买入分重罚。
pub fn analyze(rows: &[IndicatorRow], _product_id: &str, params: &MeanReversionParams) -> Signal {
    let produced_at = rows.last().map(|r| r.start_time).unwrap_or(0);
    if rows.len() < MIN_CANDLES {
        return Signal::hold(produced_at);
    }
    let latest = &rows[rows.len() - 1];
    let previous = &rows[rows.len() - 2];

    let (bb_upper, bb_middle, bb_lower, rsi, ema_long) = match (
        latest.bb_upper,
        latest.bb_middle,
        latest.bb_lower,
        latest.rsi,
        latest.ema_long,
    ) {
        (Some(u), Some(m), Some(l), Some(r), Some(e)) => (u, m, l, r, e),
        _ => return Signal::hold(produced_at),
    };

    let in_uptrend = latest.close > ema_long;
    // z 分：相对 20 期均线的 σ 倍数偏离
    let sigma = (bb_upper - bb_middle) / 2.0;
    let z = if sigma > 0.0 {
        (latest.close - bb_middle) / sigma
    } else {
        0.0
    };

    let stoch_cross_up = matches!(
        (latest.stoch_k, latest.stoch_d, previous.stoch_k, previous.stoch_d),
        (Some(k), Some(d), Some(pk), Some(pd)) if k > d && pk <= pd
    );
    let stoch_cross_down = matches!(
        (latest.stoch_k, latest.stoch_d, previous.stoch_k, previous.stoch_d),
        (Some(k), Some(d), Some(pk), Some(pd)) if k < d && pk >= pd
    );

    let mut buy = Scorer::new();
    if latest.close <= bb_lower {
        buy.add(
            2.0,
            format!("Price at/below lower band ({:.4} <= {:.4})", latest.close, bb_lower),
        );
    }
    if rsi < params.rsi_extreme_oversold {
        buy.add(2.0, format!("RSI extremely oversold ({:.1})", rsi));
    }
    if let Some(k) = latest.stoch_k {
        if k < params.stoch_oversold && stoch_cross_up {
            buy.add(2.0, format!("Stochastic oversold + bullish cross ({:.1})", k));
        }
    }
    if z < -params.z_threshold {
        buy.add(1.0, format!("Price {:.1} sigma below mean", z.abs()));
    }
    if !in_uptrend {
        buy.penalize(params.downtrend_penalty, "Below EMA200, long-term downtrend");
        // 前置条件：EMA200 之下不做多，重罚后仍达标也不放行
        buy.score = 0.0;
    }

    let mut sell = Scorer::new();
    if latest.close >= bb_upper {
        sell.add(
            2.0,
            format!("Price at/above upper band ({:.4} >= {:.4})", latest.close, bb_upper),
        );
    }
    if rsi > params.rsi_extreme_overbought {
        sell.add(2.0, format!("RSI extremely overbought ({:.1})", rsi));
    }
    if let Some(k) = latest.stoch_k {
        if k > params.stoch_overbought && stoch_cross_down {
            sell.add(2.0, format!("Stochastic overbought + bearish cross ({:.1})", k));
        }
    }
    if z > params.z_threshold {
        sell.add(1.0, format!("Price {:.1} sigma above mean", z));
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

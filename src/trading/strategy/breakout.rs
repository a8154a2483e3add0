use super::signal::{resolve_signal, Scorer, Signal};
use crate::trading::indicator::series::IndicatorRow;

/// 突破策略参数
#[derive(Debug, Clone)]
pub struct BreakoutParams {
    /// 盘整判定：突破前一根的 ADX 上限
    pub adx_consolidation: f64,
    /// 已在趋势中（放弃追突破）的 ADX 上限
    pub adx_trending: f64,
    /// 布林带宽挤压阈值（占价格百分比）
    pub bb_squeeze_pct: f64,
    /// 量能枯竭判定：短期均量 / 长期均量
    pub volume_dry_ratio: f64,
    /// 突破确认的放量倍数
    pub volume_spike_multiplier: f64,
    /// ATR 压缩回看根数
    pub atr_lookback: usize,
    pub score_threshold: f64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            adx_consolidation: 20.0,
            adx_trending: 25.0,
            bb_squeeze_pct: 4.0,
            volume_dry_ratio: 0.8,
            volume_spike_multiplier: 3.0,
            atr_lookback: 10,
            score_threshold: 3.0,
        }
    }
}

const BUY_MAX_SCORE: f64 = 6.0;
const SELL_MAX_SCORE: f64 = 6.0;
pub const MIN_CANDLES: usize = 60;

/// 突破策略：盘整（突破前 ADX<20）后对 50 根滚动高/低点的放量突破
pub fn analyze(rows: &[IndicatorRow], _product_id: &str, params: &BreakoutParams) -> Signal {
    let produced_at = rows.last().map(|r| r.start_time).unwrap_or(0);
    if rows.len() < MIN_CANDLES {
        return Signal::hold(produced_at);
    }
    let latest = &rows[rows.len() - 1];
    let previous = &rows[rows.len() - 2];

    // 突破的参照是"前一根收盘时"的滚动高低点：当前根自身不计入
    let (prev_rolling_high, prev_rolling_low) = match (previous.rolling_high, previous.rolling_low)
    {
        (Some(h), Some(l)) => (h, l),
        _ => return Signal::hold(produced_at),
    };

    // 盘整前置条件看突破前那根K线的 ADX
    match previous.adx {
        Some(adx) if adx > params.adx_trending => return Signal::hold(produced_at),
        Some(_) | None => {}
    }
    let in_consolidation = previous
        .adx
        .map(|adx| adx < params.adx_consolidation)
        .unwrap_or(false);
    if !in_consolidation {
        return Signal::hold(produced_at);
    }

    let bb_squeeze = latest
        .bb_width
        .map(|w| w < params.bb_squeeze_pct)
        .unwrap_or(false);

    // 量能：前一根短期均量枯竭 + 当前根放量
    let volume_dried = matches!(
        (previous.volume_ma_short, previous.volume_ma),
        (Some(short), Some(long)) if short < long * params.volume_dry_ratio
    );
    let volume_spiked = latest
        .volume_ma
        .map(|ma| latest.volume >= ma * params.volume_spike_multiplier)
        .unwrap_or(false);

    // 波动压缩：前一根 ATR 处于回看窗口的最低位
    let atr_compressed = {
        let n = rows.len();
        let window = &rows[n.saturating_sub(params.atr_lookback + 1)..n - 1];
        match previous.atr {
            Some(prev_atr) if !window.is_empty() => window
                .iter()
                .filter_map(|r| r.atr)
                .all(|a| prev_atr <= a + f64::EPSILON),
            _ => false,
        }
    };

    let mut buy = Scorer::new();
    if latest.close > prev_rolling_high {
        buy.add(
            2.0,
            format!("Close above rolling high ({:.4})", prev_rolling_high),
        );
    }
    if bb_squeeze {
        buy.add(
            1.0,
            format!("Band squeeze (width {:.2}%)", latest.bb_width.unwrap_or(0.0)),
        );
    }
    if volume_dried && volume_spiked {
        buy.add(2.0, "Volume dry-up then breakout spike");
    }
    if atr_compressed {
        buy.add(1.0, "ATR compressed to local minimum");
    }
    // 没有真实突破时其余佐证不构成信号
    if latest.close <= prev_rolling_high {
        buy.score = 0.0;
    }

    let mut sell = Scorer::new();
    if latest.close < prev_rolling_low {
        sell.add(
            2.0,
            format!("Close below rolling low ({:.4})", prev_rolling_low),
        );
    }
    if bb_squeeze {
        sell.add(1.0, "Band squeeze before breakdown");
    }
    if volume_dried && volume_spiked {
        sell.add(2.0, "Volume dry-up then breakdown spike");
    }
    if atr_compressed {
        sell.add(1.0, "ATR compressed before breakdown");
    }
    if latest.close >= prev_rolling_low {
        sell.score = 0.0;
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

use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, FastStochastic, Maximum, Minimum,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{DataItem, Next};

use super::adx::Adx;
use crate::exchange::dto::Candle;

/// 指标参数集
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_long: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub adx_period: usize,
    pub stoch_period: usize,
    pub stoch_smooth: usize,
    pub atr_period: usize,
    pub rolling_period: usize,
    pub volume_ma: usize,
    pub volume_ma_short: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            ema_long: 200,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
            adx_period: 14,
            stoch_period: 14,
            stoch_smooth: 3,
            atr_period: 14,
            rolling_period: 50,
            volume_ma: 20,
            volume_ma_short: 3,
        }
    }
}

/// 装饰后的单根K线：预热期内的列为 None，预热后恒有值
///
/// 列名是策略引用的稳定标识，不随参数调整改名。
#[derive(Debug, Clone, Default)]
pub struct IndicatorRow {
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub ema_long: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    /// 布林带宽占收盘价百分比
    pub bb_width: Option<f64>,
    pub adx: Option<f64>,
    pub di_plus: Option<f64>,
    pub di_minus: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub atr: Option<f64>,
    pub rolling_high: Option<f64>,
    pub rolling_low: Option<f64>,
    pub volume_ma: Option<f64>,
    pub volume_ma_short: Option<f64>,
}

/// 纯函数：K线序列 → 带指标列的序列
///
/// 同样的输入必然产出同样的输出；所有状态都在本次调用内部。
pub fn enrich(candles: &[Candle], cfg: &IndicatorConfig) -> Vec<IndicatorRow> {
    let mut ema_fast = ExponentialMovingAverage::new(cfg.ema_fast).unwrap();
    let mut ema_slow = ExponentialMovingAverage::new(cfg.ema_slow).unwrap();
    let mut ema_long = ExponentialMovingAverage::new(cfg.ema_long).unwrap();
    let mut rsi = RelativeStrengthIndex::new(cfg.rsi_period).unwrap();
    let mut macd =
        MovingAverageConvergenceDivergence::new(cfg.macd_fast, cfg.macd_slow, cfg.macd_signal)
            .unwrap();
    let mut bb = BollingerBands::new(cfg.bb_period, cfg.bb_std).unwrap();
    let mut adx = Adx::new(cfg.adx_period);
    let mut stoch = FastStochastic::new(cfg.stoch_period).unwrap();
    let mut stoch_d = SimpleMovingAverage::new(cfg.stoch_smooth).unwrap();
    let mut atr = AverageTrueRange::new(cfg.atr_period).unwrap();
    let mut rolling_high = Maximum::new(cfg.rolling_period).unwrap();
    let mut rolling_low = Minimum::new(cfg.rolling_period).unwrap();
    let mut volume_ma = SimpleMovingAverage::new(cfg.volume_ma).unwrap();
    let mut volume_ma_short = SimpleMovingAverage::new(cfg.volume_ma_short).unwrap();

    let mut rows = Vec::with_capacity(candles.len());

    for (i, candle) in candles.iter().enumerate() {
        let open = candle.open.to_f64().unwrap_or(0.0);
        let high = candle.high.to_f64().unwrap_or(0.0);
        let low = candle.low.to_f64().unwrap_or(0.0);
        let close = candle.close.to_f64().unwrap_or(0.0);
        let volume = candle.volume.to_f64().unwrap_or(0.0);

        let ema_fast_v = ema_fast.next(close);
        let ema_slow_v = ema_slow.next(close);
        let ema_long_v = ema_long.next(close);
        let rsi_v = rsi.next(close);
        let macd_v = macd.next(close);
        let bb_v = bb.next(close);
        let adx_v = adx.next(high, low, close);
        let rolling_high_v = rolling_high.next(high);
        let rolling_low_v = rolling_low.next(low);
        let volume_ma_v = volume_ma.next(volume);
        let volume_ma_short_v = volume_ma_short.next(volume);

        // ATR / Stochastic 吃整根K线
        let (atr_v, stoch_k_v) = match DataItem::builder()
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .volume(volume)
            .build()
        {
            Ok(item) => (atr.next(&item), stoch.next(&item)),
            // 交易所偶发的脏K线（高低倒挂等）退化为仅用收盘价
            Err(_) => (atr.next(close), stoch.next(close)),
        };
        let stoch_d_v = stoch_d.next(stoch_k_v);

        // 预热闸门：未满各自周期的列输出 None
        let after = |period: usize| i + 1 >= period;
        let bb_width = if after(cfg.bb_period) && close != 0.0 {
            Some((bb_v.upper - bb_v.lower) / close * 100.0)
        } else {
            None
        };

        rows.push(IndicatorRow {
            start_time: candle.start_time,
            open,
            high,
            low,
            close,
            volume,
            ema_fast: after(cfg.ema_fast).then_some(ema_fast_v),
            ema_slow: after(cfg.ema_slow).then_some(ema_slow_v),
            ema_long: after(cfg.ema_long).then_some(ema_long_v),
            rsi: after(cfg.rsi_period + 1).then_some(rsi_v),
            macd: after(cfg.macd_slow).then_some(macd_v.macd),
            macd_signal: after(cfg.macd_slow + cfg.macd_signal).then_some(macd_v.signal),
            macd_hist: after(cfg.macd_slow + cfg.macd_signal).then_some(macd_v.histogram),
            bb_upper: after(cfg.bb_period).then_some(bb_v.upper),
            bb_middle: after(cfg.bb_period).then_some(bb_v.average),
            bb_lower: after(cfg.bb_period).then_some(bb_v.lower),
            bb_width,
            adx: adx_v.filter(|_| after(adx.warmup_len())).map(|o| o.adx),
            di_plus: adx_v.filter(|_| after(adx.warmup_len())).map(|o| o.di_plus),
            di_minus: adx_v.filter(|_| after(adx.warmup_len())).map(|o| o.di_minus),
            stoch_k: after(cfg.stoch_period).then_some(stoch_k_v),
            stoch_d: after(cfg.stoch_period + cfg.stoch_smooth).then_some(stoch_d_v),
            atr: after(cfg.atr_period + 1).then_some(atr_v),
            rolling_high: after(cfg.rolling_period).then_some(rolling_high_v),
            rolling_low: after(cfg.rolling_period).then_some(rolling_low_v),
            volume_ma: after(cfg.volume_ma).then_some(volume_ma_v),
            volume_ma_short: after(cfg.volume_ma_short).then_some(volume_ma_short_v),
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn synthetic_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                // 缓慢上行并叠加小波动
                let base = 100.0 + i as f64 * 0.2 + ((i % 7) as f64 - 3.0) * 0.5;
                Candle {
                    start_time: i as i64 * 900_000,
                    open: Decimal::try_from(base - 0.2).unwrap(),
                    high: Decimal::try_from(base + 0.6).unwrap(),
                    low: Decimal::try_from(base - 0.6).unwrap(),
                    close: Decimal::try_from(base).unwrap(),
                    volume: Decimal::try_from(1000.0 + (i % 5) as f64 * 100.0).unwrap(),
                }
            })
            .collect()
    }

    #[test]
    fn warmup_gates_columns() {
        let candles = synthetic_candles(250);
        let rows = enrich(&candles, &IndicatorConfig::default());
        assert_eq!(rows.len(), 250);

        // 预热期内为 None
        assert!(rows[10].ema_fast.is_none());
        assert!(rows[100].ema_long.is_none());
        assert!(rows[30].rolling_high.is_none());

        // 最大周期（EMA200）之后全列都应有值
        let last = &rows[249];
        assert!(last.ema_fast.is_some());
        assert!(last.ema_slow.is_some());
        assert!(last.ema_long.is_some());
        assert!(last.rsi.is_some());
        assert!(last.macd.is_some());
        assert!(last.macd_signal.is_some());
        assert!(last.bb_upper.is_some());
        assert!(last.bb_width.is_some());
        assert!(last.adx.is_some());
        assert!(last.stoch_k.is_some());
        assert!(last.stoch_d.is_some());
        assert!(last.atr.is_some());
        assert!(last.rolling_high.is_some());
        assert!(last.volume_ma.is_some());
    }

    #[test]
    fn enrich_is_deterministic() {
        let candles = synthetic_candles(250);
        let a = enrich(&candles, &IndicatorConfig::default());
        let b = enrich(&candles, &IndicatorConfig::default());
        for (ra, rb) in a.iter().zip(b.iter()) {
            assert_eq!(ra.close, rb.close);
            assert_eq!(ra.ema_fast, rb.ema_fast);
            assert_eq!(ra.macd, rb.macd);
            assert_eq!(ra.adx, rb.adx);
            assert_eq!(ra.stoch_d, rb.stoch_d);
        }
    }

    #[test]
    fn rolling_high_tracks_window_max() {
        let candles = synthetic_candles(250);
        let rows = enrich(&candles, &IndicatorConfig::default());
        let i = 200;
        let expect = rows[i + 1 - 50..=i]
            .iter()
            .map(|r| r.high)
            .fold(f64::MIN, f64::max);
        assert!((rows[i].rolling_high.unwrap() - expect).abs() < 1e-9);
    }
}

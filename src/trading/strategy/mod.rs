pub mod breakout;
pub mod hybrid;
pub mod mean_reversion;
pub mod momentum;
pub mod signal;

pub use signal::{Signal, SignalAction};

use crate::app_config::StrategySettings;
use crate::trading::indicator::series::IndicatorRow;

/// 可插拔策略：枚举分发，换策略就是换一个值
#[derive(Debug, Clone)]
pub enum Strategy {
    Momentum(momentum::MomentumParams),
    MeanReversion(mean_reversion::MeanReversionParams),
    Breakout(breakout::BreakoutParams),
    Hybrid(hybrid::HybridParams),
}

impl Strategy {
    /// 按配置装配激活策略；未知名称回退动量策略
    pub fn from_settings(settings: &StrategySettings) -> Self {
        let threshold = settings.score_threshold;
        match settings.active.as_str() {
            "mean_reversion" => Strategy::MeanReversion(mean_reversion::MeanReversionParams {
                score_threshold: threshold,
                ..Default::default()
            }),
            "breakout" => Strategy::Breakout(breakout::BreakoutParams {
                score_threshold: threshold,
                ..Default::default()
            }),
            "hybrid" => Strategy::Hybrid(hybrid::HybridParams::with_k(settings.hybrid_k)),
            _ => Strategy::Momentum(momentum::MomentumParams {
                score_threshold: threshold,
                ..Default::default()
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Momentum(_) => "momentum",
            Strategy::MeanReversion(_) => "mean_reversion",
            Strategy::Breakout(_) => "breakout",
            Strategy::Hybrid(_) => "hybrid",
        }
    }

    /// 策略要求的最少K线数
    pub fn min_candles(&self) -> usize {
        match self {
            Strategy::Momentum(_) => momentum::MIN_CANDLES,
            Strategy::MeanReversion(_) => mean_reversion::MIN_CANDLES,
            Strategy::Breakout(_) => breakout::MIN_CANDLES,
            Strategy::Hybrid(_) => momentum::MIN_CANDLES,
        }
    }

    /// 统一入口：装饰后的K线 → 信号（纯函数）
    pub fn analyze(&self, rows: &[IndicatorRow], product_id: &str) -> Signal {
        match self {
            Strategy::Momentum(p) => momentum::analyze(rows, product_id, p),
            Strategy::MeanReversion(p) => mean_reversion::analyze(rows, product_id, p),
            Strategy::Breakout(p) => breakout::analyze(rows, product_id, p),
            Strategy::Hybrid(p) => hybrid::analyze(rows, product_id, p),
        }
    }
}

use super::breakout::{self, BreakoutParams};
use super::mean_reversion::{self, MeanReversionParams};
use super::momentum::{self, MomentumParams};
use super::signal::{Signal, SignalAction};
use crate::trading::indicator::series::IndicatorRow;

/// 组合策略参数
#[derive(Debug, Clone, Default)]
pub struct HybridParams {
    pub momentum: MomentumParams,
    pub mean_reversion: MeanReversionParams,
    pub breakout: BreakoutParams,
    /// 至少 k 个子策略同向才给出方向信号
    pub k: usize,
}

impl HybridParams {
    pub fn with_k(k: usize) -> Self {
        Self {
            k: k.max(1),
            ..Default::default()
        }
    }
}

/// 各子策略投票权重取其满分（动量 8 / 回归 7 / 突破 6）
const WEIGHTS: [f64; 3] = [8.0, 7.0, 6.0];

/// 组合策略：三个子策略并行投票，K 票同向才出手
///
/// 置信度是同向子策略置信度的权重加权平均。
pub fn analyze(rows: &[IndicatorRow], product_id: &str, params: &HybridParams) -> Signal {
    let produced_at = rows.last().map(|r| r.start_time).unwrap_or(0);
    let k = params.k.max(1);

    let votes = [
        momentum::analyze(rows, product_id, &params.momentum),
        mean_reversion::analyze(rows, product_id, &params.mean_reversion),
        breakout::analyze(rows, product_id, &params.breakout),
    ];

    for action in [SignalAction::Buy, SignalAction::Sell] {
        let concurring: Vec<(usize, &Signal)> = votes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.action == action)
            .collect();
        if concurring.len() < k {
            continue;
        }

        let weight_sum: f64 = concurring.iter().map(|(i, _)| WEIGHTS[*i]).sum();
        let confidence: f64 = concurring
            .iter()
            .map(|(i, s)| s.confidence * WEIGHTS[*i])
            .sum::<f64>()
            / weight_sum;
        let mut reasons: Vec<String> = vec![format!(
            "{}/{} strategies agree on {}",
            concurring.len(),
            votes.len(),
            action.as_str()
        )];
        for (_, s) in &concurring {
            reasons.extend(s.reasons.iter().cloned());
        }

        return Signal {
            action,
            confidence,
            reasons,
            produced_at,
        };
    }

    Signal::hold(produced_at)
}

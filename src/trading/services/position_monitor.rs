use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use super::order_service::{ExitReason, OrderService};
use crate::app_config::{ExitConfig, TradingConfig};
use crate::error::AppResult;
use crate::exchange::dto::granularity_seconds;
use crate::trading::indicator::{enrich, IndicatorConfig};
use crate::trading::model::{cost_basis, PositionEntity};
use crate::trading::strategy::{Signal, Strategy};

/// 离场决策表的输出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// 括号单继续生效，无动作
    Hold,
    /// 已达盈利线但信号仍看多：让利润奔跑
    HoldWinner,
    /// 浅亏但没有高置信 SELL：持有并告警
    LossWarning,
    Sell(ExitReason),
}

/// 信号确认离场决策表（纯函数，便于直接测试）
///
/// | pnl        | 信号              | 动作                  |
/// | ≥ +5%      | HOLD / SELL      | 卖出 signal_profit_exit |
/// | ≥ +5%      | BUY              | 持有（让利润奔跑）       |
/// | ≤ −2%      | SELL 且 conf≥0.6 | 卖出 signal_loss_exit   |
/// | ≤ −2%      | 其他             | 持有，LOSS WARNING     |
/// | 其余       | —                | 无动作                 |
pub fn decide_exit(
    pnl_pct: Decimal,
    signal: &Signal,
    unprotected: bool,
    cfg: &ExitConfig,
) -> ExitDecision {
    // 无保护持仓：任何 SELL 信号都按紧急离场处理
    if unprotected && signal.is_sell() {
        return ExitDecision::Sell(ExitReason::SignalLossExit);
    }

    if pnl_pct >= cfg.profit_exit_pct {
        if signal.is_buy() {
            return ExitDecision::HoldWinner;
        }
        return ExitDecision::Sell(ExitReason::SignalProfitExit);
    }

    if pnl_pct <= cfg.loss_exit_pct {
        if signal.is_sell() && signal.confidence >= cfg.loss_exit_confidence {
            return ExitDecision::Sell(ExitReason::SignalLossExit);
        }
        return ExitDecision::LossWarning;
    }

    ExitDecision::Hold
}

/// 持仓监控：逐周期把实时价格、费后成本与最新信号拼到离场决策表上
///
/// 它从不绕过订单管理器——所有卖出都走 execute_sell 的撤括号单→市价卖路径。
pub struct PositionMonitor {
    orders: Arc<OrderService>,
    strategy: Strategy,
    indicator_cfg: IndicatorConfig,
    trading_cfg: TradingConfig,
    exit_cfg: ExitConfig,
}

impl PositionMonitor {
    pub fn new(
        orders: Arc<OrderService>,
        strategy: Strategy,
        trading_cfg: TradingConfig,
        exit_cfg: ExitConfig,
    ) -> Self {
        Self {
            orders,
            strategy,
            indicator_cfg: IndicatorConfig::default(),
            trading_cfg,
            exit_cfg,
        }
    }

    /// 扫描全部未平仓位；单个持仓的失败不影响其余
    pub async fn sweep(&self) -> AppResult<()> {
        let positions = self.orders.store().list_open_positions().await?;
        for position in positions {
            if let Err(e) = self.evaluate(&position).await {
                error!("[监控] {} 评估失败: {}", position.product_id, e);
            }
        }
        Ok(())
    }

    async fn evaluate(&self, position: &PositionEntity) -> AppResult<()> {
        let product_id = &position.product_id;

        // 1) 费后成本必须从成交明细现算；本地明细缺失时退回交易所侧回算
        let entry_fills = self.orders.store().entry_fills(position).await?;
        let basis = match cost_basis(&entry_fills) {
            Some(b) => b,
            None => {
                let recomputed = self
                    .orders
                    .gateway()
                    .calculate_cost_basis(product_id, position.opened_at)
                    .await?;
                match recomputed {
                    Some(b) => {
                        warn!("[监控] {} 本地无入场成交，改用交易所成交回算成本 {}", product_id, b);
                        b
                    }
                    None => {
                        warn!("[监控] {} 没有入场成交，跳过", product_id);
                        return Ok(());
                    }
                }
            }
        };

        // 2) 实时价：流式缓存优先，陈旧则网关内部回退 REST
        let last_price = self.orders.gateway().latest_price(product_id).await?;

        // 3) 盈亏比例
        let pnl_pct = (last_price - basis) / basis;

        // 4) 与入场同一条K线管道拿最新信号
        let signal = self.fresh_signal(product_id).await?;

        // 5) 决策表
        match decide_exit(pnl_pct, &signal, position.unprotected, &self.exit_cfg) {
            ExitDecision::Sell(reason) => {
                info!(
                    "[监控] {} 触发离场 reason={} pnl={:.2}% basis={} last={}",
                    product_id,
                    reason.as_str(),
                    pnl_pct * Decimal::ONE_HUNDRED,
                    basis,
                    last_price
                );
                self.orders.execute_sell(position, reason).await?;
            }
            ExitDecision::HoldWinner => {
                info!(
                    "[PROFIT HOLD] {} pnl={:.2}% 信号仍看多(conf={:.2})，让利润奔跑",
                    product_id,
                    pnl_pct * Decimal::ONE_HUNDRED,
                    signal.confidence
                );
            }
            ExitDecision::LossWarning => {
                warn!(
                    "[LOSS WARNING] {} pnl={:.2}% basis={} last={}，无高置信卖出信号，继续持有",
                    product_id,
                    pnl_pct * Decimal::ONE_HUNDRED,
                    basis,
                    last_price
                );
            }
            ExitDecision::Hold => {}
        }
        Ok(())
    }

    async fn fresh_signal(&self, product_id: &str) -> AppResult<Signal> {
        let granularity = &self.trading_cfg.granularity;
        let step = granularity_seconds(granularity);
        let end = chrono::Utc::now().timestamp();
        let start = end - step * self.trading_cfg.candle_history as i64;

        let candles = self
            .orders
            .gateway()
            .get_candles(
                product_id,
                granularity,
                start,
                end,
                self.trading_cfg.candle_history,
            )
            .await?;
        let rows = enrich(&candles, &self.indicator_cfg);
        Ok(self.strategy.analyze(&rows, product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfig;
    use crate::trading::strategy::SignalAction;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn signal(action: SignalAction, confidence: f64) -> Signal {
        Signal {
            action,
            confidence,
            reasons: vec!["test".into()],
            produced_at: 0,
        }
    }

    fn cfg() -> ExitConfig {
        AppConfig::default_for_test().exit
    }

    #[test]
    fn profit_target_with_hold_signal_sells() {
        // +5% 且信号 HOLD → signal_profit_exit
        let decision = decide_exit(d("0.0501"), &signal(SignalAction::Hold, 0.3), false, &cfg());
        assert_eq!(decision, ExitDecision::Sell(ExitReason::SignalProfitExit));
    }

    #[test]
    fn below_profit_target_no_exit() {
        // +3.04% 未到盈利线 → 不动
        let decision = decide_exit(d("0.0304"), &signal(SignalAction::Hold, 0.3), false, &cfg());
        assert_eq!(decision, ExitDecision::Hold);
    }

    #[test]
    fn winner_runs_on_buy_signal() {
        // +5% 以上但信号 BUY(0.72) → 持有
        let decision = decide_exit(d("0.06"), &signal(SignalAction::Buy, 0.72), false, &cfg());
        assert_eq!(decision, ExitDecision::HoldWinner);
    }

    #[test]
    fn confident_sell_cuts_loss() {
        // −2.1% 且 SELL(0.68) → signal_loss_exit
        let decision = decide_exit(d("-0.021"), &signal(SignalAction::Sell, 0.68), false, &cfg());
        assert_eq!(decision, ExitDecision::Sell(ExitReason::SignalLossExit));
    }

    #[test]
    fn shallow_loss_without_conviction_warns() {
        // −2.1% 但只有 HOLD(0.55) → LOSS WARNING，不卖
        let decision = decide_exit(d("-0.021"), &signal(SignalAction::Hold, 0.55), false, &cfg());
        assert_eq!(decision, ExitDecision::LossWarning);
    }

    #[test]
    fn low_confidence_sell_also_warns() {
        let decision = decide_exit(d("-0.021"), &signal(SignalAction::Sell, 0.50), false, &cfg());
        assert_eq!(decision, ExitDecision::LossWarning);
    }

    #[test]
    fn unprotected_position_exits_on_any_sell() {
        let decision = decide_exit(d("-0.005"), &signal(SignalAction::Sell, 0.30), true, &cfg());
        assert_eq!(decision, ExitDecision::Sell(ExitReason::SignalLossExit));
    }
}

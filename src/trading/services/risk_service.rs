use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::app_config::RiskConfig;
use crate::exchange::dto::{quantize, Product};

/// 业务拒绝是值不是错误：调用方按"跳过该候选"处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRejection {
    pub code: &'static str,
    pub detail: String,
}

impl RiskRejection {
    fn new(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// 已有持仓的快照（敞口核算用）
#[derive(Debug, Clone)]
pub struct PositionExposure {
    pub product_id: String,
    pub value_quote: Decimal,
}

/// 回撤跟踪状态，跨周期部分由 BotState 持久化
#[derive(Debug, Clone, Default)]
pub struct DrawdownState {
    pub peak_equity: Decimal,
    pub halted: bool,
}

/// 回撤更新结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawdownEvent {
    NoChange,
    Halted,
    Released,
}

/// 风控：仓位规模、入场准入、回撤熔断，全部为快照上的无状态判断
pub struct RiskService {
    cfg: RiskConfig,
}

/// 通过仓位计算的产出
#[derive(Debug, Clone)]
pub struct SizedEntry {
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub quote_value: Decimal,
}

impl RiskService {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    /// 止损止盈价：入场价按默认比例上下浮动，截断到价格步进
    pub fn stop_take(&self, entry_price: Decimal, product: &Product) -> (Decimal, Decimal) {
        let stop = entry_price * (Decimal::ONE - self.cfg.default_stop_loss);
        let take = entry_price * (Decimal::ONE + self.cfg.default_take_profit);
        (
            quantize(stop, product.quote_increment),
            quantize(take, product.quote_increment),
        )
    }

    /// 风险定仓：size = 权益 × 单笔风险 / |入场 − 止损|，再按单仓上限与产品最小量夹取
    pub fn position_size(
        &self,
        equity: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        product: &Product,
    ) -> Result<SizedEntry, RiskRejection> {
        if entry_price <= Decimal::ZERO {
            return Err(RiskRejection::new("invalid_entry", "入场价必须为正"));
        }
        let risk_per_unit = (entry_price - stop_loss).abs();
        if risk_per_unit.is_zero() {
            return Err(RiskRejection::new(
                "invalid_risk_per_unit",
                "入场价与止损价重合",
            ));
        }

        let risk_amount = equity * self.cfg.risk_per_trade;
        let mut size = risk_amount / risk_per_unit;

        // 单仓市值上限
        let max_size = equity * self.cfg.max_position_size / entry_price;
        if size > max_size {
            info!("仓位被单仓上限夹取: {} -> {}", size, max_size);
            size = max_size;
        }

        let size = quantize(size, product.base_increment);
        if size < product.base_min_size {
            return Err(RiskRejection::new(
                "below_minimum_size",
                format!("{} < 最小数量 {}", size, product.base_min_size),
            ));
        }

        let quote_value = size * entry_price;
        let min_quote = self.cfg.min_quote_trade.max(product.quote_min_size);
        if quote_value < min_quote {
            return Err(RiskRejection::new(
                "below_minimum_value",
                format!("{} < 最小金额 {}", quote_value, min_quote),
            ));
        }

        let (stop_loss, take_profit) = (stop_loss, entry_price * (Decimal::ONE + self.cfg.default_take_profit));
        Ok(SizedEntry {
            size,
            stop_loss,
            take_profit: quantize(take_profit, product.quote_increment),
            quote_value,
        })
    }

    /// 入场准入：同品种已有持仓 / 并发上限 / 总敞口 / 回撤熔断
    pub fn can_open(
        &self,
        product_id: &str,
        intended_quote_value: Decimal,
        equity: Decimal,
        open_positions: &[PositionExposure],
        drawdown: &DrawdownState,
    ) -> Result<(), RiskRejection> {
        if drawdown.halted {
            return Err(RiskRejection::new("drawdown_halt", "回撤熔断生效中"));
        }
        if open_positions.iter().any(|p| p.product_id == product_id) {
            return Err(RiskRejection::new(
                "position_exists",
                format!("{} 已有未平仓位", product_id),
            ));
        }
        if open_positions.len() >= self.cfg.max_concurrent {
            return Err(RiskRejection::new(
                "max_concurrent",
                format!("并发持仓已达上限 {}", self.cfg.max_concurrent),
            ));
        }
        if equity <= Decimal::ZERO {
            return Err(RiskRejection::new("no_equity", "总权益为零"));
        }

        let total_exposure: Decimal = open_positions.iter().map(|p| p.value_quote).sum();
        let new_exposure = (total_exposure + intended_quote_value) / equity;
        if new_exposure > self.cfg.max_total_exposure {
            return Err(RiskRejection::new(
                "max_exposure",
                format!(
                    "总敞口 {:.4} 超上限 {}",
                    new_exposure, self.cfg.max_total_exposure
                ),
            ));
        }
        Ok(())
    }

    /// 回撤更新：刷新峰值，触发/解除熔断
    ///
    /// 解除条件是权益回到峰值的 drawdown_release 比例以上。
    pub fn update_drawdown(&self, equity: Decimal, state: &mut DrawdownState) -> DrawdownEvent {
        if equity > state.peak_equity {
            state.peak_equity = equity;
        }
        if state.peak_equity.is_zero() {
            return DrawdownEvent::NoChange;
        }

        let current_dd = Decimal::ONE - equity / state.peak_equity;

        if !state.halted && current_dd >= self.cfg.max_drawdown {
            state.halted = true;
            warn!(
                "回撤 {:.2}% 超过上限 {:.2}%，停止开新仓",
                current_dd * Decimal::ONE_HUNDRED,
                self.cfg.max_drawdown * Decimal::ONE_HUNDRED
            );
            return DrawdownEvent::Halted;
        }

        if state.halted && equity >= state.peak_equity * self.cfg.drawdown_release {
            state.halted = false;
            info!("权益回升至峰值 {}% 以上，恢复交易", self.cfg.drawdown_release * Decimal::ONE_HUNDRED);
            return DrawdownEvent::Released;
        }

        DrawdownEvent::NoChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfig;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn product() -> Product {
        Product {
            product_id: "BTC-USD".into(),
            base_currency: "BTC".into(),
            quote_currency: "USD".into(),
            base_increment: d("0.00000001"),
            quote_increment: d("0.01"),
            base_min_size: d("0.0001"),
            quote_min_size: d("1"),
            view_only: false,
            trading_disabled: false,
            status: "online".into(),
        }
    }

    fn svc() -> RiskService {
        RiskService::new(AppConfig::default_for_test().risk)
    }

    #[test]
    fn position_size_risk_formula() {
        let svc = svc();
        // 权益 10000，单笔风险 1% = 100；每单位风险 = 100.0 - 98.5 = 1.5
        let sized = svc
            .position_size(d("10000"), d("100.0"), d("98.5"), &product())
            .unwrap();
        // 100 / 1.5 ≈ 66.67，但单仓上限 10% → 10 个
        assert_eq!(sized.size, d("10"));
        assert_eq!(sized.quote_value, d("1000.0"));
    }

    #[test]
    fn tiny_equity_is_rejected() {
        let svc = svc();
        let err = svc
            .position_size(d("50"), d("100.0"), d("98.5"), &product())
            .unwrap_err();
        assert_eq!(err.code, "below_minimum_value");
    }

    #[test]
    fn can_open_rejects_duplicate_and_cap() {
        let svc = svc();
        let dd = DrawdownState::default();
        let open = vec![PositionExposure {
            product_id: "BTC-USD".into(),
            value_quote: d("500"),
        }];

        let err = svc
            .can_open("BTC-USD", d("100"), d("10000"), &open, &dd)
            .unwrap_err();
        assert_eq!(err.code, "position_exists");

        let many: Vec<PositionExposure> = (0..5)
            .map(|i| PositionExposure {
                product_id: format!("P{}-USD", i),
                value_quote: d("10"),
            })
            .collect();
        let err = svc
            .can_open("ETH-USD", d("100"), d("10000"), &many, &dd)
            .unwrap_err();
        assert_eq!(err.code, "max_concurrent");
    }

    #[test]
    fn exposure_cap_blocks_entry() {
        let svc = svc();
        let dd = DrawdownState::default();
        let open = vec![PositionExposure {
            product_id: "ETH-USD".into(),
            value_quote: d("4500"),
        }];
        // 4500 + 600 = 51% > 50%
        let err = svc
            .can_open("BTC-USD", d("600"), d("10000"), &open, &dd)
            .unwrap_err();
        assert_eq!(err.code, "max_exposure");
        // 4500 + 400 = 49% 可以
        assert!(svc
            .can_open("BTC-USD", d("400"), d("10000"), &open, &dd)
            .is_ok());
    }

    #[test]
    fn drawdown_halt_and_release_cycle() {
        // 权益 9500 → 8800 → 8400 再回升 9600 的完整熔断周期
        let svc = svc();
        let mut state = DrawdownState {
            peak_equity: d("10000"),
            halted: false,
        };

        assert_eq!(svc.update_drawdown(d("9500"), &mut state), DrawdownEvent::NoChange);
        assert_eq!(svc.update_drawdown(d("8800"), &mut state), DrawdownEvent::NoChange);
        // 8400 → 回撤 16% ≥ 15%
        assert_eq!(svc.update_drawdown(d("8400"), &mut state), DrawdownEvent::Halted);
        assert!(state.halted);
        assert!(svc
            .can_open("BTC-USD", d("100"), d("8400"), &[], &state)
            .is_err());

        // 9600 ≥ 95% × 10000 → 解除
        assert_eq!(svc.update_drawdown(d("9600"), &mut state), DrawdownEvent::Released);
        assert!(!state.halted);
        assert!(svc
            .can_open("BTC-USD", d("100"), d("9600"), &[], &state)
            .is_ok());
    }
}

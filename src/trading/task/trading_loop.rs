use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::exchange::dto::Product;
use crate::trading::model::bot_state::keys;
use crate::trading::model::{EquitySnapshot, Store};
use crate::trading::services::{
    DrawdownState, EntryOutcome, OrderService, PositionExposure, PositionMonitor, Reconciler,
    RiskService, Scanner,
};
use crate::trading::strategy::SignalAction;

/// 主循环编排
///
/// 每个 tick：对账 → 持仓监控 → 候选扫描 → 入场 → 权益快照/回撤。
/// 单个候选或持仓的失败只跳过自己，绝不让循环崩掉。
pub struct TradingLoop {
    ctx: AppContext,
    orders: Arc<OrderService>,
    risk: Arc<RiskService>,
    reconciler: Arc<Reconciler>,
    monitor: PositionMonitor,
    scanner: Scanner,
    catalog: Arc<DashMap<String, Product>>,
}

impl TradingLoop {
    pub fn new(ctx: AppContext) -> Self {
        let risk = Arc::new(RiskService::new(ctx.config.risk.clone()));
        let orders = Arc::new(OrderService::new(
            ctx.store.clone(),
            ctx.gateway.clone(),
            risk.clone(),
            ctx.config.order.clone(),
            ctx.config.risk.clone(),
            ctx.shutdown.clone(),
            ctx.strategy.name().to_string(),
        ));
        let catalog: Arc<DashMap<String, Product>> = Arc::new(DashMap::new());
        let reconciler = Arc::new(Reconciler::new(
            orders.clone(),
            catalog.clone(),
            ctx.config.order.order_max_age_secs as i64,
        ));
        let monitor = PositionMonitor::new(
            orders.clone(),
            ctx.strategy.clone(),
            ctx.config.trading.clone(),
            ctx.config.exit.clone(),
        );
        let scanner = Scanner::new(
            ctx.gateway.clone(),
            ctx.strategy.clone(),
            ctx.config.trading.clone(),
            ctx.config.risk.min_quote_trade,
        );

        Self {
            ctx,
            orders,
            risk,
            reconciler,
            monitor,
            scanner,
            catalog,
        }
    }

    /// 主入口：启动期检查 → 流式平面 → tick 循环 → 优雅停机
    pub async fn run(self) -> Result<()> {
        self.startup_checks().await?;
        self.spawn_signal_handler();
        self.refresh_catalog().await?;

        // 流式平面与对账器快路径
        let events = self.ctx.gateway.register_order_listener().await;
        self.ctx.gateway.start_streaming();
        tokio::spawn(self.reconciler.clone().run_event_loop(events));

        // 上次停机时的遗留状态
        let mut drawdown = load_drawdown_state(&self.ctx.store).await;
        if drawdown.halted {
            let reason = self
                .ctx
                .store
                .get_state(keys::HALT_REASON)
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            warn!("上次会话遗留回撤熔断: {}，恢复前不开新仓", reason);
        }
        if let Ok(Some(last)) = self.ctx.store.get_state(keys::LAST_EQUITY).await {
            info!("上次会话权益: {}", last);
        }
        self.ctx
            .store
            .put_state(keys::ACTIVE_STRATEGY, self.ctx.strategy.name())
            .await?;

        let loop_sleep = self.ctx.config.trading.loop_sleep_seconds;
        let mut cycle: u64 = 0;
        let mut last_fee_date = Utc::now().date_naive();

        info!("主循环启动，周期 {}s，Ctrl+C 停止", loop_sleep);

        while !self.ctx.shutdown.load(Ordering::Acquire) {
            cycle += 1;
            info!("==== 交易周期 #{} ====", cycle);

            if let Err(e) = self.tick(cycle, &mut drawdown, &mut last_fee_date).await {
                error!("周期 #{} 出错: {:#}", cycle, e);
            }

            // 按秒睡眠以便及时观察停机信号
            for _ in 0..loop_sleep {
                if self.ctx.shutdown.load(Ordering::Acquire) {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        self.graceful_shutdown().await
    }

    async fn startup_checks(&self) -> Result<()> {
        if self.ctx.gateway.is_paper() {
            info!("模拟盘模式，跳过权限检查");
            return Ok(());
        }
        let permissions = self
            .ctx
            .gateway
            .check_permissions()
            .await
            .context("API 权限检查失败，无法启动")?;
        if !permissions.can_view {
            anyhow::bail!("API key 缺少查看权限");
        }
        if !permissions.can_trade {
            anyhow::bail!("实盘模式但 API key 缺少交易权限");
        }
        Ok(())
    }

    fn spawn_signal_handler(&self) {
        let shutdown = self.ctx.shutdown.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("注册 SIGTERM 失败");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            info!("收到停机信号：不再提交新订单，等待在途操作完成");
            shutdown.store(true, Ordering::Release);
        });
    }

    async fn refresh_catalog(&self) -> Result<()> {
        let products = self.ctx.gateway.list_products().await?;
        for product in products {
            self.catalog.insert(product.product_id.clone(), product);
        }
        info!("产品目录加载完成: {} 个", self.catalog.len());
        Ok(())
    }

    async fn tick(
        &self,
        cycle: u64,
        drawdown: &mut DrawdownState,
        last_fee_date: &mut chrono::NaiveDate,
    ) -> Result<()> {
        // 每日手续费汇总
        let today = Utc::now().date_naive();
        if today > *last_fee_date {
            match self.ctx.gateway.get_transaction_summary().await {
                Ok(summary) => info!(
                    "今日费用汇总: fees={} volume={}",
                    summary.total_fees, summary.total_volume
                ),
                Err(e) => warn!("手续费汇总拉取失败: {}", e),
            }
            *last_fee_date = today;
        }

        // 1) 对账
        self.reconciler.sweep().await?;

        // 2) 持仓监控
        self.monitor.sweep().await?;

        // 3) 权益与回撤
        let (cash, exposures) = self.portfolio_snapshot().await?;
        let positions_value: Decimal = exposures.iter().map(|e| e.value_quote).sum();
        let equity = cash + positions_value;
        info!(
            "权益 {} (现金 {} + 持仓 {}), 持仓数 {}",
            equity,
            cash,
            positions_value,
            exposures.len()
        );

        let event = self.risk.update_drawdown(equity, drawdown);
        persist_drawdown_state(&self.ctx.store, drawdown, equity).await?;
        if event != crate::trading::services::risk_service::DrawdownEvent::NoChange {
            info!("回撤状态变化: {:?} (峰值 {})", event, drawdown.peak_equity);
        }

        self.ctx
            .store
            .snapshot_equity(&EquitySnapshot::now(
                cash,
                positions_value,
                exposures.len() as i64,
            ))
            .await?;

        // 4) 回撤熔断时跳过入场
        if drawdown.halted {
            warn!("回撤熔断生效中，本周期跳过扫描与入场");
            return Ok(());
        }

        // 候选选择与并行评估
        let products: Vec<Product> = self.catalog.iter().map(|e| e.value().clone()).collect();
        let universe = self.scanner.tradable_universe(&products);
        let held: HashSet<String> = exposures.iter().map(|e| e.product_id.clone()).collect();
        let candidates = self.scanner.select_candidates(universe, &held).await;

        // 流式订阅跟随关注集
        let watch: Vec<String> = candidates
            .iter()
            .map(|p| p.product_id.clone())
            .chain(held.iter().cloned())
            .collect();
        self.ctx.gateway.subscribe_products(watch).await;

        let opportunities = self.scanner.scan(&candidates).await?;
        let min_confidence = self.ctx.config.trading.min_signal_confidence;

        for opp in opportunities {
            if self.ctx.shutdown.load(Ordering::Acquire) {
                break;
            }
            if opp.action != SignalAction::Buy || opp.confidence < min_confidence {
                continue;
            }
            let Some(product) = self.catalog.get(&opp.product_id).map(|r| r.value().clone()) else {
                continue;
            };

            // 每次入场前重取持仓快照，串行提交防止敞口竞态
            let (cash, exposures) = self.portfolio_snapshot().await?;
            let equity = cash + exposures.iter().map(|e| e.value_quote).sum::<Decimal>();
            let signal = crate::trading::strategy::Signal {
                action: opp.action,
                confidence: opp.confidence,
                reasons: opp.reasons.clone(),
                produced_at: crate::time_util::now_millis(),
            };

            match self
                .orders
                .execute_buy(&product, &signal, equity, &exposures, drawdown)
                .await
            {
                Ok(EntryOutcome::Opened(position_id)) => {
                    info!("{} 开仓成功 position_id={}", opp.product_id, position_id);
                }
                Ok(EntryOutcome::TimedOut) => {
                    info!("{} 入场单超时撤销", opp.product_id);
                }
                Ok(EntryOutcome::Rejected(rej)) => {
                    info!("{} 入场被拒 [{}] {}", opp.product_id, rej.code, rej.detail);
                }
                Err(e) => {
                    error!("{} 入场执行出错: {}", opp.product_id, e);
                }
            }
        }

        // 绩效快照
        if cycle % 10 == 0 {
            match self.ctx.store.get_trade_statistics(30).await {
                Ok(stats) if stats.total_trades > 0 => info!(
                    "近30日绩效: {} 笔, 胜率 {:.1}%, 净盈亏 {}, 盈亏比 {:?}",
                    stats.total_trades,
                    stats.win_rate * 100.0,
                    stats.total_net_pnl,
                    stats.profit_factor
                ),
                Ok(_) => {}
                Err(e) => warn!("绩效统计失败: {}", e),
            }
            if let Ok(curve) = self.ctx.store.get_equity_curve(30).await {
                if let Some(dd) = max_drawdown_of_curve(&curve) {
                    info!("近30日权益曲线最大回撤 {:.2}%", dd * Decimal::ONE_HUNDRED);
                }
            }
        }

        Ok(())
    }

    /// 现金与持仓敞口快照
    ///
    /// 现金 = 计价货币余额合计；持仓价值 = 各持仓入场数量 × 最新价。
    async fn portfolio_snapshot(&self) -> Result<(Decimal, Vec<PositionExposure>)> {
        let mut cash = Decimal::ZERO;
        match self.ctx.gateway.get_accounts().await {
            Ok(balances) => {
                for b in balances {
                    if self
                        .ctx
                        .config
                        .trading
                        .quote_currencies
                        .iter()
                        .any(|q| q == &b.currency)
                    {
                        cash += b.available + b.hold;
                    }
                }
            }
            Err(e) => {
                // 模拟盘无凭证时允许继续，用上次快照的现金
                warn!("余额拉取失败: {}，使用上次快照现金", e);
                if let Ok(Some(last)) = self.ctx.store.get_state(keys::LAST_EQUITY).await {
                    cash = Decimal::from_str(&last).unwrap_or(Decimal::ZERO);
                }
            }
        }

        let mut exposures = Vec::new();
        for position in self.ctx.store.list_open_positions().await? {
            let fills = self.ctx.store.entry_fills(&position).await?;
            let size: Decimal = fills.iter().map(|f| f.size).sum();
            let value = match self.ctx.gateway.latest_price(&position.product_id).await {
                Ok(price) => size * price,
                Err(e) => {
                    warn!("{} 最新价不可得: {}，按成本估值", position.product_id, e);
                    fills.iter().map(|f| f.price * f.size).sum()
                }
            };
            exposures.push(PositionExposure {
                product_id: position.product_id,
                value_quote: value,
            });
        }
        Ok((cash, exposures))
    }

    async fn graceful_shutdown(self) -> Result<()> {
        info!("开始优雅停机");
        self.ctx.gateway.shutdown_streaming();
        // SQLite 每笔事务已落盘，这里只需让在途任务有机会收尾
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!("停机完成");
        Ok(())
    }
}

/// 权益曲线的峰谷最大回撤
fn max_drawdown_of_curve(curve: &[EquitySnapshot]) -> Option<Decimal> {
    let mut peak = Decimal::ZERO;
    let mut max_dd = Decimal::ZERO;
    for point in curve {
        if point.total_quote > peak {
            peak = point.total_quote;
        }
        if !peak.is_zero() {
            let dd = Decimal::ONE - point.total_quote / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    (!curve.is_empty()).then_some(max_dd)
}

async fn load_drawdown_state(store: &Store) -> DrawdownState {
    let peak = store
        .get_state(keys::PEAK_EQUITY)
        .await
        .ok()
        .flatten()
        .and_then(|s| Decimal::from_str(&s).ok())
        .unwrap_or(Decimal::ZERO);
    let halted = store
        .get_state(keys::DRAWDOWN_HALTED)
        .await
        .ok()
        .flatten()
        .map(|s| s == "true")
        .unwrap_or(false);
    DrawdownState {
        peak_equity: peak,
        halted,
    }
}

async fn persist_drawdown_state(
    store: &Store,
    state: &DrawdownState,
    equity: Decimal,
) -> Result<()> {
    store
        .put_state(keys::PEAK_EQUITY, &state.peak_equity.to_string())
        .await?;
    store
        .put_state(
            keys::DRAWDOWN_HALTED,
            if state.halted { "true" } else { "false" },
        )
        .await?;
    if state.halted {
        store
            .put_state(keys::HALT_REASON, "max_drawdown_exceeded")
            .await?;
    } else {
        store.delete_state(keys::HALT_REASON).await?;
    }
    store
        .put_state(keys::LAST_EQUITY, &equity.to_string())
        .await?;
    Ok(())
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::risk_service::{DrawdownState, PositionExposure, RiskService};
use crate::app_config::{OrderConfig, RiskConfig};
use crate::error::{AppError, AppResult};
use crate::exchange::dto::{
    quantize, FillDto, OrderRequest, Product, Side, WireOrderKind,
};
use crate::exchange::ExchangeGateway;
use crate::trading::model::order::{FillEntity, OrderEntity, OrderStatus};
use crate::trading::model::{PositionEntity, Store};
use crate::trading::strategy::Signal;

/// 入场被业务规则拒绝（不是错误，调用方跳过该候选）
#[derive(Debug, Clone)]
pub struct EntryRejection {
    pub code: &'static str,
    pub detail: String,
}

impl EntryRejection {
    fn new(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// 入场前闸门：点差与量能流向（纯函数）
pub fn pre_trade_gate(
    book: &crate::exchange::dto::BidAsk,
    flow: &crate::exchange::dto::VolumeFlow,
    cfg: &RiskConfig,
) -> Result<(), EntryRejection> {
    let spread_pct = book.spread_pct();
    if spread_pct > cfg.max_spread_pct {
        return Err(EntryRejection::new(
            "spread_too_wide",
            format!("spread {:.4} > {:.4}", spread_pct, cfg.max_spread_pct),
        ));
    }
    if flow.buy_pressure < cfg.min_buy_pressure {
        return Err(EntryRejection::new(
            "weak_buy_pressure",
            format!("buy_pressure {:.3}", flow.buy_pressure),
        ));
    }
    Ok(())
}

/// 入场结果
#[derive(Debug)]
pub enum EntryOutcome {
    /// 已开仓（返回持仓 id）
    Opened(i64),
    /// 订单超时撤销，未开仓
    TimedOut,
    /// 被入场闸门/风控拒绝
    Rejected(EntryRejection),
}

/// 离场原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    SignalProfitExit,
    SignalLossExit,
    StopTriggered,
    TpTriggered,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SignalProfitExit => "signal_profit_exit",
            ExitReason::SignalLossExit => "signal_loss_exit",
            ExitReason::StopTriggered => "stop_triggered",
            ExitReason::TpTriggered => "tp_triggered",
            ExitReason::Manual => "manual",
        }
    }
}

/// 订单生命周期管理
///
/// 每个公开操作都要求崩溃安全：进程在任意一步死掉，
/// 重启后由对账器收敛到正确状态。写库先于发单是幽灵订单防护的锚点。
pub struct OrderService {
    store: Store,
    gateway: Arc<ExchangeGateway>,
    risk: Arc<RiskService>,
    order_cfg: OrderConfig,
    risk_cfg: RiskConfig,
    /// 单品种串行化 read → mutate → persist
    product_locks: DashMap<String, Arc<Mutex<()>>>,
    shutdown: Arc<AtomicBool>,
    strategy_name: String,
}

impl OrderService {
    pub fn new(
        store: Store,
        gateway: Arc<ExchangeGateway>,
        risk: Arc<RiskService>,
        order_cfg: OrderConfig,
        risk_cfg: RiskConfig,
        shutdown: Arc<AtomicBool>,
        strategy_name: String,
    ) -> Self {
        Self {
            store,
            gateway,
            risk,
            order_cfg,
            risk_cfg,
            product_locks: DashMap::new(),
            shutdown,
            strategy_name,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<ExchangeGateway> {
        &self.gateway
    }

    fn product_lock(&self, product_id: &str) -> Arc<Mutex<()>> {
        self.product_locks
            .entry(product_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    // ---------------- 买入路径 ----------------

    /// 信号确认的限价买入：闸门 → 定仓 → 写库发单 → 等成交 → 装括号单
    pub async fn execute_buy(
        &self,
        product: &Product,
        signal: &Signal,
        equity: Decimal,
        open_positions: &[PositionExposure],
        drawdown: &DrawdownState,
    ) -> AppResult<EntryOutcome> {
        let product_id = &product.product_id;
        let lock = self.product_lock(product_id);
        let _guard = lock.lock().await;

        if self.shutting_down() {
            return Ok(EntryOutcome::Rejected(EntryRejection::new(
                "shutting_down",
                "正在停机，不再开新仓",
            )));
        }

        // 撤单未确认的品种封锁新入场
        if self.store.has_cancelling_order(product_id).await? {
            return Ok(EntryOutcome::Rejected(EntryRejection::new(
                "cancelling_pending",
                format!("{} 存在撤单未确认的订单", product_id),
            )));
        }

        // 1) 入场前闸门：点差 + 量能流向
        let books = self
            .gateway
            .get_best_bid_ask(&[product_id.clone()])
            .await?;
        let book = books
            .first()
            .ok_or_else(|| AppError::NotFound(format!("没有 {} 的报价", product_id)))?;
        let flow = self.gateway.analyze_volume_flow(product_id, 100).await?;
        let spread_pct = book.spread_pct();
        if let Err(rej) = pre_trade_gate(book, &flow, &self.risk_cfg) {
            info!(
                "[入场闸门] {} 被拒 [{}] {} (spread={:.4}%, 买盘={:.1}%, {})",
                product_id,
                rej.code,
                rej.detail,
                spread_pct * Decimal::ONE_HUNDRED,
                flow.buy_pressure * 100.0,
                flow.net_pressure.as_str()
            );
            return Ok(EntryOutcome::Rejected(rej));
        }

        // 2) 定价与定仓：挂在卖一下方一个步进，赚 maker 返佣
        let entry_price = quantize(book.best_ask - product.quote_increment, product.quote_increment);
        let (stop_loss, _) = self.risk.stop_take(entry_price, product);
        let sized = match self
            .risk
            .position_size(equity, entry_price, stop_loss, product)
        {
            Ok(s) => s,
            Err(rej) => {
                info!("[风控] {} 定仓被拒: {}", product_id, rej);
                return Ok(EntryOutcome::Rejected(EntryRejection::new(
                    rej.code, rej.detail,
                )));
            }
        };

        if let Err(rej) = self.risk.can_open(
            product_id,
            sized.quote_value,
            equity,
            open_positions,
            drawdown,
        ) {
            info!("[风控] {} 入场被拒: {}", product_id, rej);
            return Ok(EntryOutcome::Rejected(EntryRejection::new(rej.code, rej.detail)));
        }

        // 闸门：订单预览的费率与滑点
        let client_order_id = Uuid::new_v4().to_string();
        let request = OrderRequest {
            client_order_id: client_order_id.clone(),
            product_id: product_id.clone(),
            side: Side::Buy,
            kind: WireOrderKind::LimitGtcPostOnly,
            base_size: sized.size,
            limit_price: Some(entry_price),
            stop_price: None,
            post_only: true,
        };
        let preview = self.gateway.preview_order(&request).await?;
        if !sized.quote_value.is_zero() {
            let fee_pct = preview.commission_total / sized.quote_value;
            if fee_pct > self.risk_cfg.max_fee_pct {
                return Ok(EntryOutcome::Rejected(EntryRejection::new(
                    "fee_too_high",
                    format!("fee {:.4} > {:.4}", fee_pct, self.risk_cfg.max_fee_pct),
                )));
            }
        }
        if preview.slippage_pct > self.risk_cfg.max_slippage_pct {
            return Ok(EntryOutcome::Rejected(EntryRejection::new(
                "slippage_too_high",
                format!(
                    "slippage {:.4} > {:.4}",
                    preview.slippage_pct, self.risk_cfg.max_slippage_pct
                ),
            )));
        }

        info!(
            "[买入] {} size={} entry={} stop={} take={} spread={:.4}% 买盘={:.1}%",
            product_id,
            sized.size,
            entry_price,
            sized.stop_loss,
            sized.take_profit,
            spread_pct * Decimal::ONE_HUNDRED,
            flow.buy_pressure * 100.0
        );

        // 3) 提交：先落库（submitted），再发单；发单失败在同一调用内置为 rejected
        let mut order = OrderEntity::new_submitted(
            client_order_id.clone(),
            product_id.clone(),
            Side::Buy,
            WireOrderKind::LimitGtcPostOnly,
            Some(entry_price),
            sized.size,
        );
        order.limit_price = Some(entry_price);
        order.metadata = serde_json::json!({
            "stop_loss": sized.stop_loss.to_string(),
            "take_profit": sized.take_profit.to_string(),
            "signal_confidence": signal.confidence,
            "signal_reasons": signal.reasons,
            "strategy": self.strategy_name,
            "post_only": true,
        });
        self.store.upsert_order(&order).await?;

        let ack = match self.gateway.place_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                error!("[买入] {} 发单失败: {}", product_id, e);
                order.status = OrderStatus::Rejected;
                order.terminal_at = Some(crate::time_util::now_millis());
                order.metadata["reject_reason"] = serde_json::json!(e.to_string());
                self.store.upsert_order(&order).await?;
                return Err(e);
            }
        };
        self.store
            .mark_order_accepted(&client_order_id, &ack.exchange_order_id)
            .await?;
        info!(
            "[买入] {} 已挂单 client_id={} exchange_id={}",
            product_id, client_order_id, ack.exchange_order_id
        );

        // 4) 等成交
        let filled = self
            .wait_for_fill(
                &client_order_id,
                &ack.exchange_order_id,
                self.order_cfg.fill_timeout_secs,
            )
            .await?;

        if !filled {
            // 5) 超时：撤单并确认；部分成交达到下限时仍然开仓
            let status = self.gateway.get_order(&ack.exchange_order_id).await?;
            let fraction = if sized.size.is_zero() {
                Decimal::ZERO
            } else {
                status.filled_size / sized.size
            };
            if fraction >= self.order_cfg.min_fill_fraction && !status.filled_size.is_zero() {
                info!(
                    "[买入] {} 超时但部分成交 {:.2}% 达标，按部分仓位开仓",
                    product_id,
                    fraction * Decimal::ONE_HUNDRED
                );
            } else {
                warn!(
                    "[买入] {} 在 {}s 内未成交，撤单防止幽灵订单",
                    product_id, self.order_cfg.fill_timeout_secs
                );
                self.cancel_and_verify(&client_order_id, &ack.exchange_order_id)
                    .await?;
                return Ok(EntryOutcome::TimedOut);
            }
        }

        // 读取真实成交并落库
        let fills = self.gateway.get_fills(Some(&ack.exchange_order_id), None).await?;
        self.persist_fills(&client_order_id, &fills).await?;
        let maker = fills
            .iter()
            .filter(|f| f.liquidity == crate::exchange::dto::Liquidity::Maker)
            .count();
        info!(
            "[买入] {} 成交 {} 笔，其中 MAKER {} 笔",
            product_id,
            fills.len(),
            maker
        );

        // 开仓 + 装括号单
        let position_id = self
            .open_position_with_brackets(product, &client_order_id, sized.stop_loss, sized.take_profit)
            .await?;
        Ok(EntryOutcome::Opened(position_id))
    }

    /// 秒级轮询订单状态直到成交或超时；每秒观察一次停机信号
    async fn wait_for_fill(
        &self,
        client_order_id: &str,
        exchange_order_id: &str,
        timeout_secs: u64,
    ) -> AppResult<bool> {
        for _ in 0..timeout_secs {
            if self.shutting_down() {
                warn!("停机中，中止订单 {} 的等待", client_order_id);
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;

            let status = self.gateway.get_order(exchange_order_id).await?;
            match status.status.as_str() {
                "FILLED" => return Ok(true),
                "CANCELLED" | "EXPIRED" | "FAILED" => {
                    let to = if status.status == "FAILED" {
                        OrderStatus::Rejected
                    } else {
                        OrderStatus::Cancelled
                    };
                    self.store.transition_order(client_order_id, to).await?;
                    return Ok(false);
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// 撤单并确认。确认失败时把订单置为 cancelling 并上报 CRITICAL，
    /// 对账器会带退避无限重试；期间该品种封锁新入场。
    pub async fn cancel_and_verify(
        &self,
        client_order_id: &str,
        exchange_order_id: &str,
    ) -> AppResult<()> {
        if let Err(e) = self.gateway.cancel_order(exchange_order_id).await {
            warn!("撤单请求失败 {}: {}", client_order_id, e);
        }

        for attempt in 1..=self.order_cfg.cancel_verify_attempts {
            match self.gateway.get_order(exchange_order_id).await {
                Ok(status) => match status.status.as_str() {
                    "CANCELLED" | "EXPIRED" => {
                        self.store
                            .transition_order(client_order_id, OrderStatus::Cancelled)
                            .await?;
                        info!("订单 {} 已确认撤销", client_order_id);
                        return Ok(());
                    }
                    "FILLED" => {
                        // 撤单与成交赛跑输了：按成交处理，fills 由调用方/对账器落库
                        let fills = self
                            .gateway
                            .get_fills(Some(exchange_order_id), None)
                            .await?;
                        self.persist_fills(client_order_id, &fills).await?;
                        info!("订单 {} 在撤单前已成交", client_order_id);
                        return Ok(());
                    }
                    _ => {
                        let _ = self.gateway.cancel_order(exchange_order_id).await;
                    }
                },
                Err(e) => warn!(
                    "撤单确认第 {} 次失败 {}: {}",
                    attempt, client_order_id, e
                ),
            }
            tokio::time::sleep(Duration::from_secs(
                self.order_cfg.cancel_verify_secs / u64::from(self.order_cfg.cancel_verify_attempts.max(1)),
            ))
            .await;
        }

        error!(
            "CRITICAL: 订单 {} 撤单无法确认，交易所侧可能存在幽灵订单",
            client_order_id
        );
        self.store
            .transition_order(client_order_id, OrderStatus::Cancelling)
            .await?;
        Err(AppError::GhostOrderRisk(client_order_id.to_string()))
    }

    /// 把交易所成交明细写入存储（fill_id 幂等）
    pub async fn persist_fills(&self, client_order_id: &str, fills: &[FillDto]) -> AppResult<()> {
        let mut sorted: Vec<&FillDto> = fills.iter().collect();
        sorted.sort_by(|a, b| {
            a.trade_time
                .cmp(&b.trade_time)
                .then_with(|| a.fill_id.cmp(&b.fill_id))
        });
        for fill in sorted {
            self.store
                .record_fill(&FillEntity {
                    fill_id: fill.fill_id.clone(),
                    client_order_id: client_order_id.to_string(),
                    price: fill.price,
                    size: fill.size,
                    fee: fill.fee,
                    liquidity: fill.liquidity,
                    trade_time: fill.trade_time,
                })
                .await?;
        }
        Ok(())
    }

    /// 开仓并立即安装括号单（止损 + 止盈）
    ///
    /// 括号单安装失败重试 3 次，仍失败则标记 unprotected 并上报 CRITICAL。
    pub async fn open_position_with_brackets(
        &self,
        product: &Product,
        entry_order_id: &str,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> AppResult<i64> {
        let entry_order = self
            .store
            .get_order(entry_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("入场订单不存在: {}", entry_order_id)))?;
        let size = entry_order.filled_size;
        if size < product.base_min_size {
            return Err(AppError::Consistency(format!(
                "入场成交量 {} 低于交易所最小量，拒绝开仓",
                size
            )));
        }

        let position_id = self
            .store
            .open_position(&product.product_id, entry_order_id, Some(&self.strategy_name))
            .await?;
        info!(
            "[持仓] {} 开仓 position_id={} size={}",
            product.product_id, position_id, size
        );

        let stop_id = self
            .try_install_bracket(product, position_id, size, BracketKind::Stop(stop_loss))
            .await;
        let tp_id = self
            .try_install_bracket(product, position_id, size, BracketKind::TakeProfit(take_profit))
            .await;

        self.store
            .set_bracket_orders(position_id, stop_id.as_deref(), tp_id.as_deref())
            .await?;

        if stop_id.is_none() || tp_id.is_none() {
            error!(
                "CRITICAL: {} 括号单安装不完整 (stop={:?}, tp={:?})，持仓标记为无保护",
                product.product_id, stop_id, tp_id
            );
            self.store.mark_position_unprotected(position_id).await?;
        }

        Ok(position_id)
    }

    async fn try_install_bracket(
        &self,
        product: &Product,
        position_id: i64,
        size: Decimal,
        kind: BracketKind,
    ) -> Option<String> {
        let mut backoff = Duration::from_millis(500);
        for attempt in 1..=self.order_cfg.bracket_install_attempts {
            match self.place_bracket_order(product, position_id, size, kind).await {
                Ok(client_id) => return Some(client_id),
                Err(e) => {
                    warn!(
                        "{} 括号单第 {} 次安装失败: {}",
                        product.product_id, attempt, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        None
    }

    async fn place_bracket_order(
        &self,
        product: &Product,
        position_id: i64,
        size: Decimal,
        kind: BracketKind,
    ) -> AppResult<String> {
        let client_order_id = Uuid::new_v4().to_string();
        let (wire_kind, limit_price, stop_price, label) = match kind {
            // 止损限价挂在触发价下方 1%，保证触发后能成交
            BracketKind::Stop(stop) => (
                WireOrderKind::StopLimit,
                quantize(stop * Decimal::new(99, 2), product.quote_increment),
                Some(stop),
                "stop_loss",
            ),
            BracketKind::TakeProfit(take) => {
                (WireOrderKind::LimitGtcPostOnly, take, None, "take_profit")
            }
        };

        let mut order = OrderEntity::new_submitted(
            client_order_id.clone(),
            product.product_id.clone(),
            Side::Sell,
            wire_kind,
            Some(limit_price),
            size,
        );
        order.limit_price = Some(limit_price);
        order.stop_price = stop_price;
        order.parent_position_id = Some(position_id);
        order.metadata = serde_json::json!({ "bracket": label });
        self.store.upsert_order(&order).await?;

        let request = OrderRequest {
            client_order_id: client_order_id.clone(),
            product_id: product.product_id.clone(),
            side: Side::Sell,
            kind: wire_kind,
            base_size: size,
            limit_price: Some(limit_price),
            stop_price,
            post_only: false,
        };
        match self.gateway.place_order(&request).await {
            Ok(ack) => {
                self.store
                    .mark_order_accepted(&client_order_id, &ack.exchange_order_id)
                    .await?;
                info!(
                    "[括号单] {} {} @ {} client_id={}",
                    product.product_id, label, limit_price, client_order_id
                );
                Ok(client_order_id)
            }
            Err(e) => {
                order.status = OrderStatus::Rejected;
                order.terminal_at = Some(crate::time_util::now_millis());
                self.store.upsert_order(&order).await?;
                Err(e)
            }
        }
    }

    // ---------------- 卖出路径 ----------------

    /// 离场：先撤括号单，再市价卖出全仓，最后平仓落库
    pub async fn execute_sell(
        &self,
        position: &PositionEntity,
        reason: ExitReason,
    ) -> AppResult<()> {
        let product_id = &position.product_id;
        let lock = self.product_lock(product_id);
        let _guard = lock.lock().await;

        // 1) 撤括号单。任一括号单已经成交则跳过卖出，交给对账器按该成交平仓。
        for bracket_id in [&position.stop_order_id, &position.take_profit_order_id]
            .into_iter()
            .flatten()
        {
            if let Some(order) = self.store.get_order(bracket_id).await? {
                if order.status == OrderStatus::Filled {
                    info!(
                        "[卖出] {} 括号单 {} 已成交，转交对账器处理",
                        product_id, bracket_id
                    );
                    return Ok(());
                }
                if !order.status.is_terminal() {
                    if let Some(ex_id) = &order.exchange_order_id {
                        self.cancel_and_verify(bracket_id, ex_id).await?;
                    }
                }
            }
        }

        // 2) 市价卖出全仓
        let entry_fills = self.store.entry_fills(position).await?;
        let size: Decimal = entry_fills.iter().map(|f| f.size).sum();
        if size.is_zero() {
            return Err(AppError::Consistency(format!(
                "{} 入场成交为空，无法卖出",
                product_id
            )));
        }

        let client_order_id = Uuid::new_v4().to_string();
        let mut order = OrderEntity::new_submitted(
            client_order_id.clone(),
            product_id.clone(),
            Side::Sell,
            WireOrderKind::Market,
            None,
            size,
        );
        order.parent_position_id = Some(position.id);
        order.metadata = serde_json::json!({ "exit_reason": reason.as_str() });
        self.store.upsert_order(&order).await?;

        let ack = match self
            .gateway
            .place_order(&OrderRequest {
                client_order_id: client_order_id.clone(),
                product_id: product_id.clone(),
                side: Side::Sell,
                kind: WireOrderKind::Market,
                base_size: size,
                limit_price: None,
                stop_price: None,
                post_only: false,
            })
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                error!("[卖出] {} 市价单发送失败: {}", product_id, e);
                order.status = OrderStatus::Rejected;
                order.terminal_at = Some(crate::time_util::now_millis());
                self.store.upsert_order(&order).await?;
                return Err(e);
            }
        };
        self.store
            .mark_order_accepted(&client_order_id, &ack.exchange_order_id)
            .await?;

        // 3) 等待成交（市价单很快），然后平仓
        let filled = self
            .wait_for_fill(
                &client_order_id,
                &ack.exchange_order_id,
                self.order_cfg.sell_fill_timeout_secs,
            )
            .await?;
        if !filled {
            error!(
                "CRITICAL: {} 市价卖单 {}s 内未确认成交，持仓状态待对账器收敛",
                product_id, self.order_cfg.sell_fill_timeout_secs
            );
            return Err(AppError::GhostOrderRisk(client_order_id));
        }

        let fills = self
            .gateway
            .get_fills(Some(&ack.exchange_order_id), None)
            .await?;
        self.persist_fills(&client_order_id, &fills).await?;

        let net_pnl = self
            .store
            .close_position(product_id, &client_order_id, reason.as_str())
            .await?;
        info!(
            "[卖出] {} 平仓完成 reason={} net_pnl={}",
            product_id,
            reason.as_str(),
            net_pnl
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum BracketKind {
    Stop(Decimal),
    TakeProfit(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfig;
    use crate::exchange::dto::{BidAsk, NetPressure, VolumeFlow};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn flow(buy_pressure: f64) -> VolumeFlow {
        VolumeFlow {
            buy_volume: d("60"),
            sell_volume: d("40"),
            buy_pressure,
            net_pressure: NetPressure::Neutral,
        }
    }

    #[test]
    fn wide_spread_is_rejected_before_any_order() {
        // bid=100.00 ask=100.80，点差 0.8% 超过 0.5% 上限
        let cfg = AppConfig::default_for_test().risk;
        let book = BidAsk {
            product_id: "XYZ-USD".into(),
            best_bid: d("100.00"),
            best_ask: d("100.80"),
        };
        let rej = pre_trade_gate(&book, &flow(0.60), &cfg).unwrap_err();
        assert_eq!(rej.code, "spread_too_wide");
    }

    #[test]
    fn weak_buy_pressure_is_rejected() {
        let cfg = AppConfig::default_for_test().risk;
        let book = BidAsk {
            product_id: "XYZ-USD".into(),
            best_bid: d("100.00"),
            best_ask: d("100.10"),
        };
        let rej = pre_trade_gate(&book, &flow(0.40), &cfg).unwrap_err();
        assert_eq!(rej.code, "weak_buy_pressure");

        assert!(pre_trade_gate(&book, &flow(0.55), &cfg).is_ok());
    }
}

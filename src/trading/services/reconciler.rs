use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use super::order_service::OrderService;
use crate::error::{AppError, AppResult};
use crate::exchange::dto::{OrderUpdate, Product, Side};
use crate::exchange::ws::WsEvent;
use crate::trading::model::order::{OrderEntity, OrderStatus};
use crate::trading::model::PositionStatus;

/// 对账器：幽灵订单防护的最后一道防线
///
/// 周期轮询是兜底，user 频道事件是低延迟快路径；两条路径应用同一套状态迁移，
/// 无交易所变化时重复执行是幂等的。
pub struct Reconciler {
    orders: Arc<OrderService>,
    /// 产品元信息目录（开仓装括号单时需要）
    catalog: Arc<DashMap<String, Product>>,
    order_max_age_secs: i64,
}

impl Reconciler {
    pub fn new(
        orders: Arc<OrderService>,
        catalog: Arc<DashMap<String, Product>>,
        order_max_age_secs: i64,
    ) -> Self {
        Self {
            orders,
            catalog,
            order_max_age_secs,
        }
    }

    /// 全量扫描所有非终态订单
    pub async fn sweep(&self) -> AppResult<()> {
        let open_orders = self.orders.store().list_open_orders().await?;
        if open_orders.is_empty() {
            return Ok(());
        }
        let stale: std::collections::HashSet<String> = self
            .orders
            .store()
            .list_orders_older_than(self.order_max_age_secs)
            .await?
            .into_iter()
            .map(|o| o.client_order_id)
            .collect();
        debug!(
            "[对账] 扫描 {} 笔非终态订单（超龄 {} 笔）",
            open_orders.len(),
            stale.len()
        );

        for order in open_orders {
            let is_stale = stale.contains(&order.client_order_id);
            if let Err(e) = self.reconcile_order(&order, is_stale).await {
                // 单笔失败不拖垮整轮扫描
                error!("[对账] 订单 {} 处理失败: {}", order.client_order_id, e);
            }
        }
        Ok(())
    }

    async fn reconcile_order(&self, order: &OrderEntity, is_stale: bool) -> AppResult<()> {
        // cancelling 状态无限重试撤单确认
        if order.status == OrderStatus::Cancelling {
            if let Some(ex_id) = &order.exchange_order_id {
                match self.orders.cancel_and_verify(&order.client_order_id, ex_id).await {
                    Ok(()) => info!("[对账] 订单 {} 撤单终于确认", order.client_order_id),
                    Err(e) => warn!("[对账] 订单 {} 撤单仍未确认: {}", order.client_order_id, e),
                }
            }
            return Ok(());
        }

        let exchange_id = match &order.exchange_order_id {
            Some(id) => id.clone(),
            None => {
                // 写库后发单前崩溃：交易所从未见过这个 client_id，超龄即可安全作废
                if is_stale {
                    warn!(
                        "[对账] 订单 {} (提交于 {}) 从未到达交易所，标记 rejected",
                        order.client_order_id,
                        crate::time_util::millis_to_string(order.submitted_at)
                    );
                    self.orders
                        .store()
                        .transition_order(&order.client_order_id, OrderStatus::Rejected)
                        .await?;
                }
                return Ok(());
            }
        };

        // 超龄订单直接撤
        if is_stale {
            warn!(
                "[对账] 订单 {} 已挂 {}s（上限 {}s），撤单",
                order.client_order_id,
                order.age_seconds(crate::time_util::now_millis()),
                self.order_max_age_secs
            );
            match self
                .orders
                .cancel_and_verify(&order.client_order_id, &exchange_id)
                .await
            {
                Ok(()) => {}
                Err(AppError::GhostOrderRisk(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
            // 撤单确认过程中可能发现已成交，继续走状态同步
        }

        let status = self.orders.gateway().get_order(&exchange_id).await?;
        self.apply_status(order, &status.status).await
    }

    /// user 频道快路径：优先按 client_id 定位，退化按 exchange_id
    pub async fn handle_update(&self, update: &OrderUpdate) -> AppResult<()> {
        let order = match &update.client_order_id {
            Some(cid) => self.orders.store().get_order(cid).await?,
            None => None,
        };
        let order = match order {
            Some(o) => Some(o),
            None => {
                self.orders
                    .store()
                    .get_order_by_exchange_id(&update.exchange_order_id)
                    .await?
            }
        };

        let Some(order) = order else {
            // 本地不认识的订单：可能来自人工操作，仅记录
            warn!(
                "[对账] 收到未知订单更新 exchange_id={} status={}",
                update.exchange_order_id, update.status
            );
            return Ok(());
        };

        self.apply_status(&order, &update.status).await
    }

    /// 把交易所侧状态应用到本地订单（幂等）
    async fn apply_status(&self, order: &OrderEntity, exchange_status: &str) -> AppResult<()> {
        match exchange_status {
            "FILLED" => self.on_filled(order).await,
            "CANCELLED" | "EXPIRED" => {
                if !order.status.is_terminal() {
                    let to = if exchange_status == "EXPIRED" {
                        OrderStatus::Expired
                    } else {
                        OrderStatus::Cancelled
                    };
                    self.orders
                        .store()
                        .transition_order(&order.client_order_id, to)
                        .await?;
                    info!("[对账] 订单 {} -> {}", order.client_order_id, to.as_str());
                }
                Ok(())
            }
            "FAILED" => {
                if !order.status.is_terminal() {
                    self.orders
                        .store()
                        .transition_order(&order.client_order_id, OrderStatus::Rejected)
                        .await?;
                }
                Ok(())
            }
            // OPEN / PENDING：无需动作
            _ => Ok(()),
        }
    }

    async fn on_filled(&self, order: &OrderEntity) -> AppResult<()> {
        let exchange_id = order
            .exchange_order_id
            .as_deref()
            .ok_or_else(|| AppError::Consistency("成交订单缺少 exchange_id".into()))?;

        // 落成交明细（幂等），record_fill 会把订单推进到 filled
        let fills = self.orders.gateway().get_fills(Some(exchange_id), None).await?;
        self.orders
            .persist_fills(&order.client_order_id, &fills)
            .await?;

        match order.side {
            Side::Buy => self.on_entry_filled(order).await,
            Side::Sell => self.on_exit_filled(order).await,
        }
    }

    /// 入场单成交：若持仓还不存在则补开仓并安装括号单
    async fn on_entry_filled(&self, order: &OrderEntity) -> AppResult<()> {
        let existing = self
            .orders
            .store()
            .get_open_position(&order.product_id)
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        let Some(product) = self.catalog.get(&order.product_id).map(|r| r.value().clone()) else {
            return Err(AppError::Consistency(format!(
                "产品目录缺少 {}，无法补开仓",
                order.product_id
            )));
        };

        let stop_loss = order
            .metadata
            .get("stop_loss")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());
        let take_profit = order
            .metadata
            .get("take_profit")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());

        let (Some(stop_loss), Some(take_profit)) = (stop_loss, take_profit) else {
            warn!(
                "[对账] 入场单 {} 缺少止损/止盈元数据，跳过补开仓",
                order.client_order_id
            );
            return Ok(());
        };

        info!(
            "[对账] 入场单 {} 已成交但无持仓，补开仓",
            order.client_order_id
        );
        self.orders
            .open_position_with_brackets(&product, &order.client_order_id, stop_loss, take_profit)
            .await?;
        Ok(())
    }

    /// 离场单（括号单或市价卖）成交：平仓并撤掉另一侧括号单
    async fn on_exit_filled(&self, order: &OrderEntity) -> AppResult<()> {
        let Some(position) = self
            .orders
            .store()
            .get_open_position(&order.product_id)
            .await?
        else {
            // 已被主路径平掉
            return Ok(());
        };
        if position.status != PositionStatus::Open {
            return Ok(());
        }

        let is_stop = position.stop_order_id.as_deref() == Some(&order.client_order_id);
        let is_tp = position.take_profit_order_id.as_deref() == Some(&order.client_order_id);
        let reason = if is_stop {
            "stop_triggered"
        } else if is_tp {
            "tp_triggered"
        } else {
            order
                .metadata
                .get("exit_reason")
                .and_then(|v| v.as_str())
                .unwrap_or("manual")
        };

        let net_pnl = self
            .orders
            .store()
            .close_position(&order.product_id, &order.client_order_id, reason)
            .await?;
        info!(
            "[对账] {} 由订单 {} 平仓 reason={} net_pnl={}",
            order.product_id, order.client_order_id, reason, net_pnl
        );

        // 撤掉另一侧括号单，避免裸挂
        let sibling = if is_stop {
            position.take_profit_order_id.clone()
        } else if is_tp {
            position.stop_order_id.clone()
        } else {
            None
        };
        if let Some(sibling_id) = sibling {
            if let Some(sibling_order) = self.orders.store().get_order(&sibling_id).await? {
                if !sibling_order.status.is_terminal() {
                    if let Some(ex_id) = &sibling_order.exchange_order_id {
                        if let Err(e) = self.orders.cancel_and_verify(&sibling_id, ex_id).await {
                            warn!("[对账] 另一侧括号单 {} 撤销失败: {}", sibling_id, e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// 消费流式事件直到通道关闭（独立后台任务）
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut events: tokio::sync::mpsc::UnboundedReceiver<WsEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                WsEvent::Order(update) => {
                    if let Err(e) = self.handle_update(&update).await {
                        error!("[对账] 处理订单更新失败: {}", e);
                    }
                }
                WsEvent::Reconnected => {
                    info!("[对账] 流式连接已恢复，补偿扫描全部非终态订单");
                    if let Err(e) = self.sweep().await {
                        error!("[对账] 重连补偿扫描失败: {}", e);
                    }
                }
            }
        }
        debug!("[对账] 事件通道关闭");
    }
}

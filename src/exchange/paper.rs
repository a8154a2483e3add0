use dashmap::DashMap;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::exchange::dto::*;
use crate::time_util;

/// 模拟盘撮合账本
///
/// place_order 立即回执；市价单与 post-only 限价入场单在 fill_delay_ms 后
/// 按请求价合成一笔成交。触发类与普通限价卖单没有触发引擎，保持挂起、可撤，
/// 离场由持仓监控的市价卖出完成。
/// 所有查询接口与真实 REST 平面同构，上层组件感知不到模式差异。
pub struct PaperBook {
    orders: DashMap<String, PaperOrder>,
    /// client_order_id -> exchange_order_id
    by_client_id: DashMap<String, String>,
    fill_delay_ms: i64,
    maker_fee_rate: Decimal,
    taker_fee_rate: Decimal,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    exchange_order_id: String,
    req: OrderRequest,
    fill_price: Decimal,
    /// 到达该时间点即视为成交；None 表示永不自动成交
    fill_at: Option<i64>,
    cancelled: bool,
}

impl PaperBook {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            by_client_id: DashMap::new(),
            fill_delay_ms: crate::app_config::env::env_i64("PAPER_FILL_DELAY_MS", 500),
            maker_fee_rate: Decimal::from_str("0.004").unwrap(),
            taker_fee_rate: Decimal::from_str("0.006").unwrap(),
        }
    }

    pub fn with_fill_delay_ms(mut self, ms: i64) -> Self {
        self.fill_delay_ms = ms;
        self
    }

    /// 合成下单回执。reference_price 供市价单定价（来自行情缓存或 REST 回退）。
    pub fn place_order(&self, req: &OrderRequest, reference_price: Decimal) -> AppResult<OrderAck> {
        if self.by_client_id.contains_key(&req.client_order_id) {
            return Err(AppError::InvalidRequest(format!(
                "重复的 client_order_id: {}",
                req.client_order_id
            )));
        }

        let now = time_util::now_millis();
        // 市价单与 post_only 限价入场单延迟后按请求价合成成交；
        // 止盈限价卖、止损/括号触发单没有触发引擎，保持挂起直到被撤
        let (fill_price, fill_at) = match req.kind {
            WireOrderKind::Market => (reference_price, Some(now + self.fill_delay_ms)),
            WireOrderKind::LimitGtcPostOnly if req.post_only => (
                req.limit_price.unwrap_or(reference_price),
                Some(now + self.fill_delay_ms),
            ),
            _ => (req.limit_price.unwrap_or(reference_price), None),
        };

        let exchange_order_id = format!("PAPER-{}", Uuid::new_v4());
        let order = PaperOrder {
            exchange_order_id: exchange_order_id.clone(),
            req: req.clone(),
            fill_price,
            fill_at,
            cancelled: false,
        };
        self.orders.insert(exchange_order_id.clone(), order);
        self.by_client_id
            .insert(req.client_order_id.clone(), exchange_order_id.clone());

        Ok(OrderAck {
            exchange_order_id,
            client_order_id: req.client_order_id.clone(),
        })
    }

    fn is_filled(order: &PaperOrder) -> bool {
        !order.cancelled
            && order
                .fill_at
                .map(|at| time_util::now_millis() >= at)
                .unwrap_or(false)
    }

    pub fn cancel_order(&self, exchange_order_id: &str) -> AppResult<bool> {
        let mut entry = self
            .orders
            .get_mut(exchange_order_id)
            .ok_or_else(|| AppError::NotFound(format!("订单不存在: {}", exchange_order_id)))?;
        if Self::is_filled(&entry) {
            // 已成交的订单不可撤
            return Ok(false);
        }
        entry.cancelled = true;
        Ok(true)
    }

    pub fn get_order(&self, exchange_order_id: &str) -> AppResult<OrderStatusDto> {
        let order = self
            .orders
            .get(exchange_order_id)
            .ok_or_else(|| AppError::NotFound(format!("订单不存在: {}", exchange_order_id)))?;

        let (status, filled_size, avg_price) = if order.cancelled {
            ("CANCELLED", Decimal::ZERO, Decimal::ZERO)
        } else if Self::is_filled(&order) {
            ("FILLED", order.req.base_size, order.fill_price)
        } else {
            ("OPEN", Decimal::ZERO, Decimal::ZERO)
        };

        Ok(OrderStatusDto {
            exchange_order_id: order.exchange_order_id.clone(),
            client_order_id: Some(order.req.client_order_id.clone()),
            product_id: order.req.product_id.clone(),
            status: status.to_string(),
            filled_size,
            average_filled_price: avg_price,
        })
    }

    pub fn get_fills(&self, exchange_order_id: &str) -> AppResult<Vec<FillDto>> {
        let order = self
            .orders
            .get(exchange_order_id)
            .ok_or_else(|| AppError::NotFound(format!("订单不存在: {}", exchange_order_id)))?;

        if !Self::is_filled(&order) {
            return Ok(vec![]);
        }

        let (liquidity, fee_rate) = if order.req.post_only {
            (Liquidity::Maker, self.maker_fee_rate)
        } else {
            (Liquidity::Taker, self.taker_fee_rate)
        };
        let notional = order.fill_price * order.req.base_size;

        Ok(vec![FillDto {
            fill_id: format!("{}-f1", order.exchange_order_id),
            exchange_order_id: order.exchange_order_id.clone(),
            product_id: order.req.product_id.clone(),
            side: order.req.side,
            price: order.fill_price,
            size: order.req.base_size,
            fee: notional * fee_rate,
            liquidity,
            trade_time: order.fill_at.unwrap_or_else(time_util::now_millis),
        }])
    }

    /// 该产品最近一次成交的价格（离线市价单定价用）
    pub fn last_price(&self, product_id: &str) -> Option<Decimal> {
        self.orders
            .iter()
            .filter(|o| o.req.product_id == product_id && Self::is_filled(o))
            .max_by_key(|o| o.fill_at)
            .map(|o| o.fill_price)
    }

    /// 按 product 汇总已成交的买单（cost basis 回算用）
    pub fn buy_fills_for_product(&self, product_id: &str) -> Vec<FillDto> {
        // 先收集订单号再逐个取成交，避免持着分片锁做二次查询
        let ids: Vec<String> = self
            .orders
            .iter()
            .filter(|o| {
                o.req.product_id == product_id && o.req.side == Side::Buy && Self::is_filled(o)
            })
            .map(|o| o.exchange_order_id.clone())
            .collect();
        ids.iter()
            .flat_map(|id| self.get_fills(id).unwrap_or_default())
            .collect()
    }
}

impl Default for PaperBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_buy(client_id: &str) -> OrderRequest {
        OrderRequest {
            client_order_id: client_id.to_string(),
            product_id: "BTC-USD".into(),
            side: Side::Buy,
            kind: WireOrderKind::LimitGtcPostOnly,
            base_size: Decimal::from_str("0.01").unwrap(),
            limit_price: Some(Decimal::from_str("50000").unwrap()),
            stop_price: None,
            post_only: true,
        }
    }

    #[tokio::test]
    async fn limit_order_fills_after_delay() {
        let book = PaperBook::new().with_fill_delay_ms(10);
        let ack = book
            .place_order(&limit_buy("c1"), Decimal::from_str("50001").unwrap())
            .unwrap();

        assert_eq!(book.get_order(&ack.exchange_order_id).unwrap().status, "OPEN");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let status = book.get_order(&ack.exchange_order_id).unwrap();
        assert_eq!(status.status, "FILLED");
        let fills = book.get_fills(&ack.exchange_order_id).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, Decimal::from_str("50000").unwrap());
        assert_eq!(fills[0].liquidity, Liquidity::Maker);
    }

    #[tokio::test]
    async fn cancel_before_fill_wins() {
        let book = PaperBook::new().with_fill_delay_ms(5_000);
        let ack = book
            .place_order(&limit_buy("c2"), Decimal::from_str("50001").unwrap())
            .unwrap();
        assert!(book.cancel_order(&ack.exchange_order_id).unwrap());
        assert_eq!(
            book.get_order(&ack.exchange_order_id).unwrap().status,
            "CANCELLED"
        );
        assert!(book.get_fills(&ack.exchange_order_id).unwrap().is_empty());
    }

    #[test]
    fn duplicate_client_id_rejected() {
        let book = PaperBook::new();
        let px = Decimal::from_str("50001").unwrap();
        book.place_order(&limit_buy("c3"), px).unwrap();
        assert!(book.place_order(&limit_buy("c3"), px).is_err());
    }
}

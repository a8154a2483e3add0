use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::error;

use super::store::Store;
use crate::error::{AppError, AppResult};
use crate::exchange::dto::{Liquidity, Side, WireOrderKind};
use crate::time_util;

/// 订单状态机
///
/// submitted -> open -> (partially_filled) -> filled
///                   \-> cancelling -> cancelled
/// 终态（filled/cancelled/expired/rejected）之后不允许任何回退。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Cancelling,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelling => "cancelling",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(OrderStatus::Submitted),
            "open" => Some(OrderStatus::Open),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "cancelling" => Some(OrderStatus::Cancelling),
            "cancelled" => Some(OrderStatus::Cancelled),
            "expired" => Some(OrderStatus::Expired),
            "rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }
}

/// 订单实体（orders 表一行）
#[derive(Debug, Clone)]
pub struct OrderEntity {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub product_id: String,
    pub side: Side,
    pub order_kind: WireOrderKind,
    pub status: OrderStatus,
    pub requested_price: Option<Decimal>,
    pub requested_size: Decimal,
    pub stop_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub filled_size: Decimal,
    pub avg_fill_price: Decimal,
    pub fees: Decimal,
    pub parent_position_id: Option<i64>,
    pub submitted_at: i64,
    pub terminal_at: Option<i64>,
    pub metadata: serde_json::Value,
}

impl OrderEntity {
    /// 新建一条待提交订单
    pub fn new_submitted(
        client_order_id: String,
        product_id: String,
        side: Side,
        order_kind: WireOrderKind,
        requested_price: Option<Decimal>,
        requested_size: Decimal,
    ) -> Self {
        Self {
            client_order_id,
            exchange_order_id: None,
            product_id,
            side,
            order_kind,
            status: OrderStatus::Submitted,
            requested_price,
            requested_size,
            stop_price: None,
            limit_price: None,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fees: Decimal::ZERO,
            parent_position_id: None,
            submitted_at: time_util::now_millis(),
            terminal_at: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn age_seconds(&self, now_ts: i64) -> i64 {
        time_util::age_seconds(self.submitted_at, now_ts)
    }
}

/// 成交实体（fills 表一行）
#[derive(Debug, Clone)]
pub struct FillEntity {
    pub fill_id: String,
    pub client_order_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub liquidity: Liquidity,
    pub trade_time: i64,
}

fn dec(row: &SqliteRow, col: &str) -> Decimal {
    let raw: String = row.get(col);
    Decimal::from_str(&raw).unwrap_or_else(|_| {
        error!("数据库 {} 列解析失败: {}", col, raw);
        Decimal::ZERO
    })
}

fn dec_opt(row: &SqliteRow, col: &str) -> Option<Decimal> {
    let raw: Option<String> = row.get(col);
    raw.and_then(|s| Decimal::from_str(&s).ok())
}

fn row_to_order(row: &SqliteRow) -> AppResult<OrderEntity> {
    let status_raw: String = row.get("status");
    let side_raw: String = row.get("side");
    let kind_raw: String = row.get("order_kind");
    let metadata_raw: String = row.get("metadata");
    Ok(OrderEntity {
        client_order_id: row.get("client_order_id"),
        exchange_order_id: row.get("exchange_order_id"),
        product_id: row.get("product_id"),
        side: Side::from_str(&side_raw)
            .ok_or_else(|| AppError::Consistency(format!("非法 side: {}", side_raw)))?,
        order_kind: WireOrderKind::from_str(&kind_raw)
            .ok_or_else(|| AppError::Consistency(format!("非法 order_kind: {}", kind_raw)))?,
        status: OrderStatus::from_str(&status_raw)
            .ok_or_else(|| AppError::Consistency(format!("非法 status: {}", status_raw)))?,
        requested_price: dec_opt(row, "requested_price"),
        requested_size: dec(row, "requested_size"),
        stop_price: dec_opt(row, "stop_price"),
        limit_price: dec_opt(row, "limit_price"),
        filled_size: dec(row, "filled_size"),
        avg_fill_price: dec(row, "avg_fill_price"),
        fees: dec(row, "fees"),
        parent_position_id: row.get("parent_position_id"),
        submitted_at: row.get("submitted_at"),
        terminal_at: row.get("terminal_at"),
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::json!({})),
    })
}

fn row_to_fill(row: &SqliteRow) -> FillEntity {
    let liquidity_raw: String = row.get("liquidity");
    FillEntity {
        fill_id: row.get("fill_id"),
        client_order_id: row.get("client_order_id"),
        price: dec(row, "price"),
        size: dec(row, "size"),
        fee: dec(row, "fee"),
        liquidity: Liquidity::from_str(&liquidity_raw).unwrap_or(Liquidity::Taker),
        trade_time: row.get("trade_time"),
    }
}

impl Store {
    /// 按 client_order_id 原子插入/更新
    ///
    /// 终态订单不可被重新打开：违反时返回一致性错误并拒绝写入。
    pub async fn upsert_order(&self, order: &OrderEntity) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query("SELECT status FROM orders WHERE client_order_id = ?")
            .bind(&order.client_order_id)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = &existing {
            let status_raw: String = row.get("status");
            let current = OrderStatus::from_str(&status_raw)
                .ok_or_else(|| AppError::Consistency(format!("非法 status: {}", status_raw)))?;
            if current.is_terminal() && current != order.status {
                return Err(AppError::Consistency(format!(
                    "订单 {} 已处于终态 {}，拒绝改写为 {}",
                    order.client_order_id,
                    current.as_str(),
                    order.status.as_str()
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                client_order_id, exchange_order_id, product_id, side, order_kind,
                status, requested_price, requested_size, stop_price, limit_price,
                filled_size, avg_fill_price, fees, parent_position_id,
                submitted_at, terminal_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(client_order_id) DO UPDATE SET
                exchange_order_id = excluded.exchange_order_id,
                status = excluded.status,
                filled_size = excluded.filled_size,
                avg_fill_price = excluded.avg_fill_price,
                fees = excluded.fees,
                parent_position_id = excluded.parent_position_id,
                terminal_at = excluded.terminal_at,
                metadata = excluded.metadata
            "#,
        )
        .bind(&order.client_order_id)
        .bind(&order.exchange_order_id)
        .bind(&order.product_id)
        .bind(order.side.as_str())
        .bind(order.order_kind.as_str())
        .bind(order.status.as_str())
        .bind(order.requested_price.map(|d| d.to_string()))
        .bind(order.requested_size.to_string())
        .bind(order.stop_price.map(|d| d.to_string()))
        .bind(order.limit_price.map(|d| d.to_string()))
        .bind(order.filled_size.to_string())
        .bind(order.avg_fill_price.to_string())
        .bind(order.fees.to_string())
        .bind(order.parent_position_id)
        .bind(order.submitted_at)
        .bind(order.terminal_at)
        .bind(order.metadata.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// 订单状态迁移，终态单调性在此强制
    pub async fn transition_order(
        &self,
        client_order_id: &str,
        to: OrderStatus,
    ) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;
        let row = sqlx::query("SELECT status FROM orders WHERE client_order_id = ?")
            .bind(client_order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("订单不存在: {}", client_order_id)))?;
        let status_raw: String = row.get("status");
        let current = OrderStatus::from_str(&status_raw)
            .ok_or_else(|| AppError::Consistency(format!("非法 status: {}", status_raw)))?;

        if current == to {
            return Ok(());
        }
        if current.is_terminal() {
            return Err(AppError::Consistency(format!(
                "订单 {} 已处于终态 {}，拒绝迁移到 {}",
                client_order_id,
                current.as_str(),
                to.as_str()
            )));
        }

        let terminal_at = to.is_terminal().then(time_util::now_millis);
        sqlx::query(
            "UPDATE orders SET status = ?, terminal_at = COALESCE(?, terminal_at)
             WHERE client_order_id = ?",
        )
        .bind(to.as_str())
        .bind(terminal_at)
        .bind(client_order_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// 记录交易所回执的 exchange_order_id 并把订单置为 open
    pub async fn mark_order_accepted(
        &self,
        client_order_id: &str,
        exchange_order_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE orders SET exchange_order_id = ?, status = ?
             WHERE client_order_id = ? AND status = ?",
        )
        .bind(exchange_order_id)
        .bind(OrderStatus::Open.as_str())
        .bind(client_order_id)
        .bind(OrderStatus::Submitted.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// 追加一笔成交并在同一事务内更新父订单的累计量/均价/费用
    ///
    /// fill_id 幂等：user 频道重复推送不会重复计量。
    /// 累计成交达到请求量时同事务内晋升为 filled。
    pub async fn record_fill(&self, fill: &FillEntity) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO fills (fill_id, client_order_id, price, size, fee, liquidity, trade_time)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fill.fill_id)
        .bind(&fill.client_order_id)
        .bind(fill.price.to_string())
        .bind(fill.size.to_string())
        .bind(fill.fee.to_string())
        .bind(fill.liquidity.as_str())
        .bind(fill.trade_time)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // 重复推送，无需改动父订单
            tx.commit().await?;
            return Ok(());
        }

        let order_row = sqlx::query(
            "SELECT status, requested_size FROM orders WHERE client_order_id = ?",
        )
        .bind(&fill.client_order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::Consistency(format!("成交找不到父订单: {}", fill.client_order_id))
        })?;
        let requested_size = dec(&order_row, "requested_size");

        // 按 (trade_time, fill_id) 升序重算累计值，乱序推送可自愈
        let fill_rows = sqlx::query(
            "SELECT * FROM fills WHERE client_order_id = ? ORDER BY trade_time ASC, fill_id ASC",
        )
        .bind(&fill.client_order_id)
        .fetch_all(&mut *tx)
        .await?;
        let fills: Vec<FillEntity> = fill_rows.iter().map(row_to_fill).collect();

        let total_size: Decimal = fills.iter().map(|f| f.size).sum();
        let notional: Decimal = fills.iter().map(|f| f.price * f.size).sum();
        let total_fees: Decimal = fills.iter().map(|f| f.fee).sum();
        let avg_price = if total_size.is_zero() {
            Decimal::ZERO
        } else {
            notional / total_size
        };

        let complete = total_size >= requested_size;
        let (new_status, terminal_at) = if complete {
            (OrderStatus::Filled, Some(time_util::now_millis()))
        } else {
            (OrderStatus::PartiallyFilled, None)
        };

        sqlx::query(
            "UPDATE orders SET filled_size = ?, avg_fill_price = ?, fees = ?,
                    status = ?, terminal_at = COALESCE(?, terminal_at)
             WHERE client_order_id = ?",
        )
        .bind(total_size.to_string())
        .bind(avg_price.to_string())
        .bind(total_fees.to_string())
        .bind(new_status.as_str())
        .bind(terminal_at)
        .bind(&fill.client_order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_order(&self, client_order_id: &str) -> AppResult<Option<OrderEntity>> {
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = ?")
            .bind(client_order_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    pub async fn get_order_by_exchange_id(
        &self,
        exchange_order_id: &str,
    ) -> AppResult<Option<OrderEntity>> {
        let row = sqlx::query("SELECT * FROM orders WHERE exchange_order_id = ?")
            .bind(exchange_order_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    /// 所有非终态订单（对账器扫描集）
    pub async fn list_open_orders(&self) -> AppResult<Vec<OrderEntity>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE status IN ('submitted','open','partially_filled','cancelling')
             ORDER BY submitted_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    /// 超过给定年龄的非终态订单
    pub async fn list_orders_older_than(&self, age_secs: i64) -> AppResult<Vec<OrderEntity>> {
        let cutoff = time_util::now_millis() - age_secs * 1000;
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE status IN ('submitted','open','partially_filled','cancelling')
             AND submitted_at < ? ORDER BY submitted_at ASC",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    /// 某产品是否存在撤单未确认的订单（新入场封锁条件）
    pub async fn has_cancelling_order(&self, product_id: &str) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(1) AS n FROM orders WHERE product_id = ? AND status = 'cancelling'",
        )
        .bind(product_id)
        .fetch_one(self.pool())
        .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    /// 订单的全部成交，按 (trade_time, fill_id) 升序
    pub async fn list_fills(&self, client_order_id: &str) -> AppResult<Vec<FillEntity>> {
        let rows = sqlx::query(
            "SELECT * FROM fills WHERE client_order_id = ? ORDER BY trade_time ASC, fill_id ASC",
        )
        .bind(client_order_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(row_to_fill).collect())
    }
}

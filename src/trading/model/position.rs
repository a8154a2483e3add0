use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::order::FillEntity;
use super::store::Store;
use crate::error::{AppError, AppResult};
use crate::time_util;

/// 持仓实体（positions 表一行）
///
/// 与括号单之间只存订单号，不存对象引用；解析由存储层完成。
#[derive(Debug, Clone)]
pub struct PositionEntity {
    pub id: i64,
    pub product_id: String,
    pub status: PositionStatus,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
    pub entry_order_id: String,
    pub exit_order_id: Option<String>,
    pub stop_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    /// 括号单安装失败后的标记：监控器把它当作紧急离场候选
    pub unprotected: bool,
    pub strategy: Option<String>,
    pub realized_pnl: Option<Decimal>,
    pub exit_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

/// 费后成本：(Σ(价格·数量) + Σ手续费) / Σ数量
///
/// 只允许从成交明细现算，禁止使用缓存的入场价——部分成交和费用必须重新聚合。
pub fn cost_basis(entry_fills: &[FillEntity]) -> Option<Decimal> {
    let size: Decimal = entry_fills.iter().map(|f| f.size).sum();
    if size.is_zero() {
        return None;
    }
    let notional: Decimal = entry_fills.iter().map(|f| f.price * f.size).sum();
    let fees: Decimal = entry_fills.iter().map(|f| f.fee).sum();
    Some((notional + fees) / size)
}

fn row_to_position(row: &SqliteRow) -> PositionEntity {
    let status_raw: String = row.get("status");
    let pnl_raw: Option<String> = row.get("realized_pnl");
    PositionEntity {
        id: row.get("id"),
        product_id: row.get("product_id"),
        status: if status_raw == "closed" {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        },
        opened_at: row.get("opened_at"),
        closed_at: row.get("closed_at"),
        entry_order_id: row.get("entry_order_id"),
        exit_order_id: row.get("exit_order_id"),
        stop_order_id: row.get("stop_order_id"),
        take_profit_order_id: row.get("take_profit_order_id"),
        unprotected: row.get::<i64, _>("unprotected") != 0,
        strategy: row.get("strategy"),
        realized_pnl: pnl_raw.and_then(|s| s.parse().ok()),
        exit_reason: row.get("exit_reason"),
    }
}

impl Store {
    /// 开仓。同产品已有未平仓位时拒绝（部分唯一索引兜底）。
    pub async fn open_position(
        &self,
        product_id: &str,
        entry_order_id: &str,
        strategy: Option<&str>,
    ) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO positions (product_id, status, opened_at, entry_order_id, strategy)
             VALUES (?, 'open', ?, ?, ?)",
        )
        .bind(product_id)
        .bind(time_util::now_millis())
        .bind(entry_order_id)
        .bind(strategy)
        .execute(self.pool())
        .await;

        match result {
            Ok(r) => Ok(r.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE") => {
                Err(AppError::Consistency(format!(
                    "{} 已存在未平仓位，拒绝重复开仓",
                    product_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_open_position(&self, product_id: &str) -> AppResult<Option<PositionEntity>> {
        let row = sqlx::query("SELECT * FROM positions WHERE product_id = ? AND status = 'open'")
            .bind(product_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| row_to_position(&r)))
    }

    pub async fn list_open_positions(&self) -> AppResult<Vec<PositionEntity>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'open' ORDER BY opened_at")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(row_to_position).collect())
    }

    /// 持仓的入场成交（费后成本的数据源）
    pub async fn entry_fills(&self, position: &PositionEntity) -> AppResult<Vec<FillEntity>> {
        self.list_fills(&position.entry_order_id).await
    }

    /// 记录括号单订单号
    pub async fn set_bracket_orders(
        &self,
        position_id: i64,
        stop_order_id: Option<&str>,
        take_profit_order_id: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE positions SET stop_order_id = ?, take_profit_order_id = ? WHERE id = ?",
        )
        .bind(stop_order_id)
        .bind(take_profit_order_id)
        .bind(position_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_position_unprotected(&self, position_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE positions SET unprotected = 1 WHERE id = ?")
            .bind(position_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// 平仓：同一事务内计算已实现盈亏、写 trade_history、翻转持仓状态
    pub async fn close_position(
        &self,
        product_id: &str,
        exit_order_id: &str,
        exit_reason: &str,
    ) -> AppResult<Decimal> {
        let mut tx = self.pool().begin().await?;

        let pos_row =
            sqlx::query("SELECT * FROM positions WHERE product_id = ? AND status = 'open'")
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    AppError::Consistency(format!("{} 没有未平仓位可平", product_id))
                })?;
        let position = row_to_position(&pos_row);

        let entry_rows = sqlx::query(
            "SELECT * FROM fills WHERE client_order_id = ? ORDER BY trade_time ASC, fill_id ASC",
        )
        .bind(&position.entry_order_id)
        .fetch_all(&mut *tx)
        .await?;
        let exit_rows = sqlx::query(
            "SELECT * FROM fills WHERE client_order_id = ? ORDER BY trade_time ASC, fill_id ASC",
        )
        .bind(exit_order_id)
        .fetch_all(&mut *tx)
        .await?;

        let to_fill = |row: &SqliteRow| -> FillEntity {
            let liq: String = row.get("liquidity");
            FillEntity {
                fill_id: row.get("fill_id"),
                client_order_id: row.get("client_order_id"),
                price: row.get::<String, _>("price").parse().unwrap_or_default(),
                size: row.get::<String, _>("size").parse().unwrap_or_default(),
                fee: row.get::<String, _>("fee").parse().unwrap_or_default(),
                liquidity: crate::exchange::dto::Liquidity::from_str(&liq)
                    .unwrap_or(crate::exchange::dto::Liquidity::Taker),
                trade_time: row.get("trade_time"),
            }
        };
        let entry_fills: Vec<FillEntity> = entry_rows.iter().map(to_fill).collect();
        let exit_fills: Vec<FillEntity> = exit_rows.iter().map(to_fill).collect();

        if exit_fills.is_empty() {
            return Err(AppError::Consistency(format!(
                "平仓订单 {} 没有成交记录",
                exit_order_id
            )));
        }

        let entry_size: Decimal = entry_fills.iter().map(|f| f.size).sum();
        let entry_notional: Decimal = entry_fills.iter().map(|f| f.price * f.size).sum();
        let entry_fees: Decimal = entry_fills.iter().map(|f| f.fee).sum();
        let exit_size: Decimal = exit_fills.iter().map(|f| f.size).sum();
        let exit_notional: Decimal = exit_fills.iter().map(|f| f.price * f.size).sum();
        let exit_fees: Decimal = exit_fills.iter().map(|f| f.fee).sum();

        let avg_entry = if entry_size.is_zero() {
            Decimal::ZERO
        } else {
            entry_notional / entry_size
        };
        let avg_exit = exit_notional / exit_size;

        let gross_pnl = exit_notional - entry_notional;
        let fees = entry_fees + exit_fees;
        let net_pnl = gross_pnl - fees;
        let invested = entry_notional + entry_fees;
        let pnl_pct = if invested.is_zero() {
            Decimal::ZERO
        } else {
            net_pnl / invested
        };

        let now = time_util::now_millis();
        sqlx::query(
            "UPDATE positions SET status = 'closed', closed_at = ?, exit_order_id = ?,
                    realized_pnl = ?, exit_reason = ? WHERE id = ?",
        )
        .bind(now)
        .bind(exit_order_id)
        .bind(net_pnl.to_string())
        .bind(exit_reason)
        .bind(position.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO trade_history (product_id, entry_time, exit_time, avg_entry, avg_exit,
                     size, gross_pnl, fees, net_pnl, pnl_pct, strategy, exit_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(position.opened_at)
        .bind(now)
        .bind(avg_entry.to_string())
        .bind(avg_exit.to_string())
        .bind(exit_size.to_string())
        .bind(gross_pnl.to_string())
        .bind(fees.to_string())
        .bind(net_pnl.to_string())
        .bind(pnl_pct.to_string())
        .bind(&position.strategy)
        .bind(exit_reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(net_pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::dto::Liquidity;
    use std::str::FromStr;

    fn fill(price: &str, size: &str, fee: &str) -> FillEntity {
        FillEntity {
            fill_id: format!("f-{}-{}", price, size),
            client_order_id: "o1".into(),
            price: Decimal::from_str(price).unwrap(),
            size: Decimal::from_str(size).unwrap(),
            fee: Decimal::from_str(fee).unwrap(),
            liquidity: Liquidity::Maker,
            trade_time: 0,
        }
    }

    #[test]
    fn cost_basis_includes_fees_across_partial_fills() {
        // 三笔不同价格的部分成交
        let fills = vec![
            fill("0.007000", "1000", "0.05"),
            fill("0.008000", "500", "0.03"),
            fill("0.006900", "1500", "0.07"),
        ];
        let basis = cost_basis(&fills).unwrap();
        // (7 + 4 + 10.35 + 0.15) / 3000 = 0.0071666...
        assert!(basis > Decimal::from_str("0.007166").unwrap());
        assert!(basis < Decimal::from_str("0.007167").unwrap());
    }

    #[test]
    fn cost_basis_empty_is_none() {
        assert!(cost_basis(&[]).is_none());
    }
}

use rust_decimal::Decimal;
use sqlx::Row;

use super::store::Store;
use crate::error::AppResult;
use crate::time_util;

/// 已平仓交易（trade_history 表一行）
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub product_id: String,
    pub entry_time: i64,
    pub exit_time: i64,
    pub avg_entry: Decimal,
    pub avg_exit: Decimal,
    pub size: Decimal,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub net_pnl: Decimal,
    pub pnl_pct: Decimal,
    pub strategy: Option<String>,
    pub exit_reason: Option<String>,
}

/// 交易统计汇总
#[derive(Debug, Clone, Default)]
pub struct TradeStatistics {
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_net_pnl: Decimal,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: Option<f64>,
}

impl Store {
    pub async fn list_trades_since(&self, days: i64) -> AppResult<Vec<TradeRecord>> {
        let cutoff = time_util::now_millis() - days * 86_400_000;
        let rows = sqlx::query(
            "SELECT * FROM trade_history WHERE exit_time >= ? ORDER BY exit_time ASC",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| TradeRecord {
                product_id: row.get("product_id"),
                entry_time: row.get("entry_time"),
                exit_time: row.get("exit_time"),
                avg_entry: row.get::<String, _>("avg_entry").parse().unwrap_or_default(),
                avg_exit: row.get::<String, _>("avg_exit").parse().unwrap_or_default(),
                size: row.get::<String, _>("size").parse().unwrap_or_default(),
                gross_pnl: row.get::<String, _>("gross_pnl").parse().unwrap_or_default(),
                fees: row.get::<String, _>("fees").parse().unwrap_or_default(),
                net_pnl: row.get::<String, _>("net_pnl").parse().unwrap_or_default(),
                pnl_pct: row.get::<String, _>("pnl_pct").parse().unwrap_or_default(),
                strategy: row.get("strategy"),
                exit_reason: row.get("exit_reason"),
            })
            .collect())
    }

    /// 近 N 天的交易统计（绩效快照用）
    pub async fn get_trade_statistics(&self, days: i64) -> AppResult<TradeStatistics> {
        let trades = self.list_trades_since(days).await?;
        if trades.is_empty() {
            return Ok(TradeStatistics::default());
        }

        let mut stats = TradeStatistics {
            total_trades: trades.len() as i64,
            ..Default::default()
        };
        let mut win_sum = Decimal::ZERO;
        let mut loss_sum = Decimal::ZERO;

        for t in &trades {
            stats.total_net_pnl += t.net_pnl;
            if t.net_pnl > Decimal::ZERO {
                stats.wins += 1;
                win_sum += t.net_pnl;
            } else if t.net_pnl < Decimal::ZERO {
                stats.losses += 1;
                loss_sum += t.net_pnl.abs();
            }
        }

        stats.win_rate = stats.wins as f64 / stats.total_trades as f64;
        if stats.wins > 0 {
            stats.avg_win = win_sum / Decimal::from(stats.wins);
        }
        if stats.losses > 0 {
            stats.avg_loss = loss_sum / Decimal::from(stats.losses);
        }
        if !loss_sum.is_zero() {
            use rust_decimal::prelude::ToPrimitive;
            stats.profit_factor = (win_sum / loss_sum).to_f64();
        }
        Ok(stats)
    }
}

use rust_decimal::Decimal;
use sqlx::Row;

use super::store::Store;
use crate::error::AppResult;
use crate::time_util;

/// 权益快照（equity_curve 表一行）
#[derive(Debug, Clone)]
pub struct EquitySnapshot {
    pub ts: i64,
    pub cash_quote: Decimal,
    pub positions_value_quote: Decimal,
    pub total_quote: Decimal,
    pub open_positions_count: i64,
}

impl EquitySnapshot {
    pub fn now(
        cash_quote: Decimal,
        positions_value_quote: Decimal,
        open_positions_count: i64,
    ) -> Self {
        Self {
            ts: time_util::now_millis(),
            cash_quote,
            positions_value_quote,
            total_quote: cash_quote + positions_value_quote,
            open_positions_count,
        }
    }
}

impl Store {
    pub async fn snapshot_equity(&self, snapshot: &EquitySnapshot) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO equity_curve (ts, cash_quote, positions_value, total_quote, open_positions)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(snapshot.ts)
        .bind(snapshot.cash_quote.to_string())
        .bind(snapshot.positions_value_quote.to_string())
        .bind(snapshot.total_quote.to_string())
        .bind(snapshot.open_positions_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_equity_curve(&self, days: i64) -> AppResult<Vec<EquitySnapshot>> {
        let cutoff = time_util::now_millis() - days * 86_400_000;
        let rows = sqlx::query("SELECT * FROM equity_curve WHERE ts >= ? ORDER BY ts ASC")
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .iter()
            .map(|row| EquitySnapshot {
                ts: row.get("ts"),
                cash_quote: row.get::<String, _>("cash_quote").parse().unwrap_or_default(),
                positions_value_quote: row
                    .get::<String, _>("positions_value")
                    .parse()
                    .unwrap_or_default(),
                total_quote: row.get::<String, _>("total_quote").parse().unwrap_or_default(),
                open_positions_count: row.get("open_positions"),
            })
            .collect())
    }
}

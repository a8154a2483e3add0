use sqlx::Row;

use super::store::Store;
use crate::error::AppResult;
use crate::time_util;

/// bot_state 表常用键
pub mod keys {
    pub const PEAK_EQUITY: &str = "peak_equity";
    pub const DRAWDOWN_HALTED: &str = "drawdown_halted";
    pub const HALT_REASON: &str = "halt_reason";
    pub const LAST_EQUITY: &str = "last_equity";
    pub const ACTIVE_STRATEGY: &str = "active_strategy";
}

impl Store {
    /// 跨周期标量的键值存取（峰值权益、回撤暂停标志等）
    pub async fn put_state(&self, key: &str, value: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO bot_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(time_util::now_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM bot_state WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn delete_state(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM bot_state WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

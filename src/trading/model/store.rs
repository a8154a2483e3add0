use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

use crate::error::AppResult;

/// 持久化存储：单个 SQLite 文件，WAL + synchronous=FULL，事务提交即落盘
///
/// 单逻辑写者，多读者；所有多步变更都在 `sqlx::Transaction` 内完成，
/// 读者只会看到事务前或事务后的状态。
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn connect(db_path: &str) -> AppResult<Self> {
        let pool = if db_path == ":memory:" {
            // 内存库仅测试用：连接间不共享，必须收敛到单连接
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| crate::error::AppError::Other(e.to_string()))?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full)
                .busy_timeout(Duration::from_secs(5))
                .foreign_keys(true);
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.init_schema().await?;
        info!("数据库初始化完成: {}", db_path);
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                client_order_id   TEXT PRIMARY KEY,
                exchange_order_id TEXT,
                product_id        TEXT NOT NULL,
                side              TEXT NOT NULL,
                order_kind        TEXT NOT NULL,
                status            TEXT NOT NULL,
                requested_price   TEXT,
                requested_size    TEXT NOT NULL,
                stop_price        TEXT,
                limit_price       TEXT,
                filled_size       TEXT NOT NULL DEFAULT '0',
                avg_fill_price    TEXT NOT NULL DEFAULT '0',
                fees              TEXT NOT NULL DEFAULT '0',
                parent_position_id INTEGER,
                submitted_at      INTEGER NOT NULL,
                terminal_at       INTEGER,
                metadata          TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                fill_id         TEXT PRIMARY KEY,
                client_order_id TEXT NOT NULL,
                price           TEXT NOT NULL,
                size            TEXT NOT NULL,
                fee             TEXT NOT NULL,
                liquidity       TEXT NOT NULL,
                trade_time      INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id           TEXT NOT NULL,
                status               TEXT NOT NULL DEFAULT 'open',
                opened_at            INTEGER NOT NULL,
                closed_at            INTEGER,
                entry_order_id       TEXT NOT NULL,
                exit_order_id        TEXT,
                stop_order_id        TEXT,
                take_profit_order_id TEXT,
                unprotected          INTEGER NOT NULL DEFAULT 0,
                strategy             TEXT,
                realized_pnl         TEXT,
                exit_reason          TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id   TEXT NOT NULL,
                entry_time   INTEGER NOT NULL,
                exit_time    INTEGER NOT NULL,
                avg_entry    TEXT NOT NULL,
                avg_exit     TEXT NOT NULL,
                size         TEXT NOT NULL,
                gross_pnl    TEXT NOT NULL,
                fees         TEXT NOT NULL,
                net_pnl      TEXT NOT NULL,
                pnl_pct      TEXT NOT NULL,
                strategy     TEXT,
                exit_reason  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                ts              INTEGER NOT NULL,
                cash_quote      TEXT NOT NULL,
                positions_value TEXT NOT NULL,
                total_quote     TEXT NOT NULL,
                open_positions  INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // 单品种最多一个未平仓位，由部分唯一索引兜底
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_positions_open
             ON positions(product_id) WHERE status = 'open'",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_product ON orders(product_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fills_order ON fills(client_order_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_equity_ts ON equity_curve(ts)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

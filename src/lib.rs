pub mod app_config;
pub mod context;
pub mod error;
pub mod exchange;
pub mod time_util;
pub mod trading;

use dotenv::dotenv;

/// 进程初始化：加载 .env 与日志
pub async fn app_init() -> anyhow::Result<()> {
    dotenv().ok();
    let log_dir = app_config::env::env_or_default("LOG_DIR", "logs");
    app_config::log::setup_logging(&log_dir)?;
    Ok(())
}

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::app_config::AppConfig;
use crate::exchange::signer::Credentials;
use crate::exchange::ExchangeGateway;
use crate::trading::model::Store;
use crate::trading::strategy::Strategy;

/// 进程级上下文，显式传递，不做全局单例
///
/// 配置启动后不可变；策略是上下文字段，测试里换一个值即可。
pub struct AppContext {
    pub config: AppConfig,
    pub store: Store,
    pub gateway: Arc<ExchangeGateway>,
    pub strategy: Strategy,
    /// 停机信号：置位后停止开新仓，各长操作每秒观察一次
    pub shutdown: Arc<AtomicBool>,
}

impl AppContext {
    pub async fn init(config: AppConfig) -> Result<Self> {
        let creds = if config.trading.paper_trading_mode {
            // 模拟盘允许无凭证运行（行情端点失败时各组件自行降级）
            Credentials::from_env().unwrap_or_else(|_| Credentials::paper())
        } else {
            Credentials::from_env()?
        };

        let store = Store::connect(&config.trading.db_path).await?;
        let gateway = Arc::new(ExchangeGateway::new(
            creds,
            config.trading.paper_trading_mode,
            config.exit.max_price_staleness_secs,
        ));
        let strategy = Strategy::from_settings(&config.strategy);

        info!(
            "上下文就绪: paper={} strategy={} db={}",
            config.trading.paper_trading_mode,
            strategy.name(),
            config.trading.db_path
        );

        Ok(Self {
            config,
            store,
            gateway,
            strategy,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }
}

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::env::{env_f64, env_is_true, env_or_default, env_u64, env_usize};

/// 读取 Decimal 环境变量（金额/比例类配置统一走定点数）
fn env_decimal(key: &str, default: &str) -> Decimal {
    let raw = env_or_default(key, default);
    Decimal::from_str(raw.trim()).unwrap_or_else(|_| Decimal::from_str(default).unwrap())
}

/// 交易主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// 模拟盘开关：true 时网关内部撮合，不发真实订单
    pub paper_trading_mode: bool,
    /// K线粒度（FIFTEEN_MINUTE 等交易所枚举值）
    pub granularity: String,
    /// 每次分析拉取的K线数量
    pub candle_history: usize,
    /// 主循环周期（秒）
    pub loop_sleep_seconds: u64,
    /// 每轮最多分析的候选产品数
    pub max_products: usize,
    /// 入场所需的最低信号置信度
    pub min_signal_confidence: f64,
    /// 并行分析的 worker 数
    pub scan_workers: usize,
    /// 数据库文件路径
    pub db_path: String,
    /// 计价货币（USD/USDC）
    pub quote_currencies: Vec<String>,
}

/// 风控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// 单笔交易愿意承受的亏损占总权益比例
    pub risk_per_trade: Decimal,
    /// 单个持仓市值占总权益上限
    pub max_position_size: Decimal,
    /// 总敞口占总权益上限
    pub max_total_exposure: Decimal,
    /// 默认止损比例
    pub default_stop_loss: Decimal,
    /// 默认止盈比例
    pub default_take_profit: Decimal,
    /// 最大回撤，超过后停止开新仓
    pub max_drawdown: Decimal,
    /// 回撤恢复阈值：权益回到峰值的该比例以上才解除暂停
    pub drawdown_release: Decimal,
    /// 最大并发持仓数
    pub max_concurrent: usize,
    /// 入场允许的最大点差
    pub max_spread_pct: Decimal,
    /// 入场要求的最低主动买盘占比
    pub min_buy_pressure: f64,
    /// 预览手续费占比上限
    pub max_fee_pct: Decimal,
    /// 预览滑点上限
    pub max_slippage_pct: Decimal,
    /// 最小下单金额（计价货币）
    pub min_quote_trade: Decimal,
}

/// 离场配置（信号确认离场决策表的参数）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// 盈利离场触发线（+5%）
    pub profit_exit_pct: Decimal,
    /// 亏损离场触发线（-2%）
    pub loss_exit_pct: Decimal,
    /// 亏损离场要求的 SELL 信号置信度
    pub loss_exit_confidence: f64,
    /// 流式价格允许的最大陈旧时间（秒），超过则回退 REST
    pub max_price_staleness_secs: u64,
}

/// 订单生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    /// 新提交限价单的等待成交时长（秒）
    pub fill_timeout_secs: u64,
    /// 市价卖单的等待成交时长（秒）
    pub sell_fill_timeout_secs: u64,
    /// 撤单确认时限（秒）与尝试次数
    pub cancel_verify_secs: u64,
    pub cancel_verify_attempts: u32,
    /// 括号单安装重试次数
    pub bracket_install_attempts: u32,
    /// 对账器接管任何非终态订单的年龄上限（秒）
    pub order_max_age_secs: u64,
    /// 超时部分成交的最小可接受比例，低于则撤掉剩余不开仓
    pub min_fill_fraction: Decimal,
}

/// 策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    /// 激活的策略：momentum / mean_reversion / breakout / hybrid
    pub active: String,
    /// hybrid 策略要求的最少同向策略数
    pub hybrid_k: usize,
    /// 触发 BUY/SELL 的最低加权分
    pub score_threshold: f64,
}

/// 进程级配置，启动时装配一次后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub exit: ExitConfig,
    pub order: OrderConfig,
    pub strategy: StrategySettings,
}

impl AppConfig {
    /// 从环境变量装配（.env 已由 app_init 加载）
    pub fn from_env() -> Self {
        Self {
            trading: TradingConfig {
                paper_trading_mode: env_is_true("PAPER_TRADING_MODE", true),
                granularity: env_or_default("CANDLE_GRANULARITY", "FIFTEEN_MINUTE"),
                candle_history: env_usize("CANDLE_HISTORY", 200),
                loop_sleep_seconds: env_u64("LOOP_SLEEP_SECONDS", 60),
                max_products: env_usize("MAX_PRODUCTS", 20),
                min_signal_confidence: env_f64("MIN_SIGNAL_CONFIDENCE", 0.50),
                scan_workers: env_usize("SCAN_WORKERS", 3),
                db_path: env_or_default("DB_PATH", "data/coin_quant.db"),
                quote_currencies: env_or_default("QUOTE_CURRENCIES", "USD,USDC")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            risk: RiskConfig {
                risk_per_trade: env_decimal("RISK_PER_TRADE", "0.01"),
                max_position_size: env_decimal("MAX_POSITION_SIZE", "0.10"),
                max_total_exposure: env_decimal("MAX_TOTAL_EXPOSURE", "0.50"),
                default_stop_loss: env_decimal("DEFAULT_STOP_LOSS", "0.015"),
                default_take_profit: env_decimal("DEFAULT_TAKE_PROFIT", "0.03"),
                max_drawdown: env_decimal("MAX_DRAWDOWN", "0.15"),
                drawdown_release: env_decimal("DRAWDOWN_RELEASE", "0.95"),
                max_concurrent: env_usize("MAX_CONCURRENT", 5),
                max_spread_pct: env_decimal("MAX_SPREAD_PCT", "0.005"),
                min_buy_pressure: env_f64("MIN_BUY_PRESSURE", 0.45),
                max_fee_pct: env_decimal("MAX_FEE_PCT", "0.01"),
                max_slippage_pct: env_decimal("MAX_SLIPPAGE_PCT", "0.005"),
                min_quote_trade: env_decimal("MIN_QUOTE_TRADE", "10"),
            },
            exit: ExitConfig {
                profit_exit_pct: env_decimal("PROFIT_EXIT_PCT", "0.05"),
                loss_exit_pct: env_decimal("LOSS_EXIT_PCT", "-0.02"),
                loss_exit_confidence: env_f64("LOSS_EXIT_CONFIDENCE", 0.60),
                max_price_staleness_secs: env_u64("MAX_PRICE_STALENESS_SECS", 30),
            },
            order: OrderConfig {
                fill_timeout_secs: env_u64("FILL_TIMEOUT_SECS", 30),
                sell_fill_timeout_secs: env_u64("SELL_FILL_TIMEOUT_SECS", 10),
                cancel_verify_secs: env_u64("CANCEL_VERIFY_SECS", 10),
                cancel_verify_attempts: env_u64("CANCEL_VERIFY_ATTEMPTS", 3) as u32,
                bracket_install_attempts: env_u64("BRACKET_INSTALL_ATTEMPTS", 3) as u32,
                order_max_age_secs: env_u64("ORDER_MAX_AGE_SECS", 300),
                min_fill_fraction: env_decimal("MIN_FILL_FRACTION", "1.0"),
            },
            strategy: StrategySettings {
                active: env_or_default("ACTIVE_STRATEGY", "momentum"),
                hybrid_k: env_usize("HYBRID_K", 2),
                score_threshold: env_f64("SIGNAL_SCORE_THRESHOLD", 3.0),
            },
        }
    }

    /// 测试用默认配置（模拟盘 + 内存库）
    pub fn default_for_test() -> Self {
        let mut cfg = Self::from_env();
        cfg.trading.paper_trading_mode = true;
        cfg.trading.db_path = ":memory:".to_string();
        cfg
    }
}

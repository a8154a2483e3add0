use std::path::Path;

use anyhow::Result;
use chrono::Local;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// 文件 appender 的后台线程守卫，进程存活期间必须持有
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// 本次会话的统一时间戳：交易日志、REST 响应日志、WS 日志共用同一个会话标识
static SESSION_STAMP: OnceCell<String> = OnceCell::new();

pub fn session_stamp() -> &'static str {
    SESSION_STAMP.get_or_init(|| Local::now().format("%Y%m%d_%H%M%S").to_string())
}

/// 初始化日志：stdout + 按会话命名的日志文件
///
/// RUST_LOG 控制过滤，默认 info。重复调用直接返回（测试里多个用例共享进程）。
pub fn setup_logging(log_dir: &str) -> Result<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let dir = Path::new(log_dir);
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let file_name = format!("coin_quant_{}.log", session_stamp());
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        );

    // 测试环境下可能已有全局 subscriber，失败时忽略
    if registry.try_init().is_ok() {
        let _ = LOG_GUARD.set(guard);
    }

    Ok(())
}

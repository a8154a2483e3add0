use std::str::FromStr;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::error;

use coin_quant::app_config::AppConfig;
use coin_quant::context::AppContext;
use coin_quant::trading::services::convert_service::ConvertService;
use coin_quant::trading::services::Scanner;
use coin_quant::trading::task::TradingLoop;

/// 退出码：0 正常停机，1 启动失败，2 运行期熔断
const EXIT_FATAL: i32 = 1;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("致命错误: {:#}", e);
        eprintln!("致命错误: {:#}", e);
        std::process::exit(EXIT_FATAL);
    }
}

async fn run() -> Result<()> {
    coin_quant::app_init().await?;
    let config = AppConfig::from_env();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    match command {
        "run" => {
            let ctx = AppContext::init(config).await?;
            TradingLoop::new(ctx).run().await
        }
        "scan" => {
            let ctx = AppContext::init(config).await?;
            let scanner = Scanner::new(
                ctx.gateway.clone(),
                ctx.strategy.clone(),
                ctx.config.trading.clone(),
                ctx.config.risk.min_quote_trade,
            );
            let opportunities = scanner.scan_universe().await?;
            println!("{:<16} {:>8} {:>14}  依据", "产品", "置信度", "最新价");
            for opp in opportunities {
                println!(
                    "{:<16} {:>7.1}% {:>14.6}  {}",
                    opp.product_id,
                    opp.confidence * 100.0,
                    opp.last_price,
                    opp.reasons.join("; ")
                );
            }
            Ok(())
        }
        "convert" => {
            let (from, to, amount) = match (args.get(2), args.get(3), args.get(4)) {
                (Some(f), Some(t), Some(a)) => (f.clone(), t.clone(), Decimal::from_str(a)?),
                _ => anyhow::bail!("用法: coin-quant convert <FROM> <TO> <AMOUNT>"),
            };
            let ctx = AppContext::init(config).await?;
            ConvertService::new(ctx.gateway.clone())
                .convert(&from, &to, amount)
                .await?;
            Ok(())
        }
        other => anyhow::bail!("未知子命令: {}（支持 run / scan / convert）", other),
    }
}

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::error::AppResult;
use crate::exchange::ExchangeGateway;

/// 闪兑：报价 → 提交（CLI convert 子命令的执行体）
pub struct ConvertService {
    gateway: Arc<ExchangeGateway>,
}

impl ConvertService {
    pub fn new(gateway: Arc<ExchangeGateway>) -> Self {
        Self { gateway }
    }

    pub async fn convert(
        &self,
        from_currency: &str,
        to_currency: &str,
        amount: Decimal,
    ) -> AppResult<()> {
        let quote = self
            .gateway
            .create_convert_quote(from_currency, to_currency, amount)
            .await?;
        info!(
            "闪兑报价 {} {} -> {} {}，手续费 {}",
            quote.from_amount, from_currency, quote.to_amount, to_currency, quote.fee
        );
        self.gateway.commit_convert_trade(&quote.quote_id).await?;
        info!("闪兑已提交 quote_id={}", quote.quote_id);
        Ok(())
    }
}

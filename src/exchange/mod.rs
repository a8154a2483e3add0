pub mod dto;
pub mod paper;
pub mod rate_limit;
pub mod rest;
pub mod signer;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use dto::*;
use paper::PaperBook;
use rest::RestClient;
use signer::Credentials;
use ws::{WsEvent, WsService};

/// 交易所网关：REST 平面 + 流式平面 + 模拟盘开关
///
/// 模拟盘是网关内部的单一开关：订单类接口转发到 PaperBook，
/// 行情类接口照常走 REST，其余组件对模式无感知。
pub struct ExchangeGateway {
    rest: RestClient,
    ws: Arc<WsService>,
    paper: Option<PaperBook>,
    price_staleness: Duration,
}

impl ExchangeGateway {
    pub fn new(creds: Credentials, paper_trading: bool, price_staleness_secs: u64) -> Self {
        let ws = Arc::new(WsService::new(creds.clone()));
        Self {
            rest: RestClient::new(creds),
            ws,
            paper: paper_trading.then(PaperBook::new),
            price_staleness: Duration::from_secs(price_staleness_secs),
        }
    }

    pub fn is_paper(&self) -> bool {
        self.paper.is_some()
    }

    /// 覆写模拟盘成交延迟（测试档位）
    pub fn with_paper_fill_delay(mut self, delay_ms: i64) -> Self {
        if let Some(paper) = self.paper.take() {
            self.paper = Some(paper.with_fill_delay_ms(delay_ms));
        }
        self
    }

    /// 启动流式平面（后台任务），返回值无需持有
    pub fn start_streaming(&self) {
        let ws = self.ws.clone();
        tokio::spawn(async move { ws.run().await });
    }

    pub async fn subscribe_products(&self, product_ids: Vec<String>) {
        self.ws.set_products(product_ids).await;
    }

    pub async fn register_order_listener(&self) -> mpsc::UnboundedReceiver<WsEvent> {
        self.ws.register_listener().await
    }

    pub fn shutdown_streaming(&self) {
        self.ws.shutdown();
    }

    // ---------- 行情（两种模式共用 REST） ----------

    pub async fn get_accounts(&self) -> AppResult<Vec<AccountBalance>> {
        self.rest.get_accounts().await
    }

    pub async fn list_products(&self) -> AppResult<Vec<Product>> {
        self.rest.list_products().await
    }

    pub async fn get_candles(
        &self,
        product_id: &str,
        granularity: &str,
        start: i64,
        end: i64,
        limit: usize,
    ) -> AppResult<Vec<Candle>> {
        self.rest
            .get_candles(product_id, granularity, start, end, limit)
            .await
    }

    pub async fn get_best_bid_ask(&self, product_ids: &[String]) -> AppResult<Vec<BidAsk>> {
        self.rest.get_best_bid_ask(product_ids).await
    }

    pub async fn get_transaction_summary(&self) -> AppResult<TransactionSummary> {
        self.rest.get_transaction_summary().await
    }

    pub async fn check_permissions(&self) -> AppResult<ApiPermissions> {
        self.rest.check_permissions().await
    }

    /// 最新价：优先流式缓存，超过陈旧阈值回退 REST 最优买卖价中间价
    pub async fn latest_price(&self, product_id: &str) -> AppResult<Decimal> {
        if let Some(price) = self
            .ws
            .price_cache
            .get_fresh(product_id, self.price_staleness)
            .await
        {
            return Ok(price);
        }
        let books = self
            .rest
            .get_best_bid_ask(&[product_id.to_string()])
            .await?;
        books
            .first()
            .map(|b| b.mid())
            .ok_or_else(|| AppError::NotFound(format!("没有 {} 的报价", product_id)))
    }

    // ---------- 订单（模拟盘在此分流） ----------

    pub async fn preview_order(&self, req: &OrderRequest) -> AppResult<OrderPreview> {
        if self.paper.is_some() {
            // 纸面预览：手续费按 taker 上限估计，滑点为零
            let price = match req.limit_price {
                Some(px) => px,
                None => self.latest_price(&req.product_id).await?,
            };
            let notional = price * req.base_size;
            return Ok(OrderPreview {
                commission_total: notional * Decimal::new(6, 3),
                slippage_pct: Decimal::ZERO,
                average_filled_price: Some(price),
                base_size: req.base_size,
            });
        }
        self.rest.preview_order(req).await
    }

    pub async fn place_order(&self, req: &OrderRequest) -> AppResult<OrderAck> {
        if let Some(paper) = &self.paper {
            // 市价单定价：流式缓存 → 纸面账本最近成交 → REST 回退
            let reference = match req.limit_price {
                Some(px) => px,
                None => match self
                    .ws
                    .price_cache
                    .get_fresh(&req.product_id, self.price_staleness)
                    .await
                {
                    Some(px) => px,
                    None => match paper.last_price(&req.product_id) {
                        Some(px) => px,
                        None => self.latest_price(&req.product_id).await?,
                    },
                },
            };
            let ack = paper.place_order(req, reference)?;
            info!(
                "[PAPER] 下单 client_id={} kind={} {} {}@{}",
                req.client_order_id,
                req.kind.as_str(),
                req.side.as_str(),
                req.base_size,
                reference
            );
            return Ok(ack);
        }
        self.rest.place_order(req).await
    }

    pub async fn cancel_order(&self, exchange_order_id: &str) -> AppResult<bool> {
        if let Some(paper) = &self.paper {
            return paper.cancel_order(exchange_order_id);
        }
        self.rest.cancel_order(exchange_order_id).await
    }

    pub async fn get_order(&self, exchange_order_id: &str) -> AppResult<OrderStatusDto> {
        if let Some(paper) = &self.paper {
            return paper.get_order(exchange_order_id);
        }
        self.rest.get_order(exchange_order_id).await
    }

    pub async fn get_fills(
        &self,
        exchange_order_id: Option<&str>,
        product_id: Option<&str>,
    ) -> AppResult<Vec<FillDto>> {
        if let Some(paper) = &self.paper {
            return match (exchange_order_id, product_id) {
                (Some(oid), _) => paper.get_fills(oid),
                (None, Some(pid)) => Ok(paper.buy_fills_for_product(pid)),
                (None, None) => Ok(vec![]),
            };
        }
        self.rest.get_fills(exchange_order_id, product_id).await
    }

    // ---------- 闪兑 ----------

    pub async fn create_convert_quote(
        &self,
        from_currency: &str,
        to_currency: &str,
        amount: Decimal,
    ) -> AppResult<ConvertQuote> {
        self.rest
            .create_convert_quote(from_currency, to_currency, amount)
            .await
    }

    pub async fn commit_convert_trade(&self, quote_id: &str) -> AppResult<()> {
        self.rest.commit_convert_trade(quote_id).await
    }

    // ---------- 派生分析 ----------

    /// 量能流向：近 lookback 笔逐笔成交的主动买盘占比
    pub async fn analyze_volume_flow(
        &self,
        product_id: &str,
        lookback: usize,
    ) -> AppResult<VolumeFlow> {
        let trades = self.rest.get_recent_trades(product_id, lookback).await?;
        Ok(volume_flow_from_trades(&trades))
    }

    /// 汇总某产品自 since_ts 起尚未归入已平仓位的买方成交，得到费后成本
    pub async fn calculate_cost_basis(
        &self,
        product_id: &str,
        since_ts: i64,
    ) -> AppResult<Option<Decimal>> {
        let fills = self.get_fills(None, Some(product_id)).await?;
        let entry_fills: Vec<&FillDto> = fills
            .iter()
            .filter(|f| f.side == Side::Buy && f.trade_time >= since_ts)
            .collect();
        if entry_fills.is_empty() {
            warn!("{} 没有可用的买方成交，无法计算成本", product_id);
            return Ok(None);
        }
        let notional: Decimal = entry_fills.iter().map(|f| f.price * f.size).sum();
        let fees: Decimal = entry_fills.iter().map(|f| f.fee).sum();
        let size: Decimal = entry_fills.iter().map(|f| f.size).sum();
        if size.is_zero() {
            return Ok(None);
        }
        Ok(Some((notional + fees) / size))
    }
}

/// 按吃单方向汇总量能并映射压力档位
///
/// 档位阈值：≥0.60 强买、≥0.52 偏买、(0.48,0.52) 中性、≤0.48 偏卖、≤0.40 强卖
pub fn volume_flow_from_trades(trades: &[MarketTrade]) -> VolumeFlow {
    let mut buy_volume = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;
    for t in trades {
        match t.side {
            Side::Buy => buy_volume += t.size,
            Side::Sell => sell_volume += t.size,
        }
    }
    let total = buy_volume + sell_volume;
    let buy_pressure = if total.is_zero() {
        0.5
    } else {
        (buy_volume / total).to_f64().unwrap_or(0.5)
    };

    let net_pressure = if buy_pressure >= 0.60 {
        NetPressure::StrongBuy
    } else if buy_pressure >= 0.52 {
        NetPressure::ModerateBuy
    } else if buy_pressure > 0.48 {
        NetPressure::Neutral
    } else if buy_pressure > 0.40 {
        NetPressure::ModerateSell
    } else {
        NetPressure::StrongSell
    };

    VolumeFlow {
        buy_volume,
        sell_volume,
        buy_pressure,
        net_pressure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn trade(side: Side, size: &str) -> MarketTrade {
        MarketTrade {
            trade_id: "t".into(),
            price: Decimal::from_str("100").unwrap(),
            size: Decimal::from_str(size).unwrap(),
            side,
            trade_time: 0,
        }
    }

    #[test]
    fn pressure_tiers() {
        let flow = volume_flow_from_trades(&[trade(Side::Buy, "7"), trade(Side::Sell, "3")]);
        assert_eq!(flow.net_pressure, NetPressure::StrongBuy);
        assert!((flow.buy_pressure - 0.7).abs() < 1e-9);

        let flow = volume_flow_from_trades(&[trade(Side::Buy, "53"), trade(Side::Sell, "47")]);
        assert_eq!(flow.net_pressure, NetPressure::ModerateBuy);

        let flow = volume_flow_from_trades(&[trade(Side::Buy, "1"), trade(Side::Sell, "1")]);
        assert_eq!(flow.net_pressure, NetPressure::Neutral);

        let flow = volume_flow_from_trades(&[trade(Side::Buy, "45"), trade(Side::Sell, "55")]);
        assert_eq!(flow.net_pressure, NetPressure::ModerateSell);

        let flow = volume_flow_from_trades(&[trade(Side::Buy, "3"), trade(Side::Sell, "7")]);
        assert_eq!(flow.net_pressure, NetPressure::StrongSell);
    }

    #[test]
    fn empty_tape_is_neutral() {
        let flow = volume_flow_from_trades(&[]);
        assert_eq!(flow.net_pressure, NetPressure::Neutral);
        assert!((flow.buy_pressure - 0.5).abs() < 1e-9);
    }
}

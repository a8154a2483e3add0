use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::exchange::dto::*;
use crate::exchange::rate_limit::{EndpointClass, RateLimiter};
use crate::exchange::signer::Credentials;

const DEFAULT_BASE_URL: &str = "https://api.exchange.example.com";
/// 瞬时错误最多重试次数与累计退避上限
const MAX_ATTEMPTS: u32 = 5;
const MAX_BACKOFF_TOTAL: Duration = Duration::from_secs(30);

/// REST 平面：带签名、限流、重试的类型化交易所客户端
pub struct RestClient {
    http: Client,
    creds: Credentials,
    base_url: String,
    limiter: RateLimiter,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl RestClient {
    pub fn new(creds: Credentials) -> Self {
        let base_url =
            std::env::var("EXCHANGE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client 构建失败");
        Self {
            http,
            creds,
            base_url,
            limiter: RateLimiter::new(),
        }
    }

    /// 发送已签名请求并反序列化响应；瞬时错误/限流按指数退避重试
    async fn send_request<T: DeserializeOwned>(
        &self,
        class: EndpointClass,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> AppResult<T> {
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let mut backoff = Duration::from_millis(500);
        let mut slept = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.acquire(class).await;

            match self.do_send(method.clone(), path, &body_str).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS && slept < MAX_BACKOFF_TOTAL => {
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    let wait = (backoff + jitter).min(MAX_BACKOFF_TOTAL - slept);
                    warn!(
                        "请求重试 path={} attempt={} wait={:?} err={}",
                        path, attempt, wait, e
                    );
                    tokio::time::sleep(wait).await;
                    slept += wait;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn do_send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> AppResult<T> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.creds.sign(&timestamp, method.as_str(), path, body);
        let url = format!("{}{}", self.base_url, path);

        let mut builder = self
            .http
            .request(method, &url)
            .header("CB-ACCESS-KEY", &self.creds.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("Content-Type", "application/json");
        if !body.is_empty() {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await.map_err(AppError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(AppError::from)?;
        debug!("path={} status={} resp={}", path, status, text);

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(AppError::Serde);
        }

        let wire: WireError = serde_json::from_str(&text).unwrap_or(WireError {
            code: status.as_u16().to_string(),
            message: text.clone(),
        });
        let msg = format!("{} {}: {}", status, wire.code, wire.message);
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited(msg),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Auth(msg),
            StatusCode::NOT_FOUND => AppError::NotFound(msg),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                AppError::InvalidRequest(msg)
            }
            s if s.is_server_error() => AppError::Transient(msg),
            _ => AppError::Other(msg),
        })
    }

    // ---------- 账户 ----------

    pub async fn get_accounts(&self) -> AppResult<Vec<AccountBalance>> {
        #[derive(Deserialize)]
        struct RawBalance {
            value: Decimal,
        }
        #[derive(Deserialize)]
        struct RawAccount {
            currency: String,
            available_balance: RawBalance,
            hold: RawBalance,
        }
        #[derive(Deserialize)]
        struct Resp {
            accounts: Vec<RawAccount>,
        }
        let resp: Resp = self
            .send_request(
                EndpointClass::PrivateAccount,
                Method::GET,
                "/api/v3/brokerage/accounts?limit=250",
                None,
            )
            .await?;
        Ok(resp
            .accounts
            .into_iter()
            .map(|a| AccountBalance {
                currency: a.currency,
                available: a.available_balance.value,
                hold: a.hold.value,
            })
            .collect())
    }

    pub async fn check_permissions(&self) -> AppResult<ApiPermissions> {
        self.send_request(
            EndpointClass::PrivateAccount,
            Method::GET,
            "/api/v3/brokerage/key_permissions",
            None,
        )
        .await
    }

    pub async fn get_transaction_summary(&self) -> AppResult<TransactionSummary> {
        #[derive(Deserialize)]
        struct RawFeeTier {
            maker_fee_rate: Decimal,
            taker_fee_rate: Decimal,
        }
        #[derive(Deserialize)]
        struct Resp {
            total_fees: Decimal,
            total_volume: Decimal,
            fee_tier: RawFeeTier,
        }
        let resp: Resp = self
            .send_request(
                EndpointClass::PrivateAccount,
                Method::GET,
                "/api/v3/brokerage/transaction_summary",
                None,
            )
            .await?;
        Ok(TransactionSummary {
            total_fees: resp.total_fees,
            total_volume: resp.total_volume,
            maker_fee_rate: resp.fee_tier.maker_fee_rate,
            taker_fee_rate: resp.fee_tier.taker_fee_rate,
        })
    }

    // ---------- 行情 ----------

    pub async fn list_products(&self) -> AppResult<Vec<Product>> {
        #[derive(Deserialize)]
        struct RawProduct {
            product_id: String,
            base_currency_id: String,
            quote_currency_id: String,
            base_increment: Decimal,
            quote_increment: Decimal,
            base_min_size: Decimal,
            quote_min_size: Decimal,
            #[serde(default)]
            view_only: bool,
            #[serde(default)]
            trading_disabled: bool,
            status: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            products: Vec<RawProduct>,
        }
        let resp: Resp = self
            .send_request(
                EndpointClass::PublicMarket,
                Method::GET,
                "/api/v3/brokerage/products",
                None,
            )
            .await?;
        Ok(resp
            .products
            .into_iter()
            .map(|p| Product {
                product_id: p.product_id,
                base_currency: p.base_currency_id,
                quote_currency: p.quote_currency_id,
                base_increment: p.base_increment,
                quote_increment: p.quote_increment,
                base_min_size: p.base_min_size,
                quote_min_size: p.quote_min_size,
                view_only: p.view_only,
                trading_disabled: p.trading_disabled,
                status: p.status,
            })
            .collect())
    }

    /// 拉取K线，按开盘时间升序返回
    pub async fn get_candles(
        &self,
        product_id: &str,
        granularity: &str,
        start: i64,
        end: i64,
        limit: usize,
    ) -> AppResult<Vec<Candle>> {
        #[derive(Deserialize)]
        struct RawCandle {
            start: String,
            open: Decimal,
            high: Decimal,
            low: Decimal,
            close: Decimal,
            volume: Decimal,
        }
        #[derive(Deserialize)]
        struct Resp {
            candles: Vec<RawCandle>,
        }
        let path = format!(
            "/api/v3/brokerage/products/{}/candles?granularity={}&start={}&end={}&limit={}",
            product_id, granularity, start, end, limit
        );
        let resp: Resp = self
            .send_request(EndpointClass::PublicMarket, Method::GET, &path, None)
            .await?;
        let mut candles: Vec<Candle> = resp
            .candles
            .into_iter()
            .filter_map(|c| {
                let secs: i64 = c.start.parse().ok()?;
                Some(Candle {
                    start_time: secs * 1000,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                })
            })
            .collect();
        candles.sort_by_key(|c| c.start_time);
        Ok(candles)
    }

    pub async fn get_best_bid_ask(&self, product_ids: &[String]) -> AppResult<Vec<BidAsk>> {
        #[derive(Deserialize)]
        struct RawLevel {
            price: Decimal,
        }
        #[derive(Deserialize)]
        struct RawBook {
            product_id: String,
            bids: Vec<RawLevel>,
            asks: Vec<RawLevel>,
        }
        #[derive(Deserialize)]
        struct Resp {
            pricebooks: Vec<RawBook>,
        }
        let path = format!(
            "/api/v3/brokerage/best_bid_ask?product_ids={}",
            product_ids.join(",")
        );
        let resp: Resp = self
            .send_request(EndpointClass::PublicMarket, Method::GET, &path, None)
            .await?;
        Ok(resp
            .pricebooks
            .into_iter()
            .filter_map(|b| {
                Some(BidAsk {
                    product_id: b.product_id,
                    best_bid: b.bids.first()?.price,
                    best_ask: b.asks.first()?.price,
                })
            })
            .collect())
    }

    pub async fn get_recent_trades(
        &self,
        product_id: &str,
        limit: usize,
    ) -> AppResult<Vec<MarketTrade>> {
        #[derive(Deserialize)]
        struct RawTrade {
            trade_id: String,
            price: Decimal,
            size: Decimal,
            side: String,
            time: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            trades: Vec<RawTrade>,
        }
        let path = format!(
            "/api/v3/brokerage/products/{}/ticker?limit={}",
            product_id, limit
        );
        let resp: Resp = self
            .send_request(EndpointClass::PublicMarket, Method::GET, &path, None)
            .await?;
        Ok(resp
            .trades
            .into_iter()
            .filter_map(|t| {
                Some(MarketTrade {
                    trade_id: t.trade_id,
                    price: t.price,
                    size: t.size,
                    side: Side::from_str(&t.side)?,
                    trade_time: chrono::DateTime::parse_from_rfc3339(&t.time)
                        .ok()?
                        .timestamp_millis(),
                })
            })
            .collect())
    }

    // ---------- 订单 ----------

    pub async fn preview_order(&self, req: &OrderRequest) -> AppResult<OrderPreview> {
        #[derive(Deserialize)]
        struct Resp {
            commission_total: Decimal,
            slippage: Decimal,
            #[serde(default)]
            average_filled_price: Option<Decimal>,
            base_size: Decimal,
        }
        let body = self.order_body(req);
        let resp: Resp = self
            .send_request(
                EndpointClass::Orders,
                Method::POST,
                "/api/v3/brokerage/orders/preview",
                Some(body),
            )
            .await?;
        Ok(OrderPreview {
            commission_total: resp.commission_total,
            slippage_pct: resp.slippage,
            average_filled_price: resp.average_filled_price,
            base_size: resp.base_size,
        })
    }

    pub async fn place_order(&self, req: &OrderRequest) -> AppResult<OrderAck> {
        #[derive(Deserialize)]
        struct RespSuccess {
            order_id: String,
            client_order_id: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            success: bool,
            #[serde(default)]
            success_response: Option<RespSuccess>,
            #[serde(default)]
            failure_reason: Option<String>,
        }
        let body = self.order_body(req);
        let resp: Resp = self
            .send_request(
                EndpointClass::Orders,
                Method::POST,
                "/api/v3/brokerage/orders",
                Some(body),
            )
            .await?;
        if !resp.success {
            return Err(AppError::InvalidRequest(
                resp.failure_reason
                    .unwrap_or_else(|| "下单被交易所拒绝".into()),
            ));
        }
        let ok = resp
            .success_response
            .ok_or_else(|| AppError::Other("下单成功但缺少回执".into()))?;
        Ok(OrderAck {
            exchange_order_id: ok.order_id,
            client_order_id: ok.client_order_id,
        })
    }

    /// 按订单类型组装下单报文
    fn order_body(&self, req: &OrderRequest) -> serde_json::Value {
        let configuration = match req.kind {
            WireOrderKind::Market => json!({
                "market_market_ioc": { "base_size": req.base_size.to_string() }
            }),
            WireOrderKind::LimitGtcPostOnly => json!({
                "limit_limit_gtc": {
                    "base_size": req.base_size.to_string(),
                    "limit_price": req.limit_price.unwrap_or_default().to_string(),
                    "post_only": req.post_only,
                }
            }),
            WireOrderKind::StopLimit => json!({
                "stop_limit_stop_limit_gtc": {
                    "base_size": req.base_size.to_string(),
                    "limit_price": req.limit_price.unwrap_or_default().to_string(),
                    "stop_price": req.stop_price.unwrap_or_default().to_string(),
                    "stop_direction": "STOP_DIRECTION_STOP_DOWN",
                }
            }),
            WireOrderKind::BracketGtc => json!({
                "trigger_bracket_gtc": {
                    "base_size": req.base_size.to_string(),
                    "limit_price": req.limit_price.unwrap_or_default().to_string(),
                    "stop_trigger_price": req.stop_price.unwrap_or_default().to_string(),
                }
            }),
        };
        json!({
            "client_order_id": req.client_order_id,
            "product_id": req.product_id,
            "side": req.side.as_str(),
            "order_configuration": configuration,
        })
    }

    pub async fn cancel_order(&self, exchange_order_id: &str) -> AppResult<bool> {
        #[derive(Deserialize)]
        struct RawResult {
            success: bool,
        }
        #[derive(Deserialize)]
        struct Resp {
            results: Vec<RawResult>,
        }
        let body = json!({ "order_ids": [exchange_order_id] });
        let resp: Resp = self
            .send_request(
                EndpointClass::Orders,
                Method::POST,
                "/api/v3/brokerage/orders/batch_cancel",
                Some(body),
            )
            .await?;
        Ok(resp.results.first().map(|r| r.success).unwrap_or(false))
    }

    pub async fn get_order(&self, exchange_order_id: &str) -> AppResult<OrderStatusDto> {
        #[derive(Deserialize)]
        struct RawOrder {
            order_id: String,
            #[serde(default)]
            client_order_id: Option<String>,
            product_id: String,
            status: String,
            #[serde(default)]
            filled_size: Decimal,
            #[serde(default)]
            average_filled_price: Decimal,
        }
        #[derive(Deserialize)]
        struct Resp {
            order: RawOrder,
        }
        let path = format!("/api/v3/brokerage/orders/historical/{}", exchange_order_id);
        let resp: Resp = self
            .send_request(EndpointClass::Orders, Method::GET, &path, None)
            .await?;
        Ok(OrderStatusDto {
            exchange_order_id: resp.order.order_id,
            client_order_id: resp.order.client_order_id,
            product_id: resp.order.product_id,
            status: resp.order.status,
            filled_size: resp.order.filled_size,
            average_filled_price: resp.order.average_filled_price,
        })
    }

    pub async fn get_fills(
        &self,
        exchange_order_id: Option<&str>,
        product_id: Option<&str>,
    ) -> AppResult<Vec<FillDto>> {
        #[derive(Deserialize)]
        struct RawFill {
            trade_id: String,
            order_id: String,
            product_id: String,
            side: String,
            price: Decimal,
            size: Decimal,
            commission: Decimal,
            liquidity_indicator: String,
            trade_time: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            fills: Vec<RawFill>,
        }
        let mut path = "/api/v3/brokerage/orders/historical/fills?limit=250".to_string();
        if let Some(oid) = exchange_order_id {
            path.push_str(&format!("&order_id={}", oid));
        }
        if let Some(pid) = product_id {
            path.push_str(&format!("&product_id={}", pid));
        }
        let resp: Resp = self
            .send_request(EndpointClass::Orders, Method::GET, &path, None)
            .await?;
        Ok(resp
            .fills
            .into_iter()
            .filter_map(|f| {
                Some(FillDto {
                    fill_id: f.trade_id,
                    exchange_order_id: f.order_id,
                    product_id: f.product_id,
                    side: Side::from_str(&f.side)?,
                    price: f.price,
                    size: f.size,
                    fee: f.commission,
                    liquidity: Liquidity::from_str(&f.liquidity_indicator)
                        .unwrap_or(Liquidity::Taker),
                    trade_time: chrono::DateTime::parse_from_rfc3339(&f.trade_time)
                        .ok()?
                        .timestamp_millis(),
                })
            })
            .collect())
    }

    // ---------- 闪兑 ----------

    pub async fn create_convert_quote(
        &self,
        from_currency: &str,
        to_currency: &str,
        amount: Decimal,
    ) -> AppResult<ConvertQuote> {
        #[derive(Deserialize)]
        struct RawTrade {
            id: String,
            from_amount: Decimal,
            to_amount: Decimal,
            fee: Decimal,
        }
        #[derive(Deserialize)]
        struct Resp {
            trade: RawTrade,
        }
        let body = json!({
            "from_account": from_currency,
            "to_account": to_currency,
            "amount": amount.to_string(),
        });
        let resp: Resp = self
            .send_request(
                EndpointClass::Orders,
                Method::POST,
                "/api/v3/brokerage/convert/quote",
                Some(body),
            )
            .await?;
        Ok(ConvertQuote {
            quote_id: resp.trade.id,
            from_currency: from_currency.to_string(),
            to_currency: to_currency.to_string(),
            from_amount: resp.trade.from_amount,
            to_amount: resp.trade.to_amount,
            fee: resp.trade.fee,
        })
    }

    pub async fn commit_convert_trade(&self, quote_id: &str) -> AppResult<()> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            #[allow(dead_code)]
            trade: serde_json::Value,
        }
        let path = format!("/api/v3/brokerage/convert/trade/{}", quote_id);
        let _: Resp = self
            .send_request(EndpointClass::Orders, Method::POST, &path, Some(json!({})))
            .await?;
        Ok(())
    }
}

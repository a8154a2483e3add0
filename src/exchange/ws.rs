use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::exchange::dto::OrderUpdate;
use crate::exchange::signer::Credentials;

const DEFAULT_WS_URL: &str = "wss://ws.exchange.example.com";
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 流式事件：订单更新走快路径，重连事件触发对账器全量补偿
#[derive(Debug, Clone)]
pub enum WsEvent {
    Order(OrderUpdate),
    Reconnected,
}

/// 最新价缓存：网关读线程单写，其余组件多读
pub struct PriceCache {
    prices: RwLock<HashMap<String, (Decimal, Instant)>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub async fn update(&self, product_id: &str, price: Decimal) {
        let mut map = self.prices.write().await;
        map.insert(product_id.to_string(), (price, Instant::now()));
    }

    /// 返回价格与其年龄；缓存未命中时为 None
    pub async fn get(&self, product_id: &str) -> Option<(Decimal, Duration)> {
        let map = self.prices.read().await;
        map.get(product_id)
            .map(|(price, at)| (*price, at.elapsed()))
    }

    /// 不超过 max_age 的新鲜价格
    pub async fn get_fresh(&self, product_id: &str, max_age: Duration) -> Option<Decimal> {
        self.get(product_id)
            .await
            .filter(|(_, age)| *age <= max_age)
            .map(|(price, _)| price)
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 流式平面：ticker_batch 喂价格缓存，user 频道广播订单更新
pub struct WsService {
    creds: Credentials,
    url: String,
    pub price_cache: Arc<PriceCache>,
    listeners: RwLock<Vec<mpsc::UnboundedSender<WsEvent>>>,
    /// 当前订阅的产品列表，重连后按它重新订阅
    subscribed: RwLock<Vec<String>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WsService {
    pub fn new(creds: Credentials) -> Self {
        let url = std::env::var("EXCHANGE_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            creds,
            url,
            price_cache: Arc::new(PriceCache::new()),
            listeners: RwLock::new(Vec::new()),
            subscribed: RwLock::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// 注册订单更新监听者（对账器的快路径入口）
    pub async fn register_listener(&self) -> mpsc::UnboundedReceiver<WsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().await.push(tx);
        rx
    }

    pub async fn set_products(&self, product_ids: Vec<String>) {
        *self.subscribed.write().await = product_ids;
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn broadcast(&self, event: WsEvent) {
        let mut listeners = self.listeners.write().await;
        // 发送失败说明接收端已销毁，顺手清理
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// 连接主循环：订阅、读消息、断线按指数退避重连
    pub async fn run(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut first_connect = true;

        loop {
            if *shutdown_rx.borrow() {
                info!("[ws] 收到关闭信号，退出连接循环");
                return;
            }

            match connect_async(&self.url).await {
                Ok((mut stream, _)) => {
                    info!("[ws] 已连接 {}", self.url);
                    backoff = INITIAL_BACKOFF;

                    if let Err(e) = self.subscribe_all(&mut stream).await {
                        error!("[ws] 订阅失败: {}", e);
                    } else if !first_connect {
                        // 重连成功后通知对账器补偿非终态订单
                        self.broadcast(WsEvent::Reconnected).await;
                    }
                    first_connect = false;

                    loop {
                        tokio::select! {
                            msg = stream.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => self.handle_message(&text).await,
                                    Some(Ok(Message::Ping(data))) => {
                                        let _ = stream.send(Message::Pong(data)).await;
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        warn!("[ws] 连接关闭");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        error!("[ws] 读消息出错: {}", e);
                                        break;
                                    }
                                }
                            }
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    let _ = stream.send(Message::Close(None)).await;
                                    info!("[ws] 关闭连接");
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("[ws] 连接失败: {}，{:?} 后重试", e, backoff);
                }
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
            tokio::select! {
                _ = tokio::time::sleep(backoff + jitter) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { return; }
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn subscribe_all(
        &self,
        stream: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
                  + Unpin),
    ) -> anyhow::Result<()> {
        let products = self.subscribed.read().await.clone();
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let ticker_sub = json!({
            "type": "subscribe",
            "channel": "ticker_batch",
            "product_ids": products,
            "api_key": self.creds.api_key,
            "timestamp": timestamp,
            "signature": self.creds.sign(&timestamp, "GET", "/ws/ticker_batch", ""),
        });
        stream.send(Message::Text(ticker_sub.to_string())).await?;

        let user_sub = json!({
            "type": "subscribe",
            "channel": "user",
            "product_ids": products,
            "api_key": self.creds.api_key,
            "timestamp": timestamp,
            "signature": self.creds.sign(&timestamp, "GET", "/ws/user", ""),
        });
        stream.send(Message::Text(user_sub.to_string())).await?;

        info!("[ws] 已订阅 ticker_batch + user，产品数={}", products.len());
        Ok(())
    }

    async fn handle_message(&self, text: &str) {
        #[derive(Deserialize)]
        struct RawTicker {
            product_id: String,
            price: Decimal,
        }
        #[derive(Deserialize)]
        struct RawOrderEvent {
            order_id: String,
            #[serde(default)]
            client_order_id: Option<String>,
            product_id: String,
            status: String,
            #[serde(default)]
            cumulative_quantity: Decimal,
            #[serde(default)]
            avg_price: Decimal,
        }
        #[derive(Deserialize)]
        struct RawEvent {
            #[serde(default)]
            tickers: Vec<RawTicker>,
            #[serde(default)]
            orders: Vec<RawOrderEvent>,
        }
        #[derive(Deserialize)]
        struct RawMessage {
            #[serde(default)]
            channel: String,
            #[serde(default)]
            events: Vec<RawEvent>,
        }

        let msg: RawMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!("[ws] 无法解析的消息: {} ({})", text, e);
                return;
            }
        };

        match msg.channel.as_str() {
            "ticker" | "ticker_batch" => {
                for event in msg.events {
                    for ticker in event.tickers {
                        self.price_cache
                            .update(&ticker.product_id, ticker.price)
                            .await;
                    }
                }
            }
            "user" => {
                for event in msg.events {
                    for order in event.orders {
                        let update = OrderUpdate {
                            exchange_order_id: order.order_id,
                            client_order_id: order.client_order_id,
                            product_id: order.product_id,
                            status: order.status,
                            cumulative_filled_size: order.cumulative_quantity,
                            average_filled_price: order.avg_price,
                        };
                        debug!(
                            "[ws] 订单更新 exchange_id={} status={}",
                            update.exchange_order_id, update.status
                        );
                        self.broadcast(WsEvent::Order(update)).await;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn price_cache_staleness() {
        let cache = PriceCache::new();
        cache
            .update("BTC-USD", Decimal::from_str("50000").unwrap())
            .await;

        assert!(cache
            .get_fresh("BTC-USD", Duration::from_secs(30))
            .await
            .is_some());
        assert!(cache
            .get_fresh("BTC-USD", Duration::from_nanos(1))
            .await
            .is_none());
        assert!(cache
            .get_fresh("ETH-USD", Duration::from_secs(30))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn listener_receives_broadcast() {
        let svc = WsService::new(Credentials::paper());
        let mut rx = svc.register_listener().await;
        svc.broadcast(WsEvent::Reconnected).await;
        match rx.recv().await {
            Some(WsEvent::Reconnected) => {}
            other => panic!("意外事件: {:?}", other),
        }
    }
}

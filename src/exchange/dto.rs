use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 交易产品（交易对）元信息，会话内不可变，启动时刷新一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub base_currency: String,
    pub quote_currency: String,
    /// 数量最小步进
    pub base_increment: Decimal,
    /// 价格最小步进
    pub quote_increment: Decimal,
    /// 最小下单数量
    pub base_min_size: Decimal,
    /// 最小下单金额
    pub quote_min_size: Decimal,
    pub view_only: bool,
    pub trading_disabled: bool,
    pub status: String,
}

impl Product {
    /// 是否可交易：非只读、未停牌、状态 online
    pub fn is_tradable(&self) -> bool {
        !self.view_only && !self.trading_disabled && self.status == "online"
    }
}

/// 单根K线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 开盘时间，Unix 毫秒
    pub start_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// 最优买卖价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidAsk {
    pub product_id: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

impl BidAsk {
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }

    /// 点差占中间价比例
    pub fn spread_pct(&self) -> Decimal {
        let mid = self.mid();
        if mid.is_zero() {
            return Decimal::ZERO;
        }
        (self.best_ask - self.best_bid) / mid
    }
}

/// 账户余额
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub available: Decimal,
    pub hold: Decimal,
}

/// 订单方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// 下单请求：四种订单类型共用一个结构，网关按 kind 组装报文
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// 本地生成的幂等键
    pub client_order_id: String,
    pub product_id: String,
    pub side: Side,
    pub kind: WireOrderKind,
    pub base_size: Decimal,
    /// 限价（limit / stop_limit / bracket 需要）
    pub limit_price: Option<Decimal>,
    /// 触发价（stop_limit 需要）
    pub stop_price: Option<Decimal>,
    pub post_only: bool,
}

/// 交易所侧订单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireOrderKind {
    LimitGtcPostOnly,
    Market,
    StopLimit,
    BracketGtc,
}

impl WireOrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireOrderKind::LimitGtcPostOnly => "limit_gtc_post_only",
            WireOrderKind::Market => "market",
            WireOrderKind::StopLimit => "stop_limit",
            WireOrderKind::BracketGtc => "trigger_bracket_gtc",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "limit_gtc_post_only" => Some(WireOrderKind::LimitGtcPostOnly),
            "market" => Some(WireOrderKind::Market),
            "stop_limit" => Some(WireOrderKind::StopLimit),
            "trigger_bracket_gtc" => Some(WireOrderKind::BracketGtc),
            _ => None,
        }
    }
}

/// 下单回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: String,
}

/// 交易所侧订单状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusDto {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    pub product_id: String,
    /// OPEN / PENDING / FILLED / CANCELLED / EXPIRED / FAILED
    pub status: String,
    pub filled_size: Decimal,
    pub average_filled_price: Decimal,
}

/// 流动性角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
}

impl Liquidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liquidity::Maker => "MAKER",
            Liquidity::Taker => "TAKER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MAKER" | "M" => Some(Liquidity::Maker),
            "TAKER" | "T" => Some(Liquidity::Taker),
            _ => None,
        }
    }
}

/// 单笔成交
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillDto {
    pub fill_id: String,
    pub exchange_order_id: String,
    pub product_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub liquidity: Liquidity,
    /// 成交时间，Unix 毫秒
    pub trade_time: i64,
}

/// 订单预览结果（下单前费率/滑点检查用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPreview {
    pub commission_total: Decimal,
    pub slippage_pct: Decimal,
    pub average_filled_price: Option<Decimal>,
    pub base_size: Decimal,
}

/// 近期逐笔成交（量能流向分析的输入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTrade {
    pub trade_id: String,
    pub price: Decimal,
    pub size: Decimal,
    /// 吃单方向
    pub side: Side,
    pub trade_time: i64,
}

/// 量能流向分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetPressure {
    StrongBuy,
    ModerateBuy,
    Neutral,
    ModerateSell,
    StrongSell,
}

impl NetPressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetPressure::StrongBuy => "strong_buy",
            NetPressure::ModerateBuy => "moderate_buy",
            NetPressure::Neutral => "neutral",
            NetPressure::ModerateSell => "moderate_sell",
            NetPressure::StrongSell => "strong_sell",
        }
    }
}

/// 量能流向分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeFlow {
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    /// 主动买盘占比 [0,1]
    pub buy_pressure: f64,
    pub net_pressure: NetPressure,
}

/// user 频道推送的订单更新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    pub product_id: String,
    pub status: String,
    pub cumulative_filled_size: Decimal,
    pub average_filled_price: Decimal,
}

/// 手续费/成交量汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub total_fees: Decimal,
    pub total_volume: Decimal,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
}

/// API 权限
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPermissions {
    pub can_view: bool,
    pub can_trade: bool,
    pub can_transfer: bool,
}

/// 闪兑报价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertQuote {
    pub quote_id: String,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub fee: Decimal,
}

/// K线粒度枚举值对应的秒数
pub fn granularity_seconds(granularity: &str) -> i64 {
    match granularity {
        "ONE_MINUTE" => 60,
        "FIVE_MINUTE" => 300,
        "FIFTEEN_MINUTE" => 900,
        "THIRTY_MINUTE" => 1800,
        "ONE_HOUR" => 3600,
        "TWO_HOUR" => 7200,
        "SIX_HOUR" => 21600,
        "ONE_DAY" => 86400,
        _ => 900,
    }
}

/// 把数值截断到指定步进（交易所边界的唯一取整入口）
pub fn quantize(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    (value / increment).floor() * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn quantize_truncates_toward_zero() {
        assert_eq!(quantize(d("1.23456789"), d("0.0001")), d("1.2345"));
        assert_eq!(quantize(d("10.999"), d("0.01")), d("10.99"));
        assert_eq!(quantize(d("5"), d("0")), d("5"));
    }

    #[test]
    fn spread_pct_uses_mid() {
        let ba = BidAsk {
            product_id: "BTC-USD".into(),
            best_bid: d("100.00"),
            best_ask: d("100.80"),
        };
        // (100.8-100)/100.4 ≈ 0.797%
        let pct = ba.spread_pct();
        assert!(pct > d("0.0079") && pct < d("0.0080"));
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::app_config::TradingConfig;
use crate::error::AppResult;
use crate::exchange::dto::{granularity_seconds, Product};
use crate::exchange::ExchangeGateway;
use crate::trading::indicator::{enrich, IndicatorConfig};
use crate::trading::strategy::{SignalAction, Strategy};

/// 一次评估产出的机会
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub product_id: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub last_price: f64,
    pub reasons: Vec<String>,
}

/// 市场扫描：筛可交易产品、按量能选候选、并行评估策略信号
pub struct Scanner {
    gateway: Arc<ExchangeGateway>,
    strategy: Strategy,
    trading_cfg: TradingConfig,
    indicator_cfg: IndicatorConfig,
    min_quote_floor: Decimal,
}

impl Scanner {
    pub fn new(
        gateway: Arc<ExchangeGateway>,
        strategy: Strategy,
        trading_cfg: TradingConfig,
        min_quote_floor: Decimal,
    ) -> Self {
        Self {
            gateway,
            strategy,
            trading_cfg,
            indicator_cfg: IndicatorConfig::default(),
            min_quote_floor,
        }
    }

    /// 可交易产品全集：在线、非只读、计价货币匹配、最小下单额不超过配置下限
    pub fn tradable_universe(&self, products: &[Product]) -> Vec<Product> {
        products
            .iter()
            .filter(|p| {
                p.is_tradable()
                    && self
                        .trading_cfg
                        .quote_currencies
                        .iter()
                        .any(|q| q == &p.quote_currency)
                    && p.quote_min_size <= self.min_quote_floor
            })
            .cloned()
            .collect()
    }

    /// 候选选择：持仓品种必选，其余按近一日成交额排序，总数不超过 max_products
    pub async fn select_candidates(
        &self,
        universe: Vec<Product>,
        held_products: &HashSet<String>,
    ) -> Vec<Product> {
        let max_products = self.trading_cfg.max_products;
        let semaphore = Arc::new(Semaphore::new(self.trading_cfg.scan_workers));

        let mut held: Vec<Product> = Vec::new();
        let mut rest: Vec<Product> = Vec::new();
        for p in universe {
            if held_products.contains(&p.product_id) {
                held.push(p);
            } else {
                rest.push(p);
            }
        }

        // 近一日成交额探针（单根日K）
        let mut set = JoinSet::new();
        for product in rest {
            let gateway = self.gateway.clone();
            let permit = semaphore.clone();
            set.spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                let end = chrono::Utc::now().timestamp();
                let start = end - 86_400;
                let volume_quote = match gateway
                    .get_candles(&product.product_id, "ONE_DAY", start, end, 1)
                    .await
                {
                    Ok(candles) => candles
                        .last()
                        .map(|c| c.volume * c.close)
                        .unwrap_or(Decimal::ZERO),
                    Err(e) => {
                        debug!("{} 量能探针失败: {}", product.product_id, e);
                        Decimal::ZERO
                    }
                };
                Some((product, volume_quote))
            });
        }

        let mut ranked: Vec<(Product, Decimal)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(pair)) = joined {
                ranked.push(pair);
            }
        }
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut candidates = held;
        candidates.extend(
            ranked
                .into_iter()
                .map(|(p, _)| p)
                .take(max_products.saturating_sub(candidates.len())),
        );
        candidates.truncate(max_products);
        candidates
    }

    /// 并行评估一组产品，返回全部非 HOLD 信号，按置信度降序
    pub async fn scan(&self, products: &[Product]) -> AppResult<Vec<Opportunity>> {
        let semaphore = Arc::new(Semaphore::new(self.trading_cfg.scan_workers));
        let mut set = JoinSet::new();

        for product in products.iter().cloned() {
            let gateway = self.gateway.clone();
            let strategy = self.strategy.clone();
            let indicator_cfg = self.indicator_cfg.clone();
            let granularity = self.trading_cfg.granularity.clone();
            let history = self.trading_cfg.candle_history;
            let permit = semaphore.clone();

            set.spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                let step = granularity_seconds(&granularity);
                let end = chrono::Utc::now().timestamp();
                let start = end - step * history as i64;

                let candles = match gateway
                    .get_candles(&product.product_id, &granularity, start, end, history)
                    .await
                {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("[SCAN] {} 拉取K线失败: {}", product.product_id, e);
                        return None;
                    }
                };
                if candles.len() < strategy.min_candles() {
                    debug!(
                        "[SCAN] {} K线不足 ({} < {})",
                        product.product_id,
                        candles.len(),
                        strategy.min_candles()
                    );
                    return None;
                }

                let rows = enrich(&candles, &indicator_cfg);
                let signal = strategy.analyze(&rows, &product.product_id);
                let last_price = rows.last().map(|r| r.close).unwrap_or(0.0);

                match signal.action {
                    SignalAction::Hold => {
                        debug!("[SCAN] {:15} HOLD @ {:.6}", product.product_id, last_price);
                        None
                    }
                    action => {
                        info!(
                            "[SCAN] {:15} {} {:.0}% @ {:.6} | {}",
                            product.product_id,
                            action.as_str(),
                            signal.confidence * 100.0,
                            last_price,
                            signal.reasons.join("; ")
                        );
                        Some(Opportunity {
                            product_id: product.product_id,
                            action,
                            confidence: signal.confidence,
                            last_price,
                            reasons: signal.reasons,
                        })
                    }
                }
            });
        }

        let mut opportunities = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(opp)) = joined {
                opportunities.push(opp);
            }
        }
        opportunities.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(opportunities)
    }

    /// 全市场一次性扫描（CLI scan 子命令）：返回按置信度排序的 BUY 候选
    pub async fn scan_universe(&self) -> AppResult<Vec<Opportunity>> {
        let products = self.gateway.list_products().await?;
        let universe = self.tradable_universe(&products);
        info!("全市场扫描：{} 个可交易产品", universe.len());
        let mut opportunities = self.scan(&universe).await?;
        opportunities.retain(|o| o.action == SignalAction::Buy);
        Ok(opportunities)
    }
}

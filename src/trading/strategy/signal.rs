use serde::{Deserialize, Serialize};

/// 信号方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }
}

/// 策略产出的信号，纯值对象，不落库
///
/// produced_at 取最后一根K线的开盘时间：同样的输入必然产出同样的信号。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    /// [0,1]
    pub confidence: f64,
    /// 人类可读的依据列表，BUY/SELL 信号至少一条
    pub reasons: Vec<String>,
    pub produced_at: i64,
}

impl Signal {
    pub fn hold(produced_at: i64) -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: 0.0,
            reasons: Vec::new(),
            produced_at,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.action == SignalAction::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.action == SignalAction::Sell
    }
}

/// 加权打分器：各策略共用的评分骨架
#[derive(Debug, Default)]
pub struct Scorer {
    pub score: f64,
    pub reasons: Vec<String>,
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, weight: f64, reason: impl Into<String>) {
        self.score += weight;
        self.reasons.push(reason.into());
    }

    pub fn penalize(&mut self, weight: f64, reason: impl Into<String>) {
        self.score = (self.score - weight).max(0.0);
        self.reasons.push(reason.into());
    }

    /// confidence = min(1, score / max_score)
    pub fn confidence(&self, max_score: f64) -> f64 {
        (self.score / max_score).min(1.0)
    }
}

/// 双向打分收敛为信号：两边都不过阈值则 HOLD，平分亦 HOLD
pub fn resolve_signal(
    buy: Scorer,
    sell: Scorer,
    buy_max: f64,
    sell_max: f64,
    threshold: f64,
    produced_at: i64,
) -> Signal {
    let buy_ok = buy.score >= threshold;
    let sell_ok = sell.score >= threshold;

    if buy_ok && buy.score > sell.score {
        Signal {
            action: SignalAction::Buy,
            confidence: buy.confidence(buy_max),
            reasons: buy.reasons,
            produced_at,
        }
    } else if sell_ok && sell.score > buy.score {
        Signal {
            action: SignalAction::Sell,
            confidence: sell.confidence(sell_max),
            reasons: sell.reasons,
            produced_at,
        }
    } else {
        Signal::hold(produced_at)
    }
}

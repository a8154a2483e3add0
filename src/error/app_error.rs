use thiserror::Error;

/// 应用错误分类
///
/// 瞬时错误可重试；协议错误直接上抛；一致性错误记录 CRITICAL 后拒绝操作，
/// 绝不静默纠正。业务层面的拒绝（风控、入场闸门）不走错误通道，
/// 见 risk_service 的 RiskRejection / order_service 的 EntryRejection。
#[derive(Error, Debug)]
pub enum AppError {
    /// 瞬时错误：网络、5xx，重试后可能成功
    #[error("瞬时错误: {0}")]
    Transient(String),

    /// 交易所限流（429）
    #[error("限流: {0}")]
    RateLimited(String),

    /// 鉴权失败或权限不足：启动期致命，运行期暂停交易等待人工介入
    #[error("鉴权错误: {0}")]
    Auth(String),

    /// 请求本身不合法，重试无意义
    #[error("非法请求: {0}")]
    InvalidRequest(String),

    /// 资源不存在
    #[error("未找到: {0}")]
    NotFound(String),

    /// 内部不变量被破坏（重开终态订单、同产品重复持仓等）
    #[error("一致性错误: {0}")]
    Consistency(String),

    /// 撤单无法确认，交易所侧可能存在幽灵订单
    #[error("幽灵订单风险: client_id={0}")]
    GhostOrderRisk(String),

    /// 存储层错误
    #[error("存储错误: {0}")]
    Store(#[from] sqlx::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// 是否值得按退避策略重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::RateLimited(_))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return AppError::Transient(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return AppError::RateLimited(err.to_string());
            }
            if status.is_server_error() {
                return AppError::Transient(err.to_string());
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return AppError::Auth(err.to_string());
            }
        }
        AppError::Other(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AppError::Transient("socket closed".into()).is_retryable());
        assert!(AppError::RateLimited("429".into()).is_retryable());
        assert!(!AppError::InvalidRequest("bad size".into()).is_retryable());
        assert!(!AppError::Consistency("dup position".into()).is_retryable());
    }
}

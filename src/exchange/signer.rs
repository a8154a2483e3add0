use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// API 凭证
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn from_env() -> AppResult<Self> {
        let api_key = std::env::var("EXCHANGE_API_KEY")
            .map_err(|_| AppError::Auth("EXCHANGE_API_KEY 未配置".into()))?;
        let api_secret = std::env::var("EXCHANGE_API_SECRET")
            .map_err(|_| AppError::Auth("EXCHANGE_API_SECRET 未配置".into()))?;
        Ok(Self {
            api_key,
            api_secret,
        })
    }

    /// 模拟盘用的空凭证：纸面成交不出网，签名内容无所谓
    pub fn paper() -> Self {
        Self {
            api_key: "paper".into(),
            api_secret: "paper-secret".into(),
        }
    }

    /// 对 `timestamp + method + path + body` 做 HMAC-SHA256，base64 输出
    pub fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let payload = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC 可接受任意长度的 key");
        mac.update(payload.as_bytes());
        base64::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let c = Credentials {
            api_key: "k".into(),
            api_secret: "secret".into(),
        };
        let a = c.sign("1700000000", "GET", "/api/v3/orders", "");
        let b = c.sign("1700000000", "GET", "/api/v3/orders", "");
        assert_eq!(a, b);
        // 任一输入变化都应改变签名
        assert_ne!(a, c.sign("1700000001", "GET", "/api/v3/orders", ""));
        assert_ne!(a, c.sign("1700000000", "POST", "/api/v3/orders", ""));
    }
}

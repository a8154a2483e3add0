use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// REST 端点分类：公共行情 / 私有账户 / 订单操作，各自独立限流
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    PublicMarket,
    PrivateAccount,
    Orders,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 令牌桶：capacity 为桶容量，rate 为每秒补充的令牌数
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 取走一个令牌，不足时挂起等待补充
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(st.last_refill).as_secs_f64();
                st.tokens = (st.tokens + elapsed * self.rate).min(self.capacity);
                st.last_refill = now;

                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return;
                }
                // 还差多少令牌换算成等待时长
                Duration::from_secs_f64((1.0 - st.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// 三类端点各一个桶，worker 间共享
pub struct RateLimiter {
    public_market: TokenBucket,
    private_account: TokenBucket,
    orders: TokenBucket,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            public_market: TokenBucket::new(10.0, 10.0),
            private_account: TokenBucket::new(5.0, 5.0),
            orders: TokenBucket::new(5.0, 3.0),
        }
    }

    pub async fn acquire(&self, class: EndpointClass) {
        match class {
            EndpointClass::PublicMarket => self.public_market.acquire().await,
            EndpointClass::PrivateAccount => self.private_account.acquire().await,
            EndpointClass::Orders => self.orders.acquire().await,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_throttles_burst() {
        let bucket = TokenBucket::new(2.0, 100.0);
        let start = Instant::now();
        // 前两个令牌立即可得，第三个需要等待补充
        bucket.acquire().await;
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}

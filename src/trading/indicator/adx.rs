/// Wilder 平滑的 ADX（含 +DI / -DI），逐根推进
///
/// 前 period 根累积初值，之后按 Wilder 递推：
/// smooth = smooth - smooth/period + 当前值
pub struct Adx {
    period: usize,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    prev_close: Option<f64>,
    smooth_tr: f64,
    smooth_plus_dm: f64,
    smooth_minus_dm: f64,
    adx: f64,
    /// 已消费的K线数
    count: usize,
}

/// 单根K线的输出
#[derive(Debug, Clone, Copy)]
pub struct AdxOutput {
    pub adx: f64,
    pub di_plus: f64,
    pub di_minus: f64,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_high: None,
            prev_low: None,
            prev_close: None,
            smooth_tr: 0.0,
            smooth_plus_dm: 0.0,
            smooth_minus_dm: 0.0,
            adx: 0.0,
            count: 0,
        }
    }

    /// 完整预热需要 2*period 根K线
    pub fn warmup_len(&self) -> usize {
        self.period * 2
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> Option<AdxOutput> {
        let (prev_high, prev_low, prev_close) =
            match (self.prev_high, self.prev_low, self.prev_close) {
                (Some(h), Some(l), Some(c)) => (h, l, c),
                _ => {
                    self.prev_high = Some(high);
                    self.prev_low = Some(low);
                    self.prev_close = Some(close);
                    return None;
                }
            };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        self.count += 1;
        let n = self.period as f64;

        if self.count <= self.period {
            // 初始化阶段：简单累加
            self.smooth_tr += tr;
            self.smooth_plus_dm += plus_dm;
            self.smooth_minus_dm += minus_dm;
        } else {
            self.smooth_tr = self.smooth_tr - self.smooth_tr / n + tr;
            self.smooth_plus_dm = self.smooth_plus_dm - self.smooth_plus_dm / n + plus_dm;
            self.smooth_minus_dm = self.smooth_minus_dm - self.smooth_minus_dm / n + minus_dm;
        }

        self.prev_high = Some(high);
        self.prev_low = Some(low);
        self.prev_close = Some(close);

        if self.count < self.period || self.smooth_tr == 0.0 {
            return None;
        }

        let di_plus = 100.0 * self.smooth_plus_dm / self.smooth_tr;
        let di_minus = 100.0 * self.smooth_minus_dm / self.smooth_tr;
        let di_sum = di_plus + di_minus;
        let dx = if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (di_plus - di_minus).abs() / di_sum
        };

        if self.count == self.period {
            self.adx = dx;
        } else if self.count < self.period * 2 {
            // ADX 自身的初始化：对 DX 取均值
            let k = (self.count - self.period) as f64;
            self.adx = (self.adx * k + dx) / (k + 1.0);
        } else {
            self.adx = (self.adx * (n - 1.0) + dx) / n;
        }

        Some(AdxOutput {
            adx: self.adx,
            di_plus,
            di_minus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_uptrend_raises_adx_and_di_plus() {
        let mut adx = Adx::new(14);
        let mut last = None;
        // 单边上涨：每根高低点抬升 1
        for i in 0..60 {
            let base = 100.0 + i as f64;
            last = adx.next(base + 1.0, base, base + 0.8);
        }
        let out = last.expect("预热完成后应有输出");
        assert!(out.adx > 25.0, "单边趋势下 ADX 应显著大于 25，实际 {}", out.adx);
        assert!(out.di_plus > out.di_minus);
    }

    #[test]
    fn flat_tape_keeps_adx_low() {
        let mut adx = Adx::new(14);
        let mut last = None;
        // 完全横盘交替 ±0.1，方向动量互相抵消
        for i in 0..60 {
            let wiggle = if i % 2 == 0 { 0.1 } else { -0.1 };
            last = adx.next(100.2 + wiggle, 99.8 + wiggle, 100.0 + wiggle);
        }
        let out = last.unwrap();
        assert!(out.adx < 25.0, "横盘时 ADX 应低于趋势阈值，实际 {}", out.adx);
    }

    #[test]
    fn warmup_yields_none() {
        let mut adx = Adx::new(14);
        for i in 0..10 {
            let base = 100.0 + i as f64;
            assert!(adx.next(base + 1.0, base, base + 0.5).is_none());
        }
    }
}

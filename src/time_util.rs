use chrono::{DateTime, TimeZone, Utc};

/// 当前 Unix 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒时间戳转 UTC 时间
pub fn millis_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts).single()
}

/// 毫秒时间戳格式化为可读串，解析失败时原样输出数字
pub fn millis_to_string(ts: i64) -> String {
    millis_to_datetime(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// 两个毫秒时间戳之间的秒数差
pub fn age_seconds(from_ts: i64, now_ts: i64) -> i64 {
    (now_ts - from_ts) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let ts = 1_747_136_969_082;
        let dt = millis_to_datetime(ts).unwrap();
        assert_eq!(dt.timestamp_millis(), ts);
        assert_eq!(millis_to_string(ts), "2025-05-13 11:49:29");
    }

    #[test]
    fn age_is_floor_seconds() {
        assert_eq!(age_seconds(1_000, 31_999), 30);
    }
}

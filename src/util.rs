use std::time::Duration;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = Duration::from_secs_f64((current.as_secs_f64() * 1.5).max(0.1));
    if next > max { max } else { next }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let max = Duration::from_secs(2);
        let mut d = Duration::from_millis(100);
        for _ in 0..20 {
            d = backoff(d, max);
        }
        assert_eq!(d, max);
        assert!(backoff(Duration::ZERO, max) >= Duration::from_millis(100));
    }

    #[test]
    fn retriable_statuses() {
        assert!(retriable_status(503));
        assert!(retriable_status(429));
        assert!(!retriable_status(404));
        assert!(!retriable_status(412));
    }
}

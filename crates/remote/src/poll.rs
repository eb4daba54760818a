//! Poll cadence for watches served over plain REST.

use std::time::Duration;

use rand::Rng;

/// Maximum jitter (milliseconds) added to each poll interval.
const POLL_JITTER_MS: u64 = 750;

/// Exponential backoff in seconds with cap.
pub fn backoff_seconds(consecutive_failures: u32) -> u64 {
    const MAX_EXPONENT: u32 = 6;
    const BASE_DELAY_SECONDS: u64 = 2;

    let capped = consecutive_failures.min(MAX_EXPONENT);
    2_u64.pow(capped) * BASE_DELAY_SECONDS
}

/// Delay before the next poll: the base interval while healthy, backoff after
/// failures, plus jitter either way.
pub fn poll_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    let base = if consecutive_failures == 0 {
        interval
    } else {
        Duration::from_secs(backoff_seconds(consecutive_failures)).max(interval)
    };
    let jitter = rand::thread_rng().gen_range(0..=POLL_JITTER_MS);
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_seconds(0), 2);
        assert_eq!(backoff_seconds(1), 4);
        assert_eq!(backoff_seconds(2), 8);
        assert_eq!(backoff_seconds(9), backoff_seconds(6));
    }

    #[test]
    fn poll_delay_stays_within_jitter_bounds() {
        let interval = Duration::from_secs(5);
        let healthy = poll_delay(interval, 0);
        assert!(healthy >= interval);
        assert!(healthy <= interval + Duration::from_millis(POLL_JITTER_MS));

        let failing = poll_delay(interval, 4);
        assert!(failing >= Duration::from_secs(32));
    }
}

use std::time::Duration;

/// Default per-connection outbound ring capacity for a publisher (C3's per-subscriber buffer).
pub const DEFAULT_PUBLISHER_QUEUE_SIZE: usize = 8;

/// Default capacity of a subscriber's incoming message queue (C4).
pub const DEFAULT_SUBSCRIBER_QUEUE_SIZE: usize = 8192;

/// Base delay for the registration-retry backoff (C7); doubles on each consecutive failure.
pub const REGISTRATION_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling the registration-retry backoff never exceeds.
pub const REGISTRATION_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Returns the backoff delay for the `attempt`'th consecutive registration failure (0-indexed):
/// `min(base * 2^attempt, max)`.
pub fn registration_backoff(attempt: u32) -> Duration {
    let scaled = REGISTRATION_BACKOFF_BASE
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(REGISTRATION_BACKOFF_MAX);
    scaled.min(REGISTRATION_BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(registration_backoff(0), Duration::from_secs(1));
        assert_eq!(registration_backoff(1), Duration::from_secs(2));
        assert_eq!(registration_backoff(2), Duration::from_secs(4));
        assert_eq!(registration_backoff(5), Duration::from_secs(30));
        assert_eq!(registration_backoff(31), Duration::from_secs(30));
    }
}

//! Injectable time source.

use chrono::{DateTime, Utc};

/// Abstracts "now" so schedulers and stores can be driven from tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }

    fn unix_timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Frozen(i64);

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.0).unwrap_or_default()
        }
    }

    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let now = clock.now();
        assert!(clock.unix_timestamp() - now.timestamp() <= 1);
    }

    #[test]
    fn test_derived_timestamps() {
        let clock = Frozen(1_700_000_123_456);
        assert_eq!(clock.unix_timestamp(), 1_700_000_123);
        assert_eq!(clock.unix_timestamp_millis(), 1_700_000_123_456);
    }
}

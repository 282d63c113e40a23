use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Wall-clock source for capture stamps and relevance checks.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TokioClock;
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();

        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(clock.now() - start, chrono::Duration::seconds(600));
    }

    #[test]
    fn system_clock_tracks_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before && now <= Utc::now());
    }
}

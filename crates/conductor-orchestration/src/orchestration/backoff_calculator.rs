//! # Backoff Calculator
//!
//! Computes the next-eligible time for a failed step. Priority order:
//! server-supplied `retry_after` (capped), then the configured exponential
//! curve with jitter. Also owns the reenqueue-delay table the finalizer
//! uses when a task goes back on the job queue.

use chrono::NaiveDateTime;

use conductor_shared::config::BackoffConfig;
use conductor_shared::models::orchestration::ExecutionStatus;

use super::handlers::RetryAfter;

/// Which rule produced the delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffType {
    ServerRequested,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct BackoffResult {
    pub backoff_type: BackoffType,
    pub delay_seconds: u32,
    pub next_retry_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay for attempt N (1-indexed) from the configured curve: the delay
    /// table while it lasts, then `floor(N ^ multiplier)`, capped, with
    /// uniform jitter inside `[cap * (1 - j), cap * (1 + j)]`, never below 1s.
    pub fn exponential_backoff_seconds(&self, attempt: u32) -> u32 {
        let attempt = attempt.max(1);
        let table = &self.config.default_backoff_seconds;
        let base = if (attempt as usize) <= table.len() {
            table[attempt as usize - 1] as f64
        } else {
            (attempt as f64).powf(self.config.backoff_multiplier).floor()
        };
        let cap = base.min(self.config.max_backoff_seconds as f64);

        if !self.config.jitter_enabled {
            return (cap as u32).max(1);
        }

        let jitter = self.config.jitter_max_percentage;
        let low = ((cap * (1.0 - jitter)).ceil() as u32).max(1);
        let high = ((cap * (1.0 + jitter)).floor() as u32).max(low);
        fastrand::u32(low..=high)
    }

    /// Seconds from a server-supplied `retry_after`, capped at the
    /// configured maximum. An HTTP-date is measured against now; a date in
    /// the past degrades to 1s.
    pub fn server_backoff_seconds(&self, retry_after: &RetryAfter) -> u32 {
        let requested = match retry_after {
            RetryAfter::Seconds(seconds) => *seconds,
            RetryAfter::HttpDate(date) => chrono::DateTime::parse_from_rfc2822(date)
                .map(|eligible_at| {
                    (eligible_at.naive_utc() - chrono::Utc::now().naive_utc())
                        .num_seconds()
                        .max(1) as u32
                })
                .unwrap_or(1),
        };
        requested.min(self.config.max_backoff_seconds).max(1)
    }

    /// Delay for a failed attempt; server-supplied wins over exponential
    pub fn calculate_backoff_seconds(
        &self,
        attempt: u32,
        retry_after: Option<&RetryAfter>,
    ) -> (BackoffType, u32) {
        match retry_after {
            Some(retry_after) => (
                BackoffType::ServerRequested,
                self.server_backoff_seconds(retry_after),
            ),
            None => (
                BackoffType::Exponential,
                self.exponential_backoff_seconds(attempt),
            ),
        }
    }

    /// Full backoff decision for a failed attempt: rule, delay, and the
    /// next-eligible time from now. The executor persists the delay on the
    /// step inside its outcome transaction.
    pub fn backoff_for(&self, attempt: u32, retry_after: Option<&RetryAfter>) -> BackoffResult {
        let (backoff_type, delay_seconds) = self.calculate_backoff_seconds(attempt, retry_after);
        let next_retry_at =
            chrono::Utc::now().naive_utc() + chrono::Duration::seconds(delay_seconds as i64);
        BackoffResult {
            backoff_type,
            delay_seconds,
            next_retry_at,
        }
    }

    /// Base reenqueue delay for a task in the given execution status
    pub fn base_reenqueue_delay(&self, status: ExecutionStatus) -> u32 {
        let delays = &self.config.reenqueue_delays;
        match status {
            ExecutionStatus::HasReadySteps => delays.has_ready_steps,
            ExecutionStatus::WaitingForDependencies => delays.waiting_for_dependencies,
            ExecutionStatus::Processing => delays.processing,
            ExecutionStatus::AllComplete | ExecutionStatus::BlockedByFailures => {
                self.config.default_reenqueue_delay
            }
        }
    }

    pub fn buffer_seconds(&self) -> u32 {
        self.config.buffer_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator(jitter: bool) -> BackoffCalculator {
        let config = BackoffConfig {
            jitter_enabled: jitter,
            ..BackoffConfig::default()
        };
        BackoffCalculator::new(config)
    }

    #[test]
    fn test_table_drives_early_attempts_without_jitter() {
        let calc = calculator(false);
        assert_eq!(calc.exponential_backoff_seconds(1), 1);
        assert_eq!(calc.exponential_backoff_seconds(2), 2);
        assert_eq!(calc.exponential_backoff_seconds(3), 4);
        assert_eq!(calc.exponential_backoff_seconds(6), 32);
    }

    #[test]
    fn test_power_curve_after_table_exhausted() {
        let calc = calculator(false);
        // attempt 7 with multiplier 2.0: floor(7^2) = 49
        assert_eq!(calc.exponential_backoff_seconds(7), 49);
        assert_eq!(calc.exponential_backoff_seconds(10), 100);
    }

    #[test]
    fn test_cap_applies_to_power_curve() {
        let calc = calculator(false);
        // 30^2 = 900, capped at 300
        assert_eq!(calc.exponential_backoff_seconds(30), 300);
    }

    #[test]
    fn test_jitter_stays_inside_clamp() {
        let calc = calculator(true);
        let jitter = calc.config().jitter_max_percentage;
        for attempt in 1..=12 {
            let table = &calc.config().default_backoff_seconds;
            let base = if (attempt as usize) <= table.len() {
                table[attempt as usize - 1] as f64
            } else {
                (attempt as f64).powf(calc.config().backoff_multiplier).floor()
            };
            let cap = base.min(calc.config().max_backoff_seconds as f64);
            for _ in 0..50 {
                let produced = calc.exponential_backoff_seconds(attempt) as f64;
                assert!(
                    produced >= (cap * (1.0 - jitter)).floor().max(1.0),
                    "attempt {attempt}: {produced} below clamp"
                );
                assert!(
                    produced <= (cap * (1.0 + jitter)).ceil(),
                    "attempt {attempt}: {produced} above clamp"
                );
            }
        }
    }

    #[test]
    fn test_jitter_never_below_one_second() {
        let calc = calculator(true);
        for _ in 0..100 {
            assert!(calc.exponential_backoff_seconds(1) >= 1);
        }
    }

    #[test]
    fn test_server_seconds_override() {
        let calc = calculator(false);
        let (backoff_type, seconds) =
            calc.calculate_backoff_seconds(1, Some(&RetryAfter::Seconds(7)));
        assert_eq!(backoff_type, BackoffType::ServerRequested);
        assert_eq!(seconds, 7);
    }

    #[test]
    fn test_server_value_is_capped() {
        let calc = calculator(false);
        let seconds = calc.server_backoff_seconds(&RetryAfter::Seconds(100_000));
        assert_eq!(seconds, calc.config().max_backoff_seconds);
    }

    #[test]
    fn test_http_date_in_future() {
        let calc = calculator(false);
        let future = (chrono::Utc::now() + chrono::Duration::seconds(90)).to_rfc2822();
        let seconds = calc.server_backoff_seconds(&RetryAfter::HttpDate(future));
        // parsing + clock skew tolerance
        assert!((85..=90).contains(&seconds), "got {seconds}");
    }

    #[test]
    fn test_http_date_in_past_degrades_to_one_second() {
        let calc = calculator(false);
        let past = (chrono::Utc::now() - chrono::Duration::seconds(90)).to_rfc2822();
        assert_eq!(calc.server_backoff_seconds(&RetryAfter::HttpDate(past)), 1);
    }

    #[test]
    fn test_unparseable_http_date_degrades_to_one_second() {
        let calc = calculator(false);
        assert_eq!(
            calc.server_backoff_seconds(&RetryAfter::HttpDate("not a date".to_string())),
            1
        );
    }

    #[test]
    fn test_backoff_for_schedules_from_now() {
        let calc = calculator(false);
        let before = chrono::Utc::now().naive_utc();
        let result = calc.backoff_for(1, Some(&RetryAfter::Seconds(7)));
        assert_eq!(result.backoff_type, BackoffType::ServerRequested);
        assert_eq!(result.delay_seconds, 7);
        let scheduled_gap = result.next_retry_at - before;
        assert!(scheduled_gap >= chrono::Duration::seconds(6));
        assert!(scheduled_gap <= chrono::Duration::seconds(8));
    }

    #[test]
    fn test_reenqueue_delay_table() {
        let calc = calculator(false);
        assert_eq!(
            calc.base_reenqueue_delay(ExecutionStatus::HasReadySteps),
            0
        );
        assert_eq!(
            calc.base_reenqueue_delay(ExecutionStatus::WaitingForDependencies),
            45
        );
        assert_eq!(calc.base_reenqueue_delay(ExecutionStatus::Processing), 10);
        assert_eq!(
            calc.base_reenqueue_delay(ExecutionStatus::AllComplete),
            calc.config().default_reenqueue_delay
        );
        assert_eq!(calc.buffer_seconds(), 5);
    }
}

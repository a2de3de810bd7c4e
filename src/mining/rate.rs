/// Inter-chunk pacing derived from the TPM ceiling.
///
/// The plan is computed once per job from the job's average chunk size and
/// is not adapted mid-job.
use std::time::Duration;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePlan {
    pub avg_tokens_per_chunk: f64,
    pub chunks_per_minute: u64,
    pub delay: Duration,
}

impl RatePlan {
    /// `chunks_per_minute = floor(safe_tpm / avg_tokens)`, delay
    /// `= clamp(ceil(60000 / chunks_per_minute), min, max)` milliseconds.
    pub fn compute(total_tokens: usize, total_chunks: usize, config: &RateLimitConfig) -> Self {
        if total_chunks == 0 {
            return Self {
                avg_tokens_per_chunk: 0.0,
                chunks_per_minute: 0,
                delay: Duration::ZERO,
            };
        }

        let avg = total_tokens as f64 / total_chunks as f64;
        let chunks_per_minute = if avg > 0.0 {
            (config.safe_tokens_per_minute() / avg).floor() as u64
        } else {
            u64::MAX
        }
        .max(1);

        let delay_ms = (60_000.0 / chunks_per_minute as f64).ceil() as u64;
        // An unvalidated config may carry inverted bounds
        let (lo, hi) = if config.min_delay_ms <= config.max_delay_ms {
            (config.min_delay_ms, config.max_delay_ms)
        } else {
            (config.max_delay_ms, config.min_delay_ms)
        };
        let delay_ms = delay_ms.clamp(lo, hi);

        Self {
            avg_tokens_per_chunk: avg,
            chunks_per_minute,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_nine_hundred_tokens() {
        let plan = RatePlan::compute(9000, 10, &RateLimitConfig::default());
        assert!((plan.avg_tokens_per_chunk - 900.0).abs() < f64::EPSILON);
        assert_eq!(plan.chunks_per_minute, 17);
        assert_eq!(plan.delay, Duration::from_millis(3530));
    }

    #[test]
    fn test_small_chunks_clamp_to_min_delay() {
        let plan = RatePlan::compute(100, 10, &RateLimitConfig::default());
        assert_eq!(plan.chunks_per_minute, 1615);
        assert_eq!(plan.delay, Duration::from_millis(3000));
    }

    #[test]
    fn test_huge_chunks_clamp_to_max_delay() {
        let config = RateLimitConfig {
            tpm_limit: 1000,
            ..RateLimitConfig::default()
        };
        // avg 5000 tokens > safe tpm → at least one chunk per minute
        let plan = RatePlan::compute(50_000, 10, &config);
        assert_eq!(plan.chunks_per_minute, 1);
        assert_eq!(plan.delay, Duration::from_millis(60_000));
    }

    #[test]
    fn test_zero_tokens() {
        let plan = RatePlan::compute(0, 3, &RateLimitConfig::default());
        assert_eq!(plan.delay, Duration::from_millis(3000));
    }

    #[test]
    fn test_no_chunks() {
        let plan = RatePlan::compute(0, 0, &RateLimitConfig::default());
        assert_eq!(plan.chunks_per_minute, 0);
        assert_eq!(plan.delay, Duration::ZERO);
    }

    #[test]
    fn test_custom_bounds() {
        let config = RateLimitConfig {
            min_delay_ms: 0,
            max_delay_ms: 10,
            ..RateLimitConfig::default()
        };
        let plan = RatePlan::compute(9000, 10, &config);
        assert_eq!(plan.delay, Duration::from_millis(10));
    }

    #[test]
    fn test_inverted_bounds_do_not_panic() {
        let config = RateLimitConfig {
            min_delay_ms: 90_000,
            max_delay_ms: 60_000,
            ..RateLimitConfig::default()
        };
        let plan = RatePlan::compute(100, 10, &config);
        assert_eq!(plan.delay, Duration::from_millis(60_000));
    }
}

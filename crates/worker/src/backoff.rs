use std::time::Duration;

use taskworker_config::BackoffConfig;

/// 连续轮询失败时的指数退避
///
/// 第 n 次失败的等待时间为 `initial * multiplier^n`，上限 `max`，
/// 并叠加 `±jitter_factor` 比例的随机抖动。成功一次后归零。
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// 记录一次失败并返回本次应等待的时长
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let base = self.config.initial_ms as f64;
        let max = self.config.max_ms as f64;

        let exponential = base * self.config.multiplier.powi(failures.min(i32::MAX as u32) as i32);
        let capped = exponential.min(max);

        // 随机抖动，避免多个Worker同时重试
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_ms = (capped + jitter).clamp(base, max);

        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter_factor: f64) -> BackoffConfig {
        BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 2.0,
            jitter_factor,
        }
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let mut backoff = Backoff::new(config(0.0));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff.failures(), 6);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(config(0.5));
        for _ in 0..50 {
            let delay = backoff.next_delay().as_millis() as u64;
            assert!((100..=1_000).contains(&delay), "delay out of range: {delay}");
        }
    }
}

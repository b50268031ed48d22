//! Exponential backoff for retrying exchange operations.
//!
//! Adapted from the teacher crate's `resilience::backoff` almost
//! unchanged; this crate's defaults are 500ms base, factor 2, jitter,
//! 60s cap, tuned for a slow-cadence REST exchange instead of the
//! teacher's HFT-tuned values.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: Option<usize>,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    /// 500ms base, 2x factor, jitter, 60s cap.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: None,
            jitter_factor: 0.1,
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_attempt: usize,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            current_attempt: 0,
            config,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_retries) = self.config.max_retries {
            if self.current_attempt >= max_retries {
                return None;
            }
        }

        let delay = self.calculate_delay_with_jitter();

        self.current_attempt += 1;
        self.current_delay = std::cmp::min(
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.config.multiplier),
            self.config.max_delay,
        );

        Some(delay)
    }

    fn calculate_delay_with_jitter(&self) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return self.current_delay;
        }
        let mut rng = rand::thread_rng();
        let jitter = rng.gen::<f64>() * self.config.jitter_factor;
        let jitter_multiplier = 1.0 + (jitter - self.config.jitter_factor / 2.0);
        Duration::from_secs_f64(self.current_delay.as_secs_f64() * jitter_multiplier)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempt_number(&self) -> usize {
        self.current_attempt
    }

    pub fn can_retry(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.current_attempt < max,
            None => true,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_retries: Some(10),
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoff::with_config(config);
        let d1 = backoff.next_delay().unwrap();
        let d2 = backoff.next_delay().unwrap();
        assert!(d2 >= d1);
        let mut last = d2;
        for _ in 0..8 {
            last = backoff.next_delay().unwrap();
            assert!(last <= Duration::from_secs(2));
        }
        assert_eq!(last, Duration::from_secs(2));
    }

    #[test]
    fn default_config_is_500ms_base_60s_cap() {
        let backoff = ExponentialBackoff::new();
        assert_eq!(backoff.config.initial_delay, Duration::from_millis(500));
        assert_eq!(backoff.config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut backoff = ExponentialBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt_number(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt_number(), 0);
    }

    #[test]
    fn max_retries_exhausts() {
        let config = BackoffConfig {
            max_retries: Some(2),
            ..Default::default()
        };
        let mut backoff = ExponentialBackoff::with_config(config);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(!backoff.can_retry());
    }
}

use std::time::Duration;
use rand::Rng;

/// 退避配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// 首次重试延迟
    pub base_delay: Duration,
    /// 延迟上限（不含抖动）
    pub max_delay: Duration,
    /// 抖动比例，取值 [0, 1]
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            jitter_fraction: 0.2,
        }
    }
}

/// 一次退避的等待时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDelay {
    /// min(max_delay, base_delay * 2^attempt)
    pub base: Duration,
    /// [0, jitter_fraction * base] 内的均匀抖动
    pub jitter: Duration,
}

impl BackoffDelay {
    pub fn total(&self) -> Duration {
        self.base + self.jitter
    }
}

/// 带抖动的指数退避
///
/// 延迟按递增前的 attempt 计算，所以第一次失败等待 base_delay；
/// 连接成功后必须 `reset()`。
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// 连续失败次数
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 下一次失败将使用的基础延迟（不含抖动，不改变状态）
    pub fn peek_delay(&self) -> Duration {
        let max = self.config.max_delay;
        2u32.checked_pow(self.attempt)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map(|delay| delay.min(max))
            .unwrap_or(max)
    }

    /// 计算本次延迟并递增 attempt
    pub fn next_delay(&mut self) -> BackoffDelay {
        let base = self.peek_delay();
        self.attempt = self.attempt.saturating_add(1);

        let fraction = self.config.jitter_fraction.clamp(0.0, 1.0);
        let jitter_cap = base.mul_f64(fraction);
        let jitter = if jitter_cap.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=jitter_cap)
        };

        BackoffDelay { base, jitter }
    }

    /// 连接成功后重置
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

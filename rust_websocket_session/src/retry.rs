// rust_websocket_session/src/retry.rs

//! 客户端重连策略。
//!
//! 策略在构造时校验参数，构造成功后不可变：
//! - `FixedDelay` 与 `ExponentialBackoff` 的（初始）延迟都不得小于 15 秒；
//! - 指数退避每次乘以 1.33，并被 `max` 截断。

use std::time::Duration;

use crate::error::WsError;

/// 允许的最小重连延迟。
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(15);

/// 指数退避的增长因子。
pub const BACKOFF_FACTOR: f64 = 1.33;

/// 固定延迟重连。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// 指数退避重连。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// 第 `attempt` 次重试（从 1 开始）前的等待时间：`min(initial * 1.33^(attempt-1), max)`。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * BACKOFF_FACTOR.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(secs).map_or(self.max, |d| d.min(self.max))
    }
}

/// 客户端在异常断开后的重连策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// 从不重连，异常关闭后保持 CLOSED。
    #[default]
    Never,
    FixedDelay(FixedDelay),
    ExponentialBackoff(ExponentialBackoff),
}

impl RetryPolicy {
    /// 构造固定延迟策略；`delay` 小于 15 秒时失败。
    pub fn fixed_delay(delay: Duration) -> Result<Self, WsError> {
        check_min_delay(delay)?;
        Ok(RetryPolicy::FixedDelay(FixedDelay { delay }))
    }

    /// 构造指数退避策略；`initial` 小于 15 秒时失败。
    pub fn exponential_backoff(initial: Duration, max: Duration) -> Result<Self, WsError> {
        check_min_delay(initial)?;
        Ok(RetryPolicy::ExponentialBackoff(ExponentialBackoff { initial, max }))
    }

    /// 没有上限的指数退避。
    pub fn exponential_backoff_unbounded(initial: Duration) -> Result<Self, WsError> {
        Self::exponential_backoff(initial, Duration::MAX)
    }

    /// 第 `attempt` 次重试（从 1 开始）前的等待时间；`Never` 返回 `None`。
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::Never => None,
            RetryPolicy::FixedDelay(fixed) => Some(fixed.delay),
            RetryPolicy::ExponentialBackoff(backoff) => Some(backoff.delay_for(attempt)),
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, RetryPolicy::Never)
    }
}

fn check_min_delay(delay: Duration) -> Result<(), WsError> {
    if delay < MIN_RETRY_DELAY {
        return Err(WsError::InvalidRetryPolicy(format!(
            "重连延迟 {:?} 小于最小值 {:?}",
            delay, MIN_RETRY_DELAY
        )));
    }
    Ok(())
}

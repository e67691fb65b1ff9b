/// 请求准入模块
///
/// 在任何下游工作之前拦截支付请求：
/// - 按用户的滑动窗口限流
/// - 带衰减的刷屏分，超过阈值时发出升级信号
/// - `PaymentGate` 把判定变成用户可见的结果并记录统计
pub mod payment_gate;
pub mod rate_limiter;
pub mod spam_guard;

pub use payment_gate::{AdmissionDecision, PaymentGate};
pub use rate_limiter::{RateLimitConfig, SlidingWindowLimiter};
pub use spam_guard::{AntiSpamGuard, SpamGuardConfig, SpamVerdict};

pub mod cli;
pub mod config;
pub mod domain;  // 在线状态领域事件
pub mod error;
pub mod http;  // keep-alive HTTP 服务
pub mod infra;
pub mod logging;
pub mod model;
pub mod presence;  // 常驻语音在线
pub mod security;  // 请求准入

pub use config::BotConfig;
pub use domain::PresenceEvent;
pub use error::{PresenceError, Result};
pub use infra::{EventBus, MemoryAnalyticsStore};
pub use model::*;
pub use presence::{
    PresenceOrchestrator, PresenceRegistry, SimulatedVoiceConnector, VoiceConnector,
    VoiceSessionSupervisor,
};
pub use security::{AdmissionDecision, AntiSpamGuard, PaymentGate, SlidingWindowLimiter};

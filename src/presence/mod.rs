//! 常驻语音在线
//!
//! - `backoff`：带抖动的指数退避
//! - `connector`：语音平台协作者接口与模拟实现
//! - `supervisor`：单连接状态机
//! - `orchestrator`：监督器 + 存活检查
//! - `registry`：每个语音目标一个编排器

pub mod backoff;
pub mod connector;
pub mod orchestrator;
pub mod registry;
pub mod supervisor;

pub use backoff::{BackoffConfig, BackoffDelay, BackoffPolicy};
pub use connector::{
    ConnectError, ConnectOutcome, HeartbeatBehavior, HeartbeatError, SimulatedVoiceConnector,
    VoiceConnector, VoiceSession,
};
pub use orchestrator::{OrchestratorConfig, PresenceOrchestrator};
pub use registry::{PresenceRegistry, PresenceSnapshot};
pub use supervisor::{SupervisorConfig, SupervisorStats, VoiceSessionSupervisor};

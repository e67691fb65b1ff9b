use std::fmt;
use serde::{Deserialize, Serialize};

/// 语音目标（需要常驻的语音频道）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceTarget(pub u64);

impl VoiceTarget {
    pub const fn new(channel_id: u64) -> Self {
        Self(channel_id)
    }

    pub fn channel_id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VoiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice:{}", self.0)
    }
}

/// 语音会话状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl SessionState {
    /// 用于 gauge 指标的数值
    pub fn as_gauge(&self) -> f64 {
        match self {
            SessionState::Disconnected => 0.0,
            SessionState::Connecting => 1.0,
            SessionState::Connected => 2.0,
            SessionState::Backoff => 3.0,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Backoff => write!(f, "BACKOFF"),
        }
    }
}

/// 状态转换原因（日志 / 事件）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Started,
    ConnectSuccess,
    ConnectFailed,
    ConnectTimeout,
    SessionDropped,
    HeartbeatMissed,
    Unhealthy,
    BackoffElapsed,
    ForceReconnect,
    /// 控制任务意外退出后被重新拉起
    Respawned,
    ShutdownRequested,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionReason::Started => "started",
            TransitionReason::ConnectSuccess => "connect_ok",
            TransitionReason::ConnectFailed => "connect_failed",
            TransitionReason::ConnectTimeout => "connect_timeout",
            TransitionReason::SessionDropped => "session_dropped",
            TransitionReason::HeartbeatMissed => "heartbeat_missed",
            TransitionReason::Unhealthy => "unhealthy",
            TransitionReason::BackoffElapsed => "backoff_elapsed",
            TransitionReason::ForceReconnect => "force_reconnect",
            TransitionReason::Respawned => "respawned",
            TransitionReason::ShutdownRequested => "shutdown",
        };
        f.write_str(s)
    }
}

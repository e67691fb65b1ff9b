use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Identity, SessionState, TransitionReason, VoiceTarget};

/// 在线保持 / 准入事件
///
/// 通过 EventBus 广播给上层应用（状态变化只以事件和日志的形式向上报告）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PresenceEvent {
    /// 会话状态变化
    StateChanged {
        target: VoiceTarget,
        from: SessionState,
        to: SessionState,
        reason: TransitionReason,
        timestamp: DateTime<Utc>,
    },

    /// 连接失败，已安排重试
    RetryScheduled {
        target: VoiceTarget,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// 用户被标记为刷屏（需要调用方升级处理，例如临时禁言）
    SpamFlagged {
        identity: Identity,
        score: u32,
        timestamp: DateTime<Utc>,
    },
}

use std::fmt;
use std::time::Instant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 请求方身份（平台用户 ID）
///
/// 限流与反刷屏状态都按它分区。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub u64);

impl Identity {
    pub const fn new(user_id: u64) -> Self {
        Self(user_id)
    }

    pub fn user_id(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Identity {
    fn from(user_id: u64) -> Self {
        Self(user_id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// 生成收款二维码
    QrGenerate,
    /// 保存 UPI ID
    UpiSave,
    /// 创建临时收款语音频道
    TempChannel,
    /// 其他命令
    Command,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::QrGenerate => "qr_generate",
            RequestKind::UpiSave => "upi_save",
            RequestKind::TempChannel => "temp_channel",
            RequestKind::Command => "command",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次支付请求事件（创建后不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestEvent {
    pub identity: Identity,
    pub kind: RequestKind,
    /// 单调时钟时间，用于准入判断
    pub at: Instant,
    /// 墙上时间，用于统计记录
    pub occurred_at: DateTime<Utc>,
}

impl RequestEvent {
    pub fn new(identity: Identity, kind: RequestKind) -> Self {
        Self {
            identity,
            kind,
            at: Instant::now(),
            occurred_at: Utc::now(),
        }
    }

    /// 指定单调时间创建（测试与回放用）
    pub fn at(identity: Identity, kind: RequestKind, at: Instant) -> Self {
        Self {
            identity,
            kind,
            at,
            occurred_at: Utc::now(),
        }
    }
}

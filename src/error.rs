use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response, Json},
};

/// 在线保持 / 请求准入错误类型
///
/// 连接层错误（ConnectFailure / HeartbeatTimeout）在 supervisor 内部被吸收并重试，
/// 只会作为状态变化和 `RetryScheduled` 事件的 error 文本被观察到；准入结果（RateLimitExceeded / SpamFlagged）是正常控制信号，
/// 只有调用方选择 `AdmissionDecision::into_result()` 时才会变成 Err。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceError {
    /// 语音连接失败（瞬时，退避重试）
    ConnectFailure(String),
    /// 心跳超时（瞬时，超过容忍次数后进入退避）
    HeartbeatTimeout(String),
    /// 请求频率超限
    RateLimitExceeded {
        /// 建议的重试等待（秒）
        retry_after_secs: u64,
    },
    /// 用户被标记为刷屏
    SpamFlagged,
    /// stop() 之后仍调用操作
    ShutdownInProgress,
    /// 同一语音目标已存在活跃实例
    TargetInUse(String),
    /// 内部错误
    Internal(String),
}

impl fmt::Display for PresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceError::ConnectFailure(msg) => write!(f, "Voice connect failed: {}", msg),
            PresenceError::HeartbeatTimeout(msg) => write!(f, "Heartbeat timeout: {}", msg),
            PresenceError::RateLimitExceeded { retry_after_secs } => write!(
                f,
                "You're doing that too fast! Please wait {} seconds.",
                retry_after_secs
            ),
            PresenceError::SpamFlagged => {
                write!(f, "Too many rejected requests, you have been flagged for spam")
            }
            PresenceError::ShutdownInProgress => write!(f, "Shutdown in progress"),
            PresenceError::TargetInUse(target) => {
                write!(f, "Voice target already has an active presence: {}", target)
            }
            PresenceError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for PresenceError {}

impl PresenceError {
    /// 是否为瞬时错误（会被自动重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PresenceError::ConnectFailure(_) | PresenceError::HeartbeatTimeout(_)
        )
    }
}

impl IntoResponse for PresenceError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            PresenceError::RateLimitExceeded { .. } | PresenceError::SpamFlagged => StatusCode::TOO_MANY_REQUESTS,
            PresenceError::ShutdownInProgress | PresenceError::ConnectFailure(_) | PresenceError::HeartbeatTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            PresenceError::TargetInUse(_) => StatusCode::CONFLICT,
            PresenceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}

impl From<crate::presence::ConnectError> for PresenceError {
    fn from(err: crate::presence::ConnectError) -> Self {
        PresenceError::ConnectFailure(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, PresenceError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 连接失败
    ConnectFailure = 2001,
    /// 心跳超时
    HeartbeatTimeout = 2002,
    /// 限流
    RateLimitExceeded = 3000,
    /// 刷屏标记
    SpamFlagged = 3001,
    /// 正在关闭
    ShutdownInProgress = 5000,
    /// 目标占用
    TargetInUse = 5001,
    /// 内部错误
    Internal = 1000,
}

impl From<&PresenceError> for ErrorCode {
    fn from(error: &PresenceError) -> Self {
        match error {
            PresenceError::ConnectFailure(_) => ErrorCode::ConnectFailure,
            PresenceError::HeartbeatTimeout(_) => ErrorCode::HeartbeatTimeout,
            PresenceError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            PresenceError::SpamFlagged => ErrorCode::SpamFlagged,
            PresenceError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
            PresenceError::TargetInUse(_) => ErrorCode::TargetInUse,
            PresenceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &PresenceError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

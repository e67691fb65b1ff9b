use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::VoiceTarget;

/// 语音连接错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("network error: {0}")]
    Network(String),
}

/// 心跳错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    /// 本次心跳没有回应（计入连续丢失次数）
    #[error("heartbeat timed out")]
    Timeout,
    /// 会话已被平台断开
    #[error("session dropped: {0}")]
    Dropped(String),
}

/// 语音连接器（聊天平台的语音原语）
#[async_trait]
pub trait VoiceConnector: Send + Sync + 'static {
    /// 建立到目标频道的语音会话
    async fn connect(&self, target: &VoiceTarget) -> Result<Box<dyn VoiceSession>, ConnectError>;
}

/// 已建立的语音会话
#[async_trait]
pub trait VoiceSession: Send + 'static {
    fn id(&self) -> &str;

    /// 发送心跳，返回往返延迟
    async fn heartbeat(&mut self) -> Result<Duration, HeartbeatError>;

    /// 主动关闭会话（可重复调用）
    async fn close(&mut self);
}

/// 模拟连接脚本的单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed,
    Fail,
    /// 永不返回（由 connect_timeout 截断）
    Hang,
}

/// 模拟会话的心跳行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatBehavior {
    Healthy,
    Timeout,
    Drop,
    /// 永不返回（由 heartbeat_timeout 截断）
    Hang,
}

/// 模拟语音连接器
///
/// 不连接真实平台：按脚本或失败率决定连接结果，用于本地运行和测试。
/// 脚本耗尽后回退到按 `failure_rate` 随机失败。
pub struct SimulatedVoiceConnector {
    failure_rate: f64,
    drop_rate: f64,
    latency: Duration,
    script: Mutex<VecDeque<ConnectOutcome>>,
    heartbeat: Arc<Mutex<HeartbeatBehavior>>,
    connect_attempts: AtomicU64,
    open_sessions: Arc<AtomicUsize>,
}

impl SimulatedVoiceConnector {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            drop_rate: 0.0,
            latency,
            script: Mutex::new(VecDeque::new()),
            heartbeat: Arc::new(Mutex::new(HeartbeatBehavior::Healthy)),
            connect_attempts: AtomicU64::new(0),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 总是成功、零延迟
    pub fn reliable() -> Self {
        Self::new(0.0, Duration::ZERO)
    }

    /// 按顺序返回给定结果，之后总是成功
    pub fn scripted(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        let connector = Self::reliable();
        connector.script.lock().extend(outcomes);
        connector
    }

    /// 健康心跳中随机掉线的概率
    pub fn with_drop_rate(mut self, drop_rate: f64) -> Self {
        self.drop_rate = drop_rate.clamp(0.0, 1.0);
        self
    }

    /// 追加脚本
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// 修改所有会话（包括已建立的）的心跳行为
    pub fn set_heartbeat_behavior(&self, behavior: HeartbeatBehavior) {
        *self.heartbeat.lock() = behavior;
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// 当前未关闭的会话数
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> ConnectOutcome {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            ConnectOutcome::Fail
        } else {
            ConnectOutcome::Succeed
        }
    }
}

#[async_trait]
impl VoiceConnector for SimulatedVoiceConnector {
    async fn connect(&self, target: &VoiceTarget) -> Result<Box<dyn VoiceSession>, ConnectError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.next_outcome();
        debug!("[SIMULATED VOICE] connect #{} to {} -> {:?}", attempt, target, outcome);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            ConnectOutcome::Succeed => {
                self.open_sessions.fetch_add(1, Ordering::SeqCst);
                let session = SimulatedVoiceSession {
                    id: Uuid::new_v4().to_string(),
                    target: *target,
                    latency: self.latency,
                    drop_rate: self.drop_rate,
                    behavior: Arc::clone(&self.heartbeat),
                    open_sessions: Arc::clone(&self.open_sessions),
                    closed: false,
                };
                info!("[SIMULATED VOICE] joined {} (session {})", target, session.id);
                Ok(Box::new(session))
            }
            ConnectOutcome::Fail => Err(ConnectError::Refused(format!(
                "simulated failure joining {}",
                target
            ))),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }
}

struct SimulatedVoiceSession {
    id: String,
    target: VoiceTarget,
    latency: Duration,
    drop_rate: f64,
    behavior: Arc<Mutex<HeartbeatBehavior>>,
    open_sessions: Arc<AtomicUsize>,
    closed: bool,
}

impl SimulatedVoiceSession {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl VoiceSession for SimulatedVoiceSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn heartbeat(&mut self) -> Result<Duration, HeartbeatError> {
        if self.closed {
            return Err(HeartbeatError::Dropped("session closed".to_string()));
        }

        let behavior = *self.behavior.lock();
        match behavior {
            HeartbeatBehavior::Healthy => {
                if self.drop_rate > 0.0 && rand::random::<f64>() < self.drop_rate {
                    return Err(HeartbeatError::Dropped(format!(
                        "simulated disconnect from {}",
                        self.target
                    )));
                }
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                Ok(self.latency)
            }
            HeartbeatBehavior::Timeout => Err(HeartbeatError::Timeout),
            HeartbeatBehavior::Drop => Err(HeartbeatError::Dropped(format!(
                "simulated disconnect from {}",
                self.target
            ))),
            HeartbeatBehavior::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            debug!("[SIMULATED VOICE] left {} (session {})", self.target, self.id);
        }
        self.release();
    }
}

impl Drop for SimulatedVoiceSession {
    fn drop(&mut self) {
        self.release();
    }
}

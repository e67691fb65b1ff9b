//! 语音会话监督器
//!
//! 一个监督器持有一条语音连接，由单个控制任务驱动状态机：
//!
//! ```text
//! Disconnected --start--> Connecting --ok--> Connected
//!                             |                  |
//!                        fail/timeout   drop / missed heartbeats / unhealthy
//!                             v                  v
//!                           Backoff <------------+
//!                             |
//!                   delay elapsed / force_reconnect --> Connecting
//! ```
//!
//! 任意状态下 `stop()` 都回到 Disconnected：进行中的连接被丢弃，定时器取消，
//! 已建立的会话被关闭。连接失败无限重试，只通过状态、日志、指标和事件向上报告。

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{error::Elapsed, interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::PresenceEvent;
use crate::error::PresenceError;
use crate::infra::{metrics, EventBus};
use crate::model::{SessionState, TransitionReason, VoiceTarget};
use super::backoff::{BackoffConfig, BackoffDelay, BackoffPolicy};
use super::connector::{HeartbeatError, VoiceConnector, VoiceSession};

/// 监督器配置
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// 单次连接超时
    pub connect_timeout: Duration,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 单次心跳超时
    pub heartbeat_timeout: Duration,
    /// 连续丢失多少次心跳视为掉线
    pub missed_heartbeat_tolerance: u32,
    /// 最近一次成功心跳超过该时长则不健康
    pub heartbeat_staleness: Duration,
    /// 心跳延迟告警阈值
    pub latency_warn: Duration,
    /// 重连退避
    pub backoff: BackoffConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            missed_heartbeat_tolerance: 3,
            heartbeat_staleness: Duration::from_secs(60),
            latency_warn: Duration::from_millis(200),
            backoff: BackoffConfig::default(),
        }
    }
}

/// 监督器统计
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStats {
    pub target: VoiceTarget,
    pub state: SessionState,
    pub healthy: bool,
    /// 当前连续失败次数（连接成功后归零）
    pub attempt: u32,
    pub consecutive_misses: u32,
    pub connects: u64,
    pub connect_failures: u64,
    pub drops: u64,
    pub session_id: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub last_heartbeat_age_ms: Option<u64>,
    pub backoff_remaining_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct HealthSnapshot {
    last_heartbeat_ok: Option<Instant>,
    consecutive_misses: u32,
    attempt: u32,
    connects: u64,
    connect_failures: u64,
    drops: u64,
    last_latency: Option<Duration>,
    session_id: Option<String>,
    backoff_until: Option<Instant>,
}

/// 控制任务与外部调用共享的状态
struct Shared {
    target: VoiceTarget,
    state: watch::Sender<SessionState>,
    health: Mutex<HealthSnapshot>,
    event_bus: Arc<EventBus>,
}

impl Shared {
    fn transition(&self, to: SessionState, reason: TransitionReason) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }

        metrics::record_session_state(self.target, to);
        info!("🔄 {} {} -> {} ({})", self.target, from, to, reason);
        self.event_bus.publish(PresenceEvent::StateChanged {
            target: self.target,
            from,
            to,
            reason,
            timestamp: Utc::now(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ForceReconnect,
    ForceBackoff(TransitionReason),
    Shutdown,
}

struct ControlHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// 语音会话监督器
pub struct VoiceSessionSupervisor {
    config: SupervisorConfig,
    connector: Arc<dyn VoiceConnector>,
    shared: Arc<Shared>,
    control: Mutex<Option<ControlHandle>>,
}

impl VoiceSessionSupervisor {
    pub fn new(
        target: VoiceTarget,
        connector: Arc<dyn VoiceConnector>,
        config: SupervisorConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            connector,
            shared: Arc::new(Shared {
                target,
                state,
                health: Mutex::new(HealthSnapshot::default()),
                event_bus,
            }),
            control: Mutex::new(None),
        }
    }

    pub fn target(&self) -> VoiceTarget {
        self.shared.target
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// 启动控制任务（已在运行时为空操作）
    pub fn start(&self) {
        let mut control = self.control.lock();
        if let Some(handle) = control.as_ref() {
            if !handle.task.is_finished() {
                debug!("{} supervisor already running", self.shared.target);
                return;
            }
        }

        self.spawn_control(&mut control, TransitionReason::Started);
    }

    /// 控制任务是否在运行
    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// 控制任务意外退出（例如协作者 panic）时重新拉起，返回是否重启
    ///
    /// 已 `stop()` 的监督器不会被拉起：检查和重启在同一把锁内完成。
    pub fn respawn_if_dead(&self) -> bool {
        let mut control = self.control.lock();
        match control.as_ref() {
            Some(handle) if handle.task.is_finished() => {
                error!(
                    "💥 {} control task exited unexpectedly in state {}, respawning",
                    self.shared.target,
                    self.status()
                );
                self.spawn_control(&mut control, TransitionReason::Respawned);
                true
            }
            _ => false,
        }
    }

    fn spawn_control(&self, control: &mut Option<ControlHandle>, reason: TransitionReason) {
        let (commands, receiver) = mpsc::unbounded_channel();
        {
            let mut health = self.shared.health.lock();
            health.session_id = None;
            health.last_heartbeat_ok = None;
        }
        self.shared.transition(SessionState::Connecting, reason);

        let control_loop = ControlLoop {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            commands: receiver,
            backoff: BackoffPolicy::new(self.config.backoff),
        };
        let task = tokio::spawn(control_loop.run());

        *control = Some(ControlHandle { commands, task });
    }

    /// 停止控制任务并等待其退出（可重复调用）
    pub async fn stop(&self) {
        let handle = self.control.lock().take();

        if let Some(ControlHandle { commands, task }) = handle {
            let _ = commands.send(Command::Shutdown);
            if let Err(e) = task.await {
                error!("❌ {} control task ended abnormally: {}", self.shared.target, e);
            }
        }

        self.shared
            .transition(SessionState::Disconnected, TransitionReason::ShutdownRequested);
    }

    /// 立即重连：取消退避定时器；已连接时先优雅关闭会话。
    /// 控制任务未运行时返回 false
    pub fn force_reconnect(&self) -> bool {
        self.send(Command::ForceReconnect)
    }

    /// 强制进入退避（健康检查失败时由编排器调用）
    pub fn force_backoff(&self, reason: TransitionReason) -> bool {
        self.send(Command::ForceBackoff(reason))
    }

    pub fn status(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// 已连接且最近一次成功心跳不超过 heartbeat_staleness
    pub fn is_healthy(&self) -> bool {
        if self.status() != SessionState::Connected {
            return false;
        }
        self.shared
            .health
            .lock()
            .last_heartbeat_ok
            .map(|at| at.elapsed() <= self.config.heartbeat_staleness)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> SupervisorStats {
        let state = self.status();
        let healthy = self.is_healthy();
        let health = self.shared.health.lock();
        let now = Instant::now();

        SupervisorStats {
            target: self.shared.target,
            state,
            healthy,
            attempt: health.attempt,
            consecutive_misses: health.consecutive_misses,
            connects: health.connects,
            connect_failures: health.connect_failures,
            drops: health.drops,
            session_id: health.session_id.clone(),
            last_latency_ms: health.last_latency.map(|d| d.as_millis() as u64),
            last_heartbeat_age_ms: health
                .last_heartbeat_ok
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            backoff_remaining_ms: health
                .backoff_until
                .filter(|_| state == SessionState::Backoff)
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }

    fn send(&self, command: Command) -> bool {
        match self.control.lock().as_ref() {
            Some(handle) => handle.commands.send(command).is_ok(),
            None => false,
        }
    }
}

enum Phase {
    Connect,
    Connected(Box<dyn VoiceSession>),
    Backoff(BackoffDelay),
    Shutdown,
}

enum Wake {
    Command(Option<Command>),
    Beat(Result<Result<Duration, HeartbeatError>, Elapsed>),
}

/// 单个控制任务：所有状态转换都在这里发生（start/stop 除外）
struct ControlLoop {
    config: SupervisorConfig,
    connector: Arc<dyn VoiceConnector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    backoff: BackoffPolicy,
}

impl ControlLoop {
    async fn run(mut self) {
        let mut phase = Phase::Connect;
        loop {
            phase = match phase {
                Phase::Connect => self.connect().await,
                Phase::Connected(session) => self.hold(session).await,
                Phase::Backoff(delay) => self.wait_backoff(delay).await,
                Phase::Shutdown => break,
            };
        }

        {
            let mut health = self.shared.health.lock();
            health.session_id = None;
            health.backoff_until = None;
        }
        self.shared
            .transition(SessionState::Disconnected, TransitionReason::ShutdownRequested);
        info!("🛑 {} presence supervisor stopped", self.shared.target);
    }

    async fn connect(&mut self) -> Phase {
        let connector = Arc::clone(&self.connector);
        let target = self.shared.target;
        let attempt = timeout(self.config.connect_timeout, async move {
            connector.connect(&target).await
        });
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(session)) => self.on_connected(session),
                        Ok(Err(e)) => self.on_connect_failed(TransitionReason::ConnectFailed, e.into()),
                        Err(_) => self.on_connect_failed(
                            TransitionReason::ConnectTimeout,
                            PresenceError::ConnectFailure(format!(
                                "no answer within {:?}",
                                self.config.connect_timeout
                            )),
                        ),
                    };
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Phase::Shutdown,
                    // 已经在连接中
                    Some(other) => debug!("{} ignoring {:?} while connecting", target, other),
                }
            }
        }
    }

    fn on_connected(&mut self, session: Box<dyn VoiceSession>) -> Phase {
        self.backoff.reset();
        {
            let mut health = self.shared.health.lock();
            health.attempt = 0;
            health.consecutive_misses = 0;
            health.last_heartbeat_ok = Some(Instant::now());
            health.connects += 1;
            health.session_id = Some(session.id().to_string());
            health.backoff_until = None;
        }
        metrics::record_connect(self.shared.target);
        self.shared
            .transition(SessionState::Connected, TransitionReason::ConnectSuccess);
        info!("✅ {} voice session {} established", self.shared.target, session.id());
        Phase::Connected(session)
    }

    fn on_connect_failed(&mut self, reason: TransitionReason, error: PresenceError) -> Phase {
        self.shared.health.lock().connect_failures += 1;
        metrics::record_connect_failure(self.shared.target);
        self.enter_backoff(reason, error)
    }

    /// 已连接：按间隔发心跳，同时响应控制命令
    async fn hold(&mut self, mut session: Box<dyn VoiceSession>) -> Phase {
        let period = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                _ = ticker.tick() => {
                    let beat = timeout(self.config.heartbeat_timeout, session.heartbeat());
                    tokio::select! {
                        command = self.commands.recv() => Wake::Command(command),
                        result = beat => Wake::Beat(result),
                    }
                }
            };

            match wake {
                Wake::Beat(Ok(Ok(latency))) => self.on_heartbeat_ok(latency),
                Wake::Beat(Ok(Err(HeartbeatError::Dropped(msg)))) => {
                    warn!("📴 {} voice session dropped: {}", self.shared.target, msg);
                    session.close().await;
                    return self.on_session_lost(
                        TransitionReason::SessionDropped,
                        PresenceError::ConnectFailure(format!("session dropped: {}", msg)),
                    );
                }
                Wake::Beat(Ok(Err(HeartbeatError::Timeout))) | Wake::Beat(Err(_)) => {
                    if let Some(misses) = self.on_heartbeat_missed() {
                        session.close().await;
                        return self.on_session_lost(
                            TransitionReason::HeartbeatMissed,
                            PresenceError::HeartbeatTimeout(format!(
                                "{} consecutive heartbeats missed",
                                misses
                            )),
                        );
                    }
                }
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => {
                    session.close().await;
                    return Phase::Shutdown;
                }
                Wake::Command(Some(Command::ForceReconnect)) => {
                    info!("🔌 {} closing session {} for forced reconnect", self.shared.target, session.id());
                    session.close().await;
                    self.shared.health.lock().session_id = None;
                    self.shared
                        .transition(SessionState::Connecting, TransitionReason::ForceReconnect);
                    return Phase::Connect;
                }
                Wake::Command(Some(Command::ForceBackoff(reason))) => {
                    session.close().await;
                    return self.on_session_lost(
                        reason,
                        PresenceError::HeartbeatTimeout(format!("forced backoff ({})", reason)),
                    );
                }
            }
        }
    }

    fn on_heartbeat_ok(&mut self, latency: Duration) {
        {
            let mut health = self.shared.health.lock();
            health.last_heartbeat_ok = Some(Instant::now());
            health.consecutive_misses = 0;
            health.last_latency = Some(latency);
        }
        metrics::record_heartbeat_latency(self.shared.target, latency.as_secs_f64());

        if latency > self.config.latency_warn {
            warn!(
                "⚠️ High voice latency on {}: {}ms (threshold {}ms)",
                self.shared.target,
                latency.as_millis(),
                self.config.latency_warn.as_millis()
            );
        }
    }

    /// 记录一次心跳丢失；达到容忍次数时返回丢失次数
    fn on_heartbeat_missed(&mut self) -> Option<u32> {
        let misses = {
            let mut health = self.shared.health.lock();
            health.consecutive_misses += 1;
            health.consecutive_misses
        };
        metrics::record_heartbeat_miss(self.shared.target);
        warn!(
            "💔 {} missed heartbeat ({}/{})",
            self.shared.target, misses, self.config.missed_heartbeat_tolerance
        );

        (misses >= self.config.missed_heartbeat_tolerance).then_some(misses)
    }

    fn on_session_lost(&mut self, reason: TransitionReason, error: PresenceError) -> Phase {
        {
            let mut health = self.shared.health.lock();
            health.drops += 1;
            health.session_id = None;
        }
        metrics::record_session_drop(self.shared.target);
        self.enter_backoff(reason, error)
    }

    /// 连接层错误在这里被吸收：只留下日志和 `RetryScheduled` 事件
    fn enter_backoff(&mut self, reason: TransitionReason, error: PresenceError) -> Phase {
        debug_assert!(error.is_transient());
        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        let total = delay.total();
        {
            let mut health = self.shared.health.lock();
            health.attempt = attempt;
            health.backoff_until = Some(Instant::now() + total);
        }

        self.shared.transition(SessionState::Backoff, reason);
        warn!(
            "🔁 {} retry #{} in {:?} ({}): {}",
            self.shared.target, attempt, total, reason, error
        );
        self.shared.event_bus.publish(PresenceEvent::RetryScheduled {
            target: self.shared.target,
            attempt,
            delay_ms: total.as_millis() as u64,
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        Phase::Backoff(delay)
    }

    async fn wait_backoff(&mut self, delay: BackoffDelay) -> Phase {
        let sleep = tokio::time::sleep(delay.total());
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    self.shared
                        .transition(SessionState::Connecting, TransitionReason::BackoffElapsed);
                    return Phase::Connect;
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Phase::Shutdown,
                    Some(Command::ForceReconnect) => {
                        info!("⏩ {} backoff cancelled by forced reconnect", self.shared.target);
                        self.shared
                            .transition(SessionState::Connecting, TransitionReason::ForceReconnect);
                        return Phase::Connect;
                    }
                    Some(Command::ForceBackoff(_)) => {}
                }
            }
        }
    }
}

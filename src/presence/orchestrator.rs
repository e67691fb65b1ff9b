use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::domain::PresenceEvent;
use crate::error::{PresenceError, Result};
use crate::infra::EventBus;
use crate::model::{SessionState, TransitionReason, VoiceTarget};
use super::connector::VoiceConnector;
use super::supervisor::{SupervisorConfig, SupervisorStats, VoiceSessionSupervisor};

/// 编排器配置
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub supervisor: SupervisorConfig,
    /// 存活检查间隔
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            poll_interval: Duration::from_secs(30),
        }
    }
}

enum Lifecycle {
    Idle,
    Running { poll: JoinHandle<()> },
    Stopped,
}

/// 常驻语音在线编排器
///
/// 组合一个监督器和一个存活检查任务：监督器声称已连接但心跳已过期时，
/// 强制其进入退避并重连。`stop()` 之后不可再启动。
pub struct PresenceOrchestrator {
    supervisor: Arc<VoiceSessionSupervisor>,
    poll_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    /// stop() 完成后置为 true；并发的 stop() 调用等待它
    stopped: watch::Sender<bool>,
    event_bus: Arc<EventBus>,
}

impl PresenceOrchestrator {
    pub fn new(
        target: VoiceTarget,
        connector: Arc<dyn VoiceConnector>,
        config: OrchestratorConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let supervisor = VoiceSessionSupervisor::new(
            target,
            connector,
            config.supervisor,
            Arc::clone(&event_bus),
        );

        Self {
            supervisor: Arc::new(supervisor),
            poll_interval: config.poll_interval,
            lifecycle: Mutex::new(Lifecycle::Idle),
            stopped: watch::channel(false).0,
            event_bus,
        }
    }

    pub fn target(&self) -> VoiceTarget {
        self.supervisor.target()
    }

    /// 启动监督器和存活检查（运行中为空操作）
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Stopped => Err(PresenceError::ShutdownInProgress),
            Lifecycle::Running { .. } => Ok(()),
            Lifecycle::Idle => {
                self.supervisor.start();
                let poll = self.spawn_liveness_poll();
                *lifecycle = Lifecycle::Running { poll };
                info!("🚀 Presence orchestrator for {} started", self.target());
                Ok(())
            }
        }
    }

    /// 停止两个任务（可重复调用）
    ///
    /// 并发调用时，后来者等到第一个调用完成后才返回，返回时状态一定是 Disconnected。
    pub async fn stop(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);

        match previous {
            Lifecycle::Running { poll } => {
                poll.abort();
                self.supervisor.stop().await;
                info!("✅ Presence orchestrator for {} stopped", self.target());
            }
            Lifecycle::Idle => self.supervisor.stop().await,
            Lifecycle::Stopped => {
                let mut stopped = self.stopped.subscribe();
                let _ = stopped.wait_for(|done| *done).await;
                return Ok(());
            }
        }

        self.stopped.send_replace(true);
        Ok(())
    }

    /// 立即重连；未启动时等同于 start()
    pub fn force_reconnect(&self) -> Result<()> {
        let running = match *self.lifecycle.lock() {
            Lifecycle::Stopped => return Err(PresenceError::ShutdownInProgress),
            Lifecycle::Idle => false,
            Lifecycle::Running { .. } => true,
        };

        if !running {
            return self.start();
        }

        info!("🔌 Forced reconnect requested for {}", self.target());
        if !self.supervisor.force_reconnect() && !self.supervisor.respawn_if_dead() {
            warn!("⚠️ {} control task is not accepting commands", self.target());
        }
        Ok(())
    }

    pub fn status(&self) -> SessionState {
        self.supervisor.status()
    }

    pub fn is_healthy(&self) -> bool {
        self.supervisor.is_healthy()
    }

    pub fn stats(&self) -> SupervisorStats {
        self.supervisor.stats()
    }

    /// 订阅事件（状态变化、重试安排）
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_bus.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.supervisor.watch_state()
    }

    fn spawn_liveness_poll(&self) -> JoinHandle<()> {
        let supervisor = Arc::clone(&self.supervisor);
        let every = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                // 控制任务死掉时状态会停在 Connected / Connecting，不能只看状态
                if supervisor.respawn_if_dead() {
                    continue;
                }

                if supervisor.status() == SessionState::Connected && !supervisor.is_healthy() {
                    warn!(
                        "🩺 {} reports connected but heartbeats are stale, forcing reconnect",
                        supervisor.target()
                    );
                    if !supervisor.force_backoff(TransitionReason::Unhealthy) {
                        error!("❌ {} control task rejected forced backoff", supervisor.target());
                        supervisor.respawn_if_dead();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::backoff::BackoffConfig;
    use crate::presence::connector::{ConnectOutcome, HeartbeatBehavior, SimulatedVoiceConnector};
    use tokio::time::timeout;

    fn config(base_delay: Duration, tolerance: u32) -> OrchestratorConfig {
        OrchestratorConfig {
            supervisor: SupervisorConfig {
                connect_timeout: Duration::from_secs(5),
                heartbeat_interval: Duration::from_secs(1),
                heartbeat_timeout: Duration::from_millis(500),
                missed_heartbeat_tolerance: tolerance,
                heartbeat_staleness: Duration::from_secs(3),
                latency_warn: Duration::from_millis(200),
                backoff: BackoffConfig {
                    base_delay,
                    max_delay: base_delay * 32,
                    jitter_fraction: 0.0,
                },
            },
            poll_interval: Duration::from_secs(5),
        }
    }

    fn orchestrator(connector: Arc<SimulatedVoiceConnector>, config: OrchestratorConfig) -> PresenceOrchestrator {
        PresenceOrchestrator::new(VoiceTarget(7), connector, config, Arc::new(EventBus::new()))
    }

    async fn wait_for(orchestrator: &PresenceOrchestrator, state: SessionState) {
        let mut rx = orchestrator.watch_state();
        timeout(Duration::from_secs(120), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .expect("state channel closed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector.clone(), config(Duration::from_secs(1), 3));

        orchestrator.start().unwrap();
        wait_for(&orchestrator, SessionState::Connected).await;

        orchestrator.stop().await.unwrap();
        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.status(), SessionState::Disconnected);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start() {
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector, config(Duration::from_secs(1), 3));

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.status(), SessionState::Disconnected);
        assert_eq!(orchestrator.start(), Err(PresenceError::ShutdownInProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_after_stop_fail() {
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector, config(Duration::from_secs(1), 3));

        orchestrator.start().unwrap();
        orchestrator.stop().await.unwrap();

        assert_eq!(orchestrator.start(), Err(PresenceError::ShutdownInProgress));
        assert_eq!(orchestrator.force_reconnect(), Err(PresenceError::ShutdownInProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector.clone(), config(Duration::from_secs(1), 3));

        orchestrator.start().unwrap();
        orchestrator.start().unwrap();
        wait_for(&orchestrator, SessionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(connector.connect_attempts(), 1);
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_heals_within_one_poll() {
        // 容忍次数很高：只有存活检查能发现问题
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector.clone(), config(Duration::from_secs(1), 1000));

        orchestrator.start().unwrap();
        wait_for(&orchestrator, SessionState::Connected).await;
        connector.set_heartbeat_behavior(HeartbeatBehavior::Timeout);

        // 心跳在 3 秒后过期，下一次存活检查在 5 秒
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(orchestrator.status(), SessionState::Backoff);
        assert!(!orchestrator.is_healthy());

        // 恢复后重新连上
        connector.set_heartbeat_behavior(HeartbeatBehavior::Healthy);
        wait_for(&orchestrator, SessionState::Connected).await;
        assert_eq!(connector.connect_attempts(), 2);
        assert!(orchestrator.is_healthy());

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_cancels_backoff() {
        let connector = Arc::new(SimulatedVoiceConnector::scripted([
            ConnectOutcome::Fail,
            ConnectOutcome::Hang,
        ]));
        let orchestrator = orchestrator(connector.clone(), config(Duration::from_secs(20), 3));

        orchestrator.start().unwrap();
        wait_for(&orchestrator, SessionState::Backoff).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.status(), SessionState::Backoff);
        let remaining = orchestrator.stats().backoff_remaining_ms.unwrap();
        assert!(remaining > 18_000 && remaining <= 19_000, "remaining {}ms", remaining);

        orchestrator.force_reconnect().unwrap();
        timeout(Duration::from_millis(10), wait_for(&orchestrator, SessionState::Connecting))
            .await
            .expect("force_reconnect did not skip the backoff timer");
        assert_eq!(connector.connect_attempts(), 2);

        orchestrator.stop().await.unwrap();
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_while_connected_closes_session() {
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector.clone(), config(Duration::from_secs(1), 3));

        orchestrator.start().unwrap();
        wait_for(&orchestrator, SessionState::Connected).await;
        let first = orchestrator.stats().session_id;

        orchestrator.force_reconnect().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        wait_for(&orchestrator, SessionState::Connected).await;

        assert_eq!(connector.connect_attempts(), 2);
        assert_eq!(connector.open_sessions(), 1);
        assert_ne!(orchestrator.stats().session_id, first);

        orchestrator.stop().await.unwrap();
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_when_idle_starts() {
        let connector = Arc::new(SimulatedVoiceConnector::reliable());
        let orchestrator = orchestrator(connector, config(Duration::from_secs(1), 3));

        orchestrator.force_reconnect().unwrap();
        wait_for(&orchestrator, SessionState::Connected).await;
        orchestrator.stop().await.unwrap();
    }

    /// 第一次 connect 直接 panic，之后委托给可靠连接器
    struct PanicOnceConnector {
        panicked: std::sync::atomic::AtomicBool,
        inner: SimulatedVoiceConnector,
    }

    #[async_trait::async_trait]
    impl VoiceConnector for PanicOnceConnector {
        async fn connect(
            &self,
            target: &VoiceTarget,
        ) -> std::result::Result<Box<dyn crate::presence::VoiceSession>, crate::presence::ConnectError> {
            if !self.panicked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("voice gateway crashed while joining {}", target);
            }
            self.inner.connect(target).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_respawns_dead_control_task() {
        let connector = Arc::new(PanicOnceConnector {
            panicked: std::sync::atomic::AtomicBool::new(false),
            inner: SimulatedVoiceConnector::reliable(),
        });
        let orchestrator = PresenceOrchestrator::new(
            VoiceTarget(9),
            connector.clone(),
            config(Duration::from_secs(1), 3),
            Arc::new(EventBus::new()),
        );
        let started = Instant::now();

        orchestrator.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.status(), SessionState::Connecting);
        assert!(!orchestrator.supervisor.is_running());

        // 下一次存活检查（5 秒）重新拉起控制任务
        wait_for(&orchestrator, SessionState::Connected).await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(orchestrator.supervisor.is_running());
        assert_eq!(connector.inner.connect_attempts(), 1);

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.status(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_respawns_dead_control_task() {
        let connector = Arc::new(PanicOnceConnector {
            panicked: std::sync::atomic::AtomicBool::new(false),
            inner: SimulatedVoiceConnector::reliable(),
        });
        let orchestrator = PresenceOrchestrator::new(
            VoiceTarget(10),
            connector.clone(),
            config(Duration::from_secs(1), 3),
            Arc::new(EventBus::new()),
        );

        orchestrator.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!orchestrator.supervisor.is_running());

        orchestrator.force_reconnect().unwrap();
        timeout(Duration::from_secs(1), wait_for(&orchestrator, SessionState::Connected))
            .await
            .expect("force_reconnect did not revive the control task");

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stop_waits_for_first() {
        let connector = Arc::new(SimulatedVoiceConnector::new(0.0, Duration::from_millis(50)));
        let orchestrator = orchestrator(connector.clone(), config(Duration::from_secs(1), 3));

        orchestrator.start().unwrap();
        wait_for(&orchestrator, SessionState::Connected).await;

        let (first, second) = tokio::join!(orchestrator.stop(), async {
            orchestrator.stop().await.unwrap();
            (orchestrator.status(), connector.open_sessions())
        });

        first.unwrap();
        assert_eq!(second, (SessionState::Disconnected, 0));
    }
}

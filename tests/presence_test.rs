use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use upibot::domain::PresenceEvent;
use upibot::infra::EventBus;
use upibot::model::{SessionState, VoiceTarget};
use upibot::presence::{
    BackoffConfig, ConnectOutcome, HeartbeatBehavior, OrchestratorConfig, PresenceOrchestrator,
    PresenceRegistry, SimulatedVoiceConnector, SupervisorConfig,
};

fn config(base_delay: Duration) -> OrchestratorConfig {
    OrchestratorConfig {
        supervisor: SupervisorConfig {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_millis(500),
            missed_heartbeat_tolerance: 3,
            heartbeat_staleness: Duration::from_secs(10),
            latency_warn: Duration::from_millis(200),
            backoff: BackoffConfig {
                base_delay,
                max_delay: Duration::from_secs(32),
                jitter_fraction: 0.0,
            },
        },
        poll_interval: Duration::from_secs(30),
    }
}

async fn wait_for(orchestrator: &PresenceOrchestrator, state: SessionState) {
    let mut rx = orchestrator.watch_state();
    timeout(Duration::from_secs(300), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .expect("state channel closed");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sequence_until_connected() {
    let connector = Arc::new(SimulatedVoiceConnector::scripted(
        std::iter::repeat(ConnectOutcome::Fail).take(7),
    ));
    let registry = PresenceRegistry::new(
        connector.clone(),
        config(Duration::from_secs(1)),
        Arc::new(EventBus::new()),
    );
    let mut events = registry.subscribe();
    let orchestrator = registry.register(VoiceTarget(500)).unwrap();

    registry.start_all().unwrap();
    wait_for(&orchestrator, SessionState::Connected).await;

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PresenceEvent::RetryScheduled { delay_ms, .. } = event {
            delays.push(delay_ms);
        }
    }
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 32_000]);
    assert_eq!(connector.connect_attempts(), 8);
    assert!(registry.any_healthy());

    registry.stop_all().await;
    assert_eq!(connector.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_skips_pending_backoff() {
    let connector = Arc::new(SimulatedVoiceConnector::scripted([ConnectOutcome::Fail]));
    let orchestrator = PresenceOrchestrator::new(
        VoiceTarget(600),
        connector.clone(),
        config(Duration::from_secs(20)),
        Arc::new(EventBus::new()),
    );

    orchestrator.start().unwrap();
    wait_for(&orchestrator, SessionState::Backoff).await;
    assert_eq!(connector.connect_attempts(), 1);

    orchestrator.force_reconnect().unwrap();

    // 远早于 20 秒的退避到期
    tokio::time::sleep(Duration::from_millis(10)).await;
    wait_for(&orchestrator, SessionState::Connected).await;
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(orchestrator.stats().backoff_remaining_ms, None);

    orchestrator.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dropped_session_reconnects() {
    let connector = Arc::new(SimulatedVoiceConnector::reliable());
    let registry = PresenceRegistry::new(
        connector.clone(),
        config(Duration::from_secs(1)),
        Arc::new(EventBus::new()),
    );
    let orchestrator = registry.register(VoiceTarget(700)).unwrap();

    registry.start_all().unwrap();
    wait_for(&orchestrator, SessionState::Connected).await;

    connector.set_heartbeat_behavior(HeartbeatBehavior::Drop);
    wait_for(&orchestrator, SessionState::Backoff).await;
    assert!(!orchestrator.is_healthy());

    connector.set_heartbeat_behavior(HeartbeatBehavior::Healthy);
    wait_for(&orchestrator, SessionState::Connected).await;
    assert_eq!(orchestrator.stats().drops, 1);
    assert_eq!(connector.open_sessions(), 1);

    registry.stop_all().await;
    assert_eq!(orchestrator.status(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_one_presence_per_target() {
    let registry = PresenceRegistry::new(
        Arc::new(SimulatedVoiceConnector::reliable()),
        config(Duration::from_secs(1)),
        Arc::new(EventBus::new()),
    );

    registry.register(VoiceTarget(1)).unwrap();
    registry.register(VoiceTarget(2)).unwrap();
    assert!(registry.register(VoiceTarget(1)).is_err());
    assert_eq!(registry.targets(), vec![VoiceTarget(1), VoiceTarget(2)]);

    assert!(registry.release(VoiceTarget(1)).await);
    registry.register(VoiceTarget(1)).unwrap();
    assert_eq!(registry.len(), 2);
}

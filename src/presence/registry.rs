use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::PresenceEvent;
use crate::error::{PresenceError, Result};
use crate::infra::EventBus;
use crate::model::{SessionState, VoiceTarget};
use super::connector::VoiceConnector;
use super::orchestrator::{OrchestratorConfig, PresenceOrchestrator};
use super::supervisor::SupervisorStats;

/// 单个目标的在线状态快照（/health 使用）
#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub target: VoiceTarget,
    pub state: SessionState,
    pub healthy: bool,
    pub stats: SupervisorStats,
}

/// 在线编排器注册表
///
/// 保证每个语音目标最多一个活跃编排器，所有编排器共享同一个事件总线。
pub struct PresenceRegistry {
    connector: Arc<dyn VoiceConnector>,
    config: OrchestratorConfig,
    event_bus: Arc<EventBus>,
    orchestrators: DashMap<VoiceTarget, Arc<PresenceOrchestrator>>,
}

impl PresenceRegistry {
    pub fn new(
        connector: Arc<dyn VoiceConnector>,
        config: OrchestratorConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            connector,
            config,
            event_bus,
            orchestrators: DashMap::new(),
        }
    }

    /// 为目标创建编排器（不启动）
    pub fn register(&self, target: VoiceTarget) -> Result<Arc<PresenceOrchestrator>> {
        match self.orchestrators.entry(target) {
            Entry::Occupied(_) => Err(PresenceError::TargetInUse(target.to_string())),
            Entry::Vacant(slot) => {
                let orchestrator = Arc::new(PresenceOrchestrator::new(
                    target,
                    Arc::clone(&self.connector),
                    self.config.clone(),
                    Arc::clone(&self.event_bus),
                ));
                slot.insert(Arc::clone(&orchestrator));
                info!("📌 Registered presence target {}", target);
                Ok(orchestrator)
            }
        }
    }

    /// 启动全部已注册的编排器
    pub fn start_all(&self) -> Result<()> {
        for orchestrator in self.orchestrators() {
            orchestrator.start()?;
        }
        Ok(())
    }

    /// 停止全部编排器
    pub async fn stop_all(&self) {
        for orchestrator in self.orchestrators() {
            if let Err(e) = orchestrator.stop().await {
                warn!("⚠️ Failed to stop presence for {}: {}", orchestrator.target(), e);
            }
        }
    }

    /// 停止并移除目标，之后可以重新注册
    pub async fn release(&self, target: VoiceTarget) -> bool {
        match self.orchestrators.remove(&target) {
            Some((_, orchestrator)) => {
                if let Err(e) = orchestrator.stop().await {
                    warn!("⚠️ Failed to stop presence for {}: {}", target, e);
                }
                info!("📤 Released presence target {}", target);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, target: VoiceTarget) -> Option<Arc<PresenceOrchestrator>> {
        self.orchestrators.get(&target).map(|entry| Arc::clone(entry.value()))
    }

    pub fn targets(&self) -> Vec<VoiceTarget> {
        let mut targets: Vec<_> = self.orchestrators.iter().map(|entry| *entry.key()).collect();
        targets.sort_by_key(|t| t.channel_id());
        targets
    }

    pub fn len(&self) -> usize {
        self.orchestrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orchestrators.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PresenceSnapshot> {
        let mut snapshots: Vec<_> = self
            .orchestrators()
            .into_iter()
            .map(|orchestrator| {
                let stats = orchestrator.stats();
                PresenceSnapshot {
                    target: stats.target,
                    state: stats.state,
                    healthy: stats.healthy,
                    stats,
                }
            })
            .collect();
        snapshots.sort_by_key(|s| s.target.channel_id());
        snapshots
    }

    /// 至少一个目标健康
    pub fn any_healthy(&self) -> bool {
        self.orchestrators.iter().any(|entry| entry.value().is_healthy())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// 复制出 Arc 列表，避免在 await 期间持有分片锁
    fn orchestrators(&self) -> Vec<Arc<PresenceOrchestrator>> {
        self.orchestrators
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

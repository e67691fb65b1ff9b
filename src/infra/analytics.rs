use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::infra::metrics;
use crate::model::{Identity, RequestKind};

/// 统计存储接口
///
/// 真实部署中由文档数据库实现；这里只要求一个写入操作
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// 记录一次事件
    async fn record_event(
        &self,
        identity: Identity,
        kind: RequestKind,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// 一条统计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub identity: Identity,
    pub kind: RequestKind,
    pub timestamp: DateTime<Utc>,
}

/// 统计汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_events: usize,
    pub unique_users: usize,
    pub by_kind: HashMap<String, usize>,
}

/// 内存统计存储
///
/// 按时间顺序追加，按保留期裁剪
pub struct MemoryAnalyticsStore {
    records: RwLock<Vec<AnalyticsRecord>>,
    enabled: bool,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            enabled: true,
        }
    }

    /// 关闭统计时写入直接丢弃
    pub fn disabled() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            enabled: false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// 某个用户的全部记录
    pub fn records_for(&self, identity: Identity) -> Vec<AnalyticsRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.identity == identity)
            .cloned()
            .collect()
    }

    /// 删除早于 `now - retention` 的记录，返回删除数量
    pub fn prune_older_than(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        before - records.len()
    }

    /// 汇总统计
    pub fn summary(&self) -> AnalyticsSummary {
        summarize(self.records.read().iter())
    }

    /// 某个用户自 `since`（含）以来的统计，按事件类型计数
    pub fn summary_for(&self, identity: Identity, since: DateTime<Utc>) -> AnalyticsSummary {
        let records = self.records.read();
        summarize(
            records
                .iter()
                .filter(|r| r.identity == identity && r.timestamp >= since),
        )
    }

    /// 启动保留期清理任务
    pub fn spawn_retention_task(
        self: &Arc<Self>,
        retention: Duration,
        every: Duration,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;

                let pruned = store.prune_older_than(retention, Utc::now());
                if pruned > 0 {
                    info!("🧹 Pruned {} analytics records past retention", pruned);
                }
            }
        })
    }
}

fn summarize<'a>(records: impl Iterator<Item = &'a AnalyticsRecord>) -> AnalyticsSummary {
    let mut summary = AnalyticsSummary::default();
    let mut users = HashSet::new();

    for record in records {
        *summary.by_kind.entry(record.kind.as_str().to_string()).or_insert(0) += 1;
        summary.total_events += 1;
        users.insert(record.identity);
    }

    summary.unique_users = users.len();
    summary
}

impl Default for MemoryAnalyticsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
    async fn record_event(
        &self,
        identity: Identity,
        kind: RequestKind,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        self.records.write().push(AnalyticsRecord {
            identity,
            kind,
            timestamp,
        });

        metrics::record_analytics_event(kind);
        debug!("📊 Recorded {} for user {}", kind, identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_summary() {
        let store = MemoryAnalyticsStore::new();
        let now = Utc::now();

        store.record_event(Identity(1), RequestKind::QrGenerate, now).await.unwrap();
        store.record_event(Identity(1), RequestKind::UpiSave, now).await.unwrap();
        store.record_event(Identity(2), RequestKind::QrGenerate, now).await.unwrap();

        let summary = store.summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.by_kind.get("qr_generate"), Some(&2));
        assert_eq!(store.records_for(Identity(1)).len(), 2);
    }

    #[tokio::test]
    async fn test_summary_for_user_window() {
        let store = MemoryAnalyticsStore::new();
        let now = Utc::now();
        let since = now - chrono::Duration::hours(24);

        store.record_event(Identity(1), RequestKind::QrGenerate, now - chrono::Duration::hours(30)).await.unwrap();
        store.record_event(Identity(1), RequestKind::QrGenerate, since).await.unwrap();
        store.record_event(Identity(1), RequestKind::QrGenerate, now).await.unwrap();
        store.record_event(Identity(1), RequestKind::UpiSave, now).await.unwrap();
        store.record_event(Identity(2), RequestKind::QrGenerate, now).await.unwrap();

        let summary = store.summary_for(Identity(1), since);
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.unique_users, 1);
        assert_eq!(summary.by_kind.get("qr_generate"), Some(&2));
        assert_eq!(summary.by_kind.get("upi_save"), Some(&1));
        assert_eq!(summary.by_kind.get("command"), None);

        let empty = store.summary_for(Identity(3), since);
        assert_eq!(empty.total_events, 0);
        assert_eq!(empty.unique_users, 0);
        assert!(empty.by_kind.is_empty());
    }

    #[tokio::test]
    async fn test_prune_older_than_retention() {
        let store = MemoryAnalyticsStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::days(31);

        store.record_event(Identity(1), RequestKind::QrGenerate, old).await.unwrap();
        store.record_event(Identity(1), RequestKind::QrGenerate, now).await.unwrap();

        let pruned = store.prune_older_than(Duration::from_secs(30 * 24 * 3600), now);
        assert_eq!(pruned, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_store_drops_events() {
        let store = MemoryAnalyticsStore::disabled();
        store
            .record_event(Identity(1), RequestKind::Command, Utc::now())
            .await
            .unwrap();
        assert!(store.is_empty());
    }
}

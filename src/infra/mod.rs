// Infrastructure layer - 基础设施层
// 负责各种基础服务：统计存储、事件总线、监控指标、载荷协作者接口

pub mod analytics;
pub mod event_bus;
pub mod metrics;
pub mod payload;

pub use analytics::{AnalyticsRecord, AnalyticsStore, AnalyticsSummary, MemoryAnalyticsStore};
pub use event_bus::EventBus;
pub use payload::{ColorScheme, PayloadCipher, QrRenderer};

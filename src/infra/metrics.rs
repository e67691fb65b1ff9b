//! Prometheus 指标：准入结果、语音连接重试、心跳丢失、会话状态等
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未调用 `init()` 时各 record 函数为空操作（metrics 门面的默认行为）。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

use crate::model::{RequestKind, SessionState, VoiceTarget};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_REQUESTS_ADMITTED: &str = "upibot_requests_admitted_total";
const COUNTER_REQUESTS_REJECTED: &str = "upibot_requests_rejected_total";
const COUNTER_REQUESTS_FLAGGED: &str = "upibot_requests_flagged_total";
const GAUGE_TRACKED_IDENTITIES: &str = "upibot_tracked_identities";
const COUNTER_IDENTITIES_EVICTED: &str = "upibot_identities_evicted_total";
const COUNTER_CONNECT_FAILURES: &str = "upibot_voice_connect_failures_total";
const COUNTER_CONNECTS: &str = "upibot_voice_connects_total";
const COUNTER_SESSION_DROPS: &str = "upibot_voice_session_drops_total";
const COUNTER_HEARTBEAT_MISSES: &str = "upibot_voice_heartbeat_misses_total";
const HISTOGRAM_HEARTBEAT_LATENCY: &str = "upibot_voice_heartbeat_latency_seconds";
const GAUGE_SESSION_STATE: &str = "upibot_voice_session_state";
const COUNTER_ANALYTICS_EVENTS: &str = "upibot_analytics_events_total";

/// 初始化 Prometheus 指标（安装全局 Recorder，返回 Handle 用于 HTTP 暴露）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 记录一次准入结果
pub fn record_admission(kind: RequestKind, admitted: bool, flagged: bool) {
    let kind = kind.as_str();
    if admitted {
        metrics::counter!(COUNTER_REQUESTS_ADMITTED, "kind" => kind).increment(1);
    } else {
        metrics::counter!(COUNTER_REQUESTS_REJECTED, "kind" => kind).increment(1);
    }
    if flagged {
        metrics::counter!(COUNTER_REQUESTS_FLAGGED, "kind" => kind).increment(1);
    }
}

/// 更新当前跟踪的用户数（Gauge）。由清理任务周期调用。
pub fn record_tracked_identities(count: usize) {
    metrics::gauge!(GAUGE_TRACKED_IDENTITIES).set(count as f64);
}

/// 记录被回收的空闲用户数
pub fn record_identities_evicted(count: usize) {
    metrics::counter!(COUNTER_IDENTITIES_EVICTED).increment(count as u64);
}

/// 记录一次连接失败
pub fn record_connect_failure(target: VoiceTarget) {
    metrics::counter!(COUNTER_CONNECT_FAILURES, "target" => target.to_string()).increment(1);
}

/// 记录一次连接成功
pub fn record_connect(target: VoiceTarget) {
    metrics::counter!(COUNTER_CONNECTS, "target" => target.to_string()).increment(1);
}

/// 记录一次会话掉线（包括心跳丢失过多、健康检查失败）
pub fn record_session_drop(target: VoiceTarget) {
    metrics::counter!(COUNTER_SESSION_DROPS, "target" => target.to_string()).increment(1);
}

/// 记录一次心跳丢失
pub fn record_heartbeat_miss(target: VoiceTarget) {
    metrics::counter!(COUNTER_HEARTBEAT_MISSES, "target" => target.to_string()).increment(1);
}

/// 记录心跳延迟
pub fn record_heartbeat_latency(target: VoiceTarget, latency_secs: f64) {
    metrics::histogram!(HISTOGRAM_HEARTBEAT_LATENCY, "target" => target.to_string()).record(latency_secs);
}

/// 更新会话状态（Gauge：0=Disconnected 1=Connecting 2=Connected 3=Backoff）
pub fn record_session_state(target: VoiceTarget, state: SessionState) {
    metrics::gauge!(GAUGE_SESSION_STATE, "target" => target.to_string()).set(state.as_gauge());
}

/// 记录写入统计存储的事件
pub fn record_analytics_event(kind: RequestKind) {
    metrics::counter!(COUNTER_ANALYTICS_EVENTS, "kind" => kind.as_str()).increment(1);
}

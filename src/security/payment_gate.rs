/// 支付请求准入入口
///
/// 所有收款二维码相关请求在任何下游工作（二维码渲染、统计写入）之前经过这里：
/// 1. AntiSpamGuard 判定
/// 2. 准入：写一条统计事件（失败只记日志，不影响准入）
/// 3. 拒绝：返回带等待时间的提示；被标记时返回升级信号

use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PresenceError, Result};
use crate::infra::{metrics, AnalyticsStore, ColorScheme, PayloadCipher, QrRenderer};
use crate::model::RequestEvent;
use super::spam_guard::AntiSpamGuard;

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// 放行
    Proceed,
    /// 稍后再试
    TryLater {
        #[serde(rename = "retry_after_secs", serialize_with = "serialize_secs")]
        retry_after: Duration,
    },
    /// 已标记刷屏，调用方应升级处理（例如临时禁言）
    Escalate {
        #[serde(rename = "retry_after_secs", serialize_with = "serialize_secs")]
        retry_after: Duration,
    },
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Proceed)
    }

    /// 给用户看的提示；放行时为 None
    pub fn user_message(&self) -> Option<String> {
        match self {
            AdmissionDecision::Proceed => None,
            AdmissionDecision::TryLater { retry_after } => Some(
                PresenceError::RateLimitExceeded {
                    retry_after_secs: retry_after.as_secs(),
                }
                .to_string(),
            ),
            AdmissionDecision::Escalate { .. } => Some(PresenceError::SpamFlagged.to_string()),
        }
    }

    /// 转成 Result，方便调用方直接 `?`
    pub fn into_result(self) -> Result<()> {
        match self {
            AdmissionDecision::Proceed => Ok(()),
            AdmissionDecision::TryLater { retry_after } => Err(PresenceError::RateLimitExceeded {
                retry_after_secs: retry_after.as_secs(),
            }),
            AdmissionDecision::Escalate { .. } => Err(PresenceError::SpamFlagged),
        }
    }
}

/// 支付请求准入服务
pub struct PaymentGate {
    guard: Arc<AntiSpamGuard>,
    analytics: Arc<dyn AnalyticsStore>,
}

impl PaymentGate {
    pub fn new(guard: Arc<AntiSpamGuard>, analytics: Arc<dyn AnalyticsStore>) -> Self {
        Self { guard, analytics }
    }

    pub fn guard(&self) -> &Arc<AntiSpamGuard> {
        &self.guard
    }

    /// 检查一次请求
    pub async fn check(&self, event: &RequestEvent) -> AdmissionDecision {
        let verdict = self.guard.evaluate(event.identity, event.at);
        metrics::record_admission(event.kind, verdict.admit, verdict.flagged);

        if verdict.admit {
            if let Err(e) = self
                .analytics
                .record_event(event.identity, event.kind, event.occurred_at)
                .await
            {
                warn!("⚠️ 统计写入失败（用户 {}，{}）: {}", event.identity, event.kind, e);
            }
            return AdmissionDecision::Proceed;
        }

        // 向上取整到秒，至少 1 秒
        let retry_after = self
            .guard
            .limiter()
            .retry_after(event.identity, event.at)
            .map(|d| Duration::from_secs(d.as_secs() + u64::from(d.subsec_nanos() > 0)))
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_secs(1));

        debug!(
            "用户 {} 的 {} 请求被拒绝，{} 秒后重试（刷屏分 {}）",
            event.identity,
            event.kind,
            retry_after.as_secs(),
            verdict.score
        );

        if verdict.flagged {
            AdmissionDecision::Escalate { retry_after }
        } else {
            AdmissionDecision::TryLater { retry_after }
        }
    }

    /// 准入后渲染收款二维码；被拒绝时不会调用渲染器
    pub async fn render_qr(
        &self,
        event: &RequestEvent,
        payload: &str,
        color_scheme: ColorScheme,
        renderer: &dyn QrRenderer,
    ) -> Result<Vec<u8>> {
        self.check(event).await.into_result()?;
        renderer.render_qr(payload, color_scheme).await
    }

    /// 准入后加密待保存的 UPI ID
    pub async fn seal_upi_id(
        &self,
        event: &RequestEvent,
        upi_id: &str,
        cipher: &dyn PayloadCipher,
    ) -> Result<Vec<u8>> {
        self.check(event).await.into_result()?;
        cipher.encrypt(upi_id).await
    }
}

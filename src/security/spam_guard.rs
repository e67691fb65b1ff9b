/// 反刷屏守卫
///
/// 在滑动窗口限流之上维护一个按时间衰减的刷屏分：
/// - 每次被拒绝 +1（饱和于 ceiling）
/// - 每经过一个 decay_interval 减 decay_amount（下限 0）
/// - 被拒绝且分数 >= threshold 时标记 flagged，调用方应升级处理
///
/// 锁顺序固定为：刷屏分 -> 限流窗口，同一用户的判定整体串行。

use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::PresenceEvent;
use crate::infra::{metrics, EventBus};
use crate::model::Identity;
use super::rate_limiter::SlidingWindowLimiter;

/// 反刷屏配置
#[derive(Debug, Clone)]
pub struct SpamGuardConfig {
    /// 标记阈值
    pub threshold: u32,
    /// 每个衰减周期减少的分数
    pub decay_amount: u32,
    /// 衰减周期
    pub decay_interval: Duration,
    /// 分数上限
    pub ceiling: u32,
    /// 空闲多久后回收
    pub idle_eviction: Duration,
}

impl Default for SpamGuardConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            decay_amount: 1,
            decay_interval: Duration::from_secs(10),
            ceiling: 20,
            idle_eviction: Duration::from_secs(3600),
        }
    }
}

/// 单次判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamVerdict {
    /// 是否准入
    pub admit: bool,
    /// 是否标记为刷屏（只可能在拒绝时为 true）
    pub flagged: bool,
    /// 判定后的刷屏分
    pub score: u32,
}

#[derive(Debug)]
struct SpamScore {
    value: u32,
    /// 衰减起点：分数从 0 开始增长的时刻，之后按整周期推进
    decay_anchor: Instant,
    last_seen: Instant,
}

impl SpamScore {
    fn new(now: Instant) -> Self {
        Self {
            value: 0,
            decay_anchor: now,
            last_seen: now,
        }
    }

    /// 惰性衰减
    fn decay(&mut self, now: Instant, config: &SpamGuardConfig) {
        if self.value == 0 {
            self.decay_anchor = now;
            return;
        }
        if config.decay_amount == 0 || config.decay_interval.is_zero() {
            return;
        }

        let elapsed = now.saturating_duration_since(self.decay_anchor);
        let periods = (elapsed.as_nanos() / config.decay_interval.as_nanos()) as u64;
        if periods == 0 {
            return;
        }

        let reduction = periods.saturating_mul(config.decay_amount as u64);
        self.value = (self.value as u64).saturating_sub(reduction) as u32;

        if self.value == 0 {
            self.decay_anchor = now;
        } else {
            // periods 受 value 限制，不会溢出 u32
            self.decay_anchor += config.decay_interval * periods as u32;
        }
    }

    fn bump(&mut self, ceiling: u32) {
        self.value = self.value.saturating_add(1).min(ceiling);
    }
}

/// 反刷屏守卫
pub struct AntiSpamGuard {
    config: SpamGuardConfig,
    limiter: SlidingWindowLimiter,
    scores: DashMap<Identity, Arc<Mutex<SpamScore>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl AntiSpamGuard {
    pub fn new(limiter: SlidingWindowLimiter, config: SpamGuardConfig) -> Self {
        Self {
            config,
            limiter,
            scores: DashMap::new(),
            event_bus: None,
        }
    }

    /// 标记事件发布到事件总线
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &SpamGuardConfig {
        &self.config
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// 判定一次请求
    pub fn evaluate(&self, identity: Identity, now: Instant) -> SpamVerdict {
        let entry = self.score_for(identity, now);
        let mut score = entry.lock();

        if now > score.last_seen {
            score.last_seen = now;
        }
        score.decay(now, &self.config);

        if self.limiter.admit(identity, now) {
            return SpamVerdict {
                admit: true,
                flagged: false,
                score: score.value,
            };
        }

        score.bump(self.config.ceiling);
        let flagged = score.value >= self.config.threshold;
        let value = score.value;
        drop(score);

        if flagged {
            warn!("🚨 用户 {} 刷屏分 {} 达到阈值 {}，已标记", identity, value, self.config.threshold);
            if let Some(bus) = &self.event_bus {
                bus.publish(PresenceEvent::SpamFlagged {
                    identity,
                    score: value,
                    timestamp: Utc::now(),
                });
            }
        } else {
            debug!("用户 {} 请求被拒绝，刷屏分 {}", identity, value);
        }

        SpamVerdict {
            admit: false,
            flagged,
            score: value,
        }
    }

    /// 当前刷屏分（应用衰减后）
    pub fn score(&self, identity: Identity, now: Instant) -> u32 {
        match self.scores.get(&identity) {
            Some(entry) => {
                let entry = entry.value().clone();
                let mut score = entry.lock();
                score.decay(now, &self.config);
                score.value
            }
            None => 0,
        }
    }

    /// 回收空闲用户（限流窗口与刷屏分），返回回收的限流窗口数
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle = self.config.idle_eviction;
        let mut scores_evicted = 0;

        self.scores.retain(|_, entry| {
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let keep = now.saturating_duration_since(entry.lock().last_seen) < idle;
            if !keep {
                scores_evicted += 1;
            }
            keep
        });

        let windows_evicted = self.limiter.evict_idle(now);
        if windows_evicted > 0 || scores_evicted > 0 {
            debug!(
                "回收空闲用户：限流窗口 {} 个，刷屏分 {} 个",
                windows_evicted, scores_evicted
            );
        }
        windows_evicted
    }

    /// 当前跟踪的用户数
    pub fn tracked_identities(&self) -> usize {
        self.limiter.tracked_identities()
    }

    /// 启动空闲回收任务
    pub fn spawn_eviction_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let guard = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            info!("🧹 Identity eviction sweeper started (every {:?})", every);

            loop {
                interval.tick().await;

                let evicted = guard.evict_idle(Instant::now());
                metrics::record_identities_evicted(evicted);
                metrics::record_tracked_identities(guard.tracked_identities());

                if evicted > 0 {
                    info!("🧹 Evicted {} idle identities", evicted);
                }
            }
        })
    }

    fn score_for(&self, identity: Identity, now: Instant) -> Arc<Mutex<SpamScore>> {
        if let Some(existing) = self.scores.get(&identity) {
            return existing.value().clone();
        }

        self.scores
            .entry(identity)
            .or_insert_with(|| Arc::new(Mutex::new(SpamScore::new(now))))
            .value()
            .clone()
    }
}

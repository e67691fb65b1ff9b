/// 滑动窗口速率限制器
///
/// 核心特性：
/// 1. 每个用户一个独立窗口，只记录被准入请求的时间戳
/// 2. 按用户加锁：不同用户互不阻塞，同一用户的 check-and-append 原子执行
/// 3. 窗口内条目数永远不超过 cap，过期条目在每次检查时惰性淘汰
/// 4. 长时间无请求的用户由 `evict_idle` 回收，避免内存无限增长

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::Identity;

/// 限流配置
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 滑动窗口长度
    pub window: Duration,
    /// 每个窗口允许的请求数（必须 >= 1，保证首次请求总能通过）
    pub max_events: usize,
    /// 空闲多久后回收用户状态
    pub idle_eviction: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 每分钟 5 次
            window: Duration::from_secs(60),
            max_events: 5,
            // 1 小时无请求则回收
            idle_eviction: Duration::from_secs(3600),
        }
    }
}

/// 单个用户的请求窗口
#[derive(Debug)]
struct RateWindow {
    /// 已准入请求的时间戳（从旧到新）
    timestamps: VecDeque<Instant>,
    /// 最近一次请求时间（无论是否准入）
    last_seen: Instant,
}

impl RateWindow {
    fn new(now: Instant, capacity: usize) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(capacity),
            last_seen: now,
        }
    }

    /// 淘汰 `now - window` 及更早的时间戳，窗口为 (now - window, now]
    fn expire(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

/// 滑动窗口限流器
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    windows: DashMap<Identity, Arc<Mutex<RateWindow>>>,
}

impl SlidingWindowLimiter {
    pub fn new(mut config: RateLimitConfig) -> Self {
        if config.max_events == 0 {
            warn!("⚠️ Rate limit cap 0 would reject every first request, using 1");
            config.max_events = 1;
        }
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// 检查并记录一次请求
    ///
    /// 窗口内请求数低于上限时准入并追加 `now`；否则返回 false，窗口不变。
    pub fn admit(&self, identity: Identity, now: Instant) -> bool {
        let entry = self.window_for(identity, now);
        let mut window = entry.lock();

        window.touch(now);
        window.expire(now, self.config.window);

        if window.timestamps.len() < self.config.max_events {
            window.timestamps.push_back(now);
            true
        } else {
            debug!(
                "⏱️ User {} rate limited: {}/{} in {:?}",
                identity,
                window.timestamps.len(),
                self.config.max_events,
                self.config.window
            );
            false
        }
    }

    /// 距离下一次可以准入还要等多久；现在就能准入时返回 None
    pub fn retry_after(&self, identity: Identity, now: Instant) -> Option<Duration> {
        let entry = self.windows.get(&identity)?.value().clone();
        let mut window = entry.lock();
        window.expire(now, self.config.window);

        if window.timestamps.len() < self.config.max_events {
            return None;
        }

        window
            .timestamps
            .front()
            .map(|oldest| self.config.window.saturating_sub(now.saturating_duration_since(*oldest)))
    }

    /// 当前窗口内的请求数
    pub fn in_window(&self, identity: Identity, now: Instant) -> usize {
        match self.windows.get(&identity) {
            Some(entry) => {
                let entry = entry.value().clone();
                let mut window = entry.lock();
                window.expire(now, self.config.window);
                window.timestamps.len()
            }
            None => 0,
        }
    }

    /// 回收空闲用户，返回回收数量
    ///
    /// 正被其他调用持有的条目不会回收
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle = self.config.idle_eviction;
        let mut evicted = 0;

        self.windows.retain(|_, entry| {
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let keep = now.saturating_duration_since(entry.lock().last_seen) < idle;
            if !keep {
                evicted += 1;
            }
            keep
        });

        evicted
    }

    /// 当前跟踪的用户数
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    /// 获取（或惰性创建）用户窗口；分片锁只在查找期间持有
    fn window_for(&self, identity: Identity, now: Instant) -> Arc<Mutex<RateWindow>> {
        if let Some(existing) = self.windows.get(&identity) {
            return existing.value().clone();
        }

        self.windows
            .entry(identity)
            .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(now, self.config.max_events))))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn limiter(window_secs: u64, cap: usize) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitConfig {
            window: Duration::from_secs(window_secs),
            max_events: cap,
            idle_eviction: Duration::from_secs(300),
        })
    }

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn test_zero_cap_still_admits_first_request() {
        let limiter = limiter(60, 0);
        let t0 = Instant::now();

        assert_eq!(limiter.config().max_events, 1);
        assert!(limiter.admit(Identity(1), t0));
        assert!(!limiter.admit(Identity(1), at(t0, 1)));
    }

    #[test]
    fn test_window_scenario() {
        // window=60s, cap=3
        let limiter = limiter(60, 3);
        let user = Identity(1001);
        let t0 = Instant::now();

        assert!(limiter.admit(user, at(t0, 0)));
        assert!(limiter.admit(user, at(t0, 10)));
        assert!(limiter.admit(user, at(t0, 20)));
        assert!(!limiter.admit(user, at(t0, 30)));
        // t=0 已过期
        assert!(limiter.admit(user, at(t0, 65)));
    }

    #[test]
    fn test_cold_start_admits() {
        let limiter = limiter(60, 1);
        let t0 = Instant::now();
        for id in 0..50 {
            assert!(limiter.admit(Identity(id), t0));
        }
    }

    #[test]
    fn test_rejection_does_not_mutate_window() {
        let limiter = limiter(60, 2);
        let user = Identity(7);
        let t0 = Instant::now();

        assert!(limiter.admit(user, at(t0, 0)));
        assert!(limiter.admit(user, at(t0, 1)));
        for s in 2..30 {
            assert!(!limiter.admit(user, at(t0, s)));
        }
        assert_eq!(limiter.in_window(user, at(t0, 30)), 2);
        // 被拒绝的请求不占窗口，t=60 时 t=0 过期即可再准入
        assert!(limiter.admit(user, at(t0, 60)));
    }

    #[test]
    fn test_cap_never_exceeded_in_any_window() {
        let window = 10;
        let cap = 4;
        let limiter = limiter(window, cap);
        let user = Identity(9);
        let t0 = Instant::now();

        let mut admitted = Vec::new();
        for ms in (0..60_000u64).step_by(250) {
            let now = t0 + Duration::from_millis(ms);
            if limiter.admit(user, now) {
                admitted.push(ms);
            }
        }

        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| **t < start + window * 1000)
                .count();
            assert!(in_window <= cap, "window starting at {}ms holds {}", start, in_window);
        }
    }

    #[test]
    fn test_retry_after() {
        let limiter = limiter(60, 1);
        let user = Identity(5);
        let t0 = Instant::now();

        assert_eq!(limiter.retry_after(user, t0), None);
        assert!(limiter.admit(user, t0));
        assert_eq!(limiter.retry_after(user, at(t0, 15)), Some(Duration::from_secs(45)));
        assert_eq!(limiter.retry_after(user, at(t0, 60)), None);
    }

    #[test]
    fn test_evict_idle() {
        let limiter = limiter(60, 3);
        let t0 = Instant::now();

        limiter.admit(Identity(1), t0);
        limiter.admit(Identity(2), at(t0, 200));
        assert_eq!(limiter.tracked_identities(), 2);

        // idle_eviction = 300s
        assert_eq!(limiter.evict_idle(at(t0, 310)), 1);
        assert_eq!(limiter.tracked_identities(), 1);
        assert_eq!(limiter.in_window(Identity(1), at(t0, 310)), 0);
    }

    #[test]
    fn test_same_identity_concurrent_admission() {
        let limiter = Arc::new(limiter(60, 5));
        let now = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || (0..10).filter(|_| limiter.admit(Identity(1), now)).count())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter(60, 1);
        let t0 = Instant::now();

        assert!(limiter.admit(Identity(1), t0));
        assert!(!limiter.admit(Identity(1), t0));
        assert!(limiter.admit(Identity(2), t0));
    }
}

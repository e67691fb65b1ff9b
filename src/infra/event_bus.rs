use tokio::sync::broadcast;
use tracing::trace;
use crate::domain::events::PresenceEvent;

/// In-process Event Bus（进程内事件总线）
///
/// 使用 tokio::sync::broadcast，订阅者落后太多时会收到 Lagged
pub struct EventBus {
    sender: broadcast::Sender<PresenceEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件，返回收到事件的订阅者数量
    ///
    /// 没有订阅者不算错误：事件只是状态变化的旁路通知
    pub fn publish(&self, event: PresenceEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("event bus has no subscribers, event dropped");
                0
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identity;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let delivered = bus.publish(PresenceEvent::SpamFlagged {
            identity: Identity(1),
            score: 5,
            timestamp: Utc::now(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(PresenceEvent::SpamFlagged {
            identity: Identity(42),
            score: 7,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            PresenceEvent::SpamFlagged { identity, score, .. } => {
                assert_eq!(identity, Identity(42));
                assert_eq!(score, 7);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

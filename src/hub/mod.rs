use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

pub type ConnId = u64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    DriverLocation {
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
    },
    Error {
        code: i32,
        msg: String,
    },
}

/// 进程级连接注册表：trip_id -> 订阅连接集合。
/// 随服务进程存活，通过 AppState 注入。
pub struct LocationHub {
    next_id: AtomicU64,
    trips: Mutex<HashMap<String, Vec<(ConnId, UnboundedSender<StreamEvent>)>>>,
}

impl LocationHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            trips: Mutex::new(HashMap::new()),
        }
    }

    /// 注册订阅，返回连接ID与该连接的事件接收端
    pub fn subscribe(&self, trip_id: &str) -> (ConnId, UnboundedReceiver<StreamEvent>) {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        let mut trips = self.trips.lock().expect("hub lock poisoned");
        trips
            .entry(trip_id.to_string())
            .or_default()
            .push((conn_id, tx));
        (conn_id, rx)
    }

    /// 注销订阅；该行程再无订阅者时移除整个条目
    pub fn unsubscribe(&self, trip_id: &str, conn_id: ConnId) {
        let mut trips = self.trips.lock().expect("hub lock poisoned");
        if let Some(subscribers) = trips.get_mut(trip_id) {
            subscribers.retain(|(id, _)| *id != conn_id);
            if subscribers.is_empty() {
                trips.remove(trip_id);
            }
        }
    }

    /// 向行程的所有订阅者扇出事件，返回成功投递数。
    /// 单个订阅者投递失败不影响其余订阅者。
    pub fn broadcast(&self, trip_id: &str, event: StreamEvent) -> usize {
        let trips = self.trips.lock().expect("hub lock poisoned");
        let Some(subscribers) = trips.get(trip_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, tx) in subscribers {
            match tx.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::debug!("Dropping event for dead subscriber {}", conn_id);
                }
            }
        }
        delivered
    }

    /// 仅发送给指定连接（用于否定应答）
    pub fn send_to(&self, trip_id: &str, conn_id: ConnId, event: StreamEvent) {
        let trips = self.trips.lock().expect("hub lock poisoned");
        if let Some(subscribers) = trips.get(trip_id) {
            if let Some((_, tx)) = subscribers.iter().find(|(id, _)| *id == conn_id) {
                let _ = tx.send(event);
            }
        }
    }

    pub fn subscriber_count(&self, trip_id: &str) -> usize {
        let trips = self.trips.lock().expect("hub lock poisoned");
        trips.get(trip_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for LocationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(lat: f64, lon: f64) -> StreamEvent {
        StreamEvent::DriverLocation {
            lat,
            lon,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let hub = LocationHub::new();
        let (_a, mut rx_a) = hub.subscribe("trip-1");
        let (_b, mut rx_b) = hub.subscribe("trip-1");

        let delivered = hub.broadcast("trip-1", location(43.0, 131.9));
        assert_eq!(delivered, 2);

        assert!(matches!(
            rx_a.recv().await,
            Some(StreamEvent::DriverLocation { .. })
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(StreamEvent::DriverLocation { .. })
        ));
    }

    #[tokio::test]
    async fn unsubscribed_connection_receives_nothing() {
        let hub = LocationHub::new();
        let (conn_a, mut rx_a) = hub.subscribe("trip-1");
        let (_b, _rx_b) = hub.subscribe("trip-1");

        hub.unsubscribe("trip-1", conn_a);
        hub.broadcast("trip-1", location(43.0, 131.9));

        // 发送端已被移除，通道立即关闭
        assert!(rx_a.recv().await.is_none());
    }

    #[tokio::test]
    async fn empty_trip_entry_is_pruned() {
        let hub = LocationHub::new();
        let (conn_a, _rx) = hub.subscribe("trip-1");
        assert_eq!(hub.subscriber_count("trip-1"), 1);

        hub.unsubscribe("trip-1", conn_a);
        assert_eq!(hub.subscriber_count("trip-1"), 0);
        assert!(hub.trips.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_noop() {
        let hub = LocationHub::new();
        assert_eq!(hub.broadcast("trip-404", location(43.0, 131.9)), 0);
    }

    #[tokio::test]
    async fn dead_subscriber_does_not_block_others() {
        let hub = LocationHub::new();
        let (_a, rx_a) = hub.subscribe("trip-1");
        let (_b, mut rx_b) = hub.subscribe("trip-1");

        // 接收端先被丢弃，模拟已断开但尚未注销的连接
        drop(rx_a);

        let delivered = hub.broadcast("trip-1", location(43.0, 131.9));
        assert_eq!(delivered, 1);
        assert!(matches!(
            rx_b.recv().await,
            Some(StreamEvent::DriverLocation { .. })
        ));
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let hub = LocationHub::new();
        let (_a, mut rx) = hub.subscribe("trip-1");

        hub.broadcast("trip-1", location(1.0, 1.0));
        hub.broadcast("trip-1", location(2.0, 2.0));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (
                StreamEvent::DriverLocation { lat: a, .. },
                StreamEvent::DriverLocation { lat: b, .. },
            ) => {
                assert_eq!(a, 1.0);
                assert_eq!(b, 2.0);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}

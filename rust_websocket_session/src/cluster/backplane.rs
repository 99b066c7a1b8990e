// rust_websocket_session/src/cluster/backplane.rs

//! 发布/订阅背板。
//!
//! 背板只负责“按主题发布字节、按主题订阅字节流”，不提供持久化或重投：
//! 订阅方暂时断开期间发布的消息会被错过。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{broadcast, mpsc};

use crate::error::WsError;

/// 订阅流与主题通道的默认容量。
pub const DEFAULT_BACKPLANE_BUFFER: usize = 1024;

#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), WsError>;

    /// 订阅主题，之后发布到该主题的每条消息（包括自己发布的）都会出现在返回的流里。
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, WsError>;
}

/// 进程内背板：每个主题一个 tokio broadcast 通道，用于在单个进程里模拟多节点。
pub struct MemoryBackplane {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new(DEFAULT_BACKPLANE_BUFFER)
    }
}

impl MemoryBackplane {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn topic(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), WsError> {
        // 没有订阅者时消息直接丢弃
        let receivers = self.topic(topic).send(payload).unwrap_or(0);
        debug!("[背板] 主题 {} 的消息投递给 {} 个订阅者", topic, receivers);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, WsError> {
        let mut rx = self.topic(topic).subscribe();
        let (tx, out) = mpsc::channel(self.capacity);
        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[背板] 主题 {} 的订阅者落后，丢失了 {} 条消息", topic, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("[背板] 主题 {} 的订阅已结束", topic);
        });
        Ok(out)
    }
}

#[cfg(feature = "redis")]
pub use self::redis_pubsub::RedisBackplane;

#[cfg(feature = "redis")]
mod redis_pubsub {
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use log::{debug, info, warn};
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;
    use tokio::sync::mpsc;

    use super::{Backplane, DEFAULT_BACKPLANE_BUFFER};
    use crate::error::WsError;

    const BROADCAST_CHANNEL_PREFIX: &str = "ws-session:broadcast";

    /// 基于 Redis Pub/Sub 的背板。发布走共享的 `ConnectionManager`，每个订阅独占一条连接。
    pub struct RedisBackplane {
        client: redis::Client,
        publisher: ConnectionManager,
    }

    impl RedisBackplane {
        pub async fn connect(url: &str) -> Result<Self, WsError> {
            let client = redis::Client::open(url)?;
            let publisher = ConnectionManager::new(client.clone()).await?;
            info!("[背板] 已连接到 Redis: {}", url);
            Ok(Self { client, publisher })
        }

        fn channel(topic: &str) -> String {
            format!("{}:{}", BROADCAST_CHANNEL_PREFIX, topic)
        }
    }

    #[async_trait]
    impl Backplane for RedisBackplane {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), WsError> {
            let mut conn = self.publisher.clone();
            let receivers: i64 = conn.publish(Self::channel(topic), payload).await?;
            debug!("[背板] Redis 频道 {} 有 {} 个订阅者收到消息", Self::channel(topic), receivers);
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, WsError> {
            let channel = Self::channel(topic);
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(&channel).await?;
            info!("[背板] 已订阅 Redis 频道 {}", channel);

            let (tx, out) = mpsc::channel(DEFAULT_BACKPLANE_BUFFER);
            tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                while let Some(msg) = messages.next().await {
                    if tx.send(msg.get_payload_bytes().to_vec()).await.is_err() {
                        break;
                    }
                }
                warn!("[背板] Redis 频道 {} 的订阅已结束", channel);
            });
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_publish() {
        let backplane = MemoryBackplane::default();
        let mut first = backplane.subscribe("room").await.unwrap();
        let mut second = backplane.subscribe("room").await.unwrap();
        let mut other = backplane.subscribe("other").await.unwrap();

        backplane.publish("room", b"hello".to_vec()).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(second.recv().await.unwrap(), b"hello".to_vec());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let backplane = MemoryBackplane::default();
        assert!(backplane.publish("nobody", vec![1, 2, 3]).await.is_ok());
    }
}

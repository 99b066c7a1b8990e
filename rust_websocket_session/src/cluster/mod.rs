// rust_websocket_session/src/cluster/mod.rs

//! 会话集群：有容量上限、有生命周期上限的 `ServerSession` 注册表。
//!
//! - `LocalSessionCluster`：进程内注册表，广播直接遍历本地会话；
//! - `DistributedSessionCluster`：同样的注册表语义，但广播经由发布/订阅背板中转，
//!   对订阅同一主题的所有进程可见。
//!
//! 两种实现共享 `registry::SessionRegistry`：增删与驱逐都在同一把锁内完成，
//! 广播与 `all` 只读取快照，不在扇出期间持锁。

pub mod backplane;
pub mod distributed;
pub mod local;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use log::warn;
use tokio::sync::watch;
use uuid::Uuid;

use crate::converter::WsData;
use crate::error::WsError;
use crate::server::ServerSession;

pub use backplane::{Backplane, MemoryBackplane};
pub use distributed::DistributedSessionCluster;
pub use local::LocalSessionCluster;

/// 广播时用于挑选目标会话的过滤器。
pub type SessionFilter<U, D> = Arc<dyn Fn(&ServerSession<U, D>) -> bool + Send + Sync>;

/// 接受所有会话的过滤器。
pub fn accept_all<U, D>() -> SessionFilter<U, D> {
    Arc::new(|_| true)
}

/// 集群配置。
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub max_connection: usize,
    pub max_lifetime: Duration,
    pub watchdog_interval: Duration,
    /// 看门狗每次抽样的比例（相对 `max_connection`）。
    pub sample_fraction: f64,
    /// 看门狗每次抽样的最小数量。
    pub min_sample: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_connection: 10_000,
            max_lifetime: Duration::from_secs(300),
            watchdog_interval: Duration::from_secs(120),
            sample_fraction: 0.1,
            min_sample: 100,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), WsError> {
        if self.max_connection == 0 {
            return Err(WsError::InvalidConfig("max_connection 必须大于 0".to_string()));
        }
        if self.max_lifetime.is_zero() {
            return Err(WsError::InvalidConfig("max_lifetime 必须大于 0".to_string()));
        }
        if self.watchdog_interval.is_zero() {
            return Err(WsError::InvalidConfig("watchdog_interval 必须大于 0".to_string()));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(WsError::InvalidConfig(format!(
                "sample_fraction 必须在 (0, 1] 之间，当前为 {}",
                self.sample_fraction
            )));
        }
        Ok(())
    }

    /// 看门狗每次抽样的会话数：`max(max_connection * sample_fraction, min_sample)`。
    pub fn sample_size(&self) -> usize {
        let fraction = (self.max_connection as f64 * self.sample_fraction).ceil() as usize;
        fraction.max(self.min_sample).max(1)
    }
}

/// 会话集群的公共契约。
#[async_trait]
pub trait SessionCluster<U: WsData, D: WsData>: Send + Sync {
    /// 注册会话。已达到 `max_connection` 时返回 `WsError::ConnectionLimit`。
    async fn add(&self, id: Uuid, session: Arc<ServerSession<U, D>>) -> Result<(), WsError>;

    /// 关闭并移除会话。关闭失败不影响移除。
    async fn remove(&self, id: Uuid);

    async fn remove_range(&self, ids: &[Uuid]);

    async fn get(&self, id: Uuid) -> Option<Arc<ServerSession<U, D>>>;

    /// 当前所有会话的快照。
    async fn all(&self) -> Vec<Arc<ServerSession<U, D>>>;

    async fn len(&self) -> usize;

    /// 全量扫描并移除所有超过 `max_lifetime` 的会话，返回移除的数量。
    async fn enforce_timeout(&self) -> usize;

    /// 向通过 `filter` 的会话广播。单个会话发送失败不影响其他会话，也不会返回给调用方。
    async fn broadcast(&self, data: D, filter: SessionFilter<U, D>) -> Result<(), WsError>;

    async fn broadcast_all(&self, data: D) -> Result<(), WsError> {
        self.broadcast(data, accept_all()).await
    }

    /// 订阅会话列表的变化。
    fn watch_sessions(&self) -> watch::Receiver<Vec<Arc<ServerSession<U, D>>>>;
}

/// 并发地把 `data` 发送给每个会话，返回没有出错的会话数。
pub async fn broadcast_to<U: WsData, D: WsData>(
    sessions: &[Arc<ServerSession<U, D>>],
    data: &D,
) -> usize {
    let sends = sessions.iter().map(|session| async move {
        match session.send(data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[会话集群] 向会话 {} 广播失败: {}", session.id(), e);
                false
            }
        }
    });
    join_all(sends).await.into_iter().filter(|ok| *ok).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClusterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_size(), 1000);
    }

    #[test]
    fn sample_size_has_a_floor() {
        let config = ClusterConfig {
            max_connection: 50,
            ..ClusterConfig::default()
        };
        assert_eq!(config.sample_size(), 100);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let zero_capacity = ClusterConfig {
            max_connection: 0,
            ..ClusterConfig::default()
        };
        assert!(zero_capacity.validate().is_err());

        let bad_fraction = ClusterConfig {
            sample_fraction: 1.5,
            ..ClusterConfig::default()
        };
        assert!(matches!(bad_fraction.validate(), Err(WsError::InvalidConfig(_))));

        let zero_interval = ClusterConfig {
            watchdog_interval: Duration::ZERO,
            ..ClusterConfig::default()
        };
        assert!(zero_interval.validate().is_err());
    }
}

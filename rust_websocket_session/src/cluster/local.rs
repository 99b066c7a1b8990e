// rust_websocket_session/src/cluster/local.rs

//! 进程内会话集群。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::registry::{SessionRegistry, spawn_watchdog};
use super::{ClusterConfig, SessionCluster, SessionFilter, broadcast_to};
use crate::converter::WsData;
use crate::error::WsError;
use crate::server::ServerSession;

/// 进程内会话集群。被丢弃时看门狗随之停止。
pub struct LocalSessionCluster<U, D> {
    registry: Arc<SessionRegistry<U, D>>,
    _watchdog: DropGuard,
}

impl<U: WsData, D: WsData> LocalSessionCluster<U, D> {
    /// 校验配置并启动看门狗。必须在 Tokio 运行时中调用。
    pub fn new(config: ClusterConfig) -> Result<Self, WsError> {
        config.validate()?;
        let registry = Arc::new(SessionRegistry::new(config));
        let token = CancellationToken::new();
        spawn_watchdog(Arc::clone(&registry), token.clone());
        Ok(Self {
            registry,
            _watchdog: token.drop_guard(),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        self.registry.config()
    }

    /// 立即执行一次看门狗抽样检查，返回驱逐的会话数。
    pub async fn watchdog_tick(&self) -> usize {
        self.registry.watchdog_tick().await
    }
}

#[async_trait]
impl<U: WsData, D: WsData> SessionCluster<U, D> for LocalSessionCluster<U, D> {
    async fn add(&self, id: Uuid, session: Arc<ServerSession<U, D>>) -> Result<(), WsError> {
        self.registry.add(id, session).await
    }

    async fn remove(&self, id: Uuid) {
        self.registry.remove(&[id]).await
    }

    async fn remove_range(&self, ids: &[Uuid]) {
        self.registry.remove(ids).await
    }

    async fn get(&self, id: Uuid) -> Option<Arc<ServerSession<U, D>>> {
        self.registry.get(id).await
    }

    async fn all(&self) -> Vec<Arc<ServerSession<U, D>>> {
        self.registry.all().await
    }

    async fn len(&self) -> usize {
        self.registry.len().await
    }

    async fn enforce_timeout(&self) -> usize {
        self.registry.enforce_timeout().await
    }

    async fn broadcast(&self, data: D, filter: SessionFilter<U, D>) -> Result<(), WsError> {
        let targets: Vec<_> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|session| filter(session.as_ref()))
            .collect();
        broadcast_to(&targets, &data).await;
        Ok(())
    }

    fn watch_sessions(&self) -> watch::Receiver<Vec<Arc<ServerSession<U, D>>>> {
        self.registry.watch()
    }
}

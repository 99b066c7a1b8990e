// rust_websocket_session/src/cluster/distributed.rs

//! 分布式会话集群。
//!
//! 注册表语义与本地集群完全相同；`broadcast` 不直接遍历本地会话，而是把载荷装入
//! `BroadcastEnvelope` 发布到背板主题。每个进程的中继任务订阅同一主题，收到的每条广播
//! （包括自己发布的）都通过本地广播原语转发给本进程内的会话。
//!
//! 单次调用传入的过滤器无法经过背板传递，各节点在投递时使用构造时给定的集群级过滤器。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::backplane::Backplane;
use super::registry::{SessionRegistry, spawn_watchdog};
use super::{ClusterConfig, SessionCluster, SessionFilter, accept_all, broadcast_to};
use crate::converter::WsData;
use crate::error::WsError;
use crate::message::BroadcastEnvelope;
use crate::server::ServerSession;

pub struct DistributedSessionCluster<U, D> {
    registry: Arc<SessionRegistry<U, D>>,
    backplane: Arc<dyn Backplane>,
    topic: String,
    node_id: Uuid,
    _tasks: DropGuard,
}

impl<U: WsData, D: WsData> DistributedSessionCluster<U, D> {
    /// 校验配置、订阅背板主题，并启动看门狗与中继任务。
    ///
    /// `broadcast_filter` 决定本节点把中继来的广播投递给哪些本地会话，缺省为全部。
    pub async fn new(
        config: ClusterConfig,
        backplane: Arc<dyn Backplane>,
        topic: impl Into<String>,
        broadcast_filter: Option<SessionFilter<U, D>>,
    ) -> Result<Self, WsError> {
        config.validate()?;
        let topic = topic.into();
        let node_id = Uuid::new_v4();
        let subscription = backplane.subscribe(&topic).await?;

        let registry = Arc::new(SessionRegistry::new(config));
        let token = CancellationToken::new();
        spawn_watchdog(Arc::clone(&registry), token.clone());
        tokio::spawn(relay(
            Arc::clone(&registry),
            Arc::clone(&backplane),
            topic.clone(),
            subscription,
            broadcast_filter.unwrap_or_else(accept_all),
            node_id,
            token.clone(),
        ));
        info!("[会话集群] 分布式集群节点 {} 已加入主题 {}", node_id, topic);

        Ok(Self {
            registry,
            backplane,
            topic,
            node_id,
            _tasks: token.drop_guard(),
        })
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &ClusterConfig {
        self.registry.config()
    }

    /// 立即执行一次看门狗抽样检查，返回驱逐的会话数。
    pub async fn watchdog_tick(&self) -> usize {
        self.registry.watchdog_tick().await
    }
}

/// 背板订阅中断后重新订阅的首次等待时间，之后每次翻倍。
const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

/// 订阅流结束后按退避间隔重新订阅，直到成功或 `token` 被取消。
async fn resubscribe(
    backplane: &dyn Backplane,
    topic: &str,
    node_id: Uuid,
    token: &CancellationToken,
) -> Option<mpsc::Receiver<Vec<u8>>> {
    let mut delay = RESUBSCRIBE_INITIAL_DELAY;
    loop {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        match backplane.subscribe(topic).await {
            Ok(subscription) => {
                info!("[背板] 节点 {} 已重新订阅主题 {}", node_id, topic);
                return Some(subscription);
            }
            Err(e) => {
                warn!("[背板] 节点 {} 重新订阅主题 {} 失败: {}，{:?} 后重试", node_id, topic, e, delay);
                delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
            }
        }
    }
}

async fn relay<U: WsData, D: WsData>(
    registry: Arc<SessionRegistry<U, D>>,
    backplane: Arc<dyn Backplane>,
    topic: String,
    mut subscription: mpsc::Receiver<Vec<u8>>,
    filter: SessionFilter<U, D>,
    node_id: Uuid,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = subscription.recv() => next,
        };
        let Some(bytes) = next else {
            // 断开期间发布的广播会被错过
            warn!("[背板] 节点 {} 的背板订阅已中断，准备重新订阅", node_id);
            match resubscribe(backplane.as_ref(), &topic, node_id, &token).await {
                Some(resubscribed) => {
                    subscription = resubscribed;
                    continue;
                }
                None => break,
            }
        };
        let envelope = match BroadcastEnvelope::from_bytes(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[背板] 忽略无法解析的广播信封: {}", e);
                continue;
            }
        };
        let data: D = match envelope.deserialize_payload() {
            Ok(data) => data,
            Err(e) => {
                warn!("[背板] 广播 {} 的载荷无法解码: {}", envelope.message_id, e);
                continue;
            }
        };
        let targets: Vec<_> = registry
            .all()
            .await
            .into_iter()
            .filter(|session| filter(session.as_ref()))
            .collect();
        let delivered = broadcast_to(&targets, &data).await;
        let origin = if envelope.is_from(node_id) { "本节点" } else { envelope.node_id.as_str() };
        debug!(
            "[背板] 节点 {} 中继广播 {} (来自 {})，投递给 {}/{} 个本地会话",
            node_id,
            envelope.message_id,
            origin,
            delivered,
            targets.len()
        );
    }
}

#[async_trait]
impl<U: WsData, D: WsData> SessionCluster<U, D> for DistributedSessionCluster<U, D> {
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

    /// 发布到背板；`_filter` 不会被使用，投递时使用集群级过滤器。
    async fn broadcast(&self, data: D, _filter: SessionFilter<U, D>) -> Result<(), WsError> {
        let envelope = BroadcastEnvelope::new(self.node_id, &data)?;
        self.backplane
            .publish(&self.topic, envelope.to_bytes()?)
            .await?;
        debug!("[背板] 节点 {} 发布广播 {}", self.node_id, envelope.message_id);
        Ok(())
    }

    fn watch_sessions(&self) -> watch::Receiver<Vec<Arc<ServerSession<U, D>>>> {
        self.registry.watch()
    }
}

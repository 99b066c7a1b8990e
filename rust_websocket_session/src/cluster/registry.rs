// rust_websocket_session/src/cluster/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, info, warn};
use rand::seq::IteratorRandom;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ClusterConfig;
use crate::converter::WsData;
use crate::error::WsError;
use crate::frame::{close_code, close_reason};
use crate::server::ServerSession;

type SessionMap<U, D> = HashMap<Uuid, Arc<ServerSession<U, D>>>;

/// 两种集群共享的注册表。
pub(crate) struct SessionRegistry<U, D> {
    config: ClusterConfig,
    sessions: Mutex<SessionMap<U, D>>,
    snapshot: watch::Sender<Vec<Arc<ServerSession<U, D>>>>,
}

impl<U: WsData, D: WsData> SessionRegistry<U, D> {
    pub(crate) fn new(config: ClusterConfig) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            snapshot,
        }
    }

    pub(crate) fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn publish(&self, sessions: &SessionMap<U, D>) {
        self.snapshot.send_replace(sessions.values().cloned().collect());
    }

    /// 注册会话。同一 id 已对应另一个会话时，旧会话被替换并在锁外关闭，
    /// 保证注册表之外不会留下仍然存活的会话。
    pub(crate) async fn add(&self, id: Uuid, session: Arc<ServerSession<U, D>>) -> Result<(), WsError> {
        let displaced = {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(&id) {
                if Arc::ptr_eq(existing, &session) {
                    debug!("[会话集群] 会话 {} 已注册，忽略重复添加", id);
                    return Ok(());
                }
            } else if sessions.len() >= self.config.max_connection {
                warn!(
                    "[会话集群] 连接数已达上限 {}，拒绝会话 {}",
                    self.config.max_connection, id
                );
                return Err(WsError::ConnectionLimit {
                    max: self.config.max_connection,
                });
            }
            let displaced = sessions.insert(id, session);
            info!("[会话集群] 会话 {} 已注册，当前会话数: {}", id, sessions.len());
            self.publish(&sessions);
            displaced
        };
        if let Some(old) = displaced {
            warn!("[会话集群] 会话 {} 已存在，关闭被替换的旧会话", id);
            old.close(close_code::NORMAL, close_reason::CLOSE_NORMALLY).await;
        }
        Ok(())
    }

    /// 在锁内摘除会话，在锁外关闭它们。
    pub(crate) async fn remove_with(&self, ids: &[Uuid], code: u16, reason: &str) -> usize {
        let removed: Vec<_> = {
            let mut sessions = self.sessions.lock().await;
            let removed: Vec<_> = ids.iter().filter_map(|id| sessions.remove(id)).collect();
            if !removed.is_empty() {
                self.publish(&sessions);
            }
            removed
        };
        close_all(&removed, code, reason).await;
        removed.len()
    }

    pub(crate) async fn remove(&self, ids: &[Uuid]) {
        let count = self
            .remove_with(ids, close_code::NORMAL, close_reason::CLOSE_NORMALLY)
            .await;
        if count > 0 {
            info!("[会话集群] 移除了 {} 个会话", count);
        }
    }

    pub(crate) async fn get(&self, id: Uuid) -> Option<Arc<ServerSession<U, D>>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub(crate) async fn all(&self) -> Vec<Arc<ServerSession<U, D>>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub(crate) async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Vec<Arc<ServerSession<U, D>>>> {
        self.snapshot.subscribe()
    }

    /// 全量扫描。
    pub(crate) async fn enforce_timeout(&self) -> usize {
        let expired: Vec<_> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, session)| session.is_expired(self.config.max_lifetime))
                .map(|(id, _)| *id)
                .collect();
            let expired: Vec<_> = ids.iter().filter_map(|id| sessions.remove(id)).collect();
            if !expired.is_empty() {
                self.publish(&sessions);
            }
            expired
        };
        self.close_expired(expired).await
    }

    /// 看门狗的一次抽样检查：随机抽取 `sample_size` 个会话，只驱逐其中已过期的。
    pub(crate) async fn watchdog_tick(&self) -> usize {
        let expired: Vec<_> = {
            let mut sessions = self.sessions.lock().await;
            let sample_size = self.config.sample_size().min(sessions.len());
            let sample: Vec<Uuid> = {
                let mut rng = rand::thread_rng();
                sessions.keys().copied().choose_multiple(&mut rng, sample_size)
            };
            let expired_ids: Vec<Uuid> = sample
                .into_iter()
                .filter(|id| {
                    sessions
                        .get(id)
                        .is_some_and(|session| session.is_expired(self.config.max_lifetime))
                })
                .collect();
            let expired: Vec<_> = expired_ids
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect();
            if !expired.is_empty() {
                self.publish(&sessions);
            }
            expired
        };
        self.close_expired(expired).await
    }

    async fn close_expired(&self, expired: Vec<Arc<ServerSession<U, D>>>) -> usize {
        if expired.is_empty() {
            return 0;
        }
        info!("[会话集群] 驱逐了 {} 个超过生命周期的会话", expired.len());
        close_all(&expired, close_code::GOING_AWAY, close_reason::SESSION_CLOSED_BY_SERVER).await;
        expired.len()
    }
}

async fn close_all<U: WsData, D: WsData>(sessions: &[Arc<ServerSession<U, D>>], code: u16, reason: &str) {
    join_all(sessions.iter().map(|session| session.close(code, reason))).await;
}

/// 启动看门狗，`token` 取消后退出。
pub(crate) fn spawn_watchdog<U: WsData, D: WsData>(
    registry: Arc<SessionRegistry<U, D>>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let period = registry.config().watchdog_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = registry.watchdog_tick().await;
                    debug!("[会话集群] 看门狗本轮驱逐 {} 个会话", evicted);
                }
            }
        }
        debug!("[会话集群] 看门狗已停止");
    });
}

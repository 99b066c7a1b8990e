// rust_websocket_session/src/server/accept.rs

use std::sync::Arc;

use log::{debug, warn};

use super::config::ServerConfig;
use super::session::ServerSession;
use crate::cluster::SessionCluster;
use crate::converter::WsData;
use crate::error::WsError;
use crate::frame::{close_code, close_reason};
use crate::transport::TransportSession;

/// 为一条被接受的连接创建会话并注册到集群。
///
/// 集群已满时以 1008 "connection limit exceeded" 关闭连接并返回 `ConnectionLimit`，
/// 此时不会触发任何回调。注册成功后启动会话，并在会话关闭后把它从集群中移除。
pub async fn accept_session<U: WsData, D: WsData>(
    config: &ServerConfig<U, D>,
    cluster: Arc<dyn SessionCluster<U, D>>,
    transport: TransportSession,
) -> Result<Arc<ServerSession<U, D>>, WsError> {
    let session = ServerSession::new(config, transport);
    let id = session.id();

    if let Err(e) = cluster.add(id, Arc::clone(&session)).await {
        warn!("[服务端会话] 会话 {} 注册失败，关闭连接: {}", id, e);
        session
            .reject(close_code::POLICY_VIOLATION, close_reason::CONNECTION_LIMIT_EXCEEDED)
            .await;
        return Err(e);
    }

    session.start();

    let watched = Arc::clone(&session);
    let cluster = Arc::downgrade(&cluster);
    tokio::spawn(async move {
        watched.closed().await;
        let Some(cluster) = cluster.upgrade() else {
            return;
        };
        // 同一 id 可能已被新会话替换，只移除自己
        match cluster.get(watched.id()).await {
            Some(current) if Arc::ptr_eq(&current, &watched) => {
                cluster.remove(watched.id()).await;
                debug!("[服务端会话] 已关闭的会话 {} 已从集群移除", watched.id());
            }
            _ => {}
        }
    });

    Ok(session)
}

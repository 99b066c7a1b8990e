use async_trait::async_trait;
use chat_sample::config;
use chat_sample::error::AppError;
use common_models::ws_payloads::{ChatMessage, ChatResponse};
use log::{LevelFilter, error, info, warn};
use rust_websocket_session::server::{ServerConfig, ServerHandler, ServerSession, ServerTransport, accept_session};
use rust_websocket_session::{ContentConverter, LocalSessionCluster, SessionCluster, TransportSession, WsError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

type ChatCluster = Arc<dyn SessionCluster<ChatMessage, ChatResponse>>;

/// 聊天室：把任意会话发来的消息转发给集群中的所有会话。
struct ChatRoom {
    cluster: ChatCluster,
}

#[async_trait]
impl ServerHandler<ChatMessage, ChatResponse> for ChatRoom {
    async fn on_connect(
        &self,
        session: Arc<ServerSession<ChatMessage, ChatResponse>>,
        mut messages: broadcast::Receiver<ChatMessage>,
    ) {
        info!("[聊天室] 会话 {} 加入 (连接时间: {})", session.id(), session.connected_at());
        loop {
            match messages.recv().await {
                Ok(message) => {
                    info!("[聊天室] 会话 {} 说: {}", session.id(), message.text);
                    if let Err(e) = self.cluster.broadcast_all(ChatResponse::from(message)).await {
                        warn!("[聊天室] 广播失败: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[聊天室] 会话 {} 的消息处理落后，跳过 {} 条", session.id(), skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_closed(&self, session_id: Uuid, code: u16, reason: &str) {
        info!("[聊天室] 会话 {} 离开: {} ({})", session_id, code, reason);
    }

    async fn on_error(&self, session_id: Uuid, error: &WsError) {
        warn!("[聊天室] 会话 {} 出错: {}", session_id, error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化 (env_logger)，默认级别: Info。");

    config::init_config();
    let app_config = config::get_config();
    let addr = app_config.websocket.socket_addr()?;

    let cluster: ChatCluster = Arc::new(
        LocalSessionCluster::new(app_config.cluster.to_cluster_config()).map_err(AppError::from)?,
    );
    info!("[主程序] 本地会话集群已创建，最大连接数: {}", app_config.cluster.max_connection);

    let mut server_config = ServerConfig::new(ContentConverter::bincode())
        .with_handler(Arc::new(ChatRoom {
            cluster: Arc::clone(&cluster),
        }))
        .with_liveness_interval(Duration::from_secs(app_config.websocket.liveness_interval_seconds));
    if let Some(idle_timeout) = app_config.websocket.idle_timeout() {
        server_config = server_config.with_idle_timeout(idle_timeout);
    }

    // 记录会话列表的变化
    let mut sessions = cluster.watch_sessions();
    tokio::spawn(async move {
        while sessions.changed().await.is_ok() {
            let count = sessions.borrow_and_update().len();
            info!("[主程序] 当前在线会话数: {}", count);
        }
    });

    let on_connect = move |transport: TransportSession, peer_addr: SocketAddr| {
        let server_config = server_config.clone();
        let cluster = Arc::clone(&cluster);
        async move {
            match accept_session(&server_config, cluster, transport).await {
                Ok(session) => info!("[主程序] {} 已建立会话 {}", peer_addr, session.id()),
                Err(e) => warn!("[主程序] 拒绝来自 {} 的连接: {}", peer_addr, e),
            }
        }
    };

    info!("[主程序] 正在启动聊天服务器，监听地址: {}", addr);
    if let Err(e) = ServerTransport::start(addr, on_connect).await {
        error!("[主程序] 启动 WebSocket 服务时发生错误: {}", e);
        return Err(AppError::from(e).into());
    }
    Ok(())
}

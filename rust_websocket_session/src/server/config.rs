// rust_websocket_session/src/server/config.rs

//! 服务端会话配置与回调接口。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::session::ServerSession;
use crate::converter::{ContentConverter, WsData};
use crate::error::WsError;

/// 活性检查的默认周期。
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(15);

/// 每个会话已解码上行消息广播流的默认容量。
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// 服务端会话生命周期回调，所有会话共享同一个实例。
#[async_trait]
pub trait ServerHandler<U: WsData, D: WsData>: Send + Sync {
    /// 会话启动后调用一次。在会话的作用域内运行，会话关闭时被取消。
    async fn on_connect(&self, _session: Arc<ServerSession<U, D>>, _messages: broadcast::Receiver<U>) {}

    /// 会话关闭时调用一次。
    async fn on_closed(&self, _session_id: Uuid, _code: u16, _reason: &str) {}

    async fn on_error(&self, _session_id: Uuid, _error: &WsError) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopServerHandler;

impl<U: WsData, D: WsData> ServerHandler<U, D> for NoopServerHandler {}

/// 服务端会话配置。
pub struct ServerConfig<U, D> {
    pub converter: ContentConverter<U, D>,
    pub handler: Arc<dyn ServerHandler<U, D>>,
    /// 活性检查周期。
    pub liveness_interval: Duration,
    /// 设置后，超过该时长没有任何入站帧的会话会以 1001 关闭。
    pub idle_timeout: Option<Duration>,
    pub message_buffer: usize,
}

impl<U, D> Clone for ServerConfig<U, D> {
    fn clone(&self) -> Self {
        Self {
            converter: self.converter.clone(),
            handler: Arc::clone(&self.handler),
            liveness_interval: self.liveness_interval,
            idle_timeout: self.idle_timeout,
            message_buffer: self.message_buffer,
        }
    }
}

impl<U: WsData, D: WsData> ServerConfig<U, D> {
    pub fn new(converter: ContentConverter<U, D>) -> Self {
        Self {
            converter,
            handler: Arc::new(NoopServerHandler),
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            idle_timeout: None,
            message_buffer: DEFAULT_SESSION_BUFFER,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ServerHandler<U, D>>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }
}

// rust_websocket_session/src/client/config.rs

//! 客户端配置与回调接口。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::connection::WsClient;
use crate::converter::{ContentConverter, WsData};
use crate::error::WsError;
use crate::frame::close_code;
use crate::retry::RetryPolicy;
use crate::transport::{Connector, EndpointProvider, TungsteniteConnector};

/// 已解码消息广播流的默认容量。
pub const DEFAULT_MESSAGE_BUFFER: usize = 1024;

/// 按关闭码判断是否为异常关闭。
pub type CloseCodePredicate = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// 按关闭原因文本判断是否为异常关闭。
pub type CloseReasonPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// 客户端生命周期回调。
///
/// `on_closed` 和 `on_error` 在状态机的互斥锁内被调用，实现中不要同步等待
/// `WsClient::execute`，需要的话请 `tokio::spawn` 出去。`on_connect` 在本代连接的
/// 作用域中运行，连接断开时会被取消。
#[async_trait]
pub trait ClientHandler<U: WsData, D: WsData>: Send + Sync {
    /// 连接建立后调用一次，携带客户端句柄与该代连接的已解码消息流。
    async fn on_connect(&self, _client: WsClient<U, D>, _messages: broadcast::Receiver<D>) {}

    async fn on_closed(&self, _code: u16, _reason: &str) {}

    async fn on_error(&self, _error: &WsError) {}
}

/// 什么都不做的回调实现。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClientHandler;

impl<U: WsData, D: WsData> ClientHandler<U, D> for NoopClientHandler {}

/// 客户端配置。
pub struct ClientConfig<U, D> {
    pub endpoint: Arc<dyn EndpointProvider>,
    pub connector: Arc<dyn Connector>,
    pub handler: Arc<dyn ClientHandler<U, D>>,
    pub retry_policy: RetryPolicy,
    pub converter: ContentConverter<U, D>,
    /// 默认：除 1000 以外的关闭码都视为异常。
    pub abnormal_close_code: CloseCodePredicate,
    /// 默认：从不按原因文本判定异常。
    pub abnormal_close_reason: CloseReasonPredicate,
    /// 设置后启用健康检查：按此间隔发送 Ping，一整个间隔内没有任何入站帧则以 4000 断开。
    pub health_check_interval: Option<Duration>,
    pub message_buffer: usize,
}

impl<U: WsData, D: WsData> ClientConfig<U, D> {
    /// 使用真实 WebSocket 连接器、不重连、不做健康检查的默认配置。
    pub fn new(endpoint: Arc<dyn EndpointProvider>, converter: ContentConverter<U, D>) -> Self {
        Self {
            endpoint,
            connector: Arc::new(TungsteniteConnector::default()),
            handler: Arc::new(NoopClientHandler),
            retry_policy: RetryPolicy::Never,
            converter,
            abnormal_close_code: Arc::new(|code| code != close_code::NORMAL),
            abnormal_close_reason: Arc::new(|_| false),
            health_check_interval: None,
            message_buffer: DEFAULT_MESSAGE_BUFFER,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ClientHandler<U, D>>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_health_check(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn with_abnormal_close_code(
        mut self,
        predicate: impl Fn(u16) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.abnormal_close_code = Arc::new(predicate);
        self
    }

    pub fn with_abnormal_close_reason(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.abnormal_close_reason = Arc::new(predicate);
        self
    }

    pub fn with_message_buffer(mut self, message_buffer: usize) -> Self {
        self.message_buffer = message_buffer.max(1);
        self
    }
}

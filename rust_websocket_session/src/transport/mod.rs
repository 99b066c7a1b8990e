// rust_websocket_session/src/transport/mod.rs

//! 传输层契约。
//!
//! 客户端状态机与服务端会话都只依赖这里定义的接口，而不关心底层是真实的
//! WebSocket 连接 (`tungstenite` 子模块) 还是进程内的模拟连接 (`memory` 子模块)。
//!
//! - `Transport`：一条已经完成握手的全双工连接的发送端与关闭信号；
//! - `TransportSession`：打开连接后得到的 (发送端, 入站帧流) 二元组，入站流只交出一次；
//! - `Connector`：根据 `ConnectionInfo` 打开一条连接；
//! - `EndpointProvider`：每次连接前按需生成 `ConnectionInfo`，用于轮换 URL / 令牌。

pub mod memory;
pub mod tungstenite;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WsError;
use crate::frame::{CloseReason, Frame};

/// 入站帧通道的默认容量。
pub const DEFAULT_FRAME_BUFFER: usize = 256;

/// 一条已经完成握手的全双工连接。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送一帧。连接已关闭时返回 `WsError::SendErrorClosed`。
    async fn send(&self, frame: Frame) -> Result<(), WsError>;

    /// 以给定的关闭码和原因关闭连接。对已关闭的连接调用是无操作。
    async fn close(&self, code: u16, reason: &str) -> Result<(), WsError>;

    /// 连接是否仍然可用。
    fn is_active(&self) -> bool;

    /// 底层实现是否已经自动回复收到的 Ping。为 `true` 时上层不再发送 Pong。
    fn replies_to_ping(&self) -> bool {
        false
    }

    /// 等待连接关闭并返回关闭原因（对端关闭、网络中断或本端关闭）。
    ///
    /// 可以被多次、并发地调用，每次都返回同一个原因。
    async fn closed(&self) -> CloseReason;
}

/// 打开连接后的结果：发送端与入站帧流。
pub struct TransportSession {
    pub transport: Arc<dyn Transport>,
    pub incoming: mpsc::Receiver<Frame>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("active", &self.transport.is_active())
            .finish()
    }
}

/// 连接信息：URL 以及握手时附带的请求头（保持插入顺序）。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectionInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// 在每次连接尝试之前被调用，生成本次使用的连接信息。
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn build(&self) -> Result<ConnectionInfo, WsError>;
}

/// 固定的连接信息本身就是一个端点提供者。
#[async_trait]
impl EndpointProvider for ConnectionInfo {
    async fn build(&self) -> Result<ConnectionInfo, WsError> {
        Ok(self.clone())
    }
}

/// 根据连接信息打开一条传输层连接。
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, info: &ConnectionInfo) -> Result<TransportSession, WsError>;
}

pub use self::memory::{MemoryAcceptor, MemoryConnector, MemoryTransport};
pub use self::tungstenite::{TungsteniteConnector, TungsteniteTransport};

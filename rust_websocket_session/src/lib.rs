//! `rust_websocket_session` 是一个类型化的双向 WebSocket 通信库。
//!
//! 它提供：
//! - 客户端：维护一条逻辑连接的状态机 (`client::WsClient`)，支持自动重连、健康检查，
//!   以及基于 `ContentConverter` 的类型化收发；
//! - 服务端：每条连接一个 `server::ServerSession`，以及有容量与生命周期上限的会话集群
//!   (`cluster::LocalSessionCluster`、基于发布/订阅背板的 `cluster::DistributedSessionCluster`)。
//!
//! 主要模块包括：
//! - `frame` / `transport`：帧、关闭原因与传输层契约，以及 tokio-tungstenite 与内存实现；
//! - `converter`：内容转换器；
//! - `retry`：重连策略；
//! - `scope`：每代连接的任务作用域；
//! - `message`：背板上的广播信封；
//! - `error`：统一错误类型 `WsError`。

pub mod client;
pub mod cluster;
pub mod converter;
pub mod error;
pub mod frame;
pub mod message;
pub mod retry;
pub mod scope;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, ClientHandler, Command, ConnectionState, WsClient};
pub use cluster::{
    Backplane, ClusterConfig, DistributedSessionCluster, LocalSessionCluster, MemoryBackplane,
    SessionCluster, SessionFilter, broadcast_to,
};
pub use converter::{ChannelKind, ContentConverter, WsData};
pub use error::WsError;
pub use frame::{CloseReason, Frame};
pub use retry::RetryPolicy;
pub use server::{ServerConfig, ServerHandler, ServerSession, accept_session};
pub use transport::{ConnectionInfo, Connector, EndpointProvider, Transport, TransportSession};

// rust_websocket_session/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! - `transport`：TCP 监听与 WebSocket 握手 (`ServerTransport`)；
//! - `session`：每条连接对应的 `ServerSession`；
//! - `config`：`ServerConfig` 与生命周期回调 `ServerHandler`；
//! - `accept`：把新连接变成会话并注册进集群。

pub mod accept;
pub mod config;
pub mod session;
pub mod transport;

pub use accept::accept_session;
pub use config::{NoopServerHandler, ServerConfig, ServerHandler};
pub use session::ServerSession;
pub use transport::ServerTransport;
